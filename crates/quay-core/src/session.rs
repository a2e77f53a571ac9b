//! Session state: folder layout, host facts, global configuration and the
//! pending postscript.
//!
//! The global configuration is loaded once at session start and read-only
//! thereafter; everything below takes it (via the session) as an explicit
//! value rather than reaching for process-wide state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::activation::Activation;
use crate::artifact::{Artifact, INSTALLED_MANIFEST};
use crate::error::Result;
use crate::host::HostContext;
use crate::postscript::{self, Environment, POSTSCRIPT_VARIABLE, Postscript};
use crate::registry::RegistrySet;
use quay_schema::{Manifest, RegistryDecl};

/// File name of the global configuration inside the quay home.
pub const GLOBAL_CONFIG: &str = "quay-configuration.yaml";

/// The session-wide configuration, parsed from the global configuration
/// file.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Registries every resolution may draw from.
    pub registries: Vec<RegistryDecl>,
    /// Optional bound on probe `run` commands. No default is guessed: the
    /// policy exists only when configured.
    pub probe_timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    registries: Option<Vec<RawRegistry>>,
    global: Option<RawGlobal>,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    name: String,
    kind: Option<String>,
    location: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawGlobal {
    #[serde(rename = "probe-timeout")]
    probe_timeout: Option<u64>,
}

impl Config {
    /// Parse the global configuration document.
    ///
    /// # Errors
    ///
    /// Fails when the document is not valid YAML of the expected shape.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        let registries = raw
            .registries
            .unwrap_or_default()
            .into_iter()
            .map(|r| RegistryDecl {
                name: r.name,
                kind: r.kind.unwrap_or_else(|| "artifact".to_string()),
                location: match r.location {
                    Some(OneOrMany::One(one)) => vec![one],
                    Some(OneOrMany::Many(many)) => many,
                    None => Vec::new(),
                },
            })
            .collect();
        let probe_timeout = raw
            .global
            .and_then(|g| g.probe_timeout)
            .map(Duration::from_secs);
        Ok(Self {
            registries,
            probe_timeout,
        })
    }
}

fn default_config(registry_dir: &std::path::Path) -> String {
    format!(
        "\
# Global configuration

registries:
  - name: default
    kind: artifact
    location: {}

global:
  probe-timeout: ~
",
        registry_dir.display()
    )
}

/// Holds the folder layout, host facts, configuration, environment snapshot
/// and pending postscript of one engine invocation.
#[derive(Debug)]
pub struct Session {
    /// The quay home folder.
    pub home: PathBuf,
    /// Acquired artifact files.
    pub cache: PathBuf,
    /// Backup records and scratch space.
    pub tmp: PathBuf,
    /// Installed artifact trees.
    pub artifacts_dir: PathBuf,
    /// The default local registry root.
    pub registry_dir: PathBuf,
    /// Detected host facts and ambient environment.
    pub host: HostContext,
    /// Global configuration; loaded by [`init`](Self::init), read-only
    /// after.
    pub config: Config,
    /// The mutable environment view activations and deactivations operate
    /// on.
    pub environment: Environment,
    /// Buffered variable writes, rendered at exit.
    pub postscript: Postscript,
}

impl Session {
    /// Create a session rooted at `home`, defaulting to `$QUAY_HOME` or
    /// `~/.quay`.
    ///
    /// # Errors
    ///
    /// Fails when no home directory can be determined.
    pub fn new(home: Option<PathBuf>) -> Result<Self> {
        let host = HostContext::detect();
        let home = match home {
            Some(home) => home,
            None => match host.env.get("QUAY_HOME") {
                Some(home) if !home.is_empty() => PathBuf::from(home),
                _ => dirs::home_dir()
                    .map(|h| h.join(".quay"))
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "could not determine a home directory; set QUAY_HOME",
                        )
                    })?,
            },
        };
        let environment: BTreeMap<String, String> = host.env.clone();
        Ok(Self {
            cache: home.join("cache"),
            tmp: home.join("tmp"),
            artifacts_dir: home.join("artifacts"),
            registry_dir: home.join("registry"),
            home,
            host,
            config: Config::default(),
            environment,
            postscript: Postscript::default(),
        })
    }

    /// Path of the global configuration file.
    pub fn global_config_path(&self) -> PathBuf {
        self.home.join(GLOBAL_CONFIG)
    }

    /// Create the folder layout and load (bootstrapping if necessary) the
    /// global configuration.
    ///
    /// # Errors
    ///
    /// Fails when the home cannot be created or the configuration cannot be
    /// written or parsed — there is no useful session without either.
    pub async fn init(&mut self) -> Result<()> {
        for dir in [
            &self.home,
            &self.cache,
            &self.tmp,
            &self.artifacts_dir,
            &self.registry_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let config_path = self.global_config_path();
        if !tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
            tokio::fs::write(&config_path, default_config(&self.registry_dir)).await?;
            debug!("wrote default configuration to {}", config_path.display());
        }
        let text = tokio::fs::read_to_string(&config_path).await?;
        self.config = Config::parse(&text)?;
        debug!("loaded global configuration from {}", config_path.display());
        Ok(())
    }

    /// Build the registry set declared by the configuration.
    pub fn registries(&self) -> RegistrySet {
        RegistrySet::load(&self.config.registries, &self.artifacts_dir)
    }

    /// The postscript file designated by the shell wrapper, if any.
    pub fn postscript_path(&self) -> Option<PathBuf> {
        self.environment
            .get(POSTSCRIPT_VARIABLE)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// Every artifact with an installed marker under the artifacts folder.
    ///
    /// # Errors
    ///
    /// Fails when the artifacts folder cannot be read; unreadable or invalid
    /// trees inside it are skipped.
    pub async fn installed_artifacts(&self) -> Result<Vec<Artifact>> {
        let mut result = Vec::new();
        if !tokio::fs::try_exists(&self.artifacts_dir).await.unwrap_or(false) {
            return Ok(result);
        }
        let mut entries = tokio::fs::read_dir(&self.artifacts_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let folder = entry.path();
            let marker = folder.join(INSTALLED_MANIFEST);
            let Ok(text) = tokio::fs::read_to_string(&marker).await else {
                continue;
            };
            match Manifest::parse(&text) {
                Ok(manifest) => result.push(Artifact::installed(manifest, folder)),
                Err(err) => debug!("{} is not a valid install: {err}", folder.display()),
            }
        }
        Ok(result)
    }

    /// Apply an activation: snapshot undo state, then buffer and apply the
    /// writes.
    ///
    /// # Errors
    ///
    /// Fails when the backup record cannot be persisted.
    pub async fn apply_activation(
        &mut self,
        activation: &Activation,
        backup_environment: bool,
    ) -> Result<()> {
        postscript::record_activation(
            &mut self.postscript,
            &mut self.environment,
            activation,
            &self.tmp,
            backup_environment,
        )
        .await
    }

    /// Undo the most recent activation recorded by
    /// [`apply_activation`](Self::apply_activation).
    ///
    /// # Errors
    ///
    /// Propagates I/O failures deleting the backup record.
    pub async fn deactivate(&mut self) -> Result<()> {
        postscript::deactivate(&mut self.postscript, &mut self.environment).await
    }

    /// Render the buffered postscript into the designated file, if one was
    /// designated.
    ///
    /// # Errors
    ///
    /// Fails when the postscript file cannot be written.
    pub async fn write_postscript(&self) -> Result<()> {
        match self.postscript_path() {
            Some(path) => self.postscript.write_to(&path).await,
            None => {
                debug!("no postscript file designated; writes stay in-process");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_bootstraps_layout_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Some(dir.path().join("home"))).unwrap();
        session.init().await.unwrap();

        assert!(session.cache.is_dir());
        assert!(session.tmp.is_dir());
        assert!(session.artifacts_dir.is_dir());
        assert!(session.global_config_path().is_file());
        assert_eq!(session.config.registries.len(), 1);
        assert_eq!(session.config.registries[0].name, "default");
        assert!(session.config.probe_timeout.is_none());

        // a second init reloads rather than rewrites
        session.init().await.unwrap();
    }

    #[tokio::test]
    async fn config_parses_probe_timeout_and_locations() {
        let config = Config::parse(
            "\
registries:
  - name: main
    location: [/a, /b]
  - name: other
    kind: artifact
    location: /c

global:
  probe-timeout: 30
",
        )
        .unwrap();
        assert_eq!(config.registries.len(), 2);
        assert_eq!(config.registries[0].location, vec!["/a", "/b"]);
        assert_eq!(config.probe_timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn installed_artifacts_scans_markers() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Some(dir.path().join("home"))).unwrap();
        session.init().await.unwrap();

        let good = session.artifacts_dir.join("tool.1.0");
        tokio::fs::create_dir_all(&good).await.unwrap();
        tokio::fs::write(
            good.join(INSTALLED_MANIFEST),
            "info: {id: tool, version: '1.0'}\n",
        )
        .await
        .unwrap();
        // a folder without a marker is not an install
        tokio::fs::create_dir_all(session.artifacts_dir.join("junk"))
            .await
            .unwrap();

        let installed = session.installed_artifacts().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].id(), "tool");
    }

    #[tokio::test]
    async fn postscript_writes_to_designated_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Some(dir.path().join("home"))).unwrap();
        session.init().await.unwrap();

        let script = dir.path().join("post.sh");
        session.environment.insert(
            POSTSCRIPT_VARIABLE.to_string(),
            script.display().to_string(),
        );
        session.postscript.set("QUAY_TEST", "1");
        session.write_postscript().await.unwrap();

        let content = tokio::fs::read_to_string(&script).await.unwrap();
        assert!(content.contains("export QUAY_TEST=\"1\""));
    }
}
