//! Artifacts: identity, dependency resolution, install orchestration and
//! activation contributions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::activation::{Activation, apply_settings};
use crate::demands::ApplicableDemands;
use crate::error::{Error, Result};
use crate::install::run_installer;
use crate::paths::mangle;
use crate::registry::RegistrySet;
use crate::reporter::Reporter;
use crate::session::Session;
use quay_schema::Manifest;

/// The durable marker a successful install leaves behind; its presence is
/// what `is_installed` relies on.
pub const INSTALLED_MANIFEST: &str = "artifact.yaml";

/// Options for one install pass.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Reinstall even when the artifact is already present.
    pub force: bool,
    /// Run language-tagged installer entries regardless of language.
    pub all_languages: bool,
    /// The language whose tagged entries should run.
    pub language: Option<String>,
}

/// One requested artifact: the concrete resolution plus the reference that
/// asked for it, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The resolved artifact.
    pub artifact: Arc<Artifact>,
    /// The originally requested id string.
    pub requested_id: String,
    /// The originally requested version range.
    pub requested_range: String,
}

/// The accumulated, deduplicated result of dependency resolution, keyed by
/// unique id with insertion-once semantics.
///
/// A package reachable through two different requested ranges resolves only
/// once, using whichever path visited it first; no cross-path conflict
/// detection is performed.
#[derive(Debug, Clone, Default)]
pub struct ArtifactMap {
    entries: Vec<(String, Selection)>,
}

impl ArtifactMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a unique id is already present.
    pub fn contains(&self, unique_id: &str) -> bool {
        self.entries.iter().any(|(id, _)| id == unique_id)
    }

    /// Insert a selection; the first resolution for a unique id wins.
    /// Returns whether the entry was inserted.
    pub fn insert(&mut self, unique_id: String, selection: Selection) -> bool {
        if self.contains(&unique_id) {
            return false;
        }
        self.entries.push((unique_id, selection));
        true
    }

    /// Look up a selection by unique id.
    pub fn get(&self, unique_id: &str) -> Option<&Selection> {
        self.entries
            .iter()
            .find(|(id, _)| id == unique_id)
            .map(|(_, s)| s)
    }

    /// The selections in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Selection> {
        self.entries.iter().map(|(_, s)| s)
    }

    /// The resolved artifacts in insertion order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Arc<Artifact>> {
        self.iter().map(|s| &s.artifact)
    }

    /// Number of resolved artifacts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been resolved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A concrete artifact: a manifest bound to a registry and an install
/// directory.
#[derive(Debug)]
pub struct Artifact {
    /// The parsed manifest.
    pub manifest: Manifest,
    /// Name of the registry that resolved this artifact.
    pub registry_id: String,
    /// Storage location of that registry; part of the unique id.
    pub registry_location: String,
    /// Directory this artifact installs into.
    pub target: PathBuf,
    demands: OnceCell<ApplicableDemands>,
}

impl Artifact {
    /// Bind a resolved manifest to its registry and install root.
    pub fn new(
        manifest: Manifest,
        registry_id: impl Into<String>,
        registry_location: impl Into<String>,
        artifacts_root: &Path,
    ) -> Self {
        let name = format!("{}-{}", mangle(&manifest.info.id), manifest.info.version);
        let target = artifacts_root.join(name);
        Self {
            manifest,
            registry_id: registry_id.into(),
            registry_location: registry_location.into(),
            target,
            demands: OnceCell::new(),
        }
    }

    /// Rehydrate an artifact from its installed tree.
    pub fn installed(manifest: Manifest, target: PathBuf) -> Self {
        Self {
            manifest,
            registry_id: "installed".to_string(),
            registry_location: String::new(),
            target,
            demands: OnceCell::new(),
        }
    }

    /// The artifact id as declared.
    pub fn id(&self) -> &str {
        &self.manifest.info.id
    }

    /// The concrete version as declared.
    pub fn version(&self) -> &str {
        &self.manifest.info.version
    }

    /// `registry:id` display reference.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.registry_id, self.id())
    }

    /// Directory-safe `name-version` form of the identity.
    pub fn name(&self) -> String {
        format!("{}-{}", mangle(self.id()), self.version())
    }

    /// The sole deduplication key during resolution:
    /// `registryLocation::id::version`.
    pub fn unique_id(&self) -> String {
        format!(
            "{}::{}::{}",
            self.registry_location,
            self.id(),
            self.version()
        )
    }

    /// The applicable demand blocks for this session's host, with probes
    /// resolved. Evaluated lazily once and cached for the artifact's
    /// lifetime.
    pub async fn demands(&self, session: &Session) -> &ApplicableDemands {
        self.demands
            .get_or_init(|| async {
                let mut demands =
                    ApplicableDemands::evaluate(&self.manifest.demands, &session.host);
                demands
                    .resolve_probes(&session.host, session.config.probe_timeout)
                    .await;
                demands
            })
            .await
    }

    /// Whether the durable installed marker is present.
    pub async fn is_installed(&self) -> bool {
        tokio::fs::try_exists(self.target.join(INSTALLED_MANIFEST))
            .await
            .unwrap_or(false)
    }

    /// Resolve this artifact's requirements into `artifacts`.
    ///
    /// Depth-first, sequential, insert-once: every applicable `(id, range)`
    /// must carry a registry qualifier (fatal otherwise, before any registry
    /// is contacted), must resolve (fatal otherwise), and is inserted keyed
    /// by unique id — tagged with the originally requested id and range —
    /// then recursed into when `recurse` is set.
    pub fn resolve_dependencies<'a>(
        &'a self,
        session: &'a Session,
        registries: &'a RegistrySet,
        artifacts: &'a mut ArtifactMap,
        recurse: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let requires = self.demands(session).await.requires();
            for (id, range) in requires {
                if !id.contains(':') {
                    return Err(Error::UnqualifiedDependency {
                        id,
                        range,
                    });
                }
                let dependency = registries
                    .get_artifact(&id, &range)
                    .await?
                    .ok_or_else(|| Error::UnresolvedDependency {
                        id: id.clone(),
                        range: range.clone(),
                    })?;
                let unique_id = dependency.unique_id();
                if !artifacts.contains(&unique_id) {
                    let dependency = Arc::new(dependency);
                    let range = if range.is_empty() {
                        "*".to_string()
                    } else {
                        range
                    };
                    artifacts.insert(
                        unique_id,
                        Selection {
                            artifact: Arc::clone(&dependency),
                            requested_id: id,
                            requested_range: range,
                        },
                    );
                    if recurse {
                        dependency
                            .resolve_dependencies(session, registries, artifacts, true)
                            .await?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Install this artifact.
    ///
    /// Already installed and not forced: nothing done, returns `false`.
    /// Forced: best-effort uninstall first. Validation defects and `error`
    /// preconditions are all reported, then abort before any installer runs.
    /// Installer entries run strictly sequentially in declaration order; the
    /// first failure aborts the rest with no rollback. Success persists the
    /// manifest as the installed marker and returns `true`.
    ///
    /// # Errors
    ///
    /// [`Error::ValidationFailed`], [`Error::Preconditions`], or the first
    /// installer failure.
    pub async fn install(
        &self,
        session: &Session,
        options: &InstallOptions,
        reporter: &dyn Reporter,
    ) -> Result<bool> {
        if self.is_installed().await && !options.force {
            return Ok(false);
        }
        if options.force {
            if let Err(err) = self.uninstall().await {
                // a locked file may block removal; deal with what remains
                debug!("uninstall before reinstall failed: {err}");
            }
        }

        if !self.manifest.is_valid() {
            for defect in &self.manifest.diagnostics {
                reporter.error(&defect.to_string());
            }
            return Err(Error::ValidationFailed(self.manifest.diagnostics.clone()));
        }

        let demands = self.demands(session).await;
        let errors = demands.errors();
        if !errors.is_empty() {
            for message in &errors {
                reporter.error(message);
            }
            return Err(Error::Preconditions(errors));
        }
        for message in demands.warnings() {
            reporter.warning(&message);
        }
        for message in demands.messages() {
            reporter.message(&message);
        }

        for installer in demands.installers() {
            if let (Some(lang), Some(requested)) =
                (installer.lang(), options.language.as_deref())
            {
                if !options.all_languages && !requested.eq_ignore_ascii_case(lang) {
                    continue;
                }
            }
            run_installer(session, self, &installer, reporter).await?;
        }

        self.write_manifest().await?;
        Ok(true)
    }

    /// Persist the manifest into the install tree as the durable marker.
    ///
    /// # Errors
    ///
    /// Fails when the target directory or marker cannot be written.
    pub async fn write_manifest(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.target).await?;
        tokio::fs::write(
            self.target.join(INSTALLED_MANIFEST),
            &self.manifest.source,
        )
        .await?;
        Ok(())
    }

    /// Delete the install tree recursively. No in-use detection beyond
    /// letting the delete fail.
    ///
    /// # Errors
    ///
    /// Propagates the filesystem failure.
    pub async fn uninstall(&self) -> Result<()> {
        tokio::fs::remove_dir_all(&self.target).await?;
        Ok(())
    }

    /// Fold this artifact's activation contributions into the shared
    /// accumulator.
    pub async fn load_activation_settings(
        &self,
        session: &Session,
        activation: &mut Activation,
        reporter: &dyn Reporter,
    ) {
        let listing = relative_listing(&self.target);
        for settings in self.demands(session).await.settings() {
            apply_settings(activation, &settings, &self.target, &listing, reporter);
        }
    }
}

/// The installed tree as install-relative forward-slash paths, files and
/// directories alike.
fn relative_listing(root: &Path) -> Vec<String> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::reporter::NullReporter;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory registry recording every resolution request.
    struct MockRegistry {
        manifests: BTreeMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl MockRegistry {
        fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                manifests: entries
                    .iter()
                    .map(|(id, text)| ((*id).to_string(), (*text).to_string()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Registry for MockRegistry {
        fn location(&self) -> &str {
            "mock://registry"
        }

        async fn resolve(&self, id: &str, _range: &str) -> Result<Option<(Manifest, String)>> {
            self.requests.lock().unwrap().push(id.to_string());
            match self.manifests.get(id) {
                Some(text) => {
                    let manifest = Manifest::parse(text)?;
                    let version = manifest.info.version.clone();
                    Ok(Some((manifest, version)))
                }
                None => Ok(None),
            }
        }
    }

    fn manifest_text(id: &str, requires: &[(&str, &str)]) -> String {
        let mut text = format!("info:\n  id: {id}\n  version: '1.0.0'\n");
        if !requires.is_empty() {
            text.push_str("requires:\n");
            for (dep, range) in requires {
                text.push_str(&format!("  {dep}: '{range}'\n"));
            }
        }
        text
    }

    async fn session() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(Some(dir.path().join("home"))).unwrap();
        session.init().await.unwrap();
        (dir, session)
    }

    fn root_artifact(session: &Session, text: &str) -> Artifact {
        Artifact::new(
            Manifest::parse(text).unwrap(),
            "mock",
            "mock://registry",
            &session.artifacts_dir,
        )
    }

    #[tokio::test]
    async fn missing_qualifier_fails_before_contacting_any_registry() {
        let (_dir, session) = session().await;
        let registry = Arc::new(MockRegistry::new(&[]));
        let mut registries = RegistrySet::new(&session.artifacts_dir);
        registries.add("mock", registry.clone() as Arc<dyn Registry>);

        let root = root_artifact(&session, &manifest_text("root", &[("pkg", "*")]));
        let mut map = ArtifactMap::new();
        let err = root
            .resolve_dependencies(&session, &registries, &mut map, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnqualifiedDependency { .. }));
        assert!(registry.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolved_dependency_aborts_resolution() {
        let (_dir, session) = session().await;
        let registry = Arc::new(MockRegistry::new(&[]));
        let mut registries = RegistrySet::new(&session.artifacts_dir);
        registries.add("mock", registry as Arc<dyn Registry>);

        let root = root_artifact(&session, &manifest_text("root", &[("mock:ghost", "*")]));
        let mut map = ArtifactMap::new();
        let err = root
            .resolve_dependencies(&session, &registries, &mut map, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedDependency { .. }));
    }

    #[tokio::test]
    async fn diamond_graphs_resolve_each_package_once_first_range_wins() {
        let (_dir, session) = session().await;
        let a = manifest_text("a", &[("mock:shared", "^1.0")]);
        let b = manifest_text("b", &[("mock:shared", "^1")]);
        let shared = manifest_text("shared", &[]);
        let registry = Arc::new(MockRegistry::new(&[
            ("a", a.as_str()),
            ("b", b.as_str()),
            ("shared", shared.as_str()),
        ]));
        let mut registries = RegistrySet::new(&session.artifacts_dir);
        registries.add("mock", registry.clone() as Arc<dyn Registry>);

        let root = root_artifact(
            &session,
            &manifest_text("root", &[("mock:a", "*"), ("mock:b", "*")]),
        );
        let mut map = ArtifactMap::new();
        root.resolve_dependencies(&session, &registries, &mut map, true)
            .await
            .unwrap();

        let ids: Vec<&str> = map.iter().map(|s| s.artifact.id()).collect();
        assert_eq!(ids, vec!["a", "shared", "b"]);

        let shared_selection = map
            .iter()
            .find(|s| s.artifact.id() == "shared")
            .unwrap();
        // tagged with the first path's requested range
        assert_eq!(shared_selection.requested_range, "^1.0");
        assert_eq!(shared_selection.requested_id, "mock:shared");
    }

    #[tokio::test]
    async fn insert_is_first_wins() {
        let (_dir, session) = session().await;
        let artifact = Arc::new(root_artifact(&session, &manifest_text("p", &[])));
        let mut map = ArtifactMap::new();
        assert!(map.insert(
            artifact.unique_id(),
            Selection {
                artifact: Arc::clone(&artifact),
                requested_id: "mock:p".into(),
                requested_range: "^1".into(),
            }
        ));
        assert!(!map.insert(
            artifact.unique_id(),
            Selection {
                artifact: Arc::clone(&artifact),
                requested_id: "mock:p".into(),
                requested_range: "^2".into(),
            }
        ));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&artifact.unique_id()).unwrap().requested_range, "^1");
    }

    #[tokio::test]
    async fn precondition_errors_gate_every_installer() {
        let (_dir, session) = session().await;
        let text = "\
info: {id: gated, version: '1'}
error: this artifact cannot install here
install:
  unzip: /nonexistent/file.zip
";
        let artifact = root_artifact(&session, text);
        let err = artifact
            .install(&session, &InstallOptions::default(), &NullReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Preconditions(messages) if messages.len() == 1));
        assert!(!artifact.is_installed().await);
    }

    #[tokio::test]
    async fn failed_installer_entry_halts_and_leaves_not_installed() {
        let (_dir, session) = session().await;
        let text = "\
info: {id: broken, version: '1'}
install:
  - unzip: /nonexistent/file.zip
  - unzip: /also/nonexistent.zip
";
        let artifact = root_artifact(&session, text);
        let err = artifact
            .install(&session, &InstallOptions::default(), &NullReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!artifact.is_installed().await);
    }

    #[tokio::test]
    async fn language_tagged_entries_filter() {
        let (_dir, session) = session().await;
        // the lone installer entry is tagged 'fr'; requesting 'en' skips it,
        // so the install completes having done nothing but write the marker
        let text = "\
info: {id: localized, version: '1'}
install:
  unzip: /nonexistent/file.zip
  lang: fr
";
        let artifact = root_artifact(&session, text);
        let options = InstallOptions {
            language: Some("en".to_string()),
            ..InstallOptions::default()
        };
        assert!(artifact.install(&session, &options, &NullReporter).await.unwrap());
        assert!(artifact.is_installed().await);

        // matching language actually runs the entry (and fails on the path)
        let artifact = root_artifact(&session, text);
        let options = InstallOptions {
            force: true,
            language: Some("FR".to_string()),
            ..InstallOptions::default()
        };
        assert!(
            artifact
                .install(&session, &options, &NullReporter)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn installed_marker_roundtrip() {
        let (_dir, session) = session().await;
        let artifact = root_artifact(&session, &manifest_text("plain", &[]));
        assert!(!artifact.is_installed().await);
        assert!(
            artifact
                .install(&session, &InstallOptions::default(), &NullReporter)
                .await
                .unwrap()
        );
        assert!(artifact.is_installed().await);
        // second install is a no-op
        assert!(
            !artifact
                .install(&session, &InstallOptions::default(), &NullReporter)
                .await
                .unwrap()
        );
        artifact.uninstall().await.unwrap();
        assert!(!artifact.is_installed().await);
    }
}
