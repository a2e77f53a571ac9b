//! Registry abstraction and the local directory registry.
//!
//! The engine only ever asks a registry one question: resolve `(id, version
//! range)` to a concrete manifest. Index and remote storage formats live
//! behind this trait; [`LocalRegistry`] is the directory-backed
//! implementation (`<root>/<id>/<version>.yaml`) that makes the engine
//! usable end-to-end and testable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use semver::{Version, VersionReq};
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::error::{Error, Result};
use quay_schema::{Manifest, RegistryDecl};

/// Resolves artifact ids and version ranges to concrete manifests.
#[async_trait]
pub trait Registry: Send + Sync {
    /// A stable identifier for the registry's storage location; part of
    /// every resolved artifact's unique id.
    fn location(&self) -> &str;

    /// Resolve `(id, range)` to the best matching manifest and its concrete
    /// version, or `None` when nothing matches.
    async fn resolve(&self, id: &str, range: &str) -> Result<Option<(Manifest, String)>>;
}

/// Named registries, dispatching `registry:id` references.
pub struct RegistrySet {
    artifacts_root: PathBuf,
    named: Vec<(String, Arc<dyn Registry>)>,
}

impl std::fmt::Debug for RegistrySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySet")
            .field("artifacts_root", &self.artifacts_root)
            .field("named", &self.named.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl RegistrySet {
    /// An empty set; resolved artifacts install under `artifacts_root`.
    pub fn new(artifacts_root: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_root: artifacts_root.into(),
            named: Vec::new(),
        }
    }

    /// Register a registry under `name`; the first registration of a name
    /// wins.
    pub fn add(&mut self, name: impl Into<String>, registry: Arc<dyn Registry>) {
        let name = name.into();
        if self.named.iter().any(|(n, _)| *n == name) {
            debug!("registry '{name}' already loaded");
            return;
        }
        self.named.push((name, registry));
    }

    /// Look up a registry by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Registry>> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Build a set from configuration declarations. Only directory-backed
    /// locations are loaded; anything else is skipped with a warning.
    pub fn load(decls: &[RegistryDecl], artifacts_root: impl Into<PathBuf>) -> Self {
        let mut set = Self::new(artifacts_root);
        for decl in decls {
            if decl.kind != "artifact" {
                warn!("registry '{}' has unsupported kind '{}'", decl.name, decl.kind);
                continue;
            }
            let Some(location) = decl.location.first() else {
                warn!("registry '{}' declares no location", decl.name);
                continue;
            };
            if location.starts_with("https://") || location.starts_with("http://") {
                warn!("registry '{}' is remote; remote indexes are not loaded", decl.name);
                continue;
            }
            let root = location.strip_prefix("file://").unwrap_or(location);
            set.add(
                decl.name.clone(),
                Arc::new(LocalRegistry::new(PathBuf::from(root))),
            );
        }
        set
    }

    /// Resolve a qualified `registry:id` reference to a concrete artifact.
    ///
    /// # Errors
    ///
    /// [`Error::UnqualifiedDependency`] when the reference has no qualifier,
    /// [`Error::UnknownRegistry`] when the qualifier names no loaded
    /// registry; registry failures propagate.
    pub async fn get_artifact(&self, reference: &str, range: &str) -> Result<Option<Artifact>> {
        let Some((name, id)) = reference.split_once(':') else {
            return Err(Error::UnqualifiedDependency {
                id: reference.to_string(),
                range: range.to_string(),
            });
        };
        let registry = self.get(name).ok_or_else(|| Error::UnknownRegistry {
            reference: reference.to_string(),
            name: name.to_string(),
        })?;
        let Some((manifest, _version)) = registry.resolve(id, range).await? else {
            return Ok(None);
        };
        Ok(Some(Artifact::new(
            manifest,
            name,
            registry.location(),
            &self.artifacts_root,
        )))
    }
}

/// A registry over a directory tree of manifests:
/// `<root>/<id>/<version>.yaml`.
#[derive(Debug)]
pub struct LocalRegistry {
    root: PathBuf,
    location: String,
}

impl LocalRegistry {
    /// Open a directory as a registry. The directory need not exist yet;
    /// resolution against a missing tree simply finds nothing.
    pub fn new(root: PathBuf) -> Self {
        let location = root.display().to_string();
        Self { root, location }
    }
}

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

#[async_trait]
impl Registry for LocalRegistry {
    fn location(&self) -> &str {
        &self.location
    }

    async fn resolve(&self, id: &str, range: &str) -> Result<Option<(Manifest, String)>> {
        let dir = self.root.join(id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };

        let mut versions: Vec<(Option<Version>, String, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_manifest_file(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            versions.push((Version::parse(stem).ok(), stem.to_string(), path));
        }

        let range = range.trim();
        let requirement = if range.is_empty() || range == "*" {
            None
        } else {
            match VersionReq::parse(range) {
                Ok(req) => Some(req),
                Err(_) => {
                    // not a semver range: fall back to an exact version match
                    let found = versions.iter().find(|(_, stem, _)| stem == range);
                    let Some((_, stem, path)) = found else {
                        return Ok(None);
                    };
                    return load(path, stem).await.map(Some);
                }
            }
        };

        let best = versions
            .iter()
            .filter(|(version, _, _)| match (&requirement, version) {
                (Some(req), Some(version)) => req.matches(version),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .max_by(|(a, sa, _), (b, sb, _)| match (a, b) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => sa.cmp(sb),
            });

        match best {
            Some((_, stem, path)) => load(path, stem).await.map(Some),
            None => Ok(None),
        }
    }
}

async fn load(path: &Path, version: &str) -> Result<(Manifest, String)> {
    let text = tokio::fs::read_to_string(path).await?;
    let manifest = Manifest::parse(&text)?;
    if manifest.info.version != version {
        debug!(
            "manifest {} declares version {} but is filed as {version}",
            path.display(),
            manifest.info.version
        );
    }
    Ok((manifest, version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(root: &Path, id: &str, version: &str) {
        let dir = root.join(id);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let text = format!("info:\n  id: {id}\n  version: '{version}'\n");
        tokio::fs::write(dir.join(format!("{version}.yaml")), text)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolves_highest_matching_version() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "tools/cmake", "3.20.0").await;
        seed(dir.path(), "tools/cmake", "3.28.1").await;
        seed(dir.path(), "tools/cmake", "4.0.0").await;

        let registry = LocalRegistry::new(dir.path().to_path_buf());
        let (_, version) = registry
            .resolve("tools/cmake", "^3.20")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(version, "3.28.1");

        let (_, version) = registry.resolve("tools/cmake", "*").await.unwrap().unwrap();
        assert_eq!(version, "4.0.0");

        assert!(registry.resolve("tools/cmake", "^5").await.unwrap().is_none());
        assert!(registry.resolve("tools/other", "*").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unqualified_references_fail_before_any_lookup() {
        let set = RegistrySet::new("/tmp/artifacts");
        let err = set.get_artifact("no-qualifier", "*").await.unwrap_err();
        assert!(matches!(err, Error::UnqualifiedDependency { .. }));

        let err = set.get_artifact("ghost:pkg", "*").await.unwrap_err();
        assert!(matches!(err, Error::UnknownRegistry { .. }));
    }
}
