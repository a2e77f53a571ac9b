//! The merged environment view of a set of resolved artifacts.
//!
//! Each applicable demand block contributes defines, tools, path fragments
//! and variables; [`apply_settings`] folds one bundle into the shared
//! [`Activation`] accumulator, and [`Activation::environment_block`] renders
//! the result over an ambient environment as a pure merge — the ambient
//! environment itself is never touched here (mutation happens through the
//! postscript, see [`crate::postscript`]).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::paths::sanitize_path;
use crate::reporter::Reporter;
use quay_schema::Settings;

/// Separator for path-like environment variables on this platform.
pub const PATH_DELIMITER: char = if cfg!(windows) { ';' } else { ':' };

/// The merged environment contribution of all resolved artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Activation {
    /// Scalar defines; last write wins.
    pub defines: BTreeMap<String, String>,
    /// Tool names resolved to a path under an install root.
    pub tools: BTreeMap<String, PathBuf>,
    /// Shell aliases.
    pub aliases: BTreeMap<String, String>,
    /// Published locations by name.
    pub locations: BTreeMap<String, PathBuf>,
    /// Path-like variables: ordered location lists, accumulating across
    /// artifacts, duplicates kept.
    pub paths: BTreeMap<String, Vec<PathBuf>>,
    /// Environment variables: ordered value lists, space-joined on read.
    pub environment: BTreeMap<String, Vec<String>>,
    /// Arbitrary properties.
    pub properties: BTreeMap<String, Vec<String>>,
}

impl Activation {
    /// Path-like variables that actually accumulated contents.
    pub fn path_entries(&self) -> impl Iterator<Item = (&String, &Vec<PathBuf>)> {
        self.paths.iter().filter(|(_, v)| !v.is_empty())
    }

    /// Scalar variables to overlay: environment values space-joined, then
    /// tools.
    pub fn variables(&self) -> Vec<(String, String)> {
        let mut result: Vec<(String, String)> = self
            .environment
            .iter()
            .map(|(key, values)| (key.clone(), values.join(" ")))
            .collect();
        for (key, path) in &self.tools {
            result.push((key.clone(), path.display().to_string()));
        }
        result
    }

    /// Merge the activation over an ambient environment.
    ///
    /// Path-like keys are joined with the platform delimiter, new entries
    /// first, de-duplicated against whatever the key already held; tools and
    /// variables are overlaid afterward. Pure: `base` is not modified.
    pub fn environment_block(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut result = base.clone();
        for (variable, values) in self.path_entries() {
            let mut seen = BTreeSet::new();
            let mut segments = Vec::new();
            for value in values {
                let rendered = value.display().to_string();
                if seen.insert(rendered.clone()) {
                    segments.push(rendered);
                }
            }
            if let Some(existing) = result.get(variable) {
                for part in existing.split(PATH_DELIMITER) {
                    if !part.is_empty() && seen.insert(part.to_string()) {
                        segments.push(part.to_string());
                    }
                }
            }
            let delimiter = PATH_DELIMITER.to_string();
            result.insert(variable.clone(), segments.join(&delimiter));
        }
        for (key, value) in self.variables() {
            result.insert(key, value);
        }
        result
    }
}

/// Fold one demand block's export bundle into the activation.
///
/// `relative_listing` is the artifact's installed tree as install-relative
/// paths; path patterns glob against it case-insensitively. Collisions are
/// reported, never fatal: a re-declared define warns and the new value wins,
/// a re-declared tool errors and the new value still wins, a tool whose
/// resolved path is absent errors and activation continues.
pub fn apply_settings(
    activation: &mut Activation,
    settings: &Settings,
    install_root: &Path,
    relative_listing: &[String],
    reporter: &dyn Reporter,
) {
    for (key, value) in &settings.defines {
        let value = if value == "true" { "1" } else { value.as_str() };
        if let Some(previous) = activation.defines.get(key) {
            if previous != value {
                reporter.warning(&format!(
                    "duplicate define {key} during activation; new value will replace old"
                ));
            }
        }
        activation.defines.insert(key.clone(), value.to_string());
    }

    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::default()
    };
    for (key, patterns) in &settings.paths {
        if key.is_empty() {
            continue;
        }
        let variable = key.to_uppercase();
        let entry = activation.paths.entry(variable).or_default();
        for pattern in patterns {
            let pattern = sanitize_path(pattern);
            if pattern.is_empty() {
                entry.push(install_root.to_path_buf());
                continue;
            }
            let Ok(matcher) = Pattern::new(&pattern) else {
                reporter.warning(&format!("path pattern '{pattern}' is not a valid glob"));
                continue;
            };
            let matched: Vec<PathBuf> = relative_listing
                .iter()
                .filter(|candidate| matcher.matches_with(candidate.as_str(), options))
                .map(|candidate| install_root.join(candidate))
                .collect();
            if !matched.is_empty() {
                debug!("pattern '{pattern}' matched {} locations", matched.len());
                entry.extend(matched);
            }
        }
    }

    for (key, value) in &settings.tools {
        let variable = key.to_uppercase();
        if activation.tools.contains_key(&variable) {
            reporter.error(&format!("duplicate tool declared {key} during activation"));
        }
        let location = sanitize_path(value);
        let resolved = install_root.join(&location);
        if !resolved.exists() {
            reporter.error(&format!(
                "tool '{key}' is specified as '{location}' which does not exist in the package"
            ));
        }
        activation.tools.insert(variable, resolved);
    }

    for (key, values) in &settings.variables {
        activation
            .environment
            .entry(key.clone())
            .or_default()
            .extend(values.iter().cloned());
    }

    for (key, value) in &settings.aliases {
        activation.aliases.insert(key.clone(), value.clone());
    }

    for (key, value) in &settings.locations {
        let resolved = install_root.join(sanitize_path(value));
        activation.locations.insert(key.clone(), resolved);
    }

    for (key, values) in &settings.properties {
        activation
            .properties
            .entry(key.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::Reporter;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        warnings: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl Reporter for Capture {
        fn info(&self, _msg: &str) {}
        fn message(&self, _msg: &str) {}
        fn warning(&self, msg: &str) {
            self.warnings.lock().unwrap().push(msg.to_string());
        }
        fn error(&self, msg: &str) {
            self.errors.lock().unwrap().push(msg.to_string());
        }
        fn downloading(&self, _name: &str, _current: u64, _total: Option<u64>) {}
        fn unpacked(&self, _path: &Path) {}
    }

    fn settings(yaml: &str) -> Settings {
        let text = format!("info: {{id: t, version: '1'}}\nexports:\n{yaml}");
        quay_schema::Manifest::parse(&text).unwrap().demands.default.settings
    }

    #[test]
    fn define_conflicts_warn_and_last_write_wins() {
        let mut activation = Activation::default();
        let capture = Capture::default();
        let root = Path::new("/opt/a");

        apply_settings(
            &mut activation,
            &settings("  defines:\n    FOO: first\n    USE_IT: 'true'\n"),
            root,
            &[],
            &capture,
        );
        apply_settings(
            &mut activation,
            &settings("  defines:\n    FOO: second\n"),
            root,
            &[],
            &capture,
        );

        assert_eq!(activation.defines.get("FOO").unwrap(), "second");
        assert_eq!(activation.defines.get("USE_IT").unwrap(), "1");
        assert_eq!(capture.warnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn tool_collisions_and_missing_paths_report_but_continue() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/tool"), "").unwrap();

        let mut activation = Activation::default();
        let capture = Capture::default();

        apply_settings(
            &mut activation,
            &settings("  tools:\n    mytool: bin/tool\n"),
            dir.path(),
            &[],
            &capture,
        );
        assert!(capture.errors.lock().unwrap().is_empty());

        // same key again, and a path that does not exist
        apply_settings(
            &mut activation,
            &settings("  tools:\n    mytool: bin/other\n"),
            dir.path(),
            &[],
            &capture,
        );
        let errors = capture.errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        // later write still wins
        assert_eq!(
            activation.tools.get("MYTOOL").unwrap(),
            &dir.path().join("bin/other")
        );
    }

    #[test]
    fn paths_glob_against_the_listing_and_accumulate() {
        let mut activation = Activation::default();
        let capture = Capture::default();
        let listing = vec![
            "bin".to_string(),
            "bin/tool".to_string(),
            "lib/include".to_string(),
        ];

        apply_settings(
            &mut activation,
            &settings("  paths:\n    path: [BIN]\n"),
            Path::new("/opt/a"),
            &listing,
            &capture,
        );
        apply_settings(
            &mut activation,
            &settings("  paths:\n    path: [bin]\n"),
            Path::new("/opt/b"),
            &listing,
            &capture,
        );

        // case-insensitive match, accumulation across artifacts, key uppercased
        assert_eq!(
            activation.paths.get("PATH").unwrap(),
            &vec![PathBuf::from("/opt/a/bin"), PathBuf::from("/opt/b/bin")]
        );
    }

    #[test]
    fn variables_accumulate_and_join_with_spaces() {
        let mut activation = Activation::default();
        let capture = Capture::default();
        apply_settings(
            &mut activation,
            &settings("  variables:\n    CFLAGS: [-O2]\n"),
            Path::new("/opt/a"),
            &[],
            &capture,
        );
        apply_settings(
            &mut activation,
            &settings("  variables:\n    CFLAGS: [-g]\n"),
            Path::new("/opt/b"),
            &[],
            &capture,
        );
        let variables = activation.variables();
        assert!(variables.contains(&("CFLAGS".to_string(), "-O2 -g".to_string())));
    }

    #[test]
    fn environment_block_is_a_pure_merge_with_dedup() {
        let mut activation = Activation::default();
        activation
            .paths
            .entry("PATH".to_string())
            .or_default()
            .extend([PathBuf::from("/opt/a/bin"), PathBuf::from("/usr/bin")]);
        activation
            .environment
            .entry("CFLAGS".to_string())
            .or_default()
            .push("-O2".to_string());
        activation
            .tools
            .insert("CC".to_string(), PathBuf::from("/opt/a/bin/cc"));

        let delimiter = PATH_DELIMITER;
        let mut base = BTreeMap::new();
        base.insert(
            "PATH".to_string(),
            format!("/usr/bin{delimiter}/usr/local/bin"),
        );

        let merged = activation.environment_block(&base);
        assert_eq!(
            merged.get("PATH").unwrap(),
            &format!("/opt/a/bin{delimiter}/usr/bin{delimiter}/usr/local/bin")
        );
        assert_eq!(merged.get("CFLAGS").unwrap(), "-O2");
        assert_eq!(merged.get("CC").unwrap(), "/opt/a/bin/cc");
        // the ambient map is untouched
        assert_eq!(base.len(), 1);
    }
}
