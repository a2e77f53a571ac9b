//! Host facts and host-variable expansion.

use std::collections::{BTreeMap, BTreeSet};

/// The facts a demand selector can query and the environment a probe's
/// search roots expand against.
///
/// Detected once at session start and read-only thereafter.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// Normalized operating system fact: `windows`, `linux`, `osx` or
    /// `freebsd`.
    pub os: String,
    /// Normalized architecture fact: `x64`, `x86`, `arm` or `arm64`.
    pub arch: String,
    features: BTreeSet<String>,
    /// Snapshot of the process environment.
    pub env: BTreeMap<String, String>,
}

fn normalize_os(os: &str) -> String {
    match os {
        "macos" => "osx".to_string(),
        other => other.to_string(),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch {
        "x86_64" => "x64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

impl HostContext {
    /// Detect the running host and snapshot its environment.
    pub fn detect() -> Self {
        Self::new(
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::env::vars().collect(),
        )
    }

    /// Build a context for explicit facts; used by tests and cross-host
    /// evaluation.
    pub fn new(os: &str, arch: &str, env: BTreeMap<String, String>) -> Self {
        let os = normalize_os(os);
        let arch = normalize_arch(arch);
        let mut features = BTreeSet::new();
        features.insert(os.clone());
        features.insert(arch.clone());
        Self {
            os,
            arch,
            features,
            env,
        }
    }

    /// Whether a selector fact is active on this host. Case-insensitive.
    pub fn has_feature(&self, fact: &str) -> bool {
        self.features.contains(&fact.to_ascii_lowercase())
    }

    /// Replace `$NAME` tokens with environment values.
    ///
    /// `$$` escapes a literal `$`; a name with no environment value is left
    /// literal. Used on probe `from` roots before candidates are formed.
    pub fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            if chars.peek() == Some(&'$') {
                chars.next();
                out.push('$');
                continue;
            }
            let mut name = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    name.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            match self.env.get(&name) {
                Some(value) if !name.is_empty() => out.push_str(value),
                _ => {
                    out.push('$');
                    out.push_str(&name);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostContext {
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), "/home/dev".to_string());
        HostContext::new("linux", "x86_64", env)
    }

    #[test]
    fn normalizes_facts() {
        let h = host();
        assert!(h.has_feature("linux"));
        assert!(h.has_feature("x64"));
        assert!(h.has_feature("X64"));
        assert!(!h.has_feature("windows"));

        let mac = HostContext::new("macos", "aarch64", BTreeMap::new());
        assert!(mac.has_feature("osx"));
        assert!(mac.has_feature("arm64"));
    }

    #[test]
    fn expands_environment_variables() {
        let h = host();
        assert_eq!(h.expand("$HOME/.local/bin"), "/home/dev/.local/bin");
        assert_eq!(h.expand("$MISSING/bin"), "$MISSING/bin");
        assert_eq!(h.expand("100$$"), "100$");
    }
}
