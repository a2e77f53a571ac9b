//! Installer nodes and their classification.
//!
//! An installer entry is a YAML mapping discriminated by exactly one of the
//! keys `unzip`, `untar`, `nupkg` or `git`. Zero or multiple discriminants
//! is an unsupported installer and is rejected at classification time.

use serde_yaml::Value;

use crate::coerce;
use crate::error::{ErrorKind, ValidationError};

/// Archive acquisition and unpack settings shared by `unzip` and `untar`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveInstaller {
    /// Candidate download locations, tried in order.
    pub locations: Vec<String>,
    /// Expected SHA-256 of the acquired file, when declared.
    pub sha256: Option<String>,
    /// Expected SHA-512 of the acquired file, when declared.
    pub sha512: Option<String>,
    /// Number of leading path segments to remove from each archive member.
    pub strip: Option<usize>,
    /// Ordered `s/find/replace/` transforms applied to member paths.
    pub transform: Vec<String>,
    /// Language tag; filtered against the caller's requested language.
    pub lang: Option<String>,
    /// Extra tag distinguishing multiple files of one artifact.
    pub nametag: Option<String>,
}

/// A NuGet package acquisition (unpacked as a zip).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NupkgInstaller {
    /// The package download location.
    pub location: String,
    /// Expected SHA-256 of the acquired file, when declared.
    pub sha256: Option<String>,
    /// Expected SHA-512 of the acquired file, when declared.
    pub sha512: Option<String>,
    /// Number of leading path segments to remove from each archive member.
    pub strip: Option<usize>,
    /// Ordered `s/find/replace/` transforms applied to member paths.
    pub transform: Vec<String>,
    /// Language tag; filtered against the caller's requested language.
    pub lang: Option<String>,
    /// Extra tag distinguishing multiple files of one artifact.
    pub nametag: Option<String>,
}

/// A source checkout via the git CLI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitInstaller {
    /// Repository location to clone.
    pub location: String,
    /// Commit, tag or branch to check out after the clone.
    pub commit: Option<String>,
    /// Clone full history instead of a depth-1 checkout.
    pub full: bool,
    /// Clone submodules recursively.
    pub recurse: bool,
    /// Subdirectory of the target to clone into.
    pub subdirectory: Option<String>,
    /// Run the ESP-IDF tooling bootstrap after the clone.
    pub espidf: bool,
    /// Language tag; filtered against the caller's requested language.
    pub lang: Option<String>,
    /// Extra tag distinguishing multiple files of one artifact.
    pub nametag: Option<String>,
}

/// One classified installer entry of a demand block.
#[derive(Debug, Clone, PartialEq)]
pub enum Installer {
    /// Acquire and unpack a zip archive.
    Unzip(ArchiveInstaller),
    /// Acquire and unpack a tar (optionally gzip-compressed) archive.
    Untar(ArchiveInstaller),
    /// Acquire and unpack a NuGet package.
    Nupkg(NupkgInstaller),
    /// Clone a git repository.
    Git(GitInstaller),
}

const DISCRIMINANTS: [&str; 4] = ["unzip", "untar", "nupkg", "git"];

impl Installer {
    /// Classify a YAML node into exactly one installer variant.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::UnsupportedInstaller`] validation error when
    /// the node is not a mapping, carries no discriminant key, or carries
    /// more than one.
    pub fn classify(node: &Value) -> Result<Self, ValidationError> {
        let Value::Mapping(map) = node else {
            return Err(ValidationError::new(
                ErrorKind::UnsupportedInstaller,
                "installer entry is not an object",
            ));
        };

        let found: Vec<&str> = DISCRIMINANTS
            .iter()
            .copied()
            .filter(|key| coerce::get(map, key).is_some())
            .collect();
        let kind = match found.as_slice() {
            [one] => *one,
            [] => {
                return Err(ValidationError::new(
                    ErrorKind::UnsupportedInstaller,
                    "installer entry has no recognized kind",
                ));
            }
            many => {
                return Err(ValidationError::new(
                    ErrorKind::UnsupportedInstaller,
                    format!("installer entry is ambiguous: {}", many.join(", ")),
                ));
            }
        };

        let lang = coerce::string(coerce::get(map, "lang"));
        let nametag = coerce::string(coerce::get(map, "nametag"));

        let archive = |key: &str| ArchiveInstaller {
            locations: coerce::string_list(coerce::get(map, key)),
            sha256: coerce::string(coerce::get(map, "sha256")),
            sha512: coerce::string(coerce::get(map, "sha512")),
            strip: coerce::unsigned(coerce::get(map, "strip")),
            transform: coerce::string_list(coerce::get(map, "transform")),
            lang: lang.clone(),
            nametag: nametag.clone(),
        };

        Ok(match kind {
            "unzip" => Self::Unzip(archive("unzip")),
            "untar" => Self::Untar(archive("untar")),
            "nupkg" => Self::Nupkg(NupkgInstaller {
                location: coerce::string(coerce::get(map, "nupkg")).unwrap_or_default(),
                sha256: coerce::string(coerce::get(map, "sha256")),
                sha512: coerce::string(coerce::get(map, "sha512")),
                strip: coerce::unsigned(coerce::get(map, "strip")),
                transform: coerce::string_list(coerce::get(map, "transform")),
                lang,
                nametag,
            }),
            _ => Self::Git(GitInstaller {
                location: coerce::string(coerce::get(map, "git")).unwrap_or_default(),
                commit: coerce::string(coerce::get(map, "commit")),
                full: coerce::boolean(coerce::get(map, "full")),
                recurse: coerce::boolean(coerce::get(map, "recurse")),
                subdirectory: coerce::string(coerce::get(map, "subdirectory")),
                espidf: coerce::boolean(coerce::get(map, "espidf")),
                lang,
                nametag,
            }),
        })
    }

    /// The language tag of the entry, if any.
    pub fn lang(&self) -> Option<&str> {
        match self {
            Self::Unzip(a) | Self::Untar(a) => a.lang.as_deref(),
            Self::Nupkg(n) => n.lang.as_deref(),
            Self::Git(g) => g.lang.as_deref(),
        }
    }

    /// The nametag of the entry, if any.
    pub fn nametag(&self) -> Option<&str> {
        match self {
            Self::Unzip(a) | Self::Untar(a) => a.nametag.as_deref(),
            Self::Nupkg(n) => n.nametag.as_deref(),
            Self::Git(g) => g.nametag.as_deref(),
        }
    }
}
