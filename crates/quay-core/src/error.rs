//! Engine errors.
//!
//! Shape/validation defects are *collected* (see
//! [`quay_schema::ValidationError`]) and surfaced as a batch before anything
//! mutating runs; the variants here are the fail-fast errors that abort the
//! enclosing operation.

use quay_schema::ValidationError;
use thiserror::Error;

/// Fatal engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transfer failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// YAML (de)serialization failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A document could not be modeled at all.
    #[error(transparent)]
    Manifest(#[from] quay_schema::manifest::ManifestError),

    /// A dependency reference lacks its `registry:` qualifier. Raised before
    /// any registry is contacted; aborts the whole resolution.
    #[error("dependency '{id}' version '{range}' does not specify the registry")]
    UnqualifiedDependency {
        /// The reference as written.
        id: String,
        /// The requested version range.
        range: String,
    },

    /// No registry produced a match for a dependency. Aborts the whole
    /// resolution.
    #[error("unable to resolve dependency {id}/{range}")]
    UnresolvedDependency {
        /// The reference as written.
        id: String,
        /// The requested version range.
        range: String,
    },

    /// A dependency names a registry that is not loaded.
    #[error("artifact reference '{reference}' names unknown registry '{name}'")]
    UnknownRegistry {
        /// The full reference.
        reference: String,
        /// The unknown qualifier.
        name: String,
    },

    /// The manifest carries validation defects; nothing was installed.
    #[error("manifest has {} validation error(s); nothing was installed", .0.len())]
    ValidationFailed(Vec<ValidationError>),

    /// Applicable demand blocks declared `error` preconditions; nothing was
    /// installed.
    #[error("precondition errors are present; nothing was installed")]
    Preconditions(Vec<String>),

    /// An external command exited nonzero where success was required.
    #[error("command '{command}' failed with exit code {code}")]
    ProcessFailed {
        /// The command line that ran.
        command: String,
        /// Its exit code (-1 when terminated by a signal).
        code: i32,
    },

    /// An external command exceeded the configured time budget.
    #[error("command '{command}' timed out")]
    ProcessTimedOut {
        /// The command line that ran.
        command: String,
    },

    /// The acquired file did not match its declared checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Declared digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// Every declared location failed to produce the file.
    #[error("unable to acquire '{0}' from any declared location")]
    AcquireFailed(String),

    /// The archive's leading bytes match no supported format.
    #[error("unrecognized archive format: {0}")]
    UnsupportedArchive(String),

    /// A path transform is not a usable `s/find/replace/` expression.
    #[error("invalid path transform '{0}'")]
    InvalidTransform(String),
}

/// Engine result alias.
pub type Result<T> = std::result::Result<T, Error>;
