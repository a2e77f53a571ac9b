//! Validation diagnostics collected while building the document model.

use thiserror::Error;

/// Category of a manifest validation defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A block selector could not be parsed as a media query.
    ParseError,
    /// A node did not have the YAML shape its position requires.
    IncorrectType,
    /// A definition that is structurally forbidden (e.g. an `unless` nested
    /// inside another `unless`).
    InvalidDefinition,
    /// An `is` condition that does not satisfy the comparison grammar.
    InvalidExpression,
    /// An installer node with no recognizable discriminant key, or more
    /// than one.
    UnsupportedInstaller,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ParseError => "parse error",
            Self::IncorrectType => "incorrect type",
            Self::InvalidDefinition => "invalid definition",
            Self::InvalidExpression => "invalid expression",
            Self::UnsupportedInstaller => "unsupported installer",
        };
        f.write_str(name)
    }
}

/// A single defect found while validating a manifest.
///
/// Validation never stops at the first defect; the full batch is attached to
/// the parsed [`crate::Manifest`] so every problem can be reported at once,
/// before anything mutating runs.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ValidationError {
    /// What category of defect this is.
    pub kind: ErrorKind,
    /// Human-readable description naming the offending key or node.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error of `kind` with a rendered message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
