//! Reporter trait for dependency injection.
//!
//! Core operations report progress, artifact messages and recoverable
//! problems through this trait instead of printing, so the CLI can render
//! them and tests can capture them.

use std::path::Path;

/// Receives progress and status notifications from engine operations.
pub trait Reporter: Send + Sync {
    /// Log an informational line.
    fn info(&self, msg: &str);

    /// Relay a `message` declared by an artifact's demand block.
    fn message(&self, msg: &str);

    /// Report a recoverable problem; the operation continues.
    fn warning(&self, msg: &str);

    /// Report an error; whether the operation continues is the caller's
    /// decision.
    fn error(&self, msg: &str);

    /// Progress of a download in bytes.
    fn downloading(&self, name: &str, current: u64, total: Option<u64>);

    /// An archive member was written to disk.
    fn unpacked(&self, path: &Path);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn message(&self, msg: &str) {
        (**self).message(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn downloading(&self, name: &str, current: u64, total: Option<u64>) {
        (**self).downloading(name, current, total);
    }
    fn unpacked(&self, path: &Path) {
        (**self).unpacked(path);
    }
}

/// Discards everything. Useful in tests and non-interactive embedding.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&self, _msg: &str) {}
    fn message(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn downloading(&self, _name: &str, _current: u64, _total: Option<u64>) {}
    fn unpacked(&self, _path: &Path) {}
}

/// Routes notifications to `tracing`, for embedders that only want logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }
    fn message(&self, msg: &str) {
        tracing::info!("{msg}");
    }
    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }
    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }
    fn downloading(&self, name: &str, current: u64, total: Option<u64>) {
        tracing::debug!("downloading {name}: {current}/{total:?}");
    }
    fn unpacked(&self, path: &Path) {
        tracing::debug!("unpacked {}", path.display());
    }
}
