//! Console output: the CLI's [`Reporter`] implementation.

use std::path::Path;

use quay_core::Reporter;

/// Plain console reporter: status to stdout, problems to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct Output;

impl Output {
    /// Create a console reporter.
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for Output {
    fn info(&self, msg: &str) {
        println!("{msg}");
    }

    fn message(&self, msg: &str) {
        println!("note: {msg}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("warning: {msg}");
    }

    fn error(&self, msg: &str) {
        eprintln!("error: {msg}");
    }

    fn downloading(&self, name: &str, current: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => {
                tracing::debug!("downloading {name}: {current}/{total} bytes");
            }
            _ => tracing::debug!("downloading {name}: {current} bytes"),
        }
    }

    fn unpacked(&self, path: &Path) {
        tracing::debug!("unpacked {}", path.display());
    }
}
