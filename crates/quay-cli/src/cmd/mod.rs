//! Command implementations: thin orchestration over `quay-core`.

pub mod activate;
pub mod deactivate;
pub mod install;
pub mod list;
pub mod uninstall;

use std::path::PathBuf;

use anyhow::{Context, Result};
use quay_core::Session;

/// Create and initialize a session rooted at the given (or default) home.
pub(crate) async fn open_session(home: Option<PathBuf>) -> Result<Session> {
    let mut session = Session::new(home).context("failed to create session")?;
    session.init().await.context("failed to initialize the quay home")?;
    Ok(session)
}
