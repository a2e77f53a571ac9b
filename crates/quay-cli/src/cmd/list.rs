//! List command.

use std::path::PathBuf;

use anyhow::Result;

use crate::cmd::open_session;

/// Print every installed artifact.
pub async fn list(home: Option<PathBuf>) -> Result<()> {
    let session = open_session(home).await?;
    let mut installed = session.installed_artifacts().await?;
    if installed.is_empty() {
        println!("no artifacts installed");
        return Ok(());
    }
    installed.sort_by(|a, b| a.id().cmp(b.id()));
    for artifact in &installed {
        let summary = artifact.manifest.info.summary.as_deref().unwrap_or("");
        println!("{:<40} {:<12} {summary}", artifact.id(), artifact.version());
    }
    Ok(())
}
