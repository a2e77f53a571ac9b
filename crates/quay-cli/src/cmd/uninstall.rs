//! Uninstall command.

use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::cmd::open_session;

/// Remove installed artifacts by id.
pub async fn uninstall(home: Option<PathBuf>, artifacts: &[String]) -> Result<()> {
    if artifacts.is_empty() {
        bail!("no artifacts named");
    }

    let session = open_session(home).await?;
    let installed = session.installed_artifacts().await?;

    for requested in artifacts {
        let matching: Vec<_> = installed
            .iter()
            .filter(|artifact| artifact.id() == requested || artifact.name() == *requested)
            .collect();
        if matching.is_empty() {
            eprintln!("warning: {requested} is not installed");
            continue;
        }
        for artifact in matching {
            artifact.uninstall().await?;
            println!("removed {} {}", artifact.id(), artifact.version());
        }
    }
    Ok(())
}
