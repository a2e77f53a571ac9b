//! Deactivate command: undo the most recent activation.

use std::path::PathBuf;

use anyhow::Result;

use crate::cmd::open_session;

/// Restore the environment captured before the last activation and emit
/// the postscript.
pub async fn deactivate(home: Option<PathBuf>) -> Result<()> {
    let mut session = open_session(home).await?;
    session.deactivate().await?;
    session.write_postscript().await?;
    println!("deactivated");
    Ok(())
}
