//! Install command: resolve references, then install the whole set.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use quay_core::{ArtifactMap, InstallOptions, Selection};

use crate::cmd::open_session;
use crate::ui::Output;

/// Resolve every reference (plus transitive dependencies) and install the
/// deduplicated set in resolution order.
pub async fn install(
    home: Option<PathBuf>,
    artifacts: &[String],
    version: Option<&str>,
    force: bool,
    language: Option<String>,
    all_languages: bool,
) -> Result<()> {
    if artifacts.is_empty() {
        bail!("no artifacts requested; pass references like 'default:tools/cmake'");
    }

    let session = open_session(home).await?;
    let registries = session.registries();
    let output = Output::new();
    let range = version.unwrap_or("*");

    let mut map = ArtifactMap::new();
    for reference in artifacts {
        let artifact = registries
            .get_artifact(reference, range)
            .await?
            .ok_or_else(|| anyhow!("unable to resolve artifact {reference}/{range}"))?;
        let artifact = Arc::new(artifact);
        let inserted = map.insert(
            artifact.unique_id(),
            Selection {
                artifact: Arc::clone(&artifact),
                requested_id: reference.clone(),
                requested_range: range.to_string(),
            },
        );
        if inserted {
            artifact
                .resolve_dependencies(&session, &registries, &mut map, true)
                .await?;
        }
    }

    let options = InstallOptions {
        force,
        all_languages,
        language,
    };
    let mut installed = 0usize;
    let mut unchanged = 0usize;
    for selection in map.iter() {
        let artifact = &selection.artifact;
        if artifact
            .install(&session, &options, &output)
            .await
            .map_err(|e| anyhow!("installing {} failed: {e}", artifact.reference()))?
        {
            println!("installed {} {}", artifact.reference(), artifact.version());
            installed += 1;
        } else {
            println!(
                "{} {} is already installed",
                artifact.reference(),
                artifact.version()
            );
            unchanged += 1;
        }
    }
    println!("{installed} installed, {unchanged} unchanged");
    Ok(())
}
