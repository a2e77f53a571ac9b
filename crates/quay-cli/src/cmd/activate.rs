//! Activate command: project resolution, installation of what is missing,
//! activation composition and postscript emission.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use quay_core::{Activation, Artifact, ArtifactMap, InstallOptions};
use quay_schema::Manifest;

use crate::cmd::open_session;
use crate::ui::Output;

/// Project manifest file names, in lookup order.
const PROJECT_MANIFESTS: [&str; 3] = ["environment.yaml", "environment.yml", "quay.yaml"];

fn find_project_manifest(start: &std::path::Path) -> Option<PathBuf> {
    let mut location = start.to_path_buf();
    loop {
        for name in PROJECT_MANIFESTS {
            let candidate = location.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if !location.pop() {
            return None;
        }
    }
}

/// Activate the project in (or above) the given directory.
pub async fn activate(home: Option<PathBuf>, project: Option<PathBuf>) -> Result<()> {
    let start = match project {
        Some(path) => path,
        None => std::env::current_dir().context("failed to get current directory")?,
    };
    let manifest_path = find_project_manifest(&start)
        .ok_or_else(|| anyhow!("no project manifest found in {}", start.display()))?;
    let project_dir = manifest_path
        .parent()
        .ok_or_else(|| anyhow!("project manifest has no parent directory"))?
        .to_path_buf();
    println!("activating project {}", manifest_path.display());

    let mut session = open_session(home).await?;
    let registries = session.registries();
    let output = Output::new();

    let text = tokio::fs::read_to_string(&manifest_path).await?;
    let manifest = Manifest::parse(&text)?;
    if !manifest.is_valid() {
        for defect in &manifest.diagnostics {
            eprintln!("error: {defect}");
        }
        anyhow::bail!("project manifest has validation errors");
    }
    let project = Arc::new(Artifact::installed(manifest, project_dir));

    let mut map = ArtifactMap::new();
    project
        .resolve_dependencies(&session, &registries, &mut map, true)
        .await?;

    let options = InstallOptions::default();
    for selection in map.iter() {
        let artifact = &selection.artifact;
        if artifact.install(&session, &options, &output).await? {
            println!("installed {} {}", artifact.reference(), artifact.version());
        }
    }

    let mut activation = Activation::default();
    for selection in map.iter() {
        selection
            .artifact
            .load_activation_settings(&session, &mut activation, &output)
            .await;
    }
    project
        .load_activation_settings(&session, &mut activation, &output)
        .await;

    session.apply_activation(&activation, true).await?;
    session.write_postscript().await?;
    println!("activated {} artifact(s)", map.len());
    Ok(())
}
