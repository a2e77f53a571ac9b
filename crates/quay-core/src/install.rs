//! Installer dispatch: one classified installer entry to one install
//! routine.
//!
//! Archive variants acquire their file (verifying any declared digest) and
//! unpack it with the declared path shaping; the git variant drives the git
//! CLI, honoring commit/full/recurse/subdirectory and the ESP-IDF
//! bootstrap. Entries for one artifact run strictly sequentially in
//! declaration order — concurrent unpacking into one target directory would
//! risk partial, conflicting writes.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::acquire::{Verification, acquire_artifact_file};
use crate::artifact::Artifact;
use crate::error::{Error, Result};
use crate::exec;
use crate::paths::{artifact_file_name, sanitize_path};
use crate::reporter::Reporter;
use crate::session::Session;
use crate::unpack::{UnpackOptions, unpack};
use quay_schema::{ArchiveInstaller, GitInstaller, Installer, NupkgInstaller};

/// Run one installer entry for `artifact`.
///
/// # Errors
///
/// Acquisition, verification, unpack and subprocess failures are all fatal
/// for the artifact's install; nothing already written is rolled back.
pub(crate) async fn run_installer(
    session: &Session,
    artifact: &Artifact,
    installer: &Installer,
    reporter: &dyn Reporter,
) -> Result<()> {
    match installer {
        Installer::Unzip(archive) => {
            install_archive(session, artifact, archive, ".zip", reporter).await
        }
        Installer::Untar(archive) => {
            install_archive(session, artifact, archive, ".tar", reporter).await
        }
        Installer::Nupkg(nupkg) => install_nupkg(session, artifact, nupkg, reporter).await,
        Installer::Git(git) => install_git(session, artifact, git, reporter).await,
    }
}

async fn install_archive(
    session: &Session,
    artifact: &Artifact,
    install: &ArchiveInstaller,
    extension: &str,
    reporter: &dyn Reporter,
) -> Result<()> {
    let filename = artifact_file_name(
        &artifact.name(),
        install.nametag.as_deref(),
        install.lang.as_deref(),
        extension,
    );
    let verification =
        Verification::from_declared(install.sha256.as_deref(), install.sha512.as_deref());
    let file = acquire_artifact_file(
        &session.cache,
        &install.locations,
        &filename,
        verification.as_ref(),
        reporter,
    )
    .await?;
    let options = UnpackOptions {
        strip: install.strip,
        transform: install.transform.clone(),
    };
    unpack(&file, &artifact.target, &options, reporter).await
}

async fn install_nupkg(
    session: &Session,
    artifact: &Artifact,
    install: &NupkgInstaller,
    reporter: &dyn Reporter,
) -> Result<()> {
    let filename = format!("{}.zip", artifact.name());
    let verification =
        Verification::from_declared(install.sha256.as_deref(), install.sha512.as_deref());
    let locations = std::slice::from_ref(&install.location);
    let file = acquire_artifact_file(
        &session.cache,
        locations,
        &filename,
        verification.as_ref(),
        reporter,
    )
    .await?;
    let options = UnpackOptions {
        strip: install.strip,
        transform: install.transform.clone(),
    };
    unpack(&file, &artifact.target, &options, reporter).await
}

async fn git(target: &Path, args: &[String]) -> Result<()> {
    let output = exec::run("git", args, None, None).await?;
    if !output.success() {
        debug!("git stderr: {}", output.stderr.trim());
        return Err(Error::ProcessFailed {
            command: format!("git {} (in {})", args.join(" "), target.display()),
            code: output.code.unwrap_or(-1),
        });
    }
    Ok(())
}

async fn install_git(
    session: &Session,
    artifact: &Artifact,
    install: &GitInstaller,
    reporter: &dyn Reporter,
) -> Result<()> {
    let target = match install.subdirectory.as_deref() {
        Some(subdirectory) => artifact.target.join(sanitize_path(subdirectory)),
        None => artifact.target.clone(),
    };
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let target_str = target.display().to_string();

    let mut args = vec!["clone".to_string(), install.location.clone(), target_str];
    if install.recurse {
        args.push("--recursive".to_string());
    }
    if !install.full {
        args.push("--depth".to_string());
        args.push("1".to_string());
    }
    reporter.info(&format!("cloning {}", install.location));
    git(&target, &args).await?;

    if let Some(commit) = &install.commit {
        let at = |tail: &[&str]| {
            let mut args = vec!["-C".to_string(), target.display().to_string()];
            args.extend(tail.iter().map(|s| (*s).to_string()));
            args
        };
        if install.full {
            git(&target, &at(&["reset", "--hard", commit])).await?;
        } else {
            git(&target, &at(&["fetch", "origin", commit, "--depth", "1"])).await?;
            git(&target, &at(&["checkout", commit])).await?;
        }
    }

    if install.espidf {
        bootstrap_espidf(&target, session, reporter).await?;
    }
    Ok(())
}

/// Run the ESP-IDF tooling bootstrap inside a fresh clone: `idf_tools.py`
/// install, install-python-env and export, with the IDF paths pointed into
/// the artifact tree.
async fn bootstrap_espidf(
    target: &Path,
    session: &Session,
    reporter: &dyn Reporter,
) -> Result<()> {
    let tools_path = target.join(".espressif");
    tokio::fs::create_dir_all(&tools_path).await?;
    let idf_path = target.join("esp-idf");
    let script = idf_path.join("tools/idf_tools.py");

    let mut envs: BTreeMap<String, String> = session.environment.clone();
    envs.insert("IDF_PATH".to_string(), idf_path.display().to_string());
    envs.insert("IDF_TOOLS_PATH".to_string(), tools_path.display().to_string());

    for step in ["install", "install-python-env", "export"] {
        reporter.info(&format!("esp-idf bootstrap: {step}"));
        let command = format!("python {} {step}", script.display());
        let output = exec::run_shell(&command, Some(&envs), Some(target), None).await?;
        if !output.success() {
            return Err(Error::ProcessFailed {
                command,
                code: output.code.unwrap_or(-1),
            });
        }
    }
    Ok(())
}
