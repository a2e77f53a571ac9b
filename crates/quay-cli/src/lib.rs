//! Command-line surface for quay.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod cmd;
pub mod ui;

/// Declarative artifact acquisition and environment activation.
#[derive(Debug, Parser)]
#[command(name = "quay", version, about)]
pub struct Cli {
    /// Root folder for caches, installed artifacts and configuration
    /// (defaults to `$QUAY_HOME` or `~/.quay`).
    #[arg(long, global = true, env = "QUAY_HOME")]
    pub home: Option<PathBuf>,

    /// The command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve and install artifacts with their dependencies.
    Install {
        /// Qualified artifact references, e.g. `default:tools/cmake`.
        artifacts: Vec<String>,

        /// Version range to request (applies to every named artifact).
        #[arg(long)]
        version: Option<String>,

        /// Reinstall even when already installed.
        #[arg(long)]
        force: bool,

        /// Run installer entries tagged with this language.
        #[arg(long)]
        language: Option<String>,

        /// Run language-tagged installer entries regardless of language.
        #[arg(long)]
        all_languages: bool,
    },

    /// Remove installed artifacts.
    Uninstall {
        /// Artifact ids to remove.
        artifacts: Vec<String>,
    },

    /// Resolve a project's dependencies, install what is missing, and emit
    /// the activation postscript.
    Activate {
        /// Project folder to activate (defaults to the current directory).
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Undo the most recent activation.
    Deactivate,

    /// List installed artifacts.
    List,
}
