//! Reversible persistence of environment mutations.
//!
//! A spawned process cannot mutate its parent shell, so every variable
//! write is buffered in a [`Postscript`] and rendered at exit into a script
//! the invoking shell wrapper sources. Before an activation is applied,
//! [`record_activation`] snapshots the prior value of every variable about
//! to be written into a backup record on disk and points the undo variable
//! at it; [`deactivate`] consumes that record exactly once, restoring
//! scalars and removing only the path segments the activation added.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::activation::{Activation, PATH_DELIMITER};
use crate::error::Result;

/// Environment variable holding the path of the pending backup record.
pub const UNDO_VARIABLE: &str = "QUAY_UNDO";

/// Environment variable naming the postscript file the shell wrapper will
/// source; its extension selects the script dialect.
pub const POSTSCRIPT_VARIABLE: &str = "QUAY_POSTSCRIPT";

/// A mutable environment snapshot.
pub type Environment = BTreeMap<String, String>;

/// Which shell dialect a postscript is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// POSIX `export`/`unset`.
    Posix,
    /// Windows `cmd` `set` statements.
    Cmd,
    /// PowerShell `${ENV:...}` assignments.
    PowerShell,
}

impl ShellKind {
    /// Pick the dialect from a postscript file's extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ps1") => Self::PowerShell,
            Some("cmd") | Some("bat") => Self::Cmd,
            _ => Self::Posix,
        }
    }
}

/// The durable snapshot taken before an activation mutates the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Prior scalar values of every overlaid variable; `None` records that
    /// the variable was absent.
    pub environment: BTreeMap<String, Option<String>>,
    /// The activation that was applied, kept so deactivation can remove
    /// exactly the path segments it added.
    pub activation: Activation,
}

/// Buffered variable writes, rendered once into a shell script at exit.
#[derive(Debug, Clone, Default)]
pub struct Postscript {
    writes: Vec<(String, String)>,
}

impl Postscript {
    /// Buffer a variable write; an empty value renders as an unset where the
    /// dialect can express it.
    pub fn set(&mut self, variable: impl Into<String>, value: impl Into<String>) {
        let variable = variable.into();
        let value = value.into();
        if let Some(entry) = self.writes.iter_mut().find(|(v, _)| *v == variable) {
            entry.1 = value;
        } else {
            self.writes.push((variable, value));
        }
    }

    /// Whether anything has been buffered.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Render every buffered write in the given dialect.
    pub fn render(&self, kind: ShellKind) -> String {
        match kind {
            ShellKind::Posix => self
                .writes
                .iter()
                .map(|(variable, value)| {
                    if value.is_empty() {
                        format!("unset {variable}")
                    } else {
                        format!("export {variable}=\"{value}\"")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            ShellKind::Cmd => self
                .writes
                .iter()
                .map(|(variable, value)| format!("set {variable}={value}"))
                .collect::<Vec<_>>()
                .join("\r\n"),
            ShellKind::PowerShell => self
                .writes
                .iter()
                .map(|(variable, value)| format!("${{ENV:{variable}}}=\"{value}\""))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Write the rendered postscript to `path`, choosing the dialect from
    /// its extension. Nothing is written when no writes are buffered.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let content = self.render(ShellKind::from_path(path));
        tokio::fs::write(path, content).await?;
        debug!("postscript written to {}", path.display());
        Ok(())
    }
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Apply an activation to the environment, capturing undo state first.
///
/// Prior scalar values land in a backup record persisted under `tmp_dir`
/// (when `backup_environment` is set) and the undo variable points at it.
/// Path-like variables are prepended, scalars overlaid; every write is also
/// buffered into the postscript.
///
/// # Errors
///
/// Fails when the backup record cannot be written.
pub async fn record_activation(
    postscript: &mut Postscript,
    environment: &mut Environment,
    activation: &Activation,
    tmp_dir: &Path,
    backup_environment: bool,
) -> Result<()> {
    let mut record = BackupRecord {
        environment: BTreeMap::new(),
        activation: activation.clone(),
    };

    for (variable, values) in activation.path_entries() {
        let delimiter = PATH_DELIMITER.to_string();
        let added = values
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(&delimiter);
        let merged = match environment.get(variable) {
            Some(existing) if !existing.is_empty() => format!("{added}{delimiter}{existing}"),
            _ => added,
        };
        // path writes are undone segment-wise, so no scalar backup here
        postscript.set(variable, merged.clone());
        environment.insert(variable.clone(), merged);
    }

    for (variable, value) in activation.variables() {
        record
            .environment
            .insert(variable.clone(), environment.get(&variable).cloned());
        postscript.set(variable.clone(), value.clone());
        environment.insert(variable, value);
    }

    if !activation.defines.is_empty() {
        let rendered = activation
            .defines
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        postscript.set("DEFINES", rendered);
    }

    if backup_environment {
        tokio::fs::create_dir_all(tmp_dir).await?;
        let backup_file = tmp_dir.join(format!("previous-environment-{}.json", epoch_millis()));
        tokio::fs::write(&backup_file, serde_json::to_vec_pretty(&record)?).await?;
        let pointer = backup_file.display().to_string();
        postscript.set(UNDO_VARIABLE, pointer.clone());
        environment.insert(UNDO_VARIABLE.to_string(), pointer);
    }

    Ok(())
}

/// Undo the most recent activation.
///
/// Reads the undo pointer, loads and deletes the backup record, restores
/// every captured scalar (deleting ones that were previously absent), and
/// strips exactly the added segments from path-like variables, collapsing
/// any repeated delimiters left behind. All writes, including the pointer
/// clear, are buffered into the postscript. A missing or unreadable record
/// clears the pointer and does nothing else.
///
/// # Errors
///
/// Fails only on I/O problems deleting the backup record.
pub async fn deactivate(postscript: &mut Postscript, environment: &mut Environment) -> Result<()> {
    let pointer = environment.remove(UNDO_VARIABLE);
    postscript.set(UNDO_VARIABLE, "");

    let Some(pointer) = pointer.filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    let backup_file = PathBuf::from(&pointer);
    let Ok(contents) = tokio::fs::read_to_string(&backup_file).await else {
        debug!("undo record {pointer} is gone; nothing to restore");
        return Ok(());
    };
    tokio::fs::remove_file(&backup_file).await?;

    let Ok(record) = serde_json::from_str::<BackupRecord>(&contents) else {
        debug!("undo record {pointer} is not valid; bailing");
        return Ok(());
    };

    for (variable, prior) in &record.environment {
        match prior {
            Some(value) => {
                environment.insert(variable.clone(), value.clone());
                postscript.set(variable.clone(), value.clone());
            }
            None => {
                environment.remove(variable);
                postscript.set(variable.clone(), "");
            }
        }
    }

    for (variable, added) in record.activation.path_entries() {
        let Some(current) = environment.get(variable) else {
            continue;
        };
        let mut stripped = current.clone();
        for segment in added {
            stripped = stripped.replace(&segment.display().to_string(), "");
        }
        let collapsed = collapse_delimiters(&stripped);
        environment.insert(variable.clone(), collapsed.clone());
        postscript.set(variable.clone(), collapsed);
    }

    Ok(())
}

fn collapse_delimiters(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_was_delimiter = false;
    for c in value.chars() {
        if c == PATH_DELIMITER {
            if !previous_was_delimiter {
                out.push(c);
            }
            previous_was_delimiter = true;
        } else {
            out.push(c);
            previous_was_delimiter = false;
        }
    }
    out.trim_matches(PATH_DELIMITER).to_string()
}
