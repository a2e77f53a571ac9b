//! External process execution.
//!
//! Probes and installers run declared commands with ambient privileges;
//! nothing here is a sandbox. A nonzero exit is data for the caller (probe
//! candidates advance on failure), so [`run_shell`] only errors when the
//! process cannot be spawned or exceeds an explicit time budget.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ExecOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Union of stdout and stderr, in that order.
    pub fn log(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }
}

async fn run_prepared(mut cmd: Command, rendered: &str, timeout: Option<Duration>) -> Result<ExecOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    debug!("running: {rendered}");
    let work = cmd.output();
    let output = match timeout {
        Some(budget) => tokio::time::timeout(budget, work)
            .await
            .map_err(|_| Error::ProcessTimedOut {
                command: rendered.to_string(),
            })??,
        None => work.await?,
    };

    let result = ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    };
    if !result.success() {
        debug!("command exited {:?}: {rendered}", result.code);
    }
    Ok(result)
}

/// Run a command line through the platform shell, capturing output.
///
/// # Errors
///
/// Fails when the shell cannot be spawned or `timeout` elapses; a nonzero
/// exit is reported through [`ExecOutput::code`], not as an error.
pub async fn run_shell(
    command: &str,
    envs: Option<&BTreeMap<String, String>>,
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<ExecOutput> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("/bin/sh");
        c.args(["-c", command]);
        c
    };
    if let Some(envs) = envs {
        cmd.envs(envs);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    run_prepared(cmd, command, timeout).await
}

/// Run a program with explicit arguments (no shell), capturing output.
///
/// # Errors
///
/// Fails when the program cannot be spawned; a nonzero exit is reported
/// through [`ExecOutput::code`].
pub async fn run(
    program: &str,
    args: &[String],
    envs: Option<&BTreeMap<String, String>>,
    cwd: Option<&Path>,
) -> Result<ExecOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(envs) = envs {
        cmd.envs(envs);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let rendered = format!("{program} {}", args.join(" "));
    run_prepared(cmd, &rendered, None).await
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let out = run_shell("echo hello; echo oops >&2; exit 3", None, None, None)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert!(out.log().contains("hello"));
        assert!(out.log().contains("oops"));
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let err = run_shell("sleep 5", None, None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessTimedOut { .. }));
    }
}
