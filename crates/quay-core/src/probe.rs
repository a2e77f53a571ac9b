//! Alternative fulfillment probing.
//!
//! An `unless` block asks: is a suitable tool already on this machine? The
//! probe forms candidate paths from the cartesian product of `from` search
//! roots and `where` binary names and checks them strictly in order —
//! probing stops at the first success, so unordered probing would waste work
//! and could nondeterministically pick a different candidate. A candidate
//! must exist, its `run` command (if declared) must exit zero, and the `is`
//! condition (if declared) must hold over the variables captured by the
//! `select` regex. Every candidate failure is recoverable; exhausting all
//! candidates is a non-match, not an error.

use std::time::Duration;

use quay_schema::{Bindings, Unless};
use regex::RegexBuilder;
use tracing::debug;

use crate::exec;
use crate::host::HostContext;

/// Parse a `/pattern/flags` regex literal. Anything not in literal form
/// yields no extraction at all.
fn parse_select(text: &str) -> Option<regex::Regex> {
    let rest = text.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let (pattern, flags) = rest.split_at(close);
    let flags = &flags[1..];
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            _ => return None,
        };
    }
    builder.build().ok()
}

/// Form the candidate list: every `from` root (host variables expanded)
/// crossed with every `where` name, normalized to forward slashes, in
/// declaration order.
fn candidates(unless: &Unless, host: &HostContext) -> Vec<String> {
    let mut list = Vec::with_capacity(unless.from.len() * unless.where_.len());
    for root in &unless.from {
        let root = host.expand(root).replace('\\', "/");
        let root = root.trim_end_matches('/');
        for name in &unless.where_ {
            list.push(format!("{root}/{}", name.replace('\\', "/")));
        }
    }
    list
}

/// Probe for an alternative fulfillment.
///
/// Returns the captured bindings of the first candidate that passes every
/// declared check, or `None` when no candidate does (including when `from`
/// or `where` is empty). Candidates are checked one at a time; a declared
/// `timeout` bounds each `run` command.
pub async fn probe(
    unless: &Unless,
    host: &HostContext,
    timeout: Option<Duration>,
) -> Option<Bindings> {
    if unless.from.is_empty() || unless.where_.is_empty() {
        return None;
    }

    for candidate in candidates(unless, host) {
        if tokio::fs::metadata(&candidate).await.is_err() {
            continue;
        }

        let mut bindings = Bindings::new();
        bindings.set(0, candidate.as_str());

        if let Some(run) = &unless.run {
            let command = bindings.substitute(run);
            let output = match exec::run_shell(&command, None, None, timeout).await {
                Ok(output) => output,
                Err(err) => {
                    debug!("probe command failed to run for {candidate}: {err}");
                    continue;
                }
            };
            if !output.success() {
                debug!("probe command exited {:?} for {candidate}", output.code);
                continue;
            }
            if let Some(regex) = unless.select.as_deref().and_then(parse_select) {
                if let Some(captures) = regex.captures(&output.log()) {
                    for index in 0..10 {
                        if let Some(group) = captures.get(index) {
                            bindings.set(index, group.as_str());
                        }
                    }
                }
            }
        }

        if let Some(condition) = &unless.matches {
            if !condition.evaluate(&bindings) {
                debug!("probe condition rejected {candidate}");
                continue;
            }
        }

        debug!("probe matched {candidate}");
        return Some(bindings);
    }
    None
}
