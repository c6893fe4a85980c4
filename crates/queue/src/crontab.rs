// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic-trigger installation.
//!
//! The dispatcher only runs when something invokes it; the standard setup is
//! a pair of crontab lines running `run` every minute and `clean` hourly.
//! `install`/`uninstall` drive `crontab -e` with this binary as the editor;
//! inside a container (`--podman`) the lines are printed for the operator
//! instead.

use crate::sched::QueueError;
use std::path::Path;

/// The crontab lines managed for a pool.
pub fn cron_lines(pool: &str, podman: bool) -> [String; 2] {
    let suffix = if podman { "-podman" } else { "" };
    [
        format!("* * * * * dci-queue{suffix} run {pool}"),
        format!("0 * * * * dci-queue{suffix} clean {pool}"),
    ]
}

/// Append the managed lines to a crontab file, skipping ones already there.
/// This is the EDITOR side of `crontab -e`.
pub fn add_crontab(pool: &str, podman: bool, file: &Path) -> Result<(), QueueError> {
    let io = |source| QueueError::Io {
        path: file.to_path_buf(),
        source,
    };
    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io(e)),
    };
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    for managed in cron_lines(pool, podman) {
        if !lines.iter().any(|line| *line == managed) {
            tracing::info!(line = %managed, "adding crontab line");
            lines.push(managed);
        }
    }
    std::fs::write(file, lines.join("\n") + "\n").map_err(io)
}

/// Strip the managed lines from a crontab file.
pub fn remove_crontab(pool: &str, podman: bool, file: &Path) -> Result<(), QueueError> {
    let io = |source| QueueError::Io {
        path: file.to_path_buf(),
        source,
    };
    let content = std::fs::read_to_string(file).map_err(io)?;
    let managed = cron_lines(pool, podman);
    let lines: Vec<&str> = content
        .lines()
        .filter(|line| !managed.iter().any(|m| m == line))
        .collect();
    std::fs::write(file, lines.join("\n") + "\n").map_err(io)
}

#[cfg(test)]
#[path = "crontab_tests.rs"]
mod tests;
