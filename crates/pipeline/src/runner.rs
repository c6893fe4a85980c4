// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Playbook execution.
//!
//! The playbook runner is an external collaborator: a child process that
//! reads environment variables and a private data directory, writes a log
//! file, and comes back with an exit code and a statistics recap. The
//! [`PlaybookRunner`] trait is the seam; [`AnsiblePlaybook`] drives the real
//! `ansible-playbook` binary and polls the cancel token so a termination
//! signal reaches the child promptly.

use async_trait::async_trait;
use dci_core::{CancelToken, PlayStats};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Name of the log file inside the private data directory; uploaded to the
/// remote job after each run.
pub const LOG_FILE: &str = "ansible.log";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unable to run {playbook}: {source}")]
    Spawn {
        playbook: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One composed playbook invocation.
#[derive(Debug, Clone, Default)]
pub struct PlaybookRun {
    pub playbook: PathBuf,
    pub inventory: Option<PathBuf>,
    /// ansible.cfg inside the data dir (copied or generated).
    pub cfg: Option<PathBuf>,
    /// Private per-job directory; also receives the log file.
    pub data_dir: PathBuf,
    pub tags: Vec<String>,
    pub skip_tags: Vec<String>,
    /// Extra variables serialized as one JSON `-e` argument.
    pub extravars: serde_json::Value,
    pub extravars_files: Vec<PathBuf>,
    pub env: Vec<(String, String)>,
    pub verbosity: u32,
}

impl PlaybookRun {
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    /// The composed `ansible-playbook` argv.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec!["ansible-playbook".to_string()];
        if self.verbosity > 0 {
            argv.push(format!("-{}", "v".repeat(self.verbosity as usize)));
        }
        if let Some(inventory) = &self.inventory {
            argv.push("-i".to_string());
            argv.push(inventory.display().to_string());
        }
        if !self.tags.is_empty() {
            argv.push("--tags".to_string());
            argv.push(self.tags.join(","));
        }
        if !self.skip_tags.is_empty() {
            argv.push("--skip-tags".to_string());
            argv.push(self.skip_tags.join(","));
        }
        if self.extravars.as_object().is_some_and(|map| !map.is_empty()) {
            argv.push("-e".to_string());
            argv.push(self.extravars.to_string());
        }
        for file in &self.extravars_files {
            argv.push("-e".to_string());
            argv.push(format!("@{}", file.display()));
        }
        argv.push(self.playbook.display().to_string());
        argv
    }
}

/// Result of a playbook child.
#[derive(Debug, Clone, Default)]
pub struct PlaybookOutcome {
    pub rc: i32,
    /// Per-host recap; empty when the run produced no recap at all.
    pub stats: IndexMap<String, PlayStats>,
}

impl PlaybookOutcome {
    /// An all-green single-host outcome.
    pub fn success() -> Self {
        let mut stats = IndexMap::new();
        stats.insert(
            "localhost".to_string(),
            PlayStats {
                ok: 1,
                ..PlayStats::default()
            },
        );
        Self { rc: 0, stats }
    }

    /// A failed run that still produced a recap.
    pub fn failure(rc: i32) -> Self {
        let mut stats = IndexMap::new();
        stats.insert(
            "localhost".to_string(),
            PlayStats {
                ok: 1,
                failed: 1,
                ..PlayStats::default()
            },
        );
        Self { rc, stats }
    }
}

#[async_trait]
pub trait PlaybookRunner: Send + Sync {
    async fn run(
        &self,
        run: &PlaybookRun,
        cancel: &CancelToken,
    ) -> Result<PlaybookOutcome, RunnerError>;
}

/// Real runner invoking `ansible-playbook`.
#[derive(Debug, Default)]
pub struct AnsiblePlaybook;

#[async_trait]
impl PlaybookRunner for AnsiblePlaybook {
    async fn run(
        &self,
        run: &PlaybookRun,
        cancel: &CancelToken,
    ) -> Result<PlaybookOutcome, RunnerError> {
        let argv = run.argv();
        let log_path = run.log_path();
        tracing::info!(cmd = ?argv, data_dir = %run.data_dir.display(), "running playbook");

        let log = std::fs::File::create(&log_path).map_err(|source| RunnerError::Io {
            path: log_path.clone(),
            source,
        })?;
        let log_clone = log.try_clone().map_err(|source| RunnerError::Io {
            path: log_path.clone(),
            source,
        })?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&run.data_dir)
            .env("ANSIBLE_LOG_PATH", &log_path)
            .stdout(Stdio::from(log_clone))
            .stderr(Stdio::from(log));
        if let Some(cfg) = &run.cfg {
            command.env("ANSIBLE_CONFIG", cfg);
        }
        for (key, value) in &run.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            playbook: run.playbook.clone(),
            source,
        })?;

        // Poll the cancel token while waiting so a termination signal turns
        // into a prompt SIGTERM on the child.
        let mut term_sent = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|source| RunnerError::Spawn {
                        playbook: run.playbook.clone(),
                        source,
                    })?;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if cancel.cancelled() && !term_sent {
                        if let Some(pid) = child.id() {
                            tracing::info!(pid, "cancellation requested, terminating playbook");
                            unsafe {
                                libc::kill(pid as libc::pid_t, libc::SIGTERM);
                            }
                        }
                        term_sent = true;
                    }
                }
            }
        };

        let rc = exit_code(status);
        let content = std::fs::read_to_string(&log_path).unwrap_or_default();
        let stats = parse_recap(&content);
        tracing::info!(rc, hosts = stats.len(), "playbook finished");
        Ok(PlaybookOutcome { rc, stats })
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// Parse the `PLAY RECAP` section of a playbook log into per-host counters.
pub fn parse_recap(log: &str) -> IndexMap<String, PlayStats> {
    let mut stats = IndexMap::new();
    let mut in_recap = false;
    for line in log.lines() {
        if line.contains("PLAY RECAP") {
            in_recap = true;
            continue;
        }
        if !in_recap {
            continue;
        }
        let Some((host, counters)) = line.split_once(':') else {
            continue;
        };
        if !counters.contains("ok=") {
            continue;
        }
        let mut entry = PlayStats::default();
        for counter in counters.split_whitespace() {
            let Some((key, value)) = counter.split_once('=') else {
                continue;
            };
            let Ok(value) = value.parse::<u32>() else {
                continue;
            };
            match key {
                "ok" => entry.ok = value,
                "changed" => entry.changed = value,
                "unreachable" => entry.unreachable = value,
                "failed" => entry.failed = value,
                "skipped" => entry.skipped = value,
                "rescued" => entry.rescued = value,
                "ignored" => entry.ignored = value,
                _ => {}
            }
        }
        stats.insert(host.trim().to_string(), entry);
    }
    stats
}

/// Scripted runner for tests: outcomes are served in push order and every
/// composed invocation is recorded. An optional hook stands in for the
/// side effects of a real playbook (jobstates posted by the callback
/// plugin, output files written on disk).
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct FakePlaybook {
    outcomes: std::sync::Mutex<std::collections::VecDeque<PlaybookOutcome>>,
    runs: std::sync::Mutex<Vec<PlaybookRun>>,
    #[allow(clippy::type_complexity)]
    on_run: std::sync::Mutex<Option<Box<dyn Fn(&PlaybookRun) + Send + Sync>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakePlaybook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: PlaybookOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Invoked with every composed run, before the outcome is served.
    pub fn set_hook(&self, hook: impl Fn(&PlaybookRun) + Send + Sync + 'static) {
        *self
            .on_run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn runs(&self) -> Vec<PlaybookRun> {
        self.runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl PlaybookRunner for FakePlaybook {
    async fn run(
        &self,
        run: &PlaybookRun,
        _cancel: &CancelToken,
    ) -> Result<PlaybookOutcome, RunnerError> {
        self.runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(run.clone());
        if let Some(hook) = self
            .on_run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            hook(run);
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(PlaybookOutcome::success);
        Ok(outcome)
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
