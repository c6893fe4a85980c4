//! Test helpers for the dci-queue behavioral specifications.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch top directory plus a working directory for scheduled commands.
pub struct QueueHost {
    top: TempDir,
    wd: TempDir,
}

/// Captured run of the binary, with chainable assertions.
pub struct Spawned {
    output: std::process::Output,
}

impl Spawned {
    pub fn code(&self) -> i32 {
        self.output.status.code().unwrap_or(-1)
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    pub fn passes(self) -> Self {
        assert_eq!(self.code(), 0, "expected success, stderr: {}", self.stderr());
        self
    }

    pub fn fails_with(self, code: i32) -> Self {
        assert_eq!(
            self.code(),
            code,
            "expected exit {code}, stdout: {} stderr: {}",
            self.stdout(),
            self.stderr()
        );
        self
    }

    pub fn stdout_has(self, needle: &str) -> Self {
        assert!(
            self.stdout().contains(needle),
            "stdout missing {needle:?}:\n{}",
            self.stdout()
        );
        self
    }

    pub fn stdout_lacks(self, needle: &str) -> Self {
        assert!(
            !self.stdout().contains(needle),
            "stdout unexpectedly has {needle:?}:\n{}",
            self.stdout()
        );
        self
    }

    pub fn stderr_has(self, needle: &str) -> Self {
        assert!(
            self.stderr().contains(needle),
            "stderr missing {needle:?}:\n{}",
            self.stderr()
        );
        self
    }
}

impl QueueHost {
    pub fn new() -> Self {
        Self {
            top: TempDir::new().unwrap(),
            wd: TempDir::new().unwrap(),
        }
    }

    pub fn top(&self) -> &Path {
        self.top.path()
    }

    pub fn wd(&self) -> &Path {
        self.wd.path()
    }

    /// Run dci-queue against this host's top directory. Logs go to the
    /// console and the working directory is stable so deduplication is
    /// deterministic.
    pub fn queue(&self, args: &[&str]) -> Spawned {
        let mut cmd = Command::cargo_bin("dci-queue").unwrap();
        let output = cmd
            .arg("--top-dir")
            .arg(self.top.path())
            .arg("--console-output")
            .args(args)
            .current_dir(self.wd.path())
            .env_remove("DCI_QUEUE_DIR")
            .env_remove("DCI_QUEUE_LOG_LEVEL")
            .env_remove("DCI_QUEUE_CONSOLE_OUTPUT")
            .output()
            .unwrap();
        Spawned { output }
    }

    /// Create a pool without installing the crontab trigger.
    pub fn add_pool(&self, pool: &str) {
        self.queue(&["add-pool", "-n", pool]).passes();
    }

    pub fn add_resource(&self, pool: &str, name: &str) {
        self.queue(&["add-resource", pool, name]).passes();
    }

    pub fn schedule(&self, pool: &str, cmd: &[&str]) {
        let mut args = vec!["schedule", pool];
        args.extend(cmd);
        self.queue(&args).passes();
    }

    pub fn run(&self, pool: &str) {
        self.queue(&["run", pool]).passes();
    }

    pub fn pool_dir(&self, pool: &str) -> PathBuf {
        self.top.path().join("pool").join(pool)
    }

    pub fn available_dir(&self, pool: &str) -> PathBuf {
        self.top.path().join("available").join(pool)
    }

    pub fn queue_dir(&self, pool: &str) -> PathBuf {
        self.top.path().join("queue").join(pool)
    }

    pub fn log_dir(&self, pool: &str) -> PathBuf {
        self.top.path().join("log").join(pool)
    }

    pub fn available(&self, pool: &str) -> Vec<String> {
        list_names(&self.available_dir(pool))
    }

    /// Queue entries without the counter files.
    pub fn queue_entries(&self, pool: &str) -> Vec<String> {
        list_names(&self.queue_dir(pool))
            .into_iter()
            .filter(|name| !name.starts_with(".seq"))
            .collect()
    }

    pub fn counter(&self, pool: &str) -> (u64, u64) {
        let content = std::fs::read_to_string(self.queue_dir(pool).join(".seq")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        (
            value["first"].as_u64().unwrap(),
            value["next"].as_u64().unwrap(),
        )
    }
}

pub fn list_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}
