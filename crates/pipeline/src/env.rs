// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the pipeline crate.

use std::path::PathBuf;

/// Candidate bases for per-job data directories, most preferred first. The
/// executor uses the first writable one.
pub fn data_dir_bases() -> Vec<PathBuf> {
    let mut bases = Vec::new();
    if let Ok(dir) = std::env::var("DCI_PIPELINE_DATADIR") {
        bases.push(PathBuf::from(dir));
    }
    bases.push(PathBuf::from("/var/lib/dci-pipeline"));
    if let Some(home) = dirs::home_dir() {
        bases.push(home.join(".dci-pipeline"));
    }
    bases
}

/// Root of the framework checkout, used to locate the callback plugins of a
/// default ansible configuration.
pub fn ansible_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DCI_ANSIBLE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(topdir) = std::env::var("DCI_PIPELINE_TOPDIR") {
        return PathBuf::from(topdir).join("dci-ansible");
    }
    PathBuf::from("/usr/share/dci/ansible")
}

/// The external vault helper: ciphertext on stdin, plaintext on stdout.
pub fn vault_client() -> String {
    std::env::var("DCI_VAULT_CLIENT").unwrap_or_else(|_| "dci-vault-client".to_string())
}

pub fn log_level() -> Option<String> {
    std::env::var("DCI_PIPELINE_LOG_LEVEL").ok()
}

/// Playbook verbosity (number of `-v` flags).
pub fn verbose_level() -> u32 {
    std::env::var("DCI_PIPELINE_VERBOSE_LEVEL")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(2)
}

/// Set by the queue dispatcher; tagged onto every job of the run.
pub fn queue_jobid() -> Option<String> {
    std::env::var("DCI_QUEUE_JOBID").ok()
}
