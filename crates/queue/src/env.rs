// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the queue crate.

use std::path::{Path, PathBuf};

pub const SYSTEM_TOP_DIR: &str = "/var/lib/dci-queue";

/// Resolve the top directory: DCI_QUEUE_DIR > system dir (when writable) >
/// ~/.dci-queue.
pub fn default_top_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DCI_QUEUE_DIR") {
        return PathBuf::from(dir);
    }
    let system = PathBuf::from(SYSTEM_TOP_DIR);
    if is_writable(&system) {
        return system;
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dci-queue")
}

/// Log level override, used when --log-level is not given.
pub fn log_level() -> Option<String> {
    std::env::var("DCI_QUEUE_LOG_LEVEL").ok()
}

/// Console output override, used when --console-output is not given.
pub fn console_output() -> bool {
    std::env::var_os("DCI_QUEUE_CONSOLE_OUTPUT").is_some()
}

fn is_writable(path: &Path) -> bool {
    let Some(bytes) = path.to_str() else {
        return false;
    };
    let Ok(cpath) = std::ffi::CString::new(bytes) else {
        return false;
    };
    // access(2): the directory must already exist and be writable by us.
    unsafe { libc::access(cpath.as_ptr(), libc::W_OK) == 0 }
}
