// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command records, one JSON file per admitted command.
//!
//! A record is named after its sequence id while queued and renamed with the
//! `.exec` suffix when dispatched; the rename is the dispatch transition.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Suffix marking a dispatched record.
pub const EXEC_EXT: &str = "exec";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One admitted command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CmdRecord {
    /// Argv with `@RESOURCE` placeholders.
    pub cmd: Vec<String>,
    /// Working directory the command runs from.
    pub wd: PathBuf,
    #[serde(default)]
    pub priority: i64,
    /// Delete the primary backing file upon dispatch.
    #[serde(default)]
    pub remove: bool,
    /// Additional pools that must each contribute one resource.
    #[serde(default)]
    pub extra_pools: Vec<String>,
    /// Argv after `@RESOURCE` substitution (dispatched records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_cmd: Option<Vec<String>>,
    /// Primary booked resource (dispatched records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobid: Option<u64>,
    /// All booked (resource, pool) pairs, primary first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked: Option<Vec<(String, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl CmdRecord {
    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let content = std::fs::read_to_string(path).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| RecordError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), RecordError> {
        let content = serde_json::to_string(self).map_err(|source| RecordError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether this record pins `resource` in `pool`. `record_pool` is the
    /// pool whose queue directory the record lives in: the primary resource
    /// implicitly belongs to that pool.
    pub fn references_resource(&self, record_pool: &str, pool: &str, resource: &str) -> bool {
        if record_pool == pool && self.resource.as_deref() == Some(resource) {
            return true;
        }
        self.booked
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|(r, p)| r == resource && p == pool)
    }

    /// The command shown in listings: the substituted argv once dispatched.
    pub fn display_cmd(&self) -> &[String] {
        self.real_cmd.as_deref().unwrap_or(&self.cmd)
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
