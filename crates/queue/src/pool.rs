// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk pool layout.
//!
//! ```text
//! <top>/pool/<pool>/<resource>         backing file
//! <top>/available/<pool>/<resource>    symlink iff no running command holds it
//! <top>/queue/<pool>/{.seq,.seq.lck,<id>,<id>.exec}
//! <top>/reason/<pool>/<resource>       JSON blob while blocked
//! <top>/log/<pool>/<id>                child stdout+stderr
//! ```
//!
//! Booking a resource is the unlink of its availability symlink; freeing is
//! the re-creation of that symlink. Both are single atomic filesystem calls,
//! which is the whole concurrency story between schedulers sharing a pool.

use crate::record::{CmdRecord, RecordError, EXEC_EXT};
use crate::seq::{Seq, SeqError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SUBDIRS: [&str; 5] = ["pool", "available", "queue", "reason", "log"];

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool {0} does not exist")]
    UnknownPool(String),
    #[error("resource {resource} does not exist in pool {pool}")]
    UnknownResource { pool: String, resource: String },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Seq(#[from] SeqError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PoolError + '_ {
    move |source| PoolError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Why a resource is currently out of circulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reason {
    pub reason: String,
    pub pool: String,
    pub resource: String,
    pub date: String,
}

/// Accessor for every pool under one top directory.
#[derive(Debug, Clone)]
pub struct PoolStore {
    top: PathBuf,
}

impl PoolStore {
    pub fn new(top: impl Into<PathBuf>) -> Self {
        Self { top: top.into() }
    }

    pub fn top_dir(&self) -> &Path {
        &self.top
    }

    pub fn pool_dir(&self, pool: &str) -> PathBuf {
        self.top.join("pool").join(pool)
    }

    pub fn available_dir(&self, pool: &str) -> PathBuf {
        self.top.join("available").join(pool)
    }

    pub fn queue_dir(&self, pool: &str) -> PathBuf {
        self.top.join("queue").join(pool)
    }

    pub fn reason_dir(&self, pool: &str) -> PathBuf {
        self.top.join("reason").join(pool)
    }

    pub fn log_dir(&self, pool: &str) -> PathBuf {
        self.top.join("log").join(pool)
    }

    pub fn seq(&self, pool: &str) -> Seq {
        Seq::new(&self.queue_dir(pool))
    }

    /// Every operation except add-pool starts here.
    pub fn check_pool(&self, pool: &str) -> Result<(), PoolError> {
        if self.pool_dir(pool).is_dir() {
            Ok(())
        } else {
            Err(PoolError::UnknownPool(pool.to_string()))
        }
    }

    pub fn pools(&self) -> Vec<String> {
        list_names(&self.top.join("pool"))
    }

    /// Create the pool subtree and initialize the counter. Idempotent.
    pub fn add_pool(&self, pool: &str) -> Result<(), PoolError> {
        for key in SUBDIRS {
            let dir = self.top.join(key).join(pool);
            tracing::debug!(dir = %dir.display(), "creating pool directory");
            std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }
        let seq = self.seq(pool);
        let _guard = seq.lock()?;
        if !seq.exists() {
            seq.set(1, 1)?;
        }
        Ok(())
    }

    /// Remove the whole pool subtree.
    pub fn remove_pool(&self, pool: &str) -> Result<(), PoolError> {
        for key in SUBDIRS {
            let dir = self.top.join(key).join(pool);
            if dir.exists() {
                tracing::debug!(dir = %dir.display(), "removing pool directory");
                std::fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
            }
        }
        Ok(())
    }

    /// Create a resource. The availability link is only installed when no
    /// dispatched command still holds the resource, so re-adding a booked
    /// name cannot double-book it. Re-adding a blocked resource deletes its
    /// reason record.
    pub fn add_resource(&self, pool: &str, name: &str) -> Result<(), PoolError> {
        self.check_pool(pool)?;
        let backing = self.pool_dir(pool).join(name);
        if !backing.exists() {
            std::fs::write(&backing, "").map_err(io_err(&backing))?;
        }
        let reason = self.reason_dir(pool).join(name);
        if reason.exists() {
            std::fs::remove_file(&reason).map_err(io_err(&reason))?;
        }
        let link = self.available_dir(pool).join(name);
        if !link.exists() && !self.resource_in_use(pool, name)? {
            symlink(&backing, &link)?;
        }
        Ok(())
    }

    /// Remove a resource. Without `force` the resource moves to the blocked
    /// state and keeps a reason record; removing a resource that was never
    /// created fails. With `force` every trace goes away.
    pub fn remove_resource(
        &self,
        pool: &str,
        name: &str,
        reason: &str,
        force: bool,
    ) -> Result<(), PoolError> {
        self.check_pool(pool)?;
        let backing = self.pool_dir(pool).join(name);
        if !backing.exists() && !force {
            return Err(PoolError::UnknownResource {
                pool: pool.to_string(),
                resource: name.to_string(),
            });
        }
        for path in [self.available_dir(pool).join(name), backing] {
            if path.exists() || path.is_symlink() {
                tracing::debug!(path = %path.display(), reason, "removing resource entry");
                std::fs::remove_file(&path).map_err(io_err(&path))?;
            }
        }
        let reason_path = self.reason_dir(pool).join(name);
        if force {
            if reason_path.exists() {
                std::fs::remove_file(&reason_path).map_err(io_err(&reason_path))?;
            }
            return Ok(());
        }
        let record = Reason {
            reason: reason.to_string(),
            pool: pool.to_string(),
            resource: name.to_string(),
            date: chrono::Local::now().to_string(),
        };
        let content = serde_json::to_string(&record).map_err(|source| RecordError::Corrupt {
            path: reason_path.clone(),
            source,
        })?;
        std::fs::write(&reason_path, content).map_err(io_err(&reason_path))
    }

    pub fn resources(&self, pool: &str) -> Vec<String> {
        list_names(&self.pool_dir(pool))
    }

    pub fn available(&self, pool: &str) -> Vec<String> {
        let dir = self.available_dir(pool);
        let mut names: Vec<String> = list_names(&dir)
            .into_iter()
            .filter(|name| dir.join(name).is_symlink())
            .collect();
        names.sort();
        names
    }

    pub fn has_available(&self, pool: &str) -> bool {
        !self.available(pool).is_empty()
    }

    /// Book one resource: unlink the first availability symlink that still
    /// exists. Losing an unlink race just means another scheduler got it.
    pub fn book(&self, pool: &str) -> Option<String> {
        for name in self.available(pool) {
            let link = self.available_dir(pool).join(&name);
            match std::fs::remove_file(&link) {
                Ok(()) => {
                    tracing::debug!(pool, resource = %name, "booked resource");
                    return Some(name);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(pool, resource = %name, error = %e, "booking failed");
                    continue;
                }
            }
        }
        None
    }

    /// Free a booked resource. No symlink is recreated when the backing file
    /// was deleted during the run (schedule --remove-resource).
    pub fn free(&self, pool: &str, resource: &str) {
        let backing = self.pool_dir(pool).join(resource);
        if !backing.exists() {
            tracing::debug!(pool, resource, "backing file gone, not freeing");
            return;
        }
        let link = self.available_dir(pool).join(resource);
        if let Err(e) = symlink(&backing, &link) {
            tracing::warn!(pool, resource, error = %e, "freeing resource failed");
        } else {
            tracing::debug!(pool, resource, "freed resource");
        }
    }

    pub fn free_all(&self, booked: &[(String, String)]) {
        for (resource, pool) in booked {
            self.free(pool, resource);
        }
    }

    /// Blocked resources with their reasons.
    pub fn blocked(&self, pool: &str) -> Vec<Reason> {
        let dir = self.reason_dir(pool);
        let mut reasons = Vec::new();
        for name in list_names(&dir) {
            if let Ok(content) = std::fs::read_to_string(dir.join(&name)) {
                if let Ok(reason) = serde_json::from_str(&content) {
                    reasons.push(reason);
                }
            }
        }
        reasons.sort_by(|a: &Reason, b: &Reason| a.resource.cmp(&b.resource));
        reasons
    }

    /// All command records of a pool as (id, dispatched, record).
    pub fn records(&self, pool: &str) -> Result<Vec<(u64, bool, CmdRecord)>, PoolError> {
        let dir = self.queue_dir(pool);
        let mut records = Vec::new();
        for name in list_names(&dir) {
            let (id_text, dispatched) = match name
                .strip_suffix(EXEC_EXT)
                .and_then(|prefix| prefix.strip_suffix('.'))
            {
                Some(prefix) => (prefix, true),
                None => (name.as_str(), false),
            };
            let Ok(id) = id_text.parse::<u64>() else {
                continue; // .seq and .seq.lck
            };
            match CmdRecord::load(&dir.join(&name)) {
                Ok(record) => records.push((id, dispatched, record)),
                // Raced with a dispatch or a reclaim.
                Err(RecordError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        records.sort_by_key(|(id, _, _)| *id);
        Ok(records)
    }

    /// Whether a dispatched command anywhere still holds `name` of `pool`.
    fn resource_in_use(&self, pool: &str, name: &str) -> Result<bool, PoolError> {
        for record_pool in self.pools() {
            for (_, dispatched, record) in self.records(&record_pool)? {
                if dispatched && record.references_resource(&record_pool, pool, name) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn list_names(dir: &Path) -> Vec<String> {
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

fn symlink(target: &Path, link: &Path) -> Result<(), PoolError> {
    std::os::unix::fs::symlink(target, link).map_err(io_err(link))
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
