// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequence counter with advisory locking.
//!
//! Each pool's queue directory holds a `.seq` file with the pair
//! `(first, next)`: `next` is the id handed to the next admitted command,
//! `first` the lowest id not yet dispatched. A companion `.seq.lck` file
//! carries a whole-file POSIX advisory lock held across every
//! read-modify-write of the pair.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SEQ_FILE: &str = ".seq";
const LOCK_FILE: &str = ".seq.lck";
const LOCK_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SeqError {
    #[error("sequence file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt sequence file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    first: u64,
    next: u64,
}

/// Handle on one pool's sequence counter.
#[derive(Debug, Clone)]
pub struct Seq {
    dir: PathBuf,
}

/// Holds the advisory lock; released on drop.
#[derive(Debug)]
pub struct SeqGuard {
    file: File,
}

impl Drop for SeqGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl Seq {
    /// Bind to the queue directory of a pool.
    pub fn new(queue_dir: &Path) -> Self {
        Self {
            dir: queue_dir.to_path_buf(),
        }
    }

    fn seq_path(&self) -> PathBuf {
        self.dir.join(SEQ_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Acquire the counter lock, sleeping one second between attempts while
    /// another scheduler holds it.
    pub fn lock(&self) -> Result<SeqGuard, SeqError> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| SeqError::Io {
                path: path.clone(),
                source,
            })?;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(SeqGuard { file }),
                Err(_) => {
                    tracing::debug!(path = %path.display(), "sequence lock busy, retrying");
                    std::thread::sleep(LOCK_RETRY);
                }
            }
        }
    }

    pub fn exists(&self) -> bool {
        self.seq_path().exists()
    }

    /// Read the `(first, next)` pair. Call with the lock held.
    pub fn get(&self) -> Result<(u64, u64), SeqError> {
        let path = self.seq_path();
        let content = std::fs::read_to_string(&path).map_err(|source| SeqError::Io {
            path: path.clone(),
            source,
        })?;
        let counter: Counter =
            serde_json::from_str(&content).map_err(|source| SeqError::Corrupt { path, source })?;
        Ok((counter.first, counter.next))
    }

    /// Write the `(first, next)` pair. Call with the lock held.
    pub fn set(&self, first: u64, next: u64) -> Result<(), SeqError> {
        let path = self.seq_path();
        let content = serde_json::to_string(&Counter { first, next }).map_err(|source| {
            SeqError::Corrupt {
                path: path.clone(),
                source,
            }
        })?;
        std::fs::write(&path, content).map_err(|source| SeqError::Io { path, source })
    }
}

#[cfg(test)]
#[path = "seq_tests.rs"]
mod tests;
