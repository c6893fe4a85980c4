// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission and dispatch of queued commands.
//!
//! Dispatch picks the highest-priority queued record whose extra pools all
//! have at least one free resource, books the primary resource (an atomic
//! unlink), consumes the record (an atomic rename to `<id>.exec`), books the
//! extras, spawns the child, and keeps looping. Children are awaited at the
//! end of the pass; each exit frees its booked resources and deletes the
//! dispatched record.

use crate::pool::{PoolError, PoolStore};
use crate::record::{CmdRecord, RecordError, EXEC_EXT};
use crate::seq::SeqError;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

/// The placeholder substituted with the booked primary resource.
pub const RESOURCE_PLACEHOLDER: &str = "@RESOURCE";

/// How long unschedule waits for a killed child to exit.
const KILL_WAIT: Duration = Duration::from_secs(300);

/// Poll interval of block-mode schedule.
const BLOCK_POLL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Seq(#[from] SeqError),
    #[error("no @RESOURCE in command: {0}")]
    MissingPlaceholder(String),
    #[error("unable to stop command {0}: no recorded pid")]
    CannotStop(u64),
    #[error("unable to finish command {0}")]
    KillTimeout(u64),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> QueueError + '_ {
    move |source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleOpts {
    /// Run the queue until this command completes and report its exit code.
    pub block: bool,
    /// Skip the duplicate-command check.
    pub force: bool,
    /// Delete the primary backing file upon dispatch.
    pub remove: bool,
    pub priority: i64,
    pub extra_pools: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Queued(u64),
    /// An identical command (same argv and working directory) is already
    /// queued or running.
    Duplicate,
    /// Block mode only: the command ran to completion.
    Completed { id: u64, code: i32 },
}

/// One child spawned during a dispatch pass.
struct Spawned {
    id: u64,
    exec_path: PathBuf,
    booked: Vec<(String, String)>,
    child: Child,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    store: PoolStore,
    /// Attach children to the console instead of per-id log files.
    console: bool,
}

impl Scheduler {
    pub fn new(store: PoolStore, console: bool) -> Self {
        Self { store, console }
    }

    pub fn store(&self) -> &PoolStore {
        &self.store
    }

    /// Admit a command into a pool.
    pub async fn schedule(
        &self,
        pool: &str,
        cmd: &[String],
        wd: &Path,
        opts: &ScheduleOpts,
    ) -> Result<ScheduleOutcome, QueueError> {
        self.store.check_pool(pool)?;
        if !cmd.iter().any(|c| c.contains(RESOURCE_PLACEHOLDER)) {
            return Err(QueueError::MissingPlaceholder(cmd.join(" ")));
        }
        for extra in &opts.extra_pools {
            self.store.check_pool(extra)?;
        }

        let seq = self.store.seq(pool);
        let id;
        {
            let _guard = seq.lock()?;
            let (first, next) = seq.get()?;

            if !opts.force {
                let duplicate = self
                    .store
                    .records(pool)?
                    .into_iter()
                    .any(|(_, _, record)| record.cmd == cmd && record.wd == wd);
                if duplicate {
                    tracing::info!(pool, "not scheduling a duplicated command");
                    return Ok(ScheduleOutcome::Duplicate);
                }
            }

            id = next;
            let record = CmdRecord {
                cmd: cmd.to_vec(),
                wd: wd.to_path_buf(),
                priority: opts.priority,
                remove: opts.remove,
                extra_pools: opts.extra_pools.clone(),
                ..CmdRecord::default()
            };
            record.save(&self.store.queue_dir(pool).join(id.to_string()))?;
            seq.set(first, next + 1)?;
            tracing::info!(pool, id, cmd = ?cmd, wd = %wd.display(), "command queued");
        }

        if !opts.block {
            return Ok(ScheduleOutcome::Queued(id));
        }

        let queuefile = self.store.queue_dir(pool).join(id.to_string());
        loop {
            let codes = self.run_pool(pool).await?;
            if queuefile.exists() {
                tracing::debug!(pool, id, "command not executed yet, sleeping");
                tokio::time::sleep(BLOCK_POLL).await;
                continue;
            }
            let code = match codes.get(&id) {
                Some(code) => *code,
                None => {
                    // Another scheduler ran it; its exit code is lost to us.
                    tracing::warn!(pool, id, "command completed in another scheduler");
                    0
                }
            };
            return Ok(ScheduleOutcome::Completed { id, code });
        }
    }

    /// Dispatch queued commands until the pool runs dry, then await every
    /// child. Returns exit codes by command id.
    pub async fn run_pool(&self, pool: &str) -> Result<HashMap<u64, i32>, QueueError> {
        self.store.check_pool(pool)?;

        let mut skipped: HashSet<u64> = HashSet::new();
        let mut running: Vec<Spawned> = Vec::new();

        loop {
            let Some((id, record)) = self.peek(pool, &skipped)? else {
                tracing::debug!(pool, "no command to run");
                break;
            };

            // Check extra availability before booking anything, so a command
            // that cannot fully book does not consume the primary resource.
            if !record
                .extra_pools
                .iter()
                .all(|extra| self.store.has_available(extra))
            {
                tracing::debug!(pool, id, "skipping: extra pool has no free resource");
                skipped.insert(id);
                continue;
            }

            let Some(primary) = self.store.book(pool) else {
                tracing::debug!(pool, "no available resource");
                break;
            };
            let mut booked = vec![(primary.clone(), pool.to_string())];

            let Some(exec_path) = self.consume(pool, id)? else {
                // Another scheduler took the record between peek and rename.
                self.store.free_all(&booked);
                continue;
            };

            let mut extras_ok = true;
            for extra in &record.extra_pools {
                match self.store.book(extra) {
                    Some(resource) => booked.push((resource, extra.clone())),
                    None => {
                        tracing::debug!(pool, id, extra = %extra, "extra booking failed");
                        self.store.free_all(&booked);
                        std::fs::remove_file(&exec_path).map_err(io_err(&exec_path))?;
                        extras_ok = false;
                        break;
                    }
                }
            }
            if !extras_ok {
                continue;
            }

            if record.remove {
                let backing = self.store.pool_dir(pool).join(&primary);
                tracing::info!(pool, resource = %primary, "removing resource");
                if backing.exists() {
                    std::fs::remove_file(&backing).map_err(io_err(&backing))?;
                }
            }

            let mut record = record;
            record.real_cmd = Some(
                record
                    .cmd
                    .iter()
                    .map(|c| c.replace(RESOURCE_PLACEHOLDER, &primary))
                    .collect(),
            );
            record.resource = Some(primary.clone());
            record.jobid = Some(id);
            record.booked = Some(booked.clone());
            record.save(&exec_path)?;

            match self.spawn(pool, id, &record).await {
                Ok(child) => {
                    record.pid = child.id();
                    record.save(&exec_path)?;
                    running.push(Spawned {
                        id,
                        exec_path,
                        booked,
                        child,
                    });
                }
                Err(e) => {
                    tracing::error!(pool, id, error = %e, "unable to execute command");
                    self.store.free_all(&booked);
                    let _ = std::fs::remove_file(&exec_path);
                }
            }
        }

        let mut codes = HashMap::new();
        if running.is_empty() {
            return Ok(codes);
        }
        tracing::info!(pool, children = running.len(), "waiting for commands");

        let mut waits = Vec::new();
        for spawned in running {
            let store = self.store.clone();
            let pool = pool.to_string();
            waits.push(tokio::spawn(async move {
                let Spawned {
                    id,
                    exec_path,
                    booked,
                    mut child,
                } = spawned;
                let code = match child.wait().await {
                    Ok(status) => exit_code(status),
                    Err(e) => {
                        tracing::error!(pool = %pool, id, error = %e, "wait failed");
                        -1
                    }
                };
                tracing::info!(pool = %pool, id, code, "command returned");
                let _ = std::fs::remove_file(&exec_path);
                store.free_all(&booked);
                (id, code)
            }));
        }
        for handle in waits {
            if let Ok((id, code)) = handle.await {
                codes.insert(id, code);
            }
        }
        Ok(codes)
    }

    /// Drop a command: delete it while queued, or kill its child and wait
    /// for the dispatcher to reclaim it.
    pub async fn unschedule(&self, pool: &str, id: u64) -> Result<(), QueueError> {
        self.store.check_pool(pool)?;
        let queued = self.store.queue_dir(pool).join(id.to_string());
        tracing::info!(pool, id, "un-queuing command");
        match std::fs::remove_file(&queued) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(QueueError::Io {
                    path: queued,
                    source,
                })
            }
        }

        let exec_path = self.store.queue_dir(pool).join(format!("{id}.{EXEC_EXT}"));
        if !exec_path.exists() {
            tracing::info!(pool, id, "no record to un-queue");
            return Ok(());
        }
        let record = CmdRecord::load(&exec_path)?;
        let Some(pid) = record.pid else {
            return Err(QueueError::CannotStop(id));
        };

        tracing::info!(pool, id, pid, "killing command");
        // Advisory: the child may already be gone.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        let deadline = std::time::Instant::now() + KILL_WAIT;
        while std::time::Instant::now() < deadline {
            if !process_alive(pid) {
                tracing::info!(pool, id, pid, "process finished");
                let _ = std::fs::remove_file(&exec_path);
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(QueueError::KillTimeout(id))
    }

    /// Reclaim dispatched records whose process is gone, e.g. after a crash
    /// of the dispatcher between booking and wait.
    pub fn clean(&self, pool: &str) -> Result<(), QueueError> {
        self.store.check_pool(pool)?;
        for (id, dispatched, record) in self.store.records(pool)? {
            if !dispatched {
                continue;
            }
            let (Some(pid), Some(resource)) = (record.pid, record.resource.as_deref()) else {
                continue;
            };
            if process_alive(pid) {
                continue;
            }
            tracing::info!(pool, id, pid, resource, "reclaiming stale command");
            let exec_path = self.store.queue_dir(pool).join(format!("{id}.{EXEC_EXT}"));
            std::fs::remove_file(&exec_path).map_err(io_err(&exec_path))?;
            match record.booked.as_deref() {
                Some(booked) => self.store.free_all(booked),
                None => self.store.free(pool, resource),
            }
        }
        Ok(())
    }

    /// Highest-priority queued record not in `skipped`; ties go to the lowest
    /// id. The record is not consumed.
    fn peek(
        &self,
        pool: &str,
        skipped: &HashSet<u64>,
    ) -> Result<Option<(u64, CmdRecord)>, QueueError> {
        let seq = self.store.seq(pool);
        let _guard = seq.lock()?;
        let (first, next) = seq.get()?;

        let mut best: Option<(u64, CmdRecord)> = None;
        for id in first..next {
            if skipped.contains(&id) {
                continue;
            }
            let path = self.store.queue_dir(pool).join(id.to_string());
            let record = match CmdRecord::load(&path) {
                Ok(record) => record,
                Err(RecordError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            };
            if best
                .as_ref()
                .is_none_or(|(_, top)| record.priority > top.priority)
            {
                best = Some((id, record));
            }
        }
        Ok(best)
    }

    /// Dispatch transition: rename `<id>` to `<id>.exec`, advancing `first`
    /// when the oldest record itself dispatches. Returns `None` when another
    /// scheduler won the rename.
    fn consume(&self, pool: &str, id: u64) -> Result<Option<PathBuf>, QueueError> {
        let seq = self.store.seq(pool);
        let _guard = seq.lock()?;
        let (first, next) = seq.get()?;

        let path = self.store.queue_dir(pool).join(id.to_string());
        let exec_path = self.store.queue_dir(pool).join(format!("{id}.{EXEC_EXT}"));
        match std::fs::rename(&path, &exec_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(QueueError::Io { path, source }),
        }
        if id == first {
            seq.set(id + 1, next)?;
        }
        Ok(Some(exec_path))
    }

    async fn spawn(&self, pool: &str, id: u64, record: &CmdRecord) -> std::io::Result<Child> {
        let real_cmd = record.real_cmd.as_deref().unwrap_or(&record.cmd);
        let resource = record.resource.as_deref().unwrap_or_default();
        let booked = record.booked.as_deref().unwrap_or_default();
        tracing::info!(pool, id, cmd = ?real_cmd, wd = %record.wd.display(), "running command");

        let (program, args) = real_cmd
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"))?;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&record.wd)
            .env("DCI_QUEUE", pool)
            .env("DCI_QUEUE_RES", resource)
            .env("DCI_QUEUE_ID", id.to_string())
            .env("DCI_QUEUE_JOBID", format!("{pool}.{id}"));
        // Extra booked pairs, indexed from 1.
        for (n, (res, extra_pool)) in booked.iter().skip(1).enumerate() {
            command.env(format!("DCI_QUEUE{}", n + 1), extra_pool);
            command.env(format!("DCI_QUEUE_RES{}", n + 1), res);
        }

        if self.console {
            return command.spawn();
        }

        let log_path = self.store.log_dir(pool).join(id.to_string());
        let mut log = std::fs::File::create(&log_path)?;
        writeln!(log, "+ DCI_QUEUE={pool}")?;
        writeln!(log, "+ DCI_QUEUE_RES={resource}")?;
        writeln!(log, "+ DCI_QUEUE_ID={id}")?;
        writeln!(log, "+ DCI_QUEUE_JOBID={pool}.{id}")?;
        for (n, (res, extra_pool)) in booked.iter().skip(1).enumerate() {
            writeln!(log, "+ DCI_QUEUE{}={extra_pool}", n + 1)?;
            writeln!(log, "+ DCI_QUEUE_RES{}={res}", n + 1)?;
        }
        writeln!(log, "+ cd {}", record.wd.display())?;
        writeln!(log, "+ {}", real_cmd.join(" "))?;
        log.flush()?;
        command
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        command.spawn()
    }
}

/// Translate a child's wait status: exit code, or 128+N when killed by
/// signal N.
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// kill(pid, 0): ESRCH means gone, anything else means some process with
/// that pid still exists.
fn process_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(test)]
#[path = "sched_tests.rs"]
mod tests;
