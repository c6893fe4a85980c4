// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cooperative cancellation and process exit-code mapping.
//!
//! A single [`CancelFlag`] per process records the number of the first
//! termination signal received (TERM or INT). Components that spawn or wait
//! on children hold a [`CancelToken`] and poll it before and after blocking,
//! so tests can drive cancellation without touching the signal layer.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Records the first termination signal delivered to the process.
///
/// Zero means "no signal yet"; later signals are ignored so the exit code
/// reflects the signal that actually interrupted the run.
#[derive(Debug, Default)]
pub struct CancelFlag {
    signo: AtomicI32,
}

impl CancelFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a termination signal. Only the first one is kept.
    pub fn record(&self, signo: i32) {
        let _ = self
            .signo
            .compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// The first recorded signal, if any.
    pub fn signal(&self) -> Option<i32> {
        match self.signo.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_some()
    }

    /// A clonable read capability on this flag.
    pub fn token(self: &Arc<Self>) -> CancelToken {
        CancelToken {
            flag: Arc::clone(self),
        }
    }
}

/// Read side of a [`CancelFlag`], passed to everything that may block.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<CancelFlag>,
}

impl CancelToken {
    /// A token that never reports cancellation (detached flag).
    pub fn never() -> Self {
        CancelFlag::new().token()
    }

    pub fn cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    pub fn signal(&self) -> Option<i32> {
        self.flag.signal()
    }
}

/// Final outcome of a pipeline run, in decreasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every job-def reached success.
    Success,
    /// At least one job-def failed in its stage.
    JobFailure,
    /// At least one job-def ended in an `error` terminal state.
    JobError,
    /// A termination signal interrupted the run.
    Cancelled(i32),
}

impl RunOutcome {
    /// 0 success, 1 generic failure, 2 error-terminal, 128+N on signal N.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::JobFailure => 1,
            RunOutcome::JobError => 2,
            RunOutcome::Cancelled(signo) => 128 + signo,
        }
    }

    /// Combine per-job-def outcomes: cancellation wins, then error, then
    /// failure.
    pub fn merge(self, other: RunOutcome) -> RunOutcome {
        use RunOutcome::*;
        match (self, other) {
            (Cancelled(n), _) | (_, Cancelled(n)) => Cancelled(n),
            (JobError, _) | (_, JobError) => JobError,
            (JobFailure, _) | (_, JobFailure) => JobFailure,
            _ => Success,
        }
    }
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
