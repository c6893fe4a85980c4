// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dci-core: shared types for the DCI pipeline engine and resource queue

pub mod cancel;
pub mod component;
pub mod jobdef;
pub mod merge;
pub mod remote;

pub use cancel::{CancelFlag, CancelToken, RunOutcome};
pub use component::{ComponentExpr, ComponentExprError};
pub use jobdef::{JobDef, JobDefError, JobInfo, PlayStats};
pub use merge::{add_or_replace, deep_merge, element_prefix, overload};
pub use remote::{is_terminal, Component, JobState, RemoteJob, Topic};
