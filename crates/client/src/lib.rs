// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dci-client: typed access to the remote job-control service.
//!
//! Every HTTP call goes through a retry helper that absorbs 5xx responses
//! and transport failures with exponential backoff; permanent (4xx) errors
//! surface as [`ClientError::Api`]. The [`ControlServer`] trait is the seam
//! the stage executor is tested against.

pub mod api;
pub mod auth;
pub mod query;
pub mod resolver;
pub mod retry;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use api::{
    ClientError, ComponentQuery, ControlServer, DciClient, Identity, JobCreate,
};
pub use auth::{AuthContext, PipelineUserCredentials, RemoteCiCredentials};
pub use query::{build_query, build_query_from_expr, extract_build_tags, extract_tags};
pub use resolver::resolve_components;
pub use retry::RetryPolicy;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeControlServer, FakeState};
