// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry of transient remote failures.
//!
//! 5xx responses and transport errors (connection reset, refused) never
//! surface: the call is retried forever with exponential backoff. Permanent
//! failures (4xx) pass through to the caller. Each distinct API call starts
//! from the initial delay again.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Double the delay, capped at the maximum.
    pub fn next(&self, current: Duration) -> Duration {
        std::cmp::min(current * 2, self.max)
    }
}

/// Run `call` until it returns a non-5xx response.
pub async fn with_retry<F, Fut>(policy: &RetryPolicy, mut call: F) -> reqwest::Response
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut delay = policy.initial;
    loop {
        match call().await {
            Ok(response) if !response.status().is_server_error() => return response,
            Ok(response) => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    delay_secs = delay.as_secs(),
                    "server error, retrying"
                );
            }
            Err(error) => {
                tracing::warn!(%error, delay_secs = delay.as_secs(), "transport error, retrying");
            }
        }
        tokio::time::sleep(delay).await;
        delay = policy.next(delay);
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
