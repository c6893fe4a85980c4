// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Records exchanged with the job-control service.
//!
//! The server owns these shapes; unknown fields are carried through untouched
//! so re-serializing a fetched job loses nothing.

use serde::{Deserialize, Serialize};

/// Terminal job statuses. A job must reach one of these before the pipeline
/// exits.
pub const TERMINAL_STATUSES: [&str; 4] = ["error", "success", "failure", "killed"];

pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ctype: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub released_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One state transition of a remote job, newest first in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A server-assigned job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub topic: Option<Topic>,
    #[serde(default)]
    pub jobstates: Vec<JobState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RemoteJob {
    /// The most recent jobstate, if the record embeds any.
    pub fn last_jobstate(&self) -> Option<&JobState> {
        self.jobstates.first()
    }
}
