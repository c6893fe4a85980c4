// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`ControlServer`] for tests.
//!
//! Component listings are canned per functional query string; everything
//! else (jobs, jobstates, tags, uploads, pipelines) is recorded so tests can
//! assert on the exact traffic the stage executor produced.

use crate::api::{ClientError, ComponentQuery, ControlServer, Identity, JobCreate};
use async_trait::async_trait;
use dci_core::{Component, JobState, RemoteJob, Topic};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A recorded file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub job_id: String,
    pub name: String,
    pub mime: String,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub topics: Vec<Topic>,
    /// Canned component listings, keyed by the exact functional query.
    pub components_by_query: HashMap<String, Vec<Component>>,
    /// Answer for queries without a canned listing.
    pub default_components: Vec<Component>,
    pub jobs: HashMap<String, RemoteJob>,
    /// Jobstates per job, newest first.
    pub jobstates: HashMap<String, Vec<JobState>>,
    pub job_tags: HashMap<String, Vec<String>>,
    pub component_tags: HashMap<String, Vec<String>>,
    pub uploads: Vec<Upload>,
    /// Created pipelines as (id, name).
    pub pipelines: Vec<(String, String)>,
    /// Every component query seen, in call order.
    pub component_queries: Vec<ComponentQuery>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[derive(Debug, Default)]
pub struct FakeControlServer {
    state: Mutex<FakeState>,
}

/// Build a component record for canned listings.
pub fn component(id: &str, ctype: &str, name: &str, version: &str, tags: &[&str]) -> Component {
    Component {
        id: id.to_string(),
        name: name.to_string(),
        ctype: ctype.to_string(),
        version: Some(version.to_string()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        released_at: Some("2026-01-01T00:00:00".to_string()),
        extra: serde_json::Map::new(),
    }
}

impl FakeControlServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_topic(self, name: &str) -> Self {
        {
            let mut state = self.state();
            let id = format!("topic-{name}");
            state.topics.push(Topic {
                id,
                name: name.to_string(),
                extra: serde_json::Map::new(),
            });
        }
        self
    }

    /// Can the components returned for one exact query.
    pub fn set_components(&self, query: &str, components: Vec<Component>) {
        self.state()
            .components_by_query
            .insert(query.to_string(), components);
    }

    pub fn set_default_components(&self, components: Vec<Component>) {
        self.state().default_components = components;
    }

    fn find_component(state: &FakeState, id: &str) -> Option<Component> {
        state
            .components_by_query
            .values()
            .flatten()
            .chain(state.default_components.iter())
            .find(|component| component.id == id)
            .cloned()
    }
}

#[async_trait]
impl ControlServer for FakeControlServer {
    async fn list_topics(&self, where_clause: &str) -> Result<Vec<Topic>, ClientError> {
        let state = self.state();
        let name = where_clause.strip_prefix("name:").unwrap_or(where_clause);
        Ok(state
            .topics
            .iter()
            .filter(|topic| topic.name == name)
            .cloned()
            .collect())
    }

    async fn list_components(
        &self,
        _topic_id: &str,
        query: &ComponentQuery,
    ) -> Result<Vec<Component>, ClientError> {
        let mut state = self.state();
        let key = query.query.clone().unwrap_or_default();
        state.component_queries.push(query.clone());
        let mut components = state
            .components_by_query
            .get(&key)
            .cloned()
            .unwrap_or_else(|| state.default_components.clone());
        components.truncate(query.limit as usize);
        Ok(components)
    }

    async fn create_job(&self, create: &JobCreate) -> Result<RemoteJob, ClientError> {
        let mut state = self.state();
        let id = state.next_id("job");
        let components = create
            .components
            .iter()
            .filter_map(|component_id| Self::find_component(&state, component_id))
            .collect();
        let topic = state
            .topics
            .iter()
            .find(|topic| topic.id == create.topic_id)
            .cloned();
        let mut extra = serde_json::Map::new();
        if let Some(previous) = &create.previous_job_id {
            extra.insert(
                "previous_job_id".to_string(),
                serde_json::Value::String(previous.clone()),
            );
        }
        if let Some(pipeline_id) = &create.pipeline_id {
            extra.insert(
                "pipeline_id".to_string(),
                serde_json::Value::String(pipeline_id.clone()),
            );
        }
        if let Some(data) = &create.data {
            extra.insert("data".to_string(), data.clone());
        }
        let job = RemoteJob {
            id: id.clone(),
            status: Some("new".to_string()),
            name: Some(create.name.clone()),
            tags: Vec::new(),
            components,
            topic,
            jobstates: Vec::new(),
            extra,
        };
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<RemoteJob, ClientError> {
        let state = self.state();
        let mut job = state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("job {job_id}")))?;
        job.jobstates = state.jobstates.get(job_id).cloned().unwrap_or_default();
        Ok(job)
    }

    async fn create_jobstate(
        &self,
        job_id: &str,
        status: &str,
        comment: &str,
    ) -> Result<JobState, ClientError> {
        let mut state = self.state();
        let id = state.next_id("jobstate");
        let jobstate = JobState {
            id,
            status: status.to_string(),
            comment: Some(comment.to_string()),
        };
        state
            .jobstates
            .entry(job_id.to_string())
            .or_default()
            .insert(0, jobstate.clone());
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.status = Some(status.to_string());
        }
        Ok(jobstate)
    }

    async fn list_jobstates(&self, job_id: &str) -> Result<Vec<JobState>, ClientError> {
        Ok(self.state().jobstates.get(job_id).cloned().unwrap_or_default())
    }

    async fn add_job_tag(&self, job_id: &str, tag: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        state
            .job_tags
            .entry(job_id.to_string())
            .or_default()
            .push(tag.to_string());
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.tags.push(tag.to_string());
        }
        Ok(())
    }

    async fn add_component_tag(&self, component_id: &str, tag: &str) -> Result<(), ClientError> {
        self.state()
            .component_tags
            .entry(component_id.to_string())
            .or_default()
            .push(tag.to_string());
        Ok(())
    }

    async fn upload_file(
        &self,
        job_id: &str,
        name: &str,
        mime: &str,
        path: &Path,
    ) -> Result<(), ClientError> {
        self.state().uploads.push(Upload {
            job_id: job_id.to_string(),
            name: name.to_string(),
            mime: mime.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }

    async fn create_pipeline(&self, name: &str, _team_id: &str) -> Result<String, ClientError> {
        let mut state = self.state();
        let id = state.next_id("pipeline");
        state.pipelines.push((id.clone(), name.to_string()));
        Ok(id)
    }

    async fn list_jobs_by_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<RemoteJob>, ClientError> {
        Ok(self
            .state()
            .jobs
            .values()
            .filter(|job| {
                job.extra.get("pipeline_id").and_then(|v| v.as_str()) == Some(pipeline_id)
            })
            .cloned()
            .collect())
    }

    async fn identity(&self) -> Result<Identity, ClientError> {
        Ok(Identity {
            id: "remoteci-1".to_string(),
            team_id: Some("team-1".to_string()),
            extra: serde_json::Map::new(),
        })
    }
}
