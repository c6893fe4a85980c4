// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed wrappers over the HTTP endpoints of the job-control service.

use crate::auth::AuthContext;
use crate::retry::{self, RetryPolicy};
use async_trait::async_trait;
use dci_core::{Component, JobState, RemoteJob, Topic};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("no match for {0}")]
    NotFound(String),
    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid credentials file {path}: {message}")]
    Credentials { path: PathBuf, message: String },
}

/// Parameters of a component listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentQuery {
    /// `where` filter (`name:value` syntax).
    pub where_clause: Option<String>,
    /// `query` filter (functional syntax built by [`crate::query`]).
    pub query: Option<String>,
    pub sort: String,
    pub limit: u32,
    pub offset: u32,
    /// Only components created after this date (YYYY-MM-DD).
    pub created_after: Option<String>,
}

impl Default for ComponentQuery {
    fn default() -> Self {
        Self {
            where_clause: None,
            query: None,
            sort: "-released_at".to_string(),
            limit: 1,
            offset: 0,
            created_after: None,
        }
    }
}

impl ComponentQuery {
    /// Newest component matching a functional query.
    pub fn newest(query: String) -> Self {
        Self {
            query: Some(query),
            ..Self::default()
        }
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("sort".to_string(), self.sort.clone()),
            ("limit".to_string(), self.limit.to_string()),
            ("offset".to_string(), self.offset.to_string()),
        ];
        if let Some(where_clause) = &self.where_clause {
            params.push(("where".to_string(), where_clause.clone()));
        }
        if let Some(query) = &self.query {
            params.push(("query".to_string(), query.clone()));
        }
        if let Some(created_after) = &self.created_after {
            params.push(("created_after".to_string(), created_after.clone()));
        }
        params
    }
}

/// Payload of a job creation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobCreate {
    pub topic_id: String,
    /// Component ids the job runs against.
    pub components: Vec<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
}

/// Who the credentials authenticate as.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The server operations the pipeline engine depends on. The stage executor
/// is written against this trait so tests can run without a server.
#[async_trait]
pub trait ControlServer: Send + Sync {
    async fn list_topics(&self, where_clause: &str) -> Result<Vec<Topic>, ClientError>;

    async fn list_components(
        &self,
        topic_id: &str,
        query: &ComponentQuery,
    ) -> Result<Vec<Component>, ClientError>;

    async fn create_job(&self, create: &JobCreate) -> Result<RemoteJob, ClientError>;

    /// Fetch a job with `topic,remoteci,components` embedded.
    async fn get_job(&self, job_id: &str) -> Result<RemoteJob, ClientError>;

    async fn create_jobstate(
        &self,
        job_id: &str,
        status: &str,
        comment: &str,
    ) -> Result<JobState, ClientError>;

    /// Jobstates of a job, newest first.
    async fn list_jobstates(&self, job_id: &str) -> Result<Vec<JobState>, ClientError>;

    async fn add_job_tag(&self, job_id: &str, tag: &str) -> Result<(), ClientError>;

    async fn add_component_tag(&self, component_id: &str, tag: &str) -> Result<(), ClientError>;

    /// Attach a file to a job with an explicit MIME type.
    async fn upload_file(
        &self,
        job_id: &str,
        name: &str,
        mime: &str,
        path: &Path,
    ) -> Result<(), ClientError>;

    async fn create_pipeline(&self, name: &str, team_id: &str) -> Result<String, ClientError>;

    async fn list_jobs_by_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<RemoteJob>, ClientError>;

    async fn identity(&self) -> Result<Identity, ClientError>;
}

/// reqwest-backed implementation.
#[derive(Debug, Clone)]
pub struct DciClient {
    http: reqwest::Client,
    auth: AuthContext,
    base: String,
    retry: RetryPolicy,
}

impl DciClient {
    pub fn new(auth: AuthContext) -> Self {
        let base = auth.cs_url().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            auth,
            base,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<serde_json::Value>,
        raw_body: Option<(Vec<u8>, Vec<(String, String)>)>,
    ) -> Result<serde_json::Value, ClientError> {
        let json_bytes = match &body {
            Some(value) => Some(serde_json::to_vec(value)?),
            None => None,
        };
        let url = format!("{}{}", self.base, path);
        tracing::debug!(method = %method, %url, "API call");

        let response = retry::with_retry(&self.retry, || {
            let mut builder = self.http.request(method.clone(), url.as_str()).query(params);
            let mut signed: &[u8] = &[];
            if let Some(bytes) = &json_bytes {
                builder = builder
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(bytes.clone());
                signed = bytes;
            }
            if let Some((bytes, headers)) = &raw_body {
                for (key, value) in headers {
                    builder = builder.header(key, value);
                }
                builder = builder.body(bytes.clone());
                signed = bytes;
            }
            self.auth
                .apply(builder, method.as_str(), path, signed)
                .send()
        })
        .await;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), %url, message, "API error");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, ClientError> {
        self.request(Method::GET, path, params, None, None).await
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        self.request(Method::POST, path, &[], Some(body), None).await
    }
}

fn field<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    key: &str,
) -> Result<T, ClientError> {
    Ok(serde_json::from_value(value[key].clone())?)
}

#[async_trait]
impl ControlServer for DciClient {
    async fn list_topics(&self, where_clause: &str) -> Result<Vec<Topic>, ClientError> {
        let value = self
            .get(
                "/api/v1/topics",
                &[("where".to_string(), where_clause.to_string())],
            )
            .await?;
        field(value, "topics")
    }

    async fn list_components(
        &self,
        topic_id: &str,
        query: &ComponentQuery,
    ) -> Result<Vec<Component>, ClientError> {
        let value = self
            .get(
                &format!("/api/v1/topics/{topic_id}/components"),
                &query.params(),
            )
            .await?;
        field(value, "components")
    }

    async fn create_job(&self, create: &JobCreate) -> Result<RemoteJob, ClientError> {
        let value = self
            .post("/api/v1/jobs", serde_json::to_value(create)?)
            .await?;
        field(value, "job")
    }

    async fn get_job(&self, job_id: &str) -> Result<RemoteJob, ClientError> {
        let value = self
            .get(
                &format!("/api/v1/jobs/{job_id}"),
                &[("embed".to_string(), "topic,remoteci,components".to_string())],
            )
            .await?;
        field(value, "job")
    }

    async fn create_jobstate(
        &self,
        job_id: &str,
        status: &str,
        comment: &str,
    ) -> Result<JobState, ClientError> {
        let value = self
            .post(
                "/api/v1/jobstates",
                serde_json::json!({
                    "job_id": job_id,
                    "status": status,
                    "comment": comment,
                }),
            )
            .await?;
        field(value, "jobstate")
    }

    async fn list_jobstates(&self, job_id: &str) -> Result<Vec<JobState>, ClientError> {
        let value = self
            .get(
                &format!("/api/v1/jobs/{job_id}/jobstates"),
                &[("sort".to_string(), "-created_at".to_string())],
            )
            .await?;
        field(value, "jobstates")
    }

    async fn add_job_tag(&self, job_id: &str, tag: &str) -> Result<(), ClientError> {
        self.post(
            &format!("/api/v1/jobs/{job_id}/tags"),
            serde_json::json!({ "name": tag }),
        )
        .await?;
        Ok(())
    }

    async fn add_component_tag(&self, component_id: &str, tag: &str) -> Result<(), ClientError> {
        self.post(
            &format!("/api/v1/components/{component_id}/tags"),
            serde_json::json!({ "name": tag }),
        )
        .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        job_id: &str,
        name: &str,
        mime: &str,
        path: &Path,
    ) -> Result<(), ClientError> {
        let bytes = std::fs::read(path).map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let headers = vec![
            ("DCI-NAME".to_string(), name.to_string()),
            ("DCI-MIME".to_string(), mime.to_string()),
            ("DCI-JOB-ID".to_string(), job_id.to_string()),
            (
                reqwest::header::CONTENT_TYPE.to_string(),
                mime.to_string(),
            ),
        ];
        self.request(
            Method::POST,
            "/api/v1/files",
            &[],
            None,
            Some((bytes, headers)),
        )
        .await?;
        Ok(())
    }

    async fn create_pipeline(&self, name: &str, team_id: &str) -> Result<String, ClientError> {
        let value = self
            .post(
                "/api/v1/pipelines",
                serde_json::json!({ "name": name, "team_id": team_id }),
            )
            .await?;
        let id = value["pipeline"]["id"]
            .as_str()
            .ok_or_else(|| ClientError::NotFound("pipeline id".to_string()))?;
        Ok(id.to_string())
    }

    async fn list_jobs_by_pipeline(
        &self,
        pipeline_id: &str,
    ) -> Result<Vec<RemoteJob>, ClientError> {
        let value = self
            .get(
                "/api/v1/jobs",
                &[(
                    "where".to_string(),
                    format!("pipeline_id:{pipeline_id}"),
                )],
            )
            .await?;
        field(value, "jobs")
    }

    async fn identity(&self) -> Result<Identity, ClientError> {
        let value = self.get("/api/v1/identity", &[]).await?;
        field(value, "identity")
    }
}
