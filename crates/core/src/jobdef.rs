// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed job-def model.
//!
//! Pipeline documents travel through the loader as dynamic trees; this is the
//! fixed shape they are validated against at the boundary into the stage
//! executor. The original dynamic mapping is kept in `raw` because overrides
//! may have added keys the model does not know, and because it is what gets
//! persisted as `jobdef.yaml`.

use crate::component::{ComponentExpr, ComponentExprError};
use crate::remote::RemoteJob;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobDefError {
    #[error("job-def is not a mapping")]
    NotAMapping,
    #[error("job-def without a `name`")]
    MissingName,
    #[error("job-def `{name}` has no `stage` or `type`")]
    MissingStage { name: String },
    #[error("job-def `{name}`: {source}")]
    Shape {
        name: String,
        source: serde_yaml::Error,
    },
    #[error("job-def `{name}`: {source}")]
    Component {
        name: String,
        source: ComponentExprError,
    },
}

/// Per-host playbook statistics, parsed from the runner's recap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayStats {
    #[serde(default)]
    pub ok: u32,
    #[serde(default)]
    pub changed: u32,
    #[serde(default)]
    pub unreachable: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub rescued: u32,
    #[serde(default)]
    pub ignored: u32,
}

/// Everything a completed scheduling attempt attaches to a job-def.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job: RemoteJob,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub inputs: IndexMap<String, PathBuf>,
    #[serde(default)]
    pub outputs: IndexMap<String, PathBuf>,
    #[serde(default)]
    pub stats: IndexMap<String, PlayStats>,
    #[serde(default)]
    pub rc: Option<i32>,
}

impl JobInfo {
    /// Success requires a clean exit and a recap that actually ran something.
    pub fn succeeded(&self) -> bool {
        self.rc == Some(0) && !self.stats.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct JobDefShape {
    name: Option<String>,
    #[serde(alias = "type")]
    stage: Option<String>,
    topic: Option<String>,
    #[serde(default)]
    components: Vec<Value>,
    ansible_playbook: Option<PathBuf>,
    ansible_inventory: Option<PathBuf>,
    ansible_cfg: Option<PathBuf>,
    #[serde(default)]
    ansible_tags: Vec<String>,
    #[serde(default)]
    ansible_skip_tags: Vec<String>,
    #[serde(default)]
    ansible_envvars: IndexMap<String, String>,
    #[serde(default)]
    ansible_extravars: Mapping,
    #[serde(default)]
    ansible_extravars_files: Vec<PathBuf>,
    inventory_playbook: Option<PathBuf>,
    #[serde(default)]
    inputs: IndexMap<String, String>,
    #[serde(default)]
    outputs: IndexMap<String, String>,
    #[serde(default)]
    prev_stages: Vec<String>,
    success_tag: Option<String>,
    #[serde(default)]
    fallback_last_success: Vec<String>,
    #[serde(default)]
    use_previous_topic: bool,
    dci_credentials: Option<PathBuf>,
    pipeline_user: Option<PathBuf>,
    comment: Option<String>,
    configuration: Option<String>,
    url: Option<String>,
}

/// One stage of a pipeline: everything needed to run one playbook against one
/// remote job.
#[derive(Debug, Clone)]
pub struct JobDef {
    pub name: String,
    /// Equivalence-class label (`stage`, or legacy `type`).
    pub stage: String,
    pub topic: Option<String>,
    pub components: Vec<ComponentExpr>,
    pub ansible_playbook: Option<PathBuf>,
    pub ansible_inventory: Option<PathBuf>,
    pub ansible_cfg: Option<PathBuf>,
    pub ansible_tags: Vec<String>,
    pub ansible_skip_tags: Vec<String>,
    pub ansible_envvars: IndexMap<String, String>,
    pub ansible_extravars: Mapping,
    pub ansible_extravars_files: Vec<PathBuf>,
    /// Runs before the main playbook when declared; its failure aborts the
    /// job-def.
    pub inventory_playbook: Option<PathBuf>,
    pub inputs: IndexMap<String, String>,
    pub outputs: IndexMap<String, String>,
    pub prev_stages: Vec<String>,
    pub success_tag: Option<String>,
    pub fallback_last_success: Vec<String>,
    pub use_previous_topic: bool,
    pub dci_credentials: Option<PathBuf>,
    pub pipeline_user: Option<PathBuf>,
    pub comment: Option<String>,
    pub configuration: Option<String>,
    pub url: Option<String>,
    /// Directory of the document this job-def came from, for relative paths.
    pub doc_dir: PathBuf,
    /// The merged dynamic tree this model was validated from.
    pub raw: Mapping,
    pub job_info: Option<JobInfo>,
    pub failed_job_info: Option<JobInfo>,
}

impl JobDef {
    /// Validate a dynamic job-def tree into the typed model.
    pub fn from_value(value: &Value, doc_dir: &Path) -> Result<Self, JobDefError> {
        let raw = match value {
            Value::Mapping(m) => m.clone(),
            _ => return Err(JobDefError::NotAMapping),
        };
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .ok_or(JobDefError::MissingName)?
            .to_string();
        let shape: JobDefShape =
            serde_yaml::from_value(value.clone()).map_err(|source| JobDefError::Shape {
                name: name.clone(),
                source,
            })?;
        let stage = shape.stage.ok_or_else(|| JobDefError::MissingStage {
            name: name.clone(),
        })?;
        let components = shape
            .components
            .iter()
            .map(ComponentExpr::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| JobDefError::Component {
                name: name.clone(),
                source,
            })?;
        Ok(JobDef {
            name,
            stage,
            topic: shape.topic,
            components,
            ansible_playbook: shape.ansible_playbook,
            ansible_inventory: shape.ansible_inventory,
            ansible_cfg: shape.ansible_cfg,
            ansible_tags: shape.ansible_tags,
            ansible_skip_tags: shape.ansible_skip_tags,
            ansible_envvars: shape.ansible_envvars,
            ansible_extravars: shape.ansible_extravars,
            ansible_extravars_files: shape.ansible_extravars_files,
            inventory_playbook: shape.inventory_playbook,
            inputs: shape.inputs,
            outputs: shape.outputs,
            prev_stages: shape.prev_stages,
            success_tag: shape.success_tag,
            fallback_last_success: shape.fallback_last_success,
            use_previous_topic: shape.use_previous_topic,
            dci_credentials: shape.dci_credentials,
            pipeline_user: shape.pipeline_user,
            comment: shape.comment,
            configuration: shape.configuration,
            url: shape.url,
            doc_dir: doc_dir.to_path_buf(),
            raw,
            job_info: None,
            failed_job_info: None,
        })
    }

    /// A job-def made only of pinned component expressions: there is no older
    /// version to fall back to, so retries are pointless.
    pub fn is_fixed_component(&self) -> bool {
        !self.components.is_empty() && self.components.iter().all(ComponentExpr::is_pinned)
    }

    /// Resolve a path relative to the originating document.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.doc_dir.join(path)
        }
    }

    /// Copy of the raw tree with credentials and runtime state stripped, fit
    /// for shipping to the server as `data.pipeline`.
    pub fn sanitized(&self) -> Mapping {
        let mut copy = self.raw.clone();
        for key in ["dci_credentials", "pipeline_user", "job_info", "failed_job_info"] {
            copy.remove(key);
        }
        copy
    }

    /// The last attempt's remote job, if any attempt ran.
    pub fn remote_job(&self) -> Option<&RemoteJob> {
        self.job_info.as_ref().map(|info| &info.job)
    }
}

#[cfg(test)]
#[path = "jobdef_tests.rs"]
mod tests;
