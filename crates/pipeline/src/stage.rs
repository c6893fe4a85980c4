// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stage execution.
//!
//! Job-defs are grouped into stages in the order their stage labels first
//! appear, and each stage runs its job-defs sequentially. One job-def run
//! is: schedule the remote job, stage inputs, run the playbook child,
//! upload artifacts, evaluate the result and, when the policy allows,
//! retry against last-known-good components.

use crate::loader::Pipeline;
use crate::overrides::PipelineOptions;
use crate::runner::{PlaybookOutcome, PlaybookRun, PlaybookRunner, RunnerError, LOG_FILE};
use crate::tags::{job_tags, prev_jobdefs};
use dci_client::{
    resolve_components, AuthContext, ClientError, ControlServer, DciClient, JobCreate,
    PipelineUserCredentials, RemoteCiCredentials,
};
use dci_core::{CancelToken, Component, JobDef, JobInfo, RunOutcome};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// JUnit collection defaults injected into every playbook environment.
const JUNIT_DEFAULTS: [(&str, &str); 3] = [
    ("JUNIT_TEST_CASE_PREFIX", "test_"),
    ("JUNIT_TASK_CLASS", "yes"),
    ("JUNIT_OUTPUT_DIR", TMPDIR_PLACEHOLDER),
];

/// Environment values equal to this are rewritten to fresh temporary
/// directories.
const TMPDIR_PLACEHOLDER: &str = "/@tmpdir";

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("job-def {0} has no topic")]
    NoTopic(String),
    #[error("topic {0} not found")]
    TopicNotFound(String),
    #[error("job-def {0} has no dci_credentials")]
    NoCredentials(String),
    #[error("job-def {0} has no ansible_playbook")]
    NoPlaybook(String),
    #[error("server returned different components for job-def {0}")]
    ComponentMismatch(String),
    #[error("no writable data directory among the candidates")]
    NoWritableDataDir,
    #[error("identity has no team, cannot create a pipeline")]
    NoTeam,
    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),
    #[error("serialization: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StageError + '_ {
    move |source| StageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Builds a server connection for a given authentication context, so tests
/// can substitute an in-memory server.
pub trait ServerFactory: Send + Sync {
    fn connect(&self, auth: &AuthContext) -> Arc<dyn ControlServer>;
}

/// Production factory: one HTTP client per context.
#[derive(Debug, Default)]
pub struct HttpServerFactory;

impl ServerFactory for HttpServerFactory {
    fn connect(&self, auth: &AuthContext) -> Arc<dyn ControlServer> {
        Arc::new(DciClient::new(auth.clone()))
    }
}

struct Attempt {
    succeeded: bool,
    /// Status written by the finalization step, when one was needed.
    final_status: Option<String>,
}

pub struct StageExecutor {
    factory: Arc<dyn ServerFactory>,
    runner: Arc<dyn PlaybookRunner>,
    cancel: CancelToken,
    pub verbosity: u32,
    /// DCI_QUEUE_JOBID of the queue slot that launched us, if any.
    pub queue_jobid: Option<String>,
    /// Candidate bases for per-job data directories, most preferred first.
    pub data_bases: Vec<PathBuf>,
    /// Root holding the callback plugins for generated ansible.cfg files.
    pub ansible_dir: PathBuf,
    /// External vault helper, exported as the vault identity.
    pub vault_cmd: String,
}

impl StageExecutor {
    pub fn new(
        factory: Arc<dyn ServerFactory>,
        runner: Arc<dyn PlaybookRunner>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            factory,
            runner,
            cancel,
            verbosity: 2,
            queue_jobid: None,
            data_bases: Vec::new(),
            ansible_dir: PathBuf::from("/usr/share/dci/ansible"),
            vault_cmd: "dci-vault-client".to_string(),
        }
    }

    /// Run the whole pipeline, stage by stage. Stops at the end of the
    /// first stage with a failed job-def.
    pub async fn run_pipeline(&self, pipeline: &mut Pipeline) -> RunOutcome {
        let mut stages: Vec<String> = Vec::new();
        for jobdef in &pipeline.jobdefs {
            if !stages.contains(&jobdef.stage) {
                stages.push(jobdef.stage.clone());
            }
        }

        let mut pipeline_id = pipeline.options.pipeline_id.clone();
        let mut outcome = RunOutcome::Success;

        'stages: for stage in &stages {
            tracing::info!(stage = %stage, "starting stage");
            let mut stage_failed = false;

            let indexes: Vec<usize> = pipeline
                .jobdefs
                .iter()
                .enumerate()
                .filter(|(_, jobdef)| jobdef.stage == *stage)
                .map(|(index, _)| index)
                .collect();

            for index in indexes {
                if let Some(signo) = self.cancel.signal() {
                    tracing::info!(signo, "cancellation requested, not starting new job-defs");
                    outcome = outcome.merge(RunOutcome::Cancelled(signo));
                    stage_failed = true;
                    break;
                }
                // The job-def is processed on a clone so earlier entries stay
                // readable as previous-stage context.
                let mut jobdef = pipeline.jobdefs[index].clone();
                let name = jobdef.name.clone();
                let jobdef_outcome = match self
                    .run_jobdef(
                        &mut jobdef,
                        &pipeline.jobdefs,
                        &mut pipeline_id,
                        &pipeline.options,
                    )
                    .await
                {
                    Ok(jobdef_outcome) => jobdef_outcome,
                    Err(e) => {
                        tracing::error!(jobdef = %name, error = %e, "job-def is unschedulable");
                        RunOutcome::JobFailure
                    }
                };
                pipeline.jobdefs[index] = jobdef;
                if jobdef_outcome != RunOutcome::Success {
                    stage_failed = true;
                }
                outcome = outcome.merge(jobdef_outcome);
            }

            if stage_failed {
                self.emit_summary(&pipeline.jobdefs);
                break 'stages;
            }
        }
        outcome
    }

    /// Diagnostic summary of each job-def's last known state.
    fn emit_summary(&self, jobdefs: &[JobDef]) {
        for jobdef in jobdefs {
            let status = jobdef
                .job_info
                .as_ref()
                .and_then(|info| info.job.status.clone())
                .unwrap_or_else(|| "not started".to_string());
            tracing::error!(jobdef = %jobdef.name, status = %status, "stage summary");
        }
    }

    async fn run_jobdef(
        &self,
        jobdef: &mut JobDef,
        pipeline: &[JobDef],
        pipeline_id: &mut Option<String>,
        options: &PipelineOptions,
    ) -> Result<RunOutcome, StageError> {
        tracing::info!(jobdef = %jobdef.name, stage = %jobdef.stage, "running jobdef");

        let credentials_path = jobdef
            .dci_credentials
            .clone()
            .ok_or_else(|| StageError::NoCredentials(jobdef.name.clone()))?;
        let credentials = RemoteCiCredentials::from_file(&jobdef.resolve_path(&credentials_path))?;
        let server = self
            .factory
            .connect(&AuthContext::Signature(credentials.clone()));
        // Component listing may run as the pipeline user instead of the
        // remoteci.
        let component_server = match &jobdef.pipeline_user {
            Some(path) => {
                let user = PipelineUserCredentials::from_file(&jobdef.resolve_path(path))?;
                self.factory.connect(&AuthContext::Basic(user))
            }
            None => Arc::clone(&server),
        };

        let prev: Vec<&JobDef> = prev_jobdefs(jobdef, pipeline)
            .into_iter()
            .filter(|prev| prev.job_info.is_some())
            .collect();
        let nearest = prev.first().copied();
        let previous_job_id = nearest
            .and_then(|prev| prev.job_info.as_ref())
            .map(|info| info.job.id.clone());
        let topic = if jobdef.use_previous_topic {
            nearest.and_then(effective_topic)
        } else {
            None
        }
        .or_else(|| jobdef.topic.clone())
        .ok_or_else(|| StageError::NoTopic(jobdef.name.clone()))?;

        if pipeline_id.is_none() {
            let identity = server.identity().await?;
            let team_id = identity.team_id.ok_or(StageError::NoTeam)?;
            let id = server.create_pipeline(&options.name, &team_id).await?;
            tracing::info!(pipeline_id = %id, "created pipeline");
            *pipeline_id = Some(id);
        }

        let first = self
            .run_attempt(
                jobdef,
                &*server,
                &*component_server,
                &credentials,
                &topic,
                &prev,
                previous_job_id.clone(),
                pipeline_id.as_deref(),
                &[],
            )
            .await?;
        if first.succeeded {
            return Ok(RunOutcome::Success);
        }

        let fallback_allowed = !jobdef.fallback_last_success.is_empty()
            && !jobdef.is_fixed_component()
            && !self.cancel.cancelled();
        if fallback_allowed {
            if let Some(outcome) = self
                .run_fallback(
                    jobdef,
                    &*server,
                    &*component_server,
                    &credentials,
                    &topic,
                    &prev,
                    previous_job_id,
                    pipeline_id.as_deref(),
                )
                .await?
            {
                return Ok(outcome);
            }
        }

        Ok(self.failure_outcome(first.final_status.as_deref()))
    }

    /// Retry against last-known-good components. Returns `None` when the
    /// retry was skipped because no older candidate exists.
    #[allow(clippy::too_many_arguments)]
    async fn run_fallback(
        &self,
        jobdef: &mut JobDef,
        server: &dyn ControlServer,
        component_server: &dyn ControlServer,
        credentials: &RemoteCiCredentials,
        topic: &str,
        prev: &[&JobDef],
        previous_job_id: Option<String>,
        pipeline_id: Option<&str>,
    ) -> Result<Option<RunOutcome>, StageError> {
        let fallback_tags = jobdef.fallback_last_success.clone();
        let topic_id = self.topic_id(server, topic).await?;
        let candidates =
            match resolve_components(component_server, &topic_id, &jobdef.components, &fallback_tags)
                .await
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::error!(jobdef = %jobdef.name, error = %e, "no fallback candidates");
                    return Ok(None);
                }
            };
        let failed_versions: HashMap<String, Option<String>> = jobdef
            .job_info
            .as_ref()
            .map(|info| {
                info.job
                    .components
                    .iter()
                    .map(|component| (component.ctype.clone(), component.version.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let same_versions = candidates.iter().all(|candidate| {
            failed_versions.get(&candidate.ctype) == Some(&candidate.version)
        });
        if same_versions {
            tracing::info!(
                jobdef = %jobdef.name,
                "fallback components match the failed ones, not retrying"
            );
            return Ok(None);
        }

        tracing::info!(jobdef = %jobdef.name, "retrying with fallback components");
        jobdef.failed_job_info = jobdef.job_info.take();
        let retry = self
            .run_attempt(
                jobdef,
                server,
                component_server,
                credentials,
                topic,
                prev,
                previous_job_id,
                pipeline_id,
                &fallback_tags,
            )
            .await?;
        if retry.succeeded {
            return Ok(Some(RunOutcome::Success));
        }
        // A killed retry still maps to the cancellation exit code; any other
        // second failure counts as an error.
        Ok(Some(
            match self.failure_outcome(retry.final_status.as_deref()) {
                cancelled @ RunOutcome::Cancelled(_) => cancelled,
                _ => RunOutcome::JobError,
            },
        ))
    }

    fn failure_outcome(&self, final_status: Option<&str>) -> RunOutcome {
        match final_status {
            Some("killed") => RunOutcome::Cancelled(self.cancel.signal().unwrap_or(15)),
            Some("error") => RunOutcome::JobError,
            _ => RunOutcome::JobFailure,
        }
    }

    async fn topic_id(
        &self,
        server: &dyn ControlServer,
        topic: &str,
    ) -> Result<String, StageError> {
        let topics = server.list_topics(&format!("name:{topic}")).await?;
        topics
            .into_iter()
            .next()
            .map(|found| found.id)
            .ok_or_else(|| StageError::TopicNotFound(topic.to_string()))
    }

    /// One scheduling attempt: remote job, data dir, inputs, playbooks,
    /// uploads, result evaluation and (on failure) finalization.
    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        jobdef: &mut JobDef,
        server: &dyn ControlServer,
        component_server: &dyn ControlServer,
        credentials: &RemoteCiCredentials,
        topic: &str,
        prev: &[&JobDef],
        previous_job_id: Option<String>,
        pipeline_id: Option<&str>,
        fallback_tags: &[String],
    ) -> Result<Attempt, StageError> {
        let nearest = prev.first().copied();
        let topic_id = self.topic_id(server, topic).await?;
        let components =
            resolve_components(component_server, &topic_id, &jobdef.components, fallback_tags)
                .await?;
        let component_ids: Vec<String> = components
            .iter()
            .map(|component| component.id.clone())
            .collect();

        let job = server
            .create_job(&JobCreate {
                topic_id,
                components: component_ids.clone(),
                name: jobdef.name.clone(),
                comment: jobdef.comment.clone(),
                configuration: jobdef.configuration.clone(),
                url: jobdef.url.clone(),
                data: Some(serde_json::json!({
                    "pipeline": serde_json::to_value(&jobdef.sanitized())?,
                })),
                previous_job_id,
                pipeline_id: pipeline_id.map(str::to_string),
            })
            .await?;
        server.create_jobstate(&job.id, "new", "job scheduled").await?;
        confirm_components(&jobdef.name, &component_ids, &job.components)?;
        tracing::info!(
            "running jobdef: {} with job /api/v1/jobs/{} topic {}",
            jobdef.name,
            job.id,
            topic
        );

        let data_dir = self.allocate_data_dir(&jobdef.name, &job.id)?;
        let mut job_info = JobInfo {
            job,
            data_dir: data_dir.clone(),
            inputs: Default::default(),
            outputs: Default::default(),
            stats: Default::default(),
            rc: None,
        };
        persist_yaml(&data_dir.join("jobdef.yaml"), &jobdef.raw)?;

        // Stage inputs from previous job-defs' outputs and bind the copied
        // paths into the playbook extra-variables.
        let mut bindings = serde_json::Map::new();
        for (key, filename) in &jobdef.inputs {
            let source = prev
                .iter()
                .filter_map(|prev| prev.job_info.as_ref())
                .find_map(|info| info.outputs.get(key));
            let Some(source) = source else {
                tracing::warn!(jobdef = %jobdef.name, key = %key, "no previous output for input");
                continue;
            };
            let dest = data_dir.join("inputs").join(filename);
            std::fs::copy(source, &dest).map_err(io_err(&dest))?;
            job_info.inputs.insert(key.clone(), dest.clone());
            bindings.insert(
                key.clone(),
                serde_json::Value::String(dest.display().to_string()),
            );
        }

        for (key, filename) in &jobdef.outputs {
            job_info
                .outputs
                .insert(key.clone(), data_dir.join("outputs").join(filename));
        }

        let mut tags = job_tags(jobdef, nearest, self.queue_jobid.as_deref());
        if !fallback_tags.is_empty() {
            tags.push("fallback".to_string());
        }
        for tag in &tags {
            server.add_job_tag(&job_info.job.id, tag).await?;
        }

        let (envvars, tmpdirs) = self.pre_process(jobdef)?;
        let cfg = self.write_ansible_cfg(jobdef, &data_dir)?;

        let mut env: Vec<(String, String)> = envvars;
        env.extend(credentials.to_env());
        env.push(("DCI_JOB_ID".to_string(), job_info.job.id.clone()));
        env.push((
            "ANSIBLE_VAULT_IDENTITY_LIST".to_string(),
            format!("dci@{}", self.vault_cmd),
        ));

        let playbook = jobdef
            .ansible_playbook
            .clone()
            .ok_or_else(|| StageError::NoPlaybook(jobdef.name.clone()))?;

        // Inventory playbook first, when declared; its failure aborts the
        // job-def.
        if let Some(inventory_playbook) = &jobdef.inventory_playbook {
            let run = self.compose_run(
                jobdef,
                &jobdef.resolve_path(inventory_playbook),
                &data_dir,
                cfg.clone(),
                env.clone(),
                serde_json::Value::Object(serde_json::Map::new()),
            );
            let outcome = self.runner.run(&run, &self.cancel).await?;
            if outcome.rc != 0 || self.cancel.cancelled() {
                tracing::error!(
                    jobdef = %jobdef.name,
                    rc = outcome.rc,
                    "inventory playbook failed"
                );
                job_info.rc = Some(outcome.rc);
                persist_yaml(&data_dir.join("job_info.yaml"), &job_info)?;
                let final_status = self.finalize(server, &job_info.job.id).await?;
                jobdef.job_info = Some(job_info);
                return Ok(Attempt {
                    succeeded: false,
                    final_status: Some(final_status),
                });
            }
        }

        let mut extravars = serde_json::Map::new();
        for (key, value) in &jobdef.ansible_extravars {
            if let (serde_yaml::Value::String(key), Ok(value)) =
                (key, serde_json::to_value(value))
            {
                extravars.insert(key.clone(), value);
            }
        }
        extravars.extend(bindings);
        extravars.insert("job_info".to_string(), serde_json::to_value(&job_info)?);

        let mut run = self.compose_run(
            jobdef,
            &jobdef.resolve_path(&playbook),
            &data_dir,
            cfg,
            env,
            serde_json::Value::Object(extravars),
        );
        run.env.push((
            "DCI_PLAYBOOK_ARGS".to_string(),
            serde_json::to_string(&run.argv())?,
        ));

        let outcome = self.runner.run(&run, &self.cancel).await?;
        job_info.rc = Some(outcome.rc);
        job_info.stats = outcome.stats.clone();
        persist_yaml(&data_dir.join("job_info.yaml"), &job_info)?;

        self.post_process(server, &job_info, &run, &tmpdirs).await?;

        job_info.job = server.get_job(&job_info.job.id).await?;
        let succeeded = evaluate(&outcome) && !self.cancel.cancelled();

        if succeeded {
            if let Some(success_tag) = &jobdef.success_tag {
                for component in &job_info.job.components {
                    server.add_component_tag(&component.id, success_tag).await?;
                }
            }
            jobdef.job_info = Some(job_info);
            return Ok(Attempt {
                succeeded: true,
                final_status: None,
            });
        }

        let final_status = self.finalize(server, &job_info.job.id).await?;
        jobdef.job_info = Some(job_info);
        Ok(Attempt {
            succeeded: false,
            final_status: Some(final_status),
        })
    }

    /// First writable candidate base gets `<base>/<name>/<job_id>/` with the
    /// `inputs` and `outputs` subdirectories.
    fn allocate_data_dir(&self, name: &str, job_id: &str) -> Result<PathBuf, StageError> {
        for base in &self.data_bases {
            let dir = base.join(name).join(job_id);
            if std::fs::create_dir_all(&dir).is_err() {
                continue;
            }
            for sub in ["inputs", "outputs"] {
                let sub = dir.join(sub);
                std::fs::create_dir_all(&sub).map_err(io_err(&sub))?;
            }
            tracing::debug!(dir = %dir.display(), "allocated data directory");
            return Ok(dir);
        }
        Err(StageError::NoWritableDataDir)
    }

    /// Inject JUnit defaults and rewrite `/@tmpdir` env values to fresh
    /// temporary directories, remembering the association for post-process.
    fn pre_process(
        &self,
        jobdef: &JobDef,
    ) -> Result<(Vec<(String, String)>, Vec<(String, PathBuf)>), StageError> {
        let mut envvars: Vec<(String, String)> = jobdef
            .ansible_envvars
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for (key, value) in JUNIT_DEFAULTS {
            if !envvars.iter().any(|(existing, _)| existing == key) {
                envvars.push((key.to_string(), value.to_string()));
            }
        }
        let mut tmpdirs = Vec::new();
        for (key, value) in envvars.iter_mut() {
            if value == TMPDIR_PLACEHOLDER {
                let dir = tempfile::tempdir()
                    .map_err(io_err(Path::new(TMPDIR_PLACEHOLDER)))?
                    .keep();
                *value = dir.display().to_string();
                tmpdirs.push((key.clone(), dir));
            }
        }
        Ok((envvars, tmpdirs))
    }

    /// Put the ansible.cfg into the data dir: the job-def's own one, or a
    /// generated default pointing at the framework callback plugins.
    fn write_ansible_cfg(
        &self,
        jobdef: &JobDef,
        data_dir: &Path,
    ) -> Result<Option<PathBuf>, StageError> {
        let dest = data_dir.join("ansible.cfg");
        match &jobdef.ansible_cfg {
            Some(cfg) => {
                let source = jobdef.resolve_path(cfg);
                std::fs::copy(&source, &dest).map_err(io_err(&source))?;
            }
            None => {
                let content = format!(
                    "[defaults]\n\
                     callback_plugins = {}/callback\n\
                     interpreter_python = auto_silent\n\
                     log_path = {}/{}\n",
                    self.ansible_dir.display(),
                    data_dir.display(),
                    LOG_FILE,
                );
                std::fs::write(&dest, content).map_err(io_err(&dest))?;
            }
        }
        Ok(Some(dest))
    }

    fn compose_run(
        &self,
        jobdef: &JobDef,
        playbook: &Path,
        data_dir: &Path,
        cfg: Option<PathBuf>,
        env: Vec<(String, String)>,
        extravars: serde_json::Value,
    ) -> PlaybookRun {
        PlaybookRun {
            playbook: playbook.to_path_buf(),
            inventory: jobdef
                .ansible_inventory
                .as_ref()
                .map(|inventory| jobdef.resolve_path(inventory)),
            cfg,
            data_dir: data_dir.to_path_buf(),
            tags: jobdef.ansible_tags.clone(),
            skip_tags: jobdef.ansible_skip_tags.clone(),
            extravars,
            extravars_files: jobdef
                .ansible_extravars_files
                .iter()
                .map(|file| jobdef.resolve_path(file))
                .collect(),
            env,
            verbosity: self.verbosity,
        }
    }

    /// Upload the playbook log and the collected JUnit files, then drop the
    /// temporary directories.
    async fn post_process(
        &self,
        server: &dyn ControlServer,
        job_info: &JobInfo,
        run: &PlaybookRun,
        tmpdirs: &[(String, PathBuf)],
    ) -> Result<(), StageError> {
        let log_path = run.log_path();
        if log_path.exists() {
            server
                .upload_file(&job_info.job.id, LOG_FILE, "text/plain", &log_path)
                .await?;
        }
        for (name, dir) in tmpdirs {
            if name == "JUNIT_OUTPUT_DIR" {
                self.upload_junit_files(server, job_info, dir).await?;
            }
            let _ = std::fs::remove_dir_all(dir);
        }
        Ok(())
    }

    async fn upload_junit_files(
        &self,
        server: &dyn ControlServer,
        job_info: &JobInfo,
        dir: &Path,
    ) -> Result<(), StageError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("xml") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("junit")
                .to_string();
            server
                .upload_file(&job_info.job.id, &name, "application/junit", &path)
                .await?;
        }
        Ok(())
    }

    /// Final-state transition: killed on cancellation, failure when the job
    /// was still running, error otherwise. Returns the written status.
    async fn finalize(
        &self,
        server: &dyn ControlServer,
        job_id: &str,
    ) -> Result<String, StageError> {
        let last = server
            .list_jobstates(job_id)
            .await?
            .into_iter()
            .next()
            .map(|state| state.status);
        let status = if self.cancel.cancelled() && last.as_deref() != Some("killed") {
            "killed"
        } else if last.as_deref() == Some("running") {
            "failure"
        } else if self.cancel.cancelled() {
            // Last state already killed.
            return Ok("killed".to_string());
        } else {
            "error"
        };
        server
            .create_jobstate(job_id, status, &format!("job {status}"))
            .await?;
        Ok(status.to_string())
    }
}

/// The topic a completed job-def effectively ran against.
fn effective_topic(jobdef: &JobDef) -> Option<String> {
    jobdef
        .job_info
        .as_ref()
        .and_then(|info| info.job.topic.as_ref())
        .map(|topic| topic.name.clone())
        .or_else(|| jobdef.topic.clone())
}

/// rc 0 with a non-empty recap.
fn evaluate(outcome: &PlaybookOutcome) -> bool {
    outcome.rc == 0 && !outcome.stats.is_empty()
}

fn confirm_components(
    jobdef: &str,
    requested: &[String],
    returned: &[Component],
) -> Result<(), StageError> {
    let mut requested: Vec<&String> = requested.iter().collect();
    requested.sort();
    let mut returned: Vec<&String> = returned.iter().map(|component| &component.id).collect();
    returned.sort();
    if requested != returned {
        return Err(StageError::ComponentMismatch(jobdef.to_string()));
    }
    Ok(())
}

fn persist_yaml<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StageError> {
    let content = serde_yaml::to_string(value)?;
    std::fs::write(path, content).map_err(io_err(path))
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
