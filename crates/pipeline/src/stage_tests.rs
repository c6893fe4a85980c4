// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::loader::Loader;
use crate::runner::FakePlaybook;
use dci_client::fake::{component, FakeControlServer};
use dci_core::{CancelFlag, JobState, RemoteJob};
use tempfile::TempDir;

struct FakeFactory(Arc<FakeControlServer>);

impl ServerFactory for FakeFactory {
    fn connect(&self, _auth: &AuthContext) -> Arc<dyn ControlServer> {
        Arc::clone(&self.0) as Arc<dyn ControlServer>
    }
}

struct Harness {
    dir: TempDir,
    server: Arc<FakeControlServer>,
    runner: Arc<FakePlaybook>,
    flag: Arc<CancelFlag>,
}

impl Harness {
    fn new() -> Self {
        let server = Arc::new(
            FakeControlServer::new()
                .with_topic("OCP-4.8")
                .with_topic("CNF-1"),
        );
        Self {
            dir: TempDir::new().unwrap(),
            server,
            runner: Arc::new(FakePlaybook::new()),
            flag: CancelFlag::new(),
        }
    }

    /// The standard side effects of a real playbook: jobstates posted by the
    /// callback plugin and declared output files written on disk.
    fn install_callback_hook(&self) {
        let server = Arc::clone(&self.server);
        self.runner.set_hook(move |run| {
            let job_id = run
                .env
                .iter()
                .find(|(key, _)| key == "DCI_JOB_ID")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            let mut state = server.state();
            state
                .jobstates
                .entry(job_id.clone())
                .or_default()
                .insert(
                    0,
                    JobState {
                        id: format!("cb-{job_id}"),
                        status: "running".to_string(),
                        comment: None,
                    },
                );
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.status = Some("running".to_string());
            }
            drop(state);
            // Write every declared output so later stages can copy it.
            if let Some(outputs) = run.extravars["job_info"]["outputs"].as_object() {
                for path in outputs.values().filter_map(|value| value.as_str()) {
                    let _ = std::fs::write(path, "generated-by-playbook");
                }
            }
        });
    }

    fn executor(&self) -> StageExecutor {
        let mut executor = StageExecutor::new(
            Arc::new(FakeFactory(Arc::clone(&self.server))),
            Arc::clone(&self.runner) as Arc<dyn PlaybookRunner>,
            self.flag.token(),
        );
        executor.data_bases = vec![self.dir.path().join("data")];
        executor.queue_jobid = Some("lab.4".to_string());
        executor
    }

    async fn load(&self, docs: &[(&str, &str)], extra_args: &[&str]) -> Pipeline {
        std::fs::write(
            self.dir.path().join("creds.yml"),
            "DCI_CLIENT_ID: remoteci/abc\nDCI_API_SECRET: s3cret\n",
        )
        .unwrap();
        let mut args: Vec<String> = Vec::new();
        for (name, content) in docs {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            args.push(path.display().to_string());
        }
        args.extend(extra_args.iter().map(|s| s.to_string()));
        Loader::new("cat").load(&args).await.unwrap()
    }

    fn job_by_name(&self, name: &str) -> RemoteJob {
        let state = self.server.state();
        let mut jobs: Vec<&RemoteJob> = state
            .jobs
            .values()
            .filter(|job| job.name.as_deref() == Some(name))
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        (*jobs.last().expect("job not found")).clone()
    }
}

const OCP_QUERY: &str = "and(eq(state,active),eq(type,ocp))";
const CNF_QUERY: &str = "and(eq(state,active),eq(type,cnf))";

fn two_stage_doc() -> &'static str {
    "- name: openshift-vanilla\n\
     \x20 stage: ocp\n\
     \x20 topic: OCP-4.8\n\
     \x20 components: [ocp]\n\
     \x20 ansible_playbook: agent.yml\n\
     \x20 dci_credentials: creds.yml\n\
     \x20 outputs:\n\
     \x20   kubeconfig: kubeconfig\n\
     - name: rh-cnf\n\
     \x20 stage: cnf\n\
     \x20 topic: CNF-1\n\
     \x20 components: [cnf]\n\
     \x20 ansible_playbook: agent.yml\n\
     \x20 dci_credentials: creds.yml\n\
     \x20 prev_stages: [ocp]\n\
     \x20 inputs:\n\
     \x20   kubeconfig: kubeconfig\n"
}

#[tokio::test]
async fn two_stage_pipeline_succeeds_and_chains_jobs() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    harness.server.set_components(
        CNF_QUERY,
        vec![component("c-cnf", "cnf", "cnf-1.2", "1.2", &[])],
    );

    let mut pipeline = harness.load(&[("pipeline.yml", two_stage_doc())], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;
    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(outcome.exit_code(), 0);

    // Two remote jobs, chained by previous_job_id.
    assert_eq!(harness.server.state().jobs.len(), 2);
    let first = harness.job_by_name("openshift-vanilla");
    let second = harness.job_by_name("rh-cnf");
    assert_eq!(
        second.extra["previous_job_id"].as_str(),
        Some(first.id.as_str())
    );

    // Chain tags on the second job.
    let state = harness.server.state();
    let tags = &state.job_tags[&second.id];
    assert!(tags.contains(&"cnf".to_string()));
    assert!(tags.contains(&"pipeline-id:lab.4".to_string()));
    assert!(tags.contains(&format!("prev-job:{}", first.id)));
    assert!(tags.contains(&"prev-component:ocp:OCP-4.8/ocp-4.8.30".to_string()));
    // Both attached to the same pipeline record.
    assert_eq!(state.pipelines.len(), 1);
    assert_eq!(
        first.extra["pipeline_id"].as_str(),
        second.extra["pipeline_id"].as_str()
    );
}

#[tokio::test]
async fn outputs_flow_into_next_stage_inputs() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    harness.server.set_components(
        CNF_QUERY,
        vec![component("c-cnf", "cnf", "cnf-1.2", "1.2", &[])],
    );

    let mut pipeline = harness.load(&[("pipeline.yml", two_stage_doc())], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;
    assert_eq!(outcome, RunOutcome::Success);

    // The second run got the copied input path bound under the input key.
    let runs = harness.runner.runs();
    assert_eq!(runs.len(), 2);
    let bound = runs[1].extravars["kubeconfig"].as_str().unwrap();
    assert!(bound.ends_with("inputs/kubeconfig"));
    assert_eq!(
        std::fs::read_to_string(bound).unwrap(),
        "generated-by-playbook"
    );
    // And the data dir got the persisted records.
    let info = pipeline.jobdefs[1].job_info.as_ref().unwrap();
    assert!(info.data_dir.join("job_info.yaml").exists());
    assert!(info.data_dir.join("jobdef.yaml").exists());
}

#[tokio::test]
async fn fallback_retries_with_last_success_components() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-new", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    harness.server.set_components(
        "and(eq(state,active),eq(type,ocp),\
         or(contains(tags,build:candidate),contains(tags,build:ga)))",
        vec![component(
            "c-good",
            "ocp",
            "ocp-4.8.22",
            "4.8.22",
            &["build:candidate"],
        )],
    );
    harness.runner.push_outcome(PlaybookOutcome::failure(1));

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               \x20 fallback_last_success: ['build:candidate']\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;
    assert_eq!(outcome, RunOutcome::Success);

    let jobdef = &pipeline.jobdefs[0];
    let failed = jobdef.failed_job_info.as_ref().unwrap();
    let retried = jobdef.job_info.as_ref().unwrap();
    assert_ne!(failed.job.id, retried.job.id);
    assert_eq!(failed.rc, Some(1));
    assert_eq!(retried.rc, Some(0));
    assert_eq!(
        retried.job.components[0].version.as_deref(),
        Some("4.8.22")
    );

    let state = harness.server.state();
    assert!(state.job_tags[&retried.job.id].contains(&"fallback".to_string()));
    assert!(!state.job_tags[&failed.job.id].contains(&"fallback".to_string()));
}

#[tokio::test]
async fn fallback_skipped_when_candidates_have_same_versions() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-new", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    harness.server.set_components(
        "and(eq(state,active),eq(type,ocp),\
         or(contains(tags,build:candidate),contains(tags,build:ga)))",
        vec![component(
            "c-same",
            "ocp",
            "ocp-4.8.30",
            "4.8.30",
            &["build:candidate"],
        )],
    );
    harness.runner.push_outcome(PlaybookOutcome::failure(1));

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               \x20 fallback_last_success: ['build:candidate']\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;
    // No retry: one job only, pipeline fails.
    assert_eq!(outcome, RunOutcome::JobFailure);
    assert_eq!(harness.server.state().jobs.len(), 1);
    assert_eq!(harness.runner.runs().len(), 1);
}

#[tokio::test]
async fn fixed_components_disable_fallback() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        "and(eq(state,active),eq(type,ocp),eq(version,4.8.0))",
        vec![component("c-pin", "ocp", "ocp-4.8.0", "4.8.0", &[])],
    );
    harness.runner.push_outcome(PlaybookOutcome::failure(1));

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp=4.8.0]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               \x20 fallback_last_success: ['build:candidate']\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;

    assert_eq!(outcome, RunOutcome::JobFailure);
    assert_eq!(outcome.exit_code(), 1);
    // One attempt only, finalized as failure (the job was running).
    assert_eq!(harness.runner.runs().len(), 1);
    let job = harness.job_by_name("openshift-vanilla");
    let state = harness.server.state();
    assert_eq!(state.jobstates[&job.id][0].status, "failure");
}

#[tokio::test]
async fn cancellation_kills_the_job_and_maps_the_exit_code() {
    let harness = Harness::new();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    // SIGTERM arrives while the playbook is running; the child observes it
    // and comes back dead.
    let flag = Arc::clone(&harness.flag);
    let server = Arc::clone(&harness.server);
    harness.runner.set_hook(move |run| {
        flag.record(15);
        let job_id = run
            .env
            .iter()
            .find(|(key, _)| key == "DCI_JOB_ID")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        server
            .state()
            .jobstates
            .entry(job_id)
            .or_default()
            .insert(
                0,
                JobState {
                    id: "cb-running".to_string(),
                    status: "running".to_string(),
                    comment: None,
                },
            );
    });
    harness.runner.push_outcome(PlaybookOutcome {
        rc: 143,
        stats: Default::default(),
    });

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;

    assert_eq!(outcome, RunOutcome::Cancelled(15));
    assert_eq!(outcome.exit_code(), 143);
    let job = harness.job_by_name("openshift-vanilla");
    let state = harness.server.state();
    assert_eq!(state.jobstates[&job.id][0].status, "killed");
}

#[tokio::test]
async fn cancellation_during_fallback_retry_maps_to_the_signal() {
    let harness = Harness::new();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-new", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    harness.server.set_components(
        "and(eq(state,active),eq(type,ocp),\
         or(contains(tags,build:candidate),contains(tags,build:ga)))",
        vec![component(
            "c-good",
            "ocp",
            "ocp-4.8.22",
            "4.8.22",
            &["build:candidate"],
        )],
    );

    // The first attempt fails on its own; SIGTERM arrives while the fallback
    // retry is running.
    let flag = Arc::clone(&harness.flag);
    let server = Arc::clone(&harness.server);
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    harness.runner.set_hook(move |run| {
        let attempt = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if attempt == 1 {
            flag.record(15);
        }
        let job_id = run
            .env
            .iter()
            .find(|(key, _)| key == "DCI_JOB_ID")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        server
            .state()
            .jobstates
            .entry(job_id)
            .or_default()
            .insert(
                0,
                JobState {
                    id: format!("cb-{attempt}"),
                    status: "running".to_string(),
                    comment: None,
                },
            );
    });
    harness.runner.push_outcome(PlaybookOutcome::failure(1));
    harness.runner.push_outcome(PlaybookOutcome {
        rc: 143,
        stats: Default::default(),
    });

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               \x20 fallback_last_success: ['build:candidate']\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;

    // The killed retry wins over the second-failure-is-an-error rule.
    assert_eq!(outcome, RunOutcome::Cancelled(15));
    assert_eq!(outcome.exit_code(), 143);
    assert_eq!(harness.runner.runs().len(), 2);

    let retried = pipeline.jobdefs[0].job_info.as_ref().unwrap();
    let state = harness.server.state();
    assert_eq!(state.jobstates[&retried.job.id][0].status, "killed");
}

#[tokio::test]
async fn unresolvable_component_makes_jobdef_unschedulable() {
    let harness = Harness::new();
    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;
    assert_eq!(outcome, RunOutcome::JobFailure);
    // Nothing was created remotely and no playbook ran.
    assert!(harness.server.state().jobs.is_empty());
    assert!(harness.runner.runs().is_empty());
}

#[tokio::test]
async fn failing_jobdef_does_not_stop_its_own_stage() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    // First job-def of the stage fails, the second must still run.
    harness.runner.push_outcome(PlaybookOutcome::failure(1));
    harness.runner.push_outcome(PlaybookOutcome::success());

    let doc = "- name: first\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               - name: second\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;

    assert_eq!(outcome, RunOutcome::JobFailure);
    assert_eq!(harness.runner.runs().len(), 2);
    assert!(pipeline.jobdefs[1].job_info.as_ref().unwrap().succeeded());
}

#[tokio::test]
async fn use_previous_topic_inherits_the_topic() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    harness.server.set_components(
        CNF_QUERY,
        vec![component("c-cnf", "cnf", "cnf-1.2", "1.2", &[])],
    );

    let doc = "- name: base\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               - name: follow\n\
               \x20 stage: cnf\n\
               \x20 components: [cnf]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               \x20 prev_stages: [ocp]\n\
               \x20 use_previous_topic: true\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;
    assert_eq!(outcome, RunOutcome::Success);

    let follow = harness.job_by_name("follow");
    assert_eq!(follow.topic.as_ref().unwrap().name, "OCP-4.8");
}

#[tokio::test]
async fn inventory_playbook_failure_aborts_the_jobdef() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );
    // The inventory playbook runs first and fails.
    harness.runner.push_outcome(PlaybookOutcome::failure(2));

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 inventory_playbook: inventory.yml\n\
               \x20 dci_credentials: creds.yml\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;

    assert_eq!(outcome, RunOutcome::JobFailure);
    // Only the inventory playbook ran.
    let runs = harness.runner.runs();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].playbook.ends_with("inventory.yml"));
}

#[tokio::test]
async fn junit_defaults_and_tmpdirs_are_injected() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    harness.executor().run_pipeline(&mut pipeline).await;

    let runs = harness.runner.runs();
    let env: std::collections::HashMap<_, _> = runs[0].env.iter().cloned().collect();
    assert_eq!(env.get("JUNIT_TEST_CASE_PREFIX").map(String::as_str), Some("test_"));
    assert_eq!(env.get("JUNIT_TASK_CLASS").map(String::as_str), Some("yes"));
    // The placeholder became a real directory.
    let junit_dir = env.get("JUNIT_OUTPUT_DIR").unwrap();
    assert_ne!(junit_dir, "/@tmpdir");
    assert_eq!(env.get("DCI_CLIENT_ID").map(String::as_str), Some("remoteci/abc"));
    assert!(env.contains_key("DCI_JOB_ID"));
    assert!(env.contains_key("ANSIBLE_VAULT_IDENTITY_LIST"));
}

#[tokio::test]
async fn success_tag_lands_on_components() {
    let harness = Harness::new();
    harness.install_callback_hook();
    harness.server.set_components(
        OCP_QUERY,
        vec![component("c-ocp", "ocp", "ocp-4.8.30", "4.8.30", &[])],
    );

    let doc = "- name: openshift-vanilla\n\
               \x20 stage: ocp\n\
               \x20 topic: OCP-4.8\n\
               \x20 components: [ocp]\n\
               \x20 ansible_playbook: agent.yml\n\
               \x20 dci_credentials: creds.yml\n\
               \x20 success_tag: ocp-vanilla-4.8-ok\n";
    let mut pipeline = harness.load(&[("pipeline.yml", doc)], &[]).await;
    let outcome = harness.executor().run_pipeline(&mut pipeline).await;
    assert_eq!(outcome, RunOutcome::Success);

    let state = harness.server.state();
    assert_eq!(
        state.component_tags["c-ocp"],
        vec!["ocp-vanilla-4.8-ok".to_string()]
    );
}
