// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dci-pipeline - run a multi-stage pipeline of automation playbooks

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use dci_pipeline::stage::HttpServerFactory;
use dci_pipeline::{env, AnsiblePlaybook, Loader, StageExecutor};
use dci_core::CancelFlag;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

const USAGE: &str = "Usage: dci-pipeline [<jobdef>:<key>=<value>...] [<pipeline.yml>...]

Overrides use the job-def name, a key and a value; the pseudo-name
@pipeline sets pipeline-level options (name, pipeline_id). Remaining
arguments are pipeline documents processed in order.";

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{USAGE}");
        return;
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("dci-pipeline {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    setup_logging();
    let flag = CancelFlag::new();
    install_signal_handlers(&flag);

    let loader = Loader::new(env::vault_client());
    let mut pipeline = match loader.load(&args).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };
    if pipeline.jobdefs.is_empty() {
        eprintln!("no job-def to run");
        eprintln!("{USAGE}");
        std::process::exit(1);
    }

    let mut executor = StageExecutor::new(
        Arc::new(HttpServerFactory),
        Arc::new(AnsiblePlaybook),
        flag.token(),
    );
    executor.verbosity = env::verbose_level();
    executor.queue_jobid = env::queue_jobid();
    executor.data_bases = env::data_dir_bases();
    executor.ansible_dir = env::ansible_dir();
    executor.vault_cmd = env::vault_client();

    let outcome = executor.run_pipeline(&mut pipeline).await;
    std::process::exit(outcome.exit_code());
}

/// Record the first TERM or INT so every component can wind down.
fn install_signal_handlers(flag: &Arc<CancelFlag>) {
    for (kind, signo) in [
        (SignalKind::terminate(), libc::SIGTERM),
        (SignalKind::interrupt(), libc::SIGINT),
    ] {
        match signal(kind) {
            Ok(mut stream) => {
                let flag = Arc::clone(flag);
                tokio::spawn(async move {
                    if stream.recv().await.is_some() {
                        tracing::info!(signo, "termination signal received");
                        flag.record(signo);
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "unable to install signal handler"),
        }
    }
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = env::log_level().unwrap_or_else(|| "info".to_string());
    let filter =
        EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
