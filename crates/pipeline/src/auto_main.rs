// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dci-auto - launch pipelines from a change description
//!
//! Reads a description on stdin (or from a file) and launches the pipelines
//! configured in ~/.config/dci-pipeline/auto.conf for every matching
//! `Test<Name>: <args>` line.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use clap::Parser;
use dci_pipeline::auto;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dci-auto", version, about = "Launch pipelines from a change description")]
struct Cli {
    /// URL of the change (GitHub PR or Gerrit change)
    url: String,

    /// Description file (defaults to stdin)
    infile: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let description = match &cli.infile {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            let mut content = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut content) {
                eprintln!("stdin: {}", e);
                std::process::exit(1);
            }
            content
        }
    };
    let code = auto::run(&cli.url, &description, &auto::default_config_path()).await;
    std::process::exit(code);
}
