// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Description-driven pipeline launcher.
//!
//! Reads a change description (GitHub PR or Gerrit change text), extracts
//! `Test<Name>: <args>` lines, and launches the command configured for each
//! name in `~/.config/dci-pipeline/auto.conf` with `@URL` replaced by the
//! change URL. Commands run with the shell disabled and the argument strings
//! stripped of shell metacharacters.

use std::collections::HashMap;
use std::path::PathBuf;

/// Minimal INI reader: `[section]` headers and `key = value` lines.
pub fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            current = Some(name.trim().to_string());
            sections.entry(name.trim().to_string()).or_default();
            continue;
        }
        let (Some(section), Some((key, value))) = (&current, line.split_once('=')) else {
            continue;
        };
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    sections
}

/// Strip shell-injection characters from an argument string.
pub fn sanitize(args: &str) -> String {
    args.replace([';', '&', '|'], "").trim().to_string()
}

/// Shell-style word splitting (whitespace, single and double quotes), with
/// the shell itself kept out of the picture.
pub fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => word.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            None => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(word);
    }
    words
}

/// Extract `Test<Name>: <args>` lines. The `Test` prefix is a case-sensitive
/// literal followed by an identifier.
pub fn parse_description(description: &str) -> Vec<(String, Vec<String>)> {
    let mut pipelines: Vec<(String, Vec<String>)> = Vec::new();
    for line in description.lines() {
        let Some(rest) = line.strip_prefix("Test") else {
            continue;
        };
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            continue;
        }
        let Some(args) = rest[name.len()..].strip_prefix(':') else {
            continue;
        };
        let words = split_words(&sanitize(args));
        match pipelines.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = words,
            None => pipelines.push((name, words)),
        }
    }
    pipelines
}

/// The commands to launch for a description, `@URL` already substituted.
pub fn build_commands(
    config: &HashMap<String, HashMap<String, String>>,
    pipelines: &[(String, Vec<String>)],
    url: &str,
) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    for (name, args) in pipelines {
        let Some(cmd) = config.get(name).and_then(|section| section.get("cmd")) else {
            continue;
        };
        let mut argv = split_words(&cmd.replace("@URL", url));
        argv.extend(args.iter().cloned());
        commands.push(argv);
    }
    commands
}

pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/dci-pipeline/auto.conf")
}

/// Launch every configured pipeline for the description. Returns 0 when at
/// least one launched successfully.
pub async fn run(url: &str, description: &str, config_path: &PathBuf) -> i32 {
    let content = std::fs::read_to_string(config_path).unwrap_or_default();
    let config = parse_ini(&content);
    let pipelines = parse_description(description);
    let mut launched = 0;
    for argv in build_commands(&config, &pipelines, url) {
        eprintln!("+ {}", argv.join(" "));
        let Some((program, args)) = argv.split_first() else {
            continue;
        };
        match tokio::process::Command::new(program).args(args).status().await {
            Ok(status) if status.success() => launched += 1,
            Ok(status) => {
                tracing::error!(cmd = ?argv, code = status.code(), "pipeline launch failed");
            }
            Err(e) => {
                tracing::error!(cmd = ?argv, error = %e, "unable to launch pipeline");
            }
        }
    }
    if launched > 0 {
        0
    } else {
        1
    }
}

#[cfg(test)]
#[path = "auto_tests.rs"]
mod tests;
