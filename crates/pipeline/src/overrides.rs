// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line overrides: `<name>:<key>=<value>` arguments.
//!
//! Values are parsed as JSON first, then as the compact `k:v` / `v,v` forms.
//! The pseudo-name `@pipeline` assigns pipeline-level options; any other
//! leading-`@` name is rejected.

use serde_yaml::{Mapping, Value};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("invalid pipeline-level name @{0} (only @pipeline is recognized)")]
    InvalidAtName(String),
    #[error("invalid @pipeline option {0}")]
    InvalidPipelineOption(String),
}

/// Options attached to the pipeline itself rather than a job-def.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub name: String,
    pub pipeline_id: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            pipeline_id: None,
        }
    }
}

/// One `<name>:<key>=<value>` argument, value already parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub jobdef: String,
    pub key: String,
    pub value: Value,
}

impl Override {
    /// The single-key mapping this override merges into its job-def.
    pub fn as_mapping(&self) -> Mapping {
        let mut mapping = Mapping::new();
        mapping.insert(Value::String(self.key.clone()), self.value.clone());
        mapping
    }
}

/// Split the command line into overrides, document paths and pipeline-level
/// options. Arguments look like `jobdef:key=value` or are file paths.
pub fn process_args(
    args: &[String],
) -> Result<(Vec<Override>, Vec<PathBuf>, PipelineOptions), OverrideError> {
    let mut overrides = Vec::new();
    let mut files = Vec::new();
    let mut options = PipelineOptions::default();

    for arg in args {
        let Some((name, rest)) = split_override(arg) else {
            files.push(PathBuf::from(arg));
            continue;
        };
        let (key, raw_value) = rest;
        if let Some(at_name) = name.strip_prefix('@') {
            if at_name != "pipeline" {
                return Err(OverrideError::InvalidAtName(at_name.to_string()));
            }
            match key.as_str() {
                "name" => options.name = raw_value.clone(),
                "pipeline_id" => options.pipeline_id = Some(raw_value.clone()),
                other => return Err(OverrideError::InvalidPipelineOption(other.to_string())),
            }
            continue;
        }
        overrides.push(Override {
            jobdef: name,
            key,
            value: parse_value(&raw_value),
        });
    }
    Ok((overrides, files, options))
}

/// `name:key=value` → (name, (key, value)). Anything else is a file path.
fn split_override(arg: &str) -> Option<(String, (String, String))> {
    let (head, value) = arg.split_once('=')?;
    let (name, key) = head.split_once(':')?;
    if name.is_empty() || key.is_empty() {
        return None;
    }
    Some((name.to_string(), (key.to_string(), value.to_string())))
}

/// Parse an override value.
///
/// URLs stay strings; JSON is accepted verbatim; `k:v` becomes a mapping,
/// `k:v,v` a mapping of a list, `v,v` a list (a trailing comma forces a
/// one-element list); everything else is a string.
pub fn parse_value(text: &str) -> Value {
    if text.starts_with("http://") || text.starts_with("https://") {
        return Value::String(text.to_string());
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
        if let Ok(value) = serde_yaml::to_value(&json) {
            return value;
        }
    }
    if let Some((key, rest)) = text.split_once(':') {
        let mut mapping = Mapping::new();
        mapping.insert(Value::String(key.to_string()), parse_commas(rest));
        return Value::Mapping(mapping);
    }
    parse_commas(text)
}

fn parse_commas(text: &str) -> Value {
    if !text.contains(',') {
        return Value::String(text.to_string());
    }
    Value::Sequence(
        text.split(',')
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect(),
    )
}

#[cfg(test)]
#[path = "overrides_tests.rs"]
mod tests;
