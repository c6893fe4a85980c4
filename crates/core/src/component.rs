// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Component expressions as written in pipeline documents.
//!
//! Four forms are accepted:
//!   `ocp`                                  — newest active component of a type
//!   `ocp=4.8.0`                            — pinned to one version
//!   `ocp?version:4.8*&tags:build:dev`      — server-side field query
//!   `{type: ocp, priority_tags: [...], max_age: 3}` — ordered tag preference

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComponentExprError {
    #[error("empty component expression")]
    Empty,
    #[error("component mapping without a `type` key: {0}")]
    MissingType(String),
    #[error("unsupported component expression: {0}")]
    Unsupported(String),
}

/// One entry of a job-def `components` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentExpr {
    /// Bare type name.
    Bare(String),
    /// `type=version`, excluded from fallback retries.
    Pinned { ctype: String, version: String },
    /// `type?clause&clause...` with raw `field:value` clauses.
    Query { ctype: String, clauses: Vec<String> },
    /// Structured mapping form.
    Structured {
        ctype: String,
        priority_tags: Vec<String>,
        max_age: Option<i64>,
    },
}

impl ComponentExpr {
    /// Parse the string forms (`T`, `T=V`, `T?...`).
    pub fn parse_str(expr: &str) -> Result<Self, ComponentExprError> {
        if expr.is_empty() {
            return Err(ComponentExprError::Empty);
        }
        if let Some((ctype, query)) = expr.split_once('?') {
            return Ok(ComponentExpr::Query {
                ctype: ctype.to_string(),
                clauses: query.split('&').map(str::to_string).collect(),
            });
        }
        if let Some((ctype, version)) = expr.split_once('=') {
            return Ok(ComponentExpr::Pinned {
                ctype: ctype.to_string(),
                version: version.to_string(),
            });
        }
        Ok(ComponentExpr::Bare(expr.to_string()))
    }

    /// Parse any document value: strings or the structured mapping form.
    pub fn parse(value: &serde_yaml::Value) -> Result<Self, ComponentExprError> {
        match value {
            serde_yaml::Value::String(s) => Self::parse_str(s),
            serde_yaml::Value::Mapping(m) => {
                let ctype = m
                    .get("type")
                    .and_then(serde_yaml::Value::as_str)
                    .ok_or_else(|| {
                        ComponentExprError::MissingType(format!("{:?}", m))
                    })?
                    .to_string();
                let priority_tags = m
                    .get("priority_tags")
                    .and_then(serde_yaml::Value::as_sequence)
                    .map(|seq| {
                        seq.iter()
                            .filter_map(serde_yaml::Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let max_age = m.get("max_age").and_then(serde_yaml::Value::as_i64);
                Ok(ComponentExpr::Structured {
                    ctype,
                    priority_tags,
                    max_age,
                })
            }
            other => Err(ComponentExprError::Unsupported(format!("{:?}", other))),
        }
    }

    /// The component type this expression selects.
    pub fn component_type(&self) -> &str {
        match self {
            ComponentExpr::Bare(t) => t,
            ComponentExpr::Pinned { ctype, .. }
            | ComponentExpr::Query { ctype, .. }
            | ComponentExpr::Structured { ctype, .. } => ctype,
        }
    }

    /// Pinned expressions select exactly one version; a job-def made only of
    /// these is "fixed-component" and never retried with fallback tags.
    pub fn is_pinned(&self) -> bool {
        matches!(self, ComponentExpr::Pinned { .. })
    }
}

impl fmt::Display for ComponentExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentExpr::Bare(t) => write!(f, "{}", t),
            ComponentExpr::Pinned { ctype, version } => write!(f, "{}={}", ctype, version),
            ComponentExpr::Query { ctype, clauses } => {
                write!(f, "{}?{}", ctype, clauses.join("&"))
            }
            ComponentExpr::Structured { ctype, .. } => write!(f, "{}", ctype),
        }
    }
}

#[cfg(test)]
#[path = "component_tests.rs"]
mod tests;
