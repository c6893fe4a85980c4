// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline document loading.
//!
//! Each document is an ordered list of job-def mappings. Loading is a
//! two-pass affair: the first parse leaves `!vault` scalars opaque so the
//! credentials file can be located, then the vault helper (seeded with those
//! credentials) decrypts the rest. Consecutive same-named job-defs merge so
//! an overlay document can extend a base one, and command-line overrides are
//! applied last, at the tree level.

use crate::overrides::{process_args, Override, OverrideError, PipelineOptions};
use crate::vault::{has_vault_values, VaultClient, VaultError};
use dci_client::{ClientError, RemoteCiCredentials};
use dci_core::merge::{deep_merge, overload};
use dci_core::{JobDef, JobDefError};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{0}: a pipeline document must be a list of job-defs")]
    NotASequence(PathBuf),
    #[error("{0}: document has vault-encrypted fields but no job-def declares dci_credentials")]
    MissingVaultCredentials(PathBuf),
    #[error(transparent)]
    Override(#[from] OverrideError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Credentials(#[from] ClientError),
    #[error(transparent)]
    JobDef(#[from] JobDefError),
    #[error("no job-def named {0} to apply the override to")]
    UnknownJobDef(String),
}

/// A loaded, merged, validated pipeline.
#[derive(Debug)]
pub struct Pipeline {
    pub jobdefs: Vec<JobDef>,
    pub options: PipelineOptions,
}

#[derive(Debug, Clone)]
pub struct Loader {
    vault_cmd: String,
}

impl Loader {
    pub fn new(vault_cmd: impl Into<String>) -> Self {
        Self {
            vault_cmd: vault_cmd.into(),
        }
    }

    /// Load a full pipeline from command-line arguments (overrides mixed
    /// with document paths).
    pub async fn load(&self, args: &[String]) -> Result<Pipeline, LoadError> {
        let (overrides, files, options) = process_args(args)?;

        let mut entries: Vec<(PathBuf, Value)> = Vec::new();
        for file in &files {
            entries.extend(self.load_document(file).await?);
        }
        let entries = merge_consecutive(entries);
        let entries = apply_overrides(entries, &overrides)?;

        let mut jobdefs = Vec::with_capacity(entries.len());
        for (doc_dir, value) in &entries {
            jobdefs.push(JobDef::from_value(value, doc_dir)?);
        }
        tracing::info!(
            jobdefs = jobdefs.len(),
            pipeline = %options.name,
            "pipeline loaded"
        );
        Ok(Pipeline { jobdefs, options })
    }

    /// Parse one document into (doc dir, job-def tree) entries, decrypting
    /// vault fields when present.
    async fn load_document(&self, path: &Path) -> Result<Vec<(PathBuf, Value)>, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: Value = serde_yaml::from_str(&content).map_err(|source| LoadError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        let Value::Sequence(jobdefs) = doc else {
            return Err(LoadError::NotASequence(path.to_path_buf()));
        };
        let doc_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let mut entries: Vec<(PathBuf, Value)> = jobdefs
            .into_iter()
            .map(|jobdef| (doc_dir.clone(), jobdef))
            .collect();

        if entries.iter().any(|(_, value)| has_vault_values(value)) {
            let vault = self.vault_for(&entries, path, &doc_dir)?;
            for (_, value) in entries.iter_mut() {
                vault.decrypt_tree(value).await?;
            }
        }
        Ok(entries)
    }

    /// Build the vault helper from the first job-def declaring credentials.
    fn vault_for(
        &self,
        entries: &[(PathBuf, Value)],
        path: &Path,
        doc_dir: &Path,
    ) -> Result<VaultClient, LoadError> {
        let credentials_path = entries
            .iter()
            .find_map(|(_, value)| value.get("dci_credentials").and_then(Value::as_str))
            .ok_or_else(|| LoadError::MissingVaultCredentials(path.to_path_buf()))?;
        let credentials_path = if Path::new(credentials_path).is_absolute() {
            PathBuf::from(credentials_path)
        } else {
            doc_dir.join(credentials_path)
        };
        let credentials = RemoteCiCredentials::from_file(&credentials_path)?;
        Ok(VaultClient::new(&self.vault_cmd, credentials.to_env()))
    }
}

/// Merge consecutive same-named job-defs: the overlay disappears into the
/// base (lists concatenate, maps deep-update, scalars last-wins).
fn merge_consecutive(entries: Vec<(PathBuf, Value)>) -> Vec<(PathBuf, Value)> {
    let mut merged: Vec<(PathBuf, Value)> = Vec::with_capacity(entries.len());
    for (doc_dir, value) in entries {
        let name = value.get("name").and_then(Value::as_str).map(str::to_string);
        let same_name = merged.last().is_some_and(|(_, last)| {
            name.is_some() && last.get("name").and_then(Value::as_str) == name.as_deref()
        });
        if same_name {
            if let Some((_, last)) = merged.last_mut() {
                deep_merge(last, value);
                continue;
            }
        }
        merged.push((doc_dir, value));
    }
    merged
}

fn apply_overrides(
    mut entries: Vec<(PathBuf, Value)>,
    overrides: &[Override],
) -> Result<Vec<(PathBuf, Value)>, LoadError> {
    for override_ in overrides {
        let slot = entries.iter_mut().find(|(_, value)| {
            value.get("name").and_then(Value::as_str) == Some(override_.jobdef.as_str())
        });
        let Some((_, value)) = slot else {
            return Err(LoadError::UnknownJobDef(override_.jobdef.clone()));
        };
        if let Value::Mapping(mapping) = value {
            overload(mapping, &override_.as_mapping());
        }
    }
    Ok(entries)
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
