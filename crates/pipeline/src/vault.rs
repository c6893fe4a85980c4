// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External vault helper.
//!
//! Encrypted document fields are YAML scalars tagged `!vault`. Decryption is
//! delegated to a sub-process (`DCI_VAULT_CLIENT`) that reads ciphertext on
//! stdin and writes plaintext on stdout; the credentials of the owning
//! job-def are exported so the helper can derive the vault secret.

use serde_yaml::Value;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const VAULT_TAG: &str = "!vault";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("unable to run vault client {cmd}: {source}")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },
    #[error("vault client {cmd} failed: {stderr}")]
    Failed { cmd: String, stderr: String },
    #[error("vault client {cmd}: {source}")]
    Io {
        cmd: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct VaultClient {
    cmd: String,
    env: Vec<(String, String)>,
}

impl VaultClient {
    /// `env` carries the credentials the helper derives its secret from.
    pub fn new(cmd: impl Into<String>, env: Vec<(String, String)>) -> Self {
        Self {
            cmd: cmd.into(),
            env,
        }
    }

    pub fn command(&self) -> &str {
        &self.cmd
    }

    /// Decrypt one ciphertext blob.
    pub async fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let spawn_err = |source| VaultError::Spawn {
            cmd: self.cmd.clone(),
            source,
        };
        let io_err = |source| VaultError::Io {
            cmd: self.cmd.clone(),
            source,
        };

        let mut child = Command::new(&self.cmd)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(ciphertext.as_bytes())
                .await
                .map_err(io_err)?;
        }
        let output = child.wait_with_output().await.map_err(io_err)?;
        if !output.status.success() {
            return Err(VaultError::Failed {
                cmd: self.cmd.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Replace every `!vault`-tagged scalar of a tree with its plaintext.
    pub fn decrypt_tree<'a>(
        &'a self,
        value: &'a mut Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), VaultError>> + Send + 'a>> {
        Box::pin(async move {
            match value {
                Value::Tagged(tagged) if tagged.tag.to_string() == VAULT_TAG => {
                    let ciphertext = tagged.value.as_str().unwrap_or_default().to_string();
                    let plaintext = self.decrypt(&ciphertext).await?;
                    *value = Value::String(plaintext);
                }
                Value::Mapping(mapping) => {
                    for (_, slot) in mapping.iter_mut() {
                        self.decrypt_tree(slot).await?;
                    }
                }
                Value::Sequence(sequence) => {
                    for slot in sequence.iter_mut() {
                        self.decrypt_tree(slot).await?;
                    }
                }
                _ => {}
            }
            Ok(())
        })
    }
}

/// Whether a tree still holds encrypted fields.
pub fn has_vault_values(value: &Value) -> bool {
    match value {
        Value::Tagged(tagged) => tagged.tag.to_string() == VAULT_TAG,
        Value::Mapping(mapping) => mapping.iter().any(|(_, v)| has_vault_values(v)),
        Value::Sequence(sequence) => sequence.iter().any(has_vault_values),
        _ => false,
    }
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
