// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication contexts.
//!
//! Remoteci-owned operations (creating jobs, attaching files) authenticate
//! with a signature: the client id travels in a header and every request is
//! HMAC-SHA256-signed with the API secret. Component listing on behalf of a
//! pipeline user authenticates with HTTP basic.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_CS_URL: &str = "https://api.distributed-ci.io";

fn default_cs_url() -> String {
    DEFAULT_CS_URL.to_string()
}

/// Contents of a `dci_credentials.yml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCiCredentials {
    #[serde(rename = "DCI_CLIENT_ID")]
    pub client_id: String,
    #[serde(rename = "DCI_API_SECRET")]
    pub api_secret: String,
    #[serde(rename = "DCI_CS_URL", default = "default_cs_url")]
    pub cs_url: String,
}

impl RemoteCiCredentials {
    pub fn from_file(path: &Path) -> Result<Self, crate::api::ClientError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| crate::api::ClientError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content).map_err(|source| crate::api::ClientError::Credentials {
            path: path.to_path_buf(),
            message: source.to_string(),
        })
    }

    /// The variables a playbook child needs to call the API itself.
    pub fn to_env(&self) -> Vec<(String, String)> {
        vec![
            ("DCI_CLIENT_ID".to_string(), self.client_id.clone()),
            ("DCI_API_SECRET".to_string(), self.api_secret.clone()),
            ("DCI_CS_URL".to_string(), self.cs_url.clone()),
        ]
    }
}

/// Contents of a pipeline-user credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineUserCredentials {
    #[serde(rename = "DCI_LOGIN")]
    pub login: String,
    #[serde(rename = "DCI_PASSWORD")]
    pub password: String,
    #[serde(rename = "DCI_CS_URL", default = "default_cs_url")]
    pub cs_url: String,
}

impl PipelineUserCredentials {
    pub fn from_file(path: &Path) -> Result<Self, crate::api::ClientError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| crate::api::ClientError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content).map_err(|source| crate::api::ClientError::Credentials {
            path: path.to_path_buf(),
            message: source.to_string(),
        })
    }
}

/// How a client signs its requests.
#[derive(Debug, Clone)]
pub enum AuthContext {
    Signature(RemoteCiCredentials),
    Basic(PipelineUserCredentials),
}

impl AuthContext {
    pub fn cs_url(&self) -> &str {
        match self {
            AuthContext::Signature(creds) => &creds.cs_url,
            AuthContext::Basic(creds) => &creds.cs_url,
        }
    }

    /// Apply authentication to a request.
    pub fn apply(
        &self,
        builder: reqwest::RequestBuilder,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> reqwest::RequestBuilder {
        match self {
            AuthContext::Signature(creds) => {
                let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
                let signature = sign(&creds.api_secret, method, path, &timestamp, body);
                builder
                    .header("DCI-Client-ID", &creds.client_id)
                    .header("DCI-Datetime", timestamp)
                    .header("DCI-Auth-Signature", signature)
            }
            AuthContext::Basic(creds) => {
                builder.basic_auth(&creds.login, Some(&creds.password))
            }
        }
    }
}

/// HMAC-SHA256 over `method\npath\ntimestamp\nsha256(body)`, hex encoded.
pub fn sign(secret: &str, method: &str, path: &str, timestamp: &str, body: &[u8]) -> String {
    let payload_hash = hex(&Sha256::digest(body));
    let message = format!("{method}\n{path}\n{timestamp}\n{payload_hash}");
    // An HMAC accepts keys of any length.
    #[allow(clippy::expect_used)]
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    hex(&mac.finalize().into_bytes())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
