// ============================================================================
// Identity Lookup Client
// ============================================================================
//
// Fetches the stored credential hash and roles for a username from the
// identity backend. Used only by the login flow.
//
// "User not found" and "lookup failed" stay distinct here so operators can
// tell them apart in logs; the login handler collapses both into the same
// client-facing 401.
//
// ============================================================================

use anyhow::{Context, Result};
use axum::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::IdentityConfig;

/// Credential material for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("user not found")]
    NotFound,
    #[error("identity lookup failed: {0}")]
    Failed(String),
}

/// Source of credential records
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn lookup(&self, username: &str) -> Result<IdentityRecord, LookupError>;
}

/// Role entries arrive either as plain strings or as `{ "name": .. }` objects
#[derive(Deserialize)]
#[serde(untagged)]
enum RolePayload {
    Name(String),
    Object { name: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityPayload {
    #[serde(default)]
    username: Option<String>,
    #[serde(alias = "passwordHash", alias = "password_hash")]
    password: String,
    #[serde(default)]
    roles: Vec<RolePayload>,
}

impl IdentityPayload {
    fn into_record(self, requested: &str) -> IdentityRecord {
        IdentityRecord {
            username: self.username.unwrap_or_else(|| requested.to_string()),
            password_hash: self.password,
            roles: self
                .roles
                .into_iter()
                .map(|r| match r {
                    RolePayload::Name(name) | RolePayload::Object { name } => name,
                })
                .collect(),
        }
    }
}

/// HTTP client for the identity backend's per-user endpoint
pub struct HttpIdentityClient {
    client: reqwest::Client,
    base_url: String,
    lookup_path: String,
}

impl HttpIdentityClient {
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create identity HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            lookup_path: config.lookup_path.clone(),
        })
    }

    fn user_url(&self, username: &str) -> String {
        let path = self
            .lookup_path
            .replace("{username}", &urlencoding::encode(username));
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl IdentityLookup for HttpIdentityClient {
    async fn lookup(&self, username: &str) -> Result<IdentityRecord, LookupError> {
        let url = self.user_url(username);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LookupError::Failed("identity service timed out".to_string())
                } else {
                    LookupError::Failed(format!("transport error: {}", e))
                }
            })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(LookupError::NotFound),
            status => {
                return Err(LookupError::Failed(format!(
                    "identity service returned {}",
                    status.as_u16()
                )))
            }
        }

        let payload: IdentityPayload = response
            .json()
            .await
            .map_err(|e| LookupError::Failed(format!("undecodable identity payload: {}", e)))?;

        Ok(payload.into_record(username))
    }
}
