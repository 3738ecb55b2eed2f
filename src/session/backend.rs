use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Short-lived credential for the relay connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    pub token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletedSession<'a> {
    session_id: &'a str,
}

/// The product backend, called once at session start and once at the end
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Fetch the credential presented to the relay
    async fn credential(&self) -> Result<Option<SessionCredential>>;

    /// Record a completed session
    async fn persist(&self, session_id: &str) -> Result<()>;
}

/// Backend reached over HTTP
pub struct HttpSessionBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("interview-voice/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn credential(&self) -> Result<Option<SessionCredential>> {
        let url = format!("{}/session/credential", self.base_url);
        debug!("Requesting session credential from {}", url);

        let credential: SessionCredential = self
            .client
            .post(&url)
            .send()
            .await
            .context("Credential endpoint unreachable")?
            .error_for_status()
            .context("Credential endpoint refused")?
            .json()
            .await
            .context("Malformed credential response")?;

        info!("Obtained session credential (expires in {}s)", credential.expires_in);
        Ok(Some(credential))
    }

    async fn persist(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/session/complete", self.base_url);

        self.client
            .post(&url)
            .json(&CompletedSession { session_id })
            .send()
            .await
            .context("Persist endpoint unreachable")?
            .error_for_status()
            .context("Persist endpoint refused")?;

        info!("Session {} recorded", session_id);
        Ok(())
    }
}

/// Backend for local runs: no credential, nothing persisted
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

#[async_trait]
impl SessionBackend for NoopBackend {
    async fn credential(&self) -> Result<Option<SessionCredential>> {
        Ok(None)
    }

    async fn persist(&self, session_id: &str) -> Result<()> {
        debug!("Not persisting {} (no backend configured)", session_id);
        Ok(())
    }
}
