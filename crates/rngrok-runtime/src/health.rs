//! Readiness probe against the agent's local API.
//!
//! The startup handshake finishes with one request to the discovered API
//! address; the log lines can appear slightly before the API handler is
//! actually serving.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::AgentResult;

/// Path used to confirm the agent API is serving.
pub const STATUS_PATH: &str = "/api/tunnels";

/// Single-shot readiness check against a discovered API URL.
#[async_trait]
pub trait ApiStatusProbe: Send + Sync {
    /// Returns true when the API answered with a success status. Transport
    /// failures and non-2xx responses both mean "not yet".
    async fn is_ready(&self, api_url: &str) -> bool;
}

/// Probe issuing `GET <api_url>/api/tunnels` with reqwest.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: Client,
}

impl HttpStatusProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(std::io::Error::other)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ApiStatusProbe for HttpStatusProbe {
    async fn is_ready(&self, api_url: &str) -> bool {
        let status_url = format!("{}{STATUS_PATH}", api_url.trim_end_matches('/'));

        match self.client.get(&status_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(url = %status_url, status = %response.status(), "Agent API not ready yet");
                false
            }
            Err(e) => {
                debug!(url = %status_url, error = %e, "Agent API unreachable");
                false
            }
        }
    }
}
