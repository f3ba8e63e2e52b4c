//! Collector boundary: one POST per flush attempt.
//!
//! The trait seam exists so tests inject a scripted transport; the real
//! implementation posts the compressed msgpack body to the agent's pipeline
//! stats endpoint. Connection and timeout failures map to transport errors
//! the retry policy treats as transient; an HTTP response, whatever its
//! status, is never retried.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::TransportError;

pub const STATS_ENDPOINT: &str = "/v0.1/pipeline_stats";

#[derive(Debug, Clone)]
pub struct StatsResponse {
    pub status: u16,
    /// Response text, kept for error logging on rejected payloads.
    pub reason: String,
}

impl StatsResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

#[async_trait]
pub trait StatsTransport: Send + Sync {
    async fn send_stats(&self, body: Vec<u8>) -> Result<StatsResponse, TransportError>;

    /// Where payloads go, for log context.
    fn endpoint(&self) -> &str;
}

pub struct AgentTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl AgentTransport {
    pub fn new(agent_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let endpoint = format!("{}{}", agent_url.trim_end_matches('/'), STATS_ENDPOINT);
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl StatsTransport for AgentTransport {
    async fn send_stats(&self, body: Vec<u8>) -> Result<StatsResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Datadog-Meta-Lang", "rust")
            .header("Datadog-Meta-Tracer-Version", env!("CARGO_PKG_VERSION"))
            .header("Content-Type", "application/msgpack")
            .header("Content-Encoding", "gzip")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::ConnectionFailed(e.to_string())
                } else {
                    TransportError::SendFailed(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let reason = response.text().await.unwrap_or_default();
        Ok(StatsResponse { status, reason })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
