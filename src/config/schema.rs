use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tracer settings: service identity for checkpoint hashing and the flush
/// pipeline's collector endpoint and cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_agent_url")]
    pub agent_url: String,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: default_service(),
            env: default_env(),
            version: None,
            agent_url: default_agent_url(),
            flush_interval_secs: default_flush_interval(),
            request_timeout_secs: default_request_timeout(),
            retry_attempts: default_retry_attempts(),
            enabled: default_enabled(),
        }
    }
}

// Default value functions
fn default_service() -> String {
    "unnamed-rust-service".to_string()
}

fn default_env() -> String {
    "none".to_string()
}

fn default_agent_url() -> String {
    "http://localhost:8126".to_string()
}

fn default_flush_interval() -> f64 {
    10.0
}

fn default_request_timeout() -> f64 {
    1.0
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

impl Config {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs_f64(self.flush_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    /// Bucket windows match the flush cadence so every tick drains whole
    /// windows.
    pub fn bucket_size_ns(&self) -> u64 {
        (self.flush_interval_secs * 1e9) as u64
    }
}
