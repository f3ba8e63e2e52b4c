//! Shared test helpers: a scripted stats transport for exercising the flush
//! pipeline without a collector.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::datastreams::transport::{StatsResponse, StatsTransport};
use crate::error::TransportError;

/// A transport that records every submitted payload and answers from a
/// script of canned outcomes. Once the script is exhausted it keeps
/// returning 200.
pub struct MockTransport {
    script: Mutex<VecDeque<Result<StatsResponse, TransportError>>>,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::new()
    }

    pub fn respond_with(self, status: u16) -> Self {
        self.push_response(status);
        self
    }

    pub fn push_response(&self, status: u16) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(StatsResponse {
                status,
                reason: String::new(),
            }));
    }

    pub fn push_failure(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Number of send attempts observed, including failed ones.
    pub fn attempts(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    /// Payloads from attempts, gzip-compressed exactly as submitted.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsTransport for MockTransport {
    async fn send_stats(&self, body: Vec<u8>) -> Result<StatsResponse, TransportError> {
        self.payloads.lock().unwrap().push(body);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(StatsResponse {
                status: 200,
                reason: String::new(),
            }))
    }

    fn endpoint(&self) -> &str {
        "mock://collector"
    }
}
