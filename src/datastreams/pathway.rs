//! Pathway identity and the checkpoint hash chain.
//!
//! A pathway is one logical flow of data through a pipeline. Its identity is
//! a 64-bit rolling hash advanced at every checkpoint; the context also
//! carries the pathway start time and the start of the current edge so each
//! checkpoint can report both latencies.

use super::encoding::{decode_u64_le, decode_var_u64, encode_u64_le, encode_var_u64};
use super::fnv::fnv1_64;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the epoch. Zero only if the clock reads before
/// 1970, in which case latencies degrade rather than panic.
pub fn now_sec() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathwayContext {
    pub hash: u64,
    pub pathway_start_sec: f64,
    pub current_edge_start_sec: f64,
}

/// What one checkpoint produced: the advanced hash, the hash it chained
/// from, and the two latencies to record.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointData {
    pub hash: u64,
    pub parent_hash: u64,
    pub edge_latency_sec: f64,
    pub pathway_latency_sec: f64,
}

impl PathwayContext {
    /// A fresh pathway: hash 0, both clocks starting at `now`.
    pub fn new(now_sec: f64) -> Self {
        Self {
            hash: 0,
            pathway_start_sec: now_sec,
            current_edge_start_sec: now_sec,
        }
    }

    /// Propagation wire format: `[hash LE 8][uvarint start_ms][uvarint edge_ms]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        encode_u64_le(&mut buf, self.hash);
        encode_var_u64(&mut buf, (self.pathway_start_sec * 1e3) as u64);
        encode_var_u64(&mut buf, (self.current_edge_start_sec * 1e3) as u64);
        buf
    }

    /// Decodes a propagated pathway. A malformed or truncated buffer is a
    /// defined fallback, not an error: the consumer starts a fresh pathway
    /// at `now`.
    pub fn decode(buf: &[u8], now_sec: f64) -> Self {
        match Self::try_decode(buf) {
            Some(ctx) => ctx,
            None => Self::new(now_sec),
        }
    }

    fn try_decode(buf: &[u8]) -> Option<Self> {
        let (hash, rest) = decode_u64_le(buf).ok()?;
        let (start_ms, rest) = decode_var_u64(rest).ok()?;
        let (edge_ms, _) = decode_var_u64(rest).ok()?;
        Some(Self {
            hash,
            pathway_start_sec: start_ms as f64 / 1e3,
            current_edge_start_sec: edge_ms as f64 / 1e3,
        })
    }

    /// Advances the pathway through a checkpoint: chains the hash over
    /// `(service, env, sorted tags)` and the previous hash, then restarts
    /// the edge clock at `now`.
    pub fn checkpoint(
        &mut self,
        service: &str,
        env: &str,
        tags: &[String],
        now_sec: f64,
    ) -> CheckpointData {
        let mut sorted_tags = tags.to_vec();
        sorted_tags.sort();

        let mut node = Vec::with_capacity(
            service.len() + env.len() + sorted_tags.iter().map(String::len).sum::<usize>(),
        );
        node.extend_from_slice(service.as_bytes());
        node.extend_from_slice(env.as_bytes());
        for tag in &sorted_tags {
            node.extend_from_slice(tag.as_bytes());
        }
        let node_hash = fnv1_64(&node);

        let parent_hash = self.hash;
        let mut chained = Vec::with_capacity(16);
        encode_u64_le(&mut chained, node_hash);
        encode_u64_le(&mut chained, parent_hash);
        let hash = fnv1_64(&chained);

        let edge_latency_sec = now_sec - self.current_edge_start_sec;
        let pathway_latency_sec = now_sec - self.pathway_start_sec;
        self.hash = hash;
        self.current_edge_start_sec = now_sec;

        CheckpointData {
            hash,
            parent_hash,
            edge_latency_sec,
            pathway_latency_sec,
        }
    }
}
