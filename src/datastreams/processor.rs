//! Time-bucketed stats aggregation and the periodic flush service.
//!
//! Checkpoint latencies and Kafka-style offsets land in the bucket whose
//! window contains their timestamp; a background task drains whole buckets
//! every flush interval, msgpack-encodes and gzips them, and submits the
//! payload with bounded retries. Ingestion only ever contends on the bucket
//! mutex, never on network I/O.

use flate2::write::GzEncoder;
use flate2::Compression;
use sketches_ddsketch::{Config as SketchConfig, DDSketch};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::pathway::{now_sec, PathwayContext};
use super::payload::{BacklogPayload, PathwayStatsPayload, StatsBucketPayload, StatsPayload};
use super::transport::{AgentTransport, StatsResponse, StatsTransport};
use crate::config::Config;
use crate::error::Result;

const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY_MS: u64 = 2_000;

// Relative-error bound and bin cap for the latency summaries. The sketch
// itself is an opaque mergeable statistic; only its error bound is part of
// the contract.
const SKETCH_RELATIVE_ACCURACY: f64 = 0.00775;
const SKETCH_MAX_BINS: u32 = 2_048;
const SKETCH_MIN_VALUE: f64 = 1.0e-9;

/// Aggregation key for pathway stats: joined sorted tags, hash, parent hash.
pub type PathwayAggrKey = (String, u64, u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerPartitionKey {
    pub group: String,
    pub topic: String,
    pub partition: i32,
}

/// Aggregated latency summaries for one pathway edge.
pub struct PathwayStats {
    pub pathway_latency: DDSketch,
    pub edge_latency: DDSketch,
}

fn new_sketch() -> DDSketch {
    DDSketch::new(SketchConfig::new(
        SKETCH_RELATIVE_ACCURACY,
        SKETCH_MAX_BINS,
        SKETCH_MIN_VALUE,
    ))
}

impl Default for PathwayStats {
    fn default() -> Self {
        Self {
            pathway_latency: new_sketch(),
            edge_latency: new_sketch(),
        }
    }
}

#[derive(Default)]
pub struct Bucket {
    pub pathway_stats: HashMap<PathwayAggrKey, PathwayStats>,
    pub latest_produce_offsets: HashMap<PartitionKey, i64>,
    pub latest_commit_offsets: HashMap<ConsumerPartitionKey, i64>,
}

thread_local! {
    // Each thread tracks its own in-flight pathway, mirroring the
    // execution-context stack.
    static CURRENT_PATHWAY: RefCell<Option<PathwayContext>> = const { RefCell::new(None) };
}

/// Collects checkpoint statistics and offsets into time buckets and ships
/// them to the collector on a fixed cadence.
pub struct DataStreamsProcessor {
    service: String,
    env: String,
    version: Option<String>,
    hostname: String,
    bucket_size_ns: u64,
    flush_interval: Duration,
    retry_attempts: u32,
    transport: Arc<dyn StatsTransport>,
    buckets: Mutex<HashMap<u64, Bucket>>,
    enabled: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl DataStreamsProcessor {
    /// Builds the processor and starts its background flush task. Must be
    /// called from within a tokio runtime.
    pub fn start(config: &Config) -> Result<Arc<Self>> {
        let transport = AgentTransport::new(&config.agent_url, config.request_timeout())?;
        Ok(Self::start_with_transport(config, Arc::new(transport)))
    }

    /// As [`start`](Self::start), with an injected transport.
    pub fn start_with_transport(config: &Config, transport: Arc<dyn StatsTransport>) -> Arc<Self> {
        let processor = Self::with_transport(config, transport);
        processor.spawn_flusher();
        processor
    }

    /// Builds the processor without the background task; callers drive
    /// flushes themselves. Used by tests and by [`start_with_transport`].
    pub fn with_transport(config: &Config, transport: Arc<dyn StatsTransport>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        Arc::new(Self {
            service: config.service.clone(),
            env: config.env.clone(),
            version: config.version.clone(),
            hostname,
            bucket_size_ns: config.bucket_size_ns(),
            flush_interval: config.flush_interval(),
            retry_attempts: config.retry_attempts,
            transport,
            buckets: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(config.enabled),
            shutdown_tx,
            flusher: Mutex::new(None),
        })
    }

    fn spawn_flusher(self: &Arc<Self>) {
        // The task holds only a weak handle; otherwise it would keep the
        // processor alive and its own Drop could never run.
        let processor = Arc::downgrade(self);
        let flush_interval = self.flush_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + flush_interval;
            let mut ticker = tokio::time::interval_at(start, flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(processor) = processor.upgrade() else {
                            break;
                        };
                        processor.flush().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("stats flusher stopping");
                        break;
                    }
                }
            }
        });
        let mut flusher = self.flusher.lock().unwrap_or_else(|e| e.into_inner());
        *flusher = Some(handle);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Records one checkpoint's latencies into the bucket containing
    /// `now_sec`, keyed by `(joined tags, hash, parent_hash)`.
    pub fn on_checkpoint(
        &self,
        hash: u64,
        parent_hash: u64,
        tags: &[String],
        now_sec: f64,
        edge_latency_sec: f64,
        pathway_latency_sec: f64,
    ) {
        if !self.is_enabled() {
            return;
        }
        let bucket_start = self.bucket_start_ns(now_sec);
        let aggr_key = (tags.join(","), hash, parent_hash);

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let stats = buckets
            .entry(bucket_start)
            .or_default()
            .pathway_stats
            .entry(aggr_key)
            .or_default();
        stats.pathway_latency.add(pathway_latency_sec);
        stats.edge_latency.add(edge_latency_sec);
    }

    /// Records the high-water-mark produce offset for `(topic, partition)`.
    pub fn track_produce(&self, topic: &str, partition: i32, offset: i64, now_sec: f64) {
        if !self.is_enabled() {
            return;
        }
        tracing::debug!(topic, partition, offset, "tracking produce offset");
        let bucket_start = self.bucket_start_ns(now_sec);
        let key = PartitionKey {
            topic: topic.to_string(),
            partition,
        };
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets
            .entry(bucket_start)
            .or_default()
            .latest_produce_offsets
            .entry(key)
            .or_insert(i64::MIN);
        *entry = (*entry).max(offset);
    }

    /// Records the high-water-mark committed offset for
    /// `(group, topic, partition)`.
    pub fn track_commit(&self, group: &str, topic: &str, partition: i32, offset: i64, now_sec: f64) {
        if !self.is_enabled() {
            return;
        }
        tracing::debug!(group, topic, partition, offset, "tracking commit offset");
        let bucket_start = self.bucket_start_ns(now_sec);
        let key = ConsumerPartitionKey {
            group: group.to_string(),
            topic: topic.to_string(),
            partition,
        };
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets
            .entry(bucket_start)
            .or_default()
            .latest_commit_offsets
            .entry(key)
            .or_insert(i64::MIN);
        *entry = (*entry).max(offset);
    }

    /// Advances the calling thread's current pathway through a checkpoint,
    /// starting a fresh pathway if the thread has none, and records the
    /// latencies.
    pub fn set_checkpoint(&self, tags: &[String]) -> PathwayContext {
        let now = now_sec();
        let mut sorted_tags = tags.to_vec();
        sorted_tags.sort();

        CURRENT_PATHWAY.with(|cell| {
            let mut slot = cell.borrow_mut();
            let ctx = slot.get_or_insert_with(|| PathwayContext::new(now));
            let checkpoint = ctx.checkpoint(&self.service, &self.env, &sorted_tags, now);
            let snapshot = ctx.clone();
            drop(slot);
            self.on_checkpoint(
                checkpoint.hash,
                checkpoint.parent_hash,
                &sorted_tags,
                now,
                checkpoint.edge_latency_sec,
                checkpoint.pathway_latency_sec,
            );
            snapshot
        })
    }

    /// Decodes a propagated pathway (falling back to a fresh one) and makes
    /// it the calling thread's current pathway.
    pub fn decode_pathway(&self, data: &[u8]) -> PathwayContext {
        let ctx = PathwayContext::decode(data, now_sec());
        CURRENT_PATHWAY.with(|cell| {
            *cell.borrow_mut() = Some(ctx.clone());
        });
        ctx
    }

    /// Starts a fresh pathway without touching the thread's current one.
    pub fn new_pathway(&self) -> PathwayContext {
        PathwayContext::new(now_sec())
    }

    fn bucket_start_ns(&self, now_sec: f64) -> u64 {
        let now_ns = (now_sec * 1e9) as u64;
        now_ns - now_ns % self.bucket_size_ns
    }

    /// Drains every bucket and submits the encoded payload. A write racing
    /// the drain lands in a newly created bucket.
    pub async fn flush(&self) {
        let drained = {
            let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *buckets)
        };
        if drained.is_empty() {
            return;
        }

        let payload = match self.encode_payload(drained) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode stats payload, dropping batch");
                return;
            }
        };
        self.submit_with_retry(payload).await;
    }

    fn encode_payload(&self, drained: HashMap<u64, Bucket>) -> Result<Vec<u8>> {
        let payload = StatsPayload {
            service: self.service.clone(),
            tracer_version: env!("CARGO_PKG_VERSION").to_string(),
            lang: "rust".to_string(),
            env: (self.env != "none").then(|| self.env.clone()),
            version: self.version.clone(),
            stats: self.serialize_buckets(drained)?,
            hostname: self.hostname.clone(),
        };
        let encoded = rmp_serde::to_vec_named(&payload)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&encoded)?;
        Ok(encoder.finish()?)
    }

    fn serialize_buckets(&self, drained: HashMap<u64, Bucket>) -> Result<Vec<StatsBucketPayload>> {
        let mut serialized = Vec::with_capacity(drained.len());
        for (bucket_start, bucket) in drained {
            let mut stats = Vec::with_capacity(bucket.pathway_stats.len());
            for ((edge_tags, hash, parent_hash), aggregated) in bucket.pathway_stats {
                stats.push(PathwayStatsPayload {
                    edge_tags: edge_tags.split(',').map(str::to_string).collect(),
                    hash,
                    parent_hash,
                    pathway_latency: rmp_serde::to_vec(&aggregated.pathway_latency)?,
                    edge_latency: rmp_serde::to_vec(&aggregated.edge_latency)?,
                });
            }

            let mut backlogs = Vec::new();
            for (key, offset) in bucket.latest_commit_offsets {
                backlogs.push(BacklogPayload {
                    tags: vec![
                        "type:kafka_commit".to_string(),
                        format!("consumer_group:{}", key.group),
                        format!("topic:{}", key.topic),
                        format!("partition:{}", key.partition),
                    ],
                    value: offset,
                });
            }
            for (key, offset) in bucket.latest_produce_offsets {
                backlogs.push(BacklogPayload {
                    tags: vec![
                        "type:kafka_produce".to_string(),
                        format!("topic:{}", key.topic),
                        format!("partition:{}", key.partition),
                    ],
                    value: offset,
                });
            }

            serialized.push(StatsBucketPayload {
                start: bucket_start,
                duration: self.bucket_size_ns,
                stats,
                backlogs,
            });
        }
        Ok(serialized)
    }

    /// Submits one payload with capped, jittered exponential backoff.
    /// Only transport faults retry; an HTTP response settles the attempt.
    async fn submit_with_retry(&self, body: Vec<u8>) {
        let size = body.len();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.send_stats(body.clone()).await {
                Ok(response) => {
                    self.handle_response(&response, size);
                    return;
                }
                Err(err) => {
                    if attempt >= self.retry_attempts {
                        tracing::error!(
                            attempts = attempt,
                            endpoint = self.transport.endpoint(),
                            error = %err,
                            "retry limit exceeded submitting pathway stats, dropping payload"
                        );
                        return;
                    }
                    let exp = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                    let base = RETRY_BASE_DELAY_MS.saturating_mul(exp);
                    let delay = base.min(RETRY_MAX_DELAY_MS);
                    // 0-25% jitter to avoid thundering herds of tracers.
                    let jitter = (delay as f64 * 0.25 * rand::random::<f64>()) as u64;
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry_attempts,
                        delay_ms = delay + jitter,
                        error = %err,
                        "stats submit failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay + jitter)).await;
                }
            }
        }
    }

    fn handle_response(&self, response: &StatsResponse, payload_size: usize) {
        if response.status == 404 {
            tracing::error!(
                endpoint = self.transport.endpoint(),
                "collector does not support pipeline stats, disabling the processor"
            );
            self.enabled.store(false, Ordering::Relaxed);
        } else if !response.is_success() {
            tracing::error!(
                status = response.status,
                reason = %response.reason,
                endpoint = self.transport.endpoint(),
                "collector rejected stats payload"
            );
        } else {
            tracing::debug!(
                bytes = payload_size,
                endpoint = self.transport.endpoint(),
                "sent stats payload"
            );
        }
    }

    /// Stops the background task and performs one final flush of all
    /// outstanding buckets. The final flush completes (or fails terminally)
    /// before this returns.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = {
            let mut flusher = self.flusher.lock().unwrap_or_else(|e| e.into_inner());
            flusher.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "stats flusher task failed");
            }
        }
        self.flush().await;
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub(crate) fn with_buckets<R>(&self, f: impl FnOnce(&HashMap<u64, Bucket>) -> R) -> R {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        f(&buckets)
    }
}

impl Drop for DataStreamsProcessor {
    fn drop(&mut self) {
        // Stops a still-running flusher if shutdown was never called. Any
        // unflushed buckets are lost; only shutdown() guarantees delivery.
        let _ = self.shutdown_tx.send(());
    }
}
