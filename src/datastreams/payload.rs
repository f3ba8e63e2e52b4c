//! Wire structs for the collector flush payload.
//!
//! Field names are part of the collector protocol and serialize verbatim;
//! the payload is msgpack-encoded and gzip-compressed before submission.
//! Latency sketches travel as opaque binary blobs.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatsPayload {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "TracerVersion")]
    pub tracer_version: String,
    #[serde(rename = "Lang")]
    pub lang: String,
    #[serde(rename = "Env", skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(rename = "Version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "Stats")]
    pub stats: Vec<StatsBucketPayload>,
    #[serde(rename = "Hostname")]
    pub hostname: String,
}

#[derive(Debug, Serialize)]
pub struct StatsBucketPayload {
    #[serde(rename = "Start")]
    pub start: u64,
    #[serde(rename = "Duration")]
    pub duration: u64,
    #[serde(rename = "Stats")]
    pub stats: Vec<PathwayStatsPayload>,
    #[serde(rename = "Backlogs")]
    pub backlogs: Vec<BacklogPayload>,
}

#[derive(Debug, Serialize)]
pub struct PathwayStatsPayload {
    #[serde(rename = "EdgeTags")]
    pub edge_tags: Vec<String>,
    #[serde(rename = "Hash")]
    pub hash: u64,
    #[serde(rename = "ParentHash")]
    pub parent_hash: u64,
    #[serde(rename = "PathwayLatency")]
    pub pathway_latency: Vec<u8>,
    #[serde(rename = "EdgeLatency")]
    pub edge_latency: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct BacklogPayload {
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Value")]
    pub value: i64,
}
