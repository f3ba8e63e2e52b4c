//! Data-streams monitoring: pathway identity, checkpoint latency
//! aggregation, and the periodic stats flush to the collector.

pub mod encoding;
pub mod fnv;
pub mod pathway;
pub mod payload;
pub mod processor;
pub mod transport;


pub use pathway::{CheckpointData, PathwayContext};
pub use processor::{Bucket, ConsumerPartitionKey, DataStreamsProcessor, PartitionKey};
pub use transport::{AgentTransport, StatsResponse, StatsTransport};

/// Message-header key under which the encoded pathway context propagates
/// between processes.
pub const PROPAGATION_KEY: &str = "dd-pathway-ctx";
