//! End-to-end pipeline coverage: checkpoints recorded across threads and
//! propagated between pipeline stages, drained by a flush, and shipped to a
//! scripted collector.

use flowtrace::config::Config;
use flowtrace::core;
use flowtrace::datastreams::{DataStreamsProcessor, PathwayContext, StatsTransport, PROPAGATION_KEY};
use flowtrace::test_utils::MockTransport;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

fn test_config() -> Config {
    Config {
        service: "pipeline-service".into(),
        env: "staging".into(),
        // One wide bucket so every sample in the test lands in one window.
        flush_interval_secs: 100_000.0,
        ..Config::default()
    }
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|t| t.to_string()).collect()
}

fn decode_payload(body: &[u8]) -> Value {
    let mut decoder = flate2::read::GzDecoder::new(body);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw).unwrap();
    rmp_serde::from_slice(&raw).unwrap()
}

#[tokio::test]
async fn test_produce_consume_pathway_round_trip() {
    let transport = Arc::new(MockTransport::always_ok());
    let processor = DataStreamsProcessor::start_with_transport(&test_config(), Arc::clone(&transport) as Arc<dyn StatsTransport>);

    // Producer stage: checkpoint, then carry the pathway in a message header.
    let producer = Arc::clone(&processor);
    let headers: HashMap<String, Vec<u8>> = std::thread::spawn(move || {
        let pathway = producer.set_checkpoint(&tags(&["direction:out", "topic:orders", "type:kafka"]));
        producer.track_produce("orders", 0, 42, flowtrace::datastreams::pathway::now_sec());
        HashMap::from([(PROPAGATION_KEY.to_string(), pathway.encode())])
    })
    .join()
    .unwrap();

    // Consumer stage: restore the pathway from the header and checkpoint again.
    let consumer = Arc::clone(&processor);
    let (upstream_hash, downstream): (u64, PathwayContext) = std::thread::spawn(move || {
        let restored = consumer.decode_pathway(&headers[PROPAGATION_KEY]);
        let downstream =
            consumer.set_checkpoint(&tags(&["direction:in", "topic:orders", "type:kafka"]));
        consumer.track_commit("group-a", "orders", 0, 42, flowtrace::datastreams::pathway::now_sec());
        (restored.hash, downstream)
    })
    .join()
    .unwrap();
    assert_ne!(downstream.hash, upstream_hash);

    processor.shutdown().await;

    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 1);
    let decoded = decode_payload(&payloads[0]);
    assert_eq!(decoded["Service"], "pipeline-service");
    assert_eq!(decoded["Env"], "staging");
    assert_eq!(decoded["Lang"], "rust");

    let buckets = decoded["Stats"].as_array().unwrap();
    assert_eq!(buckets.len(), 1);
    let stats = buckets[0]["Stats"].as_array().unwrap();
    assert_eq!(stats.len(), 2);

    // The consumer edge chains from the producer's hash.
    let consumer_entry = stats
        .iter()
        .find(|entry| {
            entry["EdgeTags"]
                .as_array()
                .unwrap()
                .contains(&Value::from("direction:in"))
        })
        .unwrap();
    assert_eq!(consumer_entry["ParentHash"].as_u64(), Some(upstream_hash));
    assert_eq!(consumer_entry["Hash"].as_u64(), Some(downstream.hash));

    let backlogs = buckets[0]["Backlogs"].as_array().unwrap();
    assert_eq!(backlogs.len(), 2);
    let backlog_types: Vec<&str> = backlogs
        .iter()
        .map(|b| b["Tags"].as_array().unwrap()[0].as_str().unwrap())
        .collect();
    assert!(backlog_types.contains(&"type:kafka_commit"));
    assert!(backlog_types.contains(&"type:kafka_produce"));
}

#[tokio::test]
async fn test_concurrent_ingest_from_many_threads() {
    let transport = Arc::new(MockTransport::always_ok());
    let processor =
        DataStreamsProcessor::with_transport(&test_config(), Arc::clone(&transport) as Arc<dyn StatsTransport>);

    let now = 1_000.0;
    let edge_tags = tags(&["topic:orders"]);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let processor = Arc::clone(&processor);
        let edge_tags = edge_tags.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..100 {
                processor.on_checkpoint(7, 3, &edge_tags, now, 0.001 * i as f64, 0.002 * i as f64);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    processor.flush().await;

    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 1);
    let decoded = decode_payload(&payloads[0]);
    let stats = decoded["Stats"].as_array().unwrap()[0]["Stats"]
        .as_array()
        .unwrap();
    // Sketch merges are commutative: everything lands in one entry.
    assert_eq!(stats.len(), 1);
    let blob: Vec<u8> = stats[0]["PathwayLatency"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap() as u8)
        .collect();
    let sketch: sketches_ddsketch::DDSketch = rmp_serde::from_slice(&blob).unwrap();
    assert_eq!(sketch.count(), 800);
}

#[tokio::test]
async fn test_scope_exit_event_drives_checkpoint() {
    let transport = Arc::new(MockTransport::always_ok());
    let processor =
        DataStreamsProcessor::with_transport(&test_config(), Arc::clone(&transport) as Arc<dyn StatsTransport>);

    // Wire the subsystems together the way instrumentation does: a stage
    // scope announces its end and a listener records the checkpoint.
    let host = core::context_with_data("stage.host", None, HashMap::new()).unwrap();
    let listener_processor = Arc::clone(&processor);
    core::on("context.ended.stage.transform", move |_| {
        listener_processor.set_checkpoint(&tags(&["stage:transform"]));
        Ok(Value::Null)
    });

    {
        let _stage =
            core::context_with_data("stage.transform", None, HashMap::new()).unwrap();
    }
    drop(host);

    processor.flush().await;
    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 1);
    let decoded = decode_payload(&payloads[0]);
    let stats = decoded["Stats"].as_array().unwrap()[0]["Stats"]
        .as_array()
        .unwrap();
    assert_eq!(
        stats[0]["EdgeTags"],
        serde_json::json!(["stage:transform"])
    );
}
