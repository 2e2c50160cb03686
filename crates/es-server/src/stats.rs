//! Stats emission: the operator document and per-listener stream stats
//!
//! The mixer stats are a JSON key/value document. Jitter entries are
//! accumulated into it until the serialized size would exceed the MTU
//! budget, at which point the document is flushed and a new one started.

use serde::Serialize;
use serde_json::{json, Map, Value};

use es_stream::StreamStats;

use crate::PeerId;

/// Serialized stats documents above this size are split into several
pub const TOO_BIG_FOR_MTU: usize = 1200;

/// Where the operator-facing stats documents go
pub trait StatsSink {
    fn publish(&mut self, document: &str);
}

/// Default sink: the process log
pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn publish(&mut self, document: &str) {
        log::info!("mixer stats: {}", document);
    }
}

/// Produces the per-listener audio stream stats payload. The wire shape is
/// the encoder's business; the scheduler only forwards the bytes.
pub trait StreamStatsEncoder {
    fn encode(&mut self, peer: PeerId, streams: &[StreamStats]) -> Option<Vec<u8>>;
}

/// JSON encoder used when nothing fancier is plugged in
pub struct JsonStreamStatsEncoder;

impl StreamStatsEncoder for JsonStreamStatsEncoder {
    fn encode(&mut self, peer: PeerId, streams: &[StreamStats]) -> Option<Vec<u8>> {
        if streams.is_empty() {
            return None;
        }
        let entries: Vec<Value> = streams.iter().map(stream_stats_value).collect();
        let doc = json!({ "peer": peer.to_string(), "streams": entries });
        Some(doc.to_string().into_bytes())
    }
}

/// Global mixer counters snapshotted once per stats interval
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MixerStatsSnapshot {
    pub trailing_sleep_percentage: f32,
    pub performance_throttling_ratio: f32,
    pub average_listeners_per_frame: f32,
    pub average_mixes_per_listener: f32,
}

/// Build the operator documents: one leading document with the global
/// counters, then jitter entries packed under the MTU budget.
pub fn mixer_stats_documents(
    snapshot: &MixerStatsSnapshot,
    jitter: &[(String, StreamStats)],
    mtu_budget: usize,
) -> Vec<String> {
    let mut documents = Vec::new();

    let mut head = Map::new();
    head.insert(
        "trailing_sleep_percentage".into(),
        json!(snapshot.trailing_sleep_percentage),
    );
    head.insert(
        "performance_throttling_ratio".into(),
        json!(snapshot.performance_throttling_ratio),
    );
    head.insert(
        "average_listeners_per_frame".into(),
        json!(snapshot.average_listeners_per_frame),
    );
    head.insert(
        "average_mixes_per_listener".into(),
        json!(snapshot.average_mixes_per_listener),
    );
    documents.push(Value::Object(head).to_string());

    let mut current = Map::new();
    let mut current_size = 0;
    for (label, stats) in jitter {
        let key = format!("jitter_stats.{}", label);
        let value = stream_stats_value(stats);
        current_size += key.len() + value.to_string().len();
        current.insert(key, value);

        if current_size > mtu_budget {
            documents.push(Value::Object(std::mem::take(&mut current)).to_string());
            current_size = 0;
        }
    }
    if !current.is_empty() {
        documents.push(Value::Object(current).to_string());
    }

    documents
}

fn stream_stats_value(stats: &StreamStats) -> Value {
    json!({
        "starves": stats.starve_count,
        "overflows": stats.overflow_count,
        "frames_available": stats.frames_available,
        "jitter_margin_frames": stats.jitter_margin_frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MixerStatsSnapshot {
        MixerStatsSnapshot {
            trailing_sleep_percentage: 85.0,
            performance_throttling_ratio: 0.0,
            average_listeners_per_frame: 2.0,
            average_mixes_per_listener: 1.5,
        }
    }

    fn jitter_entry(n: usize) -> (String, StreamStats) {
        (
            format!("peer-{}.mic", n),
            StreamStats {
                starve_count: n as u64,
                overflow_count: 0,
                frames_available: 3,
                jitter_margin_frames: 1,
            },
        )
    }

    #[test]
    fn test_head_document_has_global_counters() {
        let docs = mixer_stats_documents(&snapshot(), &[], TOO_BIG_FOR_MTU);
        assert_eq!(docs.len(), 1);
        let parsed: Value = serde_json::from_str(&docs[0]).unwrap();
        assert_eq!(parsed["average_listeners_per_frame"], json!(2.0));
        assert_eq!(parsed["trailing_sleep_percentage"], json!(85.0));
    }

    #[test]
    fn test_jitter_entries_split_at_budget() {
        let jitter: Vec<_> = (0..40).map(jitter_entry).collect();
        let docs = mixer_stats_documents(&snapshot(), &jitter, 200);
        assert!(docs.len() > 2, "expected several documents, got {}", docs.len());

        // every document parses and every entry survives the split
        let mut seen = 0;
        for doc in &docs[1..] {
            let parsed: Value = serde_json::from_str(doc).unwrap();
            seen += parsed.as_object().unwrap().len();
        }
        assert_eq!(seen, 40);
    }

    #[test]
    fn test_single_small_batch_stays_whole() {
        let jitter: Vec<_> = (0..2).map(jitter_entry).collect();
        let docs = mixer_stats_documents(&snapshot(), &jitter, TOO_BIG_FOR_MTU);
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_stream_stats_encoder() {
        let mut encoder = JsonStreamStatsEncoder;
        assert!(encoder.encode(PeerId(1), &[]).is_none());

        let bytes = encoder
            .encode(PeerId(1), &[jitter_entry(0).1])
            .unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["peer"], json!("peer-1"));
        assert_eq!(parsed["streams"].as_array().unwrap().len(), 1);
    }
}
