//! Human-readable rendering of bridge messages.

use blesight_common::{SampleBatch, TopicKind, decode_auto, decode_be_value, parse_topic};

/// Render one message received on `topic`.
///
/// Topics below `prefix` are classified: status and link documents are shown
/// as JSON, batches are summarized, and everything else is treated as a raw
/// notification payload.
pub fn render_message(prefix: &str, topic: &str, payload: &[u8]) -> String {
    match parse_topic(prefix, topic) {
        Some(TopicKind::Status) | Some(TopicKind::Link) => {
            format!("{}: {}", topic, String::from_utf8_lossy(payload))
        }
        Some(TopicKind::Batch) => match decode_auto::<SampleBatch>(payload) {
            Ok(batch) => render_batch(topic, &batch),
            Err(e) => format!("{}: undecodable batch ({} bytes): {}", topic, payload.len(), e),
        },
        Some(TopicKind::Data) | None => render_raw(topic, payload),
    }
}

fn render_raw(topic: &str, payload: &[u8]) -> String {
    let value = match decode_be_value(payload) {
        Ok(value) => value.to_string(),
        Err(e) => format!("<{}>", e),
    };
    format!(
        "{}: {:?} [{}] = {}",
        topic,
        String::from_utf8_lossy(payload),
        hex(payload),
        value
    )
}

fn render_batch(topic: &str, batch: &SampleBatch) -> String {
    let span = match (batch.timestamps.first(), batch.timestamps.last()) {
        (Some(first), Some(last)) => format!(", {} .. {}", first, last),
        _ => String::new(),
    };
    format!(
        "{}: batch from {} with {} samples{}",
        topic,
        batch.source,
        batch.len(),
        span
    )
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
