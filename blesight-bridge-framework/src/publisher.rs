//! Fire-and-forget publishing to the MQTT broker.

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;

use blesight_common::TopicBuilder;

use crate::error::{BridgeError, Result};

/// Sink for outbound bus messages.
///
/// Implementations queue the message and return immediately; delivery is
/// never awaited by the caller.
pub trait BusPublisher: Send + Sync {
    /// Queue a transient message.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Queue a retained message (state documents that late subscribers need).
    fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Publisher for sending bridge output to an MQTT broker.
///
/// Wraps an [`AsyncClient`] whose event loop is driven elsewhere (see
/// [`blesight_common::drive_event_loop`]). Messages are queued with
/// `try_publish`, so a stalled broker surfaces as an error instead of
/// blocking the caller.
#[derive(Clone, Debug)]
pub struct MqttPublisher {
    client: AsyncClient,
    topics: TopicBuilder,
}

impl MqttPublisher {
    /// Create a new publisher.
    pub fn new(client: AsyncClient, topic_prefix: impl Into<String>) -> Self {
        Self {
            client,
            topics: TopicBuilder::new(topic_prefix),
        }
    }

    /// Get the topic builder for this bridge's prefix.
    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    /// Publish a JSON value as a retained message, regardless of the configured format.
    pub fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_retained(topic, payload)
    }

    /// Publish a retained JSON value and wait until the client has accepted it.
    ///
    /// Used on shutdown, where the request must be queued ahead of the
    /// disconnect.
    pub async fn publish_json_blocking<T: Serialize>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| BridgeError::publish(topic, e))
    }
}

impl BusPublisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BridgeError::publish(topic, e))
    }

    fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, true, payload)
            .map_err(|e| BridgeError::publish(topic, e))
    }
}

/// Statistics from a series of publish attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully queued messages.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}

impl PublishStats {
    /// Record the outcome of one publish attempt.
    pub fn record<T, E>(&mut self, result: &std::result::Result<T, E>) {
        match result {
            Ok(_) => self.success += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;

    #[test]
    fn test_publish_stats() {
        let mut stats = PublishStats::default();

        for _ in 0..8 {
            stats.record::<(), ()>(&Ok(()));
        }
        stats.record::<(), ()>(&Err(()));
        stats.record::<(), ()>(&Err(()));
        assert_eq!(stats, PublishStats { success: 8, failed: 2 });
    }

    #[test]
    fn test_publish_fails_when_queue_full() {
        // The event loop is never polled, so the request queue fills up.
        let options = MqttOptions::new("publisher-test", "localhost", 1883);
        let (client, _eventloop) = AsyncClient::new(options, 1);
        let publisher = MqttPublisher::new(client, "blesight/test");

        assert!(publisher.publish("blesight/test/data", vec![1]).is_ok());
        let err = publisher.publish("blesight/test/data", vec![2]).unwrap_err();
        assert!(matches!(err, BridgeError::Publish { ref topic, .. } if topic == "blesight/test/data"));
    }

    #[test]
    fn test_topics_follow_prefix() {
        let options = MqttOptions::new("publisher-test", "localhost", 1883);
        let (client, _eventloop) = AsyncClient::new(options, 4);
        let publisher = MqttPublisher::new(client, "blesight/test");

        assert_eq!(publisher.topics().status_topic(), "blesight/test/@/status");
        assert!(
            publisher
                .publish_json("blesight/test/@/link", &serde_json::json!({ "phase": "idle" }))
                .is_ok()
        );
    }
}
