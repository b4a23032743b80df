//! Bridge status reporting.

use rumqttc::{LastWill, QoS};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::MqttPublisher;

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "ble").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running" or "offline").
    pub status: String,
    /// When the status was produced (millis since epoch).
    pub timestamp: i64,
    /// Additional metadata (bridge-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "running".to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: "offline".to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status as a retained message.
    ///
    /// Publishes to `{topic_prefix}/@/status`.
    pub fn publish(&self, publisher: &MqttPublisher) -> Result<()> {
        publisher.publish_json(&publisher.topics().status_topic(), self)
    }

    /// Build an MQTT last will carrying this status.
    ///
    /// The broker publishes it on the status topic if the bridge vanishes
    /// without a clean disconnect.
    pub fn last_will(&self, status_topic: &str) -> Result<LastWill> {
        let payload = serde_json::to_vec(self)?;
        Ok(LastWill::new(status_topic, payload, QoS::AtLeastOnce, true))
    }
}

/// Helper to publish bridge status on startup and shutdown.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    publisher: MqttPublisher,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        publisher: MqttPublisher,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// Publish "running" status with optional metadata.
    pub fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher)
    }

    /// Publish "offline" status, waiting until the client accepted it.
    pub async fn publish_offline(&self) -> Result<()> {
        let status = BridgeStatus::offline(&self.bridge_name, &self.version);
        self.publisher
            .publish_json_blocking(&self.publisher.topics().status_topic(), &status)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("ble", "0.1.0");
        assert_eq!(status.bridge, "ble");
        assert_eq!(status.status, "running");
        assert!(status.timestamp > 0);
    }

    #[test]
    fn test_status_with_metadata() {
        let status = BridgeStatus::running("ble", "0.1.0").with_metadata(serde_json::json!({
            "data_topic": "blesight/ble/notifications",
            "buffer_capacity": 256
        }));

        assert_eq!(status.metadata["data_topic"], "blesight/ble/notifications");
        assert_eq!(status.metadata["buffer_capacity"], 256);
    }

    #[test]
    fn test_status_serialization() {
        let status =
            BridgeStatus::running("test", "1.0.0").with_metadata(serde_json::json!({ "count": 5 }));

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"bridge\":\"test\""));
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"count\":5"));
    }

    #[test]
    fn test_last_will_is_retained_offline() {
        let will = BridgeStatus::offline("ble", "0.1.0")
            .last_will("blesight/ble/@/status")
            .unwrap();

        assert_eq!(will.topic, "blesight/ble/@/status");
        assert!(will.retain);
        let decoded: BridgeStatus = serde_json::from_slice(&will.message).unwrap();
        assert_eq!(decoded.status, "offline");
    }
}
