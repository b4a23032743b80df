//! Configuration for the BLE bridge.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use blesight_bridge_framework::{BridgeConfig, BridgeError, Format, LoggingConfig, MqttConfig};
use blesight_common::topic::{TOPIC_PREFIX, validate_publish_topic};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BleBridgeConfig {
    /// MQTT broker settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// BLE link and notification settings
    #[serde(default)]
    pub ble: BleConfig,

    /// Where flushed batches go
    #[serde(default)]
    pub sinks: SinkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig for BleBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn topic_prefix(&self) -> &str {
        &self.ble.topic_prefix
    }

    fn validate(&self) -> Result<(), BridgeError> {
        self.mqtt
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;
        self.ble
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;
        self.sinks
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))
    }
}

/// BLE link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleConfig {
    /// Prefix for status, link state and batch topics (default: "blesight/ble")
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Topic every raw notification payload is published to
    #[serde(default = "default_data_topic")]
    pub data_topic: String,

    /// GATT characteristic to subscribe to
    #[serde(default = "default_read_characteristic")]
    pub read_characteristic: Uuid,

    /// Samples buffered before a flush
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Pause after a selection attempt or failed connect, in seconds
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,

    /// Link health poll interval while connected, in seconds
    #[serde(default = "default_health_poll")]
    pub health_poll_secs: u64,

    /// Adapter warm-up before each scan, in seconds
    #[serde(default = "default_warmup")]
    pub warmup_secs: u64,

    /// Discovery scan duration, in seconds
    #[serde(default = "default_scan")]
    pub scan_secs: u64,

    /// Upper bound on a single connect attempt, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Consecutive connect failures tolerated before re-selecting
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Depth of the notification queue between transport and handler
    #[serde(default = "default_notification_queue")]
    pub notification_queue: usize,

    /// Name or address to select without prompting
    #[serde(default)]
    pub auto_select: Option<String>,
}

fn default_topic_prefix() -> String {
    format!("{}/ble", TOPIC_PREFIX)
}

fn default_data_topic() -> String {
    format!("{}/ble/notifications", TOPIC_PREFIX)
}

fn default_read_characteristic() -> Uuid {
    Uuid::from_u128(0x0000_2a56_0000_1000_8000_0080_5f9b_34fb)
}

fn default_buffer_capacity() -> usize {
    256
}

fn default_reconnect_backoff() -> u64 {
    15
}

fn default_health_poll() -> u64 {
    3
}

fn default_warmup() -> u64 {
    2
}

fn default_scan() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_connect_retries() -> u32 {
    3
}

fn default_notification_queue() -> usize {
    1024
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            data_topic: default_data_topic(),
            read_characteristic: default_read_characteristic(),
            buffer_capacity: default_buffer_capacity(),
            reconnect_backoff_secs: default_reconnect_backoff(),
            health_poll_secs: default_health_poll(),
            warmup_secs: default_warmup(),
            scan_secs: default_scan(),
            connect_timeout_secs: default_connect_timeout(),
            connect_retries: default_connect_retries(),
            notification_queue: default_notification_queue(),
            auto_select: None,
        }
    }
}

impl BleConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "ble.topic_prefix cannot be empty".to_string(),
            ));
        }

        validate_publish_topic(&self.topic_prefix)
            .and_then(|_| validate_publish_topic(&self.data_topic))
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.buffer_capacity == 0 {
            return Err(ConfigError::Validation(
                "ble.buffer_capacity must be at least 1".to_string(),
            ));
        }

        if self.notification_queue == 0 {
            return Err(ConfigError::Validation(
                "ble.notification_queue must be at least 1".to_string(),
            ));
        }

        if self.connect_retries == 0 {
            return Err(ConfigError::Validation(
                "ble.connect_retries must be at least 1".to_string(),
            ));
        }

        for (name, secs) in [
            ("reconnect_backoff_secs", self.reconnect_backoff_secs),
            ("health_poll_secs", self.health_poll_secs),
            ("scan_secs", self.scan_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Validation(format!(
                    "ble.{} must be at least 1",
                    name
                )));
            }
        }

        if let Some(needle) = &self.auto_select {
            if needle.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "ble.auto_select cannot be blank".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn health_poll(&self) -> Duration {
        Duration::from_secs(self.health_poll_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn scan(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Flush sink configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Append flushed batches to a CSV file
    #[serde(default)]
    pub csv: Option<CsvSinkConfig>,

    /// Publish flushed batches under `{topic_prefix}/batch`
    #[serde(default)]
    pub publish_batches: bool,

    /// Encoding of published batches
    #[serde(default)]
    pub batch_format: Format,
}

impl SinkConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(csv) = &self.csv {
            if csv.path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "sinks.csv.path cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// CSV dump file settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvSinkConfig {
    /// Dump file (default: `microphone_dump.csv` on the desktop)
    #[serde(default = "default_csv_path")]
    pub path: PathBuf,
}

impl Default for CsvSinkConfig {
    fn default() -> Self {
        Self {
            path: default_csv_path(),
        }
    }
}

fn default_csv_path() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("microphone_dump.csv")
}
