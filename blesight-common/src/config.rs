use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::serialization::Format;

/// Common MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier prefix. A random suffix is appended on every run.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// Optional username/password authentication.
    #[serde(default = "default_credentials")]
    pub credentials: Option<MqttCredentials>,

    /// MQTT keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Capacity of the outgoing request queue between client and event loop.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

/// Username/password pair presented to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MqttCredentials {
    pub username: String,
    pub password: String,
}

fn default_host() -> String {
    "broker.emqx.io".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "blesight".to_string()
}

fn default_credentials() -> Option<MqttCredentials> {
    Some(MqttCredentials {
        username: "emqx".to_string(),
        password: "public".to_string(),
    })
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_request_capacity() -> usize {
    256
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id_prefix: default_client_id_prefix(),
            credentials: default_credentials(),
            keep_alive_secs: default_keep_alive_secs(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl MqttConfig {
    /// Check the broker settings for values the MQTT client would reject.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("MQTT host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("MQTT port must be non-zero".to_string()));
        }
        if self.client_id_prefix.is_empty() {
            return Err(Error::Config(
                "MQTT client_id_prefix cannot be empty".to_string(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(Error::Config(
                "MQTT keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if self.request_capacity == 0 {
            return Err(Error::Config(
                "MQTT request_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(credentials) = &self.credentials {
            if credentials.username.is_empty() {
                return Err(Error::Config(
                    "MQTT credentials require a username".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Base configuration shared by all BleSight tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseConfig {
    /// MQTT broker settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Serialization format for structured documents.
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
