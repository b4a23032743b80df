//! BleSight Common Library
//!
//! This crate provides shared types and utilities for BleSight bridges:
//!
//! - [`telemetry`] - Notification sample model (`TelemetrySample`, `SampleBatch`)
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - MQTT broker session management
//! - [`topic`] - Topic builders and parsers
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod serialization;
pub mod session;
pub mod telemetry;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{
    BaseConfig, LogFormat, LoggingConfig, MqttConfig, MqttCredentials, load_config, parse_config,
};
pub use error::{Error, Result};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::{connect, drive_event_loop, generate_client_id};
pub use telemetry::{
    LengthMismatch, SampleBatch, TelemetrySample, ValueOverflow, decode_be_value,
};
pub use topic::{TopicBuilder, TopicKind, parse_topic};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Example
///
/// ```ignore
/// use blesight_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
