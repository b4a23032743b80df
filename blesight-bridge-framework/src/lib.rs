//! BleSight Bridge Framework
//!
//! Common abstractions for building bridges that forward device data to an
//! MQTT broker.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`BusPublisher`] and [`MqttPublisher`] for fire-and-forget publishing
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use blesight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new("mybridge", config).await?;
//!
//!     // Spawn protocol-specific workers
//!     let shutdown = runner.shutdown_signal();
//!     runner.spawn(my_worker(runner.publisher(), shutdown));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use publisher::{BusPublisher, MqttPublisher, PublishStats};
pub use runner::{BridgeRunner, DEFAULT_WORKER_GRACE};
pub use status::{BridgeStatus, StatusPublisher};

// Re-export commonly used types from blesight-common
pub use blesight_common::{Format, LoggingConfig, MqttConfig, SampleBatch, TopicBuilder};
