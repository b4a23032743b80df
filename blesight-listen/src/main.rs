//! Prints every message a BleSight bridge publishes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use blesight_common::{BaseConfig, LoggingConfig, TopicBuilder, init_tracing, load_config};
use blesight_listen::Listener;

/// Subscribe to a BleSight bridge and print what it publishes.
#[derive(Parser, Debug)]
#[command(name = "blesight-listen")]
#[command(about = "Print raw notifications, batches and status from a BleSight bridge")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format, same `mqtt` section as the bridge).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bridge topic prefix, used to recognize status and batch topics.
    #[arg(long, default_value = "blesight/ble")]
    prefix: String,

    /// Topic to subscribe to; repeatable. Defaults to everything below the prefix.
    #[arg(short, long)]
    topic: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config: BaseConfig = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => BaseConfig::default(),
    };

    init_tracing(&LoggingConfig {
        level: args.log_level.clone(),
        ..config.logging.clone()
    })?;

    let topics = if args.topic.is_empty() {
        vec![TopicBuilder::new(&args.prefix).wildcard()]
    } else {
        args.topic.clone()
    };

    info!(
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        topics = ?topics,
        "Starting blesight-listen"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = Listener::new(config.mqtt.clone(), args.prefix.clone(), topics);

    let task = tokio::spawn(async move {
        match listener.run(shutdown_rx).await {
            Ok(stats) => info!(
                messages = stats.messages,
                bytes = stats.bytes,
                connections = stats.connections,
                "Listener stopped"
            ),
            Err(e) => error!(error = %e, "Listener failed"),
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;

    Ok(())
}
