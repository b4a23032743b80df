//! MQTT bridge for BLE GATT notifications.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::info;

use blesight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, BusPublisher};
use mqtt_bridge_ble::btle::BtleCentral;
use mqtt_bridge_ble::config::BleBridgeConfig;
use mqtt_bridge_ble::selector::DeviceSelector;
use mqtt_bridge_ble::supervisor::{ConnectionSupervisor, SupervisorConfig};
use mqtt_bridge_ble::transport::BleCentral;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("ble.json5");

    let config = BleBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    let supervisor_config = SupervisorConfig::from(&config.ble);

    // The supervisor must be able to release the link before it is aborted.
    let mut runner = BridgeRunner::new_with_args("ble", config, Some(&args))
        .await?
        .with_status_publishing()
        .with_worker_grace(supervisor_config.shutdown_budget());

    let config = runner.config().clone();
    let mqtt = runner.publisher();
    let topics = mqtt.topics().clone();
    let publisher: Arc<dyn BusPublisher> = Arc::new(mqtt);

    let central: Arc<dyn BleCentral> = Arc::new(
        BtleCentral::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );

    let selector = DeviceSelector::new(
        central.clone(),
        &config.ble,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    let sink = config.sinks.build(publisher.clone(), &topics.batch_topic());

    let supervisor = ConnectionSupervisor::new(
        supervisor_config,
        central,
        Box::new(selector),
        publisher,
        sink,
        runner.shutdown_signal(),
    )
    .with_link_topic(topics.link_topic());

    runner.spawn(async move {
        let report = supervisor.start().await;
        info!(?report, "Supervisor finished");
    });

    let metadata = serde_json::json!({
        "broker": format!("{}:{}", config.mqtt.host, config.mqtt.port),
        "data_topic": config.ble.data_topic,
        "characteristic": config.ble.read_characteristic.to_string(),
        "buffer_capacity": config.ble.buffer_capacity,
        "csv": config.sinks.csv.as_ref().map(|c| c.path.display().to_string()),
        "publish_batches": config.sinks.publish_batches,
        "batch_format": config.sinks.batch_format,
    });

    runner.run_with_metadata(Some(metadata)).await?;

    // The stdin reader thread may still be parked on a read the operator
    // never finished; do not let it hold the process open.
    std::process::exit(0)
}
