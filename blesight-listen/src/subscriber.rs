//! MQTT subscriber that prints what the bridge publishes.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use blesight_common::{MqttConfig, connect, generate_client_id};

use crate::render::render_message;

/// Delay before polling again after a connection error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Message counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListenStats {
    pub messages: u64,
    pub bytes: u64,
    pub connections: u64,
}

/// Subscribes to a set of topics and prints every message.
pub struct Listener {
    mqtt: MqttConfig,
    prefix: String,
    topics: Vec<String>,
}

impl Listener {
    pub fn new(mqtt: MqttConfig, prefix: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            mqtt,
            prefix: prefix.into(),
            topics,
        }
    }

    /// Run until the shutdown signal flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<ListenStats> {
        let client_id = generate_client_id(&format!("{}-listen", self.mqtt.client_id_prefix));
        let (client, mut eventloop) = connect(&self.mqtt, &client_id, None)?;
        let mut stats = ListenStats::default();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping listener");
                        break;
                    }
                }

                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        stats.connections += 1;
                        info!(broker = %self.mqtt.host, "Connected, subscribing");
                        // Sessions are clean, so every reconnect subscribes again.
                        self.subscribe_all(&client);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        stats.messages += 1;
                        stats.bytes += publish.payload.len() as u64;
                        println!("{}", render_message(&self.prefix, &publish.topic, &publish.payload));
                    }
                    Ok(event) => trace!(?event, "MQTT event"),
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error, retrying");
                        if !retry_pause(RETRY_DELAY, &mut shutdown).await {
                            info!("Shutdown signal received, stopping listener");
                            break;
                        }
                    }
                },
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
        }

        Ok(stats)
    }

    fn subscribe_all(&self, client: &AsyncClient) {
        for topic in &self.topics {
            match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => info!(topic = %topic, "Subscribed"),
                Err(e) => warn!(topic = %topic, error = %e, "Failed to subscribe"),
            }
        }
    }
}

/// Sleep before the next poll unless shutdown is requested first.
///
/// Returns `false` when shutdown cut the pause short.
async fn retry_pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    tokio::select! {
        _ = &mut sleep => true,
        requested = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
            if requested {
                return false;
            }
            // No sender left, so no request can arrive.
            sleep.await;
            true
        }
    }
}
