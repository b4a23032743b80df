use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet};
use tokio::sync::watch;

use crate::config::MqttConfig;
use crate::error::Result;

/// Delay before polling the event loop again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Generate a per-run client identifier: `<prefix>-<8 hex chars>`.
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// Build client options from the configuration.
pub fn mqtt_options(
    config: &MqttConfig,
    client_id: &str,
    last_will: Option<LastWill>,
) -> Result<MqttOptions> {
    config.validate()?;

    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    if let Some(credentials) = &config.credentials {
        options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    if let Some(will) = last_will {
        options.set_last_will(will);
    }

    Ok(options)
}

/// Create an MQTT client for the configured broker.
///
/// Nothing goes over the network until the returned [`EventLoop`] is polled,
/// either by [`drive_event_loop`] or by the caller.
pub fn connect(
    config: &MqttConfig,
    client_id: &str,
    last_will: Option<LastWill>,
) -> Result<(AsyncClient, EventLoop)> {
    let options = mqtt_options(config, client_id, last_will)?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        client_id = %client_id,
        "Connecting to MQTT broker"
    );

    Ok(AsyncClient::new(options, config.request_capacity))
}

/// Poll the event loop until the client disconnects.
///
/// Connection errors are logged and retried; the loop ends once a
/// `Disconnect` packet has gone out, or on the first error after `closing`
/// flips to `true`.
pub async fn drive_event_loop(mut eventloop: EventLoop, mut closing: watch::Receiver<bool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(code = ?ack.code, "Connected to MQTT broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT disconnect sent");
                break;
            }
            Ok(event) => {
                tracing::trace!(?event, "MQTT event");
            }
            Err(e) => {
                if *closing.borrow() {
                    tracing::debug!(error = %e, "MQTT event loop stopped");
                    break;
                }

                tracing::warn!(error = %e, "MQTT connection error, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = closing.changed() => {}
                }
            }
        }
    }
}
