//! btleplug backend for the transport traits.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{BleCentral, BleLink, DeviceDescriptor, Frame, TransportError};

fn ble_error(e: btleplug::Error) -> TransportError {
    TransportError::Ble(e.to_string())
}

/// Central backed by the first local Bluetooth adapter.
pub struct BtleCentral {
    adapter: Adapter,
    /// Peripherals from the most recent scan, keyed by address.
    known: Mutex<HashMap<String, Peripheral>>,
}

impl BtleCentral {
    /// Open the first adapter reported by the platform.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(ble_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(ble_error)?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!(adapter = %info, "Using Bluetooth adapter"),
            Err(e) => debug!(error = %e, "Adapter info unavailable"),
        }

        Ok(Self {
            adapter,
            known: Mutex::new(HashMap::new()),
        })
    }

    fn lookup(&self, address: &str) -> Option<Peripheral> {
        self.known.lock().get(address).cloned()
    }
}

/// Address shown to the operator and used as the lookup key.
///
/// Some platforms hide the hardware address and report all zeros; the
/// platform peripheral id is used instead.
fn peripheral_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address.into_inner() == [0u8; 6] {
        format!("{:?}", peripheral.id())
    } else {
        address.to_string()
    }
}

#[async_trait]
impl BleCentral for BtleCentral {
    async fn scan(&self, duration: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?;

        tokio::time::sleep(duration).await;

        let peripherals = self.adapter.peripherals().await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }
        let peripherals = peripherals.map_err(|e| TransportError::Discovery(e.to_string()))?;

        let mut devices = Vec::with_capacity(peripherals.len());
        let mut known = HashMap::with_capacity(peripherals.len());

        for peripheral in peripherals {
            let name = match peripheral.properties().await {
                Ok(Some(props)) => props.local_name,
                Ok(None) => None,
                Err(e) => {
                    debug!(error = %e, "Skipping peripheral without properties");
                    continue;
                }
            }
            .unwrap_or_else(|| "Unknown".to_string());

            let address = peripheral_address(&peripheral);
            devices.push(DeviceDescriptor::new(name, address.clone()));
            known.insert(address, peripheral);
        }

        *self.known.lock() = known;

        debug!(count = devices.len(), "Scan finished");
        Ok(devices)
    }

    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn BleLink>, TransportError> {
        let peripheral = self
            .lookup(&device.address)
            .ok_or_else(|| TransportError::UnknownDevice(device.address.clone()))?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
        }

        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Box::new(BtleLink {
            peripheral,
            pump: Mutex::new(None),
        }))
    }
}

/// A connected btleplug peripheral.
struct BtleLink {
    peripheral: Peripheral,
    /// Task forwarding notifications into the subscriber's channel.
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    fn stop_pump(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl BleLink for BtleLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
        frames: mpsc::Sender<Frame>,
    ) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        if !target
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            warn!(characteristic = %characteristic, "Characteristic does not advertise notify");
        }

        let mut stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let pump = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                // Never stall the transport on a slow consumer.
                match frames.try_send(notification.value) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Notification queue full, dropping frame");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            debug!("Notification stream ended");
        });

        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        self.stop_pump();
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await.map_err(ble_error)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stop_pump();
        self.peripheral.disconnect().await.map_err(ble_error)
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
