//! BLE transport seam.
//!
//! The supervisor, selector and handler only see these traits. The btleplug
//! backend lives in [`crate::btle`]; tests provide scripted fakes.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Raw bytes of one GATT notification.
pub type Frame = Vec<u8>;

/// A peripheral found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceDescriptor {
    /// Advertised local name, or "Unknown".
    pub name: String,
    /// Platform address used to reach the device.
    pub address: String,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Whether `needle` names this device, by exact address or case-insensitive name.
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.trim();
        self.address.eq_ignore_ascii_case(needle) || self.name.eq_ignore_ascii_case(needle)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Device {0} is not known to the adapter; scan again")]
    UnknownDevice(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Bluetooth error: {0}")]
    Ble(String),
}

/// The local BLE central role: discovery and connection.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Scan for `duration` and return every peripheral seen.
    async fn scan(&self, duration: Duration) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Connect to a previously discovered device.
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn BleLink>, TransportError>;
}

/// An established connection to one peripheral.
#[async_trait]
pub trait BleLink: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Start delivering notifications of `characteristic` into `frames`.
    ///
    /// Delivery stops, and `frames` is dropped, when the link goes down or
    /// [`unsubscribe`](Self::unsubscribe) is called.
    async fn subscribe(
        &self,
        characteristic: Uuid,
        frames: mpsc::Sender<Frame>,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_matches() {
        let device = DeviceDescriptor::new("Nano33BLE", "AA:BB:CC:DD:EE:FF");

        assert!(device.matches("nano33ble"));
        assert!(device.matches("aa:bb:cc:dd:ee:ff"));
        assert!(device.matches(" Nano33BLE "));
        assert!(!device.matches("Nano"));
        assert_eq!(device.to_string(), "Nano33BLE (AA:BB:CC:DD:EE:FF)");
    }
}
