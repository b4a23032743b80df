//! Scripted stand-ins for the BLE stack, the broker and the flush sink.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use blesight_bridge_framework::{BridgeError, BusPublisher, SampleBatch};
use mqtt_bridge_ble::config::BleConfig;
use mqtt_bridge_ble::sink::{FlushSink, SinkError};
use mqtt_bridge_ble::transport::{BleCentral, BleLink, DeviceDescriptor, Frame, TransportError};

pub fn devices() -> Vec<DeviceDescriptor> {
    vec![
        DeviceDescriptor::new("Thermo", "11:11:11:11:11:11"),
        DeviceDescriptor::new("Nano33BLE", "22:22:22:22:22:22"),
        DeviceDescriptor::new("Unknown", "33:33:33:33:33:33"),
    ]
}

/// Default link config with the timings the tests reason about.
pub fn ble_config() -> BleConfig {
    BleConfig {
        buffer_capacity: 4,
        auto_select: Some("Nano33BLE".to_string()),
        ..BleConfig::default()
    }
}

/// How the next connect attempt behaves.
#[derive(Debug, Clone, Copy)]
pub enum ConnectOutcome {
    Link,
    Fail,
    /// Connects, but subscribing to notifications fails.
    SubscribeFail,
    /// Succeeds after the given delay.
    Slow(Duration),
}

/// Observes one fake link from the test side.
#[derive(Default)]
pub struct LinkRecord {
    connected: AtomicBool,
    fail_subscribe: AtomicBool,
    frames: Mutex<Option<mpsc::Sender<Frame>>>,
    pub subscribes: AtomicUsize,
    pub unsubscribes: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl LinkRecord {
    /// Push a notification as the peripheral would.
    pub async fn notify(&self, payload: &[u8]) -> bool {
        let sender = self.frames.lock().clone();
        match sender {
            Some(tx) => tx.send(payload.to_vec()).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.frames.lock().take();
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

struct FakeLink(Arc<LinkRecord>);

#[async_trait]
impl BleLink for FakeLink {
    async fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(
        &self,
        _characteristic: Uuid,
        frames: mpsc::Sender<Frame>,
    ) -> Result<(), TransportError> {
        self.0.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Subscribe("CCCD write rejected".to_string()));
        }
        *self.0.frames.lock() = Some(frames);
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> Result<(), TransportError> {
        self.0.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.0.frames.lock().take();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
        self.0.connected.store(false, Ordering::SeqCst);
        self.0.frames.lock().take();
        Ok(())
    }
}

/// A central that "sees" a fixed device list and connects per script.
pub struct FakeCentral {
    devices: Vec<DeviceDescriptor>,
    script: Mutex<VecDeque<ConnectOutcome>>,
    scans: Mutex<Vec<Instant>>,
    connects: Mutex<Vec<(Instant, DeviceDescriptor)>>,
    links: Mutex<Vec<Arc<LinkRecord>>>,
}

impl FakeCentral {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Arc<Self> {
        Self::scripted(devices, [])
    }

    pub fn scripted(
        devices: Vec<DeviceDescriptor>,
        script: impl IntoIterator<Item = ConnectOutcome>,
    ) -> Arc<Self> {
        Arc::new(Self {
            devices,
            script: Mutex::new(script.into_iter().collect()),
            scans: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
        })
    }

    /// When each scan started.
    pub fn scans(&self) -> Vec<Instant> {
        self.scans.lock().clone()
    }

    pub fn connects(&self) -> Vec<DeviceDescriptor> {
        self.connects.lock().iter().map(|(_, d)| d.clone()).collect()
    }

    /// When each connect attempt started.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn links(&self) -> Vec<Arc<LinkRecord>> {
        self.links.lock().clone()
    }

    pub fn last_link(&self) -> Arc<LinkRecord> {
        self.links.lock().last().cloned().expect("no link yet")
    }
}

#[async_trait]
impl BleCentral for FakeCentral {
    async fn scan(&self, duration: Duration) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.scans.lock().push(Instant::now());
        tokio::time::sleep(duration).await;
        Ok(self.devices.clone())
    }

    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn BleLink>, TransportError> {
        self.connects.lock().push((Instant::now(), device.clone()));
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Link);

        let record = Arc::new(LinkRecord::default());
        match outcome {
            ConnectOutcome::Fail => {
                return Err(TransportError::Connection("refused".to_string()));
            }
            ConnectOutcome::SubscribeFail => record.fail_subscribe.store(true, Ordering::SeqCst),
            ConnectOutcome::Slow(delay) => tokio::time::sleep(delay).await,
            ConnectOutcome::Link => {}
        }

        record.connected.store(true, Ordering::SeqCst);
        self.links.lock().push(record.clone());
        Ok(Box::new(FakeLink(record)))
    }
}

/// Records every message instead of sending it.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, Vec<u8>, bool)>>,
}

impl RecordingPublisher {
    pub fn on_topic(&self, topic: &str) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| payload.clone())
            .collect()
    }

    pub fn retained(&self) -> Vec<(String, Vec<u8>)> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, _, retained)| *retained)
            .map(|(t, p, _)| (t.clone(), p.clone()))
            .collect()
    }
}

impl BusPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.sent
            .lock()
            .push((topic.to_string(), payload, false));
        Ok(())
    }

    fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.sent
            .lock()
            .push((topic.to_string(), payload, true));
        Ok(())
    }
}

/// Keeps flushed batches in memory.
#[derive(Clone, Default)]
pub struct MemorySink(pub Arc<Mutex<Vec<SampleBatch>>>);

impl MemorySink {
    pub fn batches(&self) -> Vec<SampleBatch> {
        self.0.lock().clone()
    }
}

#[async_trait]
impl FlushSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn flush(&mut self, batch: &SampleBatch) -> Result<(), SinkError> {
        batch.validate()?;
        self.0.lock().push(batch.clone());
        Ok(())
    }
}
