//! Connection supervisor.
//!
//! Drives the link through three phases:
//!
//! ```text
//! Idle --(device selected)--> Connecting --(link up)--> Connected
//!  ^                              |                         |
//!  +----(retries exhausted)-------+                         |
//!  +----------------(link lost or shutdown)-----------------+
//! ```
//!
//! While idle, the selector is asked for a device and the supervisor backs
//! off before the next attempt. While connected, link health is polled at a
//! fixed interval. Every wait observes the shutdown signal, and the link is
//! released exactly once on every exit path.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use blesight_bridge_framework::BusPublisher;

use crate::clock::{Clock, SystemClock, sleep_or_shutdown, wait_for_shutdown};
use crate::config::BleConfig;
use crate::handler::{HandlerStats, NotificationHandler};
use crate::selector::{SelectDevice, SelectError};
use crate::sink::{FlushSink, LogSink};
use crate::transport::{BleCentral, BleLink, DeviceDescriptor, Frame, TransportError};

/// How long the handler gets to drain queued frames after the link is released.
const HANDLER_DRAIN: Duration = Duration::from_secs(5);

/// Timing and sizing knobs of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub read_characteristic: Uuid,
    pub data_topic: String,
    pub buffer_capacity: usize,
    pub reconnect_backoff: Duration,
    pub health_poll: Duration,
    pub connect_timeout: Duration,
    pub connect_retries: u32,
    pub notification_queue: usize,
}

impl SupervisorConfig {
    /// Longest time the supervisor may need to stop once shutdown is requested.
    ///
    /// An in-flight connect or subscribe settles within one connect timeout,
    /// the release takes up to two more, and the handler drain comes last.
    pub fn shutdown_budget(&self) -> Duration {
        self.connect_timeout * 3 + HANDLER_DRAIN
    }
}

impl From<&BleConfig> for SupervisorConfig {
    fn from(config: &BleConfig) -> Self {
        Self {
            read_characteristic: config.read_characteristic,
            data_topic: config.data_topic.clone(),
            buffer_capacity: config.buffer_capacity,
            reconnect_backoff: config.reconnect_backoff(),
            health_poll: config.health_poll(),
            connect_timeout: config.connect_timeout(),
            connect_retries: config.connect_retries,
            notification_queue: config.notification_queue,
        }
    }
}

/// Supervisor phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPhase {
    Idle,
    Connecting,
    Connected,
}

/// Phase change as observed through [`ConnectionSupervisor::subscribe_state`]
/// and published on the link topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkState {
    pub phase: LinkPhase,
    pub device: Option<DeviceDescriptor>,
    pub since: DateTime<Utc>,
}

/// What the supervisor knows about its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub bound_device: Option<DeviceDescriptor>,
    pub is_connected: bool,
    pub last_sample_time: DateTime<Utc>,
}

/// Counters returned when the supervisor stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorReport {
    pub selections: u64,
    pub selection_failures: u64,
    pub connections: u64,
    pub connect_failures: u64,
    pub releases: u64,
    pub handler: HandlerStats,
}

enum LinkEnd {
    Lost,
    Shutdown,
}

/// Owns the BLE link and everything attached to it.
pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    central: Arc<dyn BleCentral>,
    selector: Box<dyn SelectDevice>,
    publisher: Arc<dyn BusPublisher>,
    /// Parked here between connections, lent to the handler while connected.
    sink: Option<Box<dyn FlushSink>>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
    link: Option<Box<dyn BleLink>>,
    state: ConnectionState,
    phase: watch::Sender<LinkState>,
    link_topic: Option<String>,
    report: SupervisorReport,
}

impl ConnectionSupervisor {
    pub fn new(
        config: SupervisorConfig,
        central: Arc<dyn BleCentral>,
        selector: Box<dyn SelectDevice>,
        publisher: Arc<dyn BusPublisher>,
        sink: Box<dyn FlushSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        let (phase, _) = watch::channel(LinkState {
            phase: LinkPhase::Idle,
            device: None,
            since: now,
        });

        Self {
            config,
            central,
            selector,
            publisher,
            sink: Some(sink),
            clock,
            shutdown,
            link: None,
            state: ConnectionState {
                bound_device: None,
                is_connected: false,
                last_sample_time: now,
            },
            phase,
            link_topic: None,
            report: SupervisorReport::default(),
        }
    }

    /// Use another clock for sample timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.state.last_sample_time = clock.now();
        self.clock = clock;
        self
    }

    /// Publish every phase change as a retained JSON document on `topic`.
    pub fn with_link_topic(mut self, topic: impl Into<String>) -> Self {
        self.link_topic = Some(topic.into());
        self
    }

    /// Watch phase changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.phase.subscribe()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Run until shutdown is requested.
    pub async fn start(mut self) -> SupervisorReport {
        info!(
            characteristic = %self.config.read_characteristic,
            topic = %self.config.data_topic,
            "Connection supervisor started"
        );
        let mut failures = 0u32;

        while !*self.shutdown.borrow() {
            let Some(device) = self.state.bound_device.clone() else {
                self.set_phase(LinkPhase::Idle);

                match self.select_device().await {
                    Some(Ok(device)) => {
                        info!(device = %device, "Device selected");
                        self.report.selections += 1;
                        self.state.bound_device = Some(device);
                        failures = 0;
                    }
                    Some(Err(e)) => {
                        self.report.selection_failures += 1;
                        warn!(error = %e, "Device selection failed");
                    }
                    None => break,
                }

                if !self.pause(self.config.reconnect_backoff).await {
                    break;
                }
                continue;
            };

            let attempt = match self.connect(&device).await {
                Some(Ok(link)) => self.open_notifications(&device, link).await,
                Some(Err(e)) => Err(e),
                None => break,
            };

            match attempt {
                Ok(frames) => {
                    failures = 0;
                    self.supervise(&device, frames).await;
                    self.state.bound_device = None;
                }
                Err(e) => {
                    failures += 1;
                    self.report.connect_failures += 1;
                    warn!(device = %device, attempt = failures, error = %e, "Connection failed");

                    if failures >= self.config.connect_retries {
                        info!(device = %device, attempts = failures, "Giving up on device");
                        self.state.bound_device = None;
                        failures = 0;
                    }
                    self.set_phase(LinkPhase::Idle);

                    if !self.pause(self.config.reconnect_backoff).await {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!(
            connections = self.report.connections,
            notifications = self.report.handler.notifications,
            "Connection supervisor stopped"
        );
        self.report
    }

    /// Unregister notifications, release the link and return to idle.
    ///
    /// Safe to call more than once; the link is released only the first time.
    pub async fn shutdown(&mut self) {
        self.release_link().await;
        self.state.bound_device = None;
        self.set_phase(LinkPhase::Idle);
    }

    async fn select_device(&mut self) -> Option<Result<DeviceDescriptor, SelectError>> {
        tokio::select! {
            result = self.selector.select() => Some(result),
            _ = wait_for_shutdown(&mut self.shutdown) => None,
        }
    }

    /// Returns `None` when shutdown cut the attempt short.
    async fn connect(
        &mut self,
        device: &DeviceDescriptor,
    ) -> Option<Result<Box<dyn BleLink>, TransportError>> {
        self.set_phase(LinkPhase::Connecting);
        info!(device = %device, "Connecting");

        let timeout = self.config.connect_timeout;
        let attempt = tokio::time::timeout(timeout, self.central.connect(device));
        tokio::pin!(attempt);

        tokio::select! {
            result = &mut attempt => {
                return Some(result.unwrap_or(Err(TransportError::Timeout(timeout))));
            }
            _ = wait_for_shutdown(&mut self.shutdown) => {}
        }

        // Let the attempt settle so a link that does come up gets released.
        info!(device = %device, "Shutdown during connect, waiting for the attempt to settle");
        if let Ok(Ok(link)) = attempt.await {
            self.link = Some(link);
        }
        None
    }

    /// Register for notifications on a fresh link.
    ///
    /// The link is kept for release either way; a failure here counts as a
    /// failed connection attempt.
    async fn open_notifications(
        &mut self,
        device: &DeviceDescriptor,
        link: Box<dyn BleLink>,
    ) -> Result<mpsc::Receiver<Frame>, TransportError> {
        let (tx, rx) = mpsc::channel(self.config.notification_queue);
        let timeout = self.config.connect_timeout;
        let subscribed =
            tokio::time::timeout(timeout, link.subscribe(self.config.read_characteristic, tx))
                .await
                .unwrap_or(Err(TransportError::Timeout(timeout)));
        self.link = Some(link);

        match subscribed {
            Ok(()) => Ok(rx),
            Err(e) => {
                warn!(device = %device, error = %e, "Failed to subscribe to notifications");
                self.release_link().await;
                Err(e)
            }
        }
    }

    /// Hold a live link until it drops or shutdown is requested.
    async fn supervise(&mut self, device: &DeviceDescriptor, frames: mpsc::Receiver<Frame>) {
        let connected_at = self.clock.now();
        self.state.is_connected = true;
        self.state.last_sample_time = connected_at;
        self.report.connections += 1;
        self.set_phase(LinkPhase::Connected);
        info!(device = %device, "Connected");

        let sink = self.take_sink();
        let handler = NotificationHandler::new(
            device.name.clone(),
            self.config.buffer_capacity,
            sink,
            self.publisher.clone(),
            self.config.data_topic.clone(),
            self.clock.clone(),
            connected_at,
        );
        let mut task = tokio::spawn(handler.run(frames));

        match self.watch_link(&task).await {
            LinkEnd::Lost => info!(device = %device, "Disconnected"),
            LinkEnd::Shutdown => info!(device = %device, "Disconnecting for shutdown"),
        }

        self.release_link().await;
        self.collect_handler(device, &mut task).await;
    }

    async fn watch_link(&mut self, handler: &JoinHandle<NotificationHandler>) -> LinkEnd {
        loop {
            if !sleep_or_shutdown(self.config.health_poll, &mut self.shutdown).await {
                return LinkEnd::Shutdown;
            }

            let alive = match &self.link {
                Some(link) => link.is_connected().await,
                None => false,
            };
            // A finished handler means the transport dropped the frame channel.
            if !alive || handler.is_finished() {
                return LinkEnd::Lost;
            }
        }
    }

    /// Wait for the handler to drain, then take back the sink.
    async fn collect_handler(
        &mut self,
        device: &DeviceDescriptor,
        task: &mut JoinHandle<NotificationHandler>,
    ) {
        match tokio::time::timeout(HANDLER_DRAIN, &mut *task).await {
            Ok(Ok(handler)) => {
                let stats = handler.stats();
                info!(
                    device = %device,
                    notifications = stats.notifications,
                    flushes = stats.flushes,
                    flush_failures = stats.flush_failures,
                    oversized = stats.oversized,
                    publish_failures = stats.publish.failed,
                    discarded = handler.buffer().len(),
                    "Connection ended"
                );
                self.state.last_sample_time = handler.last_sample_time();
                self.report.handler.merge(&stats);
                self.sink = Some(handler.into_sink());
            }
            Ok(Err(e)) => {
                error!(device = %device, error = %e, "Notification handler failed");
            }
            Err(_) => {
                warn!(device = %device, "Notification handler did not drain in time");
                task.abort();
            }
        }
    }

    fn take_sink(&mut self) -> Box<dyn FlushSink> {
        self.sink.take().unwrap_or_else(|| {
            warn!("Flush sink was lost with a previous handler, falling back to log output");
            Box::new(LogSink)
        })
    }

    async fn release_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let timeout = self.config.connect_timeout;

        match tokio::time::timeout(timeout, link.unsubscribe(self.config.read_characteristic)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Unsubscribe failed"),
            Err(_) => debug!("Unsubscribe timed out"),
        }

        match tokio::time::timeout(timeout, link.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Disconnect failed"),
            Err(_) => warn!("Disconnect timed out"),
        }

        self.state.is_connected = false;
        self.report.releases += 1;
        debug!("Link released");
    }

    async fn pause(&mut self, duration: Duration) -> bool {
        sleep_or_shutdown(duration, &mut self.shutdown).await
    }

    fn set_phase(&self, phase: LinkPhase) {
        let device = self.state.bound_device.clone();
        {
            let current = self.phase.borrow();
            if current.phase == phase && current.device == device {
                return;
            }
        }

        let state = LinkState {
            phase,
            device,
            since: self.clock.now(),
        };

        if let Some(topic) = &self.link_topic {
            match serde_json::to_vec(&state) {
                Ok(payload) => {
                    if let Err(e) = self.publisher.publish_retained(topic, payload) {
                        warn!(error = %e, "Failed to publish link state");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode link state"),
            }
        }

        self.phase.send_replace(state);
    }
}
