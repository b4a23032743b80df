//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use rumqttc::AsyncClient;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use blesight_common::{LoggingConfig, connect, drive_event_loop, generate_client_id, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::MqttPublisher;
use crate::status::{BridgeStatus, StatusPublisher};

/// How long workers get to wind down after the shutdown signal, unless
/// overridden with [`BridgeRunner::with_worker_grace`].
pub const DEFAULT_WORKER_GRACE: Duration = Duration::from_secs(5);

/// How long the MQTT event loop gets to flush the final messages.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Bridge runner that manages the lifecycle of a bridge.
///
/// Handles:
/// - Logging initialization
/// - MQTT client creation, with an "offline" last will
/// - Driving the MQTT event loop
/// - Task spawning and cooperative shutdown
/// - Graceful shutdown on Ctrl+C (a second Ctrl+C aborts workers)
/// - Status publishing (optional)
///
/// # Example
///
/// ```ignore
/// use blesight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new("mybridge", config).await?;
///
///     let publisher = runner.publisher();
///     let shutdown = runner.shutdown_signal();
///     runner.spawn(async move {
///         // Worker logic here, returning once `shutdown` flips to true
///     });
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// MQTT client.
    client: AsyncClient,
    /// Publisher for bridge output.
    publisher: MqttPublisher,
    /// Status publisher (optional).
    status_publisher: Option<StatusPublisher>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
    /// Wind-down allowance for workers after the shutdown signal.
    worker_grace: Duration,
    /// Broadcasts the shutdown request to workers.
    shutdown_tx: watch::Sender<bool>,
    /// Tells the event loop driver that errors are expected now.
    closing_tx: watch::Sender<bool>,
    /// MQTT event loop driver.
    event_loop: JoinHandle<()>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Create the MQTT client and start its event loop
    /// 3. Create the publisher
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        // Initialize logging with optional CLI override
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                ..config.logging().clone()
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let client_id = generate_client_id(&config.mqtt().client_id_prefix);
        let status_topic = blesight_common::TopicBuilder::new(config.topic_prefix()).status_topic();
        let will = BridgeStatus::offline(&name, &version).last_will(&status_topic)?;

        let (client, eventloop) = connect(config.mqtt(), &client_id, Some(will))
            .map_err(|e| BridgeError::Broker(e.to_string()))?;

        let (closing_tx, closing_rx) = watch::channel(false);
        let event_loop = tokio::spawn(drive_event_loop(eventloop, closing_rx));
        let (shutdown_tx, _) = watch::channel(false);

        let publisher = MqttPublisher::new(client.clone(), config.topic_prefix());

        Ok(Self {
            name,
            version,
            config,
            client,
            publisher,
            status_publisher: None,
            tasks: Vec::new(),
            worker_grace: DEFAULT_WORKER_GRACE,
            shutdown_tx,
            closing_tx,
            event_loop,
        })
    }

    /// Enable status publishing.
    ///
    /// When enabled, the runner will publish status messages on startup and shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = Some(StatusPublisher::new(
            self.publisher.clone(),
            &self.name,
            &self.version,
        ));
        self
    }

    /// Give workers at least `grace` to stop after the shutdown signal.
    ///
    /// Workers that release external resources on shutdown should pass the
    /// longest release they may need; the grace never drops below
    /// [`DEFAULT_WORKER_GRACE`].
    pub fn with_worker_grace(mut self, grace: Duration) -> Self {
        self.worker_grace = grace.max(DEFAULT_WORKER_GRACE);
        self
    }

    /// Get the configured worker grace period.
    pub fn worker_grace(&self) -> Duration {
        self.worker_grace
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> MqttPublisher {
        self.publisher.clone()
    }

    /// Subscribe to the shutdown signal.
    ///
    /// The value flips to `true` once Ctrl+C is received. Workers should
    /// observe it at every suspension point and return promptly.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a worker task.
    ///
    /// The task gets the worker grace period after the shutdown signal, then
    /// is aborted.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C is received.
    ///
    /// This will:
    /// 1. Publish "running" status (if enabled)
    /// 2. Wait for Ctrl+C signal
    /// 3. Signal workers and wait for them to finish (bounded)
    /// 4. Publish "offline" status (if enabled)
    /// 5. Disconnect from the broker
    pub async fn run(self) -> Result<()> {
        self.run_with_metadata(None).await
    }

    /// Run the bridge with custom status metadata.
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_running(metadata) {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }

        tracing::info!(bridge = %self.name, "Received shutdown signal");
        self.shutdown().await
    }

    /// Stop workers, publish offline status, and disconnect.
    async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let mut tasks = self.tasks;
        let interrupt = async {
            if signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        match stop_workers(&mut tasks, self.worker_grace, interrupt).await {
            WorkerStop::Finished => tracing::debug!("All workers stopped"),
            WorkerStop::TimedOut => tracing::warn!(
                grace_secs = self.worker_grace.as_secs(),
                "Workers did not stop in time, aborting"
            ),
            WorkerStop::Interrupted => tracing::warn!("Second Ctrl+C, aborting workers"),
        }

        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        let _ = self.closing_tx.send(true);
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(error = %e, "Error disconnecting from MQTT broker");
        }

        let mut event_loop = self.event_loop;
        if tokio::time::timeout(FLUSH_GRACE, &mut event_loop).await.is_err() {
            tracing::warn!("MQTT event loop did not stop in time");
            event_loop.abort();
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// How the wind-down of workers ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerStop {
    Finished,
    TimedOut,
    Interrupted,
}

/// Wait for every worker to return, up to `grace` or until `interrupt`
/// resolves. Workers still running afterwards are aborted.
async fn stop_workers(
    tasks: &mut [JoinHandle<()>],
    grace: Duration,
    interrupt: impl Future<Output = ()>,
) -> WorkerStop {
    let wind_down = async {
        for task in tasks.iter_mut() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Worker panicked");
                }
            }
        }
    };

    let outcome = tokio::select! {
        _ = wind_down => WorkerStop::Finished,
        _ = tokio::time::sleep(grace) => WorkerStop::TimedOut,
        _ = interrupt => WorkerStop::Interrupted,
    };

    for task in tasks.iter() {
        task.abort();
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn worker(
        shutdown: &watch::Sender<bool>,
        wind_down: Duration,
        done: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = rx.wait_for(|stop| *stop).await;
            tokio::time::sleep(wind_down).await;
            done.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_worker_finishes_within_grace() {
        let (shutdown, _) = watch::channel(false);
        let done = Arc::new(AtomicBool::new(false));
        let mut tasks = vec![worker(&shutdown, Duration::from_secs(7), done.clone())];

        shutdown.send_replace(true);
        let outcome =
            stop_workers(&mut tasks, Duration::from_secs(35), std::future::pending()).await;

        assert_eq!(outcome, WorkerStop::Finished);
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_past_grace_is_aborted() {
        let (shutdown, _) = watch::channel(false);
        let done = Arc::new(AtomicBool::new(false));
        let mut tasks = vec![worker(&shutdown, Duration::from_secs(7), done.clone())];

        shutdown.send_replace(true);
        let outcome = stop_workers(&mut tasks, DEFAULT_WORKER_GRACE, std::future::pending()).await;

        assert_eq!(outcome, WorkerStop::TimedOut);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!done.load(Ordering::SeqCst));
        assert!(tasks[0].is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_aborts_at_once() {
        let (shutdown, _) = watch::channel(false);
        let done = Arc::new(AtomicBool::new(false));
        let mut tasks = vec![worker(&shutdown, Duration::from_secs(7), done.clone())];

        shutdown.send_replace(true);
        let started = tokio::time::Instant::now();
        let outcome =
            stop_workers(&mut tasks, Duration::from_secs(35), std::future::ready(())).await;

        assert_eq!(outcome, WorkerStop::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!done.load(Ordering::SeqCst));
    }
}
