//! Device discovery and operator selection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{debug, info, warn};

use crate::config::BleConfig;
use crate::transport::{BleCentral, DeviceDescriptor, TransportError};

/// Selection failures that end one selection attempt.
///
/// All of them are recovered by the supervisor, which backs off and asks again.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("Discovery failed: {0}")]
    Discovery(#[from] TransportError),

    #[error("No peripherals found")]
    NoDevices,

    #[error("No discovered device matches '{0}'")]
    NoMatch(String),

    #[error("Operator input closed")]
    InputClosed,

    #[error("Operator I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operator input that does not name a listed device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSelection {
    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("{index} is out of range (0..{count})")]
    OutOfRange { index: i64, count: usize },
}

/// Parse an operator's index choice against a list of `count` devices.
pub fn parse_selection(input: &str, count: usize) -> Result<usize, InvalidSelection> {
    let trimmed = input.trim();
    let index: i64 = trimmed
        .parse()
        .map_err(|_| InvalidSelection::NotANumber(trimmed.to_string()))?;

    usize::try_from(index)
        .ok()
        .filter(|&i| i < count)
        .ok_or(InvalidSelection::OutOfRange { index, count })
}

/// Something that can produce the next device to bind.
#[async_trait]
pub trait SelectDevice: Send {
    async fn select(&mut self) -> Result<DeviceDescriptor, SelectError>;
}

/// Scans with a [`BleCentral`] and lets the operator pick a device.
///
/// Reads the choice from `input` and writes the listing and prompts to
/// `output`, so stdin/stdout in production and in-memory buffers in tests.
pub struct DeviceSelector<R, W> {
    central: Arc<dyn BleCentral>,
    warmup: Duration,
    scan: Duration,
    auto_select: Option<String>,
    input: Lines<R>,
    output: W,
}

impl<R, W> DeviceSelector<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(central: Arc<dyn BleCentral>, config: &BleConfig, input: R, output: W) -> Self {
        Self {
            central,
            warmup: config.warmup(),
            scan: config.scan(),
            auto_select: config.auto_select.clone(),
            input: input.lines(),
            output,
        }
    }

    /// Give back the operator output, e.g. to inspect what was shown.
    pub fn into_output(self) -> W {
        self.output
    }

    /// Run discovery and return whatever the central saw.
    pub async fn discover(&mut self) -> Result<Vec<DeviceDescriptor>, SelectError> {
        info!("Bluetooth LE hardware warming up");
        tokio::time::sleep(self.warmup).await;

        info!(duration = ?self.scan, "Scanning for peripherals");
        let devices = self.central.scan(self.scan).await?;
        if devices.is_empty() {
            return Err(SelectError::NoDevices);
        }

        info!(count = devices.len(), "Discovery finished");
        Ok(devices)
    }

    async fn prompt(&mut self, devices: &[DeviceDescriptor]) -> Result<usize, SelectError> {
        let mut listing = String::from("Please select device:\n");
        for (i, device) in devices.iter().enumerate() {
            listing.push_str(&format!("{}: {}\n", i, device));
        }
        self.output.write_all(listing.as_bytes()).await?;

        loop {
            self.output.write_all(b"Select device: ").await?;
            self.output.flush().await?;

            let line = self
                .input
                .next_line()
                .await?
                .ok_or(SelectError::InputClosed)?;

            match parse_selection(&line, devices.len()) {
                Ok(index) => return Ok(index),
                Err(e) => {
                    debug!(error = %e, "Rejected selection");
                    self.output
                        .write_all(b"Please make valid selection.\n")
                        .await?;
                }
            }
        }
    }
}

#[async_trait]
impl<R, W> SelectDevice for DeviceSelector<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn select(&mut self) -> Result<DeviceDescriptor, SelectError> {
        let mut devices = self.discover().await?;

        if let Some(needle) = &self.auto_select {
            return match devices.iter().position(|d| d.matches(needle)) {
                Some(index) => Ok(devices.swap_remove(index)),
                None => {
                    warn!(auto_select = %needle, count = devices.len(), "No device matched");
                    Err(SelectError::NoMatch(needle.clone()))
                }
            };
        }

        let index = self.prompt(&devices).await?;
        Ok(devices.swap_remove(index))
    }
}
