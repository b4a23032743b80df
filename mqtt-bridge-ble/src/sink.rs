//! Destinations for flushed sample batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use blesight_bridge_framework::{BridgeError, BusPublisher, Format, SampleBatch};
use blesight_common::{LengthMismatch, encode};

use crate::config::SinkConfig;

/// Header written once to an empty CSV dump.
pub const CSV_HEADER: &str = "time,delay,data_value,\n";

/// Timestamp layout of CSV rows.
const CSV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Flush sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    LengthMismatch(#[from] LengthMismatch),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode batch: {0}")]
    Encode(String),

    #[error(transparent)]
    Publish(#[from] BridgeError),

    #[error("{failed} of {total} sinks failed, first: {first}")]
    Fanout {
        failed: usize,
        total: usize,
        first: String,
    },
}

/// Receives every batch the buffer flushes.
#[async_trait]
pub trait FlushSink: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn flush(&mut self, batch: &SampleBatch) -> Result<(), SinkError>;
}

/// Logs a one-line summary of each batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl FlushSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn flush(&mut self, batch: &SampleBatch) -> Result<(), SinkError> {
        let count = batch.validate()?;
        let mean_delay_us = if count == 0 {
            0
        } else {
            batch.delays_us.iter().sum::<i64>() / count as i64
        };

        info!(
            device = %batch.source,
            samples = count,
            first = ?batch.timestamps.first(),
            last = ?batch.timestamps.last(),
            mean_delay_us,
            "Buffer flushed"
        );
        Ok(())
    }
}

/// Appends batches to a CSV file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Render a batch as CSV rows, header included when `with_header` is set.
pub fn render_csv(batch: &SampleBatch, with_header: bool) -> Result<String, LengthMismatch> {
    batch.validate()?;

    let mut out = String::new();
    if with_header {
        out.push_str(CSV_HEADER);
    }
    for sample in batch.samples() {
        out.push_str(&format!(
            "{},{},{},\n",
            sample.received_at.format(CSV_TIME_FORMAT),
            sample.delay_us,
            sample.value
        ));
    }
    Ok(out)
}

#[async_trait]
impl FlushSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn flush(&mut self, batch: &SampleBatch) -> Result<(), SinkError> {
        // Checked before the file is touched.
        batch.validate()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        let empty = file
            .metadata()
            .await
            .map_err(|e| self.io_error(e))?
            .len()
            == 0;

        let text = render_csv(batch, empty)?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), rows = batch.len(), "Batch appended");
        Ok(())
    }
}

/// Publishes each batch as one document on the bus.
pub struct BatchPublishSink {
    publisher: Arc<dyn BusPublisher>,
    topic: String,
    format: Format,
}

impl BatchPublishSink {
    pub fn new(publisher: Arc<dyn BusPublisher>, topic: impl Into<String>, format: Format) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            format,
        }
    }
}

#[async_trait]
impl FlushSink for BatchPublishSink {
    fn name(&self) -> &str {
        "batch"
    }

    async fn flush(&mut self, batch: &SampleBatch) -> Result<(), SinkError> {
        batch.validate()?;
        let payload = encode(batch, self.format).map_err(|e| SinkError::Encode(e.to_string()))?;
        self.publisher.publish(&self.topic, payload)?;
        Ok(())
    }
}

/// Forwards each batch to several sinks.
///
/// Every sink sees every batch, even after an earlier sink failed.
pub struct FanoutSink {
    sinks: Vec<Box<dyn FlushSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn FlushSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl FlushSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn flush(&mut self, batch: &SampleBatch) -> Result<(), SinkError> {
        let total = self.sinks.len();
        let mut failed = 0;
        let mut first = None;

        for sink in &mut self.sinks {
            if let Err(e) = sink.flush(batch).await {
                warn!(sink = sink.name(), error = %e, "Flush sink failed");
                failed += 1;
                first.get_or_insert_with(|| format!("{}: {}", sink.name(), e));
            }
        }

        match first {
            None => Ok(()),
            Some(first) => Err(SinkError::Fanout {
                failed,
                total,
                first,
            }),
        }
    }
}

impl SinkConfig {
    /// Build the sink pipeline: always a log summary, plus CSV and batch
    /// publishing when configured.
    pub fn build(&self, publisher: Arc<dyn BusPublisher>, batch_topic: &str) -> Box<dyn FlushSink> {
        let mut sinks: Vec<Box<dyn FlushSink>> = vec![Box::new(LogSink)];

        if let Some(csv) = &self.csv {
            info!(path = %csv.path.display(), "Dumping flushed batches to CSV");
            sinks.push(Box::new(CsvSink::new(csv.path.clone())));
        }

        if self.publish_batches {
            info!(topic = %batch_topic, format = ?self.batch_format, "Publishing flushed batches");
            sinks.push(Box::new(BatchPublishSink::new(
                publisher,
                batch_topic,
                self.batch_format,
            )));
        }

        if sinks.len() == 1 {
            Box::new(LogSink)
        } else {
            Box::new(FanoutSink::new(sinks))
        }
    }
}
