//! Fixed-capacity sample buffer.

use blesight_common::{LengthMismatch, SampleBatch, TelemetrySample};

use crate::sink::{FlushSink, SinkError};

/// Why a flush did not complete.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The buffer is out of step with itself and was left untouched.
    #[error(transparent)]
    LengthMismatch(#[from] LengthMismatch),

    /// The batch left the buffer but the sink failed to store it.
    #[error("Flush sink failed: {0}")]
    Sink(#[from] SinkError),
}

/// Parallel sequences of values, timestamps and delays.
///
/// Owned by one notification handler; appends and flushes never interleave.
#[derive(Debug, Clone)]
pub struct TelemetryBuffer {
    capacity: usize,
    values: Vec<u64>,
    timestamps: Vec<chrono::DateTime<chrono::Utc>>,
    delays_us: Vec<i64>,
}

impl TelemetryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
            delays_us: Vec::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, sample: TelemetrySample) {
        self.values.push(sample.value);
        self.timestamps.push(sample.received_at);
        self.delays_us.push(sample.delay_us);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Hand every buffered sample to `sink` and empty the buffer.
    ///
    /// A [`LengthMismatch`] aborts before anything is moved. Once the check
    /// passes the buffer is emptied even if the sink then fails.
    pub async fn flush_and_clear(
        &mut self,
        source: &str,
        sink: &mut dyn FlushSink,
    ) -> Result<usize, BufferError> {
        let count = self.check()?;

        let batch = SampleBatch {
            source: source.to_string(),
            values: std::mem::replace(&mut self.values, Vec::with_capacity(self.capacity)),
            timestamps: std::mem::replace(&mut self.timestamps, Vec::with_capacity(self.capacity)),
            delays_us: std::mem::replace(&mut self.delays_us, Vec::with_capacity(self.capacity)),
        };

        sink.flush(&batch).await?;
        Ok(count)
    }

    fn check(&self) -> Result<usize, LengthMismatch> {
        let (values, timestamps, delays) =
            (self.values.len(), self.timestamps.len(), self.delays_us.len());
        if values == timestamps && timestamps == delays {
            Ok(values)
        } else {
            Err(LengthMismatch {
                values,
                timestamps,
                delays,
            })
        }
    }
}
