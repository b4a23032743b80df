//! Per-connection notification handling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use blesight_bridge_framework::{BusPublisher, PublishStats};
use blesight_common::{TelemetrySample, decode_be_value};

use crate::buffer::TelemetryBuffer;
use crate::clock::Clock;
use crate::sink::FlushSink;
use crate::transport::Frame;

/// Counters for one connection's worth of notifications.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandlerStats {
    pub notifications: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    /// Payloads published raw but kept out of the buffer because their value
    /// does not fit in 64 bits.
    pub oversized: u64,
    pub publish: PublishStats,
}

impl HandlerStats {
    /// Add another connection's counters to these.
    pub fn merge(&mut self, other: &HandlerStats) {
        self.notifications += other.notifications;
        self.flushes += other.flushes;
        self.flush_failures += other.flush_failures;
        self.oversized += other.oversized;
        self.publish.success += other.publish.success;
        self.publish.failed += other.publish.failed;
    }
}

/// Decodes, buffers and republishes every notification of one connection.
pub struct NotificationHandler {
    source: String,
    buffer: TelemetryBuffer,
    sink: Box<dyn FlushSink>,
    publisher: Arc<dyn BusPublisher>,
    data_topic: String,
    clock: Arc<dyn Clock>,
    last_sample_time: DateTime<Utc>,
    stats: HandlerStats,
}

impl NotificationHandler {
    /// Create a handler whose first delay is measured from `connected_at`.
    pub fn new(
        source: impl Into<String>,
        capacity: usize,
        sink: Box<dyn FlushSink>,
        publisher: Arc<dyn BusPublisher>,
        data_topic: impl Into<String>,
        clock: Arc<dyn Clock>,
        connected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            buffer: TelemetryBuffer::new(capacity),
            sink,
            publisher,
            data_topic: data_topic.into(),
            clock,
            last_sample_time: connected_at,
            stats: HandlerStats::default(),
        }
    }

    /// Process one notification.
    ///
    /// The raw payload is always published. Returns the buffered sample, or
    /// `None` when the payload is too wide to decode. Failures are logged and
    /// counted; nothing propagates to the transport.
    pub async fn handle(&mut self, payload: &[u8]) -> Option<TelemetrySample> {
        self.stats.notifications += 1;

        let sample = match decode_be_value(payload) {
            Ok(value) => {
                let now = self.clock.now();
                let sample = TelemetrySample::new(value, now, self.last_sample_time);
                self.last_sample_time = now;
                self.buffer.append(sample);
                self.flush_if_full().await;
                Some(sample)
            }
            Err(e) => {
                self.stats.oversized += 1;
                warn!(device = %self.source, error = %e, "Payload not buffered");
                None
            }
        };

        let result = self.publisher.publish(&self.data_topic, payload.to_vec());
        if let Err(e) = &result {
            warn!(topic = %self.data_topic, error = %e, "Failed to publish notification");
        }
        self.stats.publish.record(&result);

        if let Some(sample) = &sample {
            debug!(
                device = %self.source,
                value = sample.value,
                delay_us = sample.delay_us,
                buffered = self.buffer.len(),
                "Notification"
            );
        }
        sample
    }

    async fn flush_if_full(&mut self) {
        if !self.buffer.is_full() {
            return;
        }
        let flushed = self
            .buffer
            .flush_and_clear(&self.source, self.sink.as_mut())
            .await;
        match flushed {
            Ok(count) => {
                self.stats.flushes += 1;
                debug!(device = %self.source, samples = count, "Flushed buffer");
            }
            Err(e) => {
                self.stats.flush_failures += 1;
                warn!(device = %self.source, sink = self.sink.name(), error = %e, "Flush failed");
            }
        }
    }

    /// Drain `frames` until the transport drops its sender.
    pub async fn run(mut self, mut frames: mpsc::Receiver<Frame>) -> Self {
        while let Some(frame) = frames.recv().await {
            self.handle(&frame).await;
        }
        self
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> HandlerStats {
        self.stats
    }

    pub fn last_sample_time(&self) -> DateTime<Utc> {
        self.last_sample_time
    }

    /// Give back the sink so the next connection can reuse it.
    pub fn into_sink(self) -> Box<dyn FlushSink> {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blesight_bridge_framework::{BridgeError, SampleBatch};
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex;

    use crate::clock::ManualClock;
    use crate::sink::SinkError;

    #[derive(Default)]
    struct Recorded {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl BusPublisher for Recorded {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> blesight_bridge_framework::Result<()> {
            if self.fail {
                return Err(BridgeError::publish(topic, "broker unreachable"));
            }
            self.sent.lock().push((topic.to_string(), payload));
            Ok(())
        }

        fn publish_retained(
            &self,
            topic: &str,
            payload: Vec<u8>,
        ) -> blesight_bridge_framework::Result<()> {
            self.publish(topic, payload)
        }
    }

    #[derive(Clone, Default)]
    struct Batches(Arc<Mutex<Vec<SampleBatch>>>);

    #[async_trait]
    impl FlushSink for Batches {
        fn name(&self) -> &str {
            "memory"
        }

        async fn flush(&mut self, batch: &SampleBatch) -> Result<(), SinkError> {
            self.0.lock().push(batch.clone());
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn handler(
        capacity: usize,
        publisher: Arc<Recorded>,
        batches: Batches,
        clock: ManualClock,
    ) -> NotificationHandler {
        NotificationHandler::new(
            "Nano33BLE",
            capacity,
            Box::new(batches),
            publisher,
            "blesight/ble/notifications",
            Arc::new(clock),
            t0(),
        )
    }

    #[tokio::test]
    async fn test_below_capacity_never_flushes() {
        let batches = Batches::default();
        let mut h = handler(
            4,
            Arc::new(Recorded::default()),
            batches.clone(),
            ManualClock::new(t0()),
        );

        for i in 0..3u8 {
            h.handle(&[i]).await;
        }

        assert_eq!(h.buffer().len(), 3);
        assert!(batches.0.lock().is_empty());
        assert_eq!(h.stats().flushes, 0);
    }

    #[tokio::test]
    async fn test_flush_at_every_multiple() {
        let batches = Batches::default();
        let mut h = handler(
            3,
            Arc::new(Recorded::default()),
            batches.clone(),
            ManualClock::new(t0()),
        );

        for i in 1..=7u8 {
            h.handle(&[i]).await;
            if i % 3 == 0 {
                assert_eq!(h.buffer().len(), 0);
                assert_eq!(batches.0.lock().len(), usize::from(i / 3));
            }
        }

        let flushed = batches.0.lock();
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|b| b.len() == 3));
        assert_eq!(flushed[0].values, vec![1, 2, 3]);
        assert_eq!(flushed[1].values, vec![4, 5, 6]);
        assert_eq!(h.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_delays() {
        let clock = ManualClock::new(t0());
        let mut h = handler(
            16,
            Arc::new(Recorded::default()),
            Batches::default(),
            clock.clone(),
        );

        clock.advance(Duration::milliseconds(40));
        let first = h.handle(&[1]).await.unwrap();
        assert_eq!(first.delay_us, 40_000);

        clock.advance(Duration::microseconds(1_250));
        let second = h.handle(&[2]).await.unwrap();
        assert_eq!(second.delay_us, 1_250);
        assert_eq!(second.received_at - first.received_at, Duration::microseconds(1_250));
        assert_eq!(h.last_sample_time(), second.received_at);
    }

    #[tokio::test]
    async fn test_publishes_raw_bytes() {
        let publisher = Arc::new(Recorded::default());
        let mut h = handler(
            2,
            publisher.clone(),
            Batches::default(),
            ManualClock::new(t0()),
        );

        let payloads: [&[u8]; 3] = [&[0x01, 0x02], &[], &[0xff; 12]];
        for payload in payloads {
            h.handle(payload).await;
        }

        let sent = publisher.sent.lock();
        assert_eq!(sent.len(), 3);
        assert_eq!(h.stats().oversized, 1);
        for ((topic, bytes), payload) in sent.iter().zip(payloads) {
            assert_eq!(topic, "blesight/ble/notifications");
            assert_eq!(bytes.as_slice(), payload);
        }
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let publisher = Arc::new(Recorded {
            fail: true,
            ..Default::default()
        });
        let batches = Batches::default();
        let mut h = handler(1, publisher, batches.clone(), ManualClock::new(t0()));

        let sample = h.handle(&[0x00, 0x2a]).await.unwrap();

        assert_eq!(sample.value, 42);
        assert_eq!(h.stats().publish.failed, 1);
        assert_eq!(batches.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_wide_payload_published_but_not_buffered() {
        let clock = ManualClock::new(t0());
        let publisher = Arc::new(Recorded::default());
        let batches = Batches::default();
        let mut h = handler(2, publisher.clone(), batches.clone(), clock.clone());

        clock.advance(Duration::milliseconds(5));
        let wide = [0x01, 0, 0, 0, 0, 0, 0, 0, 0x05];
        assert_eq!(h.handle(&wide).await, None);
        assert_eq!(h.buffer().len(), 0);
        assert_eq!(h.stats().oversized, 1);

        // The next delay still counts from the last buffered sample.
        clock.advance(Duration::milliseconds(5));
        let sample = h.handle(&[0x07]).await.unwrap();
        assert_eq!(sample.delay_us, 10_000);

        h.handle(&[0x08]).await;
        assert_eq!(batches.0.lock()[0].values, vec![7, 8]);

        let sent = publisher.sent.lock();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].1, wide.to_vec());
        assert_eq!(h.stats().notifications, 3);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (tx, rx) = mpsc::channel(8);
        let h = handler(
            8,
            Arc::new(Recorded::default()),
            Batches::default(),
            ManualClock::new(t0()),
        );

        for i in 0..5u8 {
            tx.send(vec![i]).await.unwrap();
        }
        drop(tx);

        let h = h.run(rx).await;
        assert_eq!(h.stats().notifications, 5);
        assert_eq!(h.buffer().len(), 5);
        assert_eq!(h.into_sink().name(), "memory");
    }
}
