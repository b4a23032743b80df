use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded notification together with its timing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Payload decoded as an unsigned big-endian integer.
    pub value: u64,

    /// Wall-clock time the notification was received.
    pub received_at: DateTime<Utc>,

    /// Microseconds since the previous sample (or since the link came up).
    pub delay_us: i64,
}

impl TelemetrySample {
    /// Build a sample, deriving the delay from the previous reference time.
    pub fn new(value: u64, received_at: DateTime<Utc>, previous: DateTime<Utc>) -> Self {
        let delay_us = (received_at - previous)
            .num_microseconds()
            .unwrap_or(i64::MAX);

        Self {
            value,
            received_at,
            delay_us,
        }
    }
}

/// The three parallel sequences handed to a flush sink.
///
/// Index `i` of each vector describes the same notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleBatch {
    /// Display name of the peripheral that produced the samples.
    pub source: String,
    pub values: Vec<u64>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub delays_us: Vec<i64>,
}

/// The parallel sequences of a batch disagree in length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error(
    "sample sequences differ in length (values: {values}, timestamps: {timestamps}, delays: {delays})"
)]
pub struct LengthMismatch {
    pub values: usize,
    pub timestamps: usize,
    pub delays: usize,
}

impl SampleBatch {
    /// Number of samples, or [`LengthMismatch`] if the sequences are out of step.
    pub fn validate(&self) -> Result<usize, LengthMismatch> {
        let values = self.values.len();
        let timestamps = self.timestamps.len();
        let delays = self.delays_us.len();

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

    /// Number of values in the batch.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the batch holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate samples in arrival order.
    ///
    /// Stops at the shortest sequence; call [`validate`](Self::validate) first.
    pub fn samples(&self) -> impl Iterator<Item = TelemetrySample> + '_ {
        self.values
            .iter()
            .zip(&self.timestamps)
            .zip(&self.delays_us)
            .map(|((&value, &received_at), &delay_us)| TelemetrySample {
                value,
                received_at,
                delay_us,
            })
    }
}

/// The payload encodes an integer wider than 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payload of {width} bytes does not fit in 64 bits")]
pub struct ValueOverflow {
    /// Payload length in bytes.
    pub width: usize,
}

/// Decode a notification payload as an unsigned big-endian integer.
///
/// Leading zero bytes are ignored, so wide payloads are accepted as long as
/// the value itself fits in a `u64`. An empty payload decodes to zero.
pub fn decode_be_value(payload: &[u8]) -> Result<u64, ValueOverflow> {
    let start = payload
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(payload.len());
    let significant = &payload[start..];

    if significant.len() > 8 {
        return Err(ValueOverflow {
            width: payload.len(),
        });
    }
    Ok(significant
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_decode_be_value() {
        assert_eq!(decode_be_value(&[]), Ok(0));
        assert_eq!(decode_be_value(&[0x2a]), Ok(42));
        assert_eq!(decode_be_value(&[0x01, 0x00]), Ok(256));
        assert_eq!(decode_be_value(&[0x00, 0x00, 0x01, 0x02]), Ok(0x0102));
        assert_eq!(decode_be_value(&[0xff; 8]), Ok(u64::MAX));
    }

    #[test]
    fn test_decode_wide_payload() {
        // Nine significant bytes: 2^64 + 5 must not wrap to 5.
        assert_eq!(
            decode_be_value(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0x05]),
            Err(ValueOverflow { width: 9 })
        );
        assert_eq!(
            decode_be_value(&[0xff; 12]),
            Err(ValueOverflow { width: 12 })
        );

        // Zero padding does not count against the width.
        let mut padded = vec![0u8; 12];
        padded.extend_from_slice(&[0x01, 0x02]);
        assert_eq!(decode_be_value(&padded), Ok(0x0102));
    }

    #[test]
    fn test_sample_delay() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t1 = t0 + Duration::milliseconds(15);

        let sample = TelemetrySample::new(7, t1, t0);
        assert_eq!(sample.delay_us, 15_000);
        assert_eq!(sample.received_at, t1);
    }

    #[test]
    fn test_batch_validate() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut batch = SampleBatch {
            source: "dev".to_string(),
            values: vec![1, 2],
            timestamps: vec![t0, t0],
            delays_us: vec![0, 10],
        };
        assert_eq!(batch.validate(), Ok(2));
        assert_eq!(batch.samples().count(), 2);

        batch.delays_us.pop();
        assert_eq!(
            batch.validate(),
            Err(LengthMismatch {
                values: 2,
                timestamps: 2,
                delays: 1
            })
        );
    }
}
