//! Integration tests for blesight-common library.

use chrono::{Duration, TimeZone, Utc};
use blesight_common::{
    Format, SampleBatch, TelemetrySample, TopicBuilder, TopicKind, decode_auto, decode_be_value,
    encode, parse_config, parse_topic,
};

#[test]
fn test_full_batch_workflow() {
    // Simulate three notifications arriving 10ms apart
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let payloads: [&[u8]; 3] = [&[0x00, 0x10], &[0x01, 0x00], &[0xff]];

    let mut batch = SampleBatch {
        source: "Nano33".to_string(),
        ..SampleBatch::default()
    };
    let mut previous = start;
    for (i, payload) in payloads.iter().enumerate() {
        let at = start + Duration::milliseconds(10 * (i as i64 + 1));
        let sample = TelemetrySample::new(decode_be_value(payload).unwrap(), at, previous);
        batch.values.push(sample.value);
        batch.timestamps.push(sample.received_at);
        batch.delays_us.push(sample.delay_us);
        previous = at;
    }

    assert_eq!(batch.validate(), Ok(3));
    assert_eq!(batch.values, vec![16, 256, 255]);
    assert_eq!(batch.delays_us, vec![10_000, 10_000, 10_000]);

    // Batches published as CBOR must be readable by auto-detecting consumers
    let cbor = encode(&batch, Format::Cbor).expect("CBOR encode failed");
    let decoded: SampleBatch = decode_auto(&cbor).expect("Auto decode failed");
    assert_eq!(decoded, batch);
}

#[test]
fn test_topics_round_trip_through_parser() {
    let builder = TopicBuilder::new("blesight/ble");

    for (topic, kind) in [
        (builder.status_topic(), TopicKind::Status),
        (builder.link_topic(), TopicKind::Link),
        (builder.batch_topic(), TopicKind::Batch),
        (builder.build("notifications"), TopicKind::Data),
    ] {
        assert_eq!(parse_topic(builder.prefix(), &topic), Some(kind));
    }
}

#[test]
fn test_config_with_comments() {
    let json5 = r#"
    // broker on the lab network
    {
        mqtt: {
            host: "10.0.0.5",
            client_id_prefix: "lab", // suffix is random
        },
    }
    "#;

    let config: blesight_common::BaseConfig = parse_config(json5).unwrap();
    assert_eq!(config.mqtt.host, "10.0.0.5");
    assert_eq!(config.mqtt.client_id_prefix, "lab");
    assert_eq!(config.mqtt.port, 1883);
}
