//! MQTT bridge for BLE GATT notifications.
//!
//! The bridge discovers a peripheral, subscribes to one notification
//! characteristic and forwards every notification to an MQTT broker. Decoded
//! samples are buffered and flushed in fixed-size batches to a configurable
//! sink (log summary, CSV dump, batch publishing).
//!
//! # Topics
//!
//! ```text
//! <data_topic>                 raw notification bytes, one message per notification
//! <topic_prefix>/batch         flushed batches (JSON or CBOR), when enabled
//! <topic_prefix>/@/status      retained bridge status, "offline" as last will
//! <topic_prefix>/@/link        retained link phase (idle / connecting / connected)
//! ```

pub mod btle;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod handler;
pub mod selector;
pub mod sink;
pub mod supervisor;
pub mod transport;
