//! Console subscriber for BleSight bridges.
//!
//! Connects to the same broker as the bridge, subscribes to its topics and
//! prints every message in a readable form.

pub mod render;
pub mod subscriber;

pub use render::render_message;
pub use subscriber::{ListenStats, Listener};
