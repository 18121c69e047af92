//! Runtime configuration for a router instance.
//!
//! All tunables are plain values passed at construction. There is no
//! registry or attribute system: the host builds a [`Config`], hands it to
//! `Router::new`, and the instance is fully determined from there.

use crate::time::Duration;
use crate::types::MAX_FORWARD_RETRIES;

/// Configuration for a single protocol instance.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Whether this node is the sink (hop count pinned at zero, emits
    /// periodic Hello broadcasts).
    pub sink: bool,
    /// Period of waiting for neighbors to reply with a Pong after a Ping.
    pub probe_wait: Duration,
    /// Upper bound on the randomized delay before any broadcast send.
    pub jitter: Duration,
    /// Interval between the sink's Hello broadcasts.
    pub hello_interval: Duration,
    /// How long a neighbor stays live after its last observed message.
    pub neighbor_lifetime: Duration,
    /// Interval between stale-neighbor purge passes.
    pub purge_interval: Duration,
    /// How long a forwarder waits for a DataAck before retrying.
    pub ack_wait: Duration,
    /// Retries per forwarded packet before reporting permanent failure.
    pub max_retries: u8,
    /// Whether broadcast data packets are forwarded at all.
    pub enable_broadcast: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sink: false,
            probe_wait: Duration::from_millis(10),
            jitter: Duration::from_millis(10),
            hello_interval: Duration::from_secs(30),
            neighbor_lifetime: Duration::from_secs(90),
            purge_interval: Duration::from_secs(10),
            ack_wait: Duration::from_millis(50),
            max_retries: MAX_FORWARD_RETRIES,
            enable_broadcast: true,
        }
    }
}

impl Config {
    /// Configuration for a sink node with otherwise default settings.
    pub fn sink() -> Self {
        Self {
            sink: true,
            ..Self::default()
        }
    }
}
