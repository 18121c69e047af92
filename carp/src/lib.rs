#![forbid(unsafe_code)]
//! carp - Channel-aware routing protocol for multi-hop wireless sensor networks
//!
//! Nodes discover neighbors, build a hop-count gradient toward a sink, and
//! pick forwarding relays by probing neighbors for live link, queue, and
//! energy metrics instead of trusting static topology.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. It holds pure
//! protocol logic behind collaborator traits; the host owns sockets,
//! radios, clocks, and the event loop.
//!
//! # Protocol outline
//!
//! - The sink periodically broadcasts `Hello{hop_count: 0}`. Receivers
//!   adopt `hop_count + 1` when it strictly improves their belief and
//!   rebroadcast, so every node learns its distance to the sink.
//! - Before forwarding data, a node broadcasts a `Ping` and scores the
//!   `Pong` replies (queue occupancy, residual energy, hop count, link
//!   quality) to pick a relay. Scoring is deterministic; only send jitter
//!   is randomized.
//! - Forwarded packets are acknowledged hop-by-hop with `DataAck`; a
//!   missed acknowledgment re-probes and retries a bounded number of
//!   times.
//!
//! # Integration
//!
//! The router is event-driven and never blocks. The host:
//!
//! 1. implements [`Transport`], [`LinkResolver`], and [`Random`],
//! 2. feeds received control bytes to `Router::handle_control` and data
//!    packets to `Router::route_input`,
//! 3. drains `Transport::outbound` and actually transmits,
//! 4. calls `Router::handle_timer` whenever `Router::next_timer` comes due.
//!
//! ```text
//! use carp::{Config, Router, Timestamp};
//!
//! // Implement Transport, LinkResolver, and Random for your platform...
//!
//! let mut router = Router::new(transport, resolver, random, Config::sink());
//! router.notify_add_address(1, local_addr, carp::BROADCAST_ADDRESS);
//! router.notify_interface_up(1);
//! router.initialize(clock_now());
//!
//! // Event loop: drain router.transport().outbound(), feed receptions to
//! // router.handle_control / router.route_input, and call
//! // router.handle_timer(now) whenever router.next_timer() comes due.
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types (addresses, messages, errors, events)
//! - [`wire`] - Wire format serialization
//! - [`traits`] - Transport, LinkResolver, Random traits
//! - [`config`] - Runtime configuration
//! - [`neighbors`] - Neighbor liveness tracking
//! - [`node`] - Router struct, dispatch, and timers
//! - [`hello`] - Hop-count gradient propagation
//! - [`probe`] - Ping/Pong relay selection
//! - [`forward`] - Data forwarding and acknowledgments
//! - [`time`] - Timestamp and Duration types
//! - [`debug`] - Trace events (feature `trace`)

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock collaborator implementations meant only for tests."
);

#[cfg(all(feature = "trace", not(test), not(debug_assertions)))]
compile_error!(
    "The `trace` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

// Link the critical-section provider for embassy-sync channels in tests.
#[cfg(test)]
use critical_section as _;

pub mod config;
pub mod debug;
pub mod forward;
pub mod hello;
pub mod neighbors;
pub mod node;
pub mod probe;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::Config;
pub use neighbors::{NeighborEntry, NeighborTable};
pub use node::{Interface, Router};
pub use probe::SelectOutcome;
pub use time::{Duration, Timestamp};
pub use traits::{EventChannel, LinkResolver, Outbound, OutboundChannel, Port, Random, Transport};
pub use types::{
    DataAck, DataPacket, Event, Hello, LinkAddress, NodeAddress, PacketHeader, Ping, Pong,
    ProtocolMetrics, Route, RouteError,
};
pub use wire::{Decode, DecodeError, Encode, Message, Reader, Writer};

// Re-export constants
pub use types::{
    BROADCAST_ADDRESS, DEFAULT_HOP_LIMIT, HOP_UNREACHED, LINK_ADDRESS_UNKNOWN, MSG_DATA_ACK,
    MSG_HELLO, MSG_PING, MSG_PONG,
};
