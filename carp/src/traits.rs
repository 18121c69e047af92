//! Collaborator traits for transport, link resolution, and randomness.
//!
//! These traits are the protocol's only view of the outside world, which
//! lets one core run against different:
//! - Transports (radio drivers, UDP sockets, simulation)
//! - Link-layer resolvers (ARP caches, static tables, simulation)
//! - Random number generators (hardware RNG, deterministic test RNG)

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::types::{Event, LinkAddress, NodeAddress};

/// Queue size for the outbound transport channel.
pub(crate) const OUTBOUND_QUEUE_SIZE: usize = 16;

/// Queue size for the protocol event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 16;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Outbound transport channel type.
pub type OutboundChannel = Channel<ChannelMutex, Outbound, OUTBOUND_QUEUE_SIZE>;

/// Protocol event channel type.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Which logical port a payload travels on.
///
/// Control traffic (the four protocol messages) uses a dedicated port next
/// to the data plane, so receivers know how to dispatch without sniffing
/// payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Port {
    /// Protocol messages (Ping, Pong, Hello, DataAck).
    Control,
    /// Forwarded data packets.
    Data,
}

/// A payload queued for transmission.
#[derive(Clone, Debug)]
pub struct Outbound {
    /// Destination node, or [`crate::types::BROADCAST_ADDRESS`] for all
    /// neighbors in range.
    pub dest: NodeAddress,
    /// Logical port the payload travels on.
    pub port: Port,
    /// Encoded bytes.
    pub payload: Vec<u8>,
}

/// Transport trait for radio/network backends.
///
/// The router pushes [`Outbound`] items into `outbound()`; the host drains
/// the channel and transmits. Received bytes flow back through the router's
/// `handle_control` / `route_input` entry points.
pub trait Transport {
    /// Maximum transmission unit for this transport.
    ///
    /// The router checks encoded sizes before queueing.
    fn mtu(&self) -> usize;

    /// Current outbound backlog in packets.
    ///
    /// Reported to probers in Pong replies as the queue-occupancy metric.
    fn queue_depth(&self) -> usize;

    /// Channel of payloads awaiting transmission.
    fn outbound(&self) -> &OutboundChannel;
}

/// Resolver from network addresses to link-layer addresses.
///
/// Returns `None` when the mapping is not (yet) known; the neighbor table
/// retries opportunistically on later updates.
pub trait LinkResolver {
    fn resolve(&mut self, addr: NodeAddress) -> Option<LinkAddress>;
}

/// Random number generator trait.
///
/// Used only for transmission jitter. Relay scoring is deliberately free of
/// randomness so selection stays reproducible.
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature.

    use core::cell::Cell;

    use hashbrown::HashMap;

    use super::*;

    /// Mock transport backed by the real outbound channel.
    pub struct MockTransport {
        mtu: usize,
        queue_depth: Cell<usize>,
        outbound: OutboundChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                mtu: 255,
                queue_depth: Cell::new(0),
                outbound: Channel::new(),
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_mtu(mtu: usize) -> Self {
            Self {
                mtu,
                ..Self::default()
            }
        }

        /// Fix the reported queue depth (for probe-reply tests).
        pub fn set_queue_depth(&self, depth: usize) {
            self.queue_depth.set(depth);
        }

        /// Take all queued payloads (for testing).
        pub fn take_sent(&self) -> Vec<Outbound> {
            let mut msgs = Vec::new();
            while let Ok(msg) = self.outbound.try_receive() {
                msgs.push(msg);
            }
            msgs
        }
    }

    impl Transport for MockTransport {
        fn mtu(&self) -> usize {
            self.mtu
        }

        fn queue_depth(&self) -> usize {
            self.queue_depth.get()
        }

        fn outbound(&self) -> &OutboundChannel {
            &self.outbound
        }
    }

    /// Mock resolver with an explicit address table.
    #[derive(Default)]
    pub struct MockResolver {
        table: HashMap<NodeAddress, LinkAddress>,
    }

    impl MockResolver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Resolver that derives a link address from the node address.
        ///
        /// Every address resolves, which is the common case in tests.
        pub fn derived() -> DerivedResolver {
            DerivedResolver
        }

        pub fn insert(&mut self, addr: NodeAddress, link: LinkAddress) {
            self.table.insert(addr, link);
        }
    }

    impl LinkResolver for MockResolver {
        fn resolve(&mut self, addr: NodeAddress) -> Option<LinkAddress> {
            self.table.get(&addr).copied()
        }
    }

    /// Resolver that maps every address to a link address derived from it.
    pub struct DerivedResolver;

    impl LinkResolver for DerivedResolver {
        fn resolve(&mut self, addr: NodeAddress) -> Option<LinkAddress> {
            let b = addr.to_be_bytes();
            Some([0x02, 0x00, b[0], b[1], b[2], b[3]])
        }
    }

    /// Mock random for testing (deterministic LCG).
    pub struct MockRandom {
        state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max - min;
            if range == 0 {
                return min;
            }
            min + (self.state % range)
        }
    }
}
