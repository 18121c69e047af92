//! SimNode wrapper around a simulated carp router.

use std::cell::Cell;

use carp::traits::{LinkResolver, Outbound, OutboundChannel, Random, Transport};
use carp::{
    Config, DataPacket, Event, LinkAddress, NodeAddress, PacketHeader, ProtocolMetrics, Route,
    RouteError, Router, Timestamp, BROADCAST_ADDRESS,
};
use embassy_sync::channel::Channel;

/// Interface index every simulated node uses.
const SIM_INTERFACE: u32 = 1;

/// Mock transport for simulation.
///
/// The router fills the outbound channel; the simulator drains it and
/// routes through the topology. Queue depth is a settable figure so
/// scenarios can model loaded nodes.
pub struct SimTransport {
    mtu: usize,
    queue_depth: Cell<usize>,
    outbound: OutboundChannel,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            mtu: 255,
            queue_depth: Cell::new(0),
            outbound: Channel::new(),
        }
    }

    /// Model a loaded node by fixing its reported queue occupancy.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth);
    }

    /// Take all queued payloads.
    pub fn take_sent(&self) -> Vec<Outbound> {
        let mut msgs = Vec::new();
        while let Ok(msg) = self.outbound.try_receive() {
            msgs.push(msg);
        }
        msgs
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
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

/// Mock resolver: every address maps to a derived link address.
pub struct SimResolver;

impl LinkResolver for SimResolver {
    fn resolve(&mut self, addr: NodeAddress) -> Option<LinkAddress> {
        let b = addr.to_be_bytes();
        Some([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }
}

/// Mock random for simulation (deterministic LCG).
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let range = max - min;
        if range == 0 {
            return min;
        }
        min + (self.state % range)
    }
}

/// Type alias for simulated routers.
pub type SimRouter = Router<SimTransport, SimResolver, SimRandom>;

/// Wrapper around a carp router for simulation.
pub struct SimNode {
    /// The underlying router.
    inner: SimRouter,
    /// This node's address.
    address: NodeAddress,
    /// Data packets delivered to this node's local callback.
    delivered: Vec<DataPacket>,
    /// Routing errors surfaced through per-call error callbacks.
    errors: Vec<(PacketHeader, RouteError)>,
    /// Protocol events drained from the router, in arrival order.
    events: Vec<Event>,
}

impl SimNode {
    /// Create a node with the given address, configuration, and RNG seed.
    pub fn new(address: NodeAddress, config: Config, seed: u64, now: Timestamp) -> Self {
        let mut inner = Router::new(
            SimTransport::new(),
            SimResolver,
            SimRandom::with_seed(seed),
            config,
        );
        inner.notify_add_address(SIM_INTERFACE, address, BROADCAST_ADDRESS);
        inner.notify_interface_up(SIM_INTERFACE);
        inner.initialize(now);

        Self {
            inner,
            address,
            delivered: Vec::new(),
            errors: Vec::new(),
            events: Vec::new(),
        }
    }

    /// This node's address.
    pub fn address(&self) -> NodeAddress {
        self.address
    }

    /// Get a reference to the inner router.
    pub fn inner(&self) -> &SimRouter {
        &self.inner
    }

    /// Get a mutable reference to the inner router.
    pub fn inner_mut(&mut self) -> &mut SimRouter {
        &mut self.inner
    }

    /// Believed hop count toward the sink.
    pub fn hop_count(&self) -> Option<u8> {
        self.inner.hop_count()
    }

    /// Whether this node is the sink.
    pub fn is_sink(&self) -> bool {
        self.inner.is_sink()
    }

    /// Number of live neighbors at `now`.
    pub fn live_neighbor_count(&self, now: Timestamp) -> usize {
        self.inner
            .neighbors()
            .addresses()
            .filter(|&&a| self.inner.neighbors().is_neighbor(a, now))
            .count()
    }

    /// Protocol metrics of the inner router.
    pub fn metrics(&self) -> &ProtocolMetrics {
        self.inner.metrics()
    }

    /// Set this node's residual energy.
    pub fn set_residual_energy(&mut self, fraction: f32) {
        self.inner.set_residual_energy(fraction);
    }

    /// Handle bytes received on the control port.
    pub fn handle_control(&mut self, data: &[u8], from: NodeAddress, quality: f64, now: Timestamp) {
        self.inner
            .handle_control(data, from, Some(quality as f32), now);
    }

    /// Handle a data-port packet.
    ///
    /// Local deliveries and synchronous errors are collected on the node
    /// for later inspection.
    pub fn handle_data(&mut self, packet: DataPacket, from: NodeAddress, now: Timestamp) -> bool {
        let mut delivered = Vec::new();
        let mut errors = Vec::new();
        let handled = {
            let mut deliver = |p: &DataPacket, _iif: u32| delivered.push(p.clone());
            let mut on_error = |h: &PacketHeader, e: RouteError| errors.push((*h, e));
            self.inner
                .route_input(packet, from, SIM_INTERFACE, Some(&mut deliver), &mut on_error, now)
        };
        self.delivered.extend(delivered);
        self.errors.extend(errors);
        handled
    }

    /// Fire due timers.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.inner.handle_timer(now);
    }

    /// The instant of the earliest pending timer.
    pub fn next_timer(&self) -> Option<Timestamp> {
        self.inner.next_timer()
    }

    /// Originate application data toward a destination.
    pub fn send_data(
        &mut self,
        destination: NodeAddress,
        payload: Vec<u8>,
        now: Timestamp,
    ) -> Result<u16, RouteError> {
        self.inner.send_data(destination, payload, now)
    }

    /// Ask the routing boundary for a route (test/diagnostic hook).
    pub fn route_output(
        &mut self,
        header: &PacketHeader,
        now: Timestamp,
    ) -> Result<Route, RouteError> {
        self.inner.route_output(header, None, now)
    }

    /// Take all outgoing transmissions from the transport.
    pub fn take_outgoing(&self) -> Vec<Outbound> {
        self.inner.transport().take_sent()
    }

    /// Move newly emitted router events into the node's event log.
    ///
    /// Returns the index the new events start at.
    pub fn pump_events(&mut self) -> usize {
        let start = self.events.len();
        while let Ok(event) = self.inner.events().try_receive() {
            self.events.push(event);
        }
        start
    }

    /// Protocol events observed so far, in arrival order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Data packets delivered locally so far.
    pub fn delivered(&self) -> &[DataPacket] {
        &self.delivered
    }

    /// Synchronous routing errors observed so far.
    pub fn errors(&self) -> &[(PacketHeader, RouteError)] {
        &self.errors
    }
}
