//! Router implementation - the protocol state machine for one node.
//!
//! The [`Router`] struct holds all per-node protocol state. It is fully
//! event-driven and never blocks: the host calls `handle_control` when
//! bytes arrive on the control port, `route_input`/`route_output` at the
//! routing boundary, and `handle_timer` whenever the instant returned by
//! `next_timer` is reached. Waiting (for Pong replies, for a DataAck) is
//! modeled as scheduled timers, not as blocking calls.
//!
//! Timers are keyed by `(Timestamp, sequence)`: events fire in scheduled
//! order, and two timers scheduled for the identical instant fire in
//! submission order.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::config::Config;
use crate::neighbors::NeighborTable;
use crate::time::{Duration, Timestamp};
use crate::traits::{EventChannel, LinkResolver, Outbound, Port, Random, Transport};
use crate::trace_event;
use crate::types::{DataPacket, Event, NodeAddress, Pong, ProtocolMetrics};
use crate::wire::{Decode, Encode, Message, Reader};

#[cfg(any(test, feature = "trace"))]
use crate::debug::TraceEvent;
#[cfg(any(test, feature = "trace"))]
use crate::types::MAX_TRACE_EVENTS;

/// One configured network interface.
#[derive(Clone, Copy, Debug)]
pub struct Interface {
    /// Host-assigned interface index.
    pub index: u32,
    /// Address assigned to this interface.
    pub address: NodeAddress,
    /// Broadcast destination for this interface's subnet.
    pub broadcast: NodeAddress,
    /// Whether the interface is currently up.
    pub up: bool,
}

/// Timer kinds the router schedules for itself.
#[derive(Clone, Debug)]
pub(crate) enum TimerKind {
    /// Transmit a control message whose jitter delay has elapsed.
    SendControl { dest: NodeAddress, message: Message },
    /// Close the probe for a destination and commit a relay decision.
    ProbeDeadline { destination: NodeAddress },
    /// A forwarded packet's acknowledgment window expired.
    AckDeadline { ident: u16 },
    /// Periodic sink Hello broadcast.
    HelloTick,
    /// Periodic stale-neighbor purge.
    PurgeTick,
}

/// An open probe: collected replies until the deadline fires.
#[derive(Clone, Debug)]
pub(crate) struct PendingProbe {
    /// When the reply window closes.
    pub deadline: Timestamp,
    /// Replies received so far, keyed by origin. Keyed ordering makes the
    /// lowest-address tie-break fall out of iteration order.
    pub replies: BTreeMap<NodeAddress, Pong>,
}

/// A cached relay decision for one destination.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RouteDecision {
    pub relay: NodeAddress,
    pub computed_at: Timestamp,
}

/// A data packet parked behind an open probe.
#[derive(Clone, Debug)]
pub(crate) struct PendingForward {
    pub packet: DataPacket,
    /// Retries already consumed by earlier transmissions of this packet.
    pub retries: u8,
}

/// A transmitted data packet awaiting its DataAck.
#[derive(Clone, Debug)]
pub(crate) struct PendingAck {
    pub packet: DataPacket,
    pub relay: NodeAddress,
    pub retries: u8,
}

/// The protocol instance for a single node.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `L`: Link-layer address resolver
/// - `R`: Random number generator (jitter only)
pub struct Router<T, L, R> {
    // Dependencies (injected)
    pub(crate) transport: T,
    pub(crate) resolver: L,
    pub(crate) random: R,
    pub(crate) config: Config,

    // Interfaces and addresses
    pub(crate) interfaces: Vec<Interface>,

    // Neighbor liveness
    pub(crate) neighbors: NeighborTable,

    // Sink gradient: believed hop count toward the sink.
    // None = unreached; the sink itself is pinned at Some(0).
    pub(crate) hop_count: Option<u8>,

    // Residual energy, quantized to 1/255 of full capacity.
    pub(crate) energy: u8,

    // Relay selection
    pub(crate) pending_probes: HashMap<NodeAddress, PendingProbe>,
    pub(crate) routes: HashMap<NodeAddress, RouteDecision>,

    // Forwarding
    pub(crate) pending_forwards: HashMap<NodeAddress, VecDeque<PendingForward>>,
    pub(crate) pending_acks: HashMap<u16, PendingAck>,
    pub(crate) ident_seq: u16,

    // Timer queue: (fire time, submission sequence) -> timer.
    pub(crate) timers: BTreeMap<(Timestamp, u64), TimerKind>,
    pub(crate) timer_seq: u64,

    // Host-facing
    pub(crate) events: EventChannel,
    pub(crate) metrics: ProtocolMetrics,

    #[cfg(any(test, feature = "trace"))]
    pub(crate) trace: VecDeque<TraceEvent>,
}

impl<T, L, R> Router<T, L, R>
where
    T: Transport,
    L: LinkResolver,
    R: Random,
{
    /// Create a new router.
    pub fn new(transport: T, resolver: L, random: R, config: Config) -> Self {
        Self {
            transport,
            resolver,
            random,
            config,
            interfaces: Vec::new(),
            neighbors: NeighborTable::new(),
            hop_count: if config.sink { Some(0) } else { None },
            energy: u8::MAX,
            pending_probes: HashMap::new(),
            routes: HashMap::new(),
            pending_forwards: HashMap::new(),
            pending_acks: HashMap::new(),
            ident_seq: 0,
            timers: BTreeMap::new(),
            timer_seq: 0,
            events: EventChannel::new(),
            metrics: ProtocolMetrics::new(),
            #[cfg(any(test, feature = "trace"))]
            trace: VecDeque::new(),
        }
    }

    /// Start periodic work: the sink's Hello schedule and the purge tick.
    ///
    /// Call once after construction and interface setup.
    pub fn initialize(&mut self, now: Timestamp) {
        if self.config.sink {
            self.schedule(now, TimerKind::HelloTick);
        }
        self.schedule(now + self.config.purge_interval, TimerKind::PurgeTick);
    }

    // --- Interface registry -------------------------------------------------

    /// Register an address on an interface.
    ///
    /// A previously unknown interface is created in the down state; the
    /// host brings it up with [`Self::notify_interface_up`].
    pub fn notify_add_address(&mut self, index: u32, address: NodeAddress, broadcast: NodeAddress) {
        if let Some(iface) = self.interfaces.iter_mut().find(|i| i.index == index) {
            iface.address = address;
            iface.broadcast = broadcast;
            return;
        }
        self.interfaces.push(Interface {
            index,
            address,
            broadcast,
            up: false,
        });
    }

    /// Remove an address from an interface; the interface goes with it.
    pub fn notify_remove_address(&mut self, index: u32, address: NodeAddress) {
        self.interfaces
            .retain(|i| !(i.index == index && i.address == address));
    }

    /// Mark an interface as up.
    pub fn notify_interface_up(&mut self, index: u32) {
        if let Some(iface) = self.interfaces.iter_mut().find(|i| i.index == index) {
            iface.up = true;
        }
    }

    /// Mark an interface as down.
    pub fn notify_interface_down(&mut self, index: u32) {
        if let Some(iface) = self.interfaces.iter_mut().find(|i| i.index == index) {
            iface.up = false;
        }
    }

    /// Whether any interface is up and addressed.
    pub fn has_interfaces(&self) -> bool {
        self.interfaces.iter().any(|i| i.up)
    }

    /// Whether `addr` is assigned to one of this node's up interfaces.
    pub fn is_own_address(&self, addr: NodeAddress) -> bool {
        self.interfaces.iter().any(|i| i.up && i.address == addr)
    }

    /// Address of the first up interface.
    pub fn primary_address(&self) -> Option<NodeAddress> {
        self.interfaces.iter().find(|i| i.up).map(|i| i.address)
    }

    /// Up interfaces, in registration order.
    pub(crate) fn up_interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter().filter(|i| i.up)
    }

    // --- Inbound control dispatch -------------------------------------------

    /// Handle bytes received on the control port.
    ///
    /// `from` is the transport-level sender; `quality` is the host's
    /// estimate of the link from that sender, if it has one. Malformed
    /// packets (unrecognized tag, bad layout, trailing bytes) are dropped
    /// and counted, never propagated.
    pub fn handle_control(
        &mut self,
        data: &[u8],
        from: NodeAddress,
        quality: Option<f32>,
        now: Timestamp,
    ) {
        let mut reader = Reader::new(data);
        let message = match Message::decode(&mut reader) {
            Ok(message) if reader.is_empty() => message,
            _ => {
                self.metrics.malformed_dropped += 1;
                trace_event!(self, TraceEvent::MalformedDropped { len: data.len() });
                return;
            }
        };

        if self.is_own_address(from) {
            // Our own broadcast echoed back by the medium.
            return;
        }

        self.metrics.control_received += 1;
        trace_event!(
            self,
            TraceEvent::ControlReceived {
                msg_type: message.msg_type(),
                from,
            }
        );

        // Any control message proves the sender is alive.
        self.touch_neighbor(from, now);
        if let Some(q) = quality {
            self.neighbors
                .observe_link_quality(from, crate::types::scale_unit(q));
        }

        match message {
            Message::Hello(hello) => self.handle_hello(hello, now),
            Message::Ping(ping) => self.handle_ping(ping, now),
            Message::Pong(pong) => self.handle_pong(pong, now),
            Message::DataAck(ack) => self.handle_data_ack(ack, from),
        }
    }

    /// Refresh the neighbor entry for `addr`.
    pub(crate) fn touch_neighbor(&mut self, addr: NodeAddress, now: Timestamp) {
        self.neighbors
            .update(addr, self.config.neighbor_lifetime, now, &mut self.resolver);
    }

    // --- Timer queue --------------------------------------------------------

    /// Schedule a timer.
    pub(crate) fn schedule(&mut self, at: Timestamp, kind: TimerKind) {
        let seq = self.timer_seq;
        self.timer_seq += 1;
        self.timers.insert((at, seq), kind);
    }

    /// The instant of the earliest pending timer, if any.
    ///
    /// The host must call [`Self::handle_timer`] no earlier than this
    /// instant (late is fine; the router catches up).
    pub fn next_timer(&self) -> Option<Timestamp> {
        self.timers.keys().next().map(|&(t, _)| t)
    }

    /// Fire every timer due at or before `now`, in scheduled order.
    pub fn handle_timer(&mut self, now: Timestamp) {
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let kind = entry.remove();
            match kind {
                TimerKind::SendControl { dest, message } => {
                    self.queue_control(dest, &message);
                }
                TimerKind::ProbeDeadline { destination } => {
                    self.close_probe(destination, now);
                }
                TimerKind::AckDeadline { ident } => {
                    self.handle_ack_deadline(ident, now);
                }
                TimerKind::HelloTick => {
                    self.send_sink_hello(now);
                    self.schedule(now + self.config.hello_interval, TimerKind::HelloTick);
                }
                TimerKind::PurgeTick => {
                    self.purge_pass(now);
                    self.schedule(now + self.config.purge_interval, TimerKind::PurgeTick);
                }
            }
        }
    }

    /// A uniformly random jitter delay in `[0, config.jitter]`.
    pub(crate) fn jitter_delay(&mut self) -> Duration {
        let max = self.config.jitter.as_millis();
        Duration::from_millis(self.random.gen_range(0, max + 1))
    }

    // --- Outbound control ---------------------------------------------------

    /// Queue a control message for transmission now.
    pub(crate) fn queue_control(&mut self, dest: NodeAddress, message: &Message) {
        let encoded = message.encode_to_vec();
        if encoded.len() > self.transport.mtu() {
            self.metrics.control_dropped += 1;
            return;
        }
        let sent = self
            .transport
            .outbound()
            .try_send(Outbound {
                dest,
                port: Port::Control,
                payload: encoded,
            })
            .is_ok();
        if sent {
            self.metrics.control_sent += 1;
        } else {
            self.metrics.control_dropped += 1;
        }
    }

    /// Queue a control message after a randomized jitter delay.
    ///
    /// Desynchronizes nodes reacting to the same event (Hello rebroadcast,
    /// Ping fan-out, Pong replies).
    pub(crate) fn schedule_control(&mut self, dest: NodeAddress, message: Message, now: Timestamp) {
        let delay = self.jitter_delay();
        self.schedule(now + delay, TimerKind::SendControl { dest, message });
    }

    // --- Maintenance --------------------------------------------------------

    /// Purge stale neighbors and drop route decisions whose relay died.
    pub(crate) fn purge_pass(&mut self, now: Timestamp) {
        self.neighbors.purge(now);
        let neighbors = &self.neighbors;
        self.routes
            .retain(|_, decision| neighbors.is_neighbor(decision.relay, now));
    }

    // --- Host-facing accessors ----------------------------------------------

    /// This node's believed hop count toward the sink, if reached.
    pub fn hop_count(&self) -> Option<u8> {
        self.hop_count
    }

    /// Whether this node is the sink.
    pub fn is_sink(&self) -> bool {
        self.config.sink
    }

    /// Set the residual energy reported in probe replies.
    pub fn set_residual_energy(&mut self, fraction: f32) {
        self.energy = crate::types::scale_unit(fraction);
    }

    /// Residual energy as a fraction of full capacity.
    pub fn residual_energy(&self) -> f32 {
        crate::types::unscale_unit(self.energy)
    }

    /// The neighbor table.
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// The transport collaborator.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Channel of protocol events for the host.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Protocol activity counters.
    pub fn metrics(&self) -> &ProtocolMetrics {
        &self.metrics
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Emit an event to the host, dropping it if the channel is full.
    pub(crate) fn push_event(&mut self, event: Event) {
        let _ = self.events.try_send(event);
    }

    /// Record a trace event (bounded buffer, oldest dropped first).
    #[cfg(any(test, feature = "trace"))]
    pub fn push_trace(&mut self, event: TraceEvent) {
        if self.trace.len() >= MAX_TRACE_EVENTS {
            self.trace.pop_front();
        }
        self.trace.push_back(event);
    }

    /// Drain all recorded trace events.
    #[cfg(any(test, feature = "trace"))]
    pub fn take_trace_events(&mut self) -> Vec<TraceEvent> {
        self.trace.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{test_router, ADDR_A, ADDR_B, ADDR_SELF};
    use crate::types::{Hello, BROADCAST_ADDRESS};

    #[test]
    fn test_interface_registry() {
        let mut router = test_router(Config::default());
        assert!(router.has_interfaces());
        assert!(router.is_own_address(ADDR_SELF));
        assert!(!router.is_own_address(ADDR_A));
        assert_eq!(router.primary_address(), Some(ADDR_SELF));

        router.notify_interface_down(1);
        assert!(!router.has_interfaces());
        assert!(!router.is_own_address(ADDR_SELF));

        router.notify_interface_up(1);
        router.notify_remove_address(1, ADDR_SELF);
        assert!(!router.has_interfaces());
    }

    #[test]
    fn test_malformed_control_dropped() {
        let mut router = test_router(Config::default());
        router.handle_control(&[0xEE, 1, 2, 3], ADDR_A, None, Timestamp::ZERO);
        assert_eq!(router.metrics().malformed_dropped, 1);
        assert_eq!(router.metrics().control_received, 0);
        // A malformed packet must not create a neighbor entry.
        assert!(!router.neighbors().contains(ADDR_A));
    }

    #[test]
    fn test_control_updates_neighbor() {
        let mut router = test_router(Config::default());
        let hello = Message::Hello(Hello {
            hop_count: 0,
            origin: ADDR_A,
        });
        router.handle_control(&hello.encode_to_vec(), ADDR_A, Some(0.8), Timestamp::ZERO);
        assert!(router.neighbors().is_neighbor(ADDR_A, Timestamp::ZERO));
        assert_eq!(
            router.neighbors().get(ADDR_A).unwrap().link_quality,
            crate::types::scale_unit(0.8)
        );
    }

    #[test]
    fn test_own_broadcast_echo_ignored() {
        let mut router = test_router(Config::default());
        let hello = Message::Hello(Hello {
            hop_count: 0,
            origin: ADDR_SELF,
        });
        router.handle_control(&hello.encode_to_vec(), ADDR_SELF, None, Timestamp::ZERO);
        assert_eq!(router.metrics().control_received, 0);
        assert!(router.hop_count().is_none());
    }

    #[test]
    fn test_timer_fifo_at_equal_instant() {
        let mut router = test_router(Config::default());
        let at = Timestamp::from_millis(5);
        // Two sends scheduled for the identical instant must transmit in
        // submission order.
        router.schedule(
            at,
            TimerKind::SendControl {
                dest: ADDR_A,
                message: Message::Hello(Hello {
                    hop_count: 1,
                    origin: ADDR_SELF,
                }),
            },
        );
        router.schedule(
            at,
            TimerKind::SendControl {
                dest: ADDR_B,
                message: Message::Hello(Hello {
                    hop_count: 2,
                    origin: ADDR_SELF,
                }),
            },
        );
        assert_eq!(router.next_timer(), Some(at));
        router.handle_timer(at);
        let sent = router.transport().take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].dest, ADDR_A);
        assert_eq!(sent[1].dest, ADDR_B);
        assert_eq!(router.next_timer(), None);
    }

    #[test]
    fn test_purge_tick_reschedules() {
        let mut router = test_router(Config::default());
        router.initialize(Timestamp::ZERO);
        let first = router.next_timer().unwrap();
        router.handle_timer(first);
        let second = router.next_timer().unwrap();
        assert_eq!(second, first + Config::default().purge_interval);
    }

    #[test]
    fn test_purge_drops_dead_relay_route() {
        let mut router = test_router(Config::default());
        let now = Timestamp::ZERO;
        router.touch_neighbor(ADDR_A, now);
        router.routes.insert(
            ADDR_B,
            RouteDecision {
                relay: ADDR_A,
                computed_at: now,
            },
        );

        let after = now + Config::default().neighbor_lifetime + Duration::from_millis(1);
        router.purge_pass(after);
        assert!(router.routes.is_empty());
        assert!(!router.neighbors().contains(ADDR_A));
    }

    #[test]
    fn test_trace_records_protocol_flow() {
        let mut router = test_router(Config::default());
        router.handle_control(&[0xEE], ADDR_A, None, Timestamp::ZERO);
        let hello = Message::Hello(Hello {
            hop_count: 0,
            origin: ADDR_A,
        });
        router.handle_control(&hello.encode_to_vec(), ADDR_A, None, Timestamp::ZERO);

        let trace = router.take_trace_events();
        assert!(trace
            .iter()
            .any(|e| matches!(e, TraceEvent::MalformedDropped { len: 1 })));
        assert!(trace
            .iter()
            .any(|e| matches!(e, TraceEvent::HelloAdopted { hop_count: 1, .. })));
        // The drain emptied the buffer.
        assert!(router.take_trace_events().is_empty());
    }

    #[test]
    fn test_queue_control_respects_mtu() {
        use crate::traits::test_impls::{MockRandom, MockResolver, MockTransport};
        let transport = MockTransport::with_mtu(4);
        let mut router = Router::new(
            transport,
            MockResolver::new(),
            MockRandom::new(),
            Config::default(),
        );
        router.queue_control(
            BROADCAST_ADDRESS,
            &Message::Hello(Hello {
                hop_count: 0,
                origin: 1,
            }),
        );
        assert_eq!(router.metrics().control_sent, 0);
        assert_eq!(router.metrics().control_dropped, 1);
    }
}
