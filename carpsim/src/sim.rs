//! Discrete event simulator for carp networks.
//!
//! A priority queue of `(time, sequence)`-ordered events drives many
//! routers in one process. The main loop pops an event, advances simulated
//! time, calls the target node's handlers directly, collects whatever the
//! node queued on its transport, and routes it through the topology as
//! future delivery events. Router timers are serviced by watching each
//! node's `next_timer()` after every interaction and scheduling a wakeup
//! for it.

use std::collections::BinaryHeap;

use carp::wire::Decode;
use carp::{Config, DataPacket, Duration, Event as ProtocolEvent, NodeAddress, Timestamp};
use hashbrown::HashMap;

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{GradientSnapshot, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// First address handed out by [`Simulator::add_node`].
const BASE_ADDRESS: NodeAddress = 0x0A00_0001;

/// Discrete event simulator for carp networks.
pub struct Simulator {
    /// All nodes in the simulation.
    nodes: HashMap<NodeAddress, SimNode>,
    /// Network topology.
    topology: Topology,
    /// Current simulation time.
    current_time: Timestamp,
    /// Priority queue of scheduled events.
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// Next address to assign.
    next_address: NodeAddress,
    /// RNG state for packet loss.
    rng_state: u64,
    /// Earliest wakeup currently scheduled per node.
    wakeups: HashMap<NodeAddress, Timestamp>,
    /// Interval for automatic snapshots.
    snapshot_interval: Option<Duration>,
    /// Next snapshot time.
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Create a new simulator with the given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            next_address: BASE_ADDRESS,
            rng_state: seed,
            wakeups: HashMap::new(),
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    /// Set the network topology.
    pub fn set_topology(&mut self, topology: Topology) {
        self.topology = topology;
    }

    /// Set the snapshot interval for automatic gradient recording.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node and return its assigned address.
    pub fn add_node(&mut self, config: Config) -> NodeAddress {
        let address = self.next_address;
        self.next_address += 1;

        let seed = self.rng_state ^ (address as u64).wrapping_mul(0x9E37_79B9);
        let node = SimNode::new(address, config, seed, self.current_time);
        self.nodes.insert(address, node);

        self.collect_outgoing(address);
        self.sync_wakeup(address);
        address
    }

    /// Get a reference to a node.
    pub fn node(&self, address: NodeAddress) -> Option<&SimNode> {
        self.nodes.get(&address)
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, address: NodeAddress) -> Option<&mut SimNode> {
        self.nodes.get_mut(&address)
    }

    /// All node addresses, in assignment order.
    pub fn node_addresses(&self) -> Vec<NodeAddress> {
        let mut addrs: Vec<NodeAddress> = self.nodes.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    /// Current simulation time.
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// The topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Mutable topology access.
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    /// Collected metrics.
    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule an application send.
    pub fn schedule_send(
        &mut self,
        time: Timestamp,
        from: NodeAddress,
        to: NodeAddress,
        payload: Vec<u8>,
    ) {
        self.schedule(time, Event::AppSend { from, to, payload });
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Run the simulation until the specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        loop {
            let due = self
                .event_queue
                .peek()
                .is_some_and(|event| event.time <= end_time);
            if !due {
                break;
            }
            if let Some(event) = self.event_queue.pop() {
                self.advance_time(event.time);
                self.process_event(event.event);
                self.maybe_take_snapshot();
            }
        }

        // Advance to end_time even if no more events.
        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.peek().is_none(),
        }
    }

    /// Run the simulation for the specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Take a gradient snapshot now.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = GradientSnapshot::new(self.current_time);
        for (&address, node) in &self.nodes {
            snapshot.record_node(address, node.hop_count());
        }
        self.metrics.add_snapshot(snapshot);
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::ControlDelivery {
                to,
                from,
                data,
                quality,
            } => {
                let now = self.current_time;
                if let Some(node) = self.nodes.get_mut(&to) {
                    node.handle_control(&data, from, quality, now);
                    self.metrics.messages_delivered += 1;
                }
                self.after_node_activity(to);
            }
            Event::DataDelivery { to, from, data } => {
                let now = self.current_time;
                if let Some(node) = self.nodes.get_mut(&to) {
                    if let Ok(packet) = DataPacket::decode_from_slice(&data) {
                        let was_delivered = node.delivered().len();
                        node.handle_data(packet, from, now);
                        if node.delivered().len() > was_delivered {
                            self.metrics.data_delivered += 1;
                        }
                    }
                    self.metrics.messages_delivered += 1;
                }
                self.after_node_activity(to);
            }
            Event::TimerFire { node } => {
                let now = self.current_time;
                self.wakeups.remove(&node);
                if let Some(sim_node) = self.nodes.get_mut(&node) {
                    sim_node.handle_timer(now);
                }
                self.after_node_activity(node);
            }
            Event::AppSend { from, to, payload } => {
                let now = self.current_time;
                if let Some(node) = self.nodes.get_mut(&from) {
                    if node.send_data(to, payload, now).is_err() {
                        self.metrics.send_errors += 1;
                    }
                }
                self.after_node_activity(from);
            }
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    /// Collect transmissions and events from a node, then re-arm its wakeup.
    fn after_node_activity(&mut self, address: NodeAddress) {
        self.collect_outgoing(address);
        self.collect_events(address);
        self.sync_wakeup(address);
    }

    /// Collect outgoing transmissions from a node and route them.
    fn collect_outgoing(&mut self, sender: NodeAddress) {
        let messages = match self.nodes.get(&sender) {
            Some(node) => node.take_outgoing(),
            None => return,
        };
        for msg in messages {
            self.route_outbound(sender, msg);
        }
    }

    /// Drain protocol events from a node, counting failures.
    fn collect_events(&mut self, address: NodeAddress) {
        let Some(node) = self.nodes.get_mut(&address) else {
            return;
        };
        let start = node.pump_events();
        let failures = node.events()[start..]
            .iter()
            .filter(|event| matches!(event, ProtocolEvent::ForwardingFailed { .. }))
            .count();
        self.metrics.forwarding_failures += failures as u64;
    }

    /// Route one transmission through the topology.
    fn route_outbound(&mut self, sender: NodeAddress, msg: carp::Outbound) {
        self.metrics.messages_sent += 1;

        let targets: Vec<NodeAddress> = if msg.dest == carp::BROADCAST_ADDRESS {
            self.topology.neighbors(sender)
        } else if self.topology.is_connected(sender, msg.dest) {
            vec![msg.dest]
        } else {
            // Unicast to a node that is out of range.
            self.metrics.messages_dropped += 1;
            return;
        };

        let current_time = self.current_time;
        let mut deliveries = Vec::with_capacity(targets.len());
        for target in targets {
            let Some(link) = self.topology.get_link(sender, target) else {
                continue;
            };
            if !link.active {
                continue;
            }
            let loss_rate = link.loss_rate;
            let delay = link.delay;
            let quality = link.quality;
            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.messages_dropped += 1;
                continue;
            }
            deliveries.push((target, delay, quality));
        }

        for (target, delay, quality) in deliveries {
            let event = match msg.port {
                carp::Port::Control => Event::ControlDelivery {
                    to: target,
                    from: sender,
                    data: msg.payload.clone(),
                    quality,
                },
                carp::Port::Data => Event::DataDelivery {
                    to: target,
                    from: sender,
                    data: msg.payload.clone(),
                },
            };
            self.schedule(current_time + delay, event);
        }
    }

    /// Make sure a wakeup is scheduled for the node's earliest timer.
    fn sync_wakeup(&mut self, address: NodeAddress) {
        let Some(next) = self.nodes.get(&address).and_then(|n| n.next_timer()) else {
            return;
        };
        let fire_at = next.max(self.current_time);
        let already = self
            .wakeups
            .get(&address)
            .is_some_and(|&scheduled| scheduled <= fire_at);
        if already {
            return;
        }
        self.wakeups.insert(address, fire_at);
        self.schedule(fire_at, Event::TimerFire { node: address });
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { a, b, rate } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Generate a random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}
