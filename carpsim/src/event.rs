//! Event types and ordering for the discrete event simulation.

use std::cmp::Ordering;

use carp::{NodeAddress, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<NodeAddress>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    /// Disable a specific link.
    DisableLink { a: NodeAddress, b: NodeAddress },
    /// Enable a specific link.
    EnableLink { a: NodeAddress, b: NodeAddress },
    /// Set loss rate on a link.
    SetLossRate {
        a: NodeAddress,
        b: NodeAddress,
        rate: f64,
    },
    /// Take a gradient snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Deliver control-port bytes to a node.
    ControlDelivery {
        to: NodeAddress,
        from: NodeAddress,
        data: Vec<u8>,
        quality: f64,
    },
    /// Deliver a data-port packet to a node.
    DataDelivery {
        to: NodeAddress,
        from: NodeAddress,
        data: Vec<u8>,
    },
    /// Wake a node whose timer queue has come due.
    TimerFire { node: NodeAddress },
    /// Application originates data from one node to another.
    AppSend {
        from: NodeAddress,
        to: NodeAddress,
        payload: Vec<u8>,
    },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap: earliest time first, FIFO within
        // the same instant.
        match other.time.as_millis().cmp(&self.time.as_millis()) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}
