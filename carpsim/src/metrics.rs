//! Metrics collection for simulation analysis.

use carp::{NodeAddress, Timestamp};
use hashbrown::HashMap;

/// A snapshot of the hop-count gradient at a point in time.
#[derive(Debug, Clone)]
pub struct GradientSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Believed hop count per node (`None` = unreached).
    pub hop_counts: HashMap<NodeAddress, Option<u8>>,
}

impl GradientSnapshot {
    /// Create a new empty snapshot.
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            hop_counts: HashMap::new(),
        }
    }

    /// Record a node's believed hop count.
    pub fn record_node(&mut self, node: NodeAddress, hop_count: Option<u8>) {
        self.hop_counts.insert(node, hop_count);
    }

    /// A node's hop count, if it is reached.
    pub fn hop(&self, node: NodeAddress) -> Option<u8> {
        self.hop_counts.get(&node).copied().flatten()
    }

    /// Number of nodes with a hop count.
    pub fn reached_count(&self) -> usize {
        self.hop_counts.values().filter(|h| h.is_some()).count()
    }

    /// Whether every recorded node has a hop count.
    pub fn all_reached(&self) -> bool {
        self.hop_counts.values().all(|h| h.is_some())
    }

    /// The largest hop count any node believes.
    pub fn max_hop(&self) -> Option<u8> {
        self.hop_counts.values().copied().flatten().max()
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Transmissions handed to the medium.
    pub messages_sent: u64,
    /// Deliveries that reached a node.
    pub messages_delivered: u64,
    /// Transmissions dropped by loss or inactive links.
    pub messages_dropped: u64,
    /// Data packets delivered to their destination node.
    pub data_delivered: u64,
    /// Forwarding failures surfaced by any node.
    pub forwarding_failures: u64,
    /// Application sends rejected outright.
    pub send_errors: u64,
    /// Gradient snapshots taken at intervals.
    pub snapshots: Vec<GradientSnapshot>,
}

impl SimMetrics {
    /// Create new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snapshot.
    pub fn add_snapshot(&mut self, snapshot: GradientSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// The most recent snapshot.
    pub fn latest_snapshot(&self) -> Option<&GradientSnapshot> {
        self.snapshots.last()
    }

    /// First time at which every node was reached, if that ever happened.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| !s.hop_counts.is_empty() && s.all_reached())
            .map(|s| s.time)
    }
}

/// Result of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Simulation time when the run stopped.
    pub end_time: Timestamp,
    /// Metrics collected during the run.
    pub metrics: SimMetrics,
    /// Whether the event queue was drained.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Whether the final snapshot shows every node reached.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| !s.hop_counts.is_empty() && s.all_reached())
    }
}
