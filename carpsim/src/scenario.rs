//! Scenario builder for setting up and running simulations.

use carp::{Config, Duration, NodeAddress, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{Link, Topology};

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    /// Fully connected topology.
    FullyConnected,
    /// Chain topology: the sink at one end, each node seeing only its
    /// immediate neighbors.
    Chain,
    /// Star topology: the sink is the hub.
    Star,
    /// Custom topology provided by the user (built after addresses are
    /// known, from node indices).
    Custom(Vec<(usize, usize, Link)>),
}

/// Builder for simulation scenarios.
///
/// Node 0 is always the sink; the remaining nodes run the default
/// configuration.
pub struct ScenarioBuilder {
    /// Number of nodes to create, sink included.
    num_nodes: usize,
    /// RNG seed for determinism.
    seed: u64,
    /// Topology type to generate.
    topology_type: TopologyType,
    /// Link template applied to generated topologies.
    link: Link,
    /// Scheduled actions (by time).
    actions: Vec<(Timestamp, ScenarioAction)>,
    /// Scheduled application sends: (time, from index, to index, payload).
    sends: Vec<(Timestamp, usize, usize, Vec<u8>)>,
    /// Snapshot interval.
    snapshot_interval: Option<Duration>,
    /// Probe wait override applied to every node.
    probe_wait: Option<Duration>,
}

impl ScenarioBuilder {
    /// Create a scenario with the specified number of nodes.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: TopologyType::FullyConnected,
            link: Link::default(),
            actions: Vec::new(),
            sends: Vec::new(),
            snapshot_interval: None,
            probe_wait: None,
        }
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Use fully connected topology.
    pub fn fully_connected(mut self) -> Self {
        self.topology_type = TopologyType::FullyConnected;
        self
    }

    /// Use chain topology with the sink at one end.
    pub fn chain_topology(mut self) -> Self {
        self.topology_type = TopologyType::Chain;
        self
    }

    /// Use star topology with the sink as hub.
    pub fn star_topology(mut self) -> Self {
        self.topology_type = TopologyType::Star;
        self
    }

    /// Use a custom topology given as (node index, node index, link) edges.
    pub fn custom_topology(mut self, edges: Vec<(usize, usize, Link)>) -> Self {
        self.topology_type = TopologyType::Custom(edges);
        self
    }

    /// Set the link template for generated topologies.
    pub fn with_link(mut self, link: Link) -> Self {
        self.link = link;
        self
    }

    /// Set global packet loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.link.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set link delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.link.delay = delay;
        self
    }

    /// Set snapshot interval for metrics collection.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Widen (or narrow) every node's Pong reply window.
    ///
    /// The protocol default matches low-latency radios; scenarios with
    /// reply jitter plus link delay close to that window want more room.
    pub fn with_probe_wait(mut self, wait: Duration) -> Self {
        self.probe_wait = Some(wait);
        self
    }

    /// Schedule an application send from one node index to another.
    pub fn send_at(mut self, time: Timestamp, from: usize, to: usize, payload: Vec<u8>) -> Self {
        self.sends.push((time, from, to, payload));
        self
    }

    /// Schedule a scenario action.
    pub fn action_at(mut self, time: Timestamp, action: ScenarioAction) -> Self {
        self.actions.push((time, action));
        self
    }

    /// Build the simulator and return it with the node addresses.
    ///
    /// `addresses[0]` is the sink.
    pub fn build(self) -> (Simulator, Vec<NodeAddress>) {
        let mut sim = Simulator::new(self.seed);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        let mut addresses = Vec::with_capacity(self.num_nodes);
        for i in 0..self.num_nodes {
            let mut config = if i == 0 {
                Config::sink()
            } else {
                Config::default()
            };
            if let Some(wait) = self.probe_wait {
                config.probe_wait = wait;
            }
            addresses.push(sim.add_node(config));
        }

        let mut topo = Topology::new();
        match self.topology_type {
            TopologyType::FullyConnected => {
                for (i, &a) in addresses.iter().enumerate() {
                    for &b in addresses.iter().skip(i + 1) {
                        topo.add_link(a, b, self.link.clone());
                    }
                }
            }
            TopologyType::Chain => {
                for window in addresses.windows(2) {
                    topo.add_link(window[0], window[1], self.link.clone());
                }
            }
            TopologyType::Star => {
                for &spoke in addresses.iter().skip(1) {
                    topo.add_link(addresses[0], spoke, self.link.clone());
                }
            }
            TopologyType::Custom(edges) => {
                for (a, b, link) in edges {
                    topo.add_link(addresses[a], addresses[b], link);
                }
            }
        }
        sim.set_topology(topo);

        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }
        for (time, from, to, payload) in self.sends {
            sim.schedule_send(time, addresses[from], addresses[to], payload);
        }

        (sim, addresses)
    }

    /// Build and run for a duration in one step.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_assigns_sink_first() {
        let (sim, addresses) = ScenarioBuilder::new(3).with_seed(7).build();
        assert_eq!(addresses.len(), 3);
        assert!(sim.node(addresses[0]).unwrap().is_sink());
        assert!(!sim.node(addresses[1]).unwrap().is_sink());
    }

    #[test]
    fn test_chain_topology_shape() {
        let (sim, addresses) = ScenarioBuilder::new(4).chain_topology().build();
        assert!(sim.topology().is_connected(addresses[0], addresses[1]));
        assert!(sim.topology().is_connected(addresses[1], addresses[2]));
        assert!(!sim.topology().is_connected(addresses[0], addresses[2]));
    }

    #[test]
    fn test_link_template_applied() {
        let (sim, addresses) = ScenarioBuilder::new(2)
            .with_loss_rate(0.25)
            .with_delay(Duration::from_millis(5))
            .build();
        let link = sim.topology().get_link(addresses[0], addresses[1]).unwrap();
        assert_eq!(link.loss_rate, 0.25);
        assert_eq!(link.delay, Duration::from_millis(5));
    }
}
