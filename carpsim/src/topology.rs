//! Network topology and link properties.

use carp::{Duration, NodeAddress};
use hashbrown::HashMap;

/// Properties of a network link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Link quality in [0, 1], reported to the protocol on every
    /// reception and echoed back to probers in Pong replies.
    pub quality: f64,
    /// Packet loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            quality: 0.9,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    /// Create a new link with default properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link quality.
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    /// Set the loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set whether the link is active.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Network topology defining connectivity between nodes.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Links between pairs of nodes (bidirectional).
    links: HashMap<(NodeAddress, NodeAddress), Link>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fully connected topology for the given nodes.
    pub fn fully_connected(nodes: &[NodeAddress]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Create a chain topology (each node connected only to neighbors).
    pub fn chain(nodes: &[NodeAddress]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// Create a star topology (first node is hub, connected to all others).
    pub fn star(nodes: &[NodeAddress]) -> Self {
        let mut topo = Self::new();
        if nodes.is_empty() {
            return topo;
        }
        let hub = nodes[0];
        for &spoke in nodes.iter().skip(1) {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Add a bidirectional link between two nodes.
    pub fn add_link(&mut self, a: NodeAddress, b: NodeAddress, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    /// Get a link between two nodes.
    pub fn get_link(&self, a: NodeAddress, b: NodeAddress) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    /// Get a mutable link between two nodes.
    pub fn get_link_mut(&mut self, a: NodeAddress, b: NodeAddress) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Check if two nodes are connected (link exists and is active).
    pub fn is_connected(&self, a: NodeAddress, b: NodeAddress) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Get all nodes that a given node can reach over active links.
    pub fn neighbors(&self, node: NodeAddress) -> Vec<NodeAddress> {
        let mut result: Vec<NodeAddress> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        // Deterministic delivery order regardless of map iteration.
        result.sort_unstable();
        result
    }

    /// Deactivate every link that crosses between the given groups.
    pub fn partition(&mut self, groups: &[Vec<NodeAddress>]) {
        let group_of = |node: NodeAddress| -> Option<usize> {
            groups.iter().position(|g| g.contains(&node))
        };
        for (&(a, b), link) in self.links.iter_mut() {
            if let (Some(ga), Some(gb)) = (group_of(a), group_of(b)) {
                if ga != gb {
                    link.active = false;
                }
            }
        }
    }

    /// Reactivate every link.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    /// Number of links, active or not.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn canonical_pair(a: NodeAddress, b: NodeAddress) -> (NodeAddress, NodeAddress) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
