//! carpsim - Discrete event network simulator for carp protocol testing.
//!
//! Hosts many carp routers in a single process with no real-time delays:
//! deterministic event ordering, configurable topology (fully connected,
//! chain, star, or custom) with per-link loss, delay, and quality, a
//! scenario builder, and gradient/traffic metrics.
//!
//! # Example
//!
//! ```
//! use carpsim::{Duration, ScenarioBuilder};
//!
//! // A sink plus three nodes, fully connected. After a couple of Hello
//! // waves every node knows its distance to the sink.
//! let result = ScenarioBuilder::new(4)
//!     .with_seed(42)
//!     .run_for(Duration::from_secs(2));
//! assert!(result.converged());
//! ```
//!
//! # Architecture
//!
//! The simulator keeps a priority queue of events ordered by
//! `(time, sequence)`. The main loop:
//! 1. Pop the next event and advance simulation time
//! 2. Call the target node's handlers directly (`handle_control`,
//!    `route_input`, `handle_timer`)
//! 3. Drain the node's transport and protocol events
//! 4. Route transmissions through the topology as delivery events
//! 5. Re-arm the node's timer wakeup from `next_timer()`

// Link the critical-section provider for embassy-sync channels.
use critical_section as _;

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use carp::{Config, Duration, NodeAddress, Timestamp};
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{GradientSnapshot, SimMetrics, SimulationResult};
pub use node::SimNode;
pub use scenario::ScenarioBuilder;
pub use sim::Simulator;
pub use topology::{Link, Topology};
