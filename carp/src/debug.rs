//! Trace events for protocol debugging.
//!
//! Recorded in test builds and with the `trace` feature (development and
//! simulation only). The router records events into a bounded buffer that
//! the host drains; there is no subscriber machinery, which keeps the
//! core `no_std`.

use crate::time::Timestamp;
use crate::types::NodeAddress;

/// Trace events emitted by the router.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceEvent {
    /// A control message was decoded and dispatched.
    ControlReceived { msg_type: u8, from: NodeAddress },
    /// A received packet was dropped for an unrecognized tag or bad layout.
    MalformedDropped { len: usize },
    /// A Hello improved our believed hop count.
    HelloAdopted {
        timestamp: Timestamp,
        hop_count: u8,
        from: NodeAddress,
    },
    /// A Hello arrived but did not improve our belief.
    HelloIgnored { hop_count: u8, believed: u8 },
    /// A Hello broadcast was queued (after jitter).
    HelloSent { hop_count: u8, interface: u32 },
    /// A probe Ping was queued.
    PingSent {
        destination: NodeAddress,
        packet_count: u8,
    },
    /// A Pong reply to a prober was queued.
    PongSent {
        to: NodeAddress,
        queue: u8,
        hop_count: u8,
    },
    /// A Pong reply was recorded against an open probe.
    PongRecorded { from: NodeAddress },
    /// A Pong arrived after its probe deadline and was discarded.
    PongLate { from: NodeAddress },
    /// A probe deadline fired.
    ProbeClosed {
        destination: NodeAddress,
        replies: usize,
        relay: Option<NodeAddress>,
    },
    /// A cached route decision answered a selection without traffic.
    RouteCacheHit {
        destination: NodeAddress,
        relay: NodeAddress,
    },
    /// A data packet was handed to the transport toward a relay.
    DataForwarded {
        destination: NodeAddress,
        relay: NodeAddress,
        ident: u16,
    },
    /// A data packet was queued behind an open probe.
    DataQueued { destination: NodeAddress, ident: u16 },
    /// A DataAck matched a pending forward.
    AckReceived { ident: u16 },
    /// An ack window expired; the forward will be retried.
    AckTimeout { ident: u16, retries: u8 },
    /// A forwarded packet exhausted its retries.
    ForwardFailed { destination: NodeAddress, ident: u16 },
    /// A packet's hop limit ran out.
    HopLimitExpired { ident: u16 },
    /// A packet originated by this node came back and was swallowed.
    SelfDuplicate { origin: NodeAddress },
}

/// Record a trace event on a router.
///
/// Compiles to nothing outside tests and the `trace` feature.
#[macro_export]
macro_rules! trace_event {
    ($router:expr, $event:expr) => {{
        #[cfg(any(test, feature = "trace"))]
        {
            $router.push_trace($event);
        }
    }};
}
