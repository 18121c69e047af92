//! Core types and constants for the carp protocol.

use alloc::vec::Vec;
use core::fmt;

// Memory bounds (runtime-enforced limits on heap collections)
pub const MAX_NEIGHBORS: usize = 64;
pub const MAX_PENDING_PROBES: usize = 8;
pub const MAX_PENDING_ACKS: usize = 16;
pub const MAX_PENDING_FORWARDS: usize = 16;
pub const MAX_ROUTE_CACHE: usize = 32;
pub const MAX_TRACE_EVENTS: usize = 256;

// Protocol constants
pub const DEFAULT_HOP_LIMIT: u8 = 32;
pub const MAX_FORWARD_RETRIES: u8 = 3;

// Message type tags (1-4 valid; anything else is a malformed header)
pub const MSG_PING: u8 = 1;
pub const MSG_PONG: u8 = 2;
pub const MSG_HELLO: u8 = 3;
pub const MSG_DATA_ACK: u8 = 4;

/// Network-layer address, unique per node.
pub type NodeAddress = u32;

/// The all-nodes destination address.
pub const BROADCAST_ADDRESS: NodeAddress = 0xFFFF_FFFF;

/// Link-layer address resolved from a [`NodeAddress`].
pub type LinkAddress = [u8; 6];

/// Sentinel for a link address that has not been resolved yet.
pub const LINK_ADDRESS_UNKNOWN: LinkAddress = [0u8; 6];

/// Hop count reported by a node that has not heard any Hello yet.
pub const HOP_UNREACHED: u8 = u8::MAX;

/// Quantize a fraction in `[0.0, 1.0]` to 1/255 steps.
///
/// This is the committed wire encoding for the energy and link-quality
/// fields: one byte, 0 = empty/unusable, 255 = full/perfect. Out-of-range
/// inputs are clamped.
#[inline]
pub fn scale_unit(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Expand a quantized 1/255-step byte back to a fraction.
#[inline]
pub fn unscale_unit(v: u8) -> f32 {
    v as f32 / 255.0
}

/// Probe request sent before a batch of data packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ping {
    /// Number of data packets the prober intends to send.
    pub packet_count: u8,
    /// Address of the probing node.
    pub origin: NodeAddress,
}

/// Probe reply carrying a candidate relay's live metrics.
///
/// The energy and link-quality fields are stored pre-quantized (see
/// [`scale_unit`]) so that encoding and decoding reproduce the struct
/// exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pong {
    /// Current outbound queue occupancy of the replying node.
    pub queue: u8,
    /// Residual energy, quantized to 1/255 of full capacity.
    pub energy: u8,
    /// Replier's believed hop count toward the sink ([`HOP_UNREACHED`] if none).
    pub hop_count: u8,
    /// Estimated quality of the link back to the prober, quantized.
    pub link_quality: u8,
    /// The probing node this reply answers.
    pub destination: NodeAddress,
    /// Address of the replying node.
    pub origin: NodeAddress,
}

impl Pong {
    /// Build a reply from raw metrics, quantizing the fractional fields.
    pub fn new(
        queue: u8,
        hop_count: u8,
        energy: f32,
        link_quality: f32,
        destination: NodeAddress,
        origin: NodeAddress,
    ) -> Self {
        Self {
            queue,
            energy: scale_unit(energy),
            hop_count,
            link_quality: scale_unit(link_quality),
            destination,
            origin,
        }
    }

    /// Residual energy as a fraction of full capacity.
    pub fn energy_fraction(&self) -> f32 {
        unscale_unit(self.energy)
    }

    /// Link quality as a fraction.
    pub fn link_quality_fraction(&self) -> f32 {
        unscale_unit(self.link_quality)
    }
}

/// Sink-rooted distance advertisement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hello {
    /// Hop count from the sink (0 at the sink itself).
    pub hop_count: u8,
    /// Address of the node that (re)broadcast this Hello.
    pub origin: NodeAddress,
}

/// Acknowledgment of successful data reception.
///
/// Carries the acknowledged packet's identification field so a forwarder
/// with several packets in flight can tell which one was received.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataAck {
    /// Identification of the acknowledged data packet.
    pub ident: u16,
}

/// Network-layer header of a data packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Originating node.
    pub source: NodeAddress,
    /// Final destination.
    pub destination: NodeAddress,
    /// Identification stamped by the source, echoed in acknowledgments.
    pub ident: u16,
    /// Remaining hops before the packet is discarded.
    pub hop_limit: u8,
}

/// A data packet: header plus opaque application payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPacket {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

/// A route returned to the caller of `route_output`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    /// Final destination the route was computed for.
    pub destination: NodeAddress,
    /// Relay to hand the packet to next.
    pub next_hop: NodeAddress,
    /// Outgoing interface index.
    pub interface: u32,
}

/// Error type for routing operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteError {
    /// No interfaces configured, or relay selection found no candidate.
    NoRouteToHost,
    /// Destination is local but no delivery callback was supplied.
    UndeliverableLocal,
    /// Encoded message exceeds the transport MTU.
    MessageTooLarge,
    /// A bounded pending collection is full.
    TooManyPending,
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::NoRouteToHost => write!(f, "no route to host"),
            RouteError::UndeliverableLocal => write!(f, "local destination without delivery callback"),
            RouteError::MessageTooLarge => write!(f, "message exceeds transport MTU"),
            RouteError::TooManyPending => write!(f, "too many pending operations"),
        }
    }
}

/// Events emitted by the router for host handling.
///
/// Failures that surface after the triggering call has returned (ack-retry
/// exhaustion, probe timeout for queued packets) arrive here; synchronous
/// failures use the per-call error callback instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// This node adopted a better hop count toward the sink.
    GradientChanged { hop_count: u8 },
    /// A forwarded packet could not be delivered after all retries.
    ForwardingFailed {
        destination: NodeAddress,
        ident: u16,
    },
}

/// Counters for monitoring protocol activity.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtocolMetrics {
    /// Control messages handed to the transport.
    pub control_sent: u64,
    /// Control messages rejected by a full outbound queue or the MTU.
    pub control_dropped: u64,
    /// Control messages received and dispatched.
    pub control_received: u64,
    /// Received packets dropped for an unrecognized type tag or bad layout.
    pub malformed_dropped: u64,
    /// Data packets relayed toward their destination.
    pub data_forwarded: u64,
    /// Data packets delivered to the local callback.
    pub data_delivered: u64,
    /// Forwarded packets that exhausted their retries.
    pub forwarding_failures: u64,
}

impl ProtocolMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_unit_endpoints() {
        assert_eq!(scale_unit(0.0), 0);
        assert_eq!(scale_unit(1.0), 255);
        assert_eq!(scale_unit(-0.5), 0);
        assert_eq!(scale_unit(2.0), 255);
    }

    #[test]
    fn test_scale_unit_quantization_stable() {
        // Quantize once, expand, quantize again: must be a fixed point.
        for v in 0..=255u8 {
            assert_eq!(scale_unit(unscale_unit(v)), v);
        }
    }

    #[test]
    fn test_pong_quantizes_on_construction() {
        let pong = Pong::new(3, 2, 0.8, 0.9, 10, 20);
        assert_eq!(pong.energy, scale_unit(0.8));
        assert_eq!(pong.link_quality, scale_unit(0.9));
        assert!((pong.energy_fraction() - 0.8).abs() < 0.01);
    }

    #[test]
    fn test_route_error_display() {
        use alloc::string::ToString;
        assert_eq!(RouteError::NoRouteToHost.to_string(), "no route to host");
    }
}
