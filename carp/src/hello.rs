//! Hop-count gradient propagation from the sink.
//!
//! The sink periodically broadcasts `Hello{hop_count: 0}` on every up
//! interface. A node that hears a Hello adopts `hop_count + 1` as its own
//! distance to the sink only when that strictly improves its current
//! belief, then rebroadcasts with itself as origin and the incremented
//! count. The improvement check bounds the flood: each node rebroadcasts
//! at most once per distinct improvement, and stored hop counts are
//! non-increasing over the node's lifetime.

use crate::time::Timestamp;
use crate::trace_event;
use crate::traits::{LinkResolver, Random, Transport};
use crate::types::{Event, Hello, NodeAddress, HOP_UNREACHED};
use crate::wire::Message;

#[cfg(any(test, feature = "trace"))]
use crate::debug::TraceEvent;

use crate::node::Router;

impl<T, L, R> Router<T, L, R>
where
    T: Transport,
    L: LinkResolver,
    R: Random,
{
    /// Periodic sink broadcast, fired by the HelloTick timer.
    pub(crate) fn send_sink_hello(&mut self, now: Timestamp) {
        self.broadcast_hello(0, now);
    }

    /// Queue a jittered Hello on every up interface.
    ///
    /// The origin is rewritten per interface so receivers learn the
    /// address they can actually reach us on.
    pub(crate) fn broadcast_hello(&mut self, hop_count: u8, now: Timestamp) {
        let targets: alloc::vec::Vec<(u32, NodeAddress, NodeAddress)> = self
            .up_interfaces()
            .map(|iface| (iface.index, iface.address, iface.broadcast))
            .collect();
        for (index, address, broadcast) in targets {
            let hello = Hello {
                hop_count,
                origin: address,
            };
            self.schedule_control(broadcast, Message::Hello(hello), now);
            trace_event!(
                self,
                TraceEvent::HelloSent {
                    hop_count,
                    interface: index,
                }
            );
        }
    }

    /// Process a received Hello.
    ///
    /// The sender was already recorded as a live neighbor by the dispatch
    /// layer; what remains is the gradient decision.
    pub(crate) fn handle_hello(&mut self, hello: Hello, now: Timestamp) {
        if self.config().sink {
            // The sink is the gradient root; nothing can improve hop 0.
            return;
        }
        if hello.hop_count == HOP_UNREACHED {
            // The sender has no distance to offer.
            return;
        }

        let candidate = hello.hop_count.saturating_add(1);
        let improves = match self.hop_count() {
            None => true,
            Some(current) => candidate < current,
        };
        if !improves {
            trace_event!(
                self,
                TraceEvent::HelloIgnored {
                    hop_count: hello.hop_count,
                    believed: self.hop_count().unwrap_or(HOP_UNREACHED),
                }
            );
            return;
        }

        self.hop_count = Some(candidate);
        self.push_event(Event::GradientChanged {
            hop_count: candidate,
        });
        trace_event!(
            self,
            TraceEvent::HelloAdopted {
                timestamp: now,
                hop_count: candidate,
                from: hello.origin,
            }
        );
        self.broadcast_hello(candidate, now);
    }

    /// Hop count reported in probe replies: the belief, or the unreached
    /// sentinel.
    pub(crate) fn reported_hop_count(&self) -> u8 {
        self.hop_count().unwrap_or(HOP_UNREACHED)
    }
}
