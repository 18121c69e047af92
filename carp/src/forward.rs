//! Data-plane routing: local delivery, relay substitution, and
//! acknowledgment handling.
//!
//! Two entry points mirror the routing boundary. `route_output` answers
//! "which next hop for this locally originated packet"; `route_input`
//! takes custody of a received packet and either delivers it locally,
//! forwards it through a probed relay, or declines so the host can try a
//! lower-priority protocol.
//!
//! A forwarded packet is expected to be acknowledged by the chosen relay
//! within a bounded window. A missed window invalidates the relay
//! decision, re-probes, and re-sends, a bounded number of times; only
//! exhaustion surfaces as a permanent failure.

use crate::node::{PendingAck, PendingForward, Router};
use crate::probe::SelectOutcome;
use crate::time::Timestamp;
use crate::trace_event;
use crate::traits::{LinkResolver, Outbound, Port, Random, Transport};
use crate::types::{
    DataAck, DataPacket, Event, NodeAddress, PacketHeader, Route, RouteError, BROADCAST_ADDRESS,
    DEFAULT_HOP_LIMIT, MAX_PENDING_ACKS, MAX_PENDING_FORWARDS,
};
use crate::wire::{Encode, Message};

#[cfg(any(test, feature = "trace"))]
use crate::debug::TraceEvent;

impl<T, L, R> Router<T, L, R>
where
    T: Transport,
    L: LinkResolver,
    R: Random,
{
    /// Compute a route for a locally originated packet.
    ///
    /// With no up interfaces this is `NoRouteToHost`. A cold relay cache
    /// also reports `NoRouteToHost` for the current call, but kicks off a
    /// probe so a retry finds the decision committed.
    pub fn route_output(
        &mut self,
        header: &PacketHeader,
        oif_hint: Option<u32>,
        now: Timestamp,
    ) -> Result<Route, RouteError> {
        if !self.has_interfaces() {
            return Err(RouteError::NoRouteToHost);
        }
        match self.select_relay(header.destination, now) {
            SelectOutcome::Ready(relay) => {
                let interface = oif_hint
                    .filter(|&hint| self.interfaces.iter().any(|i| i.up && i.index == hint))
                    .or_else(|| self.up_interfaces().next().map(|i| i.index))
                    .unwrap_or(0);
                Ok(Route {
                    destination: header.destination,
                    next_hop: relay,
                    interface,
                })
            }
            SelectOutcome::Pending | SelectOutcome::Failed => Err(RouteError::NoRouteToHost),
        }
    }

    /// Originate a data packet from this node.
    ///
    /// Stamps the header from the local sequence counter and either
    /// transmits through a decided relay or parks the packet behind the
    /// probe that will decide one. Returns the packet's identification.
    pub fn send_data(
        &mut self,
        destination: NodeAddress,
        payload: alloc::vec::Vec<u8>,
        now: Timestamp,
    ) -> Result<u16, RouteError> {
        let Some(source) = self.primary_address() else {
            return Err(RouteError::NoRouteToHost);
        };
        let ident = self.allocate_ident();
        let packet = DataPacket {
            header: PacketHeader {
                source,
                destination,
                ident,
                hop_limit: DEFAULT_HOP_LIMIT,
            },
            payload,
        };
        match self.select_relay(destination, now) {
            SelectOutcome::Ready(relay) => {
                self.transmit_data(packet, relay, 0, now)?;
                Ok(ident)
            }
            SelectOutcome::Pending => {
                self.queue_forward(packet, 0)?;
                Ok(ident)
            }
            SelectOutcome::Failed => Err(RouteError::NoRouteToHost),
        }
    }

    /// Take custody of a packet received from the network.
    ///
    /// Returns whether this protocol handled the packet. `from` is the
    /// transport-level previous hop, `iif` the receiving interface.
    /// `local_deliver` and `error_cb` are invoked synchronously when
    /// applicable, before this call returns.
    pub fn route_input(
        &mut self,
        packet: DataPacket,
        from: NodeAddress,
        iif: u32,
        local_deliver: Option<&mut dyn FnMut(&DataPacket, u32)>,
        error_cb: &mut dyn FnMut(&PacketHeader, RouteError),
        now: Timestamp,
    ) -> bool {
        if !self.has_interfaces() {
            return false;
        }

        let header = packet.header;

        // A packet we originated has looped back: already handled, swallow
        // it so it cannot circulate.
        if self.is_own_address(header.source) {
            trace_event!(
                self,
                TraceEvent::SelfDuplicate {
                    origin: header.source,
                }
            );
            return true;
        }

        if self.is_own_address(header.destination) {
            // Confirm reception to the previous hop regardless of what the
            // delivery callback does with the packet.
            self.queue_control(from, &Message::DataAck(DataAck { ident: header.ident }));
            match local_deliver {
                Some(deliver) => {
                    self.metrics.data_delivered += 1;
                    deliver(&packet, iif);
                }
                None => error_cb(&header, RouteError::UndeliverableLocal),
            }
            return true;
        }

        if header.destination == BROADCAST_ADDRESS {
            // Broadcast data stops here; re-flooding is the host's call.
            if self.config.enable_broadcast {
                if let Some(deliver) = local_deliver {
                    self.metrics.data_delivered += 1;
                    deliver(&packet, iif);
                }
            }
            return true;
        }

        self.forward_packet(packet, from, error_cb, now);
        true
    }

    /// Relay a packet that is not for us.
    fn forward_packet(
        &mut self,
        mut packet: DataPacket,
        from: NodeAddress,
        error_cb: &mut dyn FnMut(&PacketHeader, RouteError),
        now: Timestamp,
    ) {
        let header = packet.header;
        if header.hop_limit <= 1 {
            trace_event!(
                self,
                TraceEvent::HopLimitExpired {
                    ident: header.ident,
                }
            );
            error_cb(&header, RouteError::NoRouteToHost);
            return;
        }
        packet.header.hop_limit -= 1;

        // Reception confirmed to the previous hop; responsibility for the
        // packet is ours from here.
        self.queue_control(from, &Message::DataAck(DataAck { ident: header.ident }));

        match self.select_relay(header.destination, now) {
            SelectOutcome::Ready(relay) => {
                if let Err(err) = self.transmit_data(packet, relay, 0, now) {
                    error_cb(&header, err);
                }
            }
            SelectOutcome::Pending => {
                if let Err(err) = self.queue_forward(packet, 0) {
                    error_cb(&header, err);
                }
            }
            SelectOutcome::Failed => error_cb(&header, RouteError::NoRouteToHost),
        }
    }

    /// Hand a packet to the transport toward `relay` and arm the
    /// acknowledgment window.
    pub(crate) fn transmit_data(
        &mut self,
        packet: DataPacket,
        relay: NodeAddress,
        retries: u8,
        now: Timestamp,
    ) -> Result<(), RouteError> {
        let encoded = packet.encode_to_vec();
        if encoded.len() > self.transport.mtu() {
            return Err(RouteError::MessageTooLarge);
        }
        let ident = packet.header.ident;
        if self.pending_acks.len() >= MAX_PENDING_ACKS && !self.pending_acks.contains_key(&ident) {
            return Err(RouteError::TooManyPending);
        }
        if self
            .transport
            .outbound()
            .try_send(Outbound {
                dest: relay,
                port: Port::Data,
                payload: encoded,
            })
            .is_err()
        {
            return Err(RouteError::TooManyPending);
        }

        self.metrics.data_forwarded += 1;
        trace_event!(
            self,
            TraceEvent::DataForwarded {
                destination: packet.header.destination,
                relay,
                ident,
            }
        );
        self.pending_acks.insert(
            ident,
            PendingAck {
                packet,
                relay,
                retries,
            },
        );
        self.schedule(
            now + self.config.ack_wait,
            crate::node::TimerKind::AckDeadline { ident },
        );
        Ok(())
    }

    /// Park a packet behind the probe for its destination.
    fn queue_forward(&mut self, packet: DataPacket, retries: u8) -> Result<(), RouteError> {
        let total: usize = self.pending_forwards.values().map(|q| q.len()).sum();
        if total >= MAX_PENDING_FORWARDS {
            return Err(RouteError::TooManyPending);
        }
        trace_event!(
            self,
            TraceEvent::DataQueued {
                destination: packet.header.destination,
                ident: packet.header.ident,
            }
        );
        self.pending_forwards
            .entry(packet.header.destination)
            .or_default()
            .push_back(PendingForward { packet, retries });
        Ok(())
    }

    /// Send every packet parked for `destination` through the freshly
    /// decided relay.
    pub(crate) fn drain_pending_forwards(
        &mut self,
        destination: NodeAddress,
        relay: NodeAddress,
        now: Timestamp,
    ) {
        let Some(queue) = self.pending_forwards.remove(&destination) else {
            return;
        };
        for pf in queue {
            let ident = pf.packet.header.ident;
            if self.transmit_data(pf.packet, relay, pf.retries, now).is_err() {
                self.report_forward_failure(destination, ident);
            }
        }
    }

    /// Fail every packet parked for `destination`: its probe collected no
    /// replies, so there is structurally no route.
    pub(crate) fn fail_pending_forwards(&mut self, destination: NodeAddress) {
        let Some(queue) = self.pending_forwards.remove(&destination) else {
            return;
        };
        for pf in queue {
            self.report_forward_failure(destination, pf.packet.header.ident);
        }
    }

    /// Process an acknowledgment from a relay.
    ///
    /// Only the relay the packet was handed to may acknowledge it; an ack
    /// from anyone else is ignored.
    pub(crate) fn handle_data_ack(&mut self, ack: DataAck, from: NodeAddress) {
        let matches_relay = self
            .pending_acks
            .get(&ack.ident)
            .is_some_and(|pending| pending.relay == from);
        if matches_relay {
            self.pending_acks.remove(&ack.ident);
            trace_event!(self, TraceEvent::AckReceived { ident: ack.ident });
        }
    }

    /// An acknowledgment window expired.
    ///
    /// The pending record is gone if the ack arrived in time; otherwise
    /// the relay decision is discarded, a fresh probe re-selects, and the
    /// packet goes around again until the retries are exhausted.
    pub(crate) fn handle_ack_deadline(&mut self, ident: u16, now: Timestamp) {
        let Some(pending) = self.pending_acks.remove(&ident) else {
            return;
        };
        let destination = pending.packet.header.destination;
        let retries = pending.retries + 1;
        if retries > self.config.max_retries {
            trace_event!(
                self,
                TraceEvent::ForwardFailed {
                    destination,
                    ident,
                }
            );
            self.report_forward_failure(destination, ident);
            return;
        }
        trace_event!(self, TraceEvent::AckTimeout { ident, retries });

        // The silent relay's decision is no longer trusted.
        self.routes.remove(&destination);
        match self.select_relay(destination, now) {
            SelectOutcome::Ready(relay) => {
                if self
                    .transmit_data(pending.packet, relay, retries, now)
                    .is_err()
                {
                    self.report_forward_failure(destination, ident);
                }
            }
            SelectOutcome::Pending => {
                if self.queue_forward(pending.packet, retries).is_err() {
                    self.report_forward_failure(destination, ident);
                }
            }
            SelectOutcome::Failed => self.report_forward_failure(destination, ident),
        }
    }

    /// Surface a permanent forwarding failure to the host.
    fn report_forward_failure(&mut self, destination: NodeAddress, ident: u16) {
        self.metrics.forwarding_failures += 1;
        self.push_event(Event::ForwardingFailed { destination, ident });
    }

    /// Next data-packet identification.
    fn allocate_ident(&mut self) -> u16 {
        let ident = self.ident_seq;
        self.ident_seq = self.ident_seq.wrapping_add(1);
        ident
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::config::Config;
    use crate::test_util::{deliver_pong, test_router, ADDR_A, ADDR_B, ADDR_SELF, DEST};
    use crate::time::Duration;
    use crate::types::Pong;
    use crate::wire::Decode;

    fn packet(source: NodeAddress, destination: NodeAddress, ident: u16) -> DataPacket {
        DataPacket {
            header: PacketHeader {
                source,
                destination,
                ident,
                hop_limit: DEFAULT_HOP_LIMIT,
            },
            payload: vec![0xAB; 4],
        }
    }

    /// route_input with collected callback outcomes.
    fn run_route_input(
        router: &mut crate::test_util::TestRouter,
        pkt: DataPacket,
        from: NodeAddress,
        now: Timestamp,
    ) -> (bool, Vec<u16>, Vec<RouteError>) {
        let mut delivered = Vec::new();
        let mut errors = Vec::new();
        let mut deliver = |p: &DataPacket, _iif: u32| delivered.push(p.header.ident);
        let mut on_error = |_h: &PacketHeader, e: RouteError| errors.push(e);
        let handled = router.route_input(pkt, from, 1, Some(&mut deliver), &mut on_error, now);
        (handled, delivered, errors)
    }

    #[test]
    fn test_route_output_without_interfaces() {
        let mut router = test_router(Config::default());
        router.notify_interface_down(1);
        let header = packet(ADDR_SELF, DEST, 0).header;
        assert_eq!(
            router.route_output(&header, None, Timestamp::ZERO),
            Err(RouteError::NoRouteToHost)
        );
    }

    #[test]
    fn test_route_output_cached_relay() {
        let mut router = test_router(Config::default());
        let now = Timestamp::ZERO;
        router.touch_neighbor(ADDR_A, now);
        router.cache_route(DEST, ADDR_A, now);

        let header = packet(ADDR_SELF, DEST, 0).header;
        let route = router.route_output(&header, None, now).unwrap();
        assert_eq!(route.next_hop, ADDR_A);
        assert_eq!(route.destination, DEST);
        assert_eq!(route.interface, 1);
    }

    #[test]
    fn test_route_output_cold_cache_probes_then_serves() {
        let mut router = test_router(Config::default());
        let header = packet(ADDR_SELF, DEST, 0).header;

        // Cold cache: this call fails but opens the probe.
        assert_eq!(
            router.route_output(&header, None, Timestamp::ZERO),
            Err(RouteError::NoRouteToHost)
        );
        deliver_pong(
            &mut router,
            Pong::new(1, 1, 0.9, 0.9, ADDR_SELF, ADDR_A),
            Timestamp::from_millis(2),
        );
        router.handle_timer(Timestamp::from_millis(30));

        // The retry finds the committed decision.
        let route = router
            .route_output(&header, None, Timestamp::from_millis(31))
            .unwrap();
        assert_eq!(route.next_hop, ADDR_A);
    }

    #[test]
    fn test_route_input_declines_without_interfaces() {
        let mut router = test_router(Config::default());
        router.notify_interface_down(1);
        let (handled, delivered, errors) =
            run_route_input(&mut router, packet(ADDR_A, ADDR_SELF, 1), ADDR_A, Timestamp::ZERO);
        assert!(!handled);
        assert!(delivered.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn test_self_duplicate_suppressed() {
        let mut router = test_router(Config::default());
        let (handled, delivered, errors) =
            run_route_input(&mut router, packet(ADDR_SELF, DEST, 1), ADDR_A, Timestamp::ZERO);
        assert!(handled);
        assert!(delivered.is_empty());
        assert!(errors.is_empty());
        // Nothing was transmitted either: the packet just dies here.
        assert!(router.transport().take_sent().is_empty());
    }

    #[test]
    fn test_local_delivery_and_ack() {
        let mut router = test_router(Config::default());
        let (handled, delivered, errors) =
            run_route_input(&mut router, packet(ADDR_A, ADDR_SELF, 7), ADDR_A, Timestamp::ZERO);
        assert!(handled);
        assert_eq!(delivered, vec![7]);
        assert!(errors.is_empty());
        assert_eq!(router.metrics().data_delivered, 1);

        // The previous hop got an ack naming the packet.
        let sent = router.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, ADDR_A);
        assert_eq!(sent[0].port, Port::Control);
        match Message::decode_from_slice(&sent[0].payload).unwrap() {
            Message::DataAck(ack) => assert_eq!(ack.ident, 7),
            other => panic!("expected DataAck, got {:?}", other),
        }
    }

    #[test]
    fn test_local_destination_without_callback_errors() {
        let mut router = test_router(Config::default());
        let mut errors = Vec::new();
        let mut on_error = |_h: &PacketHeader, e: RouteError| errors.push(e);
        let handled = router.route_input(
            packet(ADDR_A, ADDR_SELF, 1),
            ADDR_A,
            1,
            None,
            &mut on_error,
            Timestamp::ZERO,
        );
        assert!(handled);
        assert_eq!(errors, vec![RouteError::UndeliverableLocal]);
    }

    #[test]
    fn test_forward_through_cached_relay() {
        let mut router = test_router(Config::default());
        let now = Timestamp::ZERO;
        router.touch_neighbor(ADDR_B, now);
        router.cache_route(DEST, ADDR_B, now);

        let (handled, delivered, errors) =
            run_route_input(&mut router, packet(ADDR_A, DEST, 9), ADDR_A, now);
        assert!(handled);
        assert!(delivered.is_empty());
        assert!(errors.is_empty());

        let sent = router.transport().take_sent();
        // Ack to the previous hop plus the relayed data packet.
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].dest, ADDR_A);
        assert_eq!(sent[0].port, Port::Control);
        assert_eq!(sent[1].dest, ADDR_B);
        assert_eq!(sent[1].port, Port::Data);
        let relayed = DataPacket::decode_from_slice(&sent[1].payload).unwrap();
        assert_eq!(relayed.header.hop_limit, DEFAULT_HOP_LIMIT - 1);
        assert_eq!(relayed.header.ident, 9);
        assert_eq!(router.metrics().data_forwarded, 1);
    }

    #[test]
    fn test_hop_limit_expiry() {
        let mut router = test_router(Config::default());
        let mut pkt = packet(ADDR_A, DEST, 3);
        pkt.header.hop_limit = 1;
        let (handled, _, errors) = run_route_input(&mut router, pkt, ADDR_A, Timestamp::ZERO);
        assert!(handled);
        assert_eq!(errors, vec![RouteError::NoRouteToHost]);
        assert!(router.transport().take_sent().is_empty());
    }

    #[test]
    fn test_ack_clears_pending() {
        let mut router = test_router(Config::default());
        let now = Timestamp::ZERO;
        router.touch_neighbor(ADDR_B, now);
        router.cache_route(DEST, ADDR_B, now);
        run_route_input(&mut router, packet(ADDR_A, DEST, 9), ADDR_A, now);

        // The relay acknowledges in time.
        let ack = Message::DataAck(DataAck { ident: 9 });
        router.handle_control(&ack.encode_to_vec(), ADDR_B, None, Timestamp::from_millis(10));

        // The ack window fires into the void: no retry, no failure.
        router.handle_timer(Timestamp::from_millis(100));
        assert!(router.events().try_receive().is_err());
        assert_eq!(router.metrics().forwarding_failures, 0);
    }

    #[test]
    fn test_ack_from_wrong_relay_ignored() {
        let mut router = test_router(Config::default());
        let now = Timestamp::ZERO;
        router.touch_neighbor(ADDR_B, now);
        router.cache_route(DEST, ADDR_B, now);
        run_route_input(&mut router, packet(ADDR_A, DEST, 9), ADDR_A, now);

        // Someone other than the chosen relay acknowledges.
        let ack = Message::DataAck(DataAck { ident: 9 });
        router.handle_control(&ack.encode_to_vec(), ADDR_A, None, Timestamp::from_millis(5));

        // The real window still times out and a retry cycle begins.
        router.handle_timer(Timestamp::from_millis(60));
        // Retry went through a fresh probe: a Ping should be pending or sent.
        let outcome = router.select_relay(DEST, Timestamp::from_millis(61));
        assert_eq!(outcome, crate::probe::SelectOutcome::Pending);
    }

    #[test]
    fn test_queue_behind_probe_then_drain() {
        let mut router = test_router(Config::default());
        let now = Timestamp::ZERO;

        // No cached route: the packet parks behind the probe.
        let (handled, _, errors) = run_route_input(&mut router, packet(ADDR_A, DEST, 4), ADDR_A, now);
        assert!(handled);
        assert!(errors.is_empty());

        deliver_pong(
            &mut router,
            Pong::new(1, 1, 0.9, 0.9, ADDR_SELF, ADDR_B),
            Timestamp::from_millis(2),
        );
        router.handle_timer(Timestamp::from_millis(30));

        let sent = router.transport().take_sent();
        let data: Vec<_> = sent.iter().filter(|o| o.port == Port::Data).collect();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].dest, ADDR_B);
    }

    #[test]
    fn test_probe_failure_fails_queued_packet() {
        let mut router = test_router(Config::default());
        run_route_input(&mut router, packet(ADDR_A, DEST, 4), ADDR_A, Timestamp::ZERO);

        // Nobody answers the probe.
        router.handle_timer(Timestamp::from_millis(30));
        assert_eq!(
            router.events().try_receive().ok(),
            Some(Event::ForwardingFailed {
                destination: DEST,
                ident: 4,
            })
        );
        assert_eq!(router.metrics().forwarding_failures, 1);
    }

    #[test]
    fn test_retry_exhaustion_reports_failure() {
        let mut router = test_router(Config::default());
        let now = Timestamp::ZERO;
        router.touch_neighbor(ADDR_A, now);
        router.cache_route(DEST, ADDR_A, now);

        let ident = router.send_data(DEST, vec![1, 2, 3], now).unwrap();
        let mut data_sends = 0u32;
        let mut failures = Vec::new();

        let mut t = now;
        for _ in 0..2000 {
            t = t + Duration::from_millis(1);
            router.handle_timer(t);
            let sent = router.transport().take_sent();
            for out in sent {
                match out.port {
                    Port::Data => data_sends += 1,
                    Port::Control => {
                        // Answer every probe so retries keep finding the
                        // same silent relay; never answer with a DataAck.
                        if let Ok(Message::Ping(_)) = Message::decode_from_slice(&out.payload) {
                            deliver_pong(
                                &mut router,
                                Pong::new(0, 1, 1.0, 1.0, ADDR_SELF, ADDR_A),
                                t,
                            );
                        }
                    }
                }
            }
            while let Ok(event) = router.events().try_receive() {
                if let Event::ForwardingFailed { ident, .. } = event {
                    failures.push(ident);
                }
            }
            if !failures.is_empty() {
                break;
            }
        }

        assert_eq!(failures, vec![ident]);
        // Initial transmission plus one per allowed retry.
        assert_eq!(data_sends, 1 + Config::default().max_retries as u32);
        assert_eq!(router.metrics().forwarding_failures, 1);
    }
}
