//! Per-session RTP routing
//!
//! Binds inbound transport packets to the correct logical stream receiver.
//! The negotiation phase only binds a subset of the stream identities a
//! session ends up carrying, so lookup is two-level: an exact table keyed by
//! stream identity (SSRC) and a fallback table keyed by payload type. A
//! fallback hit memoizes the identity into the exact table, so a stream
//! whose identity was never negotiated is routed correctly from its first
//! observed packet onward.
//!
//! Invariants: an identity, once bound, is never rebound within the session;
//! the fallback table is populated at track creation and read-only after;
//! unroutable packets are discarded silently, since dropping an
//! unattributable real-time packet beats halting the pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use stereocast_core::StreamKind;

/// RTP header fields relevant to routing.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader {
    /// RTP version (should be 2)
    pub version: u8,
    /// Marker bit
    pub marker: bool,
    /// Payload type
    pub payload_type: u8,
    /// Sequence number (16-bit)
    pub sequence_number: u16,
    /// Timestamp (32-bit)
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
}

impl RtpHeader {
    /// Parse an RTP header from raw packet bytes.
    ///
    /// Returns `None` if the data is shorter than the fixed 12-byte header.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        let first_byte = data[0];
        let second_byte = data[1];

        Some(Self {
            version: (first_byte >> 6) & 0x03,
            marker: (second_byte >> 7) & 0x01 == 1,
            payload_type: second_byte & 0x7F,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// Receiving end of one logical stream within a session.
///
/// Routed packets are forwarded over an unbounded channel to the consumer
/// (the track's feedback loop), preserving arrival order.
pub struct PacketReceiver {
    kind: StreamKind,
    tx: mpsc::UnboundedSender<Bytes>,
    delivered: AtomicU64,
}

impl PacketReceiver {
    /// Create a receiver for `kind` plus the consumer end of its channel.
    pub fn channel(kind: StreamKind) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                kind,
                tx,
                delivered: AtomicU64::new(0),
            }),
            rx,
        )
    }

    /// Stream kind this receiver consumes.
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Packets delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn deliver(&self, packet: Bytes) {
        // A closed channel means the consumer is shutting down; the packet
        // is simply dropped, same as any other unroutable packet.
        if self.tx.send(packet).is_ok() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Two-level packet-to-receiver lookup for one session.
///
/// Not shared across sessions; dropped with the session.
pub struct RtpRouter {
    exact: HashMap<u32, Arc<PacketReceiver>>,
    fallback: HashMap<u8, Arc<PacketReceiver>>,
    fallback_hits: u64,
    discarded: u64,
}

impl RtpRouter {
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            fallback: HashMap::new(),
            fallback_hits: 0,
            discarded: 0,
        }
    }

    /// Register the receiver for a payload type. Track-creation-time only;
    /// the first registration for a payload type wins.
    pub fn bind_payload_type(&mut self, payload_type: u8, receiver: &Arc<PacketReceiver>) {
        match self.fallback.entry(payload_type) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(receiver));
            }
            std::collections::hash_map::Entry::Occupied(_) => {
                debug!(
                    payload_type,
                    kind = %receiver.kind(),
                    "Payload type already bound, keeping existing receiver"
                );
            }
        }
    }

    /// Bind a stream identity the negotiation made explicit. No-op if the
    /// identity is already bound.
    pub fn bind_ssrc(&mut self, ssrc: u32, receiver: &Arc<PacketReceiver>) {
        self.exact.entry(ssrc).or_insert_with(|| Arc::clone(receiver));
    }

    /// Resolve the receiver for a packet's identity and payload type.
    ///
    /// An exact hit is the common case. A fallback hit binds the identity
    /// permanently so subsequent packets take the exact path. `None` means
    /// the session has no receiver for this payload type and the packet
    /// should be dropped.
    pub fn route(&mut self, ssrc: u32, payload_type: u8) -> Option<Arc<PacketReceiver>> {
        if let Some(receiver) = self.exact.get(&ssrc) {
            return Some(Arc::clone(receiver));
        }

        let receiver = Arc::clone(self.fallback.get(&payload_type)?);
        self.fallback_hits += 1;
        trace!(
            ssrc,
            payload_type,
            kind = %receiver.kind(),
            "Learned stream identity via payload-type fallback"
        );
        self.exact.insert(ssrc, Arc::clone(&receiver));
        Some(receiver)
    }

    /// Route a pre-parsed packet and forward its bytes to the receiver.
    ///
    /// Returns whether the packet was delivered; unroutable packets are
    /// counted and dropped without error.
    pub fn deliver(&mut self, ssrc: u32, payload_type: u8, packet: Bytes) -> bool {
        match self.route(ssrc, payload_type) {
            Some(receiver) => {
                receiver.deliver(packet);
                true
            }
            None => {
                self.discarded += 1;
                false
            }
        }
    }

    /// Parse a raw packet and forward it to its receiver.
    ///
    /// Returns whether the packet was delivered. Unparseable and unroutable
    /// packets are counted and dropped without error.
    pub fn dispatch(&mut self, packet: &[u8]) -> bool {
        let Some(header) = RtpHeader::parse(packet) else {
            self.discarded += 1;
            return false;
        };
        self.deliver(
            header.ssrc,
            header.payload_type,
            Bytes::copy_from_slice(packet),
        )
    }

    /// Number of identities currently bound in the exact table.
    pub fn bound_identities(&self) -> usize {
        self.exact.len()
    }

    /// Number of payload types registered in the fallback table.
    pub fn registered_payload_types(&self) -> usize {
        self.fallback.len()
    }

    /// Times an identity was learned via the fallback table.
    pub fn fallback_hits(&self) -> u64 {
        self.fallback_hits
    }

    /// Packets dropped because no receiver matched.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Default for RtpRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PT_COLOR: u8 = 96;
    const PT_DEPTH: u8 = 97;

    fn rtp_packet(ssrc: u32, payload_type: u8, seq: u16) -> Vec<u8> {
        let mut packet = vec![0u8; 16];
        packet[0] = 0x80; // version 2
        packet[1] = payload_type & 0x7F;
        packet[2..4].copy_from_slice(&seq.to_be_bytes());
        packet[4..8].copy_from_slice(&1234u32.to_be_bytes());
        packet[8..12].copy_from_slice(&ssrc.to_be_bytes());
        packet
    }

    fn router_with_both_kinds() -> (
        RtpRouter,
        Arc<PacketReceiver>,
        Arc<PacketReceiver>,
        mpsc::UnboundedReceiver<Bytes>,
        mpsc::UnboundedReceiver<Bytes>,
    ) {
        let mut router = RtpRouter::new();
        let (color, color_rx) = PacketReceiver::channel(StreamKind::Color);
        let (depth, depth_rx) = PacketReceiver::channel(StreamKind::Depth);
        router.bind_payload_type(PT_COLOR, &color);
        router.bind_payload_type(PT_DEPTH, &depth);
        (router, color, depth, color_rx, depth_rx)
    }

    #[test]
    fn header_parse_extracts_routing_tags() {
        let packet = rtp_packet(0xDEADBEEF, PT_COLOR, 42);
        let header = RtpHeader::parse(&packet).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.ssrc, 0xDEADBEEF);
        assert_eq!(header.payload_type, PT_COLOR);
        assert_eq!(header.sequence_number, 42);
    }

    #[test]
    fn header_parse_rejects_short_packets() {
        assert!(RtpHeader::parse(&[0x80, 96, 0, 1]).is_none());
    }

    #[test]
    fn unknown_identity_learned_via_fallback_once() {
        let (mut router, color, _depth, _color_rx, _depth_rx) = router_with_both_kinds();

        // First packet with an unnegotiated identity matches by payload type.
        let first = router.route(0x1111, PT_COLOR).unwrap();
        assert!(Arc::ptr_eq(&first, &color));
        assert_eq!(router.fallback_hits(), 1);
        assert_eq!(router.bound_identities(), 1);

        // Second packet with the same identity takes the exact path; the
        // fallback table is not consulted again.
        let second = router.route(0x1111, PT_COLOR).unwrap();
        assert!(Arc::ptr_eq(&second, &first));
        assert_eq!(router.fallback_hits(), 1);
    }

    #[test]
    fn identity_is_never_rebound() {
        let (mut router, color, _depth, _color_rx, _depth_rx) = router_with_both_kinds();

        router.route(0x2222, PT_COLOR).unwrap();
        // Same identity arriving with a different payload type keeps its
        // original binding; no identity hijacking.
        let routed = router.route(0x2222, PT_DEPTH).unwrap();
        assert!(Arc::ptr_eq(&routed, &color));
        assert_eq!(router.fallback_hits(), 1);
    }

    #[test]
    fn negotiated_identity_takes_exact_path() {
        let (mut router, _color, depth, _color_rx, _depth_rx) = router_with_both_kinds();
        router.bind_ssrc(0x3333, &depth);

        let routed = router.route(0x3333, PT_COLOR).unwrap();
        assert!(Arc::ptr_eq(&routed, &depth));
        assert_eq!(router.fallback_hits(), 0);
    }

    #[test]
    fn unmatched_payload_type_discards_without_mutation() {
        let (mut router, _color, _depth, _color_rx, _depth_rx) = router_with_both_kinds();

        assert!(router.route(0x4444, 111).is_none());
        assert_eq!(router.bound_identities(), 0);
        assert_eq!(router.registered_payload_types(), 2);

        assert!(!router.dispatch(&rtp_packet(0x4444, 111, 1)));
        assert_eq!(router.discarded(), 1);
        assert_eq!(router.bound_identities(), 0);
    }

    #[test]
    fn malformed_packet_is_discarded() {
        let (mut router, _color, _depth, _color_rx, _depth_rx) = router_with_both_kinds();
        assert!(!router.dispatch(&[0x80, 0x60]));
        assert_eq!(router.discarded(), 1);
    }

    #[test]
    fn dispatched_packets_arrive_in_order() {
        let (mut router, _color, _depth, mut color_rx, _depth_rx) = router_with_both_kinds();

        for seq in 0..3u16 {
            assert!(router.dispatch(&rtp_packet(0x5555, PT_COLOR, seq)));
        }

        for seq in 0..3u16 {
            let packet = color_rx.try_recv().unwrap();
            let header = RtpHeader::parse(&packet).unwrap();
            assert_eq!(header.sequence_number, seq);
        }
    }

    #[test]
    fn first_payload_type_registration_wins() {
        let mut router = RtpRouter::new();
        let (color, _color_rx) = PacketReceiver::channel(StreamKind::Color);
        let (depth, _depth_rx) = PacketReceiver::channel(StreamKind::Depth);

        router.bind_payload_type(PT_COLOR, &color);
        router.bind_payload_type(PT_COLOR, &depth);

        let routed = router.route(0x6666, PT_COLOR).unwrap();
        assert!(Arc::ptr_eq(&routed, &color));
    }

    #[test]
    fn delivery_counts_per_receiver() {
        let (mut router, color, depth, _color_rx, _depth_rx) = router_with_both_kinds();

        router.dispatch(&rtp_packet(0x7777, PT_COLOR, 0));
        router.dispatch(&rtp_packet(0x7777, PT_COLOR, 1));
        router.dispatch(&rtp_packet(0x8888, PT_DEPTH, 0));

        assert_eq!(color.delivered(), 2);
        assert_eq!(depth.delivered(), 1);
    }
}
