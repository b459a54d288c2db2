//! Probe/Reply data model: a logical probe wraps a composed [`Packet`]
//! plus the bookkeeping Network I/O and the algorithms need to correlate
//! and time it out.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use crate::packet::Packet;

/// A tagged-union address, immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl Address {
    pub fn is_v4(self) -> bool {
        matches!(self, Address::V4(_))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::V4(a) => write!(f, "{a}"),
            Address::V6(a) => write!(f, "{a}"),
        }
    }
}

impl From<std::net::IpAddr> for Address {
    fn from(a: std::net::IpAddr) -> Self {
        match a {
            std::net::IpAddr::V4(v4) => Address::V4(v4),
            std::net::IpAddr::V6(v6) => Address::V6(v6),
        }
    }
}

/// The subset of fields a router's ECMP hash sees. Fixing these for every
/// probe in a flow pins the path; MDA instead enumerates distinct flow ids
/// to span the hash space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId {
    pub src_port: u16,
    pub dst_port: u16,
    /// The per-probe checksum nonce crafted into the UDP checksum field, or
    /// the ICMP identifier for ICMP-mode probes.
    pub checksum_nonce: u16,
}

/// The L4 protocol a probe is carried in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeProtocol {
    Icmp,
    Udp,
    Tcp,
}

/// A fingerprint used to correlate an inbound datagram (or its ICMP-quoted
/// inner header) back to the probe that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// UDP/TCP: checksum nonce + addresses + ports.
    L4 { checksum: u16, src: Address, dst: Address, src_port: u16, dst_port: u16 },
    /// ICMP echo: identifier + sequence.
    Icmp { identifier: u16, sequence: u16 },
}

/// A probe sent (or about to be sent): a composed packet plus the metadata
/// needed to time it out and attribute a reply.
///
/// Lifetime: created by an algorithm, owned by Network I/O's in-flight table
/// until a reply or timeout frees it, then handed to the algorithm once more
/// as an event payload.
#[derive(Debug, Clone)]
pub struct Probe {
    pub packet: Packet,
    pub ttl: u8,
    pub flow: FlowId,
    pub protocol: ProbeProtocol,
    pub fingerprint: Fingerprint,
    pub sent_at: Option<Instant>,
}

impl Probe {
    pub fn new(packet: Packet, ttl: u8, flow: FlowId, protocol: ProbeProtocol, fingerprint: Fingerprint) -> Self {
        Self { packet, ttl, flow, protocol, fingerprint, sent_at: None }
    }
}

/// A probe reconstructed from a received datagram. For ICMP
/// time-exceeded/unreachable, `origin` is the address that sent the ICMP
/// error (the hop under test), not the final destination.
#[derive(Debug, Clone)]
pub struct Reply {
    pub origin: Address,
    pub received_at: Instant,
    pub kind: ReplyKind,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    TimeExceeded,
    DestinationUnreachable,
}

/// Compose and checksum-tag a wire packet for one probe: the ports in
/// `flow` pin the ECMP path, `flow.checksum_nonce` (ICMP: used as the
/// sequence number) is what makes this one probe distinguishable from its
/// siblings at the same TTL.
pub fn build(protocol: ProbeProtocol, src: Address, dst: Address, ttl: u8, flow: FlowId) -> crate::error::Result<Probe> {
    use crate::packet::{FieldValue, LayerKind};

    let ip_kind = if src.is_v4() { LayerKind::Ipv4 } else { LayerKind::Ipv6 };
    let l4_kind = match protocol {
        ProbeProtocol::Icmp => {
            if ip_kind == LayerKind::Ipv4 {
                LayerKind::Icmpv4
            } else {
                LayerKind::Icmpv6
            }
        }
        ProbeProtocol::Udp => LayerKind::Udp,
        ProbeProtocol::Tcp => LayerKind::Tcp,
    };

    let mut packet = crate::packet::Packet::compose(&[ip_kind, l4_kind])?;
    set_ttl(&mut packet, ip_kind, ttl)?;
    set_addr(&mut packet, 0, "src_addr", src)?;
    set_addr(&mut packet, 0, "dst_addr", dst)?;
    set_l4_protocol_number(&mut packet, ip_kind, l4_kind)?;

    let fingerprint = match l4_kind {
        LayerKind::Icmpv4 | LayerKind::Icmpv6 => {
            packet.set_field(1, "type", FieldValue::U8(icmp_echo_request_type(ip_kind)))?;
            packet.set_field(1, "code", FieldValue::U8(0))?;
            packet.set_field(1, "identifier", FieldValue::U16(flow.src_port))?;
            packet.set_field(1, "sequence", FieldValue::U16(flow.checksum_nonce))?;
            packet.finalize_checksums(None)?;
            Fingerprint::Icmp { identifier: flow.src_port, sequence: flow.checksum_nonce }
        }
        LayerKind::Udp => {
            packet.set_field(1, "src_port", FieldValue::U16(flow.src_port))?;
            packet.set_field(1, "dst_port", FieldValue::U16(flow.dst_port))?;
            packet.finalize_checksums(Some(flow.checksum_nonce))?;
            Fingerprint::L4 { checksum: flow.checksum_nonce, src, dst, src_port: flow.src_port, dst_port: flow.dst_port }
        }
        LayerKind::Tcp => {
            packet.set_field(1, "src_port", FieldValue::U16(flow.src_port))?;
            packet.set_field(1, "dst_port", FieldValue::U16(flow.dst_port))?;
            packet.set_field(1, "flags", FieldValue::U8(crate::packet::tcp::flags::SYN))?;
            packet.finalize_checksums(None)?;
            Fingerprint::L4 { checksum: 0, src, dst, src_port: flow.src_port, dst_port: flow.dst_port }
        }
        _ => unreachable!(),
    };

    Ok(Probe::new(packet, ttl, flow, protocol, fingerprint))
}

fn set_ttl(packet: &mut crate::packet::Packet, ip_kind: crate::packet::LayerKind, ttl: u8) -> crate::error::Result<()> {
    let field = if ip_kind == crate::packet::LayerKind::Ipv4 { "ttl" } else { "hop_limit" };
    packet.set_field(0, field, crate::packet::FieldValue::U8(ttl))
}

/// The IP header's protocol/next-header byte isn't inferable from layer
/// adjacency alone (UDP and TCP share the same preceding IPv4 layer), so
/// the builder sets it explicitly from the L4 layer it just composed.
fn set_l4_protocol_number(
    packet: &mut crate::packet::Packet,
    ip_kind: crate::packet::LayerKind,
    l4_kind: crate::packet::LayerKind,
) -> crate::error::Result<()> {
    use crate::packet::{FieldValue, LayerKind};
    let number: u8 = match l4_kind {
        LayerKind::Icmpv4 => 1,
        LayerKind::Tcp => 6,
        LayerKind::Udp => 17,
        LayerKind::Icmpv6 => 58,
        _ => unreachable!(),
    };
    let field = if ip_kind == LayerKind::Ipv4 { "protocol" } else { "next_header" };
    packet.set_field(0, field, FieldValue::U8(number))
}

fn set_addr(packet: &mut crate::packet::Packet, layer: usize, name: &str, addr: Address) -> crate::error::Result<()> {
    let value = match addr {
        Address::V4(a) => crate::packet::FieldValue::V4(a),
        Address::V6(a) => crate::packet::FieldValue::V6(a),
    };
    packet.set_field(layer, name, value)
}

fn icmp_echo_request_type(ip_kind: crate::packet::LayerKind) -> u8 {
    if ip_kind == crate::packet::LayerKind::Ipv4 {
        crate::packet::icmp::v4::ECHO_REQUEST
    } else {
        crate::packet::icmp::v6::ECHO_REQUEST
    }
}
