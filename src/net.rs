//! Network I/O: raw send/receive sockets, probe/reply correlation, the
//! outbound rate limiter, and the timeout min-heap.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use crate::error::{Result, TraceError};
use crate::packet::{icmp, LayerKind, Packet};
use crate::probe::{Address, Fingerprint, Probe, Reply, ReplyKind};

const MAX_DATAGRAM: usize = 1500;
const MAX_SEND_ATTEMPTS: u32 = 3;

struct InFlight {
    probe: Probe,
    deadline: Instant,
}

/// Raw sockets plus the correlation table and rate limiter. Owns all
/// socket state; Network I/O is the only component that touches a socket
/// directly.
pub struct NetworkIo {
    send4: Socket,
    recv4: AsyncFd<Socket>,
    send6: Option<Socket>,
    recv6: Option<AsyncFd<Socket>>,

    inflight: HashMap<Fingerprint, InFlight>,
    timeouts: BinaryHeap<Reverse<(Instant, Fingerprint)>>,

    rate_interval: Duration,
    next_permit: Instant,
    send_queue: VecDeque<()>,

    /// Replies matched against `inflight` so far, held here rather than in
    /// a `poll_replies` local so a future cancelled mid-await (by losing a
    /// `select!` race) can't drop results that were already committed by
    /// removing their fingerprint from `inflight`.
    ready_replies: Vec<(Probe, Reply)>,

    pub unmatched_replies: u64,
}

impl NetworkIo {
    /// Opens the IPv4 send/receive sockets (required) and attempts the IPv6
    /// pair (optional — a host without IPv6 connectivity still runs `-4`
    /// traces). `rate_interval` is the minimum gap between sends.
    pub fn new(rate_interval: Duration) -> Result<Self> {
        let send4 = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(255)))
            .map_err(TraceError::SocketPermission)?;
        send4.set_header_included_v4(true).map_err(TraceError::SocketPermission)?;
        send4.set_nonblocking(true).map_err(TraceError::SocketPermission)?;

        let recv4_sock = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(TraceError::SocketPermission)?;
        recv4_sock.set_nonblocking(true).map_err(TraceError::SocketPermission)?;
        let recv4 = AsyncFd::new(recv4_sock).map_err(TraceError::SocketPermission)?;

        let send6 = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::from(255)))
            .and_then(|s| {
                s.set_header_included_v6(true)?;
                s.set_nonblocking(true)?;
                Ok(s)
            })
            .inspect_err(|e| warn!("IPv6 send socket unavailable: {e}"))
            .ok();

        let recv6 = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .and_then(|s| {
                s.set_nonblocking(true)?;
                Ok(s)
            })
            .ok()
            .and_then(|s| AsyncFd::new(s).ok());

        if send6.is_some() && recv6.is_some() {
            debug!("IPv6 raw sockets ready");
        } else {
            warn!("IPv6 raw sockets unavailable, -6 traces will fail");
        }

        let now = Instant::now();
        Ok(Self {
            send4,
            recv4,
            send6,
            recv6,
            inflight: HashMap::new(),
            timeouts: BinaryHeap::new(),
            rate_interval,
            next_permit: now,
            send_queue: VecDeque::new(),
            ready_replies: Vec::new(),
            unmatched_replies: 0,
        })
    }

    /// Send `probe` to `dst`, respecting the rate limiter, and register it
    /// in the in-flight table with `timeout` as its deadline.
    pub async fn send_probe(&mut self, mut probe: Probe, dst: Address, timeout: Duration) -> Result<()> {
        self.send_queue.push_back(());
        let now = Instant::now();
        if self.next_permit > now {
            tokio::time::sleep(self.next_permit - now).await;
        }
        self.send_queue.pop_front();
        self.next_permit = Instant::now() + self.rate_interval;

        let sock_addr = match dst {
            Address::V4(a) => SockAddr::from(std::net::SocketAddrV4::new(a, 0)),
            Address::V6(a) => SockAddr::from(std::net::SocketAddrV6::new(a, 0, 0, 0)),
        };

        let socket = match dst {
            Address::V4(_) => &self.send4,
            Address::V6(_) => self
                .send6
                .as_ref()
                .ok_or_else(|| TraceError::SocketPermission(std::io::Error::other("no IPv6 send socket")))?,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match socket.send_to(&probe.packet.buf, &sock_addr) {
                Ok(_) => break,
                Err(e) if attempts < MAX_SEND_ATTEMPTS => {
                    warn!("send attempt {attempts} failed: {e}, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * attempts as u64)).await;
                }
                Err(e) => return Err(TraceError::SendFailure { attempts, source: e }),
            }
        }

        let deadline = Instant::now() + timeout;
        probe.sent_at = Some(Instant::now());
        self.timeouts.push(Reverse((deadline, probe.fingerprint)));
        self.inflight.insert(probe.fingerprint, InFlight { probe, deadline });
        Ok(())
    }

    /// The earliest pending timeout deadline, used by the event loop to
    /// compute its next wake time.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pop every timeout that has already elapsed, removing the probes from
    /// the in-flight table and returning them for `PROBE_TIMEOUT` delivery.
    pub fn drain_expired(&mut self) -> Vec<Probe> {
        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, fp))) = self.timeouts.peek().copied() {
            if deadline > now {
                break;
            }
            self.timeouts.pop();
            if let Some(entry) = self.inflight.remove(&fp) {
                if entry.deadline <= now {
                    expired.push(entry.probe);
                } else {
                    // fingerprint was reused by a newer probe before this
                    // stale heap entry surfaced; put it back.
                    self.inflight.insert(fp, entry);
                }
            }
        }
        expired
    }

    /// Read and correlate every datagram currently available on either
    /// receive socket. Unmatched replies are dropped with a counter bump.
    ///
    /// Returns as soon as the IPv4 drain produces anything, without ever
    /// touching the IPv6 socket: `recv6.readable()` can block indefinitely
    /// when nothing is pending on IPv6, and this whole future races against
    /// a timeout sleep in the event loop's `select!`. Were it cancelled
    /// there, any results only held locally would vanish even though their
    /// fingerprints had already been permanently removed from `inflight`;
    /// stashing them in `self.ready_replies` as they're found means a
    /// cancellation can only delay delivery, never lose it.
    pub async fn poll_replies(&mut self) -> Result<Vec<(Probe, Reply)>> {
        if !self.ready_replies.is_empty() {
            return Ok(std::mem::take(&mut self.ready_replies));
        }

        let mut init_buf = [0u8; MAX_DATAGRAM];

        loop {
            let guard = match self.recv4.readable().await {
                Ok(g) => g,
                Err(e) => return Err(TraceError::SocketPermission(e)),
            };
            let recv_result = guard.try_io(|inner| {
                let mut uninit = [std::mem::MaybeUninit::<u8>::uninit(); MAX_DATAGRAM];
                let (len, addr) = inner.get_ref().recv_from(&mut uninit)?;
                for i in 0..len {
                    init_buf[i] = unsafe { uninit[i].assume_init() };
                }
                Ok((len, addr))
            });
            match recv_result {
                Ok(Ok((len, _addr))) => {
                    if let Some((reply, fp)) = parse_icmpv4_datagram(&init_buf[..len]) {
                        match self.inflight.remove(&fp) {
                            Some(entry) => self.ready_replies.push((entry.probe, reply)),
                            None => self.unmatched_replies += 1,
                        }
                    }
                }
                Ok(Err(e)) => return Err(TraceError::SocketPermission(e)),
                Err(_would_block) => break,
            }
        }

        if !self.ready_replies.is_empty() {
            return Ok(std::mem::take(&mut self.ready_replies));
        }

        if self.recv6.is_some() {
            loop {
                let guard = match self.recv6.as_ref().expect("checked above").readable().await {
                    Ok(g) => g,
                    Err(e) => return Err(TraceError::SocketPermission(e)),
                };
                let recv_result = guard.try_io(|inner| {
                    let mut uninit = [std::mem::MaybeUninit::<u8>::uninit(); MAX_DATAGRAM];
                    let (len, addr) = inner.get_ref().recv_from(&mut uninit)?;
                    for i in 0..len {
                        init_buf[i] = unsafe { uninit[i].assume_init() };
                    }
                    Ok((len, addr))
                });
                match recv_result {
                    Ok(Ok((len, addr))) => {
                        let src = addr
                            .as_socket_ipv6()
                            .map(|a| *a.ip())
                            .unwrap_or(Ipv6Addr::UNSPECIFIED);
                        if let Some((reply, fp)) = parse_icmpv6_payload(&init_buf[..len], src) {
                            match self.inflight.remove(&fp) {
                                Some(entry) => self.ready_replies.push((entry.probe, reply)),
                                None => self.unmatched_replies += 1,
                            }
                        }
                    }
                    Ok(Err(e)) => return Err(TraceError::SocketPermission(e)),
                    Err(_would_block) => break,
                }
            }
        }

        Ok(std::mem::take(&mut self.ready_replies))
    }
}

/// IPv4 raw ICMP reads include the IP header, so the whole datagram parses
/// as an ordinary [`Packet`].
fn parse_icmpv4_datagram(buf: &[u8]) -> Option<(Reply, Fingerprint)> {
    let packet = Packet::parse(buf).ok()?;
    let icmp_layer = packet.layers.get(1)?;
    let type_byte = *packet.buf.get(icmp_layer.offset)?;
    let src = match packet.get_field(0, "src_addr").ok()? {
        crate::packet::FieldValue::V4(a) => Address::V4(a),
        _ => return None,
    };

    let kind = match type_byte {
        icmp::v4::ECHO_REPLY => ReplyKind::EchoReply,
        icmp::v4::TIME_EXCEEDED => ReplyKind::TimeExceeded,
        icmp::v4::DEST_UNREACHABLE => ReplyKind::DestinationUnreachable,
        _ => return None,
    };

    let fp = if kind == ReplyKind::EchoReply {
        extract_fingerprint(&packet)?
    } else {
        extract_fingerprint(packet.embedded.as_deref()?)?
    };

    Some((Reply { origin: src, received_at: Instant::now(), kind, fingerprint: fp }, fp))
}

/// IPv6 raw ICMP reads hand back only the ICMPv6 payload (no IPv6 header),
/// so the message type is read directly off the front of `buf` and the
/// quoted inner datagram (for errors) is parsed as a nested [`Packet`].
fn parse_icmpv6_payload(buf: &[u8], src: Ipv6Addr) -> Option<(Reply, Fingerprint)> {
    if buf.len() < icmp::HEADER_LEN {
        return None;
    }
    let type_byte = buf[0];
    let kind = match type_byte {
        icmp::v6::ECHO_REPLY => ReplyKind::EchoReply,
        icmp::v6::TIME_EXCEEDED => ReplyKind::TimeExceeded,
        icmp::v6::DEST_UNREACHABLE => ReplyKind::DestinationUnreachable,
        _ => return None,
    };

    let fp = if kind == ReplyKind::EchoReply {
        let identifier = u16::from_be_bytes([buf[4], buf[5]]);
        let sequence = u16::from_be_bytes([buf[6], buf[7]]);
        Fingerprint::Icmp { identifier, sequence }
    } else {
        let inner = buf.get(icmp::HEADER_LEN..)?;
        let embedded = Packet::parse(inner).ok()?;
        extract_fingerprint(&embedded)?
    };

    Some((Reply { origin: Address::V6(src), received_at: Instant::now(), kind, fingerprint: fp }, fp))
}

/// Read the fingerprint back out of a self-contained (ip-layer-then-l4)
/// packet, mirroring how it was stamped on the way out.
fn extract_fingerprint(packet: &Packet) -> Option<Fingerprint> {
    let ip_layer = packet.layers.first()?;
    let l4_layer = packet.layers.get(1)?;

    match l4_layer.kind {
        LayerKind::Icmpv4 | LayerKind::Icmpv6 => {
            let crate::packet::FieldValue::U16(identifier) = packet.get_field(1, "identifier").ok()? else {
                return None;
            };
            let crate::packet::FieldValue::U16(sequence) = packet.get_field(1, "sequence").ok()? else {
                return None;
            };
            Some(Fingerprint::Icmp { identifier, sequence })
        }
        LayerKind::Udp | LayerKind::Tcp => {
            let src = match packet.get_field(0, "src_addr").ok()? {
                crate::packet::FieldValue::V4(a) => Address::V4(a),
                crate::packet::FieldValue::V6(a) => Address::V6(a),
                _ => return None,
            };
            let dst = match ip_layer.kind {
                LayerKind::Ipv4 => match packet.get_field(0, "dst_addr").ok()? {
                    crate::packet::FieldValue::V4(a) => Address::V4(a),
                    _ => return None,
                },
                _ => match packet.get_field(0, "dst_addr").ok()? {
                    crate::packet::FieldValue::V6(a) => Address::V6(a),
                    _ => return None,
                },
            };
            let crate::packet::FieldValue::U16(checksum) = packet.get_field(1, "checksum").ok()? else {
                return None;
            };
            let crate::packet::FieldValue::U16(src_port) = packet.get_field(1, "src_port").ok()? else {
                return None;
            };
            let crate::packet::FieldValue::U16(dst_port) = packet.get_field(1, "dst_port").ok()? else {
                return None;
            };
            Some(Fingerprint::L4 { checksum, src, dst, src_port, dst_port })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FieldValue, LayerKind as LK};
    use std::net::Ipv4Addr;

    #[test]
    fn extract_fingerprint_reads_udp_tuple() {
        let mut packet = Packet::compose(&[LK::Ipv4, LK::Udp]).unwrap();
        packet.set_field(0, "src_addr", FieldValue::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        packet.set_field(0, "dst_addr", FieldValue::V4(Ipv4Addr::new(192, 0, 2, 1))).unwrap();
        packet.set_field(1, "src_port", FieldValue::U16(33456)).unwrap();
        packet.set_field(1, "dst_port", FieldValue::U16(33457)).unwrap();
        packet.finalize_checksums(Some(0xBEEF)).unwrap();

        let fp = extract_fingerprint(&packet).unwrap();
        assert_eq!(
            fp,
            Fingerprint::L4 {
                checksum: 0xBEEF,
                src: Address::V4(Ipv4Addr::new(10, 0, 0, 1)),
                dst: Address::V4(Ipv4Addr::new(192, 0, 2, 1)),
                src_port: 33456,
                dst_port: 33457,
            }
        );
    }
}
