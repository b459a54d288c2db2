//! Rendering: a small intermediate `Report` that both the traceroute and
//! MDA algorithms reduce to, so `text`/`json`/`xml` only need to know one
//! shape.

pub mod json;
pub mod text;
pub mod xml;

use crate::algorithm::traceroute::HopOutcome;
use crate::lattice::{Interface, Lattice};
use crate::probe::{Address, ProbeProtocol};

#[derive(Debug, Clone)]
pub enum Entry {
    Reply { from: Address, src_port: u16, dst_port: u16, flow_id: u16, rtt_ms: f64 },
    Star { src_port: u16, dst_port: u16, flow_id: u16 },
}

#[derive(Debug, Clone)]
pub struct HopRecord {
    pub hop: u8,
    pub entries: Vec<Entry>,
}

pub struct Report {
    pub from: Address,
    pub to: Address,
    pub protocol: ProbeProtocol,
    pub hops: Vec<HopRecord>,
}

impl Report {
    pub fn from_traceroute(from: Address, to: Address, protocol: ProbeProtocol, hops: &[(u8, Vec<HopOutcome>)]) -> Self {
        let records = hops
            .iter()
            .map(|(hop, outcomes)| HopRecord {
                hop: *hop,
                entries: outcomes.iter().map(entry_from_outcome).collect(),
            })
            .collect();
        Self { from, to, protocol, hops: records }
    }

    /// MDA has no single linear path; this flattens every interface
    /// observed at each TTL into one `HopRecord`, in discovery order. Each
    /// node carries the set of flows that were shown to reach it, and one
    /// `Entry` is emitted per flow since that's the unit the wire formats
    /// report (`src_port`/`dst_port` are constant across a run; rtt isn't
    /// tracked per flow by the lattice, so replies report it as `0.0`).
    pub fn from_lattice(
        from: Address,
        to: Address,
        protocol: ProbeProtocol,
        lattice: &Lattice,
        max_ttl: u8,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        let mut records = Vec::new();
        for ttl in 1..=max_ttl {
            let mut entries = Vec::new();
            for idx in lattice.nodes_at_ttl(ttl) {
                let node = lattice.node(idx);
                for &flow_id in &node.flows {
                    entries.push(match node.key.interface {
                        Interface::Address(addr) => {
                            Entry::Reply { from: addr, src_port, dst_port, flow_id, rtt_ms: 0.0 }
                        }
                        Interface::Star(_) => Entry::Star { src_port, dst_port, flow_id },
                    });
                }
            }
            if entries.is_empty() {
                continue;
            }
            records.push(HopRecord { hop: ttl, entries });
        }
        Self { from, to, protocol, hops: records }
    }
}

fn entry_from_outcome(outcome: &HopOutcome) -> Entry {
    match outcome {
        HopOutcome::Reply { origin, rtt_ms, src_port, dst_port, flow_id } => {
            Entry::Reply { from: *origin, src_port: *src_port, dst_port: *dst_port, flow_id: *flow_id, rtt_ms: *rtt_ms }
        }
        HopOutcome::Star { src_port, dst_port, flow_id } => {
            Entry::Star { src_port: *src_port, dst_port: *dst_port, flow_id: *flow_id }
        }
    }
}

fn protocol_name(protocol: ProbeProtocol) -> &'static str {
    match protocol {
        ProbeProtocol::Icmp => "icmp",
        ProbeProtocol::Udp => "udp",
        ProbeProtocol::Tcp => "tcp",
    }
}
