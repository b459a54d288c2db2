//! Classic Paris traceroute: one fixed flow per instance,
//! `num_probes_per_hop` probes per TTL, advancing once every outcome at
//! the current TTL is known.

use rand::Rng;
use tracing::debug;

use crate::algorithm::Algorithm;
use crate::event::{Event, RuntimeCtx};
use crate::probe::{self, Address, FlowId, Probe, ProbeProtocol, Reply};

/// One outcome at a given TTL, in arrival order, ready for rendering.
#[derive(Debug, Clone)]
pub enum HopOutcome {
    Reply { origin: Address, rtt_ms: f64, src_port: u16, dst_port: u16, flow_id: u16 },
    Star { src_port: u16, dst_port: u16, flow_id: u16 },
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub first_ttl: u8,
    pub max_ttl: u8,
    pub num_probes_per_hop: u8,
    pub max_consecutive_stars: u8,
    pub per_probe_timeout_ms: u64,
    pub protocol: ProbeProtocol,
    pub src_port: u16,
    pub dst_port: u16,
}

struct HopState {
    outcomes: Vec<HopOutcome>,
    outstanding: u8,
}

pub struct Traceroute {
    opts: Options,
    src: Address,
    dst: Address,
    ttl: u8,
    consecutive_star_hops: u8,
    current_hop: HopState,
    /// Results collected hop by hop, for final rendering.
    pub hops: Vec<(u8, Vec<HopOutcome>)>,
    terminated: bool,
}

impl Traceroute {
    pub fn new(opts: Options, src: Address, dst: Address) -> Self {
        Self {
            opts,
            src,
            dst,
            ttl: opts.first_ttl,
            consecutive_star_hops: 0,
            current_hop: HopState { outcomes: Vec::new(), outstanding: 0 },
            hops: Vec::new(),
            terminated: false,
        }
    }

    fn send_hop_probes(&mut self, ctx: &mut RuntimeCtx) {
        self.current_hop = HopState { outcomes: Vec::new(), outstanding: self.opts.num_probes_per_hop };
        for _ in 0..self.opts.num_probes_per_hop {
            let nonce: u16 = rand::thread_rng().gen();
            let flow = FlowId { src_port: self.opts.src_port, dst_port: self.opts.dst_port, checksum_nonce: nonce };
            match probe::build(self.opts.protocol, self.src, self.dst, self.ttl, flow) {
                Ok(p) => ctx.send_probe(p, std::time::Duration::from_millis(self.opts.per_probe_timeout_ms)),
                Err(e) => debug!("failed to build probe at ttl {}: {e}", self.ttl),
            }
        }
    }

    fn hop_complete(&mut self, ctx: &mut RuntimeCtx) {
        let all_star = self.current_hop.outcomes.iter().all(|o| matches!(o, HopOutcome::Star { .. }));
        self.consecutive_star_hops = if all_star { self.consecutive_star_hops + 1 } else { 0 };

        let reached_dst = self.current_hop.outcomes.iter().any(|o| matches!(o, HopOutcome::Reply { origin, .. } if *origin == self.dst));

        self.hops.push((self.ttl, std::mem::take(&mut self.current_hop.outcomes)));
        ctx.emit(format!("hop {} complete", self.ttl));

        if reached_dst || self.consecutive_star_hops >= self.opts.max_consecutive_stars || self.ttl >= self.opts.max_ttl {
            self.terminated = true;
            ctx.finish();
            return;
        }

        self.ttl += 1;
        self.send_hop_probes(ctx);
    }
}

impl Algorithm for Traceroute {
    fn init(&mut self, ctx: &mut RuntimeCtx) {
        self.send_hop_probes(ctx);
    }

    fn handle_event(&mut self, ctx: &mut RuntimeCtx, event: Event) {
        if self.terminated {
            return;
        }
        match event {
            Event::ProbeReply(p, reply) => {
                if p.ttl != self.ttl {
                    return; // stray reply from an already-closed hop
                }
                let outcome = reply_to_outcome(&p, &reply);
                ctx.emit(format!("reply at ttl {}: {}", p.ttl, reply.origin));
                self.current_hop.outcomes.push(outcome);
                self.current_hop.outstanding -= 1;
                if self.current_hop.outstanding == 0 {
                    self.hop_complete(ctx);
                }
            }
            Event::ProbeTimeout(p) => {
                if p.ttl != self.ttl {
                    return;
                }
                self.current_hop.outcomes.push(HopOutcome::Star {
                    src_port: p.flow.src_port,
                    dst_port: p.flow.dst_port,
                    flow_id: p.flow.checksum_nonce,
                });
                self.current_hop.outstanding -= 1;
                if self.current_hop.outstanding == 0 {
                    self.hop_complete(ctx);
                }
            }
        }
    }
}

fn reply_to_outcome(probe: &Probe, reply: &Reply) -> HopOutcome {
    let rtt_ms = probe
        .sent_at
        .map(|sent| reply.received_at.saturating_duration_since(sent).as_secs_f64() * 1000.0)
        .unwrap_or(0.0);
    HopOutcome::Reply {
        origin: reply.origin,
        rtt_ms,
        src_port: probe.flow.src_port,
        dst_port: probe.flow.dst_port,
        flow_id: probe.flow.checksum_nonce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn opts() -> Options {
        Options {
            first_ttl: 1,
            max_ttl: 30,
            num_probes_per_hop: 3,
            max_consecutive_stars: 5,
            per_probe_timeout_ms: 3000,
            protocol: ProbeProtocol::Udp,
            src_port: 33456,
            dst_port: 33457,
        }
    }

    #[test]
    fn all_probes_at_a_ttl_share_ports_but_differ_in_nonce() {
        let src = Address::V4(Ipv4Addr::new(10, 0, 0, 1));
        let dst = Address::V4(Ipv4Addr::new(192, 0, 2, 1));
        let mut tr = Traceroute::new(opts(), src, dst);
        let mut ctx = RuntimeCtx::new(dst);
        tr.init(&mut ctx);

        let flows: Vec<FlowId> = ctx.sent_probes().map(|p| p.flow).collect();
        assert_eq!(flows.len(), 3);
        assert!(flows.iter().all(|f| (f.src_port, f.dst_port) == (33456, 33457)));
        assert_ne!(flows[0].checksum_nonce, flows[1].checksum_nonce);
    }

    #[test]
    fn terminates_on_reply_from_destination() {
        let src = Address::V4(Ipv4Addr::new(10, 0, 0, 1));
        let dst = Address::V4(Ipv4Addr::new(192, 0, 2, 1));
        let mut options = opts();
        options.num_probes_per_hop = 1;
        let mut tr = Traceroute::new(options, src, dst);
        let mut ctx = RuntimeCtx::new(dst);
        tr.init(&mut ctx);

        let probe = ctx.sent_probes().next().unwrap().clone();
        let reply = Reply {
            origin: dst,
            received_at: std::time::Instant::now(),
            kind: crate::probe::ReplyKind::EchoReply,
            fingerprint: probe.fingerprint,
        };
        tr.handle_event(&mut ctx, Event::ProbeReply(probe, reply));

        assert_eq!(tr.hops.len(), 1);
    }
}
