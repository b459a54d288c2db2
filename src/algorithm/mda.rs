//! Multipath Detection Algorithm: per-predecessor probing tasks that
//! enumerate next-hop interfaces until a stopping rule derived from the
//! coupon-collector bound says another interface is unlikely to exist.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::debug;

use crate::algorithm::Algorithm;
use crate::event::{Event, RuntimeCtx};
use crate::lattice::{Interface, Lattice, NodeIndex, NodeKey};
use crate::probe::{self, Address, FlowId, Probe, ProbeProtocol, Reply};

/// `N(k, alpha)`: the flow count needed so that, having observed `k`
/// distinct interfaces at a confluence, the probability an unobserved
/// `(k+1)`th interface still exists is at most `alpha`.
///
/// `N(1)` has no closed form in the coupon-collector derivation (there's
/// nothing to "collect more of" yet), so it's the small constant the
/// published MDA stopping table uses; `k >= 2` follows
/// `ceil(ln(alpha/k) / ln((k-1)/k))` directly.
pub fn stopping_table(alpha: f64, max_k: usize) -> Vec<u32> {
    let mut table = vec![0u32; max_k + 1];
    if max_k >= 1 {
        table[1] = 6;
    }
    for k in 2..=max_k {
        let n = (alpha / k as f64).ln() / ((k - 1) as f64 / k as f64).ln();
        table[k] = n.ceil() as u32;
    }
    table
}

const MAX_TABLE_K: usize = 32;

fn required_probes(table: &[u32], k: usize) -> u32 {
    table.get(k.min(MAX_TABLE_K)).copied().unwrap_or(*table.last().unwrap_or(&6))
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub first_ttl: u8,
    pub max_ttl: u8,
    pub alpha: f64,
    pub per_probe_timeout_ms: u64,
    pub protocol: ProbeProtocol,
    pub src_port: u16,
    pub dst_port: u16,
}

/// One predecessor's enumeration of its next hop, hop `t` under
/// predecessor `p`. Diamond resolution falls out naturally: each
/// predecessor at a confluence gets its own task, so flows are never
/// conflated across branches.
struct Task {
    predecessor: NodeIndex,
    ttl: u8,
    /// Flow ids already sent toward this predecessor (never reused here).
    flows_tried: HashSet<u16>,
    /// Distinct next-hop nodes this task has observed.
    observed: HashSet<NodeIndex>,
    probes_sent: u32,
    since_new: u32,
    terminal: bool,
}

impl Task {
    fn k(&self) -> usize {
        self.observed.len()
    }
}

pub struct Mda {
    opts: Options,
    src: Address,
    dst: Address,
    table: Vec<u32>,

    pub lattice: Lattice,
    root: NodeIndex,
    tasks: Vec<Task>,
    /// Nodes that already have a forward task spawned for them, so a node
    /// reached by a second predecessor doesn't get probed twice at `t+1`.
    forwarded: HashSet<NodeIndex>,

    pending: HashMap<u16, usize>,
    next_nonce: u16,
    terminated: bool,
}

impl Mda {
    pub fn new(opts: Options, src: Address, dst: Address) -> Self {
        let mut lattice = Lattice::new();
        let root = lattice.node_for(NodeKey { ttl: opts.first_ttl.saturating_sub(1), interface: Interface::Address(src) });
        let table = stopping_table(opts.alpha, MAX_TABLE_K);
        Self {
            opts,
            src,
            dst,
            table,
            lattice,
            root,
            tasks: Vec::new(),
            forwarded: HashSet::new(),
            pending: HashMap::new(),
            next_nonce: 1,
            terminated: false,
        }
    }

    fn alloc_nonce(&mut self) -> u16 {
        loop {
            let n = self.next_nonce;
            self.next_nonce = self.next_nonce.wrapping_add(1).max(1);
            if !self.pending.contains_key(&n) {
                return n;
            }
        }
    }

    /// A flow is admissible for a task's predecessor `p` if it has already
    /// been shown, by an earlier probe, to transit to `p`: `p.flows` is
    /// exactly that set (populated by `Lattice::observe_edge` the first
    /// time any probe landed on `p`). Replaying one of those keeps this
    /// probe on the same path through the diamond as its predecessor task;
    /// only once they're all spent does the task mint an untested nonce.
    fn next_flow_for(&mut self, task_idx: usize) -> u16 {
        let predecessor = self.tasks[task_idx].predecessor;
        let candidate = {
            let tried = &self.tasks[task_idx].flows_tried;
            let pending = &self.pending;
            self.lattice
                .node(predecessor)
                .flows
                .iter()
                .find(|f| !tried.contains(f) && !pending.contains_key(f))
                .copied()
        };
        candidate.unwrap_or_else(|| self.alloc_nonce())
    }

    fn send_next_probe(&mut self, ctx: &mut RuntimeCtx, task_idx: usize) {
        let nonce = self.next_flow_for(task_idx);
        let ttl = self.tasks[task_idx].ttl;
        self.tasks[task_idx].flows_tried.insert(nonce);
        self.tasks[task_idx].probes_sent += 1;

        let flow = FlowId { src_port: self.opts.src_port, dst_port: self.opts.dst_port, checksum_nonce: nonce };
        match probe::build(self.opts.protocol, self.src, self.dst, ttl, flow) {
            Ok(p) => {
                self.pending.insert(nonce, task_idx);
                ctx.send_probe(p, Duration::from_millis(self.opts.per_probe_timeout_ms));
            }
            Err(e) => debug!("mda: failed to build probe at ttl {ttl}: {e}"),
        }
    }

    fn on_outcome(&mut self, ctx: &mut RuntimeCtx, probe: Probe, reply: Option<Reply>) {
        let nonce = probe.flow.checksum_nonce;
        let Some(task_idx) = self.pending.remove(&nonce) else { return };

        let predecessor = self.tasks[task_idx].predecessor;
        let ttl = self.tasks[task_idx].ttl;

        let interface = match &reply {
            Some(r) => Interface::Address(r.origin),
            None => Interface::Star(predecessor),
        };
        let reached_dst = matches!(&reply, Some(r) if r.origin == self.dst);

        let node = self.lattice.node_for(NodeKey { ttl, interface });
        let is_new_edge = self.lattice.observe_edge(predecessor, node, nonce);
        if is_new_edge {
            ctx.emit(format!("MDA_NEW_LINK node={node} ttl={ttl}"));
        }

        let first_time_for_task = self.tasks[task_idx].observed.insert(node);
        if first_time_for_task {
            self.tasks[task_idx].since_new = 0;
        } else {
            self.tasks[task_idx].since_new += 1;
        }

        if reply.is_some() && !reached_dst && ttl < self.opts.max_ttl && self.forwarded.insert(node) {
            self.tasks.push(Task {
                predecessor: node,
                ttl: ttl + 1,
                flows_tried: HashSet::new(),
                observed: HashSet::new(),
                probes_sent: 0,
                since_new: 0,
                terminal: false,
            });
        }

        let task = &mut self.tasks[task_idx];
        let k = task.k();
        let n_k = required_probes(&self.table, k.max(1));
        let n_prev = if k <= 1 { 0 } else { required_probes(&self.table, k - 1) };
        let saturated = task.probes_sent >= n_k && task.since_new >= n_k.saturating_sub(n_prev);
        task.terminal = reached_dst || saturated;

        if !task.terminal {
            self.send_next_probe(ctx, task_idx);
        }

        self.maybe_terminate(ctx);
    }

    fn maybe_terminate(&mut self, ctx: &mut RuntimeCtx) {
        if self.tasks.iter().all(|t| t.terminal) {
            self.terminated = true;
            ctx.emit("MDA_HAS_TERMINATED");
            ctx.finish();
        }
    }
}

impl Algorithm for Mda {
    fn init(&mut self, ctx: &mut RuntimeCtx) {
        self.tasks.push(Task {
            predecessor: self.root,
            ttl: self.opts.first_ttl,
            flows_tried: HashSet::new(),
            observed: HashSet::new(),
            probes_sent: 0,
            since_new: 0,
            terminal: false,
        });
        self.send_next_probe(ctx, 0);
    }

    fn handle_event(&mut self, ctx: &mut RuntimeCtx, event: Event) {
        if self.terminated {
            return;
        }
        match event {
            Event::ProbeReply(p, reply) => self.on_outcome(ctx, p, Some(reply)),
            Event::ProbeTimeout(p) => self.on_outcome(ctx, p, None),
        }
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
            alpha: 0.05,
            per_probe_timeout_ms: 3000,
            protocol: ProbeProtocol::Udp,
            src_port: 33456,
            dst_port: 33457,
        }
    }

    #[test]
    fn replays_a_flow_already_confirmed_to_reach_the_predecessor() {
        let src = Address::V4(Ipv4Addr::new(10, 0, 0, 1));
        let dst = Address::V4(Ipv4Addr::new(192, 0, 2, 1));
        let mut mda = Mda::new(opts(), src, dst);

        let grandparent = mda.root;
        let predecessor = mda.lattice.node_for(NodeKey {
            ttl: 4,
            interface: Interface::Address(Address::V4(Ipv4Addr::new(10, 0, 0, 2))),
        });
        mda.lattice.observe_edge(grandparent, predecessor, 42);

        let task_idx = mda.tasks.len();
        mda.tasks.push(Task {
            predecessor,
            ttl: 5,
            flows_tried: HashSet::new(),
            observed: HashSet::new(),
            probes_sent: 0,
            since_new: 0,
            terminal: false,
        });

        assert_eq!(mda.next_flow_for(task_idx), 42);
    }

    #[test]
    fn mints_a_fresh_nonce_once_confirmed_flows_are_exhausted() {
        let src = Address::V4(Ipv4Addr::new(10, 0, 0, 1));
        let dst = Address::V4(Ipv4Addr::new(192, 0, 2, 1));
        let mut mda = Mda::new(opts(), src, dst);

        let grandparent = mda.root;
        let predecessor = mda.lattice.node_for(NodeKey {
            ttl: 4,
            interface: Interface::Address(Address::V4(Ipv4Addr::new(10, 0, 0, 2))),
        });
        mda.lattice.observe_edge(grandparent, predecessor, 42);

        let task_idx = mda.tasks.len();
        let mut flows_tried = HashSet::new();
        flows_tried.insert(42);
        mda.tasks.push(Task {
            predecessor,
            ttl: 5,
            flows_tried,
            observed: HashSet::new(),
            probes_sent: 0,
            since_new: 0,
            terminal: false,
        });

        let nonce = mda.next_flow_for(task_idx);
        assert_ne!(nonce, 42, "the one confirmed flow was already exhausted by flows_tried");
    }

    #[test]
    fn n_of_1_is_the_constant() {
        let table = stopping_table(0.05, 10);
        assert_eq!(table[1], 6);
    }

    #[test]
    fn table_is_monotonically_increasing() {
        let table = stopping_table(0.05, 20);
        for k in 2..20 {
            assert!(table[k] >= table[k - 1], "N({k}) should be >= N({})", k - 1);
        }
    }

    #[test]
    fn matches_published_mda_values_for_small_k() {
        // From Veitch et al.'s MDA paper, alpha = 0.05: N(2)=11, N(3)=16, N(4)=21, N(5)=24.
        let table = stopping_table(0.05, 5);
        assert_eq!(table[2], 11);
        assert_eq!(table[3], 16);
        assert_eq!(table[4], 21);
        assert_eq!(table[5], 24);
    }
}
