//! MDA topology lattice: a DAG of interface observations whose edges only
//! ever point from TTL `t` to `t+1`. That invariant means it is acyclic by
//! construction, so it is stored as a flat arena with integer indices
//! instead of `Rc<RefCell<_>>` back-references.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::probe::Address;

pub type NodeIndex = usize;

/// A node key: a TTL plus either an observed interface address or the star
/// sentinel for an unresponsive hop. Distinct stars at the same TTL under
/// different predecessors are distinct nodes, so the key also carries the
/// predecessor that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Address(Address),
    Star(NodeIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub ttl: u8,
    pub interface: Interface,
}

pub struct Node {
    pub key: NodeKey,
    pub flows: HashSet<u16>,
    pub probes_sent: u32,
    pub saturated: bool,
}

struct Edge {
    from: NodeIndex,
    to: NodeIndex,
    flows: HashSet<u16>,
}

/// The lattice itself. Nodes are addressed by [`NodeIndex`]; `index` maps a
/// [`NodeKey`] back to its node for dedup during hop-by-hop enumeration.
pub struct Lattice {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<NodeKey, NodeIndex>,
}

impl Lattice {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), edges: Vec::new(), index: HashMap::new() }
    }

    /// Look up or create the node for `key`.
    pub fn node_for(&mut self, key: NodeKey) -> NodeIndex {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node { key, flows: HashSet::new(), probes_sent: 0, saturated: false });
        self.index.insert(key, idx);
        idx
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// Record a probe with `flow` having transited from `from` to `to`.
    /// Returns `true` the first time this edge is observed (the caller
    /// emits `MDA_NEW_LINK` on that transition).
    pub fn observe_edge(&mut self, from: NodeIndex, to: NodeIndex, flow: u16) -> bool {
        debug_assert!(self.nodes[to].key.ttl > self.nodes[from].key.ttl, "lattice edges must go forward in ttl");

        self.nodes[to].flows.insert(flow);

        if let Some(edge) = self.edges.iter_mut().find(|e| e.from == from && e.to == to) {
            let is_new = edge.flows.insert(flow);
            return is_new && edge.flows.len() == 1;
        }
        let mut flows = HashSet::new();
        flows.insert(flow);
        self.edges.push(Edge { from, to, flows });
        true
    }

    /// Successor nodes reached from `from` so far.
    pub fn successors(&self, from: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.edges.iter().filter(move |e| e.from == from).map(|e| e.to)
    }

    /// Predecessor nodes that feed into `to` so far.
    pub fn predecessors(&self, to: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.edges.iter().filter(move |e| e.to == to).map(|e| e.from)
    }

    /// Flow ids observed transiting the edge `from -> to`, if any.
    pub fn edge_flows(&self, from: NodeIndex, to: NodeIndex) -> Option<&HashSet<u16>> {
        self.edges.iter().find(|e| e.from == from && e.to == to).map(|e| &e.flows)
    }

    pub fn nodes_at_ttl(&self, ttl: u8) -> impl Iterator<Item = NodeIndex> + '_ {
        (0..self.nodes.len()).filter(move |&i| self.nodes[i].key.ttl == ttl)
    }

    /// No edge `(u@t, v@t')` with `t' <= t`, checked here rather than
    /// merely asserted at construction, so tests can assert it over a
    /// populated lattice.
    pub fn is_acyclic(&self) -> bool {
        self.edges.iter().all(|e| self.nodes[e.to].key.ttl > self.nodes[e.from].key.ttl)
    }
}

impl Default for Lattice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(n: u8) -> Interface {
        Interface::Address(Address::V4(Ipv4Addr::new(10, 0, 0, n)))
    }

    #[test]
    fn edges_only_go_forward_in_ttl() {
        let mut lattice = Lattice::new();
        let a = lattice.node_for(NodeKey { ttl: 4, interface: addr(1) });
        let x = lattice.node_for(NodeKey { ttl: 5, interface: addr(2) });
        lattice.observe_edge(a, x, 7);
        assert!(lattice.is_acyclic());
    }

    #[test]
    fn new_edge_reported_once() {
        let mut lattice = Lattice::new();
        let a = lattice.node_for(NodeKey { ttl: 4, interface: addr(1) });
        let x = lattice.node_for(NodeKey { ttl: 5, interface: addr(2) });
        assert!(lattice.observe_edge(a, x, 1));
        assert!(!lattice.observe_edge(a, x, 2));
    }

    #[test]
    fn diamond_shape_matches_scenario_3() {
        // hop 4: {A,B}; hop 5: {X,Y}; A only reaches X, B reaches both.
        let mut lattice = Lattice::new();
        let root = lattice.node_for(NodeKey { ttl: 3, interface: addr(0) });
        let a = lattice.node_for(NodeKey { ttl: 4, interface: addr(1) });
        let b = lattice.node_for(NodeKey { ttl: 4, interface: addr(2) });
        let x = lattice.node_for(NodeKey { ttl: 5, interface: addr(3) });
        let y = lattice.node_for(NodeKey { ttl: 5, interface: addr(4) });

        lattice.observe_edge(root, a, 1);
        lattice.observe_edge(root, b, 2);
        lattice.observe_edge(a, x, 1);
        lattice.observe_edge(b, x, 3);
        lattice.observe_edge(b, y, 2);

        assert_eq!(lattice.predecessors(x).collect::<Vec<_>>().len(), 2);
        assert!(lattice.edge_flows(a, y).is_none());
        assert!(lattice.is_acyclic());
    }
}
