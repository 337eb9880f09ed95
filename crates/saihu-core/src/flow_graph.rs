//! Per-flow observation graphs and the flow-induced graph.
//!
//! Every data unit of a flow follows a directed acyclic graph of output
//! ports: a vertex with two outgoing edges represents packet duplication, a
//! vertex with two incoming edges a point where duplicates meet again.
//! The union of all flow graphs is the flow-induced graph the pipeline
//! analysis walks. Both graphs identify vertices by [`ServerId`]; edge lists
//! are the single source of truth, no cyclic object references.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{Flow, Network, ServerId};

/// An edge of a flow graph or of the flow-induced graph.
pub type GraphEdge = (ServerId, ServerId);

/// Location of a flow state: just after an output port, or at the source
/// application before the first output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AtEdge {
    /// Output of the sending application, before any output port.
    Source,
    /// Just after the first vertex of the edge.
    Edge(ServerId, ServerId),
}

impl std::fmt::Display for AtEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtEdge::Source => write!(f, "source"),
            AtEdge::Edge(a, b) => write!(f, "{}->{}", a.value(), b.value()),
        }
    }
}

/// The directed acyclic graph a flow's data units follow.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    graph: DiGraph<ServerId, ()>,
    index: HashMap<ServerId, NodeIndex>,
}

impl FlowGraph {
    /// Build the graph from all paths of the flow (primary and multicast).
    pub fn of_flow(flow: &Flow) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for path in flow.all_paths() {
            for server in path {
                index
                    .entry(*server)
                    .or_insert_with(|| graph.add_node(*server));
            }
            for pair in path.windows(2) {
                let a = index[&pair[0]];
                let b = index[&pair[1]];
                if graph.find_edge(a, b).is_none() {
                    graph.add_edge(a, b, ());
                }
            }
        }
        Self { graph, index }
    }

    pub fn contains(&self, server: ServerId) -> bool {
        self.index.contains_key(&server)
    }

    pub fn nodes(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.graph.node_weights().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = GraphEdge> + '_ {
        self.graph
            .edge_references()
            .map(|e| (self.graph[e.source()], self.graph[e.target()]))
    }

    pub fn out_edges(&self, server: ServerId) -> Vec<GraphEdge> {
        match self.index.get(&server) {
            Some(ix) => self
                .graph
                .edges(*ix)
                .map(|e| (self.graph[e.source()], self.graph[e.target()]))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Vertices with no predecessor: where the flow enters the network.
    pub fn sources(&self) -> Vec<ServerId> {
        self.graph
            .node_indices()
            .filter(|ix| {
                self.graph
                    .neighbors_directed(*ix, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|ix| self.graph[ix])
            .collect()
    }

    /// Vertices with no successor: where the flow leaves the network.
    pub fn leaves(&self) -> Vec<ServerId> {
        self.graph
            .node_indices()
            .filter(|ix| self.graph.neighbors(*ix).next().is_none())
            .map(|ix| self.graph[ix])
            .collect()
    }

    /// All vertices with a directed path to `target`.
    pub fn ancestors(&self, target: ServerId) -> HashSet<ServerId> {
        let mut out = HashSet::new();
        let Some(start) = self.index.get(&target) else {
            return out;
        };
        let mut queue = VecDeque::from([*start]);
        let mut visited = HashSet::from([*start]);
        while let Some(ix) = queue.pop_front() {
            for pred in self
                .graph
                .neighbors_directed(ix, petgraph::Direction::Incoming)
            {
                if visited.insert(pred) {
                    out.insert(self.graph[pred]);
                    queue.push_back(pred);
                }
            }
        }
        out
    }

    /// Number of edges on a shortest directed path from `from` to `to`,
    /// `None` when `to` is unreachable.
    pub fn distance(&self, from: ServerId, to: ServerId) -> Option<usize> {
        let start = *self.index.get(&from)?;
        let goal = *self.index.get(&to)?;
        let mut dist = HashMap::from([(start, 0usize)]);
        let mut queue = VecDeque::from([start]);
        while let Some(ix) = queue.pop_front() {
            if ix == goal {
                return dist.get(&goal).copied();
            }
            let d = dist[&ix];
            for next in self.graph.neighbors(ix) {
                if let std::collections::hash_map::Entry::Vacant(e) = dist.entry(next) {
                    e.insert(d + 1);
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

/// The flow-induced graph: union of all flow graphs over the network.
#[derive(Debug, Clone)]
pub struct InducedGraph {
    nodes: Vec<ServerId>,
    edges: Vec<GraphEdge>,
    in_edges: HashMap<ServerId, Vec<GraphEdge>>,
    out_edges: HashMap<ServerId, Vec<GraphEdge>>,
}

impl InducedGraph {
    pub fn of_network(network: &Network) -> Self {
        let mut nodes: Vec<ServerId> = Vec::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        for flow in network.flows() {
            for path in flow.all_paths() {
                for server in path {
                    if !nodes.contains(server) {
                        nodes.push(*server);
                    }
                }
                for pair in path.windows(2) {
                    let edge = (pair[0], pair[1]);
                    if !edges.contains(&edge) {
                        edges.push(edge);
                    }
                }
            }
        }
        let mut in_edges: HashMap<ServerId, Vec<GraphEdge>> = HashMap::new();
        let mut out_edges: HashMap<ServerId, Vec<GraphEdge>> = HashMap::new();
        for node in &nodes {
            in_edges.insert(*node, Vec::new());
            out_edges.insert(*node, Vec::new());
        }
        for edge in &edges {
            out_edges.get_mut(&edge.0).expect("node listed").push(*edge);
            in_edges.get_mut(&edge.1).expect("node listed").push(*edge);
        }
        Self {
            nodes,
            edges,
            in_edges,
            out_edges,
        }
    }

    pub fn nodes(&self) -> &[ServerId] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn in_edges(&self, node: ServerId) -> &[GraphEdge] {
        self.in_edges.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn out_edges(&self, node: ServerId) -> &[GraphEdge] {
        self.out_edges.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when the graph restricted to `edges` minus `removed` is acyclic.
    pub fn is_acyclic_without(&self, removed: &HashSet<GraphEdge>) -> bool {
        // Kahn's algorithm on the residual edge set
        let mut indeg: HashMap<ServerId, usize> =
            self.nodes.iter().map(|n| (*n, 0)).collect();
        for edge in &self.edges {
            if !removed.contains(edge) {
                *indeg.get_mut(&edge.1).expect("node listed") += 1;
            }
        }
        let mut queue: VecDeque<ServerId> = indeg
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut seen = 0usize;
        while let Some(node) = queue.pop_front() {
            seen += 1;
            for edge in self.out_edges(node) {
                if removed.contains(edge) {
                    continue;
                }
                let d = indeg.get_mut(&edge.1).expect("node listed");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(edge.1);
                }
            }
        }
        seen == self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::Curve;
    use crate::model::{Flow, FlowId, Network, Server};

    fn sid(i: usize) -> ServerId {
        ServerId::new(i)
    }

    fn ring3() -> Network {
        let servers = (0..3)
            .map(|i| Server::new(sid(i), format!("s{i}"), Curve::rate_latency(10.0, 1.0)))
            .collect();
        let mut net = Network::new("ring3", servers);
        for i in 0..3 {
            net.add_flow(Flow::new(
                FlowId::new(i),
                format!("f{i}"),
                vec![sid(i), sid((i + 1) % 3), sid((i + 2) % 3)],
                Curve::leaky_bucket(1.0, 1.0),
            ));
        }
        net
    }

    #[test]
    fn test_flow_graph_basics() {
        let flow = Flow::new(
            FlowId::new(0),
            "f0",
            vec![sid(0), sid(1), sid(2)],
            Curve::leaky_bucket(1.0, 1.0),
        );
        let g = FlowGraph::of_flow(&flow);
        assert_eq!(g.sources(), vec![sid(0)]);
        assert_eq!(g.leaves(), vec![sid(2)]);
        assert_eq!(g.distance(sid(0), sid(2)), Some(2));
        assert_eq!(g.ancestors(sid(2)), HashSet::from([sid(0), sid(1)]));
    }

    #[test]
    fn test_multicast_flow_graph() {
        let mut flow = Flow::new(
            FlowId::new(0),
            "f0",
            vec![sid(0), sid(1)],
            Curve::leaky_bucket(1.0, 1.0),
        );
        flow.multicast.push(crate::model::NamedPath {
            name: "p1".into(),
            path: vec![sid(0), sid(2)],
        });
        let g = FlowGraph::of_flow(&flow);
        assert_eq!(g.sources(), vec![sid(0)]);
        let mut leaves = g.leaves();
        leaves.sort();
        assert_eq!(leaves, vec![sid(1), sid(2)]);
        assert_eq!(g.out_edges(sid(0)).len(), 2);
    }

    #[test]
    fn test_induced_graph_cycle_detection() {
        let net = ring3();
        let gif = InducedGraph::of_network(&net);
        assert_eq!(gif.nodes().len(), 3);
        assert_eq!(gif.edges().len(), 3);
        assert!(!gif.is_acyclic_without(&HashSet::new()));
        let cut = HashSet::from([(sid(2), sid(0))]);
        assert!(gif.is_acyclic_without(&cut));
    }
}
