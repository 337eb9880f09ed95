//! Feed-forward driver.
//!
//! Sweeps the flow-induced graph: a node is ready when all of its incoming
//! edges carry materialized flow states. Each sweep processes every ready
//! unfinished node (sequentially, or on worker threads when the `parallel`
//! feature is enabled), then propagates the output states onto the outgoing
//! edges. A node missing an upstream curve requests postponement and is
//! retried on the next sweep; a sweep where every ready node postpones
//! aborts with a diagnostic naming them.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use saihu_core::{
    AtEdge, CurveRegistry, FlowGraph, FlowId, FlowState, GraphEdge, InducedGraph, Network,
    RefPoint, ServerId,
};

use super::node::{NodeModel, NodeOutcome};
use super::{build_flow_graphs, AnalysisConfig, XtfaError};

/// Mutable analysis state shared across nodes: per-edge flow states, edge
/// readiness and the curve registry. Read-only while nodes compute; the
/// driver applies all writes between sweeps.
#[derive(Debug, Default)]
pub struct ComputationState {
    /// Flow states materialized on each edge of the flow-induced graph.
    pub edge_states: HashMap<GraphEdge, Vec<FlowState>>,
    /// Edges whose states are complete.
    pub edge_ready: HashSet<GraphEdge>,
    /// Output states per (flow, node), for end-to-end queries.
    pub flow_node_states: HashMap<(FlowId, ServerId), Vec<FlowState>>,
    /// Reference-point curves (regulator shapes).
    pub registry: CurveRegistry,
}

impl ComputationState {
    pub fn clear(&mut self) {
        self.edge_states.clear();
        self.edge_ready.clear();
        self.flow_node_states.clear();
        self.registry.clear_computed();
    }
}

/// Feed-forward analysis over a flow-induced graph.
pub struct FeedForwardAnalysis<'a> {
    pub network: &'a Network,
    pub config: &'a AnalysisConfig,
    pub flow_graphs: HashMap<FlowId, FlowGraph>,
    pub gif: InducedGraph,
    pub nodes: HashMap<ServerId, NodeModel>,
    pub comp: ComputationState,
}

impl<'a> FeedForwardAnalysis<'a> {
    pub fn new(network: &'a Network, config: &'a AnalysisConfig) -> Result<Self, XtfaError> {
        let flow_graphs = build_flow_graphs(network);
        let gif = InducedGraph::of_network(network);
        let mut nodes = HashMap::new();
        for node in gif.nodes() {
            nodes.insert(
                *node,
                NodeModel::install(config, network, &flow_graphs, *node)?,
            );
        }
        Ok(Self {
            network,
            config,
            flow_graphs,
            gif,
            nodes,
            comp: ComputationState::default(),
        })
    }

    fn is_ready(&self, node: ServerId) -> bool {
        self.gif
            .in_edges(node)
            .iter()
            .all(|edge| self.comp.edge_ready.contains(edge))
    }

    fn ready_nodes(&self) -> Vec<ServerId> {
        self.gif
            .nodes()
            .iter()
            .copied()
            .filter(|n| !self.nodes[n].finished && self.is_ready(*n))
            .collect()
    }

    fn remaining(&self) -> usize {
        self.nodes.values().filter(|n| !n.finished).count()
    }

    /// Copy the states of the incoming edges into the node model.
    fn prepare_node(&mut self, node: ServerId) {
        let states: Vec<FlowState> = self
            .gif
            .in_edges(node)
            .iter()
            .flat_map(|edge| {
                self.comp
                    .edge_states
                    .get(edge)
                    .into_iter()
                    .flatten()
                    .cloned()
            })
            .collect();
        let model = self.nodes.get_mut(&node).expect("node installed");
        model.input_states = states;
    }

    /// Write an outcome back: registry updates, per-edge output states,
    /// edge readiness.
    fn propagate(&mut self, node: ServerId, outcome: NodeOutcome) {
        for (flow, reference, curve) in &outcome.registry_updates {
            self.comp.registry.register(*flow, *reference, curve.clone());
        }
        // clear previous states on the outgoing edges (overwrites the cut
        // assumptions during fix-point iterations)
        for edge in self.gif.out_edges(node) {
            self.comp.edge_states.insert(*edge, Vec::new());
        }
        for fs in &outcome.output_states {
            let graph = self.flow_graphs.get(&fs.flow).expect("flow graph built");
            for edge in graph.out_edges(node) {
                let mut copy = fs.clone();
                copy.at_edge = AtEdge::Edge(edge.0, edge.1);
                self.comp
                    .edge_states
                    .entry(edge)
                    .or_default()
                    .push(copy);
            }
            self.comp
                .flow_node_states
                .entry((fs.flow, node))
                .or_default()
                .push(fs.clone());
        }
        for edge in self.gif.out_edges(node) {
            self.comp.edge_ready.insert(*edge);
        }
        self.nodes
            .get_mut(&node)
            .expect("node installed")
            .finish(&outcome);
    }

    fn process_one(&self, node: ServerId) -> Result<NodeOutcome, XtfaError> {
        self.nodes[&node].process(
            self.network,
            &self.flow_graphs,
            &self.config.clock,
            &self.comp,
        )
    }

    /// Run sweeps until every node of the flow-induced graph is finished.
    pub fn run(&mut self) -> Result<(), XtfaError> {
        while self.remaining() > 0 {
            let ready = self.ready_nodes();
            if ready.is_empty() {
                return Err(XtfaError::NoNodeReady);
            }
            info!(
                network = %self.network.name,
                remaining = self.remaining(),
                ready = ready.len(),
                "feed-forward sweep"
            );
            for node in &ready {
                self.prepare_node(*node);
            }

            let results: Vec<(ServerId, Result<NodeOutcome, XtfaError>)> =
                self.process_ready(&ready);

            let mut any_progress = false;
            let mut postponed = Vec::new();
            for (node, result) in results {
                match result {
                    Ok(outcome) => {
                        any_progress = true;
                        self.propagate(node, outcome);
                    }
                    Err(XtfaError::NotKnown(err)) => {
                        debug!(node = node.value(), %err, "postponing node");
                        postponed.push(node.value());
                        self.nodes.get_mut(&node).expect("node installed").clear();
                    }
                    Err(other) => return Err(other),
                }
            }
            if !any_progress {
                return Err(XtfaError::AllPostponed { nodes: postponed });
            }
        }
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn process_ready(&self, ready: &[ServerId]) -> Vec<(ServerId, Result<NodeOutcome, XtfaError>)> {
        if self.config.parallel {
            use rayon::prelude::*;
            ready
                .par_iter()
                .map(|node| (*node, self.process_one(*node)))
                .collect()
        } else {
            ready
                .iter()
                .map(|node| (*node, self.process_one(*node)))
                .collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn process_ready(&self, ready: &[ServerId]) -> Vec<(ServerId, Result<NodeOutcome, XtfaError>)> {
        ready
            .iter()
            .map(|node| (*node, self.process_one(*node)))
            .collect()
    }

    /// Reset every node and edge for a new fix-point iteration.
    pub fn clear(&mut self) {
        for model in self.nodes.values_mut() {
            model.clear();
        }
        self.comp.clear();
    }

    /// The per-node delay bounds of a finished analysis.
    pub fn node_delay(&self, node: ServerId) -> Option<(f64, f64)> {
        self.nodes.get(&node).and_then(|n| n.delay_bounds)
    }

    /// End-to-end delay bound of a flow: the worst source-measured bound
    /// over all its states at all its nodes (multicast paths included).
    pub fn flow_end_to_end(&self, flow: FlowId) -> Option<f64> {
        let graph = self.flow_graphs.get(&flow)?;
        let mut worst: Option<f64> = None;
        for node in graph.nodes() {
            if let Some(states) = self.comp.flow_node_states.get(&(flow, node)) {
                for fs in states {
                    let bound = fs.max_delay_from.get(&RefPoint::Source).copied()?;
                    worst = Some(worst.map_or(bound, |w: f64| w.max(bound)));
                }
            }
        }
        worst
    }

    /// Delay bounds of all flows in increasing order.
    pub fn ordered_delay_bounds(&self) -> Vec<f64> {
        let mut bounds: Vec<f64> = self
            .network
            .flows()
            .iter()
            .filter_map(|flow| self.flow_end_to_end(flow.id))
            .collect();
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds
    }

    /// Worst margin to the configured deadlines, over all flows that carry
    /// one.
    pub fn worst_deadline_margin(&self) -> Option<f64> {
        let mut worst: Option<f64> = None;
        for flow in self.network.flows() {
            let (Some(deadline), Some(bound)) = (flow.deadline(), self.flow_end_to_end(flow.id))
            else {
                continue;
            };
            let margin = deadline - bound;
            worst = Some(worst.map_or(margin, |w: f64| w.min(margin)));
        }
        worst
    }

    /// Long-term usage of each node: aggregate sustained rate over link
    /// capacity.
    pub fn node_usage(&self) -> HashMap<ServerId, f64> {
        let mut usage = HashMap::new();
        for (node, model) in &self.nodes {
            let Some(aggregate) = &model.aggregate else {
                continue;
            };
            let rate = match aggregate.to_leaky_bucket_min_rate() {
                Ok(lb) => lb.rate(),
                Err(_) => continue,
            };
            let capacity = self.network.server(*node).capacity.value();
            if capacity > 0.0 {
                usage.insert(*node, rate / capacity);
            }
        }
        usage
    }
}
