//! Cyclic fix-point driver.
//!
//! A flow-induced graph with cyclic dependencies cannot be swept
//! feed-forward. The driver cuts the graph along a feedback arc set (exact
//! by default), guesses the flow states on the cut edges, and iterates
//! feed-forward sweeps, feeding each iteration's cut states into the next
//! until the situation at the cuts reaches a fix point. Burst ceiling must
//! be installed in the flow-state pipelines so the floating-point iteration
//! can terminate with strict equality.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use saihu_core::{AtEdge, Clock, FlowState, GraphEdge, InducedGraph, Network, ServerId};

use crate::mfas::{BaharevFas, FasMethod, WeightedDigraph};

use super::feed_forward::FeedForwardAnalysis;
use super::{AnalysisConfig, XtfaError};

/// Configuration of the fix-point iteration.
#[derive(Debug, Clone)]
pub struct CyclicConfig {
    /// Iteration cap; exceeding it records a failure instead of looping
    /// forever.
    pub max_iterations: usize,
    /// Also require equal source delay bounds for cut-state equivalence.
    pub match_dmax: bool,
}

impl Default for CyclicConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            match_dmax: false,
        }
    }
}

/// Outcome of a cyclic analysis.
pub struct CyclicOutcome {
    /// Number of completed iterations.
    pub iterations: usize,
    /// True when the iteration cap was exceeded; the results then reflect
    /// the last iterate, not a fix point.
    pub fix_point_failure: bool,
    /// The cut edges chosen by the feedback-arc-set method.
    pub cuts: Vec<GraphEdge>,
}

/// Fix-point driver over a cyclic flow-induced graph.
pub struct CyclicAnalysis<'a> {
    pub analysis: FeedForwardAnalysis<'a>,
    fas: Box<dyn FasMethod + 'a>,
}

impl<'a> CyclicAnalysis<'a> {
    /// The configuration is adjusted so every node ceils bursts: the
    /// iteration cannot reach strict equality otherwise.
    pub fn new(network: &'a Network, config: &'a mut AnalysisConfig) -> Result<Self, XtfaError> {
        config.default_setup.ceil_bursts = true;
        for setup in config.node_setups.values_mut() {
            setup.ceil_bursts = true;
        }
        let analysis = FeedForwardAnalysis::new(network, config)?;
        Ok(Self {
            analysis,
            fas: Box::new(BaharevFas::new()),
        })
    }

    /// Replace the feedback-arc-set method.
    pub fn with_fas(mut self, fas: Box<dyn FasMethod + 'a>) -> Self {
        self.fas = fas;
        self
    }

    /// Translate the flow-induced graph into the solver's indexed form and
    /// compute the cuts.
    fn compute_cuts(&self, gif: &InducedGraph) -> Vec<GraphEdge> {
        let index: HashMap<ServerId, usize> = gif
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (*n, i))
            .collect();
        let edges: Vec<(usize, usize)> = gif
            .edges()
            .iter()
            .map(|(a, b)| (index[a], index[b]))
            .collect();
        let graph = WeightedDigraph::new(gif.nodes().len(), edges);
        let fas = self.fas.fas(&graph);
        fas.into_iter().map(|j| gif.edges()[j]).collect()
    }

    /// The guessed flow states at a cut edge: one per flow crossing it, at
    /// the source arrival curve with zeroed dictionaries.
    fn initial_cut_states(&self, cuts: &[GraphEdge]) -> HashMap<GraphEdge, Vec<FlowState>> {
        let mut out = HashMap::new();
        for edge in cuts {
            let mut states = Vec::new();
            for flow in self.analysis.network.flows() {
                let graph = &self.analysis.flow_graphs[&flow.id];
                let crossing = graph.edges().any(|e| e == *edge);
                if crossing {
                    let mut fs = FlowState::new(flow.id);
                    fs.clock = Clock::tai();
                    fs.at_edge = AtEdge::Edge(edge.0, edge.1);
                    fs.arrival = flow.arrival.clone();
                    states.push(fs);
                }
            }
            out.insert(*edge, states);
        }
        out
    }

    fn load_cut_states(&mut self, states: &HashMap<GraphEdge, Vec<FlowState>>) {
        for (edge, list) in states {
            self.analysis
                .comp
                .edge_states
                .insert(*edge, list.clone());
            self.analysis.comp.edge_ready.insert(*edge);
        }
    }

    fn extract_cut_states(&self, cuts: &[GraphEdge]) -> HashMap<GraphEdge, Vec<FlowState>> {
        cuts.iter()
            .map(|edge| {
                (
                    *edge,
                    self.analysis
                        .comp
                        .edge_states
                        .get(edge)
                        .cloned()
                        .unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Multiset equivalence of the cut situations.
    fn situations_equal(
        &self,
        a: &HashMap<GraphEdge, Vec<FlowState>>,
        b: &HashMap<GraphEdge, Vec<FlowState>>,
        match_dmax: bool,
    ) -> bool {
        let keys: HashSet<&GraphEdge> = a.keys().chain(b.keys()).collect();
        for edge in keys {
            let left = a.get(edge).map(Vec::as_slice).unwrap_or(&[]);
            let right = b.get(edge).map(Vec::as_slice).unwrap_or(&[]);
            if left.len() != right.len() {
                return false;
            }
            let covered = |from: &[FlowState], to: &[FlowState]| {
                from.iter()
                    .all(|fs| to.iter().any(|other| fs.equivalent(other, match_dmax)))
            };
            if !covered(left, right) || !covered(right, left) {
                return false;
            }
        }
        true
    }

    fn burst_gap(
        a: &HashMap<GraphEdge, Vec<FlowState>>,
        b: &HashMap<GraphEdge, Vec<FlowState>>,
    ) -> f64 {
        let mut gap = 0.0f64;
        for (edge, left) in a {
            let sum = |states: &[FlowState]| -> f64 {
                states.iter().map(|fs| fs.arrival.burst()).sum()
            };
            let right = b.get(edge).map(Vec::as_slice).unwrap_or(&[]);
            gap = gap.max(sum(right) - sum(left));
        }
        gap
    }

    /// Iterate feed-forward sweeps until the cut situation is stationary.
    pub fn run(&mut self, cyclic: &CyclicConfig) -> Result<CyclicOutcome, XtfaError> {
        let cuts = self.compute_cuts(&self.analysis.gif);
        let mut current = self.initial_cut_states(&cuts);
        let mut iteration = 0usize;
        loop {
            info!(network = %self.analysis.network.name, iteration, "fix-point iteration");
            self.analysis.clear();
            self.load_cut_states(&current);
            self.analysis.run()?;
            let next = self.extract_cut_states(&cuts);
            debug!(
                gap = Self::burst_gap(&current, &next),
                "burst difference across iteration"
            );
            let converged = self.situations_equal(&current, &next, cyclic.match_dmax);
            current = next;
            iteration += 1;
            if converged {
                return Ok(CyclicOutcome {
                    iterations: iteration,
                    fix_point_failure: false,
                    cuts,
                });
            }
            if iteration > cyclic.max_iterations {
                return Ok(CyclicOutcome {
                    iterations: iteration,
                    fix_point_failure: true,
                    cuts,
                });
            }
        }
    }

    /// End-to-end bound of a flow after the last iteration; infinite when
    /// the fix point failed.
    pub fn flow_end_to_end(&self, flow: saihu_core::FlowId, outcome: &CyclicOutcome) -> f64 {
        if outcome.fix_point_failure {
            return f64::INFINITY;
        }
        self.analysis
            .flow_end_to_end(flow)
            .unwrap_or(f64::INFINITY)
    }

    /// Per-node delay bound after the last iteration.
    pub fn node_delay(&self, node: ServerId) -> Option<(f64, f64)> {
        self.analysis.node_delay(node)
    }

    /// The source-measured bounds of all flows, increasing; a failed fix
    /// point reports no finite bound.
    pub fn ordered_delay_bounds(&self, outcome: &CyclicOutcome) -> Vec<f64> {
        if outcome.fix_point_failure {
            return Vec::new();
        }
        self.analysis.ordered_delay_bounds()
    }

    /// Check invariants on the final iterate: every cut edge's states carry
    /// a finite burst.
    pub fn cut_bursts(&self, outcome: &CyclicOutcome) -> Vec<(GraphEdge, f64)> {
        outcome
            .cuts
            .iter()
            .map(|edge| {
                let burst = self
                    .analysis
                    .comp
                    .edge_states
                    .get(edge)
                    .map(|states| states.iter().map(|fs| fs.arrival.burst()).sum())
                    .unwrap_or(0.0);
                (*edge, burst)
            })
            .collect()
    }
}
