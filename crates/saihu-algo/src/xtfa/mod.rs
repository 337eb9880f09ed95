//! Pipeline-based Total Flow Analysis (xTFA).
//!
//! Every node of the flow-induced graph runs three pipelines in order:
//! - the **aggregate-computation pipeline** (ACP) turns the incoming flow
//!   states into the arrival curve of the aggregate entering the queuing
//!   subsystem;
//! - the **delay-bound pipeline** (DBP) bounds the delay the aggregate
//!   suffers there;
//! - the **flow-state pipeline** (FSP) updates the individual flow states
//!   for the next hop.
//!
//! A feed-forward driver schedules the nodes along the edge-ready relation;
//! a fix-point driver handles cyclic dependency graphs by cutting them along
//! a minimum feedback arc set.

pub mod acp;
pub mod cyclic;
pub mod dbp;
pub mod feed_forward;
pub mod fsp;
mod merge;
pub mod node;
pub mod partition;

pub use cyclic::{CyclicAnalysis, CyclicConfig};
pub use feed_forward::{ComputationState, FeedForwardAnalysis};
pub use node::NodeModel;

use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

use saihu_core::{
    Clock, ClockModel, Curve, CurveError, FlowGraph, FlowId, LookupError, Network, RefPoint,
    ServerId,
};

/// Errors of the xTFA subsystem.
#[derive(Error, Debug)]
pub enum XtfaError {
    /// A referenced curve is not available yet; the driver retries the node
    /// on a later sweep.
    #[error(transparent)]
    NotKnown(#[from] LookupError),

    /// A curve operation failed in a way that is not recoverable by
    /// postponement.
    #[error(transparent)]
    Curve(#[from] CurveError),

    /// The pipeline configuration of a node is inconsistent.
    #[error("invalid pipeline configuration at node {node}: {message}")]
    Configuration { node: usize, message: String },

    /// No schedulable node remains although the analysis is unfinished.
    #[error("no node ready for computation; the dependency graph may need more cuts")]
    NoNodeReady,

    /// Every ready node requested postponement in one sweep.
    #[error(
        "all ready nodes postponed their computation waiting for upstream curves \
         (cyclic dependencies may need more cuts): {nodes:?}"
    )]
    AllPostponed { nodes: Vec<usize> },

    /// An internal partition stopped being a partition of the flow states.
    #[error("invalid flow-state partition at node {node}")]
    InvalidPartition { node: usize },
}

/// Selection of flows a step applies to.
#[derive(Debug, Clone, Default)]
pub enum FlowSelection {
    /// All flows crossing the node.
    #[default]
    All,
    /// Only the listed flows.
    Flows(HashSet<FlowId>),
}

impl FlowSelection {
    pub fn contains(&self, flow: FlowId) -> bool {
        match self {
            FlowSelection::All => true,
            FlowSelection::Flows(set) => set.contains(&flow),
        }
    }
}

/// A regulator (or packet-ordering) group: a set of flows re-shaped to the
/// arrival curves they had at a common reference point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegulatorGroup {
    pub flows: BTreeSet<FlowId>,
    pub reference: RefPoint,
}

impl RegulatorGroup {
    /// A per-flow regulator processes exactly one flow.
    pub fn is_per_flow(&self) -> bool {
        self.flows.len() <= 1
    }
}

/// Clock-adaptation method for regulators under imperfect clocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdaptationMode {
    None,
    /// Rate-and-burst cascade worsening.
    Cascade,
    /// ADAM: inflate the source rate by a margin.
    Adam { margin: f64 },
}

impl Default for AdaptationMode {
    fn default() -> Self {
        AdaptationMode::None
    }
}

/// Install-time configuration of one node's pipelines.
#[derive(Debug, Clone)]
pub struct NodeSetup {
    /// Technology tokens (IS, PK, MOH, CEIL, PROP, TDMI, PD, ...).
    pub technology: BTreeSet<String>,
    /// Packet-elimination function configuration.
    pub packet_elimination: Option<FlowSelection>,
    /// Regulator groups (interleaved when a group has several flows).
    pub regulator_groups: Vec<RegulatorGroup>,
    /// Packet-ordering function groups.
    pub pof_groups: Vec<RegulatorGroup>,
    /// Flows tagged with this node as a delay reference point.
    pub tag_reference: Option<FlowSelection>,
    /// Constant link propagation delay added to min and max uniformly.
    pub prop_delay: Option<f64>,
    /// Ceil bursts and round the source delay bound up (fix-point mode).
    pub ceil_bursts: bool,
    /// Start the aggregate from the infinite curve instead of the sum.
    pub start_from_infinite: bool,
    /// Decimal places for the fix-point delay rounding.
    pub delay_decimals: u32,
    /// Regulator clock-adaptation mode.
    pub adaptation: AdaptationMode,
}

impl Default for NodeSetup {
    fn default() -> Self {
        Self {
            technology: BTreeSet::new(),
            packet_elimination: None,
            regulator_groups: Vec::new(),
            pof_groups: Vec::new(),
            tag_reference: None,
            prop_delay: None,
            ceil_bursts: false,
            start_from_infinite: false,
            delay_decimals: 15,
            adaptation: AdaptationMode::None,
        }
    }
}

impl NodeSetup {
    pub fn has_tech(&self, token: &str) -> bool {
        self.technology.contains(token)
    }

    pub fn with_tech(mut self, token: &str) -> Self {
        self.technology.insert(token.to_string());
        self
    }
}

/// Configuration of one analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub clock: ClockModel,
    pub default_setup: NodeSetup,
    pub node_setups: HashMap<ServerId, NodeSetup>,
    /// Process independent ready nodes on worker threads.
    pub parallel: bool,
    pub cyclic: CyclicConfig,
}

impl AnalysisConfig {
    /// Plain total flow analysis: FIFO contention, from-source output
    /// computation, no input shaping.
    pub fn tfa() -> Self {
        Self::default()
    }

    /// TFA with input-port shaping (the link capacities bound the incoming
    /// aggregates).
    pub fn tfa_pp() -> Self {
        Self {
            default_setup: NodeSetup::default().with_tech("IS"),
            ..Self::default()
        }
    }

    pub fn setup_for(&self, node: ServerId) -> &NodeSetup {
        self.node_setups.get(&node).unwrap_or(&self.default_setup)
    }

    pub fn setup_for_mut(&mut self, node: ServerId) -> &mut NodeSetup {
        self.node_setups
            .entry(node)
            .or_insert_with(|| self.default_setup.clone())
    }
}

/// Pending curve registrations produced while a node computes; applied to
/// the shared registry once the node's sweep is over, so that parallel
/// sweeps never write concurrently.
pub type RegistryUpdates = Vec<(FlowId, RefPoint, Curve)>;

/// Resolve the arrival curve of `flow` at a reference point.
///
/// The source point reads the flow model; a regulator point reads the
/// registry; a node point sums the flow states on the flow's outgoing edges
/// of that node. Missing entries surface as [`LookupError`] and translate
/// into postponement.
pub fn arrival_curve_at(
    flow: FlowId,
    reference: RefPoint,
    network: &Network,
    flow_graphs: &HashMap<FlowId, FlowGraph>,
    comp: &feed_forward::ComputationState,
    pending: &RegistryUpdates,
) -> Result<Curve, XtfaError> {
    if let Some((_, _, curve)) = pending
        .iter()
        .find(|(f, r, _)| *f == flow && *r == reference)
    {
        return Ok(curve.clone());
    }
    match reference {
        RefPoint::Source => Ok(network.flow(flow).arrival.clone()),
        RefPoint::Regulator(_) => Ok(comp.registry.lookup(flow, reference)?.clone()),
        RefPoint::Node(node) => {
            let graph = flow_graphs.get(&flow).expect("flow graph built");
            // all outgoing edges of the port carry the same curve, take the
            // first one
            let edge = graph.out_edges(node).into_iter().next().ok_or_else(|| {
                LookupError::CurveNotKnown {
                    flow: flow.value(),
                    reference: reference.to_string(),
                }
            })?;
            let states = comp.edge_states.get(&edge).ok_or_else(|| {
                LookupError::CurveNotKnown {
                    flow: flow.value(),
                    reference: reference.to_string(),
                }
            })?;
            let mut curve = Curve::None;
            let mut found = false;
            for fs in states.iter().filter(|fs| fs.flow == flow) {
                curve = curve.add(&fs.arrival)?;
                found = true;
            }
            if !found {
                return Err(LookupError::CurveNotKnown {
                    flow: flow.value(),
                    reference: reference.to_string(),
                }
                .into());
            }
            Ok(curve)
        }
    }
}

/// Build the per-flow observation graphs of a network.
pub fn build_flow_graphs(network: &Network) -> HashMap<FlowId, FlowGraph> {
    network
        .flows()
        .iter()
        .map(|flow| (flow.id, FlowGraph::of_flow(flow)))
        .collect()
}

/// The local clock of a node.
pub fn node_clock(node: ServerId) -> Clock {
    Clock::new(format!("H-{}", node.value()))
}
