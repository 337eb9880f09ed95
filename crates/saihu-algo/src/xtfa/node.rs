//! Per-node model: the three pipelines and their intermediate results.

use std::collections::HashMap;

use saihu_core::{ClockModel, Curve, FlowGraph, FlowId, FlowState, Network, ServerId};

use super::acp::AcpPipeline;
use super::dbp::DbpPipeline;
use super::feed_forward::ComputationState;
use super::fsp::FspPipeline;
use super::{AnalysisConfig, RegistryUpdates, XtfaError};

/// Everything a node computation produces, applied by the driver once the
/// sweep completes.
#[derive(Debug)]
pub struct NodeOutcome {
    pub aggregate: Curve,
    pub min_delay: f64,
    pub max_delay: f64,
    pub output_states: Vec<FlowState>,
    pub registry_updates: RegistryUpdates,
}

/// A node of the flow-induced graph: three pipelines executed in order, plus
/// the flow states observed at its input.
pub struct NodeModel {
    pub node: ServerId,
    acp: AcpPipeline,
    dbp: DbpPipeline,
    fsp: FspPipeline,
    pub input_states: Vec<FlowState>,
    pub aggregate: Option<Curve>,
    pub delay_bounds: Option<(f64, f64)>,
    pub finished: bool,
}

impl NodeModel {
    /// Install the pipelines of this node from the analysis configuration.
    pub fn install(
        config: &AnalysisConfig,
        network: &Network,
        flow_graphs: &HashMap<FlowId, FlowGraph>,
        node: ServerId,
    ) -> Result<Self, XtfaError> {
        let setup = config.setup_for(node);
        Ok(Self {
            node,
            acp: AcpPipeline::auto_install(setup, network, flow_graphs, &config.clock, node)?,
            dbp: DbpPipeline::auto_install(setup, network, node)?,
            fsp: FspPipeline::auto_install(setup, network, node)?,
            input_states: Vec::new(),
            aggregate: None,
            delay_bounds: None,
            finished: false,
        })
    }

    pub fn add_incoming_state(&mut self, state: FlowState) {
        self.input_states.push(state);
    }

    /// Run the three pipelines. The shared computation state is only read;
    /// all writes are returned in the outcome.
    pub fn process(
        &self,
        network: &Network,
        flow_graphs: &HashMap<FlowId, FlowGraph>,
        clock: &ClockModel,
        comp: &ComputationState,
    ) -> Result<NodeOutcome, XtfaError> {
        let (aggregate, after_acp, registry_updates) = self.acp.process(
            self.input_states.clone(),
            network,
            flow_graphs,
            clock,
            comp,
        )?;
        let (min_delay, max_delay) =
            self.dbp.process(&after_acp, &aggregate, network, clock)?;
        let output_states = self.fsp.process(
            after_acp,
            min_delay,
            max_delay,
            network,
            flow_graphs,
            clock,
            comp,
            &registry_updates,
        )?;
        Ok(NodeOutcome {
            aggregate,
            min_delay,
            max_delay,
            output_states,
            registry_updates,
        })
    }

    /// Record an outcome on the node.
    pub fn finish(&mut self, outcome: &NodeOutcome) {
        self.aggregate = Some(outcome.aggregate.clone());
        self.delay_bounds = Some((outcome.min_delay, outcome.max_delay));
        self.finished = true;
    }

    /// Drop the intermediate results (between fix-point iterations, or after
    /// a postponed attempt).
    pub fn clear(&mut self) {
        self.input_states.clear();
        self.aggregate = None;
        self.delay_bounds = None;
        self.finished = false;
    }

    /// Names of the installed pipeline steps, for diagnostics.
    pub fn installed_steps(&self) -> (Vec<&'static str>, Vec<&'static str>, Vec<&'static str>) {
        (
            self.acp.step_names(),
            self.dbp.step_names(),
            self.fsp.step_names(),
        )
    }
}
