//! Flow-state pipeline (FSP).
//!
//! Once the node's delay bounds are known, this pipeline updates each
//! outgoing flow state: merges duplicates the ACP left apart, recomputes the
//! output arrival curve (by local propagation or from the last fresh
//! reference), books the suffered delay, tags reference points and applies
//! the fix-point rounding.

use std::collections::HashMap;

use saihu_core::{
    ClockModel, Curve, FlowGraph, FlowId, FlowState, Network, RefPoint, ServerId,
};

use super::feed_forward::ComputationState;
use super::merge::merge_states;
use super::{arrival_curve_at, FlowSelection, NodeSetup, RegistryUpdates, XtfaError};

/// Context threaded through the FSP steps of one node.
pub struct FspContext<'a> {
    pub node: ServerId,
    pub network: &'a Network,
    pub flow_graphs: &'a HashMap<FlowId, FlowGraph>,
    pub clock: &'a ClockModel,
    pub comp: &'a ComputationState,
    pub pending: &'a RegistryUpdates,
    pub states: Vec<FlowState>,
    pub min_delay: f64,
    pub max_delay: f64,
}

impl<'a> FspContext<'a> {
    fn curve_at(&self, flow: FlowId, reference: RefPoint) -> Result<Curve, XtfaError> {
        arrival_curve_at(
            flow,
            reference,
            self.network,
            self.flow_graphs,
            self.comp,
            self.pending,
        )
    }
}

/// A computational block of the flow-state pipeline.
pub trait FspStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError>;
}

/// Merge the duplicate states of flows crossing a packet-elimination
/// function, when the ACP did not already force the merge (no regulator on
/// this node).
pub struct PefStateMerging {
    selection: FlowSelection,
}

impl PefStateMerging {
    pub fn check_install(setup: &NodeSetup, net: &Network, node: ServerId) -> bool {
        if super::acp::ForceMergeAfterPef::check_install(setup, net, node) {
            return false;
        }
        if !(setup.has_tech("PE") || setup.has_tech("SPE")) {
            return false;
        }
        setup.packet_elimination.is_some()
    }

    pub fn build(setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self {
            selection: setup.packet_elimination.clone().unwrap_or_default(),
        }
    }
}

impl FspStep for PefStateMerging {
    fn name(&self) -> &'static str {
        "pef-state-merging"
    }

    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError> {
        let mut counts: HashMap<FlowId, usize> = HashMap::new();
        for fs in &cx.states {
            *counts.entry(fs.flow).or_default() += 1;
        }
        let mut flows: Vec<FlowId> = counts
            .into_iter()
            .filter(|(flow, count)| *count > 1 && self.selection.contains(*flow))
            .map(|(flow, _)| flow)
            .collect();
        flows.sort();
        for flow in flows {
            let duplicates: Vec<&FlowState> =
                cx.states.iter().filter(|fs| fs.flow == flow).collect();
            let reference_clock = duplicates[0].clock.clone();
            for fs in &duplicates {
                if !fs.clock.equals(&reference_clock, cx.clock) {
                    return Err(XtfaError::Configuration {
                        node: cx.node.value(),
                        message: format!(
                            "duplicate states of flow #{} observed with different clocks",
                            flow.value()
                        ),
                    });
                }
            }
            let merged = merge_states(
                flow,
                cx.node,
                &duplicates,
                cx.network,
                cx.flow_graphs,
                cx.comp,
                cx.pending,
            )?;
            cx.states.retain(|fs| fs.flow != flow);
            cx.states.push(merged);
        }
        Ok(())
    }
}

/// Propagation-mode output curve: the input curve deconvolved by the jitter
/// of this node.
pub struct DeltaDDeconvolution;

impl DeltaDDeconvolution {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        setup.has_tech("PROP")
    }

    pub fn build(_setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self
    }
}

impl FspStep for DeltaDDeconvolution {
    fn name(&self) -> &'static str {
        "delta-d-deconvolution"
    }

    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError> {
        let jitter = Curve::BoundedDelay(cx.max_delay - cx.min_delay);
        for fs in &mut cx.states {
            fs.add_suffered_delay(cx.min_delay, cx.max_delay, true);
            fs.arrival = fs.arrival.deconv(&jitter)?;
        }
        Ok(())
    }
}

/// Default output curve: re-derive from the last fresh reference (the most
/// recent regulator, or the source) deconvolved by the jitter accumulated
/// since. Tighter than local propagation because jitter does not compound.
pub struct FromSourceDeltaDDeconvolution;

impl FromSourceDeltaDDeconvolution {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        !setup.has_tech("PROP")
    }

    pub fn build(_setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self
    }
}

impl FspStep for FromSourceDeltaDDeconvolution {
    fn name(&self) -> &'static str {
        "from-source-deconvolution"
    }

    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError> {
        let (min_delay, max_delay) = (cx.min_delay, cx.max_delay);
        for i in 0..cx.states.len() {
            cx.states[i].add_suffered_delay(min_delay, max_delay, true);
            let fs = &cx.states[i];
            let last_fresh = fs.flags.last_fresh.unwrap_or(RefPoint::Source);
            let fresh = cx.curve_at(fs.flow, last_fresh)?;
            // bounds are stated in TAI
            let fresh = cx.clock.worsen_arrival_curve(&fresh);
            let jitter =
                fs.max_delay_from[&last_fresh] - fs.min_delay_from[&last_fresh];
            cx.states[i].arrival = fresh.deconv(&Curve::BoundedDelay(jitter))?;
        }
        Ok(())
    }
}

/// Tag this node as a reference point of the outgoing states, so that
/// downstream blocks can measure delays from its output.
pub struct ReferenceTagging {
    selection: FlowSelection,
}

impl ReferenceTagging {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        setup.tag_reference.is_some()
    }

    pub fn build(setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self {
            selection: setup.tag_reference.clone().unwrap_or_default(),
        }
    }
}

impl FspStep for ReferenceTagging {
    fn name(&self) -> &'static str {
        "reference-tagging"
    }

    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError> {
        let reference = RefPoint::Node(cx.node);
        for fs in &mut cx.states {
            if self.selection.contains(fs.flow) {
                fs.add_delay_entry(reference);
                fs.add_rto_entry(reference);
            }
        }
        Ok(())
    }
}

/// Minimum transmission time of a packet on the output link: adds
/// `l_min / c` to the minimum delays only.
pub struct TransmissionDelayMin {
    link_speed: f64,
}

impl TransmissionDelayMin {
    pub fn check_install(setup: &NodeSetup, net: &Network, node: ServerId) -> bool {
        setup.has_tech("TDMI") && net.server(node).capacity.value() > 0.0
    }

    pub fn build(_setup: &NodeSetup, net: &Network, node: ServerId) -> Self {
        Self {
            link_speed: net.server(node).capacity.value(),
        }
    }
}

impl FspStep for TransmissionDelayMin {
    fn name(&self) -> &'static str {
        "transmission-delay-min"
    }

    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError> {
        for fs in &mut cx.states {
            let dmin = cx.network.flow(fs.flow).min_packet_length / self.link_speed;
            fs.add_delays_without_rto(dmin, 0.0);
        }
        Ok(())
    }
}

/// Constant link propagation delay: min and max grow uniformly, so no
/// jitter and no curve change.
pub struct ConstantPropagationDelay {
    delay: f64,
}

impl ConstantPropagationDelay {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        setup.has_tech("PD") && setup.prop_delay.is_some()
    }

    pub fn build(setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self {
            delay: setup.prop_delay.unwrap_or(0.0),
        }
    }
}

impl FspStep for ConstantPropagationDelay {
    fn name(&self) -> &'static str {
        "constant-propagation-delay"
    }

    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError> {
        for fs in &mut cx.states {
            fs.add_suffered_delay(self.delay, self.delay, true);
        }
        Ok(())
    }
}

/// Fix-point rounding: bursts are ceiled to the next integer and the
/// source delay bound is rounded up at a fixed number of decimals, so that
/// the cyclic driver can reach a true numeric fix point.
pub struct CeilBursts {
    delay_decimals: u32,
}

impl CeilBursts {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        setup.ceil_bursts || setup.has_tech("CEIL")
    }

    pub fn build(setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self {
            delay_decimals: setup.delay_decimals,
        }
    }

    fn round_up(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return value;
        }
        let factor = 10f64.powi(self.delay_decimals as i32);
        let rounded = (value * factor).round() / factor;
        if rounded == value {
            value
        } else {
            (value * factor).ceil() / factor
        }
    }
}

impl FspStep for CeilBursts {
    fn name(&self) -> &'static str {
        "ceil-bursts"
    }

    fn execute(&self, cx: &mut FspContext<'_>) -> Result<(), XtfaError> {
        for fs in &mut cx.states {
            fs.arrival.ceil_bursts();
            // only the source bound acts as a convergence variable
            if let Some(value) = fs.max_delay_from.get_mut(&RefPoint::Source) {
                *value = self.round_up(*value);
            }
        }
        Ok(())
    }
}

/// The ordered flow-state pipeline of one node.
pub struct FspPipeline {
    node: ServerId,
    steps: Vec<Box<dyn FspStep>>,
}

impl FspPipeline {
    pub fn auto_install(
        setup: &NodeSetup,
        network: &Network,
        node: ServerId,
    ) -> Result<Self, XtfaError> {
        let mut steps: Vec<Box<dyn FspStep>> = Vec::new();
        if PefStateMerging::check_install(setup, network, node) {
            steps.push(Box::new(PefStateMerging::build(setup, network, node)));
        }
        if DeltaDDeconvolution::check_install(setup, network, node) {
            steps.push(Box::new(DeltaDDeconvolution::build(setup, network, node)));
        }
        if FromSourceDeltaDDeconvolution::check_install(setup, network, node) {
            steps.push(Box::new(FromSourceDeltaDDeconvolution::build(
                setup, network, node,
            )));
        }
        if ReferenceTagging::check_install(setup, network, node) {
            steps.push(Box::new(ReferenceTagging::build(setup, network, node)));
        }
        if TransmissionDelayMin::check_install(setup, network, node) {
            steps.push(Box::new(TransmissionDelayMin::build(setup, network, node)));
        }
        if ConstantPropagationDelay::check_install(setup, network, node) {
            steps.push(Box::new(ConstantPropagationDelay::build(setup, network, node)));
        }
        if CeilBursts::check_install(setup, network, node) {
            steps.push(Box::new(CeilBursts::build(setup, network, node)));
        }
        Ok(Self { node, steps })
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn process<'a>(
        &self,
        states: Vec<FlowState>,
        min_delay: f64,
        max_delay: f64,
        network: &'a Network,
        flow_graphs: &'a HashMap<FlowId, FlowGraph>,
        clock: &'a ClockModel,
        comp: &'a ComputationState,
        pending: &'a RegistryUpdates,
    ) -> Result<Vec<FlowState>, XtfaError> {
        let mut cx = FspContext {
            node: self.node,
            network,
            flow_graphs,
            clock,
            comp,
            pending,
            states,
            min_delay,
            max_delay,
        };
        for step in &self.steps {
            step.execute(&mut cx)?;
        }
        Ok(cx.states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_rounding() {
        let step = CeilBursts { delay_decimals: 3 };
        assert_eq!(step.round_up(1.23456), 1.235);
        assert_eq!(step.round_up(1.235), 1.235);
        assert!(step.round_up(f64::INFINITY).is_infinite());
    }
}
