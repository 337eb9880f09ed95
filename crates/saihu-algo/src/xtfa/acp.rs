//! Aggregate-computation pipeline (ACP).
//!
//! Turns the multiset of flow states arriving at a node into the arrival
//! curve of the aggregate entering the queuing subsystem. Steps are
//! installed per node from its [`NodeSetup`]; each step may modify the flow
//! states and group them into shaped partitions. The final aggregate is the
//! plain sum of the states convolved with every partition's resulting
//! curve.

use std::collections::HashMap;

use tracing::debug;

use saihu_core::{
    Clock, ClockModel, Curve, FlowGraph, FlowId, FlowState, GraphEdge, Network, RefPoint, ServerId,
};

use super::feed_forward::ComputationState;
use super::merge::merge_states;
use super::partition::{Partition, PartitionElement, StateId, StateList};
use super::{
    arrival_curve_at, node_clock, AdaptationMode, FlowSelection, NodeSetup, RegistryUpdates,
    RegulatorGroup, XtfaError,
};

/// Mutable context threaded through the ACP steps of one node.
pub struct AcpContext<'a> {
    pub node: ServerId,
    pub network: &'a Network,
    pub flow_graphs: &'a HashMap<FlowId, FlowGraph>,
    pub clock: &'a ClockModel,
    pub comp: &'a ComputationState,
    /// Curve registrations buffered until the sweep completes.
    pub pending: RegistryUpdates,
    pub states: StateList,
    pub partitions: Vec<Partition>,
}

impl<'a> AcpContext<'a> {
    fn check_partitions(&self) -> Result<(), XtfaError> {
        for partition in &self.partitions {
            if !partition.is_partition_of(&self.states) {
                return Err(XtfaError::InvalidPartition {
                    node: self.node.value(),
                });
            }
        }
        Ok(())
    }

    fn curve_at(&self, flow: FlowId, reference: RefPoint) -> Result<Curve, XtfaError> {
        arrival_curve_at(
            flow,
            reference,
            self.network,
            self.flow_graphs,
            self.comp,
            &self.pending,
        )
    }

    /// Ids of the duplicated flows: flows with more than one state, filtered
    /// by a selection.
    fn flows_to_merge(&self, selection: &FlowSelection) -> Vec<FlowId> {
        let mut counts: HashMap<FlowId, usize> = HashMap::new();
        for slot in self.states.iter() {
            *counts.entry(slot.state.flow).or_default() += 1;
        }
        let mut flows: Vec<FlowId> = counts
            .into_iter()
            .filter(|(flow, count)| *count > 1 && selection.contains(*flow))
            .map(|(flow, _)| flow)
            .collect();
        flows.sort();
        flows
    }

    fn states_of_flow(&self, flow: FlowId) -> Vec<StateId> {
        self.states
            .iter()
            .filter(|slot| slot.state.flow == flow)
            .map(|slot| slot.id)
            .collect()
    }
}

/// A computational block of the aggregate pipeline.
pub trait AcpStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError>;
}

/// Always the first block (unless the aggregate starts from the infinite
/// curve): groups the states per input edge, each group shaped by the sum of
/// its own arrival curves. Later blocks refine these elements in place.
pub struct InitialPerInputPortAggregator;

impl InitialPerInputPortAggregator {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        !setup.start_from_infinite
    }

    pub fn build(_setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self
    }
}

impl AcpStep for InitialPerInputPortAggregator {
    fn name(&self) -> &'static str {
        "initial-per-input-port"
    }

    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError> {
        let mut by_edge: Vec<(saihu_core::AtEdge, Vec<StateId>)> = Vec::new();
        for slot in cx.states.iter() {
            match by_edge.iter_mut().find(|(edge, _)| *edge == slot.state.at_edge) {
                Some((_, members)) => members.push(slot.id),
                None => by_edge.push((slot.state.at_edge, vec![slot.id])),
            }
        }
        let mut partition = Partition::new("per-input-port");
        for (_, members) in by_edge {
            let mut shaping = Curve::None;
            for id in &members {
                if let Some(fs) = cx.states.get(*id) {
                    shaping = shaping.add(&fs.aggregate_arrival())?;
                }
            }
            partition.push_element(PartitionElement {
                members,
                shaping: Some(shaping),
                from_ancestor_deconvolution: false,
            });
        }
        cx.partitions.push(partition);
        cx.check_partitions()
    }
}

/// Input line shaping: the aggregate arriving through a link can never
/// exceed the link capacity. One partition element per input edge, shaped by
/// `LB(c, 0)`; when a packetizer sits on the port the shaping curve is
/// worsened by the packetization penalty of the element.
pub struct InputPortShaping {
    shaping: HashMap<GraphEdge, Option<Curve>>,
    link_speed: HashMap<GraphEdge, f64>,
    packetizer: bool,
}

impl InputPortShaping {
    pub fn check_install(setup: &NodeSetup, net: &Network, node: ServerId) -> bool {
        if net.predecessors(node).is_empty() {
            return false;
        }
        if setup.has_tech("IS") {
            return true;
        }
        if setup.packet_elimination.is_some() {
            return false;
        }
        setup.has_tech("ISNPE")
    }

    pub fn build(setup: &NodeSetup, net: &Network, node: ServerId) -> Self {
        let mut shaping = HashMap::new();
        let mut link_speed = HashMap::new();
        for pred in net.predecessors(node) {
            let edge = (*pred, node);
            let capacity = net.server(*pred).capacity.value();
            if capacity > 0.0 {
                shaping.insert(edge, Some(Curve::leaky_bucket(capacity, 0.0)));
                link_speed.insert(edge, capacity);
            } else {
                shaping.insert(edge, None);
            }
        }
        Self {
            shaping,
            link_speed,
            packetizer: setup.has_tech("PK"),
        }
    }
}

impl AcpStep for InputPortShaping {
    fn name(&self) -> &'static str {
        "input-port-shaping"
    }

    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError> {
        let mut by_edge: Vec<(saihu_core::AtEdge, Vec<StateId>)> = Vec::new();
        for slot in cx.states.iter() {
            match by_edge.iter_mut().find(|(edge, _)| *edge == slot.state.at_edge) {
                Some((_, members)) => members.push(slot.id),
                None => by_edge.push((slot.state.at_edge, vec![slot.id])),
            }
        }
        let mut partition = Partition::new("input-shaping");
        for (edge, members) in by_edge {
            let shaping = match edge {
                saihu_core::AtEdge::Edge(a, b) => {
                    self.shaping.get(&(a, b)).cloned().flatten()
                }
                saihu_core::AtEdge::Source => None,
            };
            partition.push_element(PartitionElement {
                members,
                shaping,
                from_ancestor_deconvolution: false,
            });
        }
        if self.packetizer {
            // The packetizer worsens the shaping curve only: bursts obtained
            // through delay deconvolutions are unaffected because the
            // packetizer does not increase the worst-case delay.
            let link_speed = &self.link_speed;
            let states = &cx.states;
            partition.add_packetization_effect(states, cx.network, |element| {
                element
                    .members
                    .first()
                    .and_then(|id| states.get(*id))
                    .and_then(|fs| match fs.at_edge {
                        saihu_core::AtEdge::Edge(a, b) => link_speed.get(&(a, b)).copied(),
                        saihu_core::AtEdge::Source => None,
                    })
            })?;
        }
        cx.partitions.push(partition);
        cx.check_partitions()
    }
}

/// Flows generated by applications local to this node enter the pipeline
/// here, observed in TAI.
pub struct LocalSourceApplications {
    prepared: Vec<FlowState>,
}

impl LocalSourceApplications {
    pub fn check_install(_setup: &NodeSetup, net: &Network, node: ServerId) -> bool {
        net.flows()
            .iter()
            .any(|flow| FlowGraph::of_flow(flow).sources().contains(&node))
    }

    pub fn build(
        _setup: &NodeSetup,
        net: &Network,
        node: ServerId,
        flow_graphs: &HashMap<FlowId, FlowGraph>,
        clock: &ClockModel,
    ) -> Self {
        let mut prepared = Vec::new();
        for flow in net.flows() {
            let graph = flow_graphs.get(&flow.id).expect("flow graph built");
            if !graph.sources().contains(&node) {
                continue;
            }
            let mut fs = FlowState::new(flow.id);
            fs.arrival = flow.arrival.clone();
            fs.clock = node_clock(node);
            fs.change_clock(Clock::tai(), clock);
            if !clock.perfect {
                if let Curve::LeakyBucket(lb) = &flow.arrival {
                    fs.flags.adam = Some(saihu_core::AdamData {
                        r2: clock.rho * lb.rate(),
                        b2: lb.burst() + clock.eta * lb.rate(),
                    });
                }
            }
            prepared.push(fs);
        }
        Self { prepared }
    }
}

impl AcpStep for LocalSourceApplications {
    fn name(&self) -> &'static str {
        "local-sources"
    }

    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError> {
        let mut new_ids = Vec::new();
        for fs in &self.prepared {
            new_ids.push(cx.states.push(fs.clone()));
        }
        // one unshaped element per partition groups the fresh states
        // (the internal stack can send as fast as the applications do)
        if cx.partitions.is_empty() {
            cx.partitions.push(Partition::new("local-sources"));
            cx.partitions[0].push_element(PartitionElement {
                members: new_ids,
                shaping: None,
                from_ancestor_deconvolution: false,
            });
        } else {
            for partition in &mut cx.partitions {
                partition.push_element(PartitionElement {
                    members: new_ids.clone(),
                    shaping: None,
                    from_ancestor_deconvolution: false,
                });
            }
        }
        cx.check_partitions()
    }
}

/// Packet-elimination function: duplicates of a flow merge into one stream
/// whose envelope is the arrival curve at the duplication ancestor,
/// deconvolved by the jitter accumulated since. The existing partitions stay
/// valid (elimination only removes packets); each gains a copy where the
/// duplicate states are grouped under the ancestor envelope.
pub struct PacketEliminationFunction {
    selection: FlowSelection,
}

impl PacketEliminationFunction {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        if !setup.has_tech("PE") || setup.has_tech("SPE") {
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

impl AcpStep for PacketEliminationFunction {
    fn name(&self) -> &'static str {
        "packet-elimination"
    }

    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError> {
        let flows = cx.flows_to_merge(&self.selection);
        if flows.is_empty() {
            return Ok(());
        }
        let mut added = Vec::new();
        for partition in cx.partitions.clone() {
            let mut refined = partition.clone();
            refined.name = format!("{}+packet-elimination", refined.name);
            for flow in &flows {
                let ids = cx.states_of_flow(*flow);
                let states: Vec<&FlowState> =
                    ids.iter().filter_map(|id| cx.states.get(*id)).collect();
                let references = super::merge::common_references(&states);
                let mut shaping = Curve::Infinite;
                for reference in &references {
                    let curve_at = cx.curve_at(*flow, *reference)?;
                    let dmin = states
                        .iter()
                        .filter_map(|fs| fs.min_delay_from.get(reference))
                        .fold(f64::INFINITY, |a, b| a.min(*b));
                    let dmax = states
                        .iter()
                        .filter_map(|fs| fs.max_delay_from.get(reference))
                        .fold(0.0f64, |a, b| a.max(*b));
                    shaping =
                        shaping.conv(&curve_at.deconv(&Curve::BoundedDelay(dmax - dmin))?)?;
                }
                for id in &ids {
                    refined.remove_state(*id);
                }
                refined.push_element(PartitionElement {
                    members: ids,
                    shaping: Some(shaping),
                    from_ancestor_deconvolution: true,
                });
            }
            added.push(refined);
        }
        cx.partitions.extend(added);
        cx.check_partitions()
    }
}

/// Forced merge of duplicate flow states before a regulator: the regulator
/// recreates the flow from fresh, so the separate states are collapsed into
/// one (dictionaries merged, reordering penalty charged before the split).
pub struct ForceMergeAfterPef {
    selection: FlowSelection,
}

impl ForceMergeAfterPef {
    pub fn check_install(setup: &NodeSetup, net: &Network, node: ServerId) -> bool {
        PacketEliminationFunction::check_install(setup, net, node)
            && Regulator::check_install(setup, net, node)
    }

    pub fn build(setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self {
            selection: setup.packet_elimination.clone().unwrap_or_default(),
        }
    }
}

impl AcpStep for ForceMergeAfterPef {
    fn name(&self) -> &'static str {
        "force-merge-after-pef"
    }

    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError> {
        for flow in cx.flows_to_merge(&self.selection) {
            let ids = cx.states_of_flow(flow);
            let states: Vec<&FlowState> = ids.iter().filter_map(|id| cx.states.get(*id)).collect();
            let reference_clock = states[0].clock.clone();
            for fs in &states {
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
                &states,
                cx.network,
                cx.flow_graphs,
                cx.comp,
                &cx.pending,
            )?;
            for id in &ids {
                for partition in &mut cx.partitions {
                    partition.remove_state(*id);
                }
                cx.states.remove(*id);
            }
            let new_id = cx.states.push(merged);
            for partition in &mut cx.partitions {
                partition.push_element(PartitionElement {
                    members: vec![new_id],
                    shaping: None,
                    from_ancestor_deconvolution: false,
                });
            }
        }
        cx.check_partitions()
    }
}

/// Packet-ordering function: each group is re-ordered to the order it had at
/// its reference point. The aggregate pays nothing, each member pays the
/// difference to the worst member; arrival curves are re-created from the
/// reference worsened by the aggregate jitter, and the members become a
/// shaped element in every partition.
pub struct PacketOrderingFunction {
    groups: Vec<RegulatorGroup>,
}

impl PacketOrderingFunction {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        setup.has_tech("POF") && !setup.pof_groups.is_empty()
    }

    pub fn build(setup: &NodeSetup, _net: &Network, _node: ServerId) -> Self {
        Self {
            groups: setup.pof_groups.clone(),
        }
    }
}

impl AcpStep for PacketOrderingFunction {
    fn name(&self) -> &'static str {
        "packet-ordering"
    }

    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError> {
        for group in &self.groups {
            let member_ids: Vec<StateId> = cx
                .states
                .iter()
                .filter(|slot| group.flows.contains(&slot.state.flow))
                .map(|slot| slot.id)
                .collect();
            if member_ids.is_empty() {
                continue;
            }
            // aggregate bounds and curve at the reference
            let mut dmin_agg = 0.0f64;
            let mut dmax_agg = f64::NEG_INFINITY;
            let mut curve_at_ref = Curve::None;
            for id in &member_ids {
                let fs = cx.states.get(*id).expect("member listed");
                let reference = group.reference;
                let (Some(min), Some(max)) = (
                    fs.min_delay_from.get(&reference),
                    fs.max_delay_from.get(&reference),
                ) else {
                    return Err(saihu_core::LookupError::CurveNotKnown {
                        flow: fs.flow.value(),
                        reference: reference.to_string(),
                    }
                    .into());
                };
                dmin_agg = dmin_agg.min(*min);
                dmax_agg = dmax_agg.max(*max);
                let flow = fs.flow;
                curve_at_ref = curve_at_ref.add(&cx.curve_at(flow, reference)?)?;
            }
            let aggregate_jitter = dmax_agg - dmin_agg;

            for id in &member_ids {
                let flow = cx.states.get(*id).expect("member listed").flow;
                let fresh = cx
                    .curve_at(flow, group.reference)?
                    .deconv(&Curve::BoundedDelay(aggregate_jitter))?;
                let fs = cx.states.get_mut(*id).expect("member listed");
                fs.arrival = fresh;
                // reordering is free for the aggregate but each member
                // suffers the gap to the worst member
                let own_max = fs.max_delay_from[&group.reference];
                fs.add_suffered_delay(0.0, dmax_agg - own_max, true);
                // the flow leaves in order: reordering offset resets
                fs.rto_from.insert(group.reference, 0.0);
            }

            let shaping = curve_at_ref.deconv(&Curve::BoundedDelay(aggregate_jitter))?;
            for partition in &mut cx.partitions {
                for id in &member_ids {
                    partition.remove_state(*id);
                }
                partition.push_element(PartitionElement {
                    members: member_ids.clone(),
                    shaping: Some(shaping.clone()),
                    from_ancestor_deconvolution: false,
                });
                partition.name += "+pof";
            }
        }
        cx.check_partitions()
    }
}

/// Traffic regulators (per-flow or interleaved): each member's arrival curve
/// is overwritten with the curve it had at the reference point, its RTO from
/// the reference resets, and its clock round-trips through the local node
/// back to TAI. Interleaved groups pay the worst member delay; under
/// imperfect clocks the configured adaptation inflates rate and burst.
pub struct Regulator {
    node: ServerId,
    groups: Vec<RegulatorGroup>,
    pof_present_before: bool,
    adaptation: AdaptationMode,
}

impl Regulator {
    pub fn check_install(setup: &NodeSetup, _net: &Network, _node: ServerId) -> bool {
        setup.has_tech("REG") && !setup.regulator_groups.is_empty()
    }

    pub fn build(setup: &NodeSetup, _net: &Network, node: ServerId) -> Result<Self, XtfaError> {
        let pof_present_before = setup.has_tech("POF");
        if pof_present_before && setup.pof_groups != setup.regulator_groups {
            // a POF followed by a regulator must agree on groups and
            // references; anything else is rejected at configuration time
            return Err(XtfaError::Configuration {
                node: node.value(),
                message: "packet-ordering and regulator configurations disagree".into(),
            });
        }
        Ok(Self {
            node,
            groups: setup.regulator_groups.clone(),
            pof_present_before,
            adaptation: setup.adaptation,
        })
    }

    fn adaptation_required(&self, node: usize, is_pfr: bool) -> Result<(), XtfaError> {
        match self.adaptation {
            AdaptationMode::Cascade => Ok(()),
            AdaptationMode::Adam { .. } if is_pfr => Ok(()),
            AdaptationMode::Adam { .. } => Err(XtfaError::Configuration {
                node,
                message: "ADAM cannot adapt an interleaved regulator".into(),
            }),
            AdaptationMode::None => Err(XtfaError::Configuration {
                node,
                message: "a regulator clock-adaptation method is required with imperfect clocks"
                    .into(),
            }),
        }
    }
}

impl AcpStep for Regulator {
    fn name(&self) -> &'static str {
        "regulator"
    }

    fn execute(&self, cx: &mut AcpContext<'_>) -> Result<(), XtfaError> {
        for group in &self.groups {
            let is_pfr = group.is_per_flow();
            let reference = group.reference;
            let member_ids: Vec<StateId> = cx
                .states
                .iter()
                .filter(|slot| group.flows.contains(&slot.state.flow))
                .map(|slot| slot.id)
                .collect();
            if member_ids.is_empty() {
                continue;
            }
            // group-wide worst delay from the reference, for the interleaved
            // aggregation penalty
            let mut group_dmax = f64::NEG_INFINITY;
            for id in &member_ids {
                let fs = cx.states.get(*id).expect("member listed");
                let Some(max) = fs.max_delay_from.get(&reference) else {
                    return Err(saihu_core::LookupError::CurveNotKnown {
                        flow: fs.flow.value(),
                        reference: reference.to_string(),
                    }
                    .into());
                };
                group_dmax = group_dmax.max(*max);
            }

            for id in &member_ids {
                let (flow, dmin, dmax, rto) = {
                    let fs = cx.states.get(*id).expect("member listed");
                    (
                        fs.flow,
                        fs.min_delay_from[&reference],
                        fs.max_delay_from[&reference],
                        fs.rto_from.get(&reference).copied().unwrap_or(0.0),
                    )
                };

                if !cx.clock.perfect && (!cx.clock.sync || !is_pfr) {
                    self.adaptation_required(cx.node.value(), is_pfr)?;
                }
                if rto > 0.0 {
                    if !is_pfr && !self.pof_present_before {
                        return Err(XtfaError::Configuration {
                            node: cx.node.value(),
                            message:
                                "a packet-ordering function is required before an interleaved \
                                 regulator fed by a non-FIFO system"
                                    .into(),
                        });
                    }
                    if is_pfr && !self.pof_present_before {
                        // the regulator absorbs the reordering at the price
                        // of the jitter from the reference
                        cx.states
                            .get_mut(*id)
                            .expect("member listed")
                            .add_suffered_delay(0.0, dmax - dmin, true);
                    }
                }
                if !is_pfr {
                    let penalty = group_dmax - dmax;
                    cx.states
                        .get_mut(*id)
                        .expect("member listed")
                        .add_suffered_delay(0.0, penalty, true);
                }

                let mut curve = cx.curve_at(flow, reference)?;
                if !cx.clock.perfect {
                    if !matches!(self.adaptation, AdaptationMode::None) {
                        if let Curve::Gvbr(g) = &curve {
                            curve = Curve::LeakyBucket(*g.first_segment());
                        }
                    }
                    match self.adaptation {
                        AdaptationMode::Cascade => {
                            if let Curve::LeakyBucket(lb) = &curve {
                                curve = Curve::leaky_bucket(
                                    lb.rate() * cx.clock.rho,
                                    lb.burst() + cx.clock.eta * lb.rate(),
                                );
                            }
                        }
                        AdaptationMode::Adam { margin } => {
                            let source = cx.network.flow(flow).arrival.to_leaky_bucket_min_burst()?;
                            curve = Curve::leaky_bucket(source.rate() * margin, source.burst());
                        }
                        AdaptationMode::None => {}
                    }
                }

                cx.pending
                    .push((flow, RefPoint::Regulator(self.node), curve.clone()));

                let previous_fresh;
                {
                    let fs = cx.states.get_mut(*id).expect("member listed");
                    fs.arrival = curve;
                    fs.clock = node_clock(self.node);
                    fs.add_delay_entry(RefPoint::Regulator(self.node));
                    fs.add_rto_entry(RefPoint::Regulator(self.node));
                    previous_fresh = fs.flags.last_fresh.unwrap_or(RefPoint::Source);
                    fs.flags.last_fresh = Some(RefPoint::Regulator(self.node));
                    fs.change_clock(Clock::tai(), cx.clock);
                }

                if !cx.clock.perfect {
                    if is_pfr
                        && cx.clock.sync
                        && matches!(self.adaptation, AdaptationMode::None)
                    {
                        cx.states
                            .get_mut(*id)
                            .expect("member listed")
                            .add_suffered_delay(0.0, 4.0 * cx.clock.delta, true);
                    }
                    if let AdaptationMode::Adam { margin } = self.adaptation {
                        let source = cx.network.flow(flow).arrival.to_leaky_bucket_min_burst()?;
                        let (r0, b0) = (source.rate(), source.burst());
                        let fs = cx.states.get_mut(*id).expect("member listed");
                        let data = fs.flags.adam.unwrap_or(saihu_core::AdamData {
                            r2: r0 * cx.clock.rho,
                            b2: b0 + r0 * cx.clock.eta,
                        });
                        let penalty = cx.clock.eta * (1.0 + cx.clock.rho)
                            + ((data.b2 - b0 - cx.clock.eta * margin * r0) / (cx.clock.rho * r0))
                                * ((cx.clock.rho * cx.clock.rho - 1.0) / (margin - 1.0));
                        let jitter = fs.max_delay_from.get(&previous_fresh).copied().unwrap_or(0.0)
                            - fs.min_delay_from.get(&previous_fresh).copied().unwrap_or(0.0);
                        fs.flags.adam = Some(saihu_core::AdamData {
                            r2: data.r2,
                            b2: data.b2 + cx.clock.rho * r0 * jitter,
                        });
                        fs.add_suffered_delay(0.0, penalty, true);
                    }
                }

                // the re-shaped flow continues on its own: it leaves every
                // element it belonged to
                for partition in &mut cx.partitions {
                    partition.remove_state(*id);
                    partition.push_element(PartitionElement {
                        members: vec![*id],
                        shaping: None,
                        from_ancestor_deconvolution: false,
                    });
                }
            }
        }
        for partition in &mut cx.partitions {
            partition.name += "+regulator";
        }
        cx.check_partitions()
    }
}

/// The ordered aggregate pipeline of one node.
pub struct AcpPipeline {
    node: ServerId,
    steps: Vec<Box<dyn AcpStep>>,
    start_from_infinite: bool,
}

impl AcpPipeline {
    /// Install the steps applicable to this node, in pipeline order.
    pub fn auto_install(
        setup: &NodeSetup,
        network: &Network,
        flow_graphs: &HashMap<FlowId, FlowGraph>,
        clock: &ClockModel,
        node: ServerId,
    ) -> Result<Self, XtfaError> {
        let mut steps: Vec<Box<dyn AcpStep>> = Vec::new();
        if InitialPerInputPortAggregator::check_install(setup, network, node) {
            steps.push(Box::new(InitialPerInputPortAggregator::build(
                setup, network, node,
            )));
        }
        if InputPortShaping::check_install(setup, network, node) {
            steps.push(Box::new(InputPortShaping::build(setup, network, node)));
        }
        if LocalSourceApplications::check_install(setup, network, node) {
            steps.push(Box::new(LocalSourceApplications::build(
                setup,
                network,
                node,
                flow_graphs,
                clock,
            )));
        }
        if PacketEliminationFunction::check_install(setup, network, node) {
            steps.push(Box::new(PacketEliminationFunction::build(
                setup, network, node,
            )));
        }
        if ForceMergeAfterPef::check_install(setup, network, node) {
            steps.push(Box::new(ForceMergeAfterPef::build(setup, network, node)));
        }
        if PacketOrderingFunction::check_install(setup, network, node) {
            steps.push(Box::new(PacketOrderingFunction::build(setup, network, node)));
        }
        if Regulator::check_install(setup, network, node) {
            steps.push(Box::new(Regulator::build(setup, network, node)?));
        }
        Ok(Self {
            node,
            steps,
            start_from_infinite: setup.start_from_infinite,
        })
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run the pipeline over the incoming flow states. Returns the final
    /// aggregate curve, the flow states after the pipeline and the buffered
    /// registry updates.
    pub fn process<'a>(
        &self,
        input_states: Vec<FlowState>,
        network: &'a Network,
        flow_graphs: &'a HashMap<FlowId, FlowGraph>,
        clock: &'a ClockModel,
        comp: &'a ComputationState,
    ) -> Result<(Curve, Vec<FlowState>, RegistryUpdates), XtfaError> {
        let mut cx = AcpContext {
            node: self.node,
            network,
            flow_graphs,
            clock,
            comp,
            pending: Vec::new(),
            states: StateList::new(input_states),
            partitions: Vec::new(),
        };
        for step in &self.steps {
            step.execute(&mut cx)?;
            if !clock.perfect {
                for slot in cx.states.iter() {
                    if !slot.state.clock.is_tai {
                        return Err(XtfaError::Configuration {
                            node: self.node.value(),
                            message: format!(
                                "flow states must be observed in TAI after step {}",
                                step.name()
                            ),
                        });
                    }
                }
            }
        }

        let mut aggregate = if self.start_from_infinite {
            Curve::Infinite
        } else {
            let mut sum = Curve::None;
            for slot in cx.states.iter() {
                sum = sum.add(&slot.state.aggregate_arrival())?;
            }
            sum
        };
        for partition in &cx.partitions {
            aggregate = aggregate.conv(&partition.resulting_curve(&cx.states)?)?;
        }
        debug!(node = self.node.value(), %aggregate, "aggregate at contention");
        Ok((aggregate, cx.states.into_states(), cx.pending))
    }
}
