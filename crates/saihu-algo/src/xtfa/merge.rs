//! Merging of duplicated flow states after packet elimination.
//!
//! When the same flow reaches a node through several paths (seamless
//! redundancy), a packet-elimination function collapses the duplicates into
//! a single stream. The merged state takes the minimum of the minimum
//! delays, the maximum of the maximum delays and the maximum RTO per
//! reference, plus a non-FIFO reordering penalty bounded by the jitter from
//! the nearest common ancestor of the duplicate paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use saihu_core::{Curve, FlowGraph, FlowId, FlowState, Network, RefPoint, ServerId};

use super::feed_forward::ComputationState;
use super::{arrival_curve_at, RegistryUpdates, XtfaError};

/// The reference points common to every duplicate state.
pub fn common_references(states: &[&FlowState]) -> BTreeSet<RefPoint> {
    let mut keys: BTreeSet<RefPoint> = states
        .first()
        .map(|fs| fs.min_delay_from.keys().copied().collect())
        .unwrap_or_default();
    for fs in states.iter().skip(1) {
        keys = keys
            .intersection(&fs.min_delay_from.keys().copied().collect())
            .copied()
            .collect();
    }
    keys
}

/// Among the common references, the node reference closest (in hops) to the
/// merging node; regulator references are skipped, the source is the
/// fallback.
pub fn closest_ancestor(
    graph: &FlowGraph,
    node: ServerId,
    references: &BTreeSet<RefPoint>,
) -> RefPoint {
    let mut candidate = RefPoint::Source;
    let mut candidate_distance = usize::MAX;
    for reference in references {
        let RefPoint::Node(ref_node) = reference else {
            continue;
        };
        let Some(distance) = graph.distance(*ref_node, node) else {
            continue;
        };
        if distance < candidate_distance {
            candidate = *reference;
            candidate_distance = distance;
        }
    }
    candidate
}

/// Jitter of the duplicate states measured from `reference`.
pub fn jitter_from(states: &[&FlowState], reference: RefPoint) -> f64 {
    let min = states
        .iter()
        .filter_map(|fs| fs.min_delay_from.get(&reference))
        .fold(f64::INFINITY, |a, b| a.min(*b));
    let max = states
        .iter()
        .filter_map(|fs| fs.max_delay_from.get(&reference))
        .fold(f64::NEG_INFINITY, |a, b| a.max(*b));
    if min.is_finite() && max.is_finite() {
        max - min
    } else {
        0.0
    }
}

fn merged_delay_maps(
    states: &[&FlowState],
) -> (BTreeMap<RefPoint, f64>, BTreeMap<RefPoint, f64>, BTreeMap<RefPoint, f64>) {
    let mut min_map: BTreeMap<RefPoint, f64> = BTreeMap::new();
    let mut max_map: BTreeMap<RefPoint, f64> = BTreeMap::new();
    let mut rto_map: BTreeMap<RefPoint, f64> = BTreeMap::new();
    for fs in states {
        for (key, value) in &fs.min_delay_from {
            min_map
                .entry(*key)
                .and_modify(|v| *v = v.min(*value))
                .or_insert(*value);
        }
        for (key, value) in &fs.max_delay_from {
            max_map
                .entry(*key)
                .and_modify(|v| *v = v.max(*value))
                .or_insert(*value);
        }
        for (key, value) in &fs.rto_from {
            rto_map
                .entry(*key)
                .and_modify(|v| *v = v.max(*value))
                .or_insert(*value);
        }
    }
    (min_map, max_map, rto_map)
}

/// Add the reordering penalty to the RTO entries whose reference precedes
/// the duplication split: the source, and every reference that is an
/// ancestor of the nearest common ancestor.
fn add_rto_before_split(
    state: &mut FlowState,
    graph: &FlowGraph,
    rto: f64,
    closest: RefPoint,
) {
    if closest == RefPoint::Source {
        if let Some(value) = state.rto_from.get_mut(&RefPoint::Source) {
            *value += rto;
        }
        return;
    }
    let Some(closest_node) = closest.node() else {
        return;
    };
    let ancestors = graph.ancestors(closest_node);
    for (key, value) in state.rto_from.iter_mut() {
        match key {
            RefPoint::Source => *value += rto,
            RefPoint::Node(n) | RefPoint::Regulator(n) => {
                if ancestors.contains(n) || *n == closest_node {
                    *value += rto;
                }
            }
        }
    }
}

/// Merge the duplicate states of one flow into a single state.
///
/// The caller guarantees all states belong to the same flow and are observed
/// with equivalent clocks. The merged arrival curve is the candidate with
/// the smallest burst among the ancestor deconvolutions; references whose
/// curve is not known yet are skipped.
#[allow(clippy::too_many_arguments)]
pub fn merge_states(
    flow: FlowId,
    node: ServerId,
    states: &[&FlowState],
    network: &Network,
    flow_graphs: &HashMap<FlowId, FlowGraph>,
    comp: &ComputationState,
    pending: &RegistryUpdates,
) -> Result<FlowState, XtfaError> {
    let graph = flow_graphs.get(&flow).expect("flow graph built");
    let references = common_references(states);

    let mut merged = FlowState::new(flow);
    merged.clock = states[0].clock.clone();
    merged.flags = states[0].flags.clone();
    let (min_map, max_map, rto_map) = merged_delay_maps(states);
    merged.min_delay_from = min_map;
    merged.max_delay_from = max_map;
    merged.rto_from = rto_map;

    let closest = closest_ancestor(graph, node, &references);
    let non_fifo_jitter = jitter_from(states, closest);
    add_rto_before_split(&mut merged, graph, non_fifo_jitter, closest);

    // Pick the ancestor-deconvolution candidate with the smallest burst as
    // the pre-contention arrival curve (only needed in propagation mode).
    let mut best: Option<Curve> = None;
    for reference in &references {
        let curve_at = match arrival_curve_at(flow, *reference, network, flow_graphs, comp, pending)
        {
            Ok(curve) => curve,
            Err(XtfaError::NotKnown(_)) => continue,
            Err(other) => return Err(other),
        };
        let dmin = states
            .iter()
            .filter_map(|fs| fs.min_delay_from.get(reference))
            .fold(f64::INFINITY, |a, b| a.min(*b));
        let dmax = states
            .iter()
            .filter_map(|fs| fs.max_delay_from.get(reference))
            .fold(0.0f64, |a, b| a.max(*b));
        let candidate = curve_at.deconv(&Curve::BoundedDelay(dmax - dmin))?;
        let replace = match &best {
            None => true,
            Some(current) => {
                candidate.to_leaky_bucket_min_burst()?.burst()
                    < current.to_leaky_bucket_min_burst()?.burst()
            }
        };
        if replace {
            best = Some(candidate);
        }
    }
    merged.arrival = best.unwrap_or(Curve::None);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use saihu_core::{Flow, NamedPath};

    fn diamond_graph() -> FlowGraph {
        // 0 splits to 1 and 2, both rejoin at 3
        let mut flow = Flow::new(
            FlowId::new(0),
            "f0",
            vec![
                ServerId::new(0),
                ServerId::new(1),
                ServerId::new(3),
            ],
            Curve::leaky_bucket(1.0, 1.0),
        );
        flow.multicast.push(NamedPath {
            name: "alt".into(),
            path: vec![ServerId::new(0), ServerId::new(2), ServerId::new(3)],
        });
        FlowGraph::of_flow(&flow)
    }

    #[test]
    fn test_common_references() {
        let mut a = FlowState::new(FlowId::new(0));
        let mut b = FlowState::new(FlowId::new(0));
        a.add_delay_entry(RefPoint::Node(ServerId::new(0)));
        b.add_delay_entry(RefPoint::Node(ServerId::new(0)));
        a.add_delay_entry(RefPoint::Node(ServerId::new(1)));
        let keys = common_references(&[&a, &b]);
        assert!(keys.contains(&RefPoint::Source));
        assert!(keys.contains(&RefPoint::Node(ServerId::new(0))));
        assert!(!keys.contains(&RefPoint::Node(ServerId::new(1))));
    }

    #[test]
    fn test_closest_ancestor_prefers_nearest_node() {
        let graph = diamond_graph();
        let refs = BTreeSet::from([
            RefPoint::Source,
            RefPoint::Node(ServerId::new(0)),
        ]);
        let closest = closest_ancestor(&graph, ServerId::new(3), &refs);
        assert_eq!(closest, RefPoint::Node(ServerId::new(0)));
        // with only the source available the source wins
        let refs = BTreeSet::from([RefPoint::Source]);
        assert_eq!(
            closest_ancestor(&graph, ServerId::new(3), &refs),
            RefPoint::Source
        );
    }

    #[test]
    fn test_jitter_from() {
        let mut a = FlowState::new(FlowId::new(0));
        let mut b = FlowState::new(FlowId::new(0));
        a.add_suffered_delay(1.0, 2.0, true);
        b.add_suffered_delay(0.5, 3.0, true);
        assert_eq!(jitter_from(&[&a, &b], RefPoint::Source), 2.5);
    }
}
