//! Flow states: the stationary situation of one flow at one observation
//! point.
//!
//! A state carries the arrival curve at its location, the observing clock,
//! and three dictionaries keyed by reference point: minimum delay, maximum
//! delay and reordering-tolerance offset (RTO) measured from the output of
//! the reference. Every state owns its dictionaries; propagation copies
//! states, it never aliases them.

use std::collections::BTreeMap;

use crate::clock::{Clock, ClockModel};
use crate::curve::Curve;
use crate::flow_graph::AtEdge;
use crate::model::{FlowId, ServerId};

/// A reference point from which delays and RTOs are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefPoint {
    /// Output of the sending application.
    Source,
    /// Output of a tagged node.
    Node(ServerId),
    /// Output of the regulator installed at a node.
    Regulator(ServerId),
}

impl RefPoint {
    /// The underlying node, for graph queries; the source has none.
    pub fn node(&self) -> Option<ServerId> {
        match self {
            RefPoint::Source => None,
            RefPoint::Node(n) | RefPoint::Regulator(n) => Some(*n),
        }
    }
}

impl std::fmt::Display for RefPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefPoint::Source => write!(f, "source"),
            RefPoint::Node(n) => write!(f, "node:{}", n.value()),
            RefPoint::Regulator(n) => write!(f, "ats:{}", n.value()),
        }
    }
}

/// Per-flow data carried by the ADAM regulator adaptation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamData {
    pub r2: f64,
    pub b2: f64,
}

/// Computational flags a state carries between pipeline steps.
#[derive(Debug, Clone, Default)]
pub struct StateFlags {
    /// The most recent point where the arrival curve was re-created fresh
    /// (a regulator), when different from the source.
    pub last_fresh: Option<RefPoint>,
    /// ADAM adaptation bookkeeping.
    pub adam: Option<AdamData>,
    /// A penalty curve added to the arrival curve whenever the state
    /// contributes to an aggregate.
    pub internal_penalty: Option<Curve>,
}

/// The stationary state of one flow at one observation point.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub flow: FlowId,
    pub at_edge: AtEdge,
    pub arrival: Curve,
    pub clock: Clock,
    pub min_delay_from: BTreeMap<RefPoint, f64>,
    pub max_delay_from: BTreeMap<RefPoint, f64>,
    pub rto_from: BTreeMap<RefPoint, f64>,
    pub flags: StateFlags,
}

impl FlowState {
    /// A fresh state at the source, with the three dictionaries initialized
    /// at zero for the `source` key.
    pub fn new(flow: FlowId) -> Self {
        let mut min_delay_from = BTreeMap::new();
        let mut max_delay_from = BTreeMap::new();
        let mut rto_from = BTreeMap::new();
        min_delay_from.insert(RefPoint::Source, 0.0);
        max_delay_from.insert(RefPoint::Source, 0.0);
        rto_from.insert(RefPoint::Source, 0.0);
        Self {
            flow,
            at_edge: AtEdge::Source,
            arrival: Curve::None,
            clock: Clock::new("H"),
            min_delay_from,
            max_delay_from,
            rto_from,
            flags: StateFlags::default(),
        }
    }

    /// Register a new reference point, with min/max delays starting at zero.
    pub fn add_delay_entry(&mut self, reference: RefPoint) {
        self.min_delay_from.insert(reference, 0.0);
        self.max_delay_from.insert(reference, 0.0);
    }

    /// Register a new RTO reference point starting at zero.
    pub fn add_rto_entry(&mut self, reference: RefPoint) {
        self.rto_from.insert(reference, 0.0);
    }

    /// Add delay bounds to every entry without touching the RTOs or the
    /// arrival curve.
    pub fn add_delays_without_rto(&mut self, min_delay: f64, max_delay: f64) {
        for value in self.min_delay_from.values_mut() {
            *value += min_delay;
        }
        for value in self.max_delay_from.values_mut() {
            *value += max_delay;
        }
    }

    /// Record a suffered variable delay. Every delay entry grows by the
    /// bounds; an RTO entry grows by the jitter when it was already positive
    /// or when the jitter is declared non-FIFO. The arrival curve is left
    /// untouched.
    pub fn add_suffered_delay(&mut self, min_delay: f64, max_delay: f64, jitter_fifo: bool) {
        self.add_delays_without_rto(min_delay, max_delay);
        for value in self.rto_from.values_mut() {
            if *value > 0.0 || !jitter_fifo {
                *value += max_delay - min_delay;
            }
        }
    }

    /// The arrival curve this state contributes to an aggregate: the stored
    /// curve, worsened by the internal penalty when one is pending.
    pub fn aggregate_arrival(&self) -> Curve {
        match &self.flags.internal_penalty {
            Some(penalty) => self
                .arrival
                .add(penalty)
                .unwrap_or_else(|_| self.arrival.clone()),
            None => self.arrival.clone(),
        }
    }

    /// Change the observing clock; when the new clock differs under the
    /// model, the arrival curve, the delay bounds and the already-positive
    /// RTO entries are worsened.
    pub fn change_clock(&mut self, new_clock: Clock, model: &ClockModel) {
        let unchanged = self.clock.equals(&new_clock, model);
        self.clock = new_clock;
        if unchanged {
            return;
        }
        self.arrival = model.worsen_arrival_curve(&self.arrival);
        for value in self.min_delay_from.values_mut() {
            *value = model.worsen_delay_lower(*value);
        }
        for value in self.max_delay_from.values_mut() {
            *value = model.worsen_delay_upper(*value);
        }
        for value in self.rto_from.values_mut() {
            // a FIFO state (zero RTO) stays FIFO under any clock
            if *value > 0.0 {
                *value = model.worsen_delay_upper(*value);
            }
        }
    }

    /// Equivalence used by the cyclic fix-point: same flow, same edge, same
    /// canonical arrival curve, same dictionary keys, and optionally the
    /// same maximum delay from the source.
    pub fn equivalent(&self, other: &FlowState, match_dmax: bool) -> bool {
        if self.flow != other.flow || self.at_edge != other.at_edge {
            return false;
        }
        if self.arrival != other.arrival {
            return false;
        }
        if self.min_delay_from.keys().ne(other.min_delay_from.keys()) {
            return false;
        }
        if self.max_delay_from.keys().ne(other.max_delay_from.keys()) {
            return false;
        }
        if self.rto_from.keys().ne(other.rto_from.keys()) {
            return false;
        }
        if match_dmax {
            match (
                self.max_delay_from.get(&RefPoint::Source),
                other.max_delay_from.get(&RefPoint::Source),
            ) {
                (Some(a), Some(b)) if a == b => {}
                _ => return false,
            }
        }
        true
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flow#{} @ {} {} D_max={:.2e} D_min={:.2e} RTO={:.2e} (s)(from source)",
            self.flow.value(),
            self.at_edge,
            self.arrival,
            self.max_delay_from
                .get(&RefPoint::Source)
                .copied()
                .unwrap_or(0.0),
            self.min_delay_from
                .get(&RefPoint::Source)
                .copied()
                .unwrap_or(0.0),
            self.rto_from.get(&RefPoint::Source).copied().unwrap_or(0.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> FlowState {
        let mut fs = FlowState::new(FlowId::new(0));
        fs.arrival = Curve::leaky_bucket(1.0, 1.0);
        fs
    }

    #[test]
    fn test_source_keys_present() {
        let fs = state();
        assert_eq!(fs.min_delay_from[&RefPoint::Source], 0.0);
        assert_eq!(fs.max_delay_from[&RefPoint::Source], 0.0);
        assert_eq!(fs.rto_from[&RefPoint::Source], 0.0);
    }

    #[test]
    fn test_fifo_jitter_keeps_rto_zero() {
        let mut fs = state();
        fs.add_suffered_delay(0.5, 2.0, true);
        assert_eq!(fs.min_delay_from[&RefPoint::Source], 0.5);
        assert_eq!(fs.max_delay_from[&RefPoint::Source], 2.0);
        assert_eq!(fs.rto_from[&RefPoint::Source], 0.0);
    }

    #[test]
    fn test_non_fifo_jitter_raises_rto() {
        let mut fs = state();
        fs.add_suffered_delay(0.5, 2.0, false);
        assert_eq!(fs.rto_from[&RefPoint::Source], 1.5);
        // once positive, even FIFO jitter keeps growing it
        fs.add_suffered_delay(0.0, 1.0, true);
        assert_eq!(fs.rto_from[&RefPoint::Source], 2.5);
    }

    #[test]
    fn test_change_clock_perfect_is_noop() {
        let model = ClockModel::default();
        let mut fs = state();
        fs.add_suffered_delay(0.0, 2.0, true);
        let before = fs.max_delay_from[&RefPoint::Source];
        fs.change_clock(Clock::tai(), &model);
        assert_eq!(fs.max_delay_from[&RefPoint::Source], before);
    }

    #[test]
    fn test_change_clock_worsens_bounds() {
        let model = ClockModel {
            perfect: false,
            ..ClockModel::default()
        };
        let mut fs = state();
        fs.add_suffered_delay(0.0, 2.0, true);
        fs.change_clock(Clock::tai(), &model);
        assert!(fs.max_delay_from[&RefPoint::Source] > 2.0);
        // RTO was zero, must stay zero
        assert_eq!(fs.rto_from[&RefPoint::Source], 0.0);
    }

    #[test]
    fn test_equivalence() {
        let a = state();
        let mut b = state();
        assert!(a.equivalent(&b, true));
        b.max_delay_from.insert(RefPoint::Source, 1.0);
        assert!(a.equivalent(&b, false));
        assert!(!a.equivalent(&b, true));
        b.add_delay_entry(RefPoint::Node(ServerId::new(1)));
        assert!(!a.equivalent(&b, false));
    }
}
