//! Dynamic arrival-curve lookup by reference point.
//!
//! Regulators and packet-elimination functions reference "the arrival curve
//! at point X" while X may not have been computed yet (feed-forward order or
//! a cut in a cyclic network). Missing entries are signaled with dedicated
//! errors the drivers translate into postponement.

use std::collections::HashMap;
use thiserror::Error;

use crate::curve::Curve;
use crate::flow_state::RefPoint;
use crate::model::FlowId;

/// A referenced curve is not available yet.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    /// The arrival curve at the reference has not been computed.
    #[error("arrival curve of flow #{flow} not known yet at {reference}")]
    CurveNotKnown { flow: usize, reference: String },

    /// The shaped curve of a regulator reference has not been computed
    /// (typical of fix-point sweeps over cyclic networks).
    #[error("regulator curve of flow #{flow} not known yet at {reference}")]
    AtsCurveNotKnown { flow: usize, reference: String },
}

/// Per-flow registry of curves at reference points.
#[derive(Debug, Clone, Default)]
pub struct CurveRegistry {
    entries: HashMap<(FlowId, RefPoint), Curve>,
}

impl CurveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the curve of `flow` at `reference`, replacing any previous
    /// entry.
    pub fn register(&mut self, flow: FlowId, reference: RefPoint, curve: Curve) {
        self.entries.insert((flow, reference), curve);
    }

    /// Fetch the curve of `flow` at `reference`.
    pub fn lookup(&self, flow: FlowId, reference: RefPoint) -> Result<&Curve, LookupError> {
        self.entries.get(&(flow, reference)).ok_or_else(|| {
            let text = reference.to_string();
            match reference {
                RefPoint::Regulator(_) => LookupError::AtsCurveNotKnown {
                    flow: flow.value(),
                    reference: text,
                },
                _ => LookupError::CurveNotKnown {
                    flow: flow.value(),
                    reference: text,
                },
            }
        })
    }

    /// Drop every entry except the source curves (used between fix-point
    /// iterations).
    pub fn clear_computed(&mut self) {
        self.entries
            .retain(|(_, reference), _| *reference == RefPoint::Source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerId;

    #[test]
    fn test_lookup_errors() {
        let registry = CurveRegistry::new();
        let err = registry
            .lookup(FlowId::new(0), RefPoint::Node(ServerId::new(1)))
            .unwrap_err();
        assert!(matches!(err, LookupError::CurveNotKnown { .. }));
        let err = registry
            .lookup(FlowId::new(0), RefPoint::Regulator(ServerId::new(1)))
            .unwrap_err();
        assert!(matches!(err, LookupError::AtsCurveNotKnown { .. }));
    }

    #[test]
    fn test_register_and_clear() {
        let mut registry = CurveRegistry::new();
        let flow = FlowId::new(0);
        registry.register(flow, RefPoint::Source, Curve::leaky_bucket(1.0, 1.0));
        registry.register(
            flow,
            RefPoint::Node(ServerId::new(2)),
            Curve::leaky_bucket(1.0, 3.0),
        );
        assert!(registry.lookup(flow, RefPoint::Node(ServerId::new(2))).is_ok());
        registry.clear_computed();
        assert!(registry.lookup(flow, RefPoint::Node(ServerId::new(2))).is_err());
        assert!(registry.lookup(flow, RefPoint::Source).is_ok());
    }
}
