//! Clock model and per-observation-point clocks.
//!
//! Delay and arrival-curve bounds are only meaningful relative to an
//! observing clock. When clocks are imperfect, changing the observer worsens
//! every bound according to the time model. The model parameters are carried
//! in an injected [`ClockModel`] record; curve operations take a reference
//! to it rather than consulting process-global state.

use serde::{Deserialize, Serialize};

use crate::curve::Curve;

/// Parameters of the network time model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockModel {
    /// Stability bound of the clocks (frequency offset factor).
    pub rho: f64,
    /// Time-jitter bound of the clocks, in seconds.
    pub eta: f64,
    /// Synchronization precision, in seconds. Only used when `sync` is set.
    pub delta: f64,
    /// True when the network is synchronized to precision `delta`.
    pub sync: bool,
    /// True when clocks are ideal; all worsening operations become
    /// identities.
    pub perfect: bool,
}

impl Default for ClockModel {
    fn default() -> Self {
        Self {
            rho: 1.0 + 2e-4,
            eta: 4e-9,
            delta: 1e-6,
            sync: false,
            perfect: true,
        }
    }
}

impl ClockModel {
    /// A model with ideal clocks.
    pub fn perfect() -> Self {
        Self::default()
    }

    /// Worsen a delay upper bound observed with one clock so that it holds
    /// under any other clock.
    pub fn worsen_delay_upper(&self, d: f64) -> f64 {
        if self.perfect {
            return d;
        }
        let mut out = self.rho * d + self.eta;
        if self.sync {
            out = out.min(d + 2.0 * self.delta);
        }
        out
    }

    /// Worsen a delay lower bound observed with one clock so that it holds
    /// under any other clock.
    pub fn worsen_delay_lower(&self, d: f64) -> f64 {
        if self.perfect {
            return d;
        }
        let mut out = ((d - self.eta) / self.rho).max(0.0);
        if self.sync {
            out = out.max(d - 2.0 * self.delta);
        }
        out
    }

    /// Worsen an arrival curve for a clock change.
    pub fn worsen_arrival_curve(&self, ac: &Curve) -> Curve {
        if self.perfect {
            return ac.clone();
        }
        if self.sync {
            ac.worsen_ac_sync(self.rho, self.eta, self.delta)
        } else {
            ac.worsen_ac_async(self.rho, self.eta)
        }
    }

    /// Worsen a service curve for a clock change.
    pub fn worsen_service_curve(&self, sc: &Curve) -> Curve {
        if self.perfect {
            return sc.clone();
        }
        if self.sync {
            sc.worsen_sc_sync(self.rho, self.eta, self.delta)
        } else {
            sc.worsen_sc_async(self.rho, self.eta)
        }
    }
}

/// A named clock. The name `tai` (any case) designates the absolute clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub name: String,
    pub is_tai: bool,
}

impl Clock {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let is_tai = name.eq_ignore_ascii_case("tai");
        Self { name, is_tai }
    }

    pub fn tai() -> Self {
        Self::new("tai")
    }

    /// Two clocks are interchangeable when the model is perfect, when both
    /// are the absolute clock, or when they carry the same name.
    pub fn equals(&self, other: &Clock, model: &ClockModel) -> bool {
        if model.perfect {
            return true;
        }
        if self.is_tai && other.is_tai {
            return true;
        }
        self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_is_identity() {
        let model = ClockModel::default();
        assert_eq!(model.worsen_delay_upper(3.0), 3.0);
        assert_eq!(model.worsen_delay_lower(3.0), 3.0);
    }

    #[test]
    fn test_async_worsening() {
        let model = ClockModel {
            perfect: false,
            ..ClockModel::default()
        };
        assert!(model.worsen_delay_upper(1.0) > 1.0);
        assert!(model.worsen_delay_lower(1.0) < 1.0);
        assert_eq!(model.worsen_delay_lower(0.0), 0.0);
    }

    #[test]
    fn test_sync_tightens() {
        let base = ClockModel {
            perfect: false,
            ..ClockModel::default()
        };
        let synced = ClockModel { sync: true, ..base };
        // with a large delay the sync bound d + 2 delta beats rho d + eta
        let d = 100.0;
        assert!(synced.worsen_delay_upper(d) <= base.worsen_delay_upper(d));
    }

    #[test]
    fn test_clock_names() {
        let model = ClockModel {
            perfect: false,
            ..ClockModel::default()
        };
        let a = Clock::new("TAI");
        let b = Clock::new("tai");
        let c = Clock::new("H-node0");
        assert!(a.is_tai);
        assert!(a.equals(&b, &model));
        assert!(!a.equals(&c, &model));
        assert!(c.equals(&Clock::new("H-node0"), &model));
    }
}
