//! Rate-latency service curves and their pointwise maximum.

use serde::{Deserialize, Serialize};

/// Rate-latency service curve `beta(t) = R * (t - T)_+`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLatency {
    rate: f64,
    latency: f64,
}

impl RateLatency {
    pub fn new(rate: f64, latency: f64) -> Self {
        debug_assert!(rate >= 0.0, "service rate must be non-negative");
        debug_assert!(latency >= 0.0, "service latency must be non-negative");
        Self { rate, latency }
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[inline]
    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// Curve value at `t` (continuous, so the one-sided limits agree).
    pub fn value(&self, t: f64) -> f64 {
        if t <= self.latency {
            0.0
        } else {
            (t - self.latency) * self.rate
        }
    }

    /// Abscissa at which the curve reaches level `y`.
    pub fn y_to_x(&self, y: f64) -> f64 {
        y / self.rate + self.latency
    }

    /// Min-plus convolution with another rate-latency curve:
    /// latencies add, the smaller rate wins.
    pub fn conv(&self, other: &RateLatency) -> RateLatency {
        RateLatency::new(self.rate.min(other.rate), self.latency + other.latency)
    }

    /// Shift the latency by a pure delay `d` (convolution with `Gamma_d`).
    pub fn shifted(&self, d: f64) -> RateLatency {
        RateLatency::new(self.rate, self.latency + d)
    }

    /// Intersection abscissa with another rate-latency curve, `None` when the
    /// rates are equal or one curve dominates the other.
    pub fn intersection(&self, other: &RateLatency) -> Option<(f64, f64)> {
        if self.rate == other.rate {
            return None;
        }
        let (low, high) = if self.latency > other.latency {
            (other, self)
        } else {
            (self, other)
        };
        if low.rate > high.rate {
            // the lower-latency curve also has the higher rate: it dominates
            return None;
        }
        let x = (other.rate * other.latency - self.rate * self.latency) / (other.rate - self.rate);
        Some((x, self.value(x)))
    }
}

impl std::fmt::Display for RateLatency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RL({:.2e},{:.2e})(bit/s,s)", self.rate, self.latency)
    }
}

/// Pointwise maximum of several rate-latency curves.
///
/// The list is kept in canonical form: strictly increasing latency, strictly
/// increasing rate across active segments, with the intersection abscissae
/// between successive segments cached in `discontinuities` (the first entry
/// is the latency of the first curve).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxOfRateLatencies {
    curves: Vec<RateLatency>,
    discontinuities: Vec<f64>,
}

impl MaxOfRateLatencies {
    pub fn new(initial: RateLatency) -> Self {
        let discontinuities = vec![initial.latency()];
        Self {
            curves: vec![initial],
            discontinuities,
        }
    }

    pub fn curves(&self) -> &[RateLatency] {
        &self.curves
    }

    pub fn discontinuities(&self) -> &[f64] {
        &self.discontinuities
    }

    /// Take the pointwise maximum with an additional rate-latency curve.
    pub fn max_with(&mut self, rl: RateLatency) {
        let pos = self
            .curves
            .iter()
            .position(|c| c.latency() > rl.latency())
            .unwrap_or(self.curves.len());
        self.curves.insert(pos, rl);
        self.clean();
        self.update_discontinuities();
    }

    /// Drop strictly dominated curves. A curve survives when its rate exceeds
    /// the rate of the previous kept curve and its intersection with the next
    /// curve lies above the previous one.
    fn clean(&mut self) {
        let mut kept: Vec<RateLatency> = Vec::with_capacity(self.curves.len());
        for i in 0..self.curves.len() {
            if i == 0 {
                kept.push(self.curves[i]);
                continue;
            }
            if self.curves[i].rate() <= self.curves[i - 1].rate() {
                continue;
            }
            if i + 1 < self.curves.len() {
                match self.curves[i].intersection(&self.curves[i + 1]) {
                    Some((x, y)) if y > self.curves[i - 1].value(x) => kept.push(self.curves[i]),
                    None => kept.push(self.curves[i]),
                    _ => {}
                }
            } else {
                kept.push(self.curves[i]);
            }
        }
        self.curves = kept;
    }

    fn update_discontinuities(&mut self) {
        self.discontinuities.clear();
        self.discontinuities.push(self.curves[0].latency());
        for i in 0..self.curves.len().saturating_sub(1) {
            if let Some((x, _)) = self.curves[i].intersection(&self.curves[i + 1]) {
                self.discontinuities.push(x);
            }
        }
    }

    /// Curve value at `t` (the curve is continuous).
    pub fn value(&self, t: f64) -> f64 {
        for (i, d) in self.discontinuities.iter().enumerate() {
            if *d > t {
                return if i < 1 { 0.0 } else { self.curves[i - 1].value(t) };
            }
        }
        self.curves[self.curves.len() - 1].value(t)
    }

    /// Abscissa at which the maximum reaches level `y`: the minimum over the
    /// component curves.
    pub fn y_to_x(&self, y: f64) -> f64 {
        self.curves
            .iter()
            .map(|c| c.y_to_x(y))
            .fold(f64::INFINITY, f64::min)
    }

    /// The rate valid in the long run (largest rate among components).
    pub fn long_term_rate(&self) -> f64 {
        self.curves
            .last()
            .map(|c| c.rate())
            .unwrap_or(0.0)
    }
}

impl PartialEq for MaxOfRateLatencies {
    fn eq(&self, other: &Self) -> bool {
        self.curves == other.curves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rl_conv() {
        let a = RateLatency::new(5.0, 2.0);
        let b = RateLatency::new(10.0, 4.0);
        let c = a.conv(&b);
        assert_eq!(c.rate(), 5.0);
        assert_eq!(c.latency(), 6.0);
    }

    #[test]
    fn test_max_of_rl_value() {
        // RL(5,2) and RL(10,4): the second takes over past their intersection
        let mut m = MaxOfRateLatencies::new(RateLatency::new(5.0, 2.0));
        m.max_with(RateLatency::new(10.0, 4.0));
        assert_eq!(m.curves().len(), 2);
        assert_eq!(m.value(1.0), 0.0);
        assert_eq!(m.value(3.0), 5.0);
        // intersection of 5(t-2) and 10(t-4) is at t=6 (value 20)
        assert_eq!(m.value(7.0), 30.0);
    }

    #[test]
    fn test_max_with_dominated() {
        // RL(3,3) never exceeds RL(5,2): dropped during cleaning
        let mut m = MaxOfRateLatencies::new(RateLatency::new(5.0, 2.0));
        m.max_with(RateLatency::new(3.0, 3.0));
        assert_eq!(m.curves().len(), 1);
        assert_eq!(m.curves()[0].rate(), 5.0);
    }

    #[test]
    fn test_y_to_x() {
        let mut m = MaxOfRateLatencies::new(RateLatency::new(5.0, 2.0));
        m.max_with(RateLatency::new(10.0, 4.0));
        // level 40 is reached first by the faster curve: 40/10 + 4 = 8
        assert_eq!(m.y_to_x(40.0), 8.0);
    }
}
