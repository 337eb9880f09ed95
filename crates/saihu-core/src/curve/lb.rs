//! Leaky-bucket (token-bucket) curves.

use serde::{Deserialize, Serialize};

/// Leaky-bucket arrival curve: `alpha(t) = burst + rate * t` for `t > 0`,
/// `0` at `t = 0`.
///
/// The burst may be `+inf` to encode an unstable flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeakyBucket {
    rate: f64,
    burst: f64,
}

impl LeakyBucket {
    pub fn new(rate: f64, burst: f64) -> Self {
        debug_assert!(rate >= 0.0, "leaky-bucket rate must be non-negative");
        debug_assert!(burst >= 0.0, "leaky-bucket burst must be non-negative");
        Self { rate, burst }
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[inline]
    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Right limit of the curve value at `t`.
    #[inline]
    pub fn value_right(&self, t: f64) -> f64 {
        self.burst + self.rate * t
    }

    /// Curve value at `t` (0 at the origin).
    #[inline]
    pub fn value(&self, t: f64) -> f64 {
        if t == 0.0 {
            0.0
        } else {
            self.value_right(t)
        }
    }

    /// Abscissa at which the curve reaches level `y` (0 below the burst).
    pub fn y_to_x(&self, y: f64) -> f64 {
        if y <= self.burst {
            0.0
        } else {
            (y - self.burst) / self.rate
        }
    }

    /// Pointwise sum with another leaky bucket.
    pub fn sum(&self, other: &LeakyBucket) -> LeakyBucket {
        LeakyBucket::new(self.rate + other.rate, self.burst + other.burst)
    }

    /// Round the burst up to the next integer (fix-point convergence).
    pub fn ceil_burst(&mut self) {
        self.burst = self.burst.ceil();
    }

    /// Intersection with another leaky bucket.
    ///
    /// Returns `(abscissa, self_below_before)`. The abscissa is `None` when
    /// the curves have equal rates or intersect at `t <= 0`; in that case one
    /// curve dominates the other everywhere on `t > 0` and
    /// `self_below_before` tells whether `self` is the dominated one.
    pub fn intersection(&self, other: &LeakyBucket) -> (Option<f64>, bool) {
        if self.rate == other.rate {
            return (None, self.burst < other.burst);
        }
        let x = (other.burst - self.burst) / (self.rate - other.rate);
        if x <= 0.0 {
            // Intersection in the negative domain: on t > 0 the curve with
            // the smaller rate is always below.
            return (None, self.rate < other.rate);
        }
        (Some(x), self.rate > other.rate)
    }

    /// Deconvolution with a pure-delay service of `d` seconds:
    /// `LB(rate, burst) / Gamma_d = LB(rate, burst + rate * d)`.
    pub fn deconv_delay(&self, d: f64) -> LeakyBucket {
        LeakyBucket::new(self.rate, self.burst + self.rate * d)
    }
}

impl std::fmt::Display for LeakyBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LB({:.2e},{:.2e})(bit/s,bit)", self.rate, self.burst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_at_origin() {
        let lb = LeakyBucket::new(2.0, 3.0);
        assert_eq!(lb.value(0.0), 0.0);
        assert_eq!(lb.value_right(0.0), 3.0);
        assert_eq!(lb.value(2.0), 7.0);
    }

    #[test]
    fn test_intersection() {
        // LB(4,1) and LB(2,3) intersect at (3-1)/(4-2) = 1.0
        let a = LeakyBucket::new(4.0, 1.0);
        let b = LeakyBucket::new(2.0, 3.0);
        let (x, a_below) = a.intersection(&b);
        assert_eq!(x, Some(1.0));
        assert!(a_below);

        // same rate, domination by burst
        let c = LeakyBucket::new(4.0, 5.0);
        let (x, a_below) = a.intersection(&c);
        assert_eq!(x, None);
        assert!(a_below);
    }

    #[test]
    fn test_deconv_delay() {
        let lb = LeakyBucket::new(2.0, 3.0);
        let out = lb.deconv_delay(4.0);
        assert_eq!(out.burst(), 11.0);
        assert_eq!(out.rate(), 2.0);
    }

    #[test]
    fn test_y_to_x() {
        let lb = LeakyBucket::new(2.0, 3.0);
        assert_eq!(lb.y_to_x(1.0), 0.0);
        assert_eq!(lb.y_to_x(7.0), 2.0);
    }
}
