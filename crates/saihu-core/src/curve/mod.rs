//! Min-plus curve algebra.
//!
//! The toolbox of arrival and service curves used by every analysis method:
//! leaky buckets and their min-plus convolutions (GVBR), rate-latency service
//! curves and their maxima, pure-delay services, and the operations between
//! them (convolution, addition, deconvolution, horizontal and vertical
//! distances, clock worsening, packetization penalty).
//!
//! Curves form a closed set of variants dispatched through a central `match`
//! in each operation. Unsupported variant pairs surface as
//! [`CurveError::Unsupported`]; instability (arrival rate at or above the
//! service rate) surfaces as [`CurveError::LocallyUnstable`].

mod gvbr;
mod lb;
mod rate_latency;

pub use gvbr::{DelayedGvbr, Gvbr};
pub use lb::LeakyBucket;
pub use rate_latency::{MaxOfRateLatencies, RateLatency};

use serde::{Deserialize, Serialize};

use crate::error::CurveError;

/// A non-decreasing function from non-negative reals to extended
/// non-negative reals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Curve {
    /// Identically zero (the arrival curve of "no flow").
    None,
    /// The delta function at 0: zero at the origin, infinite after.
    Infinite,
    /// Token bucket `sigma + rho * t`.
    LeakyBucket(LeakyBucket),
    /// Min of several token buckets, canonical.
    Gvbr(Gvbr),
    /// Rate-latency service `R (t - T)_+`.
    RateLatency(RateLatency),
    /// Max of several rate-latency curves, canonical.
    MaxOfRateLatencies(MaxOfRateLatencies),
    /// Pure-delay service: zero up to the delay, infinite after.
    BoundedDelay(f64),
    /// A GVBR shifted right by a latency.
    DelayedGvbr(DelayedGvbr),
}

type CurveResult<T> = Result<T, CurveError>;

impl Curve {
    pub fn leaky_bucket(rate: f64, burst: f64) -> Curve {
        Curve::LeakyBucket(LeakyBucket::new(rate, burst))
    }

    pub fn rate_latency(rate: f64, latency: f64) -> Curve {
        Curve::RateLatency(RateLatency::new(rate, latency))
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Curve::None => "NoCurve",
            Curve::Infinite => "InfiniteCurve",
            Curve::LeakyBucket(_) => "LeakyBucket",
            Curve::Gvbr(_) => "Gvbr",
            Curve::RateLatency(_) => "RateLatency",
            Curve::MaxOfRateLatencies(_) => "MaxOfRateLatencies",
            Curve::BoundedDelay(_) => "BoundedDelay",
            Curve::DelayedGvbr(_) => "DelayedGvbr",
        }
    }

    fn unsupported(&self, op: &'static str, other: &Curve) -> CurveError {
        CurveError::Unsupported {
            op,
            lhs: self.variant_name(),
            rhs: other.variant_name(),
        }
    }

    /// Curve value at `t`.
    pub fn value(&self, t: f64) -> f64 {
        match self {
            Curve::None => 0.0,
            Curve::Infinite => {
                if t <= 0.0 {
                    0.0
                } else {
                    f64::INFINITY
                }
            }
            Curve::LeakyBucket(lb) => lb.value(t),
            Curve::Gvbr(g) => g.value(t),
            Curve::RateLatency(rl) => rl.value(t),
            Curve::MaxOfRateLatencies(m) => m.value(t),
            Curve::BoundedDelay(d) => {
                if t <= *d {
                    0.0
                } else {
                    f64::INFINITY
                }
            }
            Curve::DelayedGvbr(dg) => dg.value(t),
        }
    }

    /// Right limit of the curve value at `t`.
    pub fn value_right(&self, t: f64) -> f64 {
        match self {
            Curve::None => 0.0,
            Curve::Infinite => f64::INFINITY,
            Curve::LeakyBucket(lb) => lb.value_right(t),
            Curve::Gvbr(g) => g.value_right(t),
            Curve::RateLatency(rl) => rl.value(t),
            Curve::MaxOfRateLatencies(m) => m.value(t),
            Curve::BoundedDelay(d) => {
                if t < *d {
                    0.0
                } else {
                    f64::INFINITY
                }
            }
            Curve::DelayedGvbr(dg) => dg.value_right(t),
        }
    }

    /// Left limit of the curve value at `t`; not defined at or below the
    /// origin.
    pub fn value_left(&self, t: f64) -> CurveResult<f64> {
        if t <= 0.0 {
            return Err(CurveError::NotDefined(t));
        }
        Ok(match self {
            Curve::None => 0.0,
            Curve::Infinite => f64::INFINITY,
            Curve::LeakyBucket(lb) => lb.value_right(t),
            Curve::Gvbr(g) => g.segment_before(t).value_right(t),
            Curve::RateLatency(rl) => rl.value(t),
            Curve::MaxOfRateLatencies(m) => m.value(t),
            Curve::BoundedDelay(d) => {
                if t <= *d {
                    0.0
                } else {
                    f64::INFINITY
                }
            }
            Curve::DelayedGvbr(dg) => {
                if t <= dg.latency() {
                    0.0
                } else {
                    dg.gvbr().segment_before(t - dg.latency()).value_right(t - dg.latency())
                }
            }
        })
    }

    /// Min-plus convolution.
    pub fn conv(&self, other: &Curve) -> CurveResult<Curve> {
        use Curve::*;
        Ok(match (self, other) {
            (None, _) | (_, None) => None,
            (Infinite, c) | (c, Infinite) => c.clone(),
            (LeakyBucket(a), LeakyBucket(b)) => self::Gvbr::new(vec![*a, *b]).into_curve(),
            (LeakyBucket(a), Gvbr(g)) | (Gvbr(g), LeakyBucket(a)) => {
                g.conv_with(&[*a]).into_curve()
            }
            (Gvbr(a), Gvbr(b)) => a.conv_with(b.buckets()).into_curve(),
            (LeakyBucket(a), BoundedDelay(d)) | (BoundedDelay(d), LeakyBucket(a)) => {
                DelayedGvbr(self::DelayedGvbr::new(*d, self::Gvbr::new(vec![*a])))
            }
            (Gvbr(g), BoundedDelay(d)) | (BoundedDelay(d), Gvbr(g)) => {
                DelayedGvbr(self::DelayedGvbr::new(*d, g.clone()))
            }
            (RateLatency(a), RateLatency(b)) => RateLatency(a.conv(b)),
            (RateLatency(rl), BoundedDelay(d)) | (BoundedDelay(d), RateLatency(rl)) => {
                RateLatency(rl.shifted(*d))
            }
            (BoundedDelay(a), BoundedDelay(b)) => BoundedDelay(a + b),
            _ => return Err(self.unsupported("conv", other)),
        })
    }

    /// Pointwise addition.
    pub fn add(&self, other: &Curve) -> CurveResult<Curve> {
        use Curve::*;
        Ok(match (self, other) {
            (None, c) | (c, None) => c.clone(),
            (Infinite, _) | (_, Infinite) => Infinite,
            (LeakyBucket(a), LeakyBucket(b)) => LeakyBucket(a.sum(b)),
            (LeakyBucket(a), Gvbr(g)) | (Gvbr(g), LeakyBucket(a)) => {
                g.sum(&self::Gvbr::new(vec![*a])).into_curve()
            }
            (Gvbr(a), Gvbr(b)) => a.sum(b).into_curve(),
            _ => return Err(self.unsupported("add", other)),
        })
    }

    /// Min-plus deconvolution of `self` (an arrival curve) by a service
    /// curve.
    pub fn deconv(&self, service: &Curve) -> CurveResult<Curve> {
        use Curve::*;
        Ok(match (self, service) {
            (None, _) => None,
            (Infinite, _) => Infinite,
            (LeakyBucket(a), BoundedDelay(d)) => LeakyBucket(a.deconv_delay(*d)),
            (LeakyBucket(a), RateLatency(rl)) => LeakyBucket(a.deconv_delay(rl.latency())),
            (Gvbr(g), BoundedDelay(d)) => g.deconv_delay(*d).into_curve(),
            (Gvbr(g), RateLatency(rl)) => g.deconv_delay(rl.latency()).into_curve(),
            _ => return Err(self.unsupported("deconv", service)),
        })
    }

    /// Maximum horizontal distance: the delay bound of `self` (arrival)
    /// served by `service`.
    pub fn hdist(&self, service: &Curve) -> CurveResult<f64> {
        use Curve::*;
        match (self, service) {
            (None, _) => Ok(0.0),
            (_, Infinite) => Ok(0.0),
            (LeakyBucket(_), None) | (Gvbr(_), None) => Err(CurveError::LocallyUnstable),
            (LeakyBucket(lb), RateLatency(rl)) => {
                if lb.rate() >= rl.rate() || !lb.burst().is_finite() {
                    Err(CurveError::LocallyUnstable)
                } else {
                    Ok(rl.latency() + lb.burst() / rl.rate())
                }
            }
            (LeakyBucket(lb), MaxOfRateLatencies(m)) => {
                if lb.rate() >= m.long_term_rate() || !lb.burst().is_finite() {
                    return Err(CurveError::LocallyUnstable);
                }
                let mut best = m.y_to_x(lb.burst());
                for x2 in m.discontinuities() {
                    let x1 = lb.y_to_x(m.value(*x2));
                    best = best.max(x2 - x1);
                }
                Ok(best)
            }
            (LeakyBucket(_), BoundedDelay(d)) | (Gvbr(_), BoundedDelay(d)) => Ok(*d),
            (Gvbr(g), RateLatency(rl)) => {
                // Walk the segments in burst-increasing order until the first
                // stable one; the bound is realized at the rate-latency
                // against that segment's burst.
                for seg in g.segments() {
                    if seg.rate() < rl.rate() && seg.burst().is_finite() {
                        return Ok(rl.latency() + seg.burst() / rl.rate());
                    }
                }
                Err(CurveError::LocallyUnstable)
            }
            (Gvbr(g), MaxOfRateLatencies(m)) => {
                if g.rate() >= m.long_term_rate() || !g.burst().is_finite() {
                    return Err(CurveError::LocallyUnstable);
                }
                let mut best: f64 = 0.0;
                let mut xs = vec![0.0];
                xs.extend_from_slice(g.discontinuities());
                for x1 in xs {
                    let x2 = m.y_to_x(g.value_right(x1));
                    best = best.max(x2 - x1);
                }
                for x2 in m.discontinuities() {
                    let x1 = g.y_to_x(m.value(*x2));
                    best = best.max(x2 - x1);
                }
                Ok(best)
            }
            _ => Err(self.unsupported("hdist", service)),
        }
    }

    /// Maximum vertical distance: the backlog bound of `self` (arrival)
    /// served by `service`.
    pub fn vdist(&self, service: &Curve) -> CurveResult<f64> {
        use Curve::*;
        match (self, service) {
            (None, _) => Ok(0.0),
            (LeakyBucket(lb), RateLatency(rl)) => {
                Ok(lb.burst() + lb.rate() * rl.latency())
            }
            (LeakyBucket(lb), BoundedDelay(d)) => Ok(lb.value_right(*d)),
            (LeakyBucket(lb), LeakyBucket(shaper)) => {
                if shaper.rate() < lb.rate() {
                    Err(CurveError::LocallyUnstable)
                } else {
                    Ok(lb.burst() - shaper.burst())
                }
            }
            (LeakyBucket(lb), DelayedGvbr(dg)) => {
                if dg.gvbr().first_segment().rate() < lb.rate() {
                    return Err(self.unsupported("vdist", service));
                }
                Ok(lb.value(dg.latency()))
            }
            (Gvbr(g), RateLatency(rl)) => {
                // The maximum is attained at a discontinuity of one of the
                // two curves.
                let mut best = g.value_right(0.0);
                for x in g
                    .discontinuities()
                    .iter()
                    .copied()
                    .chain(std::iter::once(rl.latency()))
                {
                    best = best.max(g.value_right(x) - rl.value(x));
                }
                Ok(best)
            }
            (Gvbr(g), BoundedDelay(d)) => Ok(g.value_right(*d)),
            _ => Err(self.unsupported("vdist", service)),
        }
    }

    /// Worsen an arrival curve observed through an imperfect, unsynchronized
    /// clock: each `LB(r, b)` becomes `LB(rho * r, b + r * eta)`.
    pub fn worsen_ac_async(&self, rho: f64, eta: f64) -> Curve {
        match self {
            Curve::None => Curve::None,
            Curve::Infinite => Curve::Infinite,
            Curve::LeakyBucket(lb) => {
                Curve::LeakyBucket(LeakyBucket::new(rho * lb.rate(), lb.burst() + lb.rate() * eta))
            }
            Curve::Gvbr(g) => Gvbr::new(
                g.buckets()
                    .iter()
                    .map(|lb| LeakyBucket::new(rho * lb.rate(), lb.burst() + lb.rate() * eta))
                    .collect(),
            )
            .into_curve(),
            other => other.clone(),
        }
    }

    /// Worsen an arrival curve observed through an imperfect but
    /// synchronized clock: the async worsening convolved with
    /// `LB(r, b + 2 r delta)`, which is tighter under synchronization.
    pub fn worsen_ac_sync(&self, rho: f64, eta: f64, delta: f64) -> Curve {
        match self {
            Curve::None => Curve::None,
            Curve::Infinite => Curve::Infinite,
            Curve::LeakyBucket(lb) => {
                let first = self.worsen_ac_async(rho, eta);
                let second =
                    Curve::LeakyBucket(LeakyBucket::new(lb.rate(), lb.burst() + 2.0 * lb.rate() * delta));
                first.conv(&second).expect("LB conv LB is defined")
            }
            Curve::Gvbr(g) => {
                let mut out = Curve::Infinite;
                for lb in g.buckets() {
                    let worsened = Curve::LeakyBucket(*lb).worsen_ac_sync(rho, eta, delta);
                    out = out.conv(&worsened).expect("GVBR conv LB is defined");
                }
                out
            }
            other => other.clone(),
        }
    }

    /// Worsen a service curve observed through an imperfect, unsynchronized
    /// clock: `RL(R, T)` becomes `RL(R / rho, eta + rho * T)`.
    pub fn worsen_sc_async(&self, rho: f64, eta: f64) -> Curve {
        match self {
            Curve::RateLatency(rl) => {
                Curve::RateLatency(RateLatency::new(rl.rate() / rho, eta + rho * rl.latency()))
            }
            Curve::MaxOfRateLatencies(m) => {
                let mut curves = m.curves().iter();
                let first = curves.next().expect("canonical max is non-empty");
                let mut out = MaxOfRateLatencies::new(RateLatency::new(
                    first.rate() / rho,
                    eta + rho * first.latency(),
                ));
                for rl in curves {
                    out.max_with(RateLatency::new(rl.rate() / rho, eta + rho * rl.latency()));
                }
                Curve::MaxOfRateLatencies(out)
            }
            other => other.clone(),
        }
    }

    /// Worsen a service curve observed through an imperfect but synchronized
    /// clock: the max of the async worsening and `RL(R, T + 2 delta)`.
    pub fn worsen_sc_sync(&self, rho: f64, eta: f64, delta: f64) -> Curve {
        match self {
            Curve::RateLatency(rl) => {
                let mut m = MaxOfRateLatencies::new(RateLatency::new(
                    rl.rate() / rho,
                    eta + rho * rl.latency(),
                ));
                m.max_with(RateLatency::new(rl.rate(), rl.latency() + 2.0 * delta));
                Curve::MaxOfRateLatencies(m)
            }
            Curve::MaxOfRateLatencies(m) => {
                let mut curves = m.curves().iter();
                let first = curves.next().expect("canonical max is non-empty");
                let mut out = match Curve::RateLatency(*first).worsen_sc_sync(rho, eta, delta) {
                    Curve::MaxOfRateLatencies(m) => m,
                    _ => unreachable!(),
                };
                for rl in curves {
                    out.max_with(RateLatency::new(rl.rate() / rho, eta + rho * rl.latency()));
                    out.max_with(RateLatency::new(rl.rate(), rl.latency() + 2.0 * delta));
                }
                Curve::MaxOfRateLatencies(out)
            }
            other => other.clone(),
        }
    }

    /// The extra burst a packetizer of maximum packet size `l_max` adds to
    /// this curve. When the input link capacity `c` is known and exceeds the
    /// sustained rate, the tighter `LB(0, (rho / c) * l_max)` applies.
    pub fn packetization_penalty(&self, l_max: f64, link_capacity: Option<f64>) -> Curve {
        match self {
            Curve::None => Curve::None,
            // no penalty worsens an already infinite envelope
            Curve::Infinite => Curve::None,
            Curve::LeakyBucket(lb) => {
                if let Some(c) = link_capacity {
                    if c > lb.rate() {
                        return Curve::leaky_bucket(0.0, (lb.rate() / c) * l_max);
                    }
                }
                Curve::leaky_bucket(0.0, l_max)
            }
            Curve::Gvbr(g) => {
                let mut out = Curve::Infinite;
                for lb in g.buckets() {
                    let penalty = Curve::LeakyBucket(*lb).packetization_penalty(l_max, link_capacity);
                    out = out.conv(&penalty).expect("LB conv LB is defined");
                }
                out
            }
            other => other.clone(),
        }
    }

    /// This curve worsened by its packetization penalty.
    pub fn with_packetization(&self, l_max: f64, link_capacity: Option<f64>) -> CurveResult<Curve> {
        match self {
            Curve::Gvbr(g) => {
                // each bucket takes its own penalty before re-canonicalizing
                let buckets: Vec<LeakyBucket> = g
                    .buckets()
                    .iter()
                    .map(|lb| {
                        match Curve::LeakyBucket(*lb)
                            .packetization_penalty(l_max, link_capacity)
                        {
                            Curve::LeakyBucket(p) => lb.sum(&p),
                            _ => *lb,
                        }
                    })
                    .collect();
                Ok(Gvbr::new(buckets).into_curve())
            }
            other => other.add(&other.packetization_penalty(l_max, link_capacity)),
        }
    }

    /// Round every burst up to the next integer (fix-point convergence).
    pub fn ceil_bursts(&mut self) {
        match self {
            Curve::LeakyBucket(lb) => lb.ceil_burst(),
            Curve::Gvbr(g) => g.ceil_bursts(),
            _ => {}
        }
    }

    /// The burst of the most bursty segment, when meaningful.
    pub fn burst(&self) -> f64 {
        match self {
            Curve::None => 0.0,
            Curve::LeakyBucket(lb) => lb.burst(),
            Curve::Gvbr(g) => g.burst(),
            _ => f64::INFINITY,
        }
    }

    /// The dominating leaky bucket with the smallest burst.
    pub fn to_leaky_bucket_min_burst(&self) -> CurveResult<LeakyBucket> {
        match self {
            Curve::None => Ok(LeakyBucket::new(0.0, 0.0)),
            Curve::LeakyBucket(lb) => Ok(*lb),
            Curve::Gvbr(g) => Ok(*g.first_segment()),
            other => Err(other.unsupported("to_leaky_bucket_min_burst", other)),
        }
    }

    /// The dominating leaky bucket with the smallest rate.
    pub fn to_leaky_bucket_min_rate(&self) -> CurveResult<LeakyBucket> {
        match self {
            Curve::None => Ok(LeakyBucket::new(0.0, 0.0)),
            Curve::LeakyBucket(lb) => Ok(*lb),
            Curve::Gvbr(g) => Ok(*g.last_segment()),
            other => Err(other.unsupported("to_leaky_bucket_min_rate", other)),
        }
    }

    /// `self` dominates `other` when `self(t) >= other(t)` for all `t`.
    /// For the convex piecewise-linear variants this holds exactly when the
    /// convolution with `other` equals `other`.
    pub fn is_dominating(&self, other: &Curve) -> CurveResult<bool> {
        Ok(self.conv(other)? == *other)
    }
}

impl Gvbr {
    /// Simplify to a plain leaky bucket when a single segment remains.
    pub fn into_curve(self) -> Curve {
        if self.is_single_segment() {
            Curve::LeakyBucket(*self.first_segment())
        } else {
            Curve::Gvbr(self)
        }
    }
}

/// Equality across curve variants: `LB(0, 0)` equals `NoCurve`, a
/// rate-latency with zero rate equals `NoCurve`, a zero-latency rate-latency
/// equals the burstless leaky bucket of the same rate, and a single-segment
/// GVBR equals that leaky bucket.
impl PartialEq for Curve {
    fn eq(&self, other: &Self) -> bool {
        use Curve::*;
        match (self, other) {
            (None, None) | (Infinite, Infinite) => true,
            (None, LeakyBucket(lb)) | (LeakyBucket(lb), None) => {
                lb.rate() == 0.0 && lb.burst() == 0.0
            }
            (None, RateLatency(rl)) | (RateLatency(rl), None) => rl.rate() == 0.0,
            (None, Gvbr(g)) | (Gvbr(g), None) => {
                g.segments().all(|lb| lb.rate() == 0.0 && lb.burst() == 0.0)
            }
            (LeakyBucket(a), LeakyBucket(b)) => a == b,
            (LeakyBucket(lb), Gvbr(g)) | (Gvbr(g), LeakyBucket(lb)) => {
                g.is_single_segment() && g.first_segment() == lb
            }
            (LeakyBucket(lb), RateLatency(rl)) | (RateLatency(rl), LeakyBucket(lb)) => {
                rl.latency() == 0.0 && lb.burst() == 0.0 && lb.rate() == rl.rate()
            }
            (Gvbr(a), Gvbr(b)) => a == b,
            (RateLatency(a), RateLatency(b)) => a == b,
            (MaxOfRateLatencies(a), MaxOfRateLatencies(b)) => a == b,
            (BoundedDelay(a), BoundedDelay(b)) => a == b,
            (DelayedGvbr(a), DelayedGvbr(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Curve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Curve::None => write!(f, "NoCurve"),
            Curve::Infinite => write!(f, "InfiniteCurve"),
            Curve::LeakyBucket(lb) => write!(f, "{lb}"),
            Curve::Gvbr(g) => write!(f, "{g}"),
            Curve::RateLatency(rl) => write!(f, "{rl}"),
            Curve::MaxOfRateLatencies(m) => {
                write!(f, "MaxRL[")?;
                for rl in m.curves() {
                    write!(f, "{rl}")?;
                }
                write!(f, "]")
            }
            Curve::BoundedDelay(d) => write!(f, "Gamma({d:.2e})(s)"),
            Curve::DelayedGvbr(dg) => write!(f, "DGVBR({:.2e},{})", dg.latency(), dg.gvbr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb(rate: f64, burst: f64) -> Curve {
        Curve::leaky_bucket(rate, burst)
    }

    fn rl(rate: f64, latency: f64) -> Curve {
        Curve::rate_latency(rate, latency)
    }

    #[test]
    fn test_identity_laws() {
        let c = lb(2.0, 3.0);
        assert_eq!(c.conv(&Curve::None).unwrap(), Curve::None);
        assert_eq!(c.conv(&Curve::Infinite).unwrap(), c);
        assert_eq!(c.add(&Curve::None).unwrap(), c);
        assert_eq!(c.add(&Curve::Infinite).unwrap(), Curve::Infinite);
    }

    #[test]
    fn test_conv_commutative() {
        let a = lb(2.0, 3.0);
        let b = lb(4.0, 1.0);
        assert_eq!(a.conv(&b).unwrap(), b.conv(&a).unwrap());
        assert_eq!(a.add(&b).unwrap(), b.add(&a).unwrap());
    }

    #[test]
    fn test_lb_conv_lb_gives_gvbr() {
        // LB(2,3) x LB(4,1): two segments, crossing at (3-1)/(4-2) = 1.0
        let g = lb(2.0, 3.0).conv(&lb(4.0, 1.0)).unwrap();
        match &g {
            Curve::Gvbr(g) => {
                assert_eq!(g.discontinuities(), &[1.0]);
                assert_eq!(g.first_segment().burst(), 1.0);
                assert_eq!(g.last_segment().burst(), 3.0);
            }
            other => panic!("expected GVBR, got {other}"),
        }
    }

    #[test]
    fn test_lb_hdist_rl() {
        // T + sigma / R
        let d = lb(1.0, 1.0).hdist(&rl(4.0, 1.0)).unwrap();
        assert_eq!(d, 1.25);
        assert!(matches!(
            lb(5.0, 1.0).hdist(&rl(4.0, 1.0)),
            Err(CurveError::LocallyUnstable)
        ));
        // equal rates are unstable as well
        assert!(matches!(
            lb(4.0, 1.0).hdist(&rl(4.0, 1.0)),
            Err(CurveError::LocallyUnstable)
        ));
    }

    #[test]
    fn test_gvbr_hdist_rl() {
        // GVBR{LB(8,1), LB(4,3)} against RL(5,2): the first segment is
        // unstable, the bound comes from the second: 2 + 3/5 = 2.6
        let g = lb(8.0, 1.0).conv(&lb(4.0, 3.0)).unwrap();
        let d = g.hdist(&rl(5.0, 2.0)).unwrap();
        assert!((d - 2.6).abs() < 1e-12);

        // all segments unstable
        let g = lb(8.0, 1.0).conv(&lb(6.0, 3.0)).unwrap();
        assert!(matches!(
            g.hdist(&rl(5.0, 2.0)),
            Err(CurveError::LocallyUnstable)
        ));
    }

    #[test]
    fn test_deconv_properties() {
        // alpha' = alpha / Gamma_d satisfies alpha'(t) >= alpha(t - d)
        let a = lb(2.0, 3.0);
        let d = 1.5;
        let out = a.deconv(&Curve::BoundedDelay(d)).unwrap();
        for t in [2.0, 3.0, 10.0] {
            assert!(out.value(t) >= a.value(t - d));
        }
        // LB / RL adds rho * T to the burst
        let out = a.deconv(&rl(5.0, 2.0)).unwrap();
        assert_eq!(out, lb(2.0, 7.0));
    }

    #[test]
    fn test_vdist() {
        // LB vs RL: sigma + rho * T
        assert_eq!(lb(2.0, 3.0).vdist(&rl(5.0, 2.0)).unwrap(), 7.0);
        // LB vs bounded delay: value just after d
        assert_eq!(lb(2.0, 3.0).vdist(&Curve::BoundedDelay(2.0)).unwrap(), 7.0);
    }

    #[test]
    fn test_cross_variant_equality() {
        assert_eq!(lb(0.0, 0.0), Curve::None);
        assert_eq!(rl(0.0, 3.0), Curve::None);
        assert_eq!(rl(2.0, 0.0), lb(2.0, 0.0));
        let single = Gvbr::new(vec![LeakyBucket::new(2.0, 3.0)]);
        assert_eq!(Curve::Gvbr(single), lb(2.0, 3.0));
    }

    #[test]
    fn test_worsen_identity_shape() {
        let a = lb(2.0, 3.0);
        let w = a.worsen_ac_async(1.0 + 2e-4, 4e-9);
        match w {
            Curve::LeakyBucket(lb) => {
                assert!(lb.rate() > 2.0);
                assert!(lb.burst() > 3.0);
            }
            other => panic!("expected LB, got {other}"),
        }
        let sc = rl(8.0, 1.0).worsen_sc_sync(1.0 + 2e-4, 4e-9, 1e-6);
        assert!(matches!(sc, Curve::MaxOfRateLatencies(_)));
    }

    #[test]
    fn test_packetization_penalty() {
        // capacity known and above the rate: (rho / c) * l_max
        let p = lb(2.0, 3.0).packetization_penalty(100.0, Some(8.0));
        assert_eq!(p, lb(0.0, 25.0));
        // capacity unknown: full packet
        let p = lb(2.0, 3.0).packetization_penalty(100.0, None);
        assert_eq!(p, lb(0.0, 100.0));
    }

    #[test]
    fn test_value_left_below_origin() {
        assert!(matches!(
            lb(1.0, 1.0).value_left(0.0),
            Err(CurveError::NotDefined(_))
        ));
        assert_eq!(lb(1.0, 1.0).value_left(2.0).unwrap(), 3.0);
    }

    #[test]
    fn test_rl_conv_bounded_delay() {
        let c = rl(5.0, 2.0).conv(&Curve::BoundedDelay(1.0)).unwrap();
        assert_eq!(c, rl(5.0, 3.0));
    }

    #[test]
    fn test_is_dominating() {
        assert!(lb(2.0, 5.0).is_dominating(&lb(2.0, 3.0)).unwrap());
        assert!(!lb(2.0, 3.0).is_dominating(&lb(2.0, 5.0)).unwrap());
    }
}
