//! Generalized VBR curves: min-plus convolutions of leaky buckets.
//!
//! A GVBR is stored canonically as the list of its leaky buckets together
//! with the abscissae where the active segment changes and the index of the
//! segment active on each interval. Canonicalization removes duplicates,
//! collapses intersections at `t <= 0` into dominations and walks the
//! remaining intersections from the segment dominant at the origin.

use serde::{Deserialize, Serialize};

use super::lb::LeakyBucket;

/// Min-plus convolution (pointwise minimum) of two or more leaky buckets.
///
/// Canonical invariant: along `active`, bursts strictly increase and rates
/// strictly decrease; `discontinuities` holds the abscissa of each segment
/// change (`active.len() == discontinuities.len() + 1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gvbr {
    list: Vec<LeakyBucket>,
    discontinuities: Vec<f64>,
    active: Vec<usize>,
}

impl Gvbr {
    /// Build a canonical GVBR from a list of leaky buckets.
    ///
    /// The list must be non-empty; use [`crate::curve::Curve::None`] for the
    /// empty aggregate.
    pub fn new(buckets: Vec<LeakyBucket>) -> Gvbr {
        let list = Self::dedup(buckets);
        let mut gvbr = Gvbr {
            list,
            discontinuities: Vec::new(),
            active: Vec::new(),
        };
        gvbr.canonicalize();
        gvbr
    }

    fn dedup(buckets: Vec<LeakyBucket>) -> Vec<LeakyBucket> {
        let mut out: Vec<LeakyBucket> = Vec::with_capacity(buckets.len());
        for lb in buckets {
            if !out.iter().any(|o| *o == lb) {
                out.push(lb);
            }
        }
        out
    }

    /// Index of the leaky bucket dominant at the origin: smallest burst,
    /// ties broken by smallest rate.
    fn first_left_index(&self) -> usize {
        let mut candidate = 0;
        for i in 1..self.list.len() {
            let lb = &self.list[i];
            let cur = &self.list[candidate];
            if lb.burst() < cur.burst()
                || (lb.burst() == cur.burst() && lb.rate() < cur.rate())
            {
                candidate = i;
            }
        }
        candidate
    }

    /// Recompute `discontinuities` and `active` from the bucket list.
    fn canonicalize(&mut self) {
        self.discontinuities.clear();
        self.active.clear();
        if self.list.is_empty() {
            return;
        }

        // Pairwise intersections, grouped by abscissa. Intersections at
        // t <= 0 collapse into a domination and never appear here.
        let mut crossings: Vec<(f64, usize, usize)> = Vec::new();
        for a in 0..self.list.len() {
            for b in (a + 1)..self.list.len() {
                let (x, a_below) = self.list[a].intersection(&self.list[b]);
                if let Some(x) = x {
                    let (before, after) = if a_below { (a, b) } else { (b, a) };
                    crossings.push((x, before, after));
                }
            }
        }
        crossings.sort_by(|p, q| p.0.total_cmp(&q.0));

        let mut current = self.first_left_index();
        let mut i = 0;
        while i < crossings.len() {
            // All crossings sharing this abscissa are handled as one group:
            // several curves may intersect at the same point.
            let x = crossings[i].0;
            let mut group_end = i;
            while group_end < crossings.len() && crossings[group_end].0 == x {
                group_end += 1;
            }
            let group = &crossings[i..group_end];

            // Follow the chain of hand-overs starting from the segment
            // currently below; among candidates pick the smallest rate.
            let mut next = current;
            let mut found = false;
            loop {
                let candidates: Vec<usize> = group
                    .iter()
                    .filter(|(_, before, _)| *before == next)
                    .map(|(_, _, after)| *after)
                    .collect();
                if candidates.is_empty() {
                    break;
                }
                found = true;
                next = candidates
                    .into_iter()
                    .min_by(|a, b| self.list[*a].rate().total_cmp(&self.list[*b].rate()))
                    .expect("candidates checked non-empty");
            }
            if found {
                self.active.push(current);
                self.discontinuities.push(x);
                current = next;
            }
            i = group_end;
        }
        self.active.push(current);
    }

    pub fn buckets(&self) -> &[LeakyBucket] {
        &self.list
    }

    pub fn discontinuities(&self) -> &[f64] {
        &self.discontinuities
    }

    /// The active leaky buckets, in segment order.
    pub fn segments(&self) -> impl Iterator<Item = &LeakyBucket> {
        self.active.iter().map(|i| &self.list[*i])
    }

    /// The segment active at the origin (smallest burst).
    pub fn first_segment(&self) -> &LeakyBucket {
        &self.list[self.active[0]]
    }

    /// The segment active in the long run (smallest rate, largest burst).
    pub fn last_segment(&self) -> &LeakyBucket {
        &self.list[*self.active.last().expect("canonical GVBR is non-empty")]
    }

    /// The burst of the most bursty segment.
    pub fn burst(&self) -> f64 {
        self.last_segment().burst()
    }

    /// The long-term rate.
    pub fn rate(&self) -> f64 {
        self.last_segment().rate()
    }

    /// The segment active just after abscissa `s`.
    pub fn segment_at(&self, s: f64) -> &LeakyBucket {
        for (i, d) in self.discontinuities.iter().enumerate() {
            if *d >= s {
                return &self.list[self.active[i]];
            }
        }
        self.last_segment()
    }

    /// The segment active just before abscissa `x` (at a discontinuity this
    /// is the segment on the left).
    pub fn segment_before(&self, x: f64) -> &LeakyBucket {
        for (i, d) in self.discontinuities.iter().enumerate() {
            if *d == x {
                return &self.list[self.active[i]];
            }
        }
        self.segment_at(x)
    }

    /// Right limit of the curve value at `s`.
    pub fn value_right(&self, s: f64) -> f64 {
        self.segment_at(s).value_right(s)
    }

    /// Curve value at `s` (0 at the origin).
    pub fn value(&self, s: f64) -> f64 {
        if s == 0.0 {
            0.0
        } else {
            self.value_right(s)
        }
    }

    /// Abscissa at which the curve reaches level `y` (maximum over buckets,
    /// since the curve is the minimum).
    pub fn y_to_x(&self, y: f64) -> f64 {
        self.list
            .iter()
            .map(|lb| lb.y_to_x(y))
            .fold(0.0, f64::max)
    }

    /// Pointwise sum with another GVBR: enumerate all discontinuities of
    /// both curves, sum the segments active just before each, then add the
    /// sum of the two final segments and re-canonicalize.
    pub fn sum(&self, other: &Gvbr) -> Gvbr {
        let mut xs: Vec<f64> = self
            .discontinuities
            .iter()
            .chain(other.discontinuities.iter())
            .copied()
            .collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        xs.dedup();

        let mut buckets = Vec::with_capacity(xs.len() + 1);
        for x in &xs {
            buckets.push(self.segment_before(*x).sum(other.segment_before(*x)));
        }
        buckets.push(self.last_segment().sum(other.last_segment()));
        Gvbr::new(buckets)
    }

    /// Convolution with more leaky buckets: pointwise min, so the lists are
    /// simply merged and re-canonicalized.
    pub fn conv_with(&self, extra: &[LeakyBucket]) -> Gvbr {
        let mut buckets = self.list.clone();
        buckets.extend_from_slice(extra);
        Gvbr::new(buckets)
    }

    /// Deconvolution with a pure delay of `d` seconds applied to every
    /// bucket.
    pub fn deconv_delay(&self, d: f64) -> Gvbr {
        Gvbr::new(self.list.iter().map(|lb| lb.deconv_delay(d)).collect())
    }

    /// True when a single segment remains.
    pub fn is_single_segment(&self) -> bool {
        self.discontinuities.is_empty()
    }

    /// Round every burst up to the next integer (fix-point convergence).
    pub fn ceil_bursts(&mut self) {
        for lb in &mut self.list {
            lb.ceil_burst();
        }
        self.canonicalize();
    }
}

impl PartialEq for Gvbr {
    /// Equality compares the canonical form: same discontinuity set and the
    /// same active segment on each interval.
    fn eq(&self, other: &Self) -> bool {
        if self.discontinuities.len() != other.discontinuities.len() {
            return false;
        }
        for (a, b) in self.discontinuities.iter().zip(other.discontinuities.iter()) {
            if a != b {
                return false;
            }
        }
        self.active
            .iter()
            .zip(other.active.iter())
            .all(|(a, b)| self.list[*a] == other.list[*b])
    }
}

impl std::fmt::Display for Gvbr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GVBR")?;
        for lb in self.segments() {
            write!(f, "({:.2e},{:.2e})", lb.rate(), lb.burst())?;
        }
        write!(f, "(bit/s,bit)")
    }
}

/// A GVBR shifted right by a latency: the output envelope of a bounded-delay
/// element followed by a GVBR-shaped element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayedGvbr {
    latency: f64,
    gvbr: Gvbr,
}

impl DelayedGvbr {
    pub fn new(latency: f64, gvbr: Gvbr) -> Self {
        Self { latency, gvbr }
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    pub fn gvbr(&self) -> &Gvbr {
        &self.gvbr
    }

    pub fn value(&self, s: f64) -> f64 {
        if s <= self.latency {
            0.0
        } else {
            self.gvbr.value(s - self.latency)
        }
    }

    pub fn value_right(&self, s: f64) -> f64 {
        if s < self.latency {
            0.0
        } else {
            self.gvbr.value_right(s - self.latency)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb(rate: f64, burst: f64) -> LeakyBucket {
        LeakyBucket::new(rate, burst)
    }

    #[test]
    fn test_two_segment_canonical() {
        // LB(2,3) x LB(4,1): segments LB(4,1) then LB(2,3), crossing at 1.0
        let g = Gvbr::new(vec![lb(2.0, 3.0), lb(4.0, 1.0)]);
        assert_eq!(g.discontinuities(), &[1.0]);
        assert_eq!(*g.first_segment(), lb(4.0, 1.0));
        assert_eq!(*g.last_segment(), lb(2.0, 3.0));
        assert_eq!(g.value_right(0.5), 3.0);
        assert_eq!(g.value_right(2.0), 7.0);
    }

    #[test]
    fn test_dominated_bucket_collapses() {
        // LB(3,2) dominates LB(2,1) nowhere on t > 0: LB(2,1) stays alone
        let g = Gvbr::new(vec![lb(2.0, 1.0), lb(3.0, 2.0)]);
        assert!(g.is_single_segment());
        assert_eq!(*g.first_segment(), lb(2.0, 1.0));
    }

    #[test]
    fn test_canonicalization_idempotent() {
        let g = Gvbr::new(vec![lb(2.0, 3.0), lb(4.0, 1.0), lb(8.0, 0.5)]);
        let again = Gvbr::new(g.buckets().to_vec());
        assert_eq!(g, again);
    }

    #[test]
    fn test_sum() {
        // (min(4t+1, 2t+3)) + LB(1,1): segment-wise sums
        let a = Gvbr::new(vec![lb(4.0, 1.0), lb(2.0, 3.0)]);
        let b = Gvbr::new(vec![lb(1.0, 1.0)]);
        let s = a.sum(&b);
        assert_eq!(*s.first_segment(), lb(5.0, 2.0));
        assert_eq!(*s.last_segment(), lb(3.0, 4.0));
    }

    #[test]
    fn test_deconv_delay() {
        let g = Gvbr::new(vec![lb(4.0, 1.0), lb(2.0, 3.0)]);
        let d = g.deconv_delay(0.5);
        assert_eq!(*d.first_segment(), lb(4.0, 3.0));
        assert_eq!(*d.last_segment(), lb(2.0, 4.0));
    }

    #[test]
    fn test_duplicate_removed() {
        let g = Gvbr::new(vec![lb(2.0, 3.0), lb(2.0, 3.0)]);
        assert!(g.is_single_segment());
        assert_eq!(g.buckets().len(), 1);
    }
}
