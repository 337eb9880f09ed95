//! MILP backend abstraction for the exact MFAS solver.
//!
//! The exact solver only needs one operation: minimize `sum(costs[j] *
//! y[j])` over binary `y` subject to cycle-cover rows `sum_{j in row} y[j]
//! >= 1`. Any backend satisfying [`MilpBackend`] can be plugged in; the
//! default is an exact branch-and-bound over the binary cover problem.

use thiserror::Error;

/// The lazy cycle-cover constraint matrix: one row per known cycle, each row
/// listing the edge indices of that cycle.
#[derive(Debug, Clone, Default)]
pub struct CoverMatrix {
    rows: Vec<Vec<usize>>,
    num_columns: usize,
}

impl CoverMatrix {
    pub fn new(num_columns: usize) -> Self {
        Self {
            rows: Vec::new(),
            num_columns,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.rows
    }

    /// Add a cycle row (sorted edge indices). Returns false when the row is
    /// already present.
    pub fn push_row(&mut self, mut row: Vec<usize>) -> bool {
        row.sort_unstable();
        row.dedup();
        if self.rows.contains(&row) {
            return false;
        }
        self.rows.push(row);
        true
    }
}

#[derive(Error, Debug)]
pub enum MilpError {
    #[error("MILP backend failed: {0}")]
    Backend(String),
}

/// A solver for the binary minimum-cost cover problem.
pub trait MilpBackend {
    /// Minimize `sum(costs[j] * y[j])` subject to, for every row of
    /// `cover`, `sum_{j in row} y[j] >= 1`, with `y` binary. `warm_start` is
    /// a feasible selection usable as an incumbent.
    fn solve(
        &self,
        cover: &CoverMatrix,
        costs: &[f64],
        warm_start: &[bool],
    ) -> Result<Vec<bool>, MilpError>;
}

/// Exact branch-and-bound over the cover problem.
///
/// Branches on the edges of the first uncovered row; the incumbent starts
/// from the warm start. Complete enumeration with cost pruning, exact for
/// the instance sizes produced by flow-induced graphs.
#[derive(Debug, Clone, Default)]
pub struct BranchAndBoundBackend;

impl BranchAndBoundBackend {
    pub fn new() -> Self {
        Self
    }

    fn first_uncovered<'a>(cover: &'a CoverMatrix, selected: &[bool]) -> Option<&'a Vec<usize>> {
        cover
            .rows()
            .iter()
            .find(|row| !row.iter().any(|j| selected[*j]))
    }

    fn branch(
        cover: &CoverMatrix,
        costs: &[f64],
        selected: &mut Vec<bool>,
        forbidden: &mut Vec<bool>,
        cost_so_far: f64,
        best: &mut (f64, Vec<bool>),
    ) {
        if cost_so_far >= best.0 {
            return;
        }
        let Some(row) = Self::first_uncovered(cover, selected) else {
            // feasible and cheaper than the incumbent
            best.0 = cost_so_far;
            best.1 = selected.clone();
            return;
        };
        let row = row.clone();
        let mut locally_forbidden = Vec::new();
        for j in row {
            if forbidden[j] {
                continue;
            }
            selected[j] = true;
            Self::branch(cover, costs, selected, forbidden, cost_so_far + costs[j], best);
            selected[j] = false;
            // later branches of this row must not re-pick the edge,
            // otherwise the same cover is enumerated repeatedly
            forbidden[j] = true;
            locally_forbidden.push(j);
        }
        for j in locally_forbidden {
            forbidden[j] = false;
        }
    }
}

impl MilpBackend for BranchAndBoundBackend {
    fn solve(
        &self,
        cover: &CoverMatrix,
        costs: &[f64],
        warm_start: &[bool],
    ) -> Result<Vec<bool>, MilpError> {
        let n = cover.num_columns();
        if costs.len() != n || warm_start.len() != n {
            return Err(MilpError::Backend(
                "costs/warm start do not match the column count".into(),
            ));
        }
        let warm_cost: f64 = costs
            .iter()
            .zip(warm_start.iter())
            .filter(|(_, s)| **s)
            .map(|(c, _)| *c)
            .sum();
        let mut best = (warm_cost, warm_start.to_vec());
        let mut selected = vec![false; n];
        let mut forbidden = vec![false; n];
        Self::branch(cover, costs, &mut selected, &mut forbidden, 0.0, &mut best);
        Ok(best.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_row_picks_cheapest() {
        let mut cover = CoverMatrix::new(3);
        cover.push_row(vec![0, 1, 2]);
        let costs = [3.0, 1.0, 2.0];
        let warm = [true, false, false];
        let sel = BranchAndBoundBackend::new()
            .solve(&cover, &costs, &warm)
            .unwrap();
        assert_eq!(sel, vec![false, true, false]);
    }

    #[test]
    fn test_overlapping_rows_share_an_edge() {
        // rows {0,1} and {1,2}: edge 1 covers both at cost 1
        let mut cover = CoverMatrix::new(3);
        cover.push_row(vec![0, 1]);
        cover.push_row(vec![1, 2]);
        let costs = [1.0, 1.0, 1.0];
        let warm = [true, false, true];
        let sel = BranchAndBoundBackend::new()
            .solve(&cover, &costs, &warm)
            .unwrap();
        assert_eq!(sel, vec![false, true, false]);
    }

    #[test]
    fn test_disjoint_rows_need_two_edges() {
        let mut cover = CoverMatrix::new(4);
        cover.push_row(vec![0, 1]);
        cover.push_row(vec![2, 3]);
        let costs = [1.0, 5.0, 5.0, 1.0];
        let warm = [true, true, true, true];
        let sel = BranchAndBoundBackend::new()
            .solve(&cover, &costs, &warm)
            .unwrap();
        assert_eq!(sel, vec![true, false, false, true]);
    }

    #[test]
    fn test_empty_cover_selects_nothing() {
        let cover = CoverMatrix::new(2);
        let sel = BranchAndBoundBackend::new()
            .solve(&cover, &[1.0, 1.0], &[true, true])
            .unwrap();
        assert_eq!(sel, vec![false, false]);
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let mut cover = CoverMatrix::new(3);
        assert!(cover.push_row(vec![2, 0]));
        assert!(!cover.push_row(vec![0, 2]));
        assert_eq!(cover.rows().len(), 1);
    }
}
