//! Minimum feedback arc set solvers.
//!
//! Given a directed graph with non-negative edge costs, a feedback arc set
//! (FAS) is a set of edges whose removal leaves a DAG. The cyclic xTFA
//! driver cuts the flow-induced graph along such a set; the smaller the set,
//! the fewer assumptions the fix-point has to converge on.
//!
//! Two methods are provided:
//! - [`TopologicalSortFas`]: linear-time heuristic, non-optimal;
//! - [`BaharevFas`]: exact minimum-cost solver (MILP with lazy cycle
//!   constraints).

mod baharev;
mod heuristic;
mod milp;

pub use baharev::BaharevFas;
pub use heuristic::TopologicalSortFas;
pub use milp::{BranchAndBoundBackend, CoverMatrix, MilpBackend};

use std::collections::{HashMap, VecDeque};

/// A directed graph with non-negative edge costs, indexed edge list.
///
/// Nodes are `0..num_nodes`; edges are referred to by their index in the
/// edge list everywhere in this module.
#[derive(Debug, Clone)]
pub struct WeightedDigraph {
    num_nodes: usize,
    edges: Vec<(usize, usize)>,
    costs: Vec<f64>,
}

impl WeightedDigraph {
    /// Build a graph with unit edge costs.
    pub fn new(num_nodes: usize, edges: Vec<(usize, usize)>) -> Self {
        let costs = vec![1.0; edges.len()];
        Self {
            num_nodes,
            edges,
            costs,
        }
    }

    /// Build a graph with explicit edge costs.
    pub fn with_costs(num_nodes: usize, edges: Vec<(usize, usize)>, costs: Vec<f64>) -> Self {
        assert_eq!(edges.len(), costs.len(), "one cost per edge");
        Self {
            num_nodes,
            edges,
            costs,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    /// Total cost of a selection of edges.
    pub fn selection_cost(&self, selected: &[bool]) -> f64 {
        self.costs
            .iter()
            .zip(selected.iter())
            .filter(|(_, s)| **s)
            .map(|(c, _)| *c)
            .sum()
    }

    /// True when the graph without the `removed` edges is acyclic
    /// (Kahn's algorithm).
    pub fn is_acyclic_without(&self, removed: &[bool]) -> bool {
        let mut indeg = vec![0usize; self.num_nodes];
        for (j, (_, to)) in self.edges.iter().enumerate() {
            if !removed[j] {
                indeg[*to] += 1;
            }
        }
        let mut queue: VecDeque<usize> = (0..self.num_nodes).filter(|n| indeg[*n] == 0).collect();
        let mut seen = 0usize;
        // adjacency over the residual edges
        let mut out: Vec<Vec<usize>> = vec![Vec::new(); self.num_nodes];
        for (j, (from, to)) in self.edges.iter().enumerate() {
            if !removed[j] {
                out[*from].push(*to);
            }
        }
        while let Some(node) = queue.pop_front() {
            seen += 1;
            for next in &out[node] {
                indeg[*next] -= 1;
                if indeg[*next] == 0 {
                    queue.push_back(*next);
                }
            }
        }
        seen == self.num_nodes
    }

    /// Shortest directed path (as a node list) from `from` to `to` in the
    /// graph without the `removed` edges; `None` when unreachable.
    pub fn shortest_path_without(
        &self,
        from: usize,
        to: usize,
        removed: &[bool],
    ) -> Option<Vec<usize>> {
        let mut out: Vec<Vec<usize>> = vec![Vec::new(); self.num_nodes];
        for (j, (a, b)) in self.edges.iter().enumerate() {
            if !removed[j] {
                out[*a].push(*b);
            }
        }
        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        let mut visited = vec![false; self.num_nodes];
        visited[from] = true;
        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut path = vec![to];
                let mut cur = to;
                while cur != from {
                    cur = parent[&cur];
                    path.push(cur);
                }
                path.reverse();
                return Some(path);
            }
            for next in &out[node] {
                if !visited[*next] {
                    visited[*next] = true;
                    parent.insert(*next, node);
                    queue.push_back(*next);
                }
            }
        }
        None
    }

    /// The edge indices of a simple cycle given as a closed node walk
    /// `n0, n1, ..., n0`.
    pub fn cycle_edges(&self, walk: &[usize]) -> Vec<usize> {
        let mut out = Vec::new();
        for pair in walk.windows(2) {
            if let Some(j) = self
                .edges
                .iter()
                .position(|(a, b)| *a == pair[0] && *b == pair[1])
            {
                out.push(j);
            }
        }
        out.sort_unstable();
        out
    }
}

/// A method computing a feedback arc set for a weighted directed graph.
///
/// The result is a set of edge indices whose removal leaves a DAG.
pub trait FasMethod {
    fn fas(&self, graph: &WeightedDigraph) -> Vec<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclicity_check() {
        let g = WeightedDigraph::new(3, vec![(0, 1), (1, 2), (2, 0)]);
        assert!(!g.is_acyclic_without(&[false, false, false]));
        assert!(g.is_acyclic_without(&[false, false, true]));
    }

    #[test]
    fn test_shortest_path() {
        let g = WeightedDigraph::new(4, vec![(0, 1), (1, 2), (2, 3), (0, 3)]);
        let path = g
            .shortest_path_without(0, 3, &[false; 4])
            .expect("path exists");
        assert_eq!(path, vec![0, 3]);
        let path = g
            .shortest_path_without(0, 3, &[false, false, false, true])
            .expect("long path exists");
        assert_eq!(path, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cycle_edges() {
        let g = WeightedDigraph::new(3, vec![(0, 1), (1, 2), (2, 0)]);
        assert_eq!(g.cycle_edges(&[0, 1, 2, 0]), vec![0, 1, 2]);
    }
}
