//! Linear-time feedback arc set heuristic.

use super::{FasMethod, WeightedDigraph};

/// Topological-sort heuristic: fix an arbitrary linear order of the vertices
/// and take every backward edge. Always a valid FAS, rarely a minimum one.
#[derive(Debug, Clone, Default)]
pub struct TopologicalSortFas;

impl TopologicalSortFas {
    pub fn new() -> Self {
        Self
    }

    /// Variant over a residual graph: only the edges not yet `removed` are
    /// considered.
    pub(crate) fn fas_without(&self, graph: &WeightedDigraph, removed: &[bool]) -> Vec<usize> {
        graph
            .edges()
            .iter()
            .enumerate()
            .filter(|(j, (from, to))| !removed[*j] && from > to)
            .map(|(j, _)| j)
            .collect()
    }
}

impl FasMethod for TopologicalSortFas {
    fn fas(&self, graph: &WeightedDigraph) -> Vec<usize> {
        self.fas_without(graph, &vec![false; graph.edges().len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_breaks_cycles() {
        // 3-ring: exactly the backward edge 2 -> 0 is selected
        let g = WeightedDigraph::new(3, vec![(0, 1), (1, 2), (2, 0)]);
        let fas = TopologicalSortFas::new().fas(&g);
        assert_eq!(fas, vec![2]);
        let mut removed = vec![false; 3];
        for j in fas {
            removed[j] = true;
        }
        assert!(g.is_acyclic_without(&removed));
    }

    #[test]
    fn test_heuristic_on_dag_is_empty() {
        let g = WeightedDigraph::new(3, vec![(0, 1), (0, 2), (1, 2)]);
        assert!(TopologicalSortFas::new().fas(&g).is_empty());
    }
}
