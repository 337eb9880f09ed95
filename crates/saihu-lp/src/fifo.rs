//! Forest decomposition and fix-point closure for the PLP/ELP analyses.
//!
//! A general feed-forward (or cyclic) network is decomposed into a forest:
//! each server keeps at most one forward successor, every other edge is cut
//! and the flows crossing a cut restart with an unknown burst. The unknown
//! bursts are closed either by one joint linear program (cyclic case) or by
//! recursive backlog computations (feed-forward case); per-flow delays are
//! then sums of per-segment tree delays.

use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;

use crate::model::LpNetwork;
use crate::solver::{LpError, LpSolver};
use crate::tree::{ConstraintFamily, TreeLp};
use crate::{elp::ElpConstraints, plp::PlpConstraints, sfa::SfaLp, tfa::TfaLp};

/// The forest edges: for each server, the smallest-numbered forward
/// successor is kept.
pub fn edges_forest(network: &LpNetwork) -> Vec<(usize, usize)> {
    let n = network.num_servers();
    let mut out = Vec::new();
    for i in 0..n {
        let next = network.successors[i]
            .iter()
            .filter(|k| **k > i)
            .min()
            .copied();
        if let Some(next) = next {
            out.push((i, next));
        }
    }
    out
}

/// PLP/ELP analysis of a network through its forest decomposition.
pub struct FifoLp {
    network: LpNetwork,
    forest: LpNetwork,
    list_first: Vec<usize>,
    family: ConstraintFamily,
    include_sfa: bool,
    include_tfa: bool,
}

impl FifoLp {
    pub fn new(network: LpNetwork, family: ConstraintFamily) -> Self {
        let edges = edges_forest(&network);
        let (forest, list_first, _removed) = network.decomposition(&edges);
        Self {
            network,
            forest,
            list_first,
            family,
            include_sfa: false,
            include_tfa: false,
        }
    }

    /// Tighten the polynomial programs with SFA delay rows.
    pub fn with_sfa(mut self) -> Self {
        self.include_sfa = true;
        self
    }

    /// Tighten the polynomial programs with TFA delay rows.
    pub fn with_tfa(mut self) -> Self {
        self.include_tfa = true;
        self
    }

    /// The sub-flow indices of one original flow.
    fn sub_flows_of(&self, flow: usize) -> std::ops::Range<usize> {
        let start = self.list_first[flow];
        let end = self
            .list_first
            .get(flow + 1)
            .copied()
            .unwrap_or(self.forest.num_flows());
        start..end
    }

    /// Per-server TFA bounds usable as tightening rows; an unstable TFA
    /// cannot tighten anything.
    fn tightening_delays(&self, solver: &LpSolver, dir: &Path) -> Result<Option<Vec<f64>>, LpError> {
        if !self.include_tfa {
            return Ok(None);
        }
        let delays = TfaLp::new(&self.network).delay_servers(solver, dir)?;
        Ok(delays
            .iter()
            .all(|d| d.is_finite())
            .then_some(delays))
    }

    /// Write the constraints of one sub-tree of the fix-point program: the
    /// sub-network rooted at sub-flow `foi`, whose closure burst becomes the
    /// variable `x{foi + 1}`.
    fn sub_tree_constraints(
        &self,
        foi: usize,
        tfa_delays: Option<&[f64]>,
        out: &mut String,
    ) -> Result<(), LpError> {
        let (net, new_foi, list_flows, list_servers) = self.forest.sub_network(foi)?;
        match self.family {
            ConstraintFamily::Polynomial => {
                let sub_tfa = tfa_delays
                    .map(|delays| list_servers.iter().map(|j| delays[*j]).collect::<Vec<f64>>());
                let plp = PlpConstraints::new(
                    &net,
                    new_foi,
                    Some(foi + 1),
                    Some(list_flows),
                    None,
                    sub_tfa,
                )?;
                plp.write_constraints(out);
            }
            ConstraintFamily::Exponential => {
                let elp = ElpConstraints::new(&net, new_foi, Some(foi + 1), Some(list_flows))?;
                elp.write_constraints(out);
            }
        }
        Ok(())
    }

    /// The joint fix-point program over all cut bursts.
    pub fn fix_point_program(&self, tfa_delays: Option<&[f64]>) -> Result<String, LpError> {
        let mut out = String::new();
        out.push_str("max: ");
        for i in 0..self.forest.num_flows() {
            let _ = write!(out, "+ x{i}");
        }
        out.push_str(";\n");
        for f in 0..self.network.num_flows() {
            for (position, i) in self.sub_flows_of(f).enumerate() {
                if position == 0 {
                    let _ = writeln!(
                        out,
                        "x{i} = {sigma};",
                        sigma = self.network.flows[f].arrival[0].sigma
                    );
                } else {
                    self.sub_tree_constraints(i - 1, tfa_delays, &mut out)?;
                }
            }
        }
        Ok(out)
    }

    /// Solve the fix-point program for the cut bursts.
    fn cut_bursts(&self, solver: &LpSolver, dir: &Path) -> Result<Vec<f64>, LpError> {
        let tfa = self.tightening_delays(solver, dir)?;
        let program = self.fix_point_program(tfa.as_deref())?;
        let path = crate::solver::write_program(dir, "fifo.lp", &program)?;
        let values = match solver.solve_file(&path) {
            Ok(values) => values,
            Err(LpError::Unsolved) => {
                return Ok(vec![f64::INFINITY; self.forest.num_flows()])
            }
            Err(other) => return Err(other),
        };
        let mut bursts = vec![0.0; self.forest.num_flows()];
        for (name, value) in values {
            if let Some(index) = name.strip_prefix('x') {
                if let Ok(i) = index.parse::<usize>() {
                    if i < bursts.len() {
                        bursts[i] = value;
                    }
                }
            }
        }
        Ok(bursts)
    }

    /// Feed-forward closure: each unknown burst is the backlog of the
    /// upstream sub-tree, computed recursively in dependency order.
    fn feed_forward_bursts(&self, solver: &LpSolver, dir: &Path) -> Result<Vec<f64>, LpError> {
        let mut sigma = vec![f64::INFINITY; self.forest.num_flows()];
        for f in 0..self.network.num_flows() {
            sigma[self.list_first[f]] = self.network.flows[f].arrival[0].sigma;
        }
        let mut forest = self.forest.clone();
        let firsts: Vec<usize> = self.list_first.clone();
        for i in 0..forest.num_flows() {
            if !firsts.contains(&i) {
                self.update_sigma(i, &mut sigma, &mut forest, solver, dir)?;
            }
        }
        Ok(sigma)
    }

    fn update_sigma(
        &self,
        flow: usize,
        sigma: &mut Vec<f64>,
        forest: &mut LpNetwork,
        solver: &LpSolver,
        dir: &Path,
    ) -> Result<(), LpError> {
        if sigma[flow].is_finite() {
            return Ok(());
        }
        let (_, _, dependencies, _) = forest.sub_network(flow - 1)?;
        for j in &dependencies {
            if sigma[*j].is_infinite() && *j != flow {
                self.update_sigma(*j, sigma, forest, solver, dir)?;
            }
        }
        // rebuild the sub-network with the bursts resolved so far
        let (mut sub_net, foi, list_flows, _) = forest.sub_network(flow - 1)?;
        for (local, global) in list_flows.iter().enumerate() {
            if sigma[*global].is_finite() {
                sub_net.flows[local].arrival[0].sigma = sigma[*global];
            }
        }
        let tree = TreeLp::new(&sub_net, foi, self.family, None, None)?;
        sigma[flow] = tree.backlog(solver, dir)?;
        forest.flows[flow].arrival[0].sigma = sigma[flow];
        debug!(flow, burst = sigma[flow], "resolved cut burst");
        Ok(())
    }

    /// The forest with every cut burst resolved.
    pub fn ff_equiv(&self, solver: &LpSolver, dir: &Path) -> Result<LpNetwork, LpError> {
        if self.forest.num_flows() == self.network.num_flows() {
            return Ok(self.network.clone());
        }
        let bursts = if self.network.is_feed_forward() {
            self.feed_forward_bursts(solver, dir)?
        } else {
            self.cut_bursts(solver, dir)?
        };
        let mut forest = self.forest.clone();
        for i in 0..forest.num_flows() {
            if !self.list_first.contains(&i) {
                forest.flows[i].arrival[0].sigma = bursts[i];
            }
        }
        Ok(forest)
    }

    /// End-to-end bounds of all flows: per flow, the sum of the tree delays
    /// of its sub-flows over the resolved forest.
    pub fn all_delays(&self, solver: &LpSolver, dir: &Path) -> Result<Vec<f64>, LpError> {
        let resolved = self.ff_equiv(solver, dir)?;
        let tfa = self.tightening_delays(solver, dir)?;
        let mut delays = Vec::with_capacity(self.network.num_flows());
        for f in 0..self.network.num_flows() {
            let mut total = 0.0f64;
            for i in self.sub_flows_of(f) {
                let (sub_net, new_foi, _list_flows, list_servers) = resolved.sub_network(i)?;
                let sub_tfa = tfa
                    .as_ref()
                    .map(|d| list_servers.iter().map(|j| d[*j]).collect::<Vec<f64>>());
                // the SFA tightening rows are flow-indexed, so they are
                // recomputed on the sub-tree itself
                let sub_sfa = if self.include_sfa {
                    let delays = SfaLp::new(&sub_net).all_delays(solver, dir)?;
                    delays
                        .iter()
                        .all(|d| d.is_finite())
                        .then_some(delays)
                } else {
                    None
                };
                let tree = TreeLp::new(&sub_net, new_foi, self.family, sub_sfa, sub_tfa)?;
                total += tree.delay(solver, dir)?;
            }
            delays.push(total);
        }
        Ok(delays)
    }

    /// End-to-end bound of one flow.
    pub fn delay(&self, foi: usize, solver: &LpSolver, dir: &Path) -> Result<f64, LpError> {
        Ok(self.all_delays(solver, dir)?[foi])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LpFlow, LpServer, RateLatency, TokenBucket};

    fn tb(sigma: f64, rho: f64) -> TokenBucket {
        TokenBucket::new(sigma, rho)
    }

    fn diamond() -> LpNetwork {
        // 0 -> 1 -> 3 and 0 -> 2 -> 3: not a forest, edge (2,3) or (1,3)
        // must be cut
        let servers = (0..4)
            .map(|_| LpServer::new(vec![RateLatency::new(8.0, 1.0)], vec![]))
            .collect();
        let flows = vec![
            LpFlow::new(vec![tb(1.0, 1.0)], vec![0, 1, 3]),
            LpFlow::new(vec![tb(1.0, 1.0)], vec![0, 2, 3]),
        ];
        LpNetwork::new(servers, flows, Vec::new())
    }

    #[test]
    fn test_edges_forest_keeps_one_successor() {
        let net = diamond();
        let edges = edges_forest(&net);
        // server 0 keeps its smallest forward successor only
        assert!(edges.contains(&(0, 1)));
        assert!(!edges.contains(&(0, 2)));
        assert!(edges.contains(&(1, 3)));
        assert!(edges.contains(&(2, 3)));
    }

    #[test]
    fn test_decomposition_cut_count() {
        let net = diamond();
        let fifo = FifoLp::new(net, ConstraintFamily::Polynomial);
        // flow 1 loses the edge (0, 2): one extra sub-flow
        assert_eq!(fifo.forest.num_flows(), 3);
        assert_eq!(fifo.list_first, vec![0, 1]);
    }

    #[test]
    fn test_fix_point_program_writes_subtrees() {
        let net = diamond();
        let fifo = FifoLp::new(net, ConstraintFamily::Polynomial);
        let program = fifo.fix_point_program(None).unwrap();
        assert!(program.starts_with("max: + x0+ x1+ x2;"));
        // initial bursts for the two original flows
        assert!(program.contains("x0 = 1;"));
        assert!(program.contains("x1 = 1;"));
        // the cut burst x2 is closed through a sub-tree program
        assert!(program.contains("x2 = "));
    }
}
