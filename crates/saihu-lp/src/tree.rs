//! Delay and backlog programs over a single tree.
//!
//! Wraps the polynomial or exponential constraint family with a delay (or
//! backlog) objective and drives the solver. The flow of interest must end
//! at the sink of the tree, which the sub-network extraction guarantees.

use std::fmt::Write as _;
use std::path::Path;

use crate::elp::ElpConstraints;
use crate::model::LpNetwork;
use crate::plp::PlpConstraints;
use crate::solver::{LpError, LpSolver};

/// Which constraint family a tree program uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintFamily {
    /// Quadratic number of dates (PLP).
    Polynomial,
    /// Exponential number of dates (ELP), tighter.
    Exponential,
}

enum Family<'a> {
    Poly(PlpConstraints<'a>),
    Exp(ElpConstraints<'a>),
}

/// Linear analysis of one flow over a FIFO tree.
pub struct TreeLp<'a> {
    network: &'a LpNetwork,
    foi: usize,
    family: Family<'a>,
}

impl<'a> TreeLp<'a> {
    pub fn new(
        network: &'a LpNetwork,
        foi: usize,
        family: ConstraintFamily,
        delays_flow: Option<Vec<f64>>,
        delays_server: Option<Vec<f64>>,
    ) -> Result<Self, LpError> {
        let family = match family {
            ConstraintFamily::Polynomial => Family::Poly(PlpConstraints::new(
                network,
                foi,
                None,
                None,
                delays_flow,
                delays_server,
            )?),
            ConstraintFamily::Exponential => {
                Family::Exp(ElpConstraints::new(network, foi, None, None)?)
            }
        };
        Ok(Self {
            network,
            foi,
            family,
        })
    }

    fn t_min(&self, server: usize) -> usize {
        match &self.family {
            Family::Poly(plp) => plp.t_min[server],
            Family::Exp(elp) => elp.t_min[server],
        }
    }

    fn write_common_constraints(&self, out: &mut String) {
        match &self.family {
            Family::Poly(plp) => {
                plp.time_constraints(out);
                plp.arrival_constraints(out);
                plp.fifo_constraints(out);
                plp.service_constraints(out);
                plp.monotony_constraints(out);
                plp.shaping_constraints(out);
                plp.arrival_shaping_constraints(out, true);
                plp.sfa_delay_constraints(out);
                plp.tfa_delay_constraints(out);
            }
            Family::Exp(elp) => {
                elp.time_constraints(out);
                elp.arrival_constraints(out);
                elp.fifo_constraints(out);
                elp.service_constraints(out);
                elp.monotony_constraints(out);
                elp.shaping_constraints(out);
                elp.arrival_shaping_constraints(out, true);
            }
        }
    }

    fn burst_constraints(&self, out: &mut String) {
        for i in 0..self.network.num_flows() {
            let _ = writeln!(
                out,
                "x{i} = {sigma};",
                sigma = self.network.flows[i].arrival[0].sigma
            );
        }
    }

    /// The delay program: maximize the horizontal distance between the
    /// flow's entrance date and the sink date.
    pub fn delay_program(&self) -> Result<String, LpError> {
        let last = *self.network.path(self.foi).last().expect("non-empty path");
        if last != self.network.num_servers() - 1 {
            return Err(LpError::Parse(
                "flow of interest does not stop at the sink of the tree".into(),
            ));
        }
        let first = self.network.path(self.foi)[0];
        let mut out = String::new();
        let _ = writeln!(out, "max: t0e0 - t{}e0;", self.t_min(first));
        self.write_common_constraints(&mut out);
        self.burst_constraints(&mut out);
        Ok(out)
    }

    /// The backlog program: maximize the flow's data still inside the tree.
    pub fn backlog_program(&self) -> String {
        let mut out = String::new();
        match &self.family {
            Family::Poly(plp) => plp.backlog_objective(&mut out),
            Family::Exp(elp) => elp.backlog_objective(&mut out),
        }
        self.write_common_constraints(&mut out);
        self.burst_constraints(&mut out);
        out
    }

    /// Solve the delay program; infinite when unsolved.
    pub fn delay(&self, solver: &LpSolver, dir: &Path) -> Result<f64, LpError> {
        let path = crate::solver::write_program(dir, "tree_delay.lp", &self.delay_program()?)?;
        match solver.solve_objective(&path) {
            Ok(value) => Ok(value),
            Err(LpError::Unsolved) => Ok(f64::INFINITY),
            Err(other) => Err(other),
        }
    }

    /// Solve the backlog program; infinite when unsolved.
    pub fn backlog(&self, solver: &LpSolver, dir: &Path) -> Result<f64, LpError> {
        let path = crate::solver::write_program(dir, "tree_backlog.lp", &self.backlog_program())?;
        match solver.solve_objective(&path) {
            Ok(value) => Ok(value),
            Err(LpError::Unsolved) => Ok(f64::INFINITY),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LpFlow, LpServer, RateLatency, TokenBucket};

    fn tandem() -> LpNetwork {
        let servers = vec![
            LpServer::new(vec![RateLatency::new(4.0, 1.0)], vec![]),
            LpServer::new(vec![RateLatency::new(4.0, 1.0)], vec![]),
        ];
        let flows = vec![
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![0, 1]),
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![1]),
        ];
        LpNetwork::new(servers, flows, Vec::new())
    }

    #[test]
    fn test_delay_program_objective() {
        let net = tandem();
        let tree = TreeLp::new(&net, 0, ConstraintFamily::Polynomial, None, None).unwrap();
        let program = tree.delay_program().unwrap();
        // flow 0 enters at server 0 whose window starts at date 3
        assert!(program.starts_with("max: t0e0 - t3e0;"));
        assert!(program.contains("x0 = 1;"));
        assert!(program.contains("x1 = 1;"));
    }

    #[test]
    fn test_delay_rejects_inner_flow() {
        let net = tandem();
        // flow ending at server 0 cannot be the foi of this tree
        let servers = net.servers.clone();
        let flows = vec![
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![0]),
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![0, 1]),
        ];
        let inner = LpNetwork::new(servers, flows, Vec::new());
        let tree = TreeLp::new(&inner, 0, ConstraintFamily::Polynomial, None, None).unwrap();
        assert!(tree.delay_program().is_err());
    }

    #[test]
    fn test_backlog_program_objective() {
        let net = tandem();
        let tree = TreeLp::new(&net, 0, ConstraintFamily::Exponential, None, None).unwrap();
        let program = tree.backlog_program();
        assert!(program.starts_with("max: f0s0t0e0 - f0s2t0e0;"));
    }
}
