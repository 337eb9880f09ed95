//! SFA linear program.
//!
//! Separated flow analysis over the forest decomposition: every flow is cut
//! into single-server sub-flows whose bursts are the unknowns. The burst
//! after a server grows by `rho * theta` with `theta = T + b_cross / R`;
//! the per-flow delay then follows in closed form from the residual rates
//! and latencies along the path.

use std::fmt::Write as _;
use std::path::Path;

use crate::model::LpNetwork;
use crate::solver::{LpError, LpSolver};

/// SFA linear-program constructor.
pub struct SfaLp<'a> {
    network: &'a LpNetwork,
    forest: LpNetwork,
    list_first: Vec<usize>,
}

impl<'a> SfaLp<'a> {
    pub fn new(network: &'a LpNetwork) -> Self {
        let (forest, list_first, _removed) = network.decomposition(&[]);
        Self {
            network,
            forest,
            list_first,
        }
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

    fn burst_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* sigma variables */");
        for i in 0..self.network.num_flows() {
            for (position, f) in self.sub_flows_of(i).enumerate() {
                if position == 0 {
                    let _ = writeln!(
                        out,
                        "x{f} = {sigma};",
                        sigma = self.network.flows[i].arrival[0].sigma
                    );
                    continue;
                }
                // burst after the previous server: theta = T + b_cross / R
                let prev = f - 1;
                let j = self.forest.flows[prev].path[0];
                let rho = self.forest.flows[f].arrival[0].rho;
                let service = self.network.servers[j].service[0];
                let _ = write!(out, "x{f} = x{prev} ");
                for k in &self.forest.flows_in_server[j] {
                    if *k != prev {
                        let _ = write!(out, "+ {factor} x{k} ", factor = rho / service.rate);
                    }
                }
                let _ = writeln!(out, "+ {latency_term};", latency_term = rho * service.latency);
            }
        }
    }

    /// The complete program text: maximize the sub-flow bursts under the
    /// propagation equalities.
    pub fn program(&self) -> String {
        let mut out = String::new();
        out.push_str("max:");
        for f in 0..self.forest.num_flows() {
            let _ = write!(out, "+ x{f} ");
        }
        out.push_str(";\n");
        self.burst_constraints(&mut out);
        out
    }

    /// Solve for the sub-flow bursts; infinite bursts when unsolved.
    fn sub_flow_bursts(&self, solver: &LpSolver, dir: &Path) -> Result<Vec<f64>, LpError> {
        let path = crate::solver::write_program(dir, "sfa.lp", &self.program())?;
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
                if let Ok(f) = index.parse::<usize>() {
                    if f < bursts.len() {
                        bursts[f] = value;
                    }
                }
            }
        }
        Ok(bursts)
    }

    /// End-to-end bounds of all flows, closed form over the solved bursts.
    pub fn all_delays(&self, solver: &LpSolver, dir: &Path) -> Result<Vec<f64>, LpError> {
        let bursts = self.sub_flow_bursts(solver, dir)?;

        // aggregate burst and rate per server, over the solved sub-flows
        let num_servers = self.network.num_servers();
        let mut sum_sigma = vec![0.0f64; num_servers];
        let mut sum_rho = vec![0.0f64; num_servers];
        for (f, flow) in self.forest.flows.iter().enumerate() {
            let j = flow.path[0];
            sum_sigma[j] += bursts[f];
            sum_rho[j] += flow.arrival[0].rho;
        }

        let mut delays = Vec::with_capacity(self.network.num_flows());
        for i in 0..self.network.num_flows() {
            let rho = self.network.flows[i].arrival[0].rho;
            let sigma = self.network.flows[i].arrival[0].sigma;
            let mut latency = 0.0f64;
            let mut residual_rate = f64::INFINITY;
            for f in self.sub_flows_of(i) {
                let j = self.forest.flows[f].path[0];
                let service = self.network.servers[j].service[0];
                latency += service.latency + (sum_sigma[j] - bursts[f]) / service.rate;
                residual_rate = residual_rate.min(service.rate - sum_rho[j] + rho);
            }
            if residual_rate <= 0.0 || !latency.is_finite() {
                delays.push(f64::INFINITY);
            } else {
                delays.push(latency + sigma / residual_rate);
            }
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

    fn tandem() -> LpNetwork {
        let servers = vec![
            LpServer::new(vec![RateLatency::new(4.0, 1.0)], vec![]),
            LpServer::new(vec![RateLatency::new(4.0, 1.0)], vec![]),
        ];
        let flows = vec![
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![0, 1]),
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![0]),
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![1]),
        ];
        LpNetwork::new(servers, flows, Vec::new())
    }

    #[test]
    fn test_program_structure() {
        let net = tandem();
        let sfa = SfaLp::new(&net);
        let program = sfa.program();
        // flow 0 splits into sub-flows 0 (server 0) and 1 (server 1)
        assert!(program.starts_with("max:+ x0 + x1 + x2 + x3 ;"));
        assert!(program.contains("x0 = 1;"));
        assert!(program.contains("x2 = 1;"));
        assert!(program.contains("x3 = 1;"));
        // x1 propagates through server 0 with the cross burst of sub-flow 2
        assert!(program.contains("x1 = x0 + 0.25 x2 + 1;"));
    }

    #[test]
    fn test_sub_flow_ranges() {
        let net = tandem();
        let sfa = SfaLp::new(&net);
        assert_eq!(sfa.sub_flows_of(0), 0..2);
        assert_eq!(sfa.sub_flows_of(1), 2..3);
        assert_eq!(sfa.sub_flows_of(2), 3..4);
    }
}
