//! TFA and TFA++ linear programs.
//!
//! One delay variable per server, one burst variable per (flow, server).
//! Arrival, service, FIFO and burst-propagation rows encode the total-flow
//! iteration as a single program; with shaping rows (TFA++) the aggregate
//! entering a server through a link is additionally bounded by the link
//! capacity. For cyclic networks the program directly encodes the fix point,
//! no iteration needed.

use std::fmt::Write as _;
use std::path::Path;

use crate::model::{LpFlow, LpNetwork, TokenBucket};
use crate::solver::{LpError, LpSolver};

/// TFA linear-program constructor.
pub struct TfaLp<'a> {
    network: &'a LpNetwork,
    /// Include the maximum-service (link shaping) rows: TFA++ when set,
    /// plain TFA otherwise.
    use_shaping: bool,
}

fn arrival_segments(flow: &LpFlow) -> impl Iterator<Item = (f64, &TokenBucket)> {
    let base = flow.arrival[0].sigma;
    flow.arrival.iter().map(move |tb| (tb.sigma - base, tb))
}

impl<'a> TfaLp<'a> {
    pub fn new(network: &'a LpNetwork) -> Self {
        Self {
            network,
            use_shaping: true,
        }
    }

    /// Drop the shaping rows (plain TFA).
    pub fn without_shaping(mut self) -> Self {
        self.use_shaping = false;
        self
    }

    fn server_constraints(&self, out: &mut String) {
        let net = self.network;
        for j in 0..net.num_servers() {
            let _ = writeln!(out, "\n/* server {j} */");
            for i in &net.flows_in_server[j] {
                for (offset, tb) in arrival_segments(&net.flows[*i]) {
                    let _ = writeln!(
                        out,
                        "f{i}s{j}u{j} <= x{i}s{j} + {offset} + {rho} u{j};",
                        rho = tb.rho
                    );
                }
            }
            if self.use_shaping {
                for h in &net.predecessors[j] {
                    for tb in &net.servers[*h].shaping {
                        let mut row = String::new();
                        for i in net.edges().get(&(*h, j)).map(Vec::as_slice).unwrap_or(&[]) {
                            let _ = write!(row, "+ f{i}s{j}u{j}");
                        }
                        if !row.is_empty() {
                            let _ = writeln!(
                                out,
                                "{row} <= {sigma} + {rho} u{j};",
                                sigma = tb.sigma,
                                rho = tb.rho
                            );
                        }
                    }
                }
            }
            let _ = write!(out, "0");
            for i in &net.flows_in_server[j] {
                let _ = write!(out, "+ f{i}s{j}u{j}");
            }
            let _ = writeln!(out, "= a{j}u{j};");
            for rl in &net.servers[j].service {
                let _ = writeln!(
                    out,
                    "b{j}t{j} >= {rate} t{j} - {shift};",
                    rate = rl.rate,
                    shift = rl.rate * rl.latency
                );
            }
            let _ = writeln!(out, "b{j}t{j} >= 0;");
            let _ = writeln!(out, "b{j}t{j} = a{j}u{j};");
            let _ = writeln!(out, "d{j} = t{j} - u{j};");
            let _ = writeln!(out, "d{j} >= 0;");
        }
        if self.use_shaping {
            for (j, flows, shaping) in &net.arrival_shaping {
                for tb in shaping {
                    let _ = write!(out, "0");
                    for i in flows {
                        let _ = write!(out, "+ f{i}s{j}u{j}");
                    }
                    let _ = writeln!(
                        out,
                        "<= {sigma} + {rho} u{j};",
                        sigma = tb.sigma,
                        rho = tb.rho
                    );
                }
            }
        }
    }

    /// Burst-propagation rows: the burst a flow carries into the next server
    /// on its path grows by the arrival rate times the delay suffered.
    fn burst_constraints(&self, out: &mut String) {
        let net = self.network;
        let _ = writeln!(out, "\n/* sigma variables */");
        for i in 0..net.num_flows() {
            let path = net.path(i);
            for (l, j) in path.iter().enumerate() {
                if l == 0 {
                    let _ = writeln!(
                        out,
                        "x{i}s{j} = {sigma};",
                        sigma = net.flows[i].arrival[0].sigma
                    );
                } else {
                    let prev = path[l - 1];
                    for (offset, tb) in arrival_segments(&net.flows[i]) {
                        let _ = writeln!(
                            out,
                            "x{i}s{j} <= x{i}s{prev} + {offset} + {rho} d{prev};",
                            rho = tb.rho
                        );
                    }
                }
            }
        }
    }

    /// The complete program text.
    pub fn program(&self) -> String {
        let mut out = String::new();
        out.push_str("max:");
        for j in 0..self.network.num_servers() {
            let _ = write!(out, "+ d{j} ");
        }
        out.push_str(";\n");
        self.server_constraints(&mut out);
        self.burst_constraints(&mut out);
        out
    }

    /// Solve and return the per-server delay bounds; every bound is
    /// infinite when the program cannot be solved.
    pub fn delay_servers(&self, solver: &LpSolver, dir: &Path) -> Result<Vec<f64>, LpError> {
        let name = if self.use_shaping { "tfa_pp.lp" } else { "tfa.lp" };
        let path = crate::solver::write_program(dir, name, &self.program())?;
        let values = match solver.solve_file(&path) {
            Ok(values) => values,
            Err(LpError::Unsolved) => {
                return Ok(vec![f64::INFINITY; self.network.num_servers()])
            }
            Err(other) => return Err(other),
        };
        let mut delays = vec![0.0; self.network.num_servers()];
        for (name, value) in values {
            if let Some(index) = name.strip_prefix('d') {
                if let Ok(j) = index.parse::<usize>() {
                    if j < delays.len() {
                        delays[j] = value;
                    }
                }
            }
        }
        Ok(delays)
    }

    /// End-to-end bound of one flow: the sum of the bounds over its path.
    pub fn delay(&self, foi: usize, solver: &LpSolver, dir: &Path) -> Result<f64, LpError> {
        let delays = self.delay_servers(solver, dir)?;
        Ok(self.network.path(foi).iter().map(|j| delays[*j]).sum())
    }

    /// End-to-end bounds of all flows.
    pub fn all_delays(&self, solver: &LpSolver, dir: &Path) -> Result<Vec<f64>, LpError> {
        let delays = self.delay_servers(solver, dir)?;
        Ok((0..self.network.num_flows())
            .map(|i| self.network.path(i).iter().map(|j| delays[*j]).sum())
            .collect())
    }

    /// The equivalent elementary network: each flow decomposed into
    /// single-server sub-flows with the burst accumulated along the path.
    pub fn ff_equiv(&self, delays: &[f64]) -> LpNetwork {
        let net = self.network;
        let mut flows = Vec::new();
        for i in 0..net.num_flows() {
            let tb = net.flows[i].arrival[0];
            let mut accumulated = 0.0;
            for j in net.path(i) {
                flows.push(LpFlow::new(
                    vec![TokenBucket::new(tb.sigma + accumulated * tb.rho, tb.rho)],
                    vec![*j],
                ));
                accumulated += delays[*j];
            }
        }
        LpNetwork::new(net.servers.clone(), flows, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LpServer, RateLatency};

    fn tandem() -> LpNetwork {
        let servers = vec![
            LpServer::new(
                vec![RateLatency::new(4.0, 1.0)],
                vec![TokenBucket::new(0.0, 4.0)],
            ),
            LpServer::new(
                vec![RateLatency::new(4.0, 1.0)],
                vec![TokenBucket::new(0.0, 4.0)],
            ),
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
        let program = TfaLp::new(&net).program();
        assert!(program.starts_with("max:+ d0 + d1 ;"));
        // arrival rows for every flow at every crossed server
        assert!(program.contains("f0s0u0 <= x0s0 + 0 + 1 u0;"));
        assert!(program.contains("f0s1u1 <= x0s1 + 0 + 1 u1;"));
        // service and FIFO rows
        assert!(program.contains("b0t0 >= 4 t0 - 4;"));
        assert!(program.contains("b0t0 = a0u0;"));
        assert!(program.contains("d0 = t0 - u0;"));
        // initial burst and propagation
        assert!(program.contains("x0s0 = 1;"));
        assert!(program.contains("x0s1 <= x0s0 + 0 + 1 d0;"));
        // shaping row for the link 0 -> 1 carrying flow 0
        assert!(program.contains("+ f0s1u1 <= 0 + 4 u1;"));
    }

    #[test]
    fn test_plain_tfa_has_no_shaping_rows() {
        let net = tandem();
        let program = TfaLp::new(&net).without_shaping().program();
        assert!(!program.contains("+ f0s1u1 <= 0 + 4 u1;"));
        assert!(program.contains("x0s1 <= x0s0 + 0 + 1 d0;"));
    }

    #[test]
    fn test_piecewise_arrival_rows() {
        let servers = vec![LpServer::new(vec![RateLatency::new(8.0, 1.0)], vec![])];
        let flows = vec![LpFlow::new(
            vec![TokenBucket::new(1.0, 4.0), TokenBucket::new(3.0, 2.0)],
            vec![0],
        )];
        let net = LpNetwork::new(servers, flows, Vec::new());
        let program = TfaLp::new(&net).program();
        assert!(program.contains("f0s0u0 <= x0s0 + 0 + 4 u0;"));
        assert!(program.contains("f0s0u0 <= x0s0 + 2 + 2 u0;"));
    }

    #[test]
    fn test_ff_equiv_accumulates_bursts() {
        let net = tandem();
        let equiv = TfaLp::new(&net).ff_equiv(&[1.5, 2.0]);
        // flow 0 appears twice: original burst, then grown by rho * d0
        assert_eq!(equiv.num_flows(), 4);
        assert_eq!(equiv.flows[0].arrival[0].sigma, 1.0);
        assert_eq!(equiv.flows[1].arrival[0].sigma, 2.5);
        assert_eq!(equiv.flows[1].path, vec![1]);
    }
}
