//! Polynomial linear-program constraints (PLP).
//!
//! Encodes the FIFO tree analysis with a quadratic number of time variables:
//! for each server of the sub-tree, a window of dates `t_min[j]..t_max[j]`
//! sized by the server's depth. Cumulative-flow variables `f{i}s{j}t{u}e{e}`
//! tie arrivals, service, FIFO ordering, monotonicity and shaping together;
//! optional SFA and TFA delay rows tighten the program.

use std::fmt::Write as _;

use crate::model::LpNetwork;
use crate::solver::LpError;

/// Date windows over a rooted forest: one window per server, sized
/// `depth + 2`, numbered from the sinks backward.
pub fn polynomial_times(num_servers: usize, depth: &[usize]) -> (Vec<usize>, Vec<usize>, usize) {
    let mut t_min = vec![0usize; num_servers];
    let mut t_max = vec![0usize; num_servers];
    let mut t = 0usize;
    for j in (0..num_servers).rev() {
        t_min[j] = t + 1;
        t_max[j] = t + depth[j] + 2;
        t = t_max[j];
    }
    (t_min, t_max, t + 1)
}

/// PLP constraint writer for one flow of interest over a tree network.
pub struct PlpConstraints<'a> {
    pub network: &'a LpNetwork,
    pub t_min: Vec<usize>,
    pub t_max: Vec<usize>,
    pub num_dates: usize,
    pub foi: usize,
    /// Index used in variable suffixes (`e{next_foi}`) and in the fix-point
    /// burst variable.
    pub next_foi: usize,
    /// Global sub-flow numbers of the flows (identity for a standalone
    /// tree).
    pub list_flows: Vec<usize>,
    pub is_cyclic: bool,
    /// SFA per-flow delay bounds used as tightening rows.
    pub delays_flow: Option<Vec<f64>>,
    /// TFA per-server delay bounds used as tightening rows.
    pub delays_server: Option<Vec<f64>>,
    depth: Vec<usize>,
}

impl<'a> PlpConstraints<'a> {
    pub fn new(
        network: &'a LpNetwork,
        foi: usize,
        next_foi: Option<usize>,
        list_flows: Option<Vec<usize>>,
        delays_flow: Option<Vec<f64>>,
        delays_server: Option<Vec<f64>>,
    ) -> Result<Self, LpError> {
        let depth = network.depth()?;
        let (t_min, t_max, num_dates) = polynomial_times(network.num_servers(), &depth);
        let is_cyclic = list_flows.is_some();
        Ok(Self {
            network,
            t_min,
            t_max,
            num_dates,
            foi,
            next_foi: next_foi.unwrap_or(0),
            list_flows: list_flows.unwrap_or_else(|| (0..network.num_flows()).collect()),
            is_cyclic,
            delays_flow,
            delays_server,
            depth,
        })
    }

    pub fn time_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* time constraints */");
        let e = self.next_foi;
        let _ = writeln!(out, "t1e{e} <= t0e{e};");
        let _ = writeln!(out, "t2e{e} <= t1e{e};");
        for j in 0..self.network.num_servers().saturating_sub(1) {
            let h = self.network.successors[j][0];
            let tj = self.t_min[j];
            let th = self.t_min[h];
            for u in 0..=self.depth[j] {
                let _ = writeln!(out, "t{a}e{e} <= t{b}e{e};", a = tj + u + 1, b = tj + u);
                let _ = writeln!(out, "t{a}e{e} <= t{b}e{e};", a = tj + u, b = th + u);
            }
        }
    }

    pub fn arrival_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* arrival constraints */");
        let e = self.next_foi;
        for i in 0..self.network.num_flows() {
            let arrival: &[crate::model::TokenBucket] = if i == self.foi {
                &self.network.flows[i].arrival[..1]
            } else {
                &self.network.flows[i].arrival
            };
            let j = self.network.path(i)[0];
            for tb in arrival {
                for u in self.t_min[j]..self.t_max[j] {
                    for v in (u + 1)..=self.t_max[j] {
                        let _ = writeln!(
                            out,
                            "f{i}s{j}t{u}e{e} - f{i}s{j}t{v}e{e} <= x{x} + {rho} t{u}e{e} - {rho} t{v}e{e};",
                            x = self.list_flows[i],
                            rho = tb.rho
                        );
                    }
                }
            }
        }
    }

    pub fn arrival_shaping_constraints(&self, out: &mut String, include_foi: bool) {
        let _ = writeln!(out, "\n/* arrival shaping constraints */");
        let e = self.next_foi;
        for (j, flows, shaping) in &self.network.arrival_shaping {
            for u in self.t_min[*j]..self.t_max[*j] {
                for v in (u + 1)..=self.t_max[*j] {
                    for tb in shaping {
                        let _ = write!(out, "0");
                        for i in flows {
                            if include_foi || !self.is_cyclic || *i != self.foi {
                                let _ = write!(
                                    out,
                                    "+f{i}s{j}t{u}e{e} - f{i}s{j}t{v}e{e}"
                                );
                            }
                        }
                        let _ = writeln!(
                            out,
                            "<= {sigma} + {rho}t{u}e{e} - {rho}t{v}e{e};",
                            sigma = tb.sigma,
                            rho = tb.rho
                        );
                    }
                }
            }
        }
    }

    pub fn monotony_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* monotony constraints */");
        let e = self.next_foi;
        for i in 0..self.network.num_flows() {
            for j in self.network.path(i) {
                for u in self.t_min[*j]..self.t_max[*j] {
                    let _ = writeln!(
                        out,
                        "f{i}s{j}t{u}e{e} - f{i}s{j}t{v}e{e} >= 0;",
                        v = u + 1
                    );
                }
            }
        }
    }

    pub fn fifo_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* fifo constraints */");
        let e = self.next_foi;
        let last = self.network.num_servers() - 1;
        for i in 0..self.network.num_flows() {
            for j in self.network.path(i) {
                if *j == last {
                    let _ = writeln!(
                        out,
                        "f{i}s{j}t1e{e} = f{i}s{out_s}t0e{e};",
                        out_s = j + 1
                    );
                } else {
                    let h = self.network.successors[*j][0];
                    for u in 0..=self.depth[*j] {
                        let _ = writeln!(
                            out,
                            "f{i}s{j}t{a}e{e} = f{i}s{h}t{b}e{e};",
                            a = self.t_min[*j] + u,
                            b = self.t_min[h] + u
                        );
                    }
                }
            }
        }
    }

    pub fn service_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* service constraints */");
        let e = self.next_foi;
        let last = self.network.num_servers() - 1;
        for j in 0..self.network.num_servers() {
            let u = self.t_max[j];
            let (h, v) = if j == last {
                (self.network.num_servers(), 0)
            } else {
                let h = self.network.successors[j][0];
                (h, self.t_max[h])
            };
            for rl in &self.network.servers[j].service {
                for i in &self.network.flows_in_server[j] {
                    let _ = write!(out, "f{i}s{h}t{v}e{e} - f{i}s{j}t{u}e{e} + ");
                }
                let _ = writeln!(
                    out,
                    "{shift} >= {rate} t{v}e{e} - {rate} t{u}e{e};",
                    shift = rl.rate * rl.latency,
                    rate = rl.rate
                );
                for i in &self.network.flows_in_server[j] {
                    let _ = write!(out, "f{i}s{h}t{v}e{e} - f{i}s{j}t{u}e{e} + ");
                }
                let _ = writeln!(out, "0 >= 0;");
            }
        }
    }

    pub fn shaping_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* shaping constraints (maximum rate of a link) */");
        let e = self.next_foi;
        let edges = self.network.edges();
        for j in 0..self.network.num_servers().saturating_sub(1) {
            let h = self.network.successors[j][0];
            for u in self.t_min[h]..self.t_max[h] {
                for v in (u + 1)..=self.t_max[h] {
                    for tb in &self.network.servers[j].shaping {
                        let _ = write!(out, "0");
                        for i in edges.get(&(j, h)).map(Vec::as_slice).unwrap_or(&[]) {
                            if !self.is_cyclic || *i != self.foi {
                                let _ = write!(
                                    out,
                                    "+ f{i}s{h}t{u}e{e} - f{i}s{h}t{v}e{e} "
                                );
                            }
                        }
                        let _ = writeln!(
                            out,
                            "<= {sigma} + {rho} t{u}e{e} - {rho} t{v}e{e};",
                            sigma = tb.sigma,
                            rho = tb.rho
                        );
                    }
                }
            }
        }
    }

    pub fn sfa_delay_constraints(&self, out: &mut String) {
        let Some(delays) = &self.delays_flow else {
            return;
        };
        let _ = writeln!(out, "\n/* SFA delay constraints */");
        let e = self.next_foi;
        let last = self.network.num_servers() - 1;
        for i in 0..self.network.num_flows() {
            let j = *self.network.path(i).last().expect("non-empty path");
            let h = self.network.path(i)[0];
            if delays[i].is_infinite() {
                continue;
            }
            if j == last {
                let _ = writeln!(
                    out,
                    "t0e{e} - t{a}e{e} <= {d};",
                    a = self.t_min[h],
                    d = delays[i]
                );
            } else {
                let succ = self.network.successors[j][0];
                for k in 0..(self.depth[succ] + 2) {
                    let _ = writeln!(
                        out,
                        "t{a}e{e} - t{b}e{e} <= {d};",
                        a = self.t_min[succ] + k,
                        b = self.t_min[h] + k,
                        d = delays[i]
                    );
                }
            }
        }
    }

    pub fn tfa_delay_constraints(&self, out: &mut String) {
        let Some(delays) = &self.delays_server else {
            return;
        };
        let _ = writeln!(out, "\n/* TFA delay constraints */");
        let e = self.next_foi;
        let last = self.network.num_servers() - 1;
        for j in 0..self.network.num_servers() {
            if delays[j].is_infinite() {
                continue;
            }
            if j == last {
                let _ = writeln!(
                    out,
                    "t0e{e} - t{a}e{e} <= {d};",
                    a = self.t_min[j],
                    d = delays[j]
                );
            } else {
                let h = self.network.successors[j][0];
                for k in 0..(self.depth[h] + 2) {
                    let _ = writeln!(
                        out,
                        "t{a}e{e} - t{b}e{e} <= {d};",
                        a = self.t_min[h] + k,
                        b = self.t_min[j] + k,
                        d = delays[j]
                    );
                }
            }
        }
    }

    /// Fix-point closure rows: the burst variable of the flow of interest is
    /// the backlog it accumulates through the sub-tree, anchored by its
    /// arrival envelope.
    pub fn fix_point_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* fix-point burst constraints */");
        let e = self.next_foi;
        let first = self.network.path(self.foi)[0];
        let after_last = self.network.path(self.foi).last().expect("non-empty") + 1;
        let _ = writeln!(
            out,
            "x{e} = f{foi}s{first}t0e{e} - f{foi}s{after_last}t0e{e};",
            foi = self.foi
        );
        let rho = self.network.flows[self.foi].arrival[0].rho;
        for k in self.t_min[first]..=self.t_max[first] {
            let _ = writeln!(
                out,
                "f{foi}s{first}t0e{e} - f{foi}s{first}t{k}e{e} <= x{x} + {rho}t0e{e} - {rho}t{k}e{e};",
                foi = self.foi,
                x = self.list_flows[self.foi]
            );
        }
    }

    /// Backlog objective: maximize the data of the flow of interest still in
    /// the tree at the sink date.
    pub fn backlog_objective(&self, out: &mut String) {
        let first = self.network.path(self.foi)[0];
        let _ = writeln!(
            out,
            "max: f{foi}s{first}t0e0 - f{foi}s{num}t0e0;",
            foi = self.foi,
            num = self.network.num_servers()
        );
        let tb = self.network.flows[self.foi].arrival[0];
        for k in self.t_min[first]..=self.t_max[first] {
            let _ = writeln!(
                out,
                "f{foi}s{first}t0e0 - f{foi}s{first}t{k}e0 <= {sigma} + {rho}t0e0 - {rho}t{k}e0;",
                foi = self.foi,
                sigma = tb.sigma,
                rho = tb.rho
            );
        }
    }

    /// All constraint families of one sub-tree, for the forest fix-point
    /// program.
    pub fn write_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* flow {} */", self.list_flows[self.foi]);
        self.time_constraints(out);
        self.arrival_constraints(out);
        self.fifo_constraints(out);
        self.service_constraints(out);
        self.monotony_constraints(out);
        self.shaping_constraints(out);
        self.arrival_shaping_constraints(out, false);
        self.tfa_delay_constraints(out);
        self.sfa_delay_constraints(out);
        self.fix_point_constraints(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LpFlow, LpServer, RateLatency, TokenBucket};

    fn tandem() -> LpNetwork {
        let servers = vec![
            LpServer::new(
                vec![RateLatency::new(4.0, 1.0)],
                vec![TokenBucket::new(0.0, 4.0)],
            ),
            LpServer::new(vec![RateLatency::new(4.0, 1.0)], vec![]),
        ];
        let flows = vec![
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![0, 1]),
            LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![1]),
        ];
        LpNetwork::new(servers, flows, Vec::new())
    }

    #[test]
    fn test_polynomial_times() {
        // two servers, depths [1, 0]: windows sized 3 and 2 from the sink
        let (t_min, t_max, num) = polynomial_times(2, &[1, 0]);
        assert_eq!(t_min, vec![3, 1]);
        assert_eq!(t_max, vec![5, 2]);
        assert_eq!(num, 6);
    }

    #[test]
    fn test_constraint_rows() {
        let net = tandem();
        let plp = PlpConstraints::new(&net, 0, None, None, None, None).unwrap();
        let mut out = String::new();
        plp.write_constraints(&mut out);
        // time ordering at the head of the windows
        assert!(out.contains("t1e0 <= t0e0;"));
        // fifo chaining between server 0 and server 1 windows
        assert!(out.contains("f0s0t3e0 = f0s1t1e0;"));
        // service row of the sink server references the departure process
        assert!(out.contains("f0s2t0e0 - f0s1t2e0 + "));
        // shaping on the link 0 -> 1
        assert!(out.contains("0+ f0s1t1e0 - f0s1t2e0 <= 0 + 4 t1e0 - 4 t2e0;"));
        // fix-point burst closure
        assert!(out.contains("x0 = f0s0t0e0 - f0s2t0e0;"));
    }

    #[test]
    fn test_tightening_rows_skip_infinite() {
        let net = tandem();
        let plp = PlpConstraints::new(
            &net,
            0,
            None,
            None,
            Some(vec![f64::INFINITY, 1.0]),
            Some(vec![2.0, f64::INFINITY]),
        )
        .unwrap();
        let mut out = String::new();
        plp.sfa_delay_constraints(&mut out);
        plp.tfa_delay_constraints(&mut out);
        // finite rows present, infinite ones skipped
        assert!(out.contains("<= 1;"));
        assert!(out.contains("<= 2;"));
        assert!(!out.contains("<= inf;"));
    }
}
