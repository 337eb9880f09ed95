//! Exponential linear-program constraints (ELP).
//!
//! The exact FIFO tree analysis: the date windows double with the depth
//! (`2^(depth+1)` dates per server) and only the pairs related by the order
//! matrix generate rows. Exponentially larger than PLP, tighter bounds.

use std::fmt::Write as _;

use crate::model::LpNetwork;
use crate::solver::LpError;

/// Date windows for the exponential method.
pub fn exponential_times(num_servers: usize, depth: &[usize]) -> (Vec<usize>, Vec<usize>, usize) {
    let mut t_min = vec![0usize; num_servers];
    let mut t_max = vec![0usize; num_servers];
    let mut t = 0usize;
    for j in (0..num_servers).rev() {
        t_min[j] = t + 1;
        t_max[j] = t + (1usize << (depth[j] + 1));
        t = t_max[j];
    }
    (t_min, t_max, t + 1)
}

/// ELP constraint writer for one flow of interest over a tree network.
pub struct ElpConstraints<'a> {
    pub network: &'a LpNetwork,
    pub t_min: Vec<usize>,
    pub t_max: Vec<usize>,
    pub num_dates: usize,
    pub foi: usize,
    pub next_foi: usize,
    pub list_flows: Vec<usize>,
    pub is_cyclic: bool,
    depth: Vec<usize>,
}

impl<'a> ElpConstraints<'a> {
    pub fn new(
        network: &'a LpNetwork,
        foi: usize,
        next_foi: Option<usize>,
        list_flows: Option<Vec<usize>>,
    ) -> Result<Self, LpError> {
        let depth = network.depth()?;
        let (t_min, t_max, num_dates) = exponential_times(network.num_servers(), &depth);
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
            depth,
        })
    }

    /// The partial order between dates: `order[a][b]` when `t_a <= t_b` is
    /// implied by FIFO, service and transitivity over the doubled windows.
    pub fn order_matrix(&self) -> Vec<Vec<bool>> {
        let n = self.num_dates;
        let mut order = vec![vec![false; n]; n];
        order[1][0] = true;
        order[2][0] = true;
        order[2][1] = true;
        for j in (0..self.network.num_servers().saturating_sub(1)).rev() {
            let h = self.network.successors[j][0];
            for i in 0..(1usize << self.depth[j]) {
                order[self.t_min[j] + 2 * i][self.t_min[h] + i] = true; // fifo
                order[self.t_min[j] + 2 * i + 1][self.t_min[h] + i] = true; // service
                order[self.t_min[j] + 2 * i + 1][self.t_min[j] + 2 * i] = true; // order
                for k in (i + 1)..(1usize << self.depth[j]) {
                    if order[self.t_min[h] + k][self.t_min[h] + i] {
                        order[self.t_min[j] + 2 * k][self.t_min[j] + 2 * i] = true;
                        order[self.t_min[j] + 2 * k + 1][self.t_min[j] + 2 * i + 1] = true;
                        order[self.t_min[j] + 2 * k + 1][self.t_min[j] + 2 * i] = true;
                    }
                }
            }
        }
        order
    }

    pub fn time_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* time constraints */");
        let e = self.next_foi;
        let order = self.order_matrix();
        for (a, row) in order.iter().enumerate() {
            for (b, related) in row.iter().enumerate() {
                if *related {
                    let _ = writeln!(out, "t{a}e{e} <= t{b}e{e};");
                }
            }
        }
    }

    pub fn arrival_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* arrival constraints */");
        let e = self.next_foi;
        let order = self.order_matrix();
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
                        if order[v][u] {
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
    }

    pub fn monotony_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* monotony constraints */");
        let e = self.next_foi;
        let order = self.order_matrix();
        for i in 0..self.network.num_flows() {
            for j in self.network.path(i) {
                for u in self.t_min[*j]..self.t_max[*j] {
                    for v in (u + 1)..=self.t_max[*j] {
                        if order[v][u] {
                            let _ = writeln!(
                                out,
                                "f{i}s{j}t{u}e{e} - f{i}s{j}t{v}e{e} >= 0;"
                            );
                        }
                    }
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
                        "f{i}s{out_s}t0e{e} = f{i}s{j}t1e{e};",
                        out_s = j + 1
                    );
                } else {
                    let h = self.network.successors[*j][0];
                    for k in 0..(1usize << self.depth[*j]) {
                        let _ = writeln!(
                            out,
                            "f{i}s{h}t{a}e{e} = f{i}s{j}t{b}e{e};",
                            a = self.t_min[h] + k,
                            b = self.t_min[*j] + 2 * k
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
            if j == last {
                for rl in &self.network.servers[j].service {
                    for i in &self.network.flows_in_server[j] {
                        let _ = write!(out, "f{i}s{h}t0e{e} - f{i}s{j}t2e{e} + ", h = j + 1);
                    }
                    let _ = writeln!(
                        out,
                        "{shift} >= {rate} t0e{e} - {rate} t2e{e};",
                        shift = rl.rate * rl.latency,
                        rate = rl.rate
                    );
                }
            } else {
                let h = self.network.successors[j][0];
                for rl in &self.network.servers[j].service {
                    for k in 0..(1usize << self.depth[j]) {
                        for i in &self.network.flows_in_server[j] {
                            let _ = write!(
                                out,
                                "f{i}s{h}t{a}e{e} - f{i}s{j}t{b}e{e} + ",
                                a = self.t_min[h] + k,
                                b = self.t_min[j] + 2 * k + 1
                            );
                        }
                        let _ = writeln!(
                            out,
                            "{shift} >= {rate} t{a}e{e} - {rate} t{b}e{e};",
                            shift = rl.rate * rl.latency,
                            rate = rl.rate,
                            a = self.t_min[h] + k,
                            b = self.t_min[j] + 2 * k + 1
                        );
                    }
                }
            }
        }
    }

    pub fn shaping_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* shaping constraints (maximum rate of a link) */");
        let e = self.next_foi;
        let order = self.order_matrix();
        for j in 0..self.network.num_servers().saturating_sub(1) {
            let h = self.network.successors[j][0];
            for u in self.t_min[h]..self.t_max[h] {
                for v in (u + 1)..=self.t_max[h] {
                    if !order[v][u] {
                        continue;
                    }
                    for tb in &self.network.servers[j].shaping {
                        let _ = write!(out, "0");
                        for i in &self.network.flows_in_server[j] {
                            if !self.is_cyclic || *i != self.foi {
                                let _ = write!(
                                    out,
                                    "+ f{i}s{h}t{u}e{e} - f{i}s{h}t{v}e{e}"
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

    pub fn arrival_shaping_constraints(&self, out: &mut String, include_foi: bool) {
        let _ = writeln!(out, "\n/* arrival shaping constraints */");
        let e = self.next_foi;
        let order = self.order_matrix();
        for (j, flows, shaping) in &self.network.arrival_shaping {
            for u in self.t_min[*j]..self.t_max[*j] {
                for v in (u + 1)..=self.t_max[*j] {
                    if !order[v][u] {
                        continue;
                    }
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

    /// Backlog objective, identical in shape to the polynomial one.
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

    pub fn write_constraints(&self, out: &mut String) {
        let _ = writeln!(out, "\n/* flow {} */", self.list_flows[self.foi]);
        self.time_constraints(out);
        self.arrival_constraints(out);
        self.fifo_constraints(out);
        self.service_constraints(out);
        self.monotony_constraints(out);
        self.shaping_constraints(out);
        self.arrival_shaping_constraints(out, false);
        self.fix_point_constraints(out);
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
        let flows = vec![LpFlow::new(vec![TokenBucket::new(1.0, 1.0)], vec![0, 1])];
        LpNetwork::new(servers, flows, Vec::new())
    }

    #[test]
    fn test_exponential_times() {
        // depths [1, 0]: windows sized 4 and 2
        let (t_min, t_max, num) = exponential_times(2, &[1, 0]);
        assert_eq!(t_min, vec![3, 1]);
        assert_eq!(t_max, vec![6, 2]);
        assert_eq!(num, 7);
    }

    #[test]
    fn test_order_matrix_relates_windows() {
        let net = tandem();
        let elp = ElpConstraints::new(&net, 0, None, None).unwrap();
        let order = elp.order_matrix();
        // fifo relation between server 0's window and server 1's window
        assert!(order[3][1]);
        assert!(order[4][1]);
        assert!(order[4][3]);
        // base triangle
        assert!(order[1][0] && order[2][0] && order[2][1]);
    }

    #[test]
    fn test_constraint_rows() {
        let net = tandem();
        let elp = ElpConstraints::new(&net, 0, None, None).unwrap();
        let mut out = String::new();
        elp.write_constraints(&mut out);
        assert!(out.contains("f0s2t0e0 = f0s1t1e0;"));
        assert!(out.contains("f0s1t1e0 = f0s0t3e0;"));
        assert!(out.contains("x0 = f0s0t0e0 - f0s2t0e0;"));
    }
}
