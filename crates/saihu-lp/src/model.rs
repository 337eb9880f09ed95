//! Index-based network descriptor for the LP constructors.
//!
//! The linear programs index everything by position: servers `0..n`, flows
//! `0..m`, paths as server-index sequences. This descriptor is flat on
//! purpose; it is derived once from the canonical model and consumed
//! read-only while the constraint writers emit text.

use std::collections::BTreeMap;

use saihu_core::{Curve, Network};
use thiserror::Error;

/// Token-bucket function `sigma + rho t`, the building block of arrival and
/// maximum-service curves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    pub sigma: f64,
    pub rho: f64,
}

impl TokenBucket {
    pub fn new(sigma: f64, rho: f64) -> Self {
        Self { sigma, rho }
    }

    pub fn evaluate(&self, t: f64) -> f64 {
        self.sigma + self.rho * t
    }

    /// Deconvolution with a pure delay: the burst grows by `rho * delta`.
    pub fn delay(&self, delta: f64) -> TokenBucket {
        TokenBucket::new(self.sigma + self.rho * delta, self.rho)
    }
}

/// Rate-latency function `R (t - T)_+`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLatency {
    pub rate: f64,
    pub latency: f64,
}

impl RateLatency {
    pub fn new(rate: f64, latency: f64) -> Self {
        Self { rate, latency }
    }

    pub fn evaluate(&self, t: f64) -> f64 {
        (self.rate * (t - self.latency)).max(0.0)
    }
}

/// Sum of token buckets.
pub fn tb_sum(list: &[TokenBucket]) -> TokenBucket {
    TokenBucket::new(
        list.iter().map(|tb| tb.sigma).sum(),
        list.iter().map(|tb| tb.rho).sum(),
    )
}

/// Residual rate-latency under arbitrary (blind) multiplexing.
pub fn residual_blind(rl: RateLatency, tb: TokenBucket) -> RateLatency {
    if tb.rho >= rl.rate || !tb.sigma.is_finite() {
        RateLatency::new(0.0, f64::INFINITY)
    } else {
        RateLatency::new(
            rl.rate - tb.rho,
            (rl.latency * rl.rate + tb.sigma) / (rl.rate - tb.rho),
        )
    }
}

/// Residual rate-latency under FIFO multiplexing.
pub fn residual_fifo(rl: RateLatency, tb: TokenBucket) -> RateLatency {
    if tb.rho >= rl.rate || !tb.sigma.is_finite() {
        RateLatency::new(0.0, f64::INFINITY)
    } else {
        RateLatency::new(
            rl.rate - tb.rho,
            (rl.latency * rl.rate + tb.sigma) / rl.rate,
        )
    }
}

/// Envelope of the departure process of a token-bucket flow through a
/// rate-latency server.
pub fn output_arrival_curve(tb: TokenBucket, rl: RateLatency) -> TokenBucket {
    if rl.rate >= tb.rho {
        TokenBucket::new(tb.sigma + tb.rho * rl.latency, tb.rho)
    } else {
        TokenBucket::new(f64::INFINITY, f64::INFINITY)
    }
}

/// Min-plus convolution of rate-latency functions: latencies add, rates min.
pub fn rl_convolution(list: &[RateLatency]) -> RateLatency {
    if list.is_empty() {
        return RateLatency::new(f64::INFINITY, 0.0);
    }
    RateLatency::new(
        list.iter().map(|rl| rl.rate).fold(f64::INFINITY, f64::min),
        list.iter().map(|rl| rl.latency).sum(),
    )
}

/// A flow of the LP descriptor: a min of token buckets over a server-index
/// path.
#[derive(Debug, Clone, PartialEq)]
pub struct LpFlow {
    pub arrival: Vec<TokenBucket>,
    pub path: Vec<usize>,
}

impl LpFlow {
    pub fn new(arrival: Vec<TokenBucket>, path: Vec<usize>) -> Self {
        Self { arrival, path }
    }
}

/// A server of the LP descriptor: a max of rate-latencies and a min of
/// token buckets as maximal (shaping) service.
#[derive(Debug, Clone, PartialEq)]
pub struct LpServer {
    pub service: Vec<RateLatency>,
    pub shaping: Vec<TokenBucket>,
}

impl LpServer {
    pub fn new(service: Vec<RateLatency>, shaping: Vec<TokenBucket>) -> Self {
        Self { service, shaping }
    }
}

/// Shaping applied to a group of flows at their entrance server:
/// `(server, flows, token buckets)`.
pub type ArrivalShaping = (usize, Vec<usize>, Vec<TokenBucket>);

#[derive(Error, Debug)]
pub enum LpModelError {
    #[error("network is not feed-forward")]
    NotFeedForward,
    #[error("network is not a rooted forest")]
    NotForest,
    #[error("unsupported curve in model conversion: {0}")]
    Unsupported(String),
}

/// The LP-facing network: flat lists plus precomputed topology tables.
#[derive(Debug, Clone)]
pub struct LpNetwork {
    pub servers: Vec<LpServer>,
    pub flows: Vec<LpFlow>,
    pub arrival_shaping: Vec<ArrivalShaping>,
    pub predecessors: Vec<Vec<usize>>,
    pub successors: Vec<Vec<usize>>,
    pub flows_in_server: Vec<Vec<usize>>,
}

impl LpNetwork {
    pub fn new(
        servers: Vec<LpServer>,
        flows: Vec<LpFlow>,
        arrival_shaping: Vec<ArrivalShaping>,
    ) -> Self {
        let num_servers = servers.len();
        let num_flows = flows.len();
        let mut predecessors = vec![Vec::new(); num_servers];
        let mut successors = vec![Vec::new(); num_servers];
        let mut flows_in_server: Vec<Vec<usize>> = (0..num_servers)
            .map(|j| {
                (0..num_flows)
                    .filter(|i| flows[*i].path.contains(&j))
                    .collect()
            })
            .collect();
        for flow in &flows {
            for pair in flow.path.windows(2) {
                if !successors[pair[0]].contains(&pair[1]) {
                    successors[pair[0]].push(pair[1]);
                }
                if !predecessors[pair[1]].contains(&pair[0]) {
                    predecessors[pair[1]].push(pair[0]);
                }
            }
        }
        for list in predecessors
            .iter_mut()
            .chain(successors.iter_mut())
            .chain(flows_in_server.iter_mut())
        {
            list.sort_unstable();
        }
        Self {
            servers,
            flows,
            arrival_shaping,
            predecessors,
            successors,
            flows_in_server,
        }
    }

    /// Convert the canonical network model. The first token bucket of each
    /// arrival curve list has the smallest burst; servers with a positive
    /// capacity gain a shaping token bucket `Lmax + c t`.
    pub fn from_network(network: &Network) -> Result<Self, LpModelError> {
        let mut servers = Vec::with_capacity(network.num_servers());
        for server in network.servers() {
            let service = match &server.service {
                Curve::RateLatency(rl) => vec![RateLatency::new(rl.rate(), rl.latency())],
                Curve::MaxOfRateLatencies(m) => m
                    .curves()
                    .iter()
                    .map(|rl| RateLatency::new(rl.rate(), rl.latency()))
                    .collect(),
                other => return Err(LpModelError::Unsupported(other.to_string())),
            };
            let mut shaping = Vec::new();
            if let Some(lb) = &server.shaping {
                shaping.push(TokenBucket::new(lb.burst(), lb.rate()));
            }
            let capacity = server.capacity.value();
            if capacity > 0.0 {
                shaping.push(TokenBucket::new(
                    server.max_packet_length.unwrap_or(0.0),
                    capacity,
                ));
            }
            servers.push(LpServer::new(service, shaping));
        }
        let mut flows = Vec::with_capacity(network.num_flows());
        for flow in network.flows() {
            let arrival = match &flow.arrival {
                Curve::LeakyBucket(lb) => vec![TokenBucket::new(lb.burst(), lb.rate())],
                Curve::Gvbr(g) => g
                    .segments()
                    .map(|lb| TokenBucket::new(lb.burst(), lb.rate()))
                    .collect(),
                other => return Err(LpModelError::Unsupported(other.to_string())),
            };
            let path = flow.path.iter().map(|s| s.value()).collect();
            flows.push(LpFlow::new(arrival, path));
        }
        Ok(Self::new(servers, flows, Vec::new()))
    }

    pub fn num_servers(&self) -> usize {
        self.servers.len()
    }

    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn path(&self, flow: usize) -> &[usize] {
        &self.flows[flow].path
    }

    /// The edges of the network with the flows crossing each of them.
    pub fn edges(&self) -> BTreeMap<(usize, usize), Vec<usize>> {
        let mut out: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (i, flow) in self.flows.iter().enumerate() {
            for pair in flow.path.windows(2) {
                out.entry((pair[0], pair[1])).or_default().push(i);
            }
        }
        out
    }

    /// True when every path is increasing (servers numbered in topological
    /// order).
    pub fn is_feed_forward(&self) -> bool {
        self.flows
            .iter()
            .all(|flow| flow.path.windows(2).all(|pair| pair[0] < pair[1]))
    }

    /// True when the network is a rooted forest ordered by increasing
    /// numbers.
    pub fn is_tree(&self) -> bool {
        for j in 0..self.num_servers() {
            if self.successors[j].len() > 1 {
                return false;
            }
            if self.successors[j].len() == 1 && self.successors[j][0] <= j {
                return false;
            }
        }
        true
    }

    /// Depth of each server in a rooted forest: sinks at 0, each node one
    /// above its successor.
    pub fn depth(&self) -> Result<Vec<usize>, LpModelError> {
        if !self.is_tree() {
            return Err(LpModelError::NotForest);
        }
        let n = self.num_servers();
        let mut depth = vec![0usize; n];
        for j in (0..n.saturating_sub(1)).rev() {
            if let Some(succ) = self.successors[j].first() {
                depth[j] = depth[*succ] + 1;
            }
        }
        Ok(depth)
    }

    /// Renumber the servers in topological order so the network becomes
    /// feed-forward; the flow order is unchanged.
    pub fn make_feed_forward(&self) -> Result<LpNetwork, LpModelError> {
        if self.is_feed_forward() {
            return Ok(self.clone());
        }
        let order = self.topological_sort()?;
        let mut inverse = vec![0usize; order.len()];
        for (i, node) in order.iter().enumerate() {
            inverse[*node] = i;
        }
        let servers = order.iter().map(|j| self.servers[*j].clone()).collect();
        let flows = self
            .flows
            .iter()
            .map(|flow| {
                LpFlow::new(
                    flow.arrival.clone(),
                    flow.path.iter().map(|j| inverse[*j]).collect(),
                )
            })
            .collect();
        let arrival_shaping = self
            .arrival_shaping
            .iter()
            .map(|(j, flows, sc)| (inverse[*j], flows.clone(), sc.clone()))
            .collect();
        Ok(LpNetwork::new(servers, flows, arrival_shaping))
    }

    fn topological_sort(&self) -> Result<Vec<usize>, LpModelError> {
        let n = self.num_servers();
        let mut indegree = vec![0usize; n];
        for succ in &self.successors {
            for s in succ {
                indegree[*s] += 1;
            }
        }
        let mut queue: Vec<usize> = (0..n).filter(|j| indegree[*j] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = queue.pop() {
            order.push(node);
            for s in &self.successors[node] {
                indegree[*s] -= 1;
                if indegree[*s] == 0 {
                    queue.push(*s);
                }
            }
        }
        if order.len() != n {
            return Err(LpModelError::NotFeedForward);
        }
        Ok(order)
    }

    /// The load of the network: the worst ratio of aggregate sustained rate
    /// to service rate over the servers.
    pub fn load(&self) -> f64 {
        (0..self.num_servers())
            .map(|j| {
                let rate: f64 = self.flows_in_server[j]
                    .iter()
                    .map(|i| self.flows[*i].arrival[0].rho)
                    .sum();
                rate / self.servers[j].service[0].rate
            })
            .fold(0.0, f64::max)
    }

    /// The sub-network rooted at the last server of the flow of interest:
    /// backward closure of the predecessors, reindexed. Returns the network,
    /// the new index of the flow of interest, and the original flow/server
    /// index lists.
    pub fn sub_network(
        &self,
        foi: usize,
    ) -> Result<(LpNetwork, usize, Vec<usize>, Vec<usize>), LpModelError> {
        if !self.is_feed_forward() {
            return Err(LpModelError::NotFeedForward);
        }
        let sink = *self.flows[foi].path.last().expect("non-empty path");
        // backward search of the servers with a path to the sink
        let mut stack = vec![sink];
        let mut servers_in = vec![false; self.num_servers()];
        while let Some(j) = stack.pop() {
            if servers_in[j] {
                continue;
            }
            servers_in[j] = true;
            stack.extend(self.predecessors[j].iter().copied());
        }
        let list_servers: Vec<usize> =
            (0..self.num_servers()).filter(|j| servers_in[*j]).collect();
        let server_index: BTreeMap<usize, usize> = list_servers
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, new))
            .collect();

        let truncated: Vec<Vec<usize>> = self
            .flows
            .iter()
            .map(|flow| {
                flow.path
                    .iter()
                    .filter(|j| servers_in[**j])
                    .map(|j| server_index[j])
                    .collect()
            })
            .collect();
        let list_flows: Vec<usize> = (0..self.num_flows())
            .filter(|i| !truncated[*i].is_empty())
            .collect();
        let flow_index: BTreeMap<usize, usize> = list_flows
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, new))
            .collect();

        let servers = list_servers
            .iter()
            .map(|j| self.servers[*j].clone())
            .collect();
        let flows = list_flows
            .iter()
            .map(|i| LpFlow::new(self.flows[*i].arrival.clone(), truncated[*i].clone()))
            .collect();
        let arrival_shaping = self
            .arrival_shaping
            .iter()
            .filter(|(j, _, _)| servers_in[*j])
            .map(|(j, group, sc)| {
                (
                    server_index[j],
                    group.iter().map(|i| flow_index[i]).collect(),
                    sc.clone(),
                )
            })
            .collect();
        Ok((
            LpNetwork::new(servers, flows, arrival_shaping),
            flow_index[&foi],
            list_flows,
            list_servers,
        ))
    }

    /// Cut every flow along the edges not in `keep_edges`. Returns the
    /// decomposed network (one sub-flow per kept segment, each with the
    /// original first token bucket), the index of the first sub-flow of each
    /// original flow, and the set of removed edges.
    ///
    /// The shaping curves of the servers upstream of a removed edge carry
    /// over as arrival shaping of the sub-flows created at the cut.
    pub fn decomposition(
        &self,
        keep_edges: &[(usize, usize)],
    ) -> (LpNetwork, Vec<usize>, Vec<(usize, usize)>) {
        let mut sub_flows: Vec<LpFlow> = Vec::new();
        let mut list_first = Vec::with_capacity(self.num_flows());
        let mut removed: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for flow in &self.flows {
            list_first.push(sub_flows.len());
            let mut segment = vec![flow.path[0]];
            for pair in flow.path.windows(2) {
                let edge = (pair[0], pair[1]);
                if keep_edges.contains(&edge) {
                    segment.push(pair[1]);
                } else {
                    sub_flows.push(LpFlow::new(vec![flow.arrival[0]], segment));
                    removed.entry(edge).or_default().push(sub_flows.len());
                    segment = vec![pair[1]];
                }
            }
            sub_flows.push(LpFlow::new(vec![flow.arrival[0]], segment));
        }
        let mut arrival_shaping: Vec<ArrivalShaping> = self
            .arrival_shaping
            .iter()
            .map(|(j, group, sc)| {
                (
                    *j,
                    group.iter().map(|i| list_first[*i]).collect(),
                    sc.clone(),
                )
            })
            .collect();
        for ((from, _to), subs) in &removed {
            if !self.servers[*from].shaping.is_empty() {
                let j = sub_flows[subs[0]].path[0];
                arrival_shaping.push((j, subs.clone(), self.servers[*from].shaping.clone()));
            }
        }
        (
            LpNetwork::new(self.servers.clone(), sub_flows, arrival_shaping),
            list_first,
            removed.keys().copied().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tb(sigma: f64, rho: f64) -> TokenBucket {
        TokenBucket::new(sigma, rho)
    }

    fn rl(rate: f64, latency: f64) -> RateLatency {
        RateLatency::new(rate, latency)
    }

    fn tandem() -> LpNetwork {
        let servers = vec![
            LpServer::new(vec![rl(4.0, 1.0)], vec![tb(0.0, 4.0)]),
            LpServer::new(vec![rl(4.0, 1.0)], vec![tb(0.0, 4.0)]),
        ];
        let flows = vec![
            LpFlow::new(vec![tb(1.0, 1.0)], vec![0, 1]),
            LpFlow::new(vec![tb(1.0, 1.0)], vec![0]),
            LpFlow::new(vec![tb(1.0, 1.0)], vec![1]),
        ];
        LpNetwork::new(servers, flows, Vec::new())
    }

    #[test]
    fn test_topology_tables() {
        let net = tandem();
        assert_eq!(net.successors[0], vec![1]);
        assert_eq!(net.predecessors[1], vec![0]);
        assert_eq!(net.flows_in_server[0], vec![0, 1]);
        assert_eq!(net.flows_in_server[1], vec![0, 2]);
        assert_eq!(net.edges().get(&(0, 1)), Some(&vec![0]));
    }

    #[test]
    fn test_feed_forward_and_tree() {
        let net = tandem();
        assert!(net.is_feed_forward());
        assert!(net.is_tree());
        assert_eq!(net.depth().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_make_feed_forward_renumbers() {
        let servers = vec![
            LpServer::new(vec![rl(4.0, 1.0)], vec![]),
            LpServer::new(vec![rl(4.0, 1.0)], vec![]),
        ];
        let flows = vec![LpFlow::new(vec![tb(1.0, 1.0)], vec![1, 0])];
        let net = LpNetwork::new(servers, flows, Vec::new());
        assert!(!net.is_feed_forward());
        let ff = net.make_feed_forward().unwrap();
        assert!(ff.is_feed_forward());
        assert_eq!(ff.flows[0].path, vec![0, 1]);
    }

    #[test]
    fn test_load() {
        let net = tandem();
        assert_eq!(net.load(), 0.5);
    }

    #[test]
    fn test_sub_network() {
        let net = tandem();
        // flow 1 ends at server 0: only server 0 remains, flows 0 and 1
        let (sub, new_foi, list_flows, list_servers) = net.sub_network(1).unwrap();
        assert_eq!(list_servers, vec![0]);
        assert_eq!(list_flows, vec![0, 1]);
        assert_eq!(new_foi, 1);
        assert_eq!(sub.flows[0].path, vec![0]);
    }

    #[test]
    fn test_decomposition_cuts_flows() {
        let net = tandem();
        // keep nothing: flow 0 splits into two single-server sub-flows
        let (forest, list_first, removed) = net.decomposition(&[]);
        assert_eq!(forest.num_flows(), 4);
        assert_eq!(list_first, vec![0, 2, 3]);
        assert_eq!(removed, vec![(0, 1)]);
        // the cut inherits the upstream shaping curve
        assert!(forest
            .arrival_shaping
            .iter()
            .any(|(j, flows, _)| *j == 1 && flows == &vec![1]));
    }

    #[test]
    fn test_residual_helpers() {
        assert_eq!(
            residual_blind(rl(3.0, 4.0), tb(1.0, 2.0)),
            rl(1.0, 13.0)
        );
        let unstable = residual_blind(rl(2.0, 4.0), tb(1.0, 3.0));
        assert_eq!(unstable.rate, 0.0);
        assert!(unstable.latency.is_infinite());
        assert_eq!(
            output_arrival_curve(tb(3.0, 4.0), rl(10.0, 2.0)),
            tb(11.0, 4.0)
        );
        assert_eq!(
            rl_convolution(&[rl(3.0, 4.0), rl(6.0, 7.0), rl(3.0, 2.0)]),
            rl(3.0, 13.0)
        );
    }
}
