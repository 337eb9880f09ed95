//! Canonical in-memory representation of servers, flows and networks.
//!
//! The model is built once from an external description and consumed
//! read-only by the analyzers. The derived topology tables (adjacency,
//! predecessors, successors, per-server flow membership) are cached on the
//! network and recomputed only when flows are added or removed, never during
//! analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::curve::{Curve, LeakyBucket};
use crate::diagnostics::Diagnostics;
use crate::error::{CoreError, CoreResult};
use crate::units::BitsPerSecond;

/// Identifier of a server (index into the network's server list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(usize);

/// Identifier of a flow (index into the network's flow list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(usize);

impl ServerId {
    #[inline]
    pub fn new(value: usize) -> Self {
        ServerId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl FlowId {
    #[inline]
    pub fn new(value: usize) -> Self {
        FlowId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

/// An output-port server: a FIFO queuing subsystem offering a service curve,
/// optionally shaped at its output by a leaky bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    /// Minimal service curve (a rate-latency or a max of rate-latencies).
    pub service: Curve,
    /// Output shaping curve acting as a maximal service.
    pub shaping: Option<LeakyBucket>,
    /// Transmission capacity of the output link, in bits per second.
    pub capacity: BitsPerSecond,
    /// Largest packet crossing this server, filled in during validation
    /// from the member flows.
    pub max_packet_length: Option<f64>,
}

impl Server {
    pub fn new(id: ServerId, name: impl Into<String>, service: Curve) -> Self {
        Self {
            id,
            name: name.into(),
            service,
            shaping: None,
            capacity: BitsPerSecond(0.0),
            max_packet_length: None,
        }
    }

    /// Attach an output shaping curve.
    pub fn with_shaping(mut self, shaping: LeakyBucket) -> Self {
        self.shaping = Some(shaping);
        self
    }

    /// Set the output link capacity in bits per second.
    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = BitsPerSecond(capacity);
        self
    }
}

/// An additional named path of a multicast flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedPath {
    pub name: String,
    pub path: Vec<ServerId>,
}

/// A unicast or multicast flow with a token-bucket (or GVBR) arrival curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    /// Primary path: a sequence of servers with no repetition.
    pub path: Vec<ServerId>,
    /// Arrival curve at the source application output.
    pub arrival: Curve,
    /// Maximum packet length in bits.
    pub max_packet_length: f64,
    /// Minimum packet length in bits.
    pub min_packet_length: f64,
    /// Additional paths of a multicast flow; each is analyzed independently
    /// and the worst delay across paths is reported.
    pub multicast: Vec<NamedPath>,
    /// Free-form properties (deadline, priority, ...), kept verbatim.
    pub properties: BTreeMap<String, String>,
}

impl Flow {
    pub fn new(id: FlowId, name: impl Into<String>, path: Vec<ServerId>, arrival: Curve) -> Self {
        Self {
            id,
            name: name.into(),
            path,
            arrival,
            max_packet_length: 0.0,
            min_packet_length: 0.0,
            multicast: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_packet_lengths(mut self, max: f64, min: f64) -> Self {
        self.max_packet_length = max;
        self.min_packet_length = min;
        self
    }

    /// Derive a leaky-bucket arrival curve from a periodic source with
    /// bounded jitter: the ideal periodic envelope deconvolved by the
    /// source jitter.
    pub fn set_arrival_from_period(
        &mut self,
        period: f64,
        jitter: f64,
        max_simultaneous_packets: u32,
    ) -> CoreResult<()> {
        if period <= 0.0 {
            return Err(CoreError::InvalidNetwork(format!(
                "flow {}: period must be positive",
                self.name
            )));
        }
        let ideal = Curve::leaky_bucket(
            self.max_packet_length * f64::from(max_simultaneous_packets) / period,
            self.max_packet_length,
        );
        self.arrival = ideal.deconv(&Curve::BoundedDelay(jitter))?;
        Ok(())
    }

    /// The deadline property parsed as seconds, when present.
    pub fn deadline(&self) -> Option<f64> {
        self.properties.get("deadline").and_then(|d| d.parse().ok())
    }

    /// All paths of this flow: the primary one plus the multicast paths.
    pub fn all_paths(&self) -> impl Iterator<Item = &[ServerId]> {
        std::iter::once(self.path.as_slice()).chain(self.multicast.iter().map(|p| p.path.as_slice()))
    }
}

/// Cached topology tables derived from the flow paths.
#[derive(Debug, Clone, Default)]
struct Topology {
    adjacency: Vec<Vec<bool>>,
    predecessors: Vec<Vec<ServerId>>,
    successors: Vec<Vec<ServerId>>,
    flows_in_server: Vec<Vec<FlowId>>,
}

/// A network: servers, flows and the topology they induce.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub name: String,
    servers: Vec<Server>,
    flows: Vec<Flow>,
    topology: Topology,
}

impl Network {
    pub fn new(name: impl Into<String>, servers: Vec<Server>) -> Self {
        let mut net = Self {
            name: name.into(),
            servers,
            flows: Vec::new(),
            topology: Topology::default(),
        };
        net.rebuild_topology();
        net
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn server(&self, id: ServerId) -> &Server {
        &self.servers[id.value()]
    }

    pub fn flow(&self, id: FlowId) -> &Flow {
        &self.flows[id.value()]
    }

    pub fn num_servers(&self) -> usize {
        self.servers.len()
    }

    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn server_by_name(&self, name: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn flow_by_name(&self, name: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.name == name)
    }

    /// Add a flow; the topology caches are invalidated and recomputed.
    pub fn add_flow(&mut self, flow: Flow) {
        self.flows.push(flow);
        self.rebuild_topology();
    }

    /// Remove a flow by name; the topology caches are invalidated and
    /// recomputed. Flow ids are reassigned to stay dense.
    pub fn remove_flow(&mut self, name: &str) -> bool {
        let before = self.flows.len();
        self.flows.retain(|f| f.name != name);
        if self.flows.len() == before {
            return false;
        }
        for (i, f) in self.flows.iter_mut().enumerate() {
            f.id = FlowId::new(i);
        }
        self.rebuild_topology();
        true
    }

    fn rebuild_topology(&mut self) {
        let n = self.servers.len();
        let mut adjacency = vec![vec![false; n]; n];
        let mut predecessors = vec![Vec::new(); n];
        let mut successors = vec![Vec::new(); n];
        let mut flows_in_server: Vec<Vec<FlowId>> = vec![Vec::new(); n];

        for flow in &self.flows {
            for path in flow.all_paths() {
                for server in path {
                    if !flows_in_server[server.value()].contains(&flow.id) {
                        flows_in_server[server.value()].push(flow.id);
                    }
                }
                for pair in path.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    if !adjacency[a.value()][b.value()] {
                        adjacency[a.value()][b.value()] = true;
                        successors[a.value()].push(b);
                        predecessors[b.value()].push(a);
                    }
                }
            }
        }
        for list in successors.iter_mut().chain(predecessors.iter_mut()) {
            list.sort();
        }
        self.topology = Topology {
            adjacency,
            predecessors,
            successors,
            flows_in_server,
        };
    }

    /// True when some flow traverses `from` immediately before `to`.
    pub fn has_edge(&self, from: ServerId, to: ServerId) -> bool {
        self.topology.adjacency[from.value()][to.value()]
    }

    pub fn predecessors(&self, server: ServerId) -> &[ServerId] {
        &self.topology.predecessors[server.value()]
    }

    pub fn successors(&self, server: ServerId) -> &[ServerId] {
        &self.topology.successors[server.value()]
    }

    pub fn flows_in_server(&self, server: ServerId) -> &[FlowId] {
        &self.topology.flows_in_server[server.value()]
    }

    /// The flows using the edge `from -> to` (consecutively in some path).
    pub fn flows_on_edge(&self, from: ServerId, to: ServerId) -> Vec<FlowId> {
        let mut out = Vec::new();
        for flow in &self.flows {
            let uses = flow.all_paths().any(|path| {
                path.windows(2)
                    .any(|pair| pair[0] == from && pair[1] == to)
            });
            if uses {
                out.push(flow.id);
            }
        }
        out
    }

    /// The ratio between the aggregate sustained arrival rate at a server
    /// and its service rate.
    pub fn server_load(&self, server: ServerId) -> f64 {
        let rate: f64 = self
            .flows_in_server(server)
            .iter()
            .map(|f| self.flow(*f).arrival.to_leaky_bucket_min_rate().map(|lb| lb.rate()).unwrap_or(f64::INFINITY))
            .sum();
        let service_rate = match &self.server(server).service {
            Curve::RateLatency(rl) => rl.rate(),
            Curve::MaxOfRateLatencies(m) => m.long_term_rate(),
            _ => return f64::INFINITY,
        };
        rate / service_rate
    }

    /// The maximum load over all servers.
    pub fn max_load(&self) -> f64 {
        (0..self.servers.len())
            .map(|j| self.server_load(ServerId::new(j)))
            .fold(0.0, f64::max)
    }

    /// Validate the network, populating `diag` with any issue found.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        if self.servers.is_empty() {
            diag.add_error("structure", "network has no servers");
            return;
        }
        if self.flows.is_empty() {
            diag.add_warning("structure", "network has no flows");
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                diag.add_error_with_entity(
                    "structure",
                    "duplicate server name",
                    &format!("server {}", server.name),
                );
            }
            match &server.service {
                Curve::RateLatency(_) | Curve::MaxOfRateLatencies(_) => {}
                other => diag.add_error_with_entity(
                    "structure",
                    &format!("service curve must be rate-latency, found {other}"),
                    &format!("server {}", server.name),
                ),
            }
        }
        let mut seen = std::collections::HashSet::new();
        for flow in &self.flows {
            let entity = format!("flow {}", flow.name);
            if !seen.insert(flow.name.as_str()) {
                diag.add_error_with_entity("structure", "duplicate flow name", &entity);
            }
            if flow.max_packet_length < 0.0 || flow.min_packet_length < 0.0 {
                diag.add_error_with_entity("structure", "negative packet length", &entity);
            }
            if flow.min_packet_length > flow.max_packet_length {
                diag.add_error_with_entity(
                    "structure",
                    "minimum packet length exceeds maximum",
                    &entity,
                );
            }
            match &flow.arrival {
                Curve::LeakyBucket(_) | Curve::Gvbr(_) | Curve::None => {}
                other => diag.add_error_with_entity(
                    "structure",
                    &format!("arrival curve must be a leaky bucket or GVBR, found {other}"),
                    &entity,
                ),
            }
            for path in flow.all_paths() {
                if path.is_empty() {
                    diag.add_error_with_entity("reference", "empty path", &entity);
                }
                let mut visited = std::collections::HashSet::new();
                for server in path {
                    if server.value() >= self.servers.len() {
                        diag.add_error_with_entity(
                            "reference",
                            "path references unknown server",
                            &entity,
                        );
                    } else if !visited.insert(*server) {
                        diag.add_error_with_entity(
                            "reference",
                            "path visits a server twice",
                            &entity,
                        );
                    }
                }
            }
        }
    }

    /// Validate and reject the network on any error.
    pub fn validate(&self) -> CoreResult<()> {
        let mut diag = Diagnostics::new();
        self.validate_into(&mut diag);
        if diag.has_errors() {
            let first = diag.errors().next().expect("has_errors");
            return Err(CoreError::InvalidNetwork(match &first.entity {
                Some(e) => format!("{}: {}", e, first.message),
                None => first.message.clone(),
            }));
        }
        Ok(())
    }

    /// Fill each server's `max_packet_length` from the flows crossing it.
    pub fn assign_server_packet_lengths(&mut self) {
        for j in 0..self.servers.len() {
            let max = self.topology.flows_in_server[j]
                .iter()
                .map(|f| self.flows[f.value()].max_packet_length)
                .fold(f64::NEG_INFINITY, f64::max);
            self.servers[j].max_packet_length = if max.is_finite() && max >= 0.0 {
                Some(max)
            } else {
                Some(0.0)
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::Curve;

    fn tandem() -> Network {
        let servers = vec![
            Server::new(ServerId::new(0), "s0", Curve::rate_latency(4.0, 1.0)).with_capacity(8.0),
            Server::new(ServerId::new(1), "s1", Curve::rate_latency(4.0, 1.0)).with_capacity(8.0),
        ];
        let mut net = Network::new("tandem", servers);
        net.add_flow(Flow::new(
            FlowId::new(0),
            "f0",
            vec![ServerId::new(0), ServerId::new(1)],
            Curve::leaky_bucket(1.0, 1.0),
        ));
        net.add_flow(Flow::new(
            FlowId::new(1),
            "f1",
            vec![ServerId::new(0)],
            Curve::leaky_bucket(1.0, 1.0),
        ));
        net
    }

    #[test]
    fn test_topology_tables() {
        let net = tandem();
        assert!(net.has_edge(ServerId::new(0), ServerId::new(1)));
        assert!(!net.has_edge(ServerId::new(1), ServerId::new(0)));
        assert_eq!(net.successors(ServerId::new(0)), &[ServerId::new(1)]);
        assert_eq!(net.predecessors(ServerId::new(1)), &[ServerId::new(0)]);
        assert_eq!(net.flows_in_server(ServerId::new(0)).len(), 2);
        assert_eq!(net.flows_in_server(ServerId::new(1)).len(), 1);
    }

    #[test]
    fn test_topology_invalidation_on_remove() {
        let mut net = tandem();
        assert!(net.remove_flow("f0"));
        assert!(!net.has_edge(ServerId::new(0), ServerId::new(1)));
        assert_eq!(net.flows_in_server(ServerId::new(1)).len(), 0);
        assert_eq!(net.flow_by_name("f1").unwrap().id, FlowId::new(0));
    }

    #[test]
    fn test_server_load() {
        let net = tandem();
        // two flows of rate 1 over a rate-4 server
        assert_eq!(net.server_load(ServerId::new(0)), 0.5);
        assert_eq!(net.max_load(), 0.5);
    }

    #[test]
    fn test_validation_rejects_repeated_server() {
        let mut net = tandem();
        net.add_flow(Flow::new(
            FlowId::new(2),
            "bad",
            vec![ServerId::new(0), ServerId::new(0)],
            Curve::leaky_bucket(1.0, 1.0),
        ));
        assert!(net.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_server() {
        let mut net = tandem();
        net.add_flow(Flow::new(
            FlowId::new(2),
            "bad",
            vec![ServerId::new(7)],
            Curve::leaky_bucket(1.0, 1.0),
        ));
        assert!(net.validate().is_err());
    }

    #[test]
    fn test_assign_server_packet_lengths() {
        let mut net = tandem();
        net.flows[0].max_packet_length = 100.0;
        net.flows[1].max_packet_length = 200.0;
        net.assign_server_packet_lengths();
        assert_eq!(net.server(ServerId::new(0)).max_packet_length, Some(200.0));
        assert_eq!(net.server(ServerId::new(1)).max_packet_length, Some(100.0));
    }

    #[test]
    fn test_period_jitter_arrival() {
        let mut flow = Flow::new(
            FlowId::new(0),
            "f",
            vec![ServerId::new(0)],
            Curve::None,
        )
        .with_packet_lengths(100.0, 50.0);
        flow.set_arrival_from_period(0.01, 0.002, 1).unwrap();
        match flow.arrival {
            Curve::LeakyBucket(lb) => {
                assert_eq!(lb.rate(), 10_000.0);
                // burst inflated by rate * jitter
                assert_eq!(lb.burst(), 120.0);
            }
            ref other => panic!("expected LB, got {other}"),
        }
    }
}
