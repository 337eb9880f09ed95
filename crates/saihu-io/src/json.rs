//! JSON network descriptions.
//!
//! The interchange format of the analyzer: an object with free-form
//! `network` metadata (name, declared units), a `servers` array (service
//! curve as parallel `latencies`/`rates` lists, output capacity) and a
//! `flows` array (arrival curve as parallel `bursts`/`rates` lists, a path
//! of server names, packet lengths, optional multicast paths). Quantities
//! may be numbers in the declared default units or unit-suffixed strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use saihu_core::{
    Curve, Flow, FlowId, Gvbr, LeakyBucket, MaxOfRateLatencies, NamedPath, Network, RateLatency,
    Server, ServerId,
};

use crate::error::IoError;
use crate::units::{parse_data, parse_rate, parse_time, DefaultUnits};

/// A quantity: a bare number (default units) or a unit-suffixed string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(f64),
    Text(String),
}

impl Quantity {
    pub fn as_time(&self, defaults: &DefaultUnits) -> Result<f64, IoError> {
        match self {
            Quantity::Number(value) => Ok(value * defaults.time),
            Quantity::Text(text) => Ok(parse_time(text, defaults)?),
        }
    }

    pub fn as_data(&self, defaults: &DefaultUnits) -> Result<f64, IoError> {
        match self {
            Quantity::Number(value) => Ok(value * defaults.data),
            Quantity::Text(text) => Ok(parse_data(text, defaults)?),
        }
    }

    pub fn as_rate(&self, defaults: &DefaultUnits) -> Result<f64, IoError> {
        match self {
            Quantity::Number(value) => Ok(value * defaults.rate),
            Quantity::Text(text) => Ok(parse_rate(text, defaults)?),
        }
    }
}

/// Free-form network metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub time_unit: Option<String>,
    #[serde(default)]
    pub data_unit: Option<String>,
    #[serde(default)]
    pub rate_unit: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A service curve given as parallel latency and rate lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCurveDescription {
    pub latencies: Vec<Quantity>,
    pub rates: Vec<Quantity>,
}

/// An arrival curve given as parallel burst and rate lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalCurveDescription {
    pub bursts: Vec<Quantity>,
    pub rates: Vec<Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescription {
    pub name: String,
    pub service_curve: ServiceCurveDescription,
    #[serde(default)]
    pub capacity: Option<Quantity>,
    #[serde(default)]
    pub max_packet_length: Option<Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MulticastPathDescription {
    pub name: String,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDescription {
    pub name: String,
    pub path: Vec<String>,
    pub arrival_curve: ArrivalCurveDescription,
    #[serde(default)]
    pub max_packet_length: Option<Quantity>,
    #[serde(default)]
    pub min_packet_length: Option<Quantity>,
    #[serde(default)]
    pub multicast: Vec<MulticastPathDescription>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A complete network description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(default)]
    pub network: NetworkMeta,
    pub servers: Vec<ServerDescription>,
    pub flows: Vec<FlowDescription>,
}

impl NetworkDescription {
    pub fn from_json(text: &str) -> Result<Self, IoError> {
        serde_json::from_str(text).map_err(IoError::from)
    }

    pub fn to_json(&self) -> Result<String, IoError> {
        serde_json::to_string_pretty(self).map_err(IoError::from)
    }

    fn defaults(&self) -> Result<DefaultUnits, IoError> {
        Ok(DefaultUnits::from_strings(
            self.network.time_unit.as_deref(),
            self.network.data_unit.as_deref(),
            self.network.rate_unit.as_deref(),
        )?)
    }

    /// Build the canonical model: resolve units, sanitize the curve lists,
    /// resolve server names, validate, and fill the per-server packet
    /// lengths.
    pub fn build(&self) -> Result<Network, IoError> {
        let defaults = self.defaults()?;
        let mut servers = Vec::with_capacity(self.servers.len());
        for (j, description) in self.servers.iter().enumerate() {
            let latencies: Vec<f64> = description
                .service_curve
                .latencies
                .iter()
                .map(|q| q.as_time(&defaults))
                .collect::<Result<_, _>>()?;
            let rates: Vec<f64> = description
                .service_curve
                .rates
                .iter()
                .map(|q| q.as_rate(&defaults))
                .collect::<Result<_, _>>()?;
            let service = service_curve(&latencies, &rates).ok_or_else(|| {
                IoError::InvalidNetwork(format!(
                    "server {}: malformed service curve",
                    description.name
                ))
            })?;
            let mut server = Server::new(ServerId::new(j), description.name.clone(), service);
            if let Some(capacity) = &description.capacity {
                server = server.with_capacity(capacity.as_rate(&defaults)?);
            }
            if let Some(l_max) = &description.max_packet_length {
                server.max_packet_length = Some(l_max.as_data(&defaults)?);
            }
            servers.push(server);
        }

        let mut network = Network::new(
            self.network.name.clone().unwrap_or_else(|| "network".into()),
            servers,
        );
        for (i, description) in self.flows.iter().enumerate() {
            let bursts: Vec<f64> = description
                .arrival_curve
                .bursts
                .iter()
                .map(|q| q.as_data(&defaults))
                .collect::<Result<_, _>>()?;
            let rates: Vec<f64> = description
                .arrival_curve
                .rates
                .iter()
                .map(|q| q.as_rate(&defaults))
                .collect::<Result<_, _>>()?;
            let arrival = arrival_curve(&bursts, &rates).ok_or_else(|| {
                IoError::InvalidNetwork(format!(
                    "flow {}: malformed arrival curve",
                    description.name
                ))
            })?;
            let path = self.resolve_path(&network, &description.name, &description.path)?;
            let mut flow = Flow::new(FlowId::new(i), description.name.clone(), path, arrival);
            if let Some(l_max) = &description.max_packet_length {
                flow.max_packet_length = l_max.as_data(&defaults)?;
            }
            if let Some(l_min) = &description.min_packet_length {
                flow.min_packet_length = l_min.as_data(&defaults)?;
            }
            for multicast in &description.multicast {
                flow.multicast.push(NamedPath {
                    name: multicast.name.clone(),
                    path: self.resolve_path(&network, &description.name, &multicast.path)?,
                });
            }
            for (key, value) in &description.extra {
                if let Some(text) = value.as_str() {
                    flow.properties.insert(key.clone(), text.to_string());
                } else {
                    flow.properties.insert(key.clone(), value.to_string());
                }
            }
            network.add_flow(flow);
        }
        network.validate()?;
        network.assign_server_packet_lengths();
        Ok(network)
    }

    fn resolve_path(
        &self,
        network: &Network,
        flow: &str,
        names: &[String],
    ) -> Result<Vec<ServerId>, IoError> {
        names
            .iter()
            .map(|name| {
                network
                    .server_by_name(name)
                    .map(|server| server.id)
                    .ok_or_else(|| {
                        IoError::InvalidNetwork(format!(
                            "flow {flow}: path references unknown server {name:?}"
                        ))
                    })
            })
            .collect()
    }
}

/// Build a concave arrival curve from parallel burst/rate lists: sort by
/// burst ascending and drop dominated segments (equal bursts keep the lower
/// rate; a larger burst must come with a strictly lower rate).
pub fn arrival_curve(bursts: &[f64], rates: &[f64]) -> Option<Curve> {
    if bursts.is_empty() || bursts.len() != rates.len() {
        return None;
    }
    let mut points: Vec<(f64, f64)> = bursts.iter().copied().zip(rates.iter().copied()).collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut kept: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for (burst, rate) in points {
        if burst < 0.0 || rate < 0.0 {
            return None;
        }
        match kept.last() {
            Some((last_burst, last_rate)) => {
                if burst == *last_burst {
                    if rate < *last_rate {
                        kept.pop();
                        kept.push((burst, rate));
                    }
                } else if rate < *last_rate {
                    kept.push((burst, rate));
                }
            }
            None => kept.push((burst, rate)),
        }
    }
    let buckets: Vec<LeakyBucket> = kept
        .into_iter()
        .map(|(burst, rate)| LeakyBucket::new(rate, burst))
        .collect();
    Some(Gvbr::new(buckets).into_curve())
}

/// Build a convex service curve from parallel latency/rate lists: sort by
/// latency ascending and drop dominated segments (a larger latency must come
/// with a strictly higher rate).
pub fn service_curve(latencies: &[f64], rates: &[f64]) -> Option<Curve> {
    if latencies.is_empty() || latencies.len() != rates.len() {
        return None;
    }
    let mut points: Vec<(f64, f64)> = latencies
        .iter()
        .copied()
        .zip(rates.iter().copied())
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut kept: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for (latency, rate) in points {
        if latency < 0.0 || rate < 0.0 {
            return None;
        }
        match kept.last() {
            Some((last_latency, last_rate)) => {
                if latency == *last_latency {
                    if rate > *last_rate {
                        kept.pop();
                        kept.push((latency, rate));
                    }
                } else if rate > *last_rate {
                    kept.push((latency, rate));
                }
            }
            None => kept.push((latency, rate)),
        }
    }
    if kept.len() == 1 {
        return Some(Curve::rate_latency(kept[0].1, kept[0].0));
    }
    let mut max = MaxOfRateLatencies::new(RateLatency::new(kept[0].1, kept[0].0));
    for (latency, rate) in kept.into_iter().skip(1) {
        max.max_with(RateLatency::new(rate, latency));
    }
    Some(Curve::MaxOfRateLatencies(max))
}

/// Load a network from a JSON file.
pub fn load_json(path: &std::path::Path) -> Result<Network, IoError> {
    let text = std::fs::read_to_string(path)?;
    NetworkDescription::from_json(&text)?.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TANDEM: &str = r#"{
        "network": {"name": "tandem", "time_unit": "s", "data_unit": "b", "rate_unit": "bps"},
        "servers": [
            {"name": "s0", "service_curve": {"latencies": [1], "rates": [4]}, "capacity": 8},
            {"name": "s1", "service_curve": {"latencies": [1], "rates": [4]}, "capacity": 8}
        ],
        "flows": [
            {"name": "f0", "path": ["s0", "s1"],
             "arrival_curve": {"bursts": [1], "rates": [1]}, "max_packet_length": 0},
            {"name": "f1", "path": ["s0"],
             "arrival_curve": {"bursts": [1], "rates": [1]}, "max_packet_length": 0}
        ]
    }"#;

    #[test]
    fn test_build_tandem() {
        let network = NetworkDescription::from_json(TANDEM).unwrap().build().unwrap();
        assert_eq!(network.num_servers(), 2);
        assert_eq!(network.num_flows(), 2);
        let f0 = network.flow_by_name("f0").unwrap();
        assert_eq!(f0.path.len(), 2);
        assert_eq!(f0.arrival, Curve::leaky_bucket(1.0, 1.0));
        let s0 = network.server_by_name("s0").unwrap();
        assert_eq!(s0.capacity.value(), 8.0);
        assert_eq!(s0.service, Curve::rate_latency(4.0, 1.0));
    }

    #[test]
    fn test_unknown_server_rejected() {
        let bad = TANDEM.replace("\"s1\"]", "\"nowhere\"]");
        let err = NetworkDescription::from_json(&bad).unwrap().build().unwrap_err();
        assert!(matches!(err, IoError::InvalidNetwork(_)));
    }

    #[test]
    fn test_unit_strings_in_quantities() {
        let description = r#"{
            "network": {"name": "n"},
            "servers": [
                {"name": "s0", "service_curve": {"latencies": ["10us"], "rates": ["100Mbps"]}, "capacity": "1Gbps"}
            ],
            "flows": [
                {"name": "f0", "path": ["s0"],
                 "arrival_curve": {"bursts": ["64B"], "rates": ["1Mbps"]}, "max_packet_length": "64B"}
            ]
        }"#;
        let network = NetworkDescription::from_json(description)
            .unwrap()
            .build()
            .unwrap();
        let s0 = network.server_by_name("s0").unwrap();
        assert_eq!(s0.service, Curve::rate_latency(1e8, 1e-5));
        assert_eq!(s0.capacity.value(), 1e9);
        let f0 = network.flow_by_name("f0").unwrap();
        assert_eq!(f0.arrival, Curve::leaky_bucket(1e6, 512.0));
    }

    #[test]
    fn test_arrival_curve_sanitation() {
        // dominated point (larger burst, larger rate) is dropped
        let curve = arrival_curve(&[1.0, 3.0, 2.0], &[4.0, 5.0, 2.0]).unwrap();
        match curve {
            Curve::Gvbr(g) => {
                let segments: Vec<_> = g.segments().collect();
                assert_eq!(segments.len(), 2);
                assert_eq!(segments[0].burst(), 1.0);
                assert_eq!(segments[1].burst(), 2.0);
            }
            other => panic!("expected GVBR, got {other}"),
        }
    }

    #[test]
    fn test_service_curve_sanitation() {
        // dominated point (larger latency, lower rate) is dropped
        let curve = service_curve(&[1.0, 2.0], &[8.0, 4.0]).unwrap();
        assert_eq!(curve, Curve::rate_latency(8.0, 1.0));
        let curve = service_curve(&[1.0, 2.0], &[4.0, 8.0]).unwrap();
        assert!(matches!(curve, Curve::MaxOfRateLatencies(_)));
    }

    #[test]
    fn test_roundtrip_json() {
        let description = NetworkDescription::from_json(TANDEM).unwrap();
        let text = description.to_json().unwrap();
        let again = NetworkDescription::from_json(&text).unwrap();
        assert_eq!(again.servers.len(), 2);
        assert_eq!(again.flows.len(), 2);
    }
}
