//! Conversion between the WOPANet XML dialect and the JSON description.
//!
//! The XML form models physical nodes and links; the JSON form (and the
//! analyzer) models output ports. The conversion derives one server per
//! output port used by some flow, carrying the owning node's service
//! attributes, and rewrites flow paths as output-port sequences. Every field
//! the analysis core consumes survives a round trip.

use std::collections::BTreeMap;

use crate::error::IoError;
use crate::json::{
    ArrivalCurveDescription, FlowDescription, MulticastPathDescription, NetworkDescription,
    NetworkMeta, Quantity, ServerDescription, ServiceCurveDescription,
};
use crate::units::{parse_data, parse_rate, parse_time, DefaultUnits};
use crate::wopanet::{WopanetDescription, WopanetFlow, WopanetLink, WopanetNode};

fn quantity(text: &str) -> Quantity {
    Quantity::Text(text.to_string())
}

/// The output-port walk of one target.
fn port_path(
    description: &WopanetDescription,
    flow: &WopanetFlow,
    steps: &[String],
) -> Result<Vec<String>, IoError> {
    let mut ports = Vec::with_capacity(steps.len());
    let mut current = flow.source.clone();
    for step in steps {
        ports.push(description.output_port(&current, step)?);
        current = step.clone();
    }
    Ok(ports)
}

fn arrival_curve_of(flow: &WopanetFlow, defaults: &DefaultUnits) -> Result<ArrivalCurveDescription, IoError> {
    if flow.attrs.get("arrival-curve").map(String::as_str) == Some("leaky-bucket") {
        let burst = flow.attrs.get("lb-burst").cloned().unwrap_or_else(|| "0".into());
        let rate = flow.attrs.get("lb-rate").cloned().unwrap_or_else(|| "0".into());
        return Ok(ArrivalCurveDescription {
            bursts: vec![quantity(&burst)],
            rates: vec![quantity(&rate)],
        });
    }
    if let Some(period) = flow.attrs.get("period") {
        // periodic source with bounded jitter: ideal envelope deconvolved
        // by the jitter
        let period = parse_time(period, defaults)?;
        let jitter = flow
            .attrs
            .get("jitter")
            .map(|j| parse_time(j, defaults))
            .transpose()?
            .unwrap_or(0.0);
        let payload = flow
            .attrs
            .get("max-payload")
            .map(|p| parse_data(p, defaults))
            .transpose()?
            .unwrap_or(12_000.0);
        let packets: f64 = flow
            .attrs
            .get("max-simultaneous-packets")
            .and_then(|n| n.parse().ok())
            .unwrap_or(1.0);
        let rate = payload * packets / period;
        return Ok(ArrivalCurveDescription {
            bursts: vec![Quantity::Number(payload + rate * jitter)],
            rates: vec![Quantity::Number(rate)],
        });
    }
    Err(IoError::InvalidNetwork(format!(
        "flow {}: no arrival-curve description",
        flow.name
    )))
}

/// Convert a parsed WOPANet description into the JSON form.
pub fn wopanet_to_json(description: &WopanetDescription) -> Result<NetworkDescription, IoError> {
    let defaults = DefaultUnits::from_strings(
        description.network.get("time-unit").map(String::as_str),
        description.network.get("data-unit").map(String::as_str),
        description.network.get("rate-unit").map(String::as_str),
    )?;

    // collect the output ports actually used, in first-use order
    let mut ports: Vec<String> = Vec::new();
    let mut flows = Vec::new();
    for flow in &description.flows {
        let mut paths = Vec::with_capacity(flow.targets.len());
        for (_, steps) in &flow.targets {
            let path = port_path(description, flow, steps)?;
            for port in &path {
                if !ports.contains(port) {
                    ports.push(port.clone());
                }
            }
            paths.push(path);
        }
        if paths.is_empty() {
            return Err(IoError::InvalidNetwork(format!(
                "flow {}: no target",
                flow.name
            )));
        }
        let mut extra = BTreeMap::new();
        for (key, value) in &flow.attrs {
            if !matches!(
                key.as_str(),
                "arrival-curve" | "lb-burst" | "lb-rate" | "period" | "jitter"
            ) {
                extra.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }
        flows.push(FlowDescription {
            name: flow.name.clone(),
            path: paths[0].clone(),
            arrival_curve: arrival_curve_of(flow, &defaults)?,
            max_packet_length: flow.attrs.get("max-payload").map(|p| quantity(p)),
            min_packet_length: flow.attrs.get("min-payload").map(|p| quantity(p)),
            multicast: flow
                .targets
                .iter()
                .zip(paths.iter())
                .skip(1)
                .map(|((name, _), path)| MulticastPathDescription {
                    name: name.clone(),
                    path: path.clone(),
                })
                .collect(),
            extra,
        });
    }

    let mut servers = Vec::with_capacity(ports.len());
    for port in &ports {
        let (node_name, _) = port.rsplit_once('-').ok_or_else(|| {
            IoError::InvalidNetwork(format!("malformed output port name {port:?}"))
        })?;
        let node = description.node(node_name).ok_or_else(|| {
            IoError::InvalidNetwork(format!("output port {port:?} of unknown node"))
        })?;
        servers.push(server_of_port(port, node)?);
    }

    Ok(NetworkDescription {
        network: NetworkMeta {
            name: description.network.get("name").cloned(),
            time_unit: description.network.get("time-unit").cloned(),
            data_unit: description.network.get("data-unit").cloned(),
            rate_unit: description.network.get("rate-unit").cloned(),
            extra: description
                .network
                .iter()
                .filter(|(key, _)| {
                    !matches!(key.as_str(), "name" | "time-unit" | "data-unit" | "rate-unit")
                })
                .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
                .collect(),
        },
        servers,
        flows,
    })
}

fn server_of_port(port: &str, node: &WopanetNode) -> Result<ServerDescription, IoError> {
    let latency = node
        .attrs
        .get("service-latency")
        .cloned()
        .unwrap_or_else(|| "0".into());
    let rate = node
        .attrs
        .get("service-rate")
        .or_else(|| node.attrs.get("transmission-capacity"))
        .cloned()
        .unwrap_or_else(|| "0".into());
    Ok(ServerDescription {
        name: port.to_string(),
        service_curve: ServiceCurveDescription {
            latencies: vec![quantity(&latency)],
            rates: vec![quantity(&rate)],
        },
        capacity: node.attrs.get("transmission-capacity").map(|c| quantity(c)),
        max_packet_length: None,
    })
}

/// Convert a JSON description into the WOPANet form: one switch per server,
/// one port per adjacency edge, flows walking the switch chain.
pub fn json_to_wopanet(description: &NetworkDescription) -> Result<WopanetDescription, IoError> {
    let network = description.build()?;
    let mut out = WopanetDescription::default();
    if let Some(name) = &description.network.name {
        out.network.insert("name".into(), name.clone());
    }
    for (key, unit) in [
        ("time-unit", &description.network.time_unit),
        ("data-unit", &description.network.data_unit),
        ("rate-unit", &description.network.rate_unit),
    ] {
        if let Some(unit) = unit {
            out.network.insert(key.into(), unit.clone());
        }
    }

    for server in network.servers() {
        let mut attrs = BTreeMap::new();
        let (rate, latency) = match &server.service {
            saihu_core::Curve::RateLatency(rl) => (rl.rate(), rl.latency()),
            saihu_core::Curve::MaxOfRateLatencies(m) => {
                let first = m.curves()[0];
                (first.rate(), first.latency())
            }
            _ => (0.0, 0.0),
        };
        attrs.insert("service-latency".into(), format!("{latency}s"));
        attrs.insert("service-rate".into(), format!("{rate}bps"));
        if server.capacity.value() > 0.0 {
            attrs.insert(
                "transmission-capacity".into(),
                format!("{}bps", server.capacity.value()),
            );
        }
        out.nodes.push(WopanetNode {
            name: server.name.clone(),
            is_switch: true,
            attrs,
        });
    }
    // one sink station per leaf server keeps the paths well-formed
    out.nodes.push(WopanetNode {
        name: "sink".into(),
        is_switch: false,
        attrs: BTreeMap::new(),
    });

    let mut link_index = 0usize;
    let mut push_link = |out: &mut WopanetDescription, from: &str, to: &str| {
        if !out.links.iter().any(|l| l.from == from && l.to == to) {
            out.links.push(WopanetLink {
                name: format!("l{link_index}"),
                from: from.to_string(),
                from_port: "0".into(),
                to: to.to_string(),
                to_port: format!("i{link_index}"),
            });
            link_index += 1;
        }
    };
    for flow in network.flows() {
        for path in flow.all_paths() {
            for pair in path.windows(2) {
                let from = network.server(pair[0]).name.clone();
                let to = network.server(pair[1]).name.clone();
                push_link(&mut out, &from, &to);
            }
            if let Some(last) = path.last() {
                let from = network.server(*last).name.clone();
                push_link(&mut out, &from, "sink");
            }
        }
    }

    for flow in network.flows() {
        let mut attrs = BTreeMap::new();
        let lb = flow
            .arrival
            .to_leaky_bucket_min_burst()
            .map_err(|e| IoError::InvalidNetwork(e.to_string()))?;
        attrs.insert("arrival-curve".into(), "leaky-bucket".into());
        attrs.insert("lb-burst".into(), format!("{}b", lb.burst()));
        attrs.insert("lb-rate".into(), format!("{}bps", lb.rate()));
        attrs.insert(
            "max-payload".into(),
            format!("{}b", flow.max_packet_length),
        );
        attrs.insert(
            "min-payload".into(),
            format!("{}b", flow.min_packet_length),
        );
        for (key, value) in &flow.properties {
            attrs.entry(key.clone()).or_insert_with(|| value.clone());
        }
        let source = network.server(flow.path[0]).name.clone();
        let mut targets = Vec::new();
        let mut push_target = |name: String, path: &[saihu_core::ServerId]| {
            let mut steps: Vec<String> = path
                .iter()
                .skip(1)
                .map(|s| network.server(*s).name.clone())
                .collect();
            steps.push("sink".into());
            targets.push((name, steps));
        };
        push_target("p0".into(), &flow.path);
        for (index, multicast) in flow.multicast.iter().enumerate() {
            push_target(format!("p{}", index + 1), &multicast.path);
        }
        out.flows.push(WopanetFlow {
            name: flow.name.clone(),
            source,
            attrs,
            targets,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<elementary>
        <network name="demo"/>
        <station name="st0" service-latency="1s" service-rate="4bps" transmission-capacity="8bps"/>
        <switch name="sw0" service-latency="1s" service-rate="4bps" transmission-capacity="8bps"/>
        <station name="st1"/>
        <link from="st0" fromPort="0" to="sw0" toPort="0" name="l0"/>
        <link from="sw0" fromPort="1" to="st1" toPort="0" name="l1"/>
        <flow name="f0" source="st0" arrival-curve="leaky-bucket" lb-burst="1b" lb-rate="1bps" max-payload="64b">
            <target name="t0">
                <path node="sw0"/>
                <path node="st1"/>
            </target>
        </flow>
    </elementary>"#;

    #[test]
    fn test_xml_to_json_ports() {
        let wopanet = WopanetDescription::from_xml(XML).unwrap();
        let json = wopanet_to_json(&wopanet).unwrap();
        // two output ports used: st0-0 and sw0-1
        let names: Vec<&str> = json.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["st0-0", "sw0-1"]);
        assert_eq!(json.flows[0].path, vec!["st0-0", "sw0-1"]);
        // the converted description builds a valid core network
        let network = json.build().unwrap();
        assert_eq!(network.num_servers(), 2);
        assert_eq!(network.num_flows(), 1);
    }

    #[test]
    fn test_json_roundtrip_preserves_core_fields() {
        let wopanet = WopanetDescription::from_xml(XML).unwrap();
        let json = wopanet_to_json(&wopanet).unwrap();
        let network_before = json.build().unwrap();
        let back = json_to_wopanet(&json).unwrap();
        let json_again = wopanet_to_json(&back).unwrap();
        let network_after = json_again.build().unwrap();
        assert_eq!(network_before.num_servers(), network_after.num_servers());
        assert_eq!(network_before.num_flows(), network_after.num_flows());
        let f_before = network_before.flow_by_name("f0").unwrap();
        let f_after = network_after.flow_by_name("f0").unwrap();
        assert_eq!(f_before.arrival, f_after.arrival);
        assert_eq!(f_before.path.len(), f_after.path.len());
    }
}
