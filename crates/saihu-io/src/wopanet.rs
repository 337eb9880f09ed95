//! WOPANet XML dialect.
//!
//! The XML description models the physical network: stations and switches
//! with per-node service attributes, links with `fromPort`/`toPort`, and
//! flows whose `target` elements list the traversed physical nodes. The
//! analyzer works on output ports, named `<node>-<port>`; the reader
//! derives them from the links each flow path uses.

use std::collections::BTreeMap;

use quick_xml::events::attributes::Attributes;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::IoError;

#[derive(Debug, Clone, Default)]
pub struct WopanetNode {
    pub name: String,
    pub is_switch: bool,
    pub attrs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct WopanetLink {
    pub name: String,
    pub from: String,
    pub from_port: String,
    pub to: String,
    pub to_port: String,
}

#[derive(Debug, Clone, Default)]
pub struct WopanetFlow {
    pub name: String,
    pub source: String,
    pub attrs: BTreeMap<String, String>,
    /// Named targets: each is a list of traversed physical nodes.
    pub targets: Vec<(String, Vec<String>)>,
}

/// The parsed physical description.
#[derive(Debug, Clone, Default)]
pub struct WopanetDescription {
    pub network: BTreeMap<String, String>,
    pub nodes: Vec<WopanetNode>,
    pub links: Vec<WopanetLink>,
    pub flows: Vec<WopanetFlow>,
}

fn attribute_map(attrs: Attributes<'_>) -> Result<BTreeMap<String, String>, IoError> {
    let mut out = BTreeMap::new();
    for attr in attrs {
        let attr = attr.map_err(|e| IoError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| IoError::Xml(e.to_string()))?
            .to_string();
        out.insert(key, value);
    }
    Ok(out)
}

impl WopanetDescription {
    /// Parse a WOPANet XML document.
    pub fn from_xml(text: &str) -> Result<Self, IoError> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);
        let mut description = WopanetDescription::default();
        let mut current_flow: Option<WopanetFlow> = None;
        let mut current_target: Option<(String, Vec<String>)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                    let mut attrs = attribute_map(element.attributes())?;
                    match name.as_str() {
                        "network" => description.network = attrs,
                        "station" | "switch" => {
                            let node_name = attrs.remove("name").ok_or_else(|| {
                                IoError::InvalidNetwork(format!("a {name} has no name"))
                            })?;
                            description.nodes.push(WopanetNode {
                                name: node_name,
                                is_switch: name == "switch",
                                attrs,
                            });
                        }
                        "link" => {
                            description.links.push(WopanetLink {
                                name: attrs.remove("name").unwrap_or_default(),
                                from: attrs.remove("from").ok_or_else(|| {
                                    IoError::InvalidNetwork("link without 'from'".into())
                                })?,
                                from_port: attrs.remove("fromPort").unwrap_or_else(|| "0".into()),
                                to: attrs.remove("to").ok_or_else(|| {
                                    IoError::InvalidNetwork("link without 'to'".into())
                                })?,
                                to_port: attrs.remove("toPort").unwrap_or_else(|| "0".into()),
                            });
                        }
                        "flow" => {
                            current_flow = Some(WopanetFlow {
                                name: attrs.remove("name").unwrap_or_else(|| {
                                    format!("fl{}", description.flows.len())
                                }),
                                source: attrs.remove("source").ok_or_else(|| {
                                    IoError::InvalidNetwork("flow without 'source'".into())
                                })?,
                                attrs,
                                targets: Vec::new(),
                            });
                        }
                        "target" => {
                            let target_name = attrs.remove("name").unwrap_or_else(|| {
                                let index = current_flow
                                    .as_ref()
                                    .map(|flow| flow.targets.len())
                                    .unwrap_or(0);
                                format!("p{index}")
                            });
                            current_target = Some((target_name, Vec::new()));
                        }
                        "path" => {
                            let node = attrs.remove("node").ok_or_else(|| {
                                IoError::InvalidNetwork("path step without 'node'".into())
                            })?;
                            if let Some((_, steps)) = current_target.as_mut() {
                                steps.push(node);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                    match name.as_str() {
                        "target" => {
                            if let (Some(flow), Some(target)) =
                                (current_flow.as_mut(), current_target.take())
                            {
                                flow.targets.push(target);
                            }
                        }
                        "flow" => {
                            if let Some(flow) = current_flow.take() {
                                description.flows.push(flow);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Err(err) => return Err(IoError::Xml(err.to_string())),
                _ => {}
            }
        }
        Ok(description)
    }

    pub fn node(&self, name: &str) -> Option<&WopanetNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// The output port a path step uses: the link between the two physical
    /// nodes, seen from `from`.
    pub fn output_port(&self, from: &str, to: &str) -> Result<String, IoError> {
        for link in &self.links {
            if link.from == from && link.to == to {
                return Ok(format!("{}-{}", from, link.from_port));
            }
            if link.to == from && link.from == to {
                return Ok(format!("{}-{}", from, link.to_port));
            }
        }
        Err(IoError::InvalidNetwork(format!(
            "no physical link between {from} and {to}"
        )))
    }

    /// Serialize back to XML.
    pub fn to_xml(&self) -> Result<String, IoError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Start(BytesStart::new("elementary")))?;

        let mut network = BytesStart::new("network");
        for (key, value) in &self.network {
            network.push_attribute((key.as_str(), value.as_str()));
        }
        writer.write_event(Event::Empty(network))?;

        for node in &self.nodes {
            let tag = if node.is_switch { "switch" } else { "station" };
            let mut element = BytesStart::new(tag);
            element.push_attribute(("name", node.name.as_str()));
            for (key, value) in &node.attrs {
                element.push_attribute((key.as_str(), value.as_str()));
            }
            writer.write_event(Event::Empty(element))?;
        }
        for link in &self.links {
            let mut element = BytesStart::new("link");
            element.push_attribute(("name", link.name.as_str()));
            element.push_attribute(("from", link.from.as_str()));
            element.push_attribute(("fromPort", link.from_port.as_str()));
            element.push_attribute(("to", link.to.as_str()));
            element.push_attribute(("toPort", link.to_port.as_str()));
            writer.write_event(Event::Empty(element))?;
        }
        for flow in &self.flows {
            let mut element = BytesStart::new("flow");
            element.push_attribute(("name", flow.name.as_str()));
            element.push_attribute(("source", flow.source.as_str()));
            for (key, value) in &flow.attrs {
                element.push_attribute((key.as_str(), value.as_str()));
            }
            writer.write_event(Event::Start(element))?;
            for (target_name, steps) in &flow.targets {
                let mut target = BytesStart::new("target");
                target.push_attribute(("name", target_name.as_str()));
                writer.write_event(Event::Start(target))?;
                for step in steps {
                    let mut path = BytesStart::new("path");
                    path.push_attribute(("node", step.as_str()));
                    writer.write_event(Event::Empty(path))?;
                }
                writer.write_event(Event::End(BytesEnd::new("target")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("flow")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("elementary")))?;
        let bytes = writer.into_inner();
        String::from_utf8(bytes).map_err(|e| IoError::Xml(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RING: &str = r#"<elementary>
        <network name="ring" technology="FIFO+IS"/>
        <station name="st0" service-latency="1s" service-rate="100bps" transmission-capacity="50bps"/>
        <switch name="sw0" service-latency="1s" service-rate="100bps" transmission-capacity="50bps"/>
        <link from="st0" fromPort="0" to="sw0" toPort="1" name="l0"/>
        <flow name="f0" source="st0" arrival-curve="leaky-bucket" lb-burst="1b" lb-rate="1bps">
            <target name="t0">
                <path node="sw0"/>
            </target>
        </flow>
    </elementary>"#;

    #[test]
    fn test_parse_topology() {
        let description = WopanetDescription::from_xml(RING).unwrap();
        assert_eq!(description.network.get("name").unwrap(), "ring");
        assert_eq!(description.nodes.len(), 2);
        assert!(description.node("sw0").unwrap().is_switch);
        assert_eq!(description.links.len(), 1);
        assert_eq!(description.flows.len(), 1);
        let flow = &description.flows[0];
        assert_eq!(flow.source, "st0");
        assert_eq!(flow.targets[0].1, vec!["sw0".to_string()]);
    }

    #[test]
    fn test_output_port_naming() {
        let description = WopanetDescription::from_xml(RING).unwrap();
        assert_eq!(description.output_port("st0", "sw0").unwrap(), "st0-0");
        assert_eq!(description.output_port("sw0", "st0").unwrap(), "sw0-1");
        assert!(description.output_port("st0", "nowhere").is_err());
    }

    #[test]
    fn test_xml_roundtrip() {
        let description = WopanetDescription::from_xml(RING).unwrap();
        let text = description.to_xml().unwrap();
        let again = WopanetDescription::from_xml(&text).unwrap();
        assert_eq!(again.nodes.len(), description.nodes.len());
        assert_eq!(again.links.len(), description.links.len());
        assert_eq!(again.flows[0].targets, description.flows[0].targets);
    }
}
