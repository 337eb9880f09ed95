//! # saihu-io: Network Description Input/Output
//!
//! Readers and writers for the two network description formats the analyzer
//! consumes:
//!
//! - the JSON form ([`json::NetworkDescription`]): servers with service
//!   curves as latency/rate lists, flows with burst/rate arrival lists and
//!   server-name paths;
//! - the WOPANet XML dialect ([`wopanet::WopanetDescription`]): physical
//!   stations, switches and links, flows walking physical nodes.
//!
//! Quantities accept unit-suffixed strings (`10ms`, `64B`, `100Mbps`);
//! bare numbers take the description's declared default units. Both forms
//! convert losslessly for every field the analysis core consumes
//! ([`convert`]); malformed descriptions are rejected at load time.

pub mod convert;
pub mod error;
pub mod json;
pub mod units;
pub mod wopanet;

pub use convert::{json_to_wopanet, wopanet_to_json};
pub use error::IoError;
pub use json::{load_json, NetworkDescription};
pub use units::{parse_data, parse_rate, parse_time, DefaultUnits, UnitError};
pub use wopanet::WopanetDescription;

use saihu_core::Network;
use std::path::Path;

/// Load a network from a JSON or XML description, deciding by extension.
pub fn load_network(path: &Path) -> Result<Network, IoError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => {
            let text = std::fs::read_to_string(path)?;
            let wopanet = WopanetDescription::from_xml(&text)?;
            wopanet_to_json(&wopanet)?.build()
        }
        _ => load_json(path),
    }
}
