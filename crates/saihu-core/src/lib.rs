//! # saihu-core: Network-Calculus Modeling Core
//!
//! Provides the min-plus curve algebra and the canonical network model used
//! by every worst-case delay analysis method in the Saihu workspace.
//!
//! ## Design Philosophy
//!
//! Time-sensitive networks are modeled as a set of output-port **servers**
//! crossed by **flows**; every quantitative statement is carried by a curve:
//! - **Arrival curves** bound the data a flow can produce over any interval.
//! - **Service curves** bound from below the service a server offers.
//! - Delay bounds are horizontal distances between the two.
//!
//! The curve variants form a closed set ([`Curve`]) dispatched with a
//! central `match` per operation; the analyzers consume the model read-only
//! and carry their mutable state in [`FlowState`] values that are always
//! copied, never aliased.
//!
//! ## Quick Start
//!
//! ```rust
//! use saihu_core::*;
//!
//! // Two flows of rate 1, burst 1 through a rate-4, latency-1 server:
//! let aggregate = Curve::leaky_bucket(1.0, 1.0)
//!     .add(&Curve::leaky_bucket(1.0, 1.0))
//!     .unwrap();
//! let service = Curve::rate_latency(4.0, 1.0);
//! let delay = aggregate.hdist(&service).unwrap();
//! assert_eq!(delay, 1.5);
//! ```
//!
//! ## Modules
//!
//! - [`curve`] - min-plus curve variants and operations
//! - [`clock`] - time model and per-point clocks
//! - [`model`] - servers, flows, networks and their cached topology
//! - [`flow_graph`] - per-flow graphs and the flow-induced graph
//! - [`flow_state`] - per-observation-point flow states
//! - [`curve_registry`] - dynamic curve lookup with postponement errors
//! - [`diagnostics`] - load-time validation reporting
//! - [`units`] - unit-typed quantities and SI report scaling

pub mod clock;
pub mod curve;
pub mod curve_registry;
pub mod diagnostics;
pub mod error;
pub mod flow_graph;
pub mod flow_state;
pub mod model;
pub mod units;

pub use clock::{Clock, ClockModel};
pub use curve::{Curve, DelayedGvbr, Gvbr, LeakyBucket, MaxOfRateLatencies, RateLatency};
pub use curve_registry::{CurveRegistry, LookupError};
pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{CoreError, CoreResult, CurveError};
pub use flow_graph::{AtEdge, FlowGraph, GraphEdge, InducedGraph};
pub use flow_state::{AdamData, FlowState, RefPoint, StateFlags};
pub use model::{Flow, FlowId, NamedPath, Network, Server, ServerId};
pub use units::{
    decide_min_multiplier, decide_multiplier, multiplier_factor, Bits, BitsPerSecond, Seconds,
};
