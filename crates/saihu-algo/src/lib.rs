//! # saihu-algo: Delay-Bound Analysis Algorithms
//!
//! This crate provides the network-calculus analysis engines operating on
//! the [`saihu_core`] model:
//!
//! | Engine | Description |
//! |--------|-------------|
//! | [`FeedForwardAnalysis`] | Pipeline-based total flow analysis over an acyclic flow-induced graph |
//! | [`CyclicAnalysis`] | Fix-point iteration over a cyclic graph cut along a minimum feedback arc set |
//! | [`mfas`] | Feedback-arc-set solvers (linear heuristic, exact lazy-constraint MILP) |
//! | [`report`] | Aggregation of per-method results into a common report |
//!
//! ## Architecture
//!
//! Every node of the flow-induced graph owns three ordered pipelines of
//! capability values (aggregate computation, delay bound, flow-state
//! update); each step type decides its own installation from the node's
//! configuration flags. The drivers schedule nodes along the edge-ready
//! relation and translate missing-curve errors into postponement.
//!
//! ## Example
//!
//! ```no_run
//! use saihu_algo::xtfa::{AnalysisConfig, FeedForwardAnalysis};
//! use saihu_core::Network;
//!
//! # fn run(network: Network) -> anyhow::Result<()> {
//! let config = AnalysisConfig::tfa_pp();
//! let mut analysis = FeedForwardAnalysis::new(&network, &config)?;
//! analysis.run()?;
//! for flow in network.flows() {
//!     println!("{}: {:?}", flow.name, analysis.flow_end_to_end(flow.id));
//! }
//! # Ok(())
//! # }
//! ```

pub mod mfas;
pub mod report;
pub mod xtfa;

pub use mfas::{BaharevFas, FasMethod, TopologicalSortFas, WeightedDigraph};
pub use report::{AnalysisReport, MethodId, MethodRun, MethodTimer};
pub use xtfa::{
    AnalysisConfig, CyclicAnalysis, CyclicConfig, FeedForwardAnalysis, NodeSetup, XtfaError,
};
