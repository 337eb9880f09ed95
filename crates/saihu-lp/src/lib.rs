//! # saihu-lp: Linear-Program Delay Analyses
//!
//! Constructors for the four LP-based worst-case delay methods:
//!
//! | Method | Program |
//! |--------|---------|
//! | [`TfaLp`] | Total flow analysis (per-server delays, burst propagation); TFA++ with link-shaping rows |
//! | [`SfaLp`] | Separated flow analysis over the forest decomposition |
//! | [`FifoLp`] + [`ConstraintFamily::Polynomial`] | PLP: quadratic date windows over sub-trees |
//! | [`FifoLp`] + [`ConstraintFamily::Exponential`] | ELP: exponential date windows, tighter |
//!
//! Every constructor emits text in the `lp_solve` dialect and parses the
//! solver's `-S2` output. The solver binary is external and invoked
//! synchronously ([`LpSolver`]); when it is absent the LP methods are
//! skipped and report infinite bounds, never aborting the other analysis
//! methods.

pub mod elp;
pub mod fifo;
pub mod model;
pub mod plp;
pub mod sfa;
pub mod solver;
pub mod tfa;
pub mod tree;

pub use elp::ElpConstraints;
pub use fifo::{edges_forest, FifoLp};
pub use model::{LpFlow, LpNetwork, LpServer, RateLatency, TokenBucket};
pub use plp::PlpConstraints;
pub use sfa::SfaLp;
pub use solver::{LpError, LpSolver};
pub use tfa::TfaLp;
pub use tree::{ConstraintFamily, TreeLp};
