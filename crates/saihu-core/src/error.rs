//! Unified error types for the Saihu ecosystem
//!
//! This module provides a common error type [`CoreError`] that can represent
//! errors from any part of the system. Domain-specific error types can be
//! converted to `CoreError` for uniform error handling at API boundaries.

use thiserror::Error;

/// Unified error type for all Saihu operations.
///
/// This enum provides a common error representation for the whole workspace,
/// allowing errors from curve algebra, network loading, pipeline execution
/// and LP solving to be handled uniformly.
#[derive(Error, Debug)]
pub enum CoreError {
    /// I/O errors (file access, solver invocation, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors (rejected at load time)
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Curve algebra errors
    #[error(transparent)]
    Curve(#[from] CurveError),

    /// Analysis errors (pipeline, driver, LP)
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Errors raised by min-plus curve operations.
///
/// These are local to the operation that raised them: callers either treat
/// them as programmer errors ([`CurveError::NotDefined`]) or convert them
/// into per-flow infinite bounds ([`CurveError::LocallyUnstable`]).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurveError {
    /// A left limit was requested at t <= 0, where it does not exist.
    #[error("curve value not defined for left limit at {0:e}")]
    NotDefined(f64),

    /// The long-term arrival rate meets or exceeds the service rate, so no
    /// finite horizontal distance exists.
    #[error(
        "cannot compute delay bound: the long-term rate of the service curve is \
         lower than the long-term rate of the arrival curve"
    )]
    LocallyUnstable,

    /// The operation is not defined for this pair of curve variants.
    #[error("unsupported curve operation {op} for {lhs} and {rhs}")]
    Unsupported {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
}

/// Convenience type alias for Results using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Other(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidNetwork("path references unknown server".into());
        assert!(err.to_string().contains("Invalid network"));
    }

    #[test]
    fn test_curve_error_conversion() {
        let err: CoreError = CurveError::LocallyUnstable.into();
        assert!(matches!(err, CoreError::Curve(CurveError::LocallyUnstable)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> CoreResult<()> {
            Err(CoreError::Config("missing clock model".into()))
        }

        fn outer() -> CoreResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
