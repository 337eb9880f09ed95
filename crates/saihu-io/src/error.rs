//! Error type of the description readers and writers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error(transparent)]
    Unit(#[from] crate::units::UnitError),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),
}

impl From<quick_xml::Error> for IoError {
    fn from(err: quick_xml::Error) -> Self {
        IoError::Xml(err.to_string())
    }
}

impl From<saihu_core::CoreError> for IoError {
    fn from(err: saihu_core::CoreError) -> Self {
        match err {
            saihu_core::CoreError::InvalidNetwork(message) => IoError::InvalidNetwork(message),
            other => IoError::InvalidNetwork(other.to_string()),
        }
    }
}
