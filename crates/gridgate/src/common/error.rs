use thiserror::Error;

use crate::common::error::GridgateError::GenericError;
use crate::gridengine::GridEngineError;

#[derive(Debug, Error)]
pub enum GridgateError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// Malformed job spec, reserved native flag or invalid array bounds.
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// The grid engine was not reachable or the session manager is not ready yet.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error(transparent)]
    GridEngine(#[from] GridEngineError),
    #[error("Session error: {0}")]
    SessionError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("List file error: {0}")]
    ListFileError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for GridgateError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::DeserializationError(e.to_string())
    }
}

impl From<anyhow::Error> for GridgateError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

pub fn validation_error<T>(message: impl Into<String>) -> crate::Result<T> {
    Err(GridgateError::ValidationError(message.into()))
}

impl From<String> for GridgateError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
