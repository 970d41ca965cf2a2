//! Gateway error types.

use crate::methods::RegistryError;
use crate::protocol::{ErrorCode, ErrorShape};
use thiserror::Error;

/// Errors that can occur in the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] switchboard_core::ConfigError),

    /// Method registration error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Invalid parameters.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Authentication or policy rejection.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required collaborator is not configured.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Protocol error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParams(_) => ErrorCode::InvalidRequest,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            _ => ErrorCode::InternalError,
        }
    }

    /// Convert into the shape sent to clients.
    pub fn to_shape(&self) -> ErrorShape {
        ErrorShape::new(self.code(), self.to_string())
    }
}

impl From<GatewayError> for ErrorShape {
    fn from(err: GatewayError) -> Self {
        err.to_shape()
    }
}
