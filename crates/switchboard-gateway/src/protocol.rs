//! Wire frames and the protocol error taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version spoken by this gateway.
pub const PROTOCOL_VERSION: u32 = 1;

/// Name of the handshake method.
pub const CONNECT_METHOD: &str = "connect";

/// Message sent when `connect` arrives out of order, or anything else
/// arrives before it.
pub const CONNECT_FIRST_MESSAGE: &str = "connect is only valid as the first request";

/// Closed set of protocol error codes.
///
/// The serialized strings are stable; clients branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed frame, bad params, or a handshake-ordering violation.
    InvalidRequest,

    /// No handler is registered for the method.
    MethodNotFound,

    /// Credentials rejected or denied by policy.
    Unauthorized,

    /// A referenced resource does not exist.
    NotFound,

    /// The client is sending too fast.
    RateLimited,

    /// A collaborator the method depends on is not available.
    Unavailable,

    /// Handler failure, panic, or timeout.
    InternalError,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: &'static [ErrorCode] = &[
        Self::InvalidRequest,
        Self::MethodNotFound,
        Self::Unauthorized,
        Self::NotFound,
        Self::RateLimited,
        Self::Unavailable,
        Self::InternalError,
    ];

    /// Wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unavailable => "UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether a client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried in a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Error code.
    pub code: ErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Additional structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Pair a code with a message.
pub fn error_shape(code: ErrorCode, message: impl Into<String>) -> ErrorShape {
    ErrorShape::new(code, message)
}

impl ErrorShape {
    /// Create a new error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// `INVALID_REQUEST`.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// `METHOD_NOT_FOUND` for `method`.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("unknown method: {}", method),
        )
    }

    /// `UNAUTHORIZED`.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// `INTERNAL_ERROR`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorShape {}

/// Inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Caller-supplied id, echoed in the response.
    #[serde(default)]
    pub id: Value,

    /// Method name.
    pub method: String,

    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Create a new request.
    pub fn new(id: impl Into<Value>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Set the parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Parse a text frame.
    ///
    /// On failure the error is already shaped as the response to send back.
    pub fn parse(text: &str) -> Result<Self, ResponseFrame> {
        let frame: Self = serde_json::from_str(text).map_err(|e| {
            ResponseFrame::failure(
                Value::Null,
                ErrorShape::invalid_request(format!("invalid request frame: {}", e)),
            )
        })?;

        if frame.method.trim().is_empty() {
            return Err(ResponseFrame::failure(
                frame.id,
                ErrorShape::invalid_request("method must be a non-empty string"),
            ));
        }

        Ok(frame)
    }
}

/// Outbound response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id of the request this answers.
    pub id: Value,

    /// Whether the request succeeded.
    pub success: bool,

    /// Result (on success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error (on failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    /// Create a success response.
    pub fn success(id: Value, result: Option<Value>) -> Self {
        Self {
            id,
            success: true,
            result,
            error: None,
        }
    }

    /// Create an error response.
    pub fn failure(id: Value, error: ErrorShape) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Error code, if this is a failure.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Server-initiated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name.
    pub event: String,

    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventFrame {
    /// Create a new event.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
        }
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
