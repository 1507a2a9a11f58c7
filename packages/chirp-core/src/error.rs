//! Centralized error types for the chirp core library.
//!
//! Each subsystem keeps its own `thiserror` enum. [`ChirpError`] is what the
//! HTTP layer and the bootstrap return; it maps to a status code and renders
//! as a JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::context::NetworkError;
use crate::ssdp::{CodecError, DescriptionError, EngineError, TransportError};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "ssdp_empty_message",
            Self::InvalidUtf8 => "ssdp_invalid_utf8",
            Self::MalformedStartLine(_) => "ssdp_malformed_start_line",
        }
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Socket(_) => "socket_create_failed",
            Self::Bind { .. } => "socket_bind_failed",
            Self::JoinMulticast { .. } => "multicast_join_failed",
        }
    }
}

impl ErrorCode for DescriptionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Parse(_) => "description_parse_error",
            Self::MissingField(_) => "description_missing_field",
        }
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingUuid => "missing_uuid",
            Self::AlreadyRunning => "engine_already_running",
            Self::Stopped => "engine_stopped",
        }
    }
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Detection(_) => "ip_detection_failed",
            Self::NoDetector => "no_ip_detector",
        }
    }
}

/// Application-wide error type for the chirp server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum ChirpError {
    /// No device with the requested identity is in the table.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// SSDP transport or engine failure.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Network-related error (IP detection).
    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing or invalid settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ChirpError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "device_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Discovery(_) => "discovery_failed",
            Self::Network(_) => "network_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type ChirpResult<T> = Result<T, ChirpError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for ChirpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<TransportError> for ChirpError {
    fn from(err: TransportError) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl From<EngineError> for ChirpError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::MissingUuid => Self::Configuration(err.to_string()),
            _ => Self::Discovery(err.to_string()),
        }
    }
}

impl From<DescriptionError> for ChirpError {
    fn from(err: DescriptionError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<NetworkError> for ChirpError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err.to_string())
    }
}
