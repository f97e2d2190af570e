//! Error types for the USL agent
//!
//! Provides structured error types for the volume cache, UDX provisioning,
//! device registration, certificate handling and the REST surface.

use crate::certificates::CertificateError;
use thiserror::Error;

/// Unified error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("{kind} already exists: {name}")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Key Material Errors
    // =========================================================================
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    // =========================================================================
    // Transport / Parse / IO Errors
    // =========================================================================
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-facing classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown device, volume, key material or account
    NotFound,
    /// One-shot material already exists
    Conflict,
    /// Unexpected back-end failure, malformed response, persistence failure
    Internal,
    /// Malformed caller input
    BadRequest,
    /// Remote confirmation not observed within its deadline
    GatewayTimeout,
    /// Back-end unreachable; the agent keeps running in a degraded state
    Unavailable,
}

impl Error {
    /// Helper for the common not-found case
    pub fn not_found(kind: impl Into<String>, name: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.to_string(),
        }
    }

    /// Helper for the common conflict case
    pub fn conflict(kind: impl Into<String>, name: impl ToString) -> Self {
        Error::Conflict {
            kind: kind.into(),
            name: name.to_string(),
        }
    }

    /// Classify this error for callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::GatewayTimeout(_) => ErrorKind::GatewayTimeout,
            Error::BackendUnavailable { .. } => ErrorKind::Unavailable,
            Error::Certificate(CertificateError::NotFound) => ErrorKind::NotFound,
            Error::Certificate(CertificateError::AlreadyExists) => ErrorKind::Conflict,

            Error::Internal(_)
            | Error::Configuration(_)
            | Error::BackendOperationFailed { .. }
            | Error::Certificate(_)
            | Error::Http(_)
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is transient (worth retrying on the next cycle)
    pub fn is_transient(&self) -> bool {
        match self {
            Error::BackendUnavailable { .. } => true,
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, Error>;
