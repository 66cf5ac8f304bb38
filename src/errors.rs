//! Box Metadata Error Definitions
//!
//! This module defines all error types and error handling utilities for the client.
//! Errors are categorized into client errors, HTTP status errors reported by the
//! Box API, transport errors, and local parsing errors.

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for Box metadata operations
pub type Result<T> = std::result::Result<T, BoxError>;

/// Base error type for all Box metadata errors
#[derive(Error, Debug)]
pub enum BoxError {
    /// Client has been closed
    #[error("Client is closed")]
    ClientClosed,

    /// Invalid argument was provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration is incomplete or inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Nothing is left to write after preparing the values
    #[error("{0}")]
    EmptyMetadata(String),

    /// Requested resource does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists (HTTP 409)
    #[error("Conflict ({code}): {message}")]
    Conflict {
        /// Box error code, usually `tuple_already_exists`
        code: String,
        /// Error message
        message: String,
    },

    /// Access token missing, expired or lacking scope (HTTP 401/403)
    #[error("Unauthorized (status {status}): {message}")]
    Unauthorized {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Too many requests (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Any other error status returned by the API
    #[error("API error (status {status}, code {code}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Box error code
        code: String,
        /// Error message
        message: String,
    },

    /// Operation did not finish in time
    #[error("Timeout during {0}")]
    Timeout(String),

    /// Network-related error
    #[error("Network error during {operation}: {source}")]
    Network {
        /// Operation that failed
        operation: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// Server response is invalid
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoxError {
    /// Reports whether the operation may succeed if attempted again
    ///
    /// Rate limiting, server-side failures, timeouts and transport errors are
    /// transient. Client errors such as conflicts or missing resources are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BoxError::RateLimited(_) | BoxError::Timeout(_) | BoxError::Network { .. } => true,
            BoxError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Reports whether the error means the metadata instance already exists
    pub fn is_conflict(&self) -> bool {
        match self {
            BoxError::Conflict { .. } => true,
            BoxError::Api { code, message, .. } => {
                code == "tuple_already_exists"
                    || message.to_lowercase().contains("already exists")
            }
            _ => false,
        }
    }
}

/// Error body returned by the Box API
///
/// Example: `{"type":"error","status":409,"code":"tuple_already_exists","message":"..."}`
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    /// Machine-readable error code
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

/// Maps an HTTP status code and response body to a Rust error
///
/// Status codes in the 2xx range indicate success (no error).
/// Other status codes are mapped to predefined errors or a generic Api error.
///
/// Common status codes:
///   - 401/403: Unauthorized
///   - 404: Not found
///   - 409: Conflict (metadata instance already exists)
///   - 429: Rate limited
pub fn map_status_to_error(status: u16, body: &str) -> Option<BoxError> {
    if (200..300).contains(&status) {
        return None;
    }

    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.trim().to_string()
    } else {
        parsed.message
    };

    Some(match status {
        401 | 403 => BoxError::Unauthorized { status, message },
        404 => BoxError::NotFound(message),
        409 => BoxError::Conflict {
            code: parsed.code,
            message,
        },
        429 => BoxError::RateLimited(message),
        _ => BoxError::Api {
            status,
            code: parsed.code,
            message,
        },
    })
}
