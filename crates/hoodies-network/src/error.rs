//! Error types for the networking engine.

use thiserror::Error;

use crate::cache::CacheError;
use crate::crypto::CryptoError;

/// Engine-specific errors.
///
/// Every fault that can happen while building, sending or decoding a request
/// is converted into one of these variants at its point of origin, before it
/// crosses a thread boundary.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// Request timed out (connect or read).
    #[error("Request timed out")]
    Timeout,
    /// Connection refused, reset or failed.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Generic I/O failure while talking to the server.
    #[error("I/O error: {0}")]
    Io(String),
    /// Invalid URL provided.
    #[error("Bad URL {0}")]
    InvalidUrl(String),
    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    /// HTTP error status (outside the 2xx range).
    #[error("{}", status_message(.status, .message))]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Optional error message from the response body.
        message: Option<String>,
    },
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
    /// The response body could not be decoded with its declared charset.
    #[error("Unsupported encoding: {0}")]
    Charset(String),
    /// Image decoding failed.
    #[error("Image error: {0}")]
    Image(String),
    /// Response cache failure.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    /// Encryption or key failure outside the cache.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    /// Persistent storage failure (row files, key files).
    #[error("Storage error: {0}")]
    Storage(String),
    /// The request queue has been shut down.
    #[error("Request queue has been shut down")]
    Shutdown,
    /// A completed call could not be delivered to its caller.
    #[error("Delivery error: {0}")]
    Delivery(String),
}

impl NetworkError {
    /// Whether this error is a connection-level fault.
    ///
    /// Only these faults are eligible for automatic retry. HTTP status,
    /// decode and cache faults never are.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection(_) | Self::Io(_) | Self::InvalidUrl(_)
        )
    }

    /// The numeric code reported to callers for this error.
    ///
    /// HTTP statuses pass through unchanged; every other fault maps to a
    /// negative sentinel from [`codes`](crate::codes).
    pub fn code(&self) -> i32 {
        use crate::codes::*;

        match self {
            Self::Timeout => TIMEOUT_ERROR_CODE,
            Self::Connection(_) => CONNECTION_ERROR_CODE,
            Self::Io(_) => IO_ERROR_CODE,
            Self::InvalidUrl(_) => MALFORMED_URL_ERROR_CODE,
            Self::InvalidHeader(_) => EXCEPTION_ERROR_CODE,
            Self::HttpStatus { status, .. } => i32::from(*status),
            Self::Json(_) => JSON_SYNTAX_ERROR_CODE,
            Self::Charset(_) => UNSUPPORTED_ENCODING_ERROR_CODE,
            Self::Image(_) => IMAGE_ERROR_CODE,
            Self::Cache(_) => CACHE_ERROR_CODE,
            Self::Crypto(_) | Self::Storage(_) => EXCEPTION_ERROR_CODE,
            Self::Shutdown | Self::Delivery(_) => DELIVERY_ERROR_CODE,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_builder() {
            Self::InvalidUrl(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => Self::Connection(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<http::header::InvalidHeaderName> for NetworkError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for NetworkError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<image::ImageError> for NetworkError {
    fn from(err: image::ImageError) -> Self {
        Self::Image(err.to_string())
    }
}

fn status_message(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(msg) => format!("HTTP {status}: {msg}"),
        None => format!("HTTP {status}"),
    }
}

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
