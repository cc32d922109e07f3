//! The outcome of a logical call.

use std::fmt;

use crate::error::NetworkError;
use crate::response::Header;

/// Numeric codes carried by [`CallError`].
///
/// HTTP status faults use the status itself; everything else uses one of
/// these negative sentinels.
pub mod codes {
    /// The cause of the failure is unknown.
    pub const UNKNOWN_ERROR_CODE: i32 = -1;
    /// A generic failure while building or handling a call.
    pub const EXCEPTION_ERROR_CODE: i32 = -2;
    /// The response body is not valid JSON for the requested type.
    pub const JSON_SYNTAX_ERROR_CODE: i32 = -3;
    /// The request body could not be serialized.
    pub const JSON_ERROR_CODE: i32 = -4;
    /// The response declared a charset that cannot be decoded.
    pub const UNSUPPORTED_ENCODING_ERROR_CODE: i32 = -5;
    /// Connect or read timeout.
    pub const TIMEOUT_ERROR_CODE: i32 = -6;
    /// Connection refused or reset.
    pub const CONNECTION_ERROR_CODE: i32 = -7;
    /// Generic I/O failure on the wire.
    pub const IO_ERROR_CODE: i32 = -8;
    /// The target URL could not be parsed.
    pub const MALFORMED_URL_ERROR_CODE: i32 = -9;
    /// A cache row could not be read or decrypted.
    pub const CACHE_ERROR_CODE: i32 = -10;
    /// The response payload is not a decodable image.
    pub const IMAGE_ERROR_CODE: i32 = -11;
    /// An interceptor cancelled the call without supplying a result.
    pub const CANCELLED_ERROR_CODE: i32 = -12;
    /// The call was accepted but its result could not be delivered.
    pub const DELIVERY_ERROR_CODE: i32 = -13;
}

/// A failed logical call, as seen by the caller.
#[derive(Debug, Clone)]
pub struct CallError {
    /// Human-readable description.
    pub message: String,
    /// HTTP status or negative sentinel from [`codes`].
    pub code: i32,
    /// The typed fault behind this failure, if any.
    pub cause: Option<NetworkError>,
}

impl CallError {
    /// Create an error with a message and code and no underlying cause.
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
            cause: None,
        }
    }

    /// Whether the underlying cause is a connection-level fault.
    pub fn is_transport_fault(&self) -> bool {
        self.cause
            .as_ref()
            .is_some_and(NetworkError::is_transport_fault)
    }
}

impl From<NetworkError> for CallError {
    fn from(err: NetworkError) -> Self {
        let message = match &err {
            NetworkError::HttpStatus {
                message: Some(body),
                ..
            } => body.clone(),
            other => other.to_string(),
        };
        Self {
            message,
            code: err.code(),
            cause: Some(err),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

/// The single result of a logical call.
///
/// Produced exactly once per call and delivered to exactly one caller.
#[derive(Debug, Clone)]
pub enum CallResult<T> {
    /// The call completed and its payload was parsed.
    Success {
        /// The parsed payload.
        value: T,
        /// Response headers (empty for cache hits).
        headers: Vec<Header>,
        /// The URL the response came from.
        url: Option<String>,
    },
    /// The call failed.
    Failure(CallError),
}

impl<T> CallResult<T> {
    /// Wrap a bare value without headers or URL.
    pub fn success(value: T) -> Self {
        Self::Success {
            value,
            headers: Vec::new(),
            url: None,
        }
    }

    /// Check if the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if the call failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Borrow the parsed value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Borrow the failure, if any.
    pub fn error(&self) -> Option<&CallError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// Response headers of a success. Empty for failures and cache hits.
    pub fn headers(&self) -> &[Header] {
        match self {
            Self::Success { headers, .. } => headers,
            Self::Failure(_) => &[],
        }
    }

    /// The URL a success came from.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Success { url, .. } => url.as_deref(),
            Self::Failure(_) => None,
        }
    }

    /// Convert into a standard `Result`, dropping headers and URL.
    pub fn into_result(self) -> Result<T, CallError> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Failure(err) => Err(err),
        }
    }

    /// Map the success value, keeping headers and URL.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallResult<U> {
        match self {
            Self::Success {
                value,
                headers,
                url,
            } => CallResult::Success {
                value: f(value),
                headers,
                url,
            },
            Self::Failure(err) => CallResult::Failure(err),
        }
    }
}

impl<T> From<CallError> for CallResult<T> {
    fn from(err: CallError) -> Self {
        Self::Failure(err)
    }
}

impl<T> From<NetworkError> for CallResult<T> {
    fn from(err: NetworkError) -> Self {
        Self::Failure(err.into())
    }
}
