//! Hooks around every request a client sends.
//!
//! Interceptors run in registration order. The first two hooks run on the
//! caller's task before the request is queued; the last two run on the
//! dispatcher thread that handled the request.
//!
//! ```ignore
//! use hoodies_network::{Cancellation, CancellableRequest, Interceptor};
//!
//! struct Offline;
//!
//! impl Interceptor for Offline {
//!     fn intercept_network(&self, is_online: bool, request: &mut CancellableRequest<'_>) {
//!         if !is_online {
//!             request.cancel(Cancellation::respond_with(r#"{"offline":true}"#));
//!         }
//!     }
//! }
//! ```

use crate::request::{CancellableRequest, Request, RequestId, RetryableRequest};
use crate::response::Response;
use crate::result::CallError;

/// Observes and shapes requests at fixed points of their lifecycle.
///
/// Every hook defaults to a no-op, so implementors override only what they
/// need. Any state is the implementor's own.
pub trait Interceptor: Send + Sync {
    /// Called with the connectivity probe's verdict before anything else.
    ///
    /// Cancelling here skips every later hook, the queue and the transport.
    fn intercept_network(&self, is_online: bool, request: &mut CancellableRequest<'_>) {
        let _ = (is_online, request);
    }

    /// Called just before the request is queued. May mutate or cancel it.
    fn intercept_request(&self, id: RequestId, request: &mut CancellableRequest<'_>) {
        let _ = (id, request);
    }

    /// Called after every failed attempt.
    ///
    /// `attempts` counts the retryable failures of this call so far, this one
    /// included, or is zero when the failure is not eligible for automatic
    /// retry.
    fn intercept_error(
        &self,
        error: &CallError,
        request: &mut RetryableRequest<'_>,
        attempts: u32,
    ) {
        let _ = (error, request, attempts);
    }

    /// Observes the final outcome of a call.
    ///
    /// A panic here is not caught.
    fn intercept_response(&self, result: Result<&Response, &CallError>, request: &Request) {
        let _ = (result, request);
    }
}

/// Encrypts what goes on the wire and decrypts what comes back.
///
/// At most one is installed per client.
pub trait EncryptionDecryptionInterceptor: Send + Sync {
    /// Encrypt a serialized request body, or a URL query key or value.
    fn encrypt_request(&self, data: &[u8]) -> Vec<u8>;

    /// Encrypt an additional header value. Header names are never encrypted.
    fn encrypt_additional_headers(&self, value: &[u8]) -> Vec<u8>;

    /// Decrypt a response payload.
    fn decrypt_response(&self, data: &[u8]) -> Vec<u8>;
}
