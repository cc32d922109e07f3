//! Hoodies Network: an HTTP client engine.
//!
//! Calls are assembled by a [`HoodiesNetworkClient`], pass through an ordered
//! chain of [`Interceptor`]s, and are executed by a pool of dispatcher threads
//! behind a shared [`RequestQueue`]. Connection failures can be retried
//! transparently, successful responses can be kept in an [`EncryptedCache`],
//! and every call resolves exactly once with a [`CallResult`].
//!
//! # Making calls
//!
//! ```ignore
//! use hoodies_network::{CacheConfig, HoodiesNetworkClient, RetryCount};
//!
//! let client = HoodiesNetworkClient::builder()
//!     .base_url("https://httpbin.org/")
//!     .add_header("Accept-Language", "en")
//!     .retry_on_connection_failure(true, RetryCount::Twice)
//!     .build()?;
//!
//! // Typed JSON result
//! let echo = client.post("post").json(&"abc").send::<serde_json::Value>().await;
//!
//! // Cached for an hour, stored encrypted
//! let page = client
//!     .get("html")
//!     .cache(CacheConfig::enabled().encrypted())
//!     .send_text()
//!     .await;
//! ```
//!
//! # Interceptors
//!
//! An interceptor observes or rewrites a call at four points: before the
//! network is used, just before sending, after each failed attempt, and just
//! before the result reaches the caller. Network-check and pre-send hooks may
//! cancel the call with a result of their own; error hooks may also ask for
//! the call to be retried.
//!
//! ```ignore
//! use hoodies_network::{CancellableRequest, Cancellation, Interceptor, codes};
//!
//! struct Offline;
//!
//! impl Interceptor for Offline {
//!     fn intercept_network(&self, is_online: bool, request: &mut CancellableRequest<'_>) {
//!         if !is_online {
//!             request.cancel(Cancellation::fail("offline", codes::CONNECTION_ERROR_CODE));
//!         }
//!     }
//! }
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events under the targets in [`targets`]. It
//! never installs a subscriber.

pub mod cache;
mod client;
pub mod config;
pub mod connectivity;
pub mod cookies;
pub mod crypto;
mod delivery;
mod dispatch;
mod error;
pub mod image;
pub mod interceptor;
pub mod multipart;
pub mod queue;
pub mod request;
pub mod resolver;
pub mod response;
pub mod result;
pub mod retry;
mod storage;
pub mod transport;

/// Tracing targets, one per subsystem.
pub mod targets {
    /// Queue and dispatcher threads.
    pub const QUEUE: &str = "hoodies_network::queue";
    /// Retry decisions.
    pub const RETRY: &str = "hoodies_network::retry";
    /// Response cache.
    pub const CACHE: &str = "hoodies_network::cache";
    /// Wire exchanges.
    pub const TRANSPORT: &str = "hoodies_network::transport";
    /// Interceptor chain.
    pub const INTERCEPTOR: &str = "hoodies_network::interceptor";
    /// Cookie jar.
    pub const COOKIES: &str = "hoodies_network::cookies";
    /// Client facade.
    pub const CLIENT: &str = "hoodies_network::client";
}

pub use cache::{CacheConfig, CacheKey, EncryptedCache};
pub use client::{CallBuilder, HoodiesNetworkClient, HoodiesNetworkClientBuilder};
pub use config::HttpClientConfig;
pub use connectivity::{ConnectivityProbe, InterfaceProbe, StaticProbe};
pub use cookies::{Cookie, CookieJar};
pub use delivery::PendingCall;
pub use error::{NetworkError, Result};
pub use crate::image::{ImageOptions, ScaleType};
pub use interceptor::{EncryptionDecryptionInterceptor, Interceptor};
pub use multipart::MultipartFile;
pub use queue::RequestQueue;
pub use request::{
    CancellableRequest, Cancellation, HttpMethod, Request, RequestId, RetryableRequest,
};
pub use response::{Header, Response};
pub use result::{CallError, CallResult, codes};
pub use retry::{RetryController, RetryCount};
pub use storage::default_data_dir;
pub use transport::{ReqwestTransport, Transport};
