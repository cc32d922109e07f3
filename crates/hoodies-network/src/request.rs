//! Requests and the narrow handles interceptors receive.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::cache::CacheConfig;
use crate::delivery::Completion;
use crate::error::Result;
use crate::response::Response;
use crate::result::CallError;

/// Unique identifier of a logical call.
///
/// Stable across every retry of the same call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identifier value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// HTTP request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP DELETE method.
    Delete,
    /// HTTP PATCH method.
    Patch,
    /// HTTP HEAD method.
    Head,
    /// HTTP OPTIONS method.
    Options,
}

impl HttpMethod {
    /// Convert to reqwest method.
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }

    /// The method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal result an interceptor supplies when it cancels a request.
#[derive(Clone, Debug)]
pub enum Cancellation {
    /// Resolve the call with this response, parsed like a live one.
    Respond(Response),
    /// Resolve the call with this failure.
    Fail(CallError),
}

impl Cancellation {
    /// Cancel with a synthesized `200` response carrying `body`.
    pub fn respond_with(body: impl Into<Bytes>) -> Self {
        Self::Respond(Response::synthesized(body))
    }

    /// Cancel with a failure.
    pub fn fail(message: impl Into<String>, code: i32) -> Self {
        Self::Fail(CallError::new(message, code))
    }
}

/// One logical call travelling through the engine.
///
/// A request is an owned value handed from phase to phase: the caller's task
/// runs the network-check and pre-send hooks, then the request moves into the
/// queue, then into exactly one dispatcher thread. Only the current owner can
/// mutate it.
pub struct Request {
    id: RequestId,
    method: HttpMethod,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    cache: CacheConfig,
    cancellation: Option<Cancellation>,
    retrying: bool,
    completion: Arc<dyn Completion>,
}

impl Request {
    pub(crate) fn new(
        method: HttpMethod,
        url: String,
        headers: HeaderMap,
        body: Option<Bytes>,
        cache: CacheConfig,
        completion: Arc<dyn Completion>,
    ) -> Self {
        Self {
            id: RequestId::next(),
            method,
            url,
            headers,
            body,
            cache,
            cancellation: None,
            retrying: false,
            completion,
        }
    }

    /// The call identifier.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The HTTP method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The fully resolved target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request headers, defaults and additional headers merged.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The serialized body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Cache configuration for this call.
    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache
    }

    /// Whether an interceptor cancelled this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    /// Whether an interceptor asked for this request to be retried.
    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    pub(crate) fn completion(&self) -> &Arc<dyn Completion> {
        &self.completion
    }

    pub(crate) fn take_cancellation(&mut self) -> Option<Cancellation> {
        self.cancellation.take()
    }

    pub(crate) fn take_retrying(&mut self) -> bool {
        std::mem::take(&mut self.retrying)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("cache", &self.cache)
            .field("cancelled", &self.is_cancelled())
            .field("retrying", &self.retrying)
            .finish()
    }
}

/// The capability handed to network-check and pre-send hooks.
///
/// Allows mutating headers, URL and body, or cancelling the call with a
/// terminal result.
pub struct CancellableRequest<'a> {
    request: &'a mut Request,
}

impl<'a> CancellableRequest<'a> {
    pub(crate) fn new(request: &'a mut Request) -> Self {
        Self { request }
    }

    /// The underlying request.
    pub fn request(&self) -> &Request {
        self.request
    }

    /// The call identifier.
    pub fn id(&self) -> RequestId {
        self.request.id
    }

    /// The target URL.
    pub fn url(&self) -> &str {
        &self.request.url
    }

    /// Replace the target URL.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.request.url = url.into();
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    /// Mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.request.headers
    }

    /// Insert or replace a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.request.headers.insert(name, value);
        Ok(())
    }

    /// The serialized body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.request.body.as_ref()
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.request.body = body;
    }

    /// Cancel the request, resolving the call with `result`.
    ///
    /// No further interceptor runs and the request never reaches the queue.
    pub fn cancel(&mut self, result: Cancellation) {
        self.request.cancellation = Some(result);
    }

    /// Whether the request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.request.is_cancelled()
    }
}

/// The capability handed to error hooks.
///
/// Everything a [`CancellableRequest`] can do, plus [`retry`](Self::retry).
pub struct RetryableRequest<'a> {
    inner: CancellableRequest<'a>,
}

impl<'a> RetryableRequest<'a> {
    pub(crate) fn new(request: &'a mut Request) -> Self {
        Self {
            inner: CancellableRequest::new(request),
        }
    }

    /// Submit the same logical call again.
    ///
    /// Suppresses delivery of the current failure; the call resolves with the
    /// outcome of the new attempt. Several interceptors calling `retry` for
    /// the same failure still produce a single resubmission.
    pub fn retry(&mut self) {
        self.inner.request.retrying = true;
    }
}

impl<'a> Deref for RetryableRequest<'a> {
    type Target = CancellableRequest<'a>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for RetryableRequest<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
