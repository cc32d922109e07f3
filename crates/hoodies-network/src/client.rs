//! The client facade: verbs, call builders and result parsing.

use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue};
use image::DynamicImage;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{CacheConfig, CacheWriter, EncryptedCache};
use crate::config::HttpClientConfig;
use crate::connectivity::{ConnectivityProbe, InterfaceProbe};
use crate::cookies::CookieJar;
use crate::delivery::{Completion, Delivery, Parser, PendingCall};
use crate::dispatch::Dispatcher;
use crate::error::{NetworkError, Result};
use crate::image::{ImageOptions, decode_image};
use crate::interceptor::{EncryptionDecryptionInterceptor, Interceptor};
use crate::multipart::{self, MultipartFile};
use crate::queue::{DEFAULT_WORKER_COUNT, RequestQueue};
use crate::request::{HttpMethod, Request};
use crate::resolver;
use crate::response::Response;
use crate::result::{CallError, CallResult};
use crate::retry::{RetryController, RetryCount};
use crate::transport::{ReqwestTransport, Transport};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Builder for a [`HoodiesNetworkClient`].
///
/// Everything configured here is fixed for the lifetime of the client.
pub struct HoodiesNetworkClientBuilder {
    base_url: Option<String>,
    headers: Vec<(String, String)>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    encryption: Option<Arc<dyn EncryptionDecryptionInterceptor>>,
    retry_enabled: bool,
    retry_count: RetryCount,
    cookie_jar: Option<Arc<CookieJar>>,
    config: HttpClientConfig,
    queue: Option<RequestQueue>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<EncryptedCache>>,
    connectivity: Option<Arc<dyn ConnectivityProbe>>,
}

impl Default for HoodiesNetworkClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HoodiesNetworkClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            base_url: None,
            headers: Vec::new(),
            interceptors: Vec::new(),
            encryption: None,
            retry_enabled: false,
            retry_count: RetryCount::Never,
            cookie_jar: None,
            config: HttpClientConfig::default(),
            queue: None,
            transport: None,
            cache: None,
            connectivity: None,
        }
    }

    /// Set the base URL every call path is appended to.
    ///
    /// A missing or mangled scheme is repaired, see
    /// [`validate_url`](crate::resolver::validate_url).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a default header sent with every call.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add several default headers.
    pub fn add_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Append an interceptor. Interceptors run in the order they are added.
    pub fn add_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Encrypt outgoing data and decrypt incoming payloads.
    pub fn add_encryption_decryption_interceptor(
        mut self,
        interceptor: Arc<dyn EncryptionDecryptionInterceptor>,
    ) -> Self {
        self.encryption = Some(interceptor);
        self
    }

    /// Retry connection-level failures up to `count` times.
    pub fn retry_on_connection_failure(mut self, enabled: bool, count: RetryCount) -> Self {
        self.retry_enabled = enabled;
        self.retry_count = count;
        self
    }

    /// Send and store cookies through `jar`.
    pub fn enable_cookies_with_cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Replace the transport configuration.
    pub fn config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch calls on `queue` instead of the shared queue.
    pub fn request_queue(mut self, queue: RequestQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Use a custom transport.
    ///
    /// The transport becomes responsible for timeouts, cookies and payload
    /// encryption.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `cache` for responses of calls that enable caching.
    pub fn cache(mut self, cache: Arc<EncryptedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use a custom connectivity probe for network-check hooks.
    pub fn connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = Some(probe);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<HoodiesNetworkClient> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.headers {
            default_headers.insert(
                HeaderName::try_from(name.as_str())?,
                HeaderValue::try_from(value.as_str())?,
            );
        }

        let base_url = self
            .base_url
            .as_deref()
            .map(resolver::validate_url)
            .unwrap_or_default();

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut transport = ReqwestTransport::new(self.config.clone());
                if let Some(jar) = &self.cookie_jar {
                    transport = transport.with_cookie_jar(jar.clone());
                }
                if let Some(encryption) = &self.encryption {
                    transport = transport.with_encryption(encryption.clone());
                }
                Arc::new(transport)
            }
        };

        let queue = self.queue.unwrap_or_else(|| {
            if self.config.worker_count == DEFAULT_WORKER_COUNT {
                RequestQueue::shared()
            } else {
                RequestQueue::with_workers("hoodies-network", self.config.worker_count)
            }
        });

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(EncryptedCache::in_memory()));
        let dispatcher = Dispatcher {
            transport,
            interceptors: self.interceptors,
            retry: RetryController::new(self.retry_enabled, self.retry_count),
            cache_writer: CacheWriter::spawn(cache.clone())?,
            cache,
            queue,
            connectivity: self
                .connectivity
                .unwrap_or_else(|| Arc::new(InterfaceProbe)),
        };

        tracing::debug!(
            target: crate::targets::CLIENT,
            base_url = %base_url,
            interceptors = dispatcher.interceptors.len(),
            retries = dispatcher.retry.max_attempts(),
            queue = %dispatcher.queue.name(),
            "client built"
        );

        Ok(HoodiesNetworkClient {
            inner: Arc::new(ClientInner {
                base_url,
                default_headers,
                encryption: self.encryption,
                cookie_jar: self.cookie_jar,
                config: self.config,
                dispatcher: Arc::new(dispatcher),
            }),
        })
    }
}

struct ClientInner {
    base_url: String,
    default_headers: HeaderMap,
    encryption: Option<Arc<dyn EncryptionDecryptionInterceptor>>,
    cookie_jar: Option<Arc<CookieJar>>,
    config: HttpClientConfig,
    dispatcher: Arc<Dispatcher>,
}

/// An HTTP client bound to a base URL.
///
/// Cheaply cloneable; clones share configuration, interceptors, cache and
/// queue.
///
/// ```ignore
/// use hoodies_network::{HoodiesNetworkClient, RetryCount};
///
/// let client = HoodiesNetworkClient::builder()
///     .base_url("https://api.example.com/")
///     .add_header("Accept-Language", "en")
///     .retry_on_connection_failure(true, RetryCount::Twice)
///     .build()?;
///
/// let result = client.get("users/42").send::<User>().await;
/// if let Some(user) = result.value() {
///     println!("{}", user.name);
/// }
/// ```
#[derive(Clone)]
pub struct HoodiesNetworkClient {
    inner: Arc<ClientInner>,
}

impl HoodiesNetworkClient {
    /// Create a builder for a new client.
    pub fn builder() -> HoodiesNetworkClientBuilder {
        HoodiesNetworkClientBuilder::new()
    }

    /// The validated base URL.
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The transport configuration captured at build time.
    pub fn config(&self) -> &HttpClientConfig {
        &self.inner.config
    }

    /// The cookie jar, if cookies are enabled.
    pub fn cookie_jar(&self) -> Option<&Arc<CookieJar>> {
        self.inner.cookie_jar.as_ref()
    }

    /// The response cache.
    pub fn cache(&self) -> &Arc<EncryptedCache> {
        &self.inner.dispatcher.cache
    }

    /// The queue calls are dispatched on.
    pub fn request_queue(&self) -> &RequestQueue {
        &self.inner.dispatcher.queue
    }

    /// The retry controller.
    pub fn retry_controller(&self) -> &RetryController {
        &self.inner.dispatcher.retry
    }

    /// Start a call with an explicit method.
    pub fn request(&self, method: HttpMethod, path: impl Into<String>) -> CallBuilder {
        CallBuilder::new(self.clone(), method, path.into())
    }

    /// Start a GET call.
    pub fn get(&self, path: impl Into<String>) -> CallBuilder {
        self.request(HttpMethod::Get, path)
    }

    /// Start a POST call.
    pub fn post(&self, path: impl Into<String>) -> CallBuilder {
        self.request(HttpMethod::Post, path)
    }

    /// Start a PUT call.
    pub fn put(&self, path: impl Into<String>) -> CallBuilder {
        self.request(HttpMethod::Put, path)
    }

    /// Start a PATCH call.
    pub fn patch(&self, path: impl Into<String>) -> CallBuilder {
        self.request(HttpMethod::Patch, path)
    }

    /// Start a DELETE call.
    pub fn delete(&self, path: impl Into<String>) -> CallBuilder {
        self.request(HttpMethod::Delete, path)
    }

    /// Fetch a page as text.
    ///
    /// Sends no extra headers and skips the cache. For either, go through the
    /// builder: `client.get(path).header(..).cache(..).send_text()`.
    pub async fn get_html(&self, path: impl Into<String>) -> CallResult<String> {
        self.get(path).send_text().await
    }

    /// Fetch and decode an image, scaled down to fit `options`.
    ///
    /// Like [`get_html`](Self::get_html), this takes no headers or cache
    /// config; use `client.get(path)...send_image(options)` for those.
    pub async fn get_image(
        &self,
        path: impl Into<String>,
        options: ImageOptions,
    ) -> CallResult<DynamicImage> {
        self.get(path).send_image(options).await
    }

    /// GET with `params` appended to the URL, then percent-decoded.
    pub fn get_url_query_param<K, V>(
        &self,
        path: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> CallBuilder
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.get(path).query(params, QueryStyle::Decoded)
    }

    /// GET with `params` appended to the URL in percent-encoded form.
    pub fn get_url_query_param_encoded<K, V>(
        &self,
        path: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> CallBuilder
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.get(path).query(params, QueryStyle::Encoded)
    }

    /// POST `files` as `multipart/form-data`.
    pub fn post_multipart_files(
        &self,
        path: impl Into<String>,
        files: &[MultipartFile],
    ) -> CallBuilder {
        let boundary = multipart::random_boundary();
        let body = multipart::encode(files, &boundary);
        self.post(path)
            .raw_body(body, multipart::content_type(&boundary))
    }
}

impl std::fmt::Debug for HoodiesNetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoodiesNetworkClient")
            .field("base_url", &self.inner.base_url)
            .field("default_headers", &self.inner.default_headers)
            .field("interceptors", &self.inner.dispatcher.interceptors.len())
            .field("encryption", &self.inner.encryption.is_some())
            .field("cookies", &self.inner.cookie_jar.is_some())
            .field("queue", &self.inner.dispatcher.queue)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueryStyle {
    Encoded,
    Decoded,
}

#[derive(Debug)]
enum CallBody {
    None,
    Json(serde_json::Value),
    Text(String),
    Form(Vec<(String, String)>),
    Raw { data: Bytes, content_type: String },
}

/// A call under construction.
///
/// Finish it with one of the `send_*` methods, which choose how the payload
/// is parsed.
#[must_use = "a call does nothing until it is sent"]
pub struct CallBuilder {
    client: HoodiesNetworkClient,
    method: HttpMethod,
    path: String,
    headers: Vec<(String, String)>,
    query: Option<(Vec<(String, String)>, QueryStyle)>,
    body: CallBody,
    cache: CacheConfig,
    error: Option<NetworkError>,
}

impl CallBuilder {
    fn new(client: HoodiesNetworkClient, method: HttpMethod, path: String) -> Self {
        Self {
            client,
            method,
            path,
            headers: Vec::new(),
            query: None,
            body: CallBody::None,
            cache: CacheConfig::Disabled,
            error: None,
        }
    }

    /// Add a header for this call, overriding a default header of the same
    /// name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add several headers for this call.
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Serialize `body` as JSON.
    ///
    /// A JSON object is sent form-encoded instead when the effective
    /// `Content-Type` is `application/x-www-form-urlencoded`.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => self.body = CallBody::Json(value),
            Err(e) => {
                tracing::error!(target: crate::targets::CLIENT, "failed to serialize JSON body: {}", e);
                self.error = Some(e.into());
            }
        }
        self
    }

    /// Send `body` verbatim.
    pub fn body_string(mut self, body: impl Into<String>) -> Self {
        self.body = CallBody::Text(body.into());
        self
    }

    /// Send `fields` as a URL-encoded form.
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = CallBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Send raw bytes with an explicit content type.
    pub fn raw_body(mut self, data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = CallBody::Raw {
            data: data.into(),
            content_type: content_type.into(),
        };
        self
    }

    /// Cache successful responses of this call.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    fn query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>, style: QueryStyle) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.query = Some((params, style));
        self
    }

    /// Send and parse the payload as JSON into `T`.
    pub async fn send<T: DeserializeOwned + Send + 'static>(self) -> CallResult<T> {
        self.submit(Box::new(parse_json::<T>)).wait().await
    }

    /// Send and decode the payload as text using the response charset.
    pub async fn send_text(self) -> CallResult<String> {
        self.submit(Box::new(parse_text)).wait().await
    }

    /// Send and return the raw payload.
    pub async fn send_bytes(self) -> CallResult<Bytes> {
        self.submit(Box::new(|response: &Response| Ok(response.data().clone())))
            .wait()
            .await
    }

    /// Send and ignore the payload.
    pub async fn send_empty(self) -> CallResult<()> {
        self.submit(Box::new(|_: &Response| Ok(()))).wait().await
    }

    /// Send and decode the payload as an image.
    pub async fn send_image(self, options: ImageOptions) -> CallResult<DynamicImage> {
        self.submit(Box::new(move |response: &Response| {
            decode_image(response.data(), options).map_err(CallError::from)
        }))
        .wait()
        .await
    }

    /// Send and block the current thread until the JSON result arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn send_blocking<T: DeserializeOwned + Send + 'static>(self) -> CallResult<T> {
        self.submit(Box::new(parse_json::<T>)).blocking_wait()
    }

    /// Submit the call and return a handle to its result.
    pub fn enqueue<T: DeserializeOwned + Send + 'static>(self) -> PendingCall<T> {
        self.submit(Box::new(parse_json::<T>))
    }

    fn submit<T: Send + 'static>(self, parser: Parser<T>) -> PendingCall<T> {
        let (delivery, pending) = Delivery::channel(parser);
        let completion: Arc<dyn Completion> = Arc::new(delivery);
        let dispatcher = self.client.inner.dispatcher.clone();

        match self.into_parts() {
            Ok(parts) => {
                let request = Request::new(
                    parts.method,
                    parts.url,
                    parts.headers,
                    parts.body,
                    parts.cache,
                    completion,
                );
                tracing::trace!(
                    target: crate::targets::CLIENT,
                    id = %request.id(),
                    method = %request.method(),
                    url = %request.url(),
                    "submitting call"
                );
                dispatcher.send_request(request);
            }
            Err(err) => {
                tracing::warn!(target: crate::targets::CLIENT, error = %err, "call could not be built");
                completion.resolve_failure(err.into(), &mut |_: std::result::Result<&Response, &CallError>| {});
            }
        }
        pending
    }

    fn into_parts(self) -> Result<CallParts> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let inner = &self.client.inner;
        let encryption = inner.encryption.as_deref();

        let mut url = format!("{}{}", inner.base_url, self.path);
        if let Some((params, style)) = self.query {
            let params: Vec<(String, String)> = match encryption {
                Some(encryption) => params
                    .into_iter()
                    .map(|(k, v)| (encrypt_text(encryption, &k), encrypt_text(encryption, &v)))
                    .collect(),
                None => params,
            };
            url = resolver::append_query(&url, &params);
            if style == QueryStyle::Decoded {
                url = resolver::decode_url(&url)?;
            }
        }

        let mut headers = inner.default_headers.clone();
        for (name, value) in &self.headers {
            let value = match encryption {
                Some(encryption) => {
                    String::from_utf8_lossy(&encryption.encrypt_additional_headers(value.as_bytes()))
                        .into_owned()
                }
                None => value.clone(),
            };
            headers.insert(HeaderName::try_from(name.as_str())?, HeaderValue::try_from(value)?);
        }

        let body = match self.body {
            CallBody::None => None,
            CallBody::Json(value) => Some(encode_json(value, &mut headers)?),
            CallBody::Text(text) => {
                default_content_type(&mut headers, JSON_CONTENT_TYPE);
                Some(Bytes::from(text))
            }
            CallBody::Form(fields) => {
                default_content_type(&mut headers, FORM_CONTENT_TYPE);
                let encoded =
                    resolver::form_encode(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                Some(Bytes::from(encoded))
            }
            CallBody::Raw { data, content_type } => {
                headers.insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
                Some(data)
            }
        };

        Ok(CallParts {
            method: self.method,
            url,
            headers,
            body,
            cache: self.cache,
        })
    }
}

impl std::fmt::Debug for CallBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBuilder")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("cache", &self.cache)
            .finish()
    }
}

struct CallParts {
    method: HttpMethod,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    cache: CacheConfig,
}

fn encrypt_text(encryption: &dyn EncryptionDecryptionInterceptor, text: &str) -> String {
    String::from_utf8_lossy(&encryption.encrypt_request(text.as_bytes())).into_owned()
}

fn default_content_type(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

fn encode_json(value: serde_json::Value, headers: &mut HeaderMap) -> Result<Bytes> {
    default_content_type(headers, JSON_CONTENT_TYPE);

    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));

    match value {
        serde_json::Value::Object(fields) if is_form => {
            let pairs: Vec<(String, String)> = fields
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect();
            let encoded =
                resolver::form_encode(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            Ok(Bytes::from(encoded))
        }
        value => Ok(Bytes::from(serde_json::to_vec(&value)?)),
    }
}

fn parse_json<T: DeserializeOwned>(response: &Response) -> std::result::Result<T, CallError> {
    response.json::<T>().map_err(CallError::from)
}

fn parse_text(response: &Response) -> std::result::Result<String, CallError> {
    response.text().map_err(CallError::from)
}
