//! The wire: one blocking request/response exchange per call.
//!
//! Dispatcher threads call [`Transport::execute`] directly, so the default
//! implementation uses reqwest's blocking client. Any fault is converted to a
//! [`NetworkError`] here, before it leaves the dispatcher thread.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::redirect::Policy;

use crate::config::HttpClientConfig;
use crate::cookies::CookieJar;
use crate::error::{NetworkError, Result};
use crate::interceptor::EncryptionDecryptionInterceptor;
use crate::request::Request;
use crate::response::{Header, Response};

/// Executes a single request.
pub trait Transport: Send + Sync {
    /// Send `request` and read the whole response.
    ///
    /// Statuses outside `2xx` are returned as [`NetworkError::HttpStatus`]
    /// carrying the response body as the message.
    fn execute(&self, request: &Request) -> Result<Response>;
}

/// The default transport, built on `reqwest::blocking`.
///
/// The client is created on first use so that it is built on a dispatcher
/// thread rather than inside the caller's async runtime.
pub struct ReqwestTransport {
    config: HttpClientConfig,
    cookie_jar: Option<Arc<CookieJar>>,
    encryption: Option<Arc<dyn EncryptionDecryptionInterceptor>>,
    client: Mutex<Option<reqwest::blocking::Client>>,
}

impl ReqwestTransport {
    /// Create a transport with `config`.
    pub fn new(config: HttpClientConfig) -> Self {
        Self {
            config,
            cookie_jar: None,
            encryption: None,
            client: Mutex::new(None),
        }
    }

    /// Attach and store cookies through `jar`.
    pub fn with_cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Encrypt bodies and decrypt payloads with `interceptor`.
    pub fn with_encryption(mut self, interceptor: Arc<dyn EncryptionDecryptionInterceptor>) -> Self {
        self.encryption = Some(interceptor);
        self
    }

    /// The transport configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn client(&self) -> Result<reqwest::blocking::Client> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.read_timeout());

        builder = if self.config.follow_redirects {
            builder.redirect(Policy::limited(self.config.max_redirects))
        } else {
            builder.redirect(Policy::none())
        };

        if let Some(ref ua) = self.config.user_agent {
            builder = builder.user_agent(ua);
        }

        if let Some(jar) = &self.cookie_jar {
            builder = builder.cookie_provider(jar.clone());
        }

        let client = builder.build()?;
        tracing::debug!(target: crate::targets::TRANSPORT, "built blocking HTTP client");
        *slot = Some(client.clone());
        Ok(client)
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &Request) -> Result<Response> {
        let client = self.client()?;
        let url = url::Url::parse(request.url())?;

        let mut builder = client
            .request(request.method().to_reqwest(), url)
            .headers(request.headers().clone());

        if let Some(body) = request.body() {
            let body = match &self.encryption {
                Some(encryption) => encryption.encrypt_request(body),
                None => body.to_vec(),
            };
            builder = builder.body(body);
        }

        tracing::trace!(
            target: crate::targets::TRANSPORT,
            id = %request.id(),
            method = %request.method(),
            url = %request.url(),
            "sending"
        );

        let started = Instant::now();
        let response = builder.send()?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| Header::new(name.as_str(), String::from_utf8_lossy(value.as_bytes())))
            .collect();

        let raw = response.bytes()?;
        let data = match &self.encryption {
            Some(encryption) => Bytes::from(encryption.decrypt_response(&raw)),
            None => raw,
        };
        let elapsed = started.elapsed();

        tracing::debug!(
            target: crate::targets::TRANSPORT,
            id = %request.id(),
            status,
            bytes = data.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "received"
        );

        if !(200..300).contains(&status) {
            let message = String::from_utf8_lossy(&data).into_owned();
            return Err(NetworkError::HttpStatus {
                status,
                message: (!message.is_empty()).then_some(message),
            });
        }

        Ok(Response::new(status, data, elapsed, headers).with_url(final_url))
    }
}

impl Drop for ReqwestTransport {
    fn drop(&mut self) {
        // The blocking client must not be dropped inside an async runtime.
        if let Some(client) = self.client.get_mut().take() {
            let _ = std::thread::Builder::new()
                .name("hoodies-network-transport-drop".to_string())
                .spawn(move || drop(client));
        }
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.config)
            .field("cookies", &self.cookie_jar.is_some())
            .field("encryption", &self.encryption.is_some())
            .finish()
    }
}
