//! Raw responses and header parsing.

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{NetworkError, Result};

const DEFAULT_CHARSET: &str = "UTF-8";

/// A single response header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Header name as received.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl Header {
    /// Create a header.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A raw response: status, payload bytes, timing and headers.
///
/// Responses synthesized from the cache carry status 200 and zero elapsed
/// time, and are parsed exactly like live responses.
#[derive(Clone, Debug)]
pub struct Response {
    status: u16,
    data: Bytes,
    elapsed: Duration,
    headers: Vec<Header>,
    url: Option<String>,
}

impl Response {
    /// Create a response.
    pub fn new(status: u16, data: impl Into<Bytes>, elapsed: Duration, headers: Vec<Header>) -> Self {
        Self {
            status,
            data: data.into(),
            elapsed,
            headers,
            url: None,
        }
    }

    /// A synthesized `200` response with no headers and zero elapsed time.
    pub fn synthesized(data: impl Into<Bytes>) -> Self {
        Self::new(200, data, Duration::ZERO, Vec::new())
    }

    /// Attach the URL this response was produced for.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Raw payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Time between sending the request and reading the payload.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// All headers in received order.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// URL the response belongs to.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Find the first header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// The charset declared in `Content-Type`, or UTF-8.
    pub fn charset(&self) -> String {
        parse_charset(self.header("Content-Type"))
    }

    /// Decode the payload as text using the declared charset.
    pub fn text(&self) -> Result<String> {
        decode_text(&self.data, &self.charset())
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let text = self.text()?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Extract the `charset=` parameter from a `Content-Type` value.
pub fn parse_charset(content_type: Option<&str>) -> String {
    let Some(content_type) = content_type else {
        return DEFAULT_CHARSET.to_string();
    };

    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_CHARSET.to_string())
}

fn decode_text(data: &[u8], charset: &str) -> Result<String> {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => String::from_utf8(data.to_vec())
            .map_err(|e| NetworkError::Charset(format!("{charset}: {e}"))),
        "us-ascii" | "ascii" => {
            if data.is_ascii() {
                Ok(data.iter().map(|&b| b as char).collect())
            } else {
                Err(NetworkError::Charset(format!("{charset}: non-ASCII byte")))
            }
        }
        // Latin-1 maps every byte to the code point of the same value.
        "iso-8859-1" | "latin1" | "latin-1" => Ok(data.iter().map(|&b| b as char).collect()),
        other => Err(NetworkError::Charset(other.to_string())),
    }
}
