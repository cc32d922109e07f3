//! The request a handler sees and the response it returns.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

/// A fully read request.
#[derive(Clone, Debug)]
pub struct HttpCall {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote: SocketAddr,
}

impl HttpCall {
    /// Create a call. Normally done by the server.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes, remote: SocketAddr) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            remote,
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI (path and query).
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first value of header `name`, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The raw body.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// The body decoded as UTF-8, lossily.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Query parameters.
    pub fn query_parameters(&self) -> BTreeMap<String, String> {
        parse_form(self.uri.query().unwrap_or_default().as_bytes())
    }

    /// URL-encoded parameters: the query for `GET`, the body otherwise.
    pub fn form_url_encoded_parameters(&self) -> BTreeMap<String, String> {
        if self.method == Method::GET {
            self.query_parameters()
        } else {
            parse_form(&self.body)
        }
    }
}

fn parse_form(input: &[u8]) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

/// What a handler answers with.
#[derive(Clone, Debug)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl MockResponse {
    /// A response with `status` and `body`.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A `200` response with `body`.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// A JSON response.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).header("Content-Type", "application/json")
    }

    /// Add a response header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(target: "hoodies_network_mockserver", header = %name, "dropping invalid response header"),
            }
        }
        (status, headers, self.body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(method: Method, uri: &str, body: &str) -> HttpCall {
        HttpCall::new(
            method,
            uri.parse().unwrap(),
            HeaderMap::new(),
            Bytes::from(body.to_string()),
            "127.0.0.1:1234".parse().unwrap(),
        )
    }

    #[test]
    fn get_parameters_come_from_the_query() {
        let call = call(Method::GET, "/get?name=jo%20doe&flag", "ignored=1");
        let params = call.form_url_encoded_parameters();
        assert_eq!(params.get("name").map(String::as_str), Some("jo doe"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
        assert!(!params.contains_key("ignored"));
    }

    #[test]
    fn other_parameters_come_from_the_body() {
        let call = call(Method::POST, "/post?q=1", "k=v&k2=a+b%26c");
        let params = call.form_url_encoded_parameters();
        assert_eq!(params.get("k2").map(String::as_str), Some("a b&c"));
        assert!(!params.contains_key("q"));
    }
}
