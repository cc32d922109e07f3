//! An httpbin-style echo.

use std::time::Duration;

use axum::http::Method;
use serde_json::{Map, Value, json};

use crate::call::{HttpCall, MockResponse};
use crate::handler::WebServerHandler;

/// Echo `call` back as JSON.
///
/// The document has the keys `headers`, `url`, `origin`, `data` (the raw
/// body), `args` (query parameters), `form` (URL-encoded body fields),
/// `files` (multipart parts by name) and `json` (the body parsed as JSON, or
/// `null`).
pub fn echo(call: &HttpCall) -> MockResponse {
    let mut headers = Map::new();
    for (name, value) in call.headers() {
        headers
            .entry(name.as_str())
            .or_insert_with(|| Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()));
    }

    let host = call.header("host").unwrap_or("localhost");
    let content_type = call.header("content-type").unwrap_or_default().to_ascii_lowercase();

    let form = if content_type.starts_with("application/x-www-form-urlencoded") {
        to_object(call.form_url_encoded_parameters())
    } else {
        Map::new()
    };

    let files = match content_type.split_once("boundary=") {
        Some((kind, boundary)) if kind.starts_with("multipart/form-data") => {
            multipart_parts(&call.body_string(), boundary.trim_matches('"'))
        }
        _ => Map::new(),
    };

    let body = json!({
        "headers": headers,
        "url": format!("http://{host}{}", call.uri()),
        "origin": call.remote_addr().ip().to_string(),
        "data": call.body_string(),
        "args": to_object(call.query_parameters()),
        "form": form,
        "files": files,
        "json": serde_json::from_slice::<Value>(call.body_bytes()).unwrap_or(Value::Null),
    });
    MockResponse::json(200, &body)
}

/// A handler that echoes `method` and rejects everything else.
pub fn echo_handler(method: Method) -> WebServerHandler {
    WebServerHandler::new().on(method, echo)
}

/// A `GET` handler that waits for the number of seconds in the last path
/// segment, then answers `{"delay":"<n>"}`.
pub fn delay_handler() -> WebServerHandler {
    WebServerHandler::new().get(|call| {
        let delay = call.uri().path().rsplit('/').next().unwrap_or_default().to_string();
        let seconds = delay.parse::<u64>().unwrap_or(0);
        std::thread::sleep(Duration::from_secs(seconds));
        MockResponse::json(200, &json!({ "delay": delay }))
    })
}

fn to_object(params: impl IntoIterator<Item = (String, String)>) -> Map<String, Value> {
    params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

fn multipart_parts(body: &str, boundary: &str) -> Map<String, Value> {
    let delimiter = format!("--{boundary}");
    let mut files = Map::new();
    for part in body.split(delimiter.as_str()) {
        let Some((head, content)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let name = head
            .split(';')
            .map(str::trim)
            .find_map(|field| field.strip_prefix("name="))
            .map(|name| name.trim_matches('"').to_string());
        if let Some(name) = name {
            let content = content.strip_suffix("\r\n").unwrap_or(content);
            files.insert(name, Value::String(content.to_string()));
        }
    }
    files
}
