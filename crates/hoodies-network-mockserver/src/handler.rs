//! Per-path handlers with one closure per HTTP method.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::Method;

use crate::call::{HttpCall, MockResponse};

type MethodHandler = Arc<dyn Fn(&HttpCall) -> MockResponse + Send + Sync>;

/// Serves one path. Methods without a closure answer `405`.
///
/// ```ignore
/// let todos = WebServerHandler::new()
///     .get(|_| MockResponse::json(200, &json!([])))
///     .post(|call| MockResponse::new(201, call.body_string()));
/// ```
#[derive(Clone, Default)]
pub struct WebServerHandler {
    methods: HashMap<Method, MethodHandler>,
}

impl WebServerHandler {
    /// A handler that answers nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` with `handler`.
    pub fn on<F>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(&HttpCall) -> MockResponse + Send + Sync + 'static,
    {
        self.methods.insert(method, Arc::new(handler));
        self
    }

    /// Answer `GET`.
    pub fn get<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpCall) -> MockResponse + Send + Sync + 'static,
    {
        self.on(Method::GET, handler)
    }

    /// Answer `POST`.
    pub fn post<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpCall) -> MockResponse + Send + Sync + 'static,
    {
        self.on(Method::POST, handler)
    }

    /// Answer `PUT`.
    pub fn put<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpCall) -> MockResponse + Send + Sync + 'static,
    {
        self.on(Method::PUT, handler)
    }

    /// Answer `PATCH`.
    pub fn patch<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpCall) -> MockResponse + Send + Sync + 'static,
    {
        self.on(Method::PATCH, handler)
    }

    /// Answer `DELETE`.
    pub fn delete<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpCall) -> MockResponse + Send + Sync + 'static,
    {
        self.on(Method::DELETE, handler)
    }

    /// Answer `OPTIONS`.
    pub fn options<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpCall) -> MockResponse + Send + Sync + 'static,
    {
        self.on(Method::OPTIONS, handler)
    }

    /// Run the closure registered for the call's method.
    pub fn handle(&self, call: &HttpCall) -> MockResponse {
        match self.methods.get(call.method()) {
            Some(handler) => handler(call),
            None => MockResponse::new(405, "Method not allowed"),
        }
    }
}

impl fmt::Debug for WebServerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods.keys().map(Method::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("WebServerHandler")
            .field("methods", &methods)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use bytes::Bytes;

    use super::*;

    fn call(method: Method) -> HttpCall {
        HttpCall::new(
            method,
            "/todos".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
            "127.0.0.1:1".parse().unwrap(),
        )
    }

    #[test]
    fn registered_method_is_dispatched() {
        let handler = WebServerHandler::new().get(|_| MockResponse::ok("list"));
        let response = handler.handle(&call(Method::GET));
        assert_eq!(response.status(), 200);
        assert_eq!(response.body().as_ref(), b"list");
    }

    #[test]
    fn unknown_method_is_not_allowed() {
        let handler = WebServerHandler::new().get(|_| MockResponse::ok("list"));
        let response = handler.handle(&call(Method::PUT));
        assert_eq!(response.status(), 405);
        assert_eq!(response.body().as_ref(), b"Method not allowed");
    }
}
