//! An embeddable mock web server.
//!
//! Routes are registered per path with a [`WebServerHandler`]; a path matches
//! itself and everything below it, and the longest registered prefix wins.
//! The server runs on its own thread, so it can be used from synchronous and
//! async tests alike.
//!
//! ```ignore
//! use hoodies_network_mockserver::{MockWebServer, MockResponse, WebServerHandler, httpbin};
//!
//! let server = MockWebServer::builder()
//!     .use_port(0)
//!     .with_httpbin_routes()
//!     .add_route("/todos", WebServerHandler::new().get(|_| MockResponse::ok("[]")))
//!     .start()?;
//!
//! let base = server.base_url();
//! // ... exercise a client against `base` ...
//! server.stop();
//! ```

mod call;
mod handler;
pub mod httpbin;

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;

pub use call::{HttpCall, MockResponse};
pub use handler::WebServerHandler;

/// The port used when none is configured.
pub const DEFAULT_PORT: u16 = 6969;

const TARGET: &str = "hoodies_network_mockserver";

/// Builder for a [`MockWebServer`].
#[derive(Debug)]
pub struct MockWebServerBuilder {
    port: u16,
    routes: Vec<(String, WebServerHandler)>,
}

impl Default for MockWebServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWebServerBuilder {
    /// A builder for port [`DEFAULT_PORT`] with no routes.
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            routes: Vec::new(),
        }
    }

    /// Listen on `port`. `0` picks a free port.
    pub fn use_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Serve `path` and everything below it with `handler`.
    ///
    /// Registering the same path again replaces its handler.
    pub fn add_route(mut self, path: impl Into<String>, handler: WebServerHandler) -> Self {
        let path = path.into();
        self.routes.retain(|(existing, _)| *existing != path);
        self.routes.push((path, handler));
        self
    }

    /// Register the echo routes `/get`, `/post`, `/put`, `/patch`, `/delete`
    /// and `/options`, each answering its own method, plus the delayed
    /// `/echo/<seconds>` route. `/patch` also echoes `POST`.
    pub fn with_httpbin_routes(self) -> Self {
        self.add_route("/get", httpbin::echo_handler(Method::GET))
            .add_route("/post", httpbin::echo_handler(Method::POST))
            .add_route("/put", httpbin::echo_handler(Method::PUT))
            .add_route(
                "/patch",
                httpbin::echo_handler(Method::PATCH).on(Method::POST, httpbin::echo),
            )
            .add_route("/delete", httpbin::echo_handler(Method::DELETE))
            .add_route("/options", httpbin::echo_handler(Method::OPTIONS))
            .add_route("/echo", httpbin::delay_handler())
    }

    /// Bind the port and start serving on a background thread.
    pub fn start(self) -> std::io::Result<MockWebServer> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let mut routes = self.routes;
        // Longest prefix first.
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let router = Router::new()
            .fallback(dispatch)
            .with_state(Arc::new(routes));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(format!("mock-web-server-{}", addr.port()))
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!(target: TARGET, error = %e, "failed to register listener");
                            return;
                        }
                    };
                    let app = router.into_make_service_with_connect_info::<SocketAddr>();
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(e) = served {
                        tracing::error!(target: TARGET, error = %e, "mock web server failed");
                    }
                });
            })?;

        tracing::debug!(target: TARGET, address = %addr, "mock web server started");

        Ok(MockWebServer {
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// A running mock web server. Stopped on drop.
#[derive(Debug)]
pub struct MockWebServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockWebServer {
    /// Create a builder.
    pub fn builder() -> MockWebServerBuilder {
        MockWebServerBuilder::new()
    }

    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `http://localhost:<port>/`.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}/", self.addr.port())
    }

    /// Stop serving and wait for the server thread to exit.
    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(target: TARGET, "mock web server thread panicked");
            }
            tracing::debug!(target: TARGET, address = %self.addr, "mock web server stopped");
        }
    }
}

impl Drop for MockWebServer {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

type Routes = Arc<Vec<(String, WebServerHandler)>>;

async fn dispatch(
    State(routes): State<Routes>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => return MockResponse::new(400, e.to_string()).into_response(),
    };

    let path = parts.uri.path().to_string();
    let Some(handler) = routes
        .iter()
        .find(|(prefix, _)| matches_prefix(&path, prefix))
        .map(|(_, handler)| handler.clone())
    else {
        tracing::debug!(target: TARGET, path = %path, "no route");
        return MockResponse::new(404, "No context found for request").into_response();
    };

    let call = HttpCall::new(parts.method, parts.uri, parts.headers, body, remote);
    tracing::trace!(target: TARGET, method = %call.method(), uri = %call.uri(), "handling");

    // Handlers may block, e.g. the delayed echo.
    match tokio::task::spawn_blocking(move || handler.handle(&call)).await {
        Ok(response) => response.into_response(),
        Err(e) => MockResponse::new(500, e.to_string()).into_response(),
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}
