//! Client-wide configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{NetworkError, Result};
use crate::queue::DEFAULT_WORKER_COUNT;

const SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const SOCKET_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the transport and the dispatcher pool.
///
/// A zero timeout disables that timeout entirely.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Deadline for the whole exchange, from connecting until the body has
    /// been read. A slow but steady body still times out once it passes.
    pub read_timeout: Duration,
    /// Number of dispatcher threads for a queue created from this config.
    pub worker_count: usize,
    /// Whether to follow redirects.
    pub follow_redirects: bool,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// Default user agent.
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: SOCKET_CONNECT_TIMEOUT,
            read_timeout: SOCKET_READ_TIMEOUT,
            worker_count: DEFAULT_WORKER_COUNT,
            follow_redirects: true,
            max_redirects: 10,
            user_agent: Some(format!("HoodiesNetwork/{} (Rust)", env!("CARGO_PKG_VERSION"))),
        }
    }
}

impl HttpClientConfig {
    /// Parse a configuration from a TOML document.
    ///
    /// Every key is optional; missing keys keep their defaults.
    ///
    /// ```ignore
    /// let config = HttpClientConfig::from_toml_str(r#"
    ///     connect_timeout_secs = 5
    ///     read_timeout_secs = 30
    ///     worker_count = 8
    /// "#)?;
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| NetworkError::Storage(e.to_string()))?;
        Ok(file.into_config())
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NetworkError::Storage(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&source)
    }

    /// Connect timeout, or `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero(self.connect_timeout)
    }

    /// Whole-request deadline, or `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero(self.read_timeout)
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    worker_count: Option<usize>,
    follow_redirects: Option<bool>,
    max_redirects: Option<usize>,
    user_agent: Option<String>,
}

impl ConfigFile {
    fn into_config(self) -> HttpClientConfig {
        let defaults = HttpClientConfig::default();
        HttpClientConfig {
            connect_timeout: self
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            read_timeout: self
                .read_timeout_secs
                .map_or(defaults.read_timeout, Duration::from_secs),
            worker_count: self.worker_count.unwrap_or(defaults.worker_count).max(1),
            follow_redirects: self.follow_redirects.unwrap_or(defaults.follow_redirects),
            max_redirects: self.max_redirects.unwrap_or(defaults.max_redirects),
            user_agent: self.user_agent.or(defaults.user_agent),
        }
    }
}
