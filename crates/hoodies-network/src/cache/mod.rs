//! Response cache with staleness policy and optional at-rest encryption.
//!
//! Entries are keyed by `(url, body hash)`. A fresh entry short-circuits the
//! network entirely: the engine synthesizes a `200` response from it and runs
//! that through the same parse path as a live response.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use hoodies_network::cache::CacheConfig;
//!
//! let result = client
//!     .get("/todos/1")
//!     .cache(CacheConfig::enabled().with_stale_threshold(Duration::from_secs(300)).encrypted())
//!     .send::<Todo>()
//!     .await;
//! ```

mod encrypted;
mod store;
mod writer;

use std::time::Duration;

use ring::digest::{SHA256, digest};
use thiserror::Error;

use crate::crypto::CryptoError;

pub use encrypted::EncryptedCache;
pub(crate) use writer::CacheWriter;
pub use store::{CacheStore, CachedData, JsonFileCacheStore, MemoryCacheStore};

const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Per-call cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheConfig {
    /// Always go to the network and never store the response.
    #[default]
    Disabled,
    /// Serve fresh entries from the cache and store live responses.
    Enabled {
        /// Maximum age of an entry that may satisfy a call.
        stale_threshold: Duration,
        /// Whether stored payloads are encrypted.
        encryption: bool,
    },
}

impl CacheConfig {
    /// Caching with a one hour threshold and no encryption.
    pub fn enabled() -> Self {
        Self::Enabled {
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            encryption: false,
        }
    }

    /// Set the staleness threshold. No effect on a disabled config.
    pub fn with_stale_threshold(self, threshold: Duration) -> Self {
        match self {
            Self::Enabled { encryption, .. } => Self::Enabled {
                stale_threshold: threshold,
                encryption,
            },
            Self::Disabled => Self::Disabled,
        }
    }

    /// Encrypt stored payloads. No effect on a disabled config.
    pub fn encrypted(self) -> Self {
        match self {
            Self::Enabled {
                stale_threshold, ..
            } => Self::Enabled {
                stale_threshold,
                encryption: true,
            },
            Self::Disabled => Self::Disabled,
        }
    }

    /// Whether caching is enabled.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// The staleness threshold, if enabled.
    pub fn stale_threshold(&self) -> Option<Duration> {
        match self {
            Self::Enabled {
                stale_threshold, ..
            } => Some(*stale_threshold),
            Self::Disabled => None,
        }
    }

    /// Whether stored payloads are encrypted.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Enabled { encryption: true, .. })
    }
}

/// Cache failures.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// No entry exists for the key.
    #[error("no cache entry for {0}")]
    NotFound(String),
    /// A stored field is not valid base64.
    #[error("corrupt cache row: {0}")]
    Corrupt(String),
    /// Encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The backing store failed.
    #[error("cache store error: {0}")]
    Store(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// The composite key of a cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Request URL.
    pub url: String,
    /// Hex SHA-256 of the serialized request body.
    pub body_hash: String,
}

impl CacheKey {
    /// Build the key for a URL and optional body.
    pub fn new(url: impl Into<String>, body: Option<&[u8]>) -> Self {
        Self {
            url: url.into(),
            body_hash: body_hash(body.unwrap_or_default()),
        }
    }

    /// The key for a request.
    pub fn for_request(request: &crate::request::Request) -> Self {
        Self::new(request.url(), request.body().map(|b| b.as_ref()))
    }
}

fn body_hash(body: &[u8]) -> String {
    digest(&SHA256, body)
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
