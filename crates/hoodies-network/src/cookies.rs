//! Per-host cookie storage.
//!
//! A [`CookieJar`] plugs into the transport as its cookie store: cookies for
//! the target host are attached before a request is sent and `Set-Cookie`
//! headers are stored after the response arrives. Hosts are normalized to
//! `http://host`, so `https` and `http` share cookies.
//!
//! ```ignore
//! use std::sync::Arc;
//! use hoodies_network::{CookieJar, HoodiesNetworkClient};
//!
//! let jar = Arc::new(CookieJar::persistent_default()?);
//! let client = HoodiesNetworkClient::builder()
//!     .base_url("https://api.example.com")
//!     .enable_cookies_with_cookie_jar(jar.clone())
//!     .build()?;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::crypto::{Cipher, FileKeyService, IV_LEN};
use crate::error::{NetworkError, Result};
use crate::storage::RowFile;

/// A cookie name and value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
}

impl Cookie {
    /// Create a cookie.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse the `name=value` part of a `Set-Cookie` header.
    ///
    /// Attributes after the first `;` are ignored.
    pub fn parse(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?.trim();
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, value.trim()))
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Normalize a host or URL to the `http://host` form used as a jar key.
///
/// Scheme, port, path and query are dropped.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let parsed = if host.contains("://") {
        Url::parse(host).ok()
    } else {
        Url::parse(&format!("http://{host}")).ok()
    };
    match parsed.as_ref().and_then(Url::host_str) {
        Some(name) => format!("http://{}", name.to_ascii_lowercase()),
        None => format!("http://{}", host.to_ascii_lowercase()),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CookieRow {
    host: String,
    name: String,
    value: String,
    iv: String,
}

struct Persistence {
    file: RowFile<CookieRow>,
    cipher: Cipher,
    rows: Vec<CookieRow>,
}

impl Persistence {
    fn open(path: PathBuf, cipher: Cipher) -> Result<(Self, BTreeMap<String, Vec<Cookie>>)> {
        let file = RowFile::new(path);
        let rows: Vec<CookieRow> = file.load()?;

        let mut hosts: BTreeMap<String, Vec<Cookie>> = BTreeMap::new();
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            match decrypt_row(&cipher, &row) {
                Ok(value) => {
                    hosts
                        .entry(row.host.clone())
                        .or_default()
                        .push(Cookie::new(row.name.clone(), value));
                    kept.push(row);
                }
                Err(err) => tracing::warn!(
                    target: crate::targets::COOKIES,
                    host = %row.host,
                    name = %row.name,
                    error = %err,
                    "dropping unreadable cookie"
                ),
            }
        }

        Ok((
            Self {
                file,
                cipher,
                rows: kept,
            },
            hosts,
        ))
    }

    /// Re-seal every cookie of `host` and rewrite the file.
    fn replace_host(&mut self, host: &str, cookies: &[Cookie]) -> Result<()> {
        self.rows.retain(|row| row.host != host);
        let mut used: HashSet<String> = self.rows.iter().map(|row| row.iv.clone()).collect();

        for cookie in cookies {
            let iv = unique_iv(&self.cipher, &used)?;
            let sealed = self.cipher.encrypt(cookie.value.as_bytes(), &iv)?;
            let iv = STANDARD.encode(iv);
            used.insert(iv.clone());
            self.rows.push(CookieRow {
                host: host.to_string(),
                name: cookie.name.clone(),
                value: STANDARD.encode(sealed),
                iv,
            });
        }
        self.save()
    }

    fn clear(&mut self) -> Result<()> {
        self.rows.clear();
        self.save()
    }

    fn save(&self) -> Result<()> {
        self.file.save(&self.rows)?;
        Ok(())
    }
}

fn unique_iv(cipher: &Cipher, used: &HashSet<String>) -> Result<[u8; IV_LEN]> {
    loop {
        let iv = cipher.generate_iv()?;
        if !used.contains(&STANDARD.encode(iv)) {
            return Ok(iv);
        }
    }
}

fn decrypt_row(cipher: &Cipher, row: &CookieRow) -> Result<String> {
    let decode = |field: &str| {
        STANDARD
            .decode(field)
            .map_err(|e| NetworkError::Storage(e.to_string()))
    };
    let plain = cipher.decrypt(&decode(&row.value)?, &decode(&row.iv)?)?;
    String::from_utf8(plain).map_err(|e| NetworkError::Storage(e.to_string()))
}

struct JarState {
    hosts: BTreeMap<String, Vec<Cookie>>,
    persistence: Option<Persistence>,
}

/// A thread-safe, per-host cookie store.
///
/// Either purely in memory or persisted to an encrypted row file.
pub struct CookieJar {
    state: Mutex<JarState>,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieJar {
    /// Create an in-memory jar.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(JarState {
                hosts: BTreeMap::new(),
                persistence: None,
            }),
        }
    }

    /// Open a jar persisted at `path`, sealing values with `cipher`.
    ///
    /// Rows that no longer decrypt are skipped and dropped on the next write.
    pub fn persistent(path: impl Into<PathBuf>, cipher: Cipher) -> Result<Self> {
        let (persistence, hosts) = Persistence::open(path.into(), cipher)?;
        Ok(Self {
            state: Mutex::new(JarState {
                hosts,
                persistence: Some(persistence),
            }),
        })
    }

    /// Open the persistent jar in the default data directory.
    pub fn persistent_default() -> Result<Self> {
        let dir = crate::storage::default_data_dir()
            .ok_or_else(|| NetworkError::Storage("no home directory".to_string()))?;
        let keys = FileKeyService::new(dir.join("cookies.key"));
        Self::persistent(dir.join("HoodiesNetworkCookies.json"), Cipher::new(Arc::new(keys)))
    }

    /// Location of the backing file, if persistent.
    pub fn path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .persistence
            .as_ref()
            .map(|p| p.file.path().to_path_buf())
    }

    /// Cookies stored for `host`.
    pub fn cookies_for_host(&self, host: &str) -> Vec<Cookie> {
        self.state
            .lock()
            .hosts
            .get(&normalize_host(host))
            .cloned()
            .unwrap_or_default()
    }

    /// Every stored cookie.
    pub fn all_cookies(&self) -> Vec<Cookie> {
        self.state.lock().hosts.values().flatten().cloned().collect()
    }

    /// Every host with at least one cookie.
    pub fn all_hosts(&self) -> Vec<String> {
        self.state
            .lock()
            .hosts
            .iter()
            .filter(|(_, cookies)| !cookies.is_empty())
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Replace every cookie of `host`.
    pub fn set_cookies_for_host(&self, host: &str, cookies: Vec<Cookie>) -> Result<()> {
        let host = normalize_host(host);
        let mut state = self.state.lock();
        if let Some(persistence) = state.persistence.as_mut() {
            persistence.replace_host(&host, &cookies)?;
        }
        if cookies.is_empty() {
            state.hosts.remove(&host);
        } else {
            state.hosts.insert(host, cookies);
        }
        Ok(())
    }

    /// Add a cookie to `host`, replacing one with the same name.
    pub fn add_cookie_for_host(&self, host: &str, cookie: Cookie) -> Result<()> {
        let mut cookies = self.cookies_for_host(host);
        cookies.retain(|c| c.name != cookie.name);
        cookies.push(cookie);
        self.set_cookies_for_host(host, cookies)
    }

    /// Remove every cookie of every host.
    pub fn remove_all_cookies(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(persistence) = state.persistence.as_mut() {
            persistence.clear()?;
        }
        state.hosts.clear();
        Ok(())
    }
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CookieJar")
            .field("hosts", &state.hosts.len())
            .field(
                "path",
                &state.persistence.as_ref().map(|p| p.file.path().to_path_buf()),
            )
            .finish()
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        for header in cookie_headers {
            let Some(cookie) = header.to_str().ok().and_then(Cookie::parse) else {
                continue;
            };
            tracing::trace!(target: crate::targets::COOKIES, host, name = %cookie.name, "storing cookie");
            if let Err(err) = self.add_cookie_for_host(host, cookie) {
                tracing::warn!(target: crate::targets::COOKIES, host, error = %err, "failed to store cookie");
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let cookies = self.cookies_for_host(url.host_str()?);
        if cookies.is_empty() {
            return None;
        }
        let header = cookies
            .iter()
            .map(Cookie::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}
