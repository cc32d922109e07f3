//! Keyed row stores for cache entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::CacheError;
use crate::storage::RowFile;

/// One stored cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedData {
    /// Request URL.
    pub url: String,
    /// Hex SHA-256 of the request body.
    pub body_hash: String,
    /// Creation time, UTC milliseconds since the Unix epoch.
    pub cached_at_ms: i64,
    /// Base64 payload (ciphertext when `iv` is present).
    pub data: String,
    /// Base64 IV for encrypted payloads.
    pub iv: Option<String>,
}

/// Persistent storage for cache rows.
///
/// `(url, body_hash)` identifies a row. Implementations must be safe to call
/// from several dispatcher threads at once; each call is atomic per row.
pub trait CacheStore: Send + Sync {
    /// Fetch the row for a key.
    fn get(&self, url: &str, body_hash: &str) -> Result<Option<CachedData>, CacheError>;

    /// Every row using the given base64 IV.
    fn get_by_iv(&self, iv: &str) -> Result<Vec<CachedData>, CacheError>;

    /// Remove the row for a key, if any.
    fn delete(&self, url: &str, body_hash: &str) -> Result<(), CacheError>;

    /// Insert a row, replacing any row with the same key.
    fn insert(&self, row: CachedData) -> Result<(), CacheError>;

    /// Remove every row.
    fn clear(&self) -> Result<(), CacheError>;
}

type RowKey = (String, String);

fn row_key(url: &str, body_hash: &str) -> RowKey {
    (url.to_string(), body_hash.to_string())
}

/// A process-local cache store.
#[derive(Default)]
pub struct MemoryCacheStore {
    rows: Mutex<HashMap<RowKey, CachedData>>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// A snapshot of every row.
    pub fn rows(&self) -> Vec<CachedData> {
        self.rows.lock().values().cloned().collect()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, url: &str, body_hash: &str) -> Result<Option<CachedData>, CacheError> {
        Ok(self.rows.lock().get(&row_key(url, body_hash)).cloned())
    }

    fn get_by_iv(&self, iv: &str) -> Result<Vec<CachedData>, CacheError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| row.iv.as_deref() == Some(iv))
            .cloned()
            .collect())
    }

    fn delete(&self, url: &str, body_hash: &str) -> Result<(), CacheError> {
        self.rows.lock().remove(&row_key(url, body_hash));
        Ok(())
    }

    fn insert(&self, row: CachedData) -> Result<(), CacheError> {
        self.rows
            .lock()
            .insert(row_key(&row.url, &row.body_hash), row);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.rows.lock().clear();
        Ok(())
    }
}

/// A cache store persisted to a JSON file.
///
/// Rows are loaded once at open and the file is rewritten after every
/// mutation.
pub struct JsonFileCacheStore {
    file: RowFile<CachedData>,
    rows: Mutex<HashMap<RowKey, CachedData>>,
}

impl JsonFileCacheStore {
    /// Open (or create on first write) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let file = RowFile::<CachedData>::new(path);
        let rows = file
            .load()?
            .into_iter()
            .map(|row| (row_key(&row.url, &row.body_hash), row))
            .collect();
        Ok(Self {
            file,
            rows: Mutex::new(rows),
        })
    }

    /// Open the store in the default data directory.
    pub fn open_default() -> Result<Self, CacheError> {
        let dir = crate::storage::default_data_dir()
            .ok_or_else(|| CacheError::Store("no home directory".to_string()))?;
        Self::open(dir.join("HoodiesNetworkCache.json"))
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<RowKey, CachedData>)) -> Result<(), CacheError> {
        let mut rows = self.rows.lock();
        f(&mut rows);
        self.file.save(rows.values())?;
        Ok(())
    }
}

impl CacheStore for JsonFileCacheStore {
    fn get(&self, url: &str, body_hash: &str) -> Result<Option<CachedData>, CacheError> {
        Ok(self.rows.lock().get(&row_key(url, body_hash)).cloned())
    }

    fn get_by_iv(&self, iv: &str) -> Result<Vec<CachedData>, CacheError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| row.iv.as_deref() == Some(iv))
            .cloned()
            .collect())
    }

    fn delete(&self, url: &str, body_hash: &str) -> Result<(), CacheError> {
        self.mutate(|rows| {
            rows.remove(&row_key(url, body_hash));
        })
    }

    fn insert(&self, row: CachedData) -> Result<(), CacheError> {
        self.mutate(|rows| {
            rows.insert(row_key(&row.url, &row.body_hash), row);
        })
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.mutate(HashMap::clear)
    }
}
