use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use parking_lot::Mutex;

use super::{CacheError, CacheKey, CacheStore, CachedData, MemoryCacheStore};
use crate::crypto::Cipher;
use crate::response::Response;

/// The response cache used by the engine.
///
/// Payloads are stored base64-encoded, encrypted with a fresh IV when the
/// call asks for it. Writes are serialized so the IV uniqueness check and
/// the replace-by-key are never interleaved.
pub struct EncryptedCache {
    store: Arc<dyn CacheStore>,
    cipher: Cipher,
    write_lock: Mutex<()>,
}

impl EncryptedCache {
    /// Create a cache over `store`, sealing rows with `cipher`.
    pub fn new(store: Arc<dyn CacheStore>, cipher: Cipher) -> Self {
        Self {
            store,
            cipher,
            write_lock: Mutex::new(()),
        }
    }

    /// A process-local cache with a process-local key.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), Cipher::in_memory())
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Whether the entry for `key` is missing or older than `threshold`.
    ///
    /// A store that cannot be read counts as stale, so the call goes to the
    /// network instead of failing.
    pub fn is_stale(&self, key: &CacheKey, threshold: Duration) -> bool {
        self.is_stale_at(key, threshold, Utc::now().timestamp_millis())
    }

    /// [`is_stale`](Self::is_stale) evaluated at `now_ms`.
    pub fn is_stale_at(&self, key: &CacheKey, threshold: Duration, now_ms: i64) -> bool {
        match self.store.get(&key.url, &key.body_hash) {
            Ok(Some(row)) => {
                let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
                now_ms.saturating_sub(row.cached_at_ms) > threshold_ms
            }
            Ok(None) => true,
            Err(err) => {
                tracing::warn!(
                    target: crate::targets::CACHE,
                    url = %key.url,
                    error = %err,
                    "cache read failed, treating entry as stale"
                );
                true
            }
        }
    }

    /// Load the entry for `key` as a synthesized `200` response.
    pub fn get_cached_data(&self, key: &CacheKey) -> Result<Response, CacheError> {
        let row = self
            .store
            .get(&key.url, &key.body_hash)?
            .ok_or_else(|| CacheError::NotFound(key.url.clone()))?;

        let data = decode(&row.data)?;
        let payload = match row.iv.as_deref() {
            Some(iv) => self.cipher.decrypt(&data, &decode(iv)?)?,
            None => data,
        };

        tracing::debug!(
            target: crate::targets::CACHE,
            url = %key.url,
            bytes = payload.len(),
            "cache hit"
        );
        Ok(Response::synthesized(payload).with_url(key.url.clone()))
    }

    /// Store `data` for `key`, replacing any existing entry.
    pub fn cache_request_result(
        &self,
        data: &[u8],
        key: &CacheKey,
        encrypt: bool,
    ) -> Result<(), CacheError> {
        self.cache_request_result_at(data, key, encrypt, Utc::now().timestamp_millis())
    }

    pub(crate) fn cache_request_result_at(
        &self,
        data: &[u8],
        key: &CacheKey,
        encrypt: bool,
        now_ms: i64,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();

        let (data, iv) = if encrypt {
            let iv = self.unique_iv()?;
            let sealed = self.cipher.encrypt(data, &iv)?;
            (STANDARD.encode(sealed), Some(STANDARD.encode(iv)))
        } else {
            (STANDARD.encode(data), None)
        };

        self.store.delete(&key.url, &key.body_hash)?;
        self.store.insert(CachedData {
            url: key.url.clone(),
            body_hash: key.body_hash.clone(),
            cached_at_ms: now_ms,
            data,
            iv,
        })?;

        tracing::trace!(
            target: crate::targets::CACHE,
            url = %key.url,
            encrypted = encrypt,
            "cached response"
        );
        Ok(())
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        self.store.clear()
    }

    // Caller holds `write_lock`.
    fn unique_iv(&self) -> Result<[u8; crate::crypto::IV_LEN], CacheError> {
        loop {
            let iv = self.cipher.generate_iv()?;
            if self.store.get_by_iv(&STANDARD.encode(iv))?.is_empty() {
                return Ok(iv);
            }
        }
    }
}

impl std::fmt::Debug for EncryptedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedCache").finish_non_exhaustive()
    }
}

fn decode(field: &str) -> Result<Vec<u8>, CacheError> {
    STANDARD
        .decode(field)
        .map_err(|e| CacheError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::crypto::CryptoError;

    const T0: i64 = 1_700_000_000_000;

    fn key() -> CacheKey {
        CacheKey::new("https://example.com/todos/1", None)
    }

    #[test]
    fn staleness_uses_millisecond_age() {
        let cache = EncryptedCache::in_memory();
        cache
            .cache_request_result_at(b"{}", &key(), false, T0)
            .unwrap();

        let threshold = Duration::from_secs(1);
        assert!(!cache.is_stale_at(&key(), threshold, T0 + 500));
        assert!(!cache.is_stale_at(&key(), threshold, T0 + 1000));
        assert!(cache.is_stale_at(&key(), threshold, T0 + 1001));
    }

    #[test]
    fn missing_entry_is_stale() {
        let cache = EncryptedCache::in_memory();
        assert!(cache.is_stale(&key(), Duration::from_secs(3600)));
        assert!(matches!(
            cache.get_cached_data(&key()),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn plaintext_and_encrypted_entries_read_back() {
        let cache = EncryptedCache::in_memory();

        cache.cache_request_result(b"plain", &key(), false).unwrap();
        let hit = cache.get_cached_data(&key()).unwrap();
        assert_eq!(hit.data().as_ref(), b"plain");
        assert_eq!(hit.status(), 200);
        assert_eq!(hit.url(), Some("https://example.com/todos/1"));

        cache.cache_request_result(b"secret", &key(), true).unwrap();
        let row = cache
            .store()
            .get(&key().url, &key().body_hash)
            .unwrap()
            .unwrap();
        assert!(row.iv.is_some());
        assert_ne!(row.data, STANDARD.encode(b"secret"));
        assert_eq!(cache.get_cached_data(&key()).unwrap().data().as_ref(), b"secret");
    }

    #[test]
    fn every_encrypted_row_gets_a_distinct_iv() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = EncryptedCache::new(store.clone(), Cipher::in_memory());

        for i in 0..1000 {
            let key = CacheKey::new(format!("https://example.com/{i}"), None);
            cache.cache_request_result(b"x", &key, true).unwrap();
        }

        let ivs: HashSet<_> = store.rows().into_iter().filter_map(|row| row.iv).collect();
        assert_eq!(ivs.len(), 1000);
    }

    #[test]
    fn tampered_row_is_a_typed_error() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = EncryptedCache::new(store.clone(), Cipher::in_memory());
        cache.cache_request_result(b"secret", &key(), true).unwrap();

        let mut row = store.get(&key().url, &key().body_hash).unwrap().unwrap();
        let mut sealed = STANDARD.decode(&row.data).unwrap();
        sealed[0] ^= 0x01;
        row.data = STANDARD.encode(sealed);
        store.insert(row).unwrap();

        assert!(matches!(
            cache.get_cached_data(&key()),
            Err(CacheError::Crypto(CryptoError::Open))
        ));
    }

    #[test]
    fn rewrite_replaces_entry() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = EncryptedCache::new(store.clone(), Cipher::in_memory());
        cache.cache_request_result(b"one", &key(), true).unwrap();
        cache.cache_request_result(b"two", &key(), true).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(cache.get_cached_data(&key()).unwrap().data().as_ref(), b"two");
    }
}
