//! Off-thread cache writes.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Sender, unbounded};

use super::{CacheKey, EncryptedCache};

struct WriteJob {
    key: CacheKey,
    data: Bytes,
    encrypt: bool,
}

/// Applies cache writes on a dedicated thread, in submission order.
///
/// The thread drains its backlog and exits once the writer is dropped.
pub(crate) struct CacheWriter {
    sender: Sender<WriteJob>,
    cache: Arc<EncryptedCache>,
}

impl CacheWriter {
    pub(crate) fn spawn(cache: Arc<EncryptedCache>) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<WriteJob>();
        let worker_cache = cache.clone();
        std::thread::Builder::new()
            .name("hoodies-network-cache-writer".to_string())
            .spawn(move || {
                for job in receiver.iter() {
                    write(&worker_cache, &job);
                }
                tracing::trace!(target: crate::targets::CACHE, "cache writer exiting");
            })?;
        Ok(Self { sender, cache })
    }

    /// Queue a write. Falls back to writing inline if the thread is gone.
    pub(crate) fn submit(&self, key: CacheKey, data: Bytes, encrypt: bool) {
        let job = WriteJob { key, data, encrypt };
        if let Err(rejected) = self.sender.send(job) {
            write(&self.cache, &rejected.into_inner());
        }
    }
}

fn write(cache: &EncryptedCache, job: &WriteJob) {
    if let Err(err) = cache.cache_request_result(&job.data, &job.key, job.encrypt) {
        tracing::warn!(
            target: crate::targets::CACHE,
            url = %job.key.url,
            error = %err,
            "failed to cache response"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn wait_for(cache: &EncryptedCache, key: &CacheKey, expected: &[u8]) -> bool {
        for _ in 0..200 {
            if let Ok(hit) = cache.get_cached_data(key) {
                if hit.data().as_ref() == expected {
                    return true;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn writes_land_in_order() {
        let cache = Arc::new(EncryptedCache::in_memory());
        let writer = CacheWriter::spawn(cache.clone()).unwrap();
        let key = CacheKey::new("https://example.com/items", None);

        for i in 0..20 {
            writer.submit(key.clone(), Bytes::from(format!("v{i}")), i % 2 == 0);
        }

        assert!(wait_for(&cache, &key, b"v19"));
    }

    #[test]
    fn dropping_the_writer_drains_the_backlog() {
        let cache = Arc::new(EncryptedCache::in_memory());
        let key = CacheKey::new("https://example.com/late", None);
        {
            let writer = CacheWriter::spawn(cache.clone()).unwrap();
            writer.submit(key.clone(), Bytes::from_static(b"kept"), true);
        }
        assert!(wait_for(&cache, &key, b"kept"));
    }
}
