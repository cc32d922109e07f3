//! Engine behaviour with a scripted transport: retries, cancellation and the
//! response cache.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use hoodies_network::cache::{CacheStore, JsonFileCacheStore, MemoryCacheStore};
use hoodies_network::crypto::{Cipher, FileKeyService};
use hoodies_network::{
    CacheConfig, CacheKey, CallError, CancellableRequest, Cancellation, EncryptedCache,
    HoodiesNetworkClient, Interceptor, NetworkError, Request, RequestId, RequestQueue, Response,
    RetryCount, RetryableRequest, StaticProbe, Transport, codes,
};
use parking_lot::Mutex;
use serde::Deserialize;

struct ScriptedTransport {
    outcomes: Mutex<VecDeque<hoodies_network::Result<Response>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedTransport {
    fn new(outcomes: Vec<hoodies_network::Result<Response>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &Request) -> hoodies_network::Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = request
            .headers()
            .get("key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().push((request.url().to_string(), key));
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(NetworkError::Connection("connection refused".into())))
    }
}

fn ok(body: &str) -> hoodies_network::Result<Response> {
    Ok(Response::new(200, body.to_string(), Duration::from_millis(1), Vec::new()))
}

fn client(transport: Arc<ScriptedTransport>) -> hoodies_network::HoodiesNetworkClientBuilder {
    HoodiesNetworkClient::builder()
        .base_url("http://localhost:6969/")
        .transport(transport)
        .request_queue(RequestQueue::with_workers("engine-tests", 2))
        .connectivity(Arc::new(StaticProbe::new(true)))
}

/// Cache writes land after delivery, so wait for them.
fn wait_until_cached(cache: &EncryptedCache, key: &CacheKey) {
    for _ in 0..200 {
        if !cache.is_stale(key, Duration::from_secs(3600)) {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("response was never cached");
}

#[derive(Default)]
struct ErrorCounter {
    errors: AtomicU32,
    attempts: Mutex<Vec<u32>>,
}

impl Interceptor for ErrorCounter {
    fn intercept_error(&self, _error: &CallError, _request: &mut RetryableRequest<'_>, attempts: u32) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().push(attempts);
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Todo {
    id: u32,
    title: String,
}

#[tokio::test]
async fn typed_json_result() {
    let transport = ScriptedTransport::new(vec![ok(r#"{"id":1,"title":"milk"}"#)]);
    let client = client(transport.clone()).build().unwrap();

    let result = client.get("todos/1").send::<Todo>().await;

    assert_eq!(
        result.value(),
        Some(&Todo {
            id: 1,
            title: "milk".into()
        })
    );
    assert_eq!(transport.seen.lock()[0].0, "http://localhost:6969/todos/1");
}

#[tokio::test]
async fn malformed_json_is_a_syntax_failure() {
    let transport = ScriptedTransport::new(vec![ok("not json")]);
    let client = client(transport).build().unwrap();

    let result = client.get("todos/1").send::<Todo>().await;

    assert_eq!(result.error().map(|e| e.code), Some(codes::JSON_SYNTAX_ERROR_CODE));
}

#[tokio::test]
async fn retry_budget_then_failure() {
    let transport = ScriptedTransport::new(Vec::new());
    let counter = Arc::new(ErrorCounter::default());
    let client = client(transport.clone())
        .retry_on_connection_failure(true, RetryCount::Twice)
        .add_interceptor(counter.clone())
        .build()
        .unwrap();

    let result = client.get("down").send_text().await;

    assert_eq!(result.error().map(|e| e.code), Some(codes::CONNECTION_ERROR_CODE));
    assert_eq!(transport.calls(), 3);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 3);
    assert_eq!(*counter.attempts.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn retry_disabled_fails_after_one_attempt() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = client(transport.clone()).build().unwrap();

    let result = client.get("down").send_empty().await;

    assert!(result.is_failure());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn retry_recovers_when_the_server_comes_back() {
    let transport = ScriptedTransport::new(vec![
        Err(NetworkError::Timeout),
        ok("finally"),
    ]);
    let client = client(transport.clone())
        .retry_on_connection_failure(true, RetryCount::Once)
        .build()
        .unwrap();

    let result = client.get("flaky").send_text().await;

    assert_eq!(result.value().map(String::as_str), Some("finally"));
    assert_eq!(transport.calls(), 2);
}

/// Adds a `key` header and resubmits once after a `401`.
struct WantsKey {
    added: AtomicU32,
}

impl Interceptor for WantsKey {
    fn intercept_error(&self, error: &CallError, request: &mut RetryableRequest<'_>, _attempts: u32) {
        if error.code == 401 && self.added.fetch_add(1, Ordering::SeqCst) == 0 {
            request.set_header("key", "secret").unwrap();
            request.retry();
        }
    }
}

#[tokio::test]
async fn interceptor_can_fix_and_retry() {
    let transport = ScriptedTransport::new(vec![
        Err(NetworkError::HttpStatus {
            status: 401,
            message: Some("missing key".into()),
        }),
        ok("welcome"),
    ]);
    let client = client(transport.clone())
        .add_interceptor(Arc::new(WantsKey {
            added: AtomicU32::new(0),
        }))
        .build()
        .unwrap();

    let result = client.get("wants_key").send_text().await;

    assert_eq!(result.value().map(String::as_str), Some("welcome"));
    let seen = transport.seen.lock();
    assert_eq!(seen[0].1, None);
    assert_eq!(seen[1].1.as_deref(), Some("secret"));
}

#[tokio::test]
async fn status_failure_carries_body_and_code() {
    let transport = ScriptedTransport::new(vec![Err(NetworkError::HttpStatus {
        status: 404,
        message: Some("Not Found".into()),
    })]);
    let client = client(transport.clone())
        .retry_on_connection_failure(true, RetryCount::Max)
        .build()
        .unwrap();

    let result = client.get("missing").send_text().await;
    let error = result.error().unwrap();

    assert_eq!(error.code, 404);
    assert_eq!(error.message, "Not Found");
    assert_eq!(transport.calls(), 1);
}

struct CancelInNetworkHook;

impl Interceptor for CancelInNetworkHook {
    fn intercept_network(&self, _is_online: bool, request: &mut CancellableRequest<'_>) {
        request.cancel(Cancellation::fail("blocked", codes::CANCELLED_ERROR_CODE));
    }
}

struct CancelInRequestHook {
    called: AtomicU32,
}

impl Interceptor for CancelInRequestHook {
    fn intercept_request(&self, _id: RequestId, request: &mut CancellableRequest<'_>) {
        self.called.fetch_add(1, Ordering::SeqCst);
        request.cancel(Cancellation::respond_with("from request hook"));
    }
}

#[tokio::test]
async fn earliest_cancellation_wins() {
    let transport = ScriptedTransport::new(vec![ok("network")]);
    let later = Arc::new(CancelInRequestHook {
        called: AtomicU32::new(0),
    });
    let client = client(transport.clone())
        .add_interceptor(Arc::new(CancelInNetworkHook))
        .add_interceptor(later.clone())
        .build()
        .unwrap();

    let result = client.get("anything").send_text().await;

    let error = result.error().unwrap();
    assert_eq!(error.message, "blocked");
    assert_eq!(error.code, codes::CANCELLED_ERROR_CODE);
    assert_eq!(later.called.load(Ordering::SeqCst), 0);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn cancellation_response_is_parsed_like_a_live_one() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = client(transport.clone())
        .add_interceptor(Arc::new(CancelInRequestHook {
            called: AtomicU32::new(0),
        }))
        .build()
        .unwrap();

    let result = client.get("anything").send::<String>().await;

    // The body is not JSON, so parsing fails like it would for the network.
    assert_eq!(result.error().map(|e| e.code), Some(codes::JSON_SYNTAX_ERROR_CODE));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn cache_serves_repeat_calls() {
    let transport = ScriptedTransport::new(vec![ok("first"), ok("second")]);
    let client = client(transport.clone()).build().unwrap();
    let config = CacheConfig::enabled().encrypted();

    let first = client.post("patch").json("abc").cache(config).send_text().await;
    wait_until_cached(
        client.cache(),
        &CacheKey::new("http://localhost:6969/patch", Some(&b"\"abc\""[..])),
    );
    let second = client.post("patch").json("abc").cache(config).send_text().await;
    let other_body = client.post("patch").json("xyz").cache(config).send_text().await;

    assert_eq!(first.value().map(String::as_str), Some("first"));
    assert_eq!(second.value().map(String::as_str), Some("first"));
    assert_eq!(other_body.value().map(String::as_str), Some("second"));
    assert_eq!(transport.calls(), 2);

    // Cache hits carry the request URL and no headers.
    assert_eq!(second.url(), Some("http://localhost:6969/patch"));
    assert!(second.headers().is_empty());
}

#[tokio::test]
async fn stale_entry_goes_to_the_network() {
    let transport = ScriptedTransport::new(vec![ok("fresh")]);
    let store = Arc::new(MemoryCacheStore::new());
    let cache = Arc::new(EncryptedCache::new(store.clone(), Cipher::in_memory()));
    let key = CacheKey::new("http://localhost:6969/get", None);
    cache.cache_request_result(b"old", &key, false).unwrap();

    // Backdate the row by a minute.
    let mut row = store.get(&key.url, &key.body_hash).unwrap().unwrap();
    row.cached_at_ms -= 60_000;
    store.insert(row).unwrap();
    let client = client(transport.clone()).cache(cache).build().unwrap();

    let result = client
        .get("get")
        .cache(CacheConfig::enabled().with_stale_threshold(Duration::from_secs(30)))
        .send_text()
        .await;

    assert_eq!(result.value().map(String::as_str), Some("fresh"));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn file_cache_survives_a_new_client() {
    let dir = tempfile::tempdir().unwrap();
    let rows = dir.path().join("cache.json");
    let keys = dir.path().join("key");
    let open_cache = || {
        Arc::new(EncryptedCache::new(
            Arc::new(JsonFileCacheStore::open(&rows).unwrap()),
            Cipher::new(Arc::new(FileKeyService::new(&keys))),
        ))
    };

    let transport = ScriptedTransport::new(vec![ok("stored")]);
    let first = client(transport.clone()).cache(open_cache()).build().unwrap();
    let result = first
        .get("get")
        .cache(CacheConfig::enabled().encrypted())
        .send_text()
        .await;
    assert!(result.is_success());
    wait_until_cached(first.cache(), &CacheKey::new("http://localhost:6969/get", None));

    let second = client(transport.clone()).cache(open_cache()).build().unwrap();
    let result = second
        .get("get")
        .cache(CacheConfig::enabled().encrypted())
        .send_text()
        .await;

    assert_eq!(result.value().map(String::as_str), Some("stored"));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn html_with_headers_and_cache_goes_through_the_builder() {
    let transport = ScriptedTransport::new(vec![ok("<p>page</p>"), ok("<p>newer</p>")]);
    let client = client(transport.clone()).build().unwrap();
    let fetch = || {
        client
            .get("page")
            .header("key", "secret")
            .cache(CacheConfig::enabled())
            .send_text()
    };

    let first = fetch().await;
    wait_until_cached(client.cache(), &CacheKey::new("http://localhost:6969/page", None));
    let second = fetch().await;

    assert_eq!(first.value().map(String::as_str), Some("<p>page</p>"));
    assert_eq!(second.value().map(String::as_str), Some("<p>page</p>"));
    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.seen.lock()[0].1.as_deref(), Some("secret"));
}

#[test]
fn blocking_callers_are_supported() {
    let transport = ScriptedTransport::new(vec![ok(r#"{"id":7,"title":"sync"}"#)]);
    let client = client(transport).build().unwrap();

    let result = client.get("todos/7").send_blocking::<Todo>();

    assert_eq!(result.value().map(|t| t.id), Some(7));
}
