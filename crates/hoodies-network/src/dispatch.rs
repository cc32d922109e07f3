//! The engine behind a client: interceptor phases, cache, queue and retry.
//!
//! A call moves through the engine as an owned [`Request`]:
//!
//! 1. On the caller's task: network-check hooks, then pre-send hooks. A
//!    cancellation resolves the call immediately.
//! 2. Still on the caller's task: a fresh cache entry resolves the call
//!    through the normal parse path.
//! 3. Otherwise the request is queued and a dispatcher thread executes it.
//!    Success resolves the call and hands the cache refresh to a writer
//!    thread; failure goes through the error hooks and the retry controller.

use std::sync::Arc;

use crate::cache::{CacheKey, CacheWriter, EncryptedCache};
use crate::connectivity::ConnectivityProbe;
use crate::error::NetworkError;
use crate::interceptor::Interceptor;
use crate::queue::{QueuedRequest, RequestHandler, RequestQueue};
use crate::request::{CancellableRequest, Cancellation, Request, RetryableRequest};
use crate::response::Response;
use crate::result::CallError;
use crate::retry::{RetryController, RetryDecision};
use crate::transport::Transport;

pub(crate) struct Dispatcher {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) retry: RetryController,
    pub(crate) cache: Arc<EncryptedCache>,
    pub(crate) cache_writer: CacheWriter,
    pub(crate) queue: RequestQueue,
    pub(crate) connectivity: Arc<dyn ConnectivityProbe>,
}

impl Dispatcher {
    /// Run the caller-side phases and hand the request to the queue.
    pub(crate) fn send_request(self: &Arc<Self>, mut request: Request) {
        // Probing walks the interfaces, so skip it when nobody listens.
        if !self.interceptors.is_empty() {
            let is_online = self.connectivity.is_online();
            for interceptor in &self.interceptors {
                interceptor.intercept_network(is_online, &mut CancellableRequest::new(&mut request));
                if request.is_cancelled() {
                    break;
                }
            }
        }

        if !request.is_cancelled() {
            let id = request.id();
            for interceptor in &self.interceptors {
                interceptor.intercept_request(id, &mut CancellableRequest::new(&mut request));
                if request.is_cancelled() {
                    break;
                }
            }
        }

        if let Some(cancellation) = request.take_cancellation() {
            tracing::debug!(
                target: crate::targets::INTERCEPTOR,
                id = %request.id(),
                "request cancelled before sending"
            );
            self.deliver_cancellation(&request, cancellation);
            return;
        }

        if let Some(response) = self.cached_response(&request) {
            self.deliver_response(&request, &response);
            return;
        }

        self.retry
            .track(request.id(), request.method(), request.url());
        self.submit(request);
    }

    fn submit(self: &Arc<Self>, request: Request) {
        let item = QueuedRequest {
            request,
            handler: self.clone(),
        };
        if let Err(rejected) = self.queue.enqueue(item) {
            let request = rejected.request;
            tracing::warn!(
                target: crate::targets::QUEUE,
                id = %request.id(),
                "queue is shut down, failing request"
            );
            self.retry.forget(request.id());
            self.deliver_failure(&request, NetworkError::Shutdown.into());
        }
    }

    fn cached_response(&self, request: &Request) -> Option<Response> {
        let threshold = request.cache_config().stale_threshold()?;
        let key = CacheKey::for_request(request);
        if self.cache.is_stale(&key, threshold) {
            return None;
        }

        match self.cache.get_cached_data(&key) {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::warn!(
                    target: crate::targets::CACHE,
                    url = %key.url,
                    error = %err,
                    "unreadable cache entry, falling back to network"
                );
                None
            }
        }
    }

    fn store_in_cache(&self, request: &Request, response: &Response) {
        if !request.cache_config().is_enabled() {
            return;
        }
        self.cache_writer.submit(
            CacheKey::for_request(request),
            response.data().clone(),
            request.cache_config().is_encrypted(),
        );
    }

    fn observe(&self, outcome: Result<&Response, &CallError>, request: &Request) {
        for interceptor in &self.interceptors {
            interceptor.intercept_response(outcome, request);
        }
    }

    fn deliver_response(&self, request: &Request, response: &Response) -> bool {
        request
            .completion()
            .resolve_response(response, &mut |outcome: Result<&Response, &CallError>| {
                self.observe(outcome, request)
            })
    }

    fn deliver_failure(&self, request: &Request, error: CallError) -> bool {
        request
            .completion()
            .resolve_failure(error, &mut |outcome: Result<&Response, &CallError>| {
                self.observe(outcome, request)
            })
    }

    fn deliver_cancellation(&self, request: &Request, cancellation: Cancellation) {
        self.retry.forget(request.id());
        let completion = request.completion();
        let delivered = match cancellation {
            Cancellation::Respond(response) => {
                completion.resolve_response(&response, &mut |_: Result<&Response, &CallError>| {})
            }
            Cancellation::Fail(error) => {
                completion.resolve_failure(error, &mut |_: Result<&Response, &CallError>| {})
            }
        };
        if !delivered {
            tracing::trace!(
                target: crate::targets::INTERCEPTOR,
                id = %request.id(),
                "cancellation after delivery ignored"
            );
        }
    }

    fn handle_failure(self: &Arc<Self>, mut request: Request, error: CallError) {
        let id = request.id();
        let retryable = self.retry.is_retryable(&error);
        let attempts = if retryable {
            self.retry.record_attempt(id)
        } else {
            0
        };

        tracing::debug!(
            target: crate::targets::RETRY,
            id = %id,
            code = error.code,
            retryable,
            attempts,
            error = %error,
            "attempt failed"
        );

        for interceptor in &self.interceptors {
            interceptor.intercept_error(&error, &mut RetryableRequest::new(&mut request), attempts);
            if request.is_cancelled() {
                break;
            }
        }

        if let Some(cancellation) = request.take_cancellation() {
            self.deliver_cancellation(&request, cancellation);
            return;
        }

        let forced = request.take_retrying();
        match self.retry.decide(retryable, attempts, forced) {
            RetryDecision::Resubmit => {
                tracing::debug!(
                    target: crate::targets::RETRY,
                    id = %id,
                    attempts,
                    forced,
                    "resubmitting"
                );
                self.submit(request);
            }
            RetryDecision::Deliver => {
                self.retry.forget(id);
                self.deliver_failure(&request, error);
            }
        }
    }
}

impl RequestHandler for Dispatcher {
    fn handle(self: Arc<Self>, request: Request) {
        let id = request.id();
        if request.completion().is_resolved() {
            tracing::trace!(target: crate::targets::QUEUE, id = %id, "call already resolved, skipping");
            self.retry.forget(id);
            return;
        }

        match self.transport.execute(&request) {
            Ok(response) => {
                let delivered = self.deliver_response(&request, &response);
                self.retry.forget(id);
                if delivered {
                    self.store_in_cache(&request, &response);
                }
            }
            Err(err) => self.handle_failure(request, err.into()),
        }
    }

    fn abandon(&self, request: &Request) {
        self.retry.forget(request.id());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use http::HeaderMap;
    use parking_lot::Mutex;

    use super::*;
    use crate::cache::{CacheConfig, CacheError, CacheStore, CachedData, MemoryCacheStore};
    use crate::connectivity::StaticProbe;
    use crate::crypto::Cipher;
    use crate::delivery::{Completion, Delivery, PendingCall};
    use crate::request::HttpMethod;
    use crate::result::{CallResult, codes};
    use crate::retry::RetryCount;

    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<crate::error::Result<Response>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<crate::error::Result<Response>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, _request: &Request) -> crate::error::Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or(Err(NetworkError::Connection("refused".into())))
        }
    }

    #[derive(Default)]
    struct Recorder {
        errors: AtomicU32,
        last_attempts: AtomicU32,
        responses: AtomicU32,
        retry_on_error: bool,
    }

    impl Interceptor for Recorder {
        fn intercept_error(&self, _error: &CallError, request: &mut RetryableRequest<'_>, attempts: u32) {
            self.errors.fetch_add(1, Ordering::SeqCst);
            self.last_attempts.store(attempts, Ordering::SeqCst);
            if self.retry_on_error && attempts == 0 && self.errors.load(Ordering::SeqCst) == 1 {
                request.retry();
            }
        }

        fn intercept_response(&self, _result: Result<&Response, &CallError>, _request: &Request) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CancelOnRequest;

    impl Interceptor for CancelOnRequest {
        fn intercept_request(&self, _id: crate::request::RequestId, request: &mut CancellableRequest<'_>) {
            request.cancel(Cancellation::respond_with("from interceptor"));
        }
    }

    fn dispatcher(
        transport: Arc<dyn Transport>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        retry: RetryController,
    ) -> Arc<Dispatcher> {
        engine(
            transport,
            interceptors,
            retry,
            Arc::new(EncryptedCache::in_memory()),
            Arc::new(StaticProbe::new(true)),
        )
    }

    fn engine(
        transport: Arc<dyn Transport>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        retry: RetryController,
        cache: Arc<EncryptedCache>,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            transport,
            interceptors,
            retry,
            cache_writer: CacheWriter::spawn(cache.clone()).unwrap(),
            cache,
            queue: RequestQueue::with_workers("dispatch-test", 1),
            connectivity,
        })
    }

    fn text_call(url: &str, cache: CacheConfig) -> (Request, PendingCall<String>) {
        let (delivery, pending) = Delivery::channel(Box::new(|response: &Response| {
            response.text().map_err(CallError::from)
        }));
        let completion: Arc<dyn Completion> = Arc::new(delivery);
        let request = Request::new(
            HttpMethod::Get,
            url.to_string(),
            HeaderMap::new(),
            None,
            cache,
            completion,
        );
        (request, pending)
    }

    #[test]
    fn success_is_delivered_and_observed() {
        let transport = ScriptedTransport::new(vec![Ok(Response::synthesized("hello"))]);
        let recorder = Arc::new(Recorder::default());
        let engine = dispatcher(transport, vec![recorder.clone()], RetryController::disabled());

        let (request, pending) = text_call("http://local/ok", CacheConfig::Disabled);
        engine.send_request(request);

        let result = pending.blocking_wait();
        assert_eq!(result.value().map(String::as_str), Some("hello"));
        assert_eq!(recorder.responses.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn retry_budget_is_honored() {
        let transport = ScriptedTransport::new(Vec::new());
        let recorder = Arc::new(Recorder::default());
        let engine = dispatcher(
            transport.clone(),
            vec![recorder.clone()],
            RetryController::new(true, RetryCount::Twice),
        );

        let (request, pending) = text_call("http://local/down", CacheConfig::Disabled);
        let id = request.id();
        engine.send_request(request);

        let result = pending.blocking_wait();
        assert_eq!(result.error().map(|e| e.code), Some(codes::CONNECTION_ERROR_CODE));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.last_attempts.load(Ordering::SeqCst), 3);
        assert!(!engine.retry.is_tracking(id));
    }

    #[test]
    fn status_faults_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(NetworkError::HttpStatus {
            status: 404,
            message: Some("missing".into()),
        })]);
        let recorder = Arc::new(Recorder::default());
        let engine = dispatcher(
            transport.clone(),
            vec![recorder.clone()],
            RetryController::new(true, RetryCount::Max),
        );

        let (request, pending) = text_call("http://local/missing", CacheConfig::Disabled);
        engine.send_request(request);

        let result = pending.blocking_wait();
        let error = result.error().cloned().unwrap();
        assert_eq!((error.code, error.message.as_str()), (404, "missing"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.last_attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn interceptor_retry_resubmits_once() {
        let transport = ScriptedTransport::new(vec![
            Err(NetworkError::HttpStatus {
                status: 401,
                message: None,
            }),
            Ok(Response::synthesized("second try")),
        ]);
        let first = Arc::new(Recorder {
            retry_on_error: true,
            ..Recorder::default()
        });
        let second = Arc::new(Recorder {
            retry_on_error: true,
            ..Recorder::default()
        });
        let engine = dispatcher(
            transport.clone(),
            vec![first.clone(), second.clone()],
            RetryController::disabled(),
        );

        let (request, pending) = text_call("http://local/auth", CacheConfig::Disabled);
        engine.send_request(request);

        let result = pending.blocking_wait();
        assert_eq!(result.value().map(String::as_str), Some("second try"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancellation_skips_transport_and_response_hooks() {
        let transport = ScriptedTransport::new(vec![Ok(Response::synthesized("network"))]);
        let recorder = Arc::new(Recorder::default());
        let engine = dispatcher(
            transport.clone(),
            vec![Arc::new(CancelOnRequest), recorder.clone()],
            RetryController::disabled(),
        );

        let (request, pending) = text_call("http://local/cancel", CacheConfig::Disabled);
        engine.send_request(request);

        let result = pending.blocking_wait();
        assert_eq!(result.value().map(String::as_str), Some("from interceptor"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.responses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fresh_cache_entry_avoids_the_network() {
        let transport = ScriptedTransport::new(vec![Ok(Response::synthesized("network"))]);
        let engine = dispatcher(transport.clone(), Vec::new(), RetryController::disabled());
        let cache = CacheConfig::enabled().with_stale_threshold(Duration::from_secs(60));

        let key = CacheKey::new("http://local/cached", None);
        engine
            .cache
            .cache_request_result(b"from cache", &key, false)
            .unwrap();

        let (request, pending) = text_call("http://local/cached", cache);
        engine.send_request(request);

        let result = pending.blocking_wait();
        assert_eq!(result.value().map(String::as_str), Some("from cache"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn successful_response_is_cached() {
        let transport = ScriptedTransport::new(vec![Ok(Response::synthesized("fresh"))]);
        let engine = dispatcher(transport, Vec::new(), RetryController::disabled());

        let (request, pending) = text_call("http://local/store", CacheConfig::enabled().encrypted());
        engine.send_request(request);
        assert!(pending.blocking_wait().is_success());

        // The write lands after delivery.
        let key = CacheKey::new("http://local/store", None);
        for _ in 0..200 {
            if !engine.cache.is_stale(&key, Duration::from_secs(60)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let cached = engine.cache.get_cached_data(&key).unwrap();
        assert_eq!(cached.data().as_ref(), b"fresh");
    }

    struct CountingProbe(AtomicU32);

    impl ConnectivityProbe for CountingProbe {
        fn is_online(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn connectivity_is_probed_only_when_hooks_listen() {
        let probe = Arc::new(CountingProbe(AtomicU32::new(0)));

        let quiet = engine(
            ScriptedTransport::new(vec![Ok(Response::synthesized("a"))]),
            Vec::new(),
            RetryController::disabled(),
            Arc::new(EncryptedCache::in_memory()),
            probe.clone(),
        );
        let (request, pending) = text_call("http://local/quiet", CacheConfig::Disabled);
        quiet.send_request(request);
        assert!(pending.blocking_wait().is_success());
        assert_eq!(probe.0.load(Ordering::SeqCst), 0);

        let watched = engine(
            ScriptedTransport::new(vec![Ok(Response::synthesized("b"))]),
            vec![Arc::new(Recorder::default())],
            RetryController::disabled(),
            Arc::new(EncryptedCache::in_memory()),
            probe.clone(),
        );
        let (request, pending) = text_call("http://local/watched", CacheConfig::Disabled);
        watched.send_request(request);
        assert!(pending.blocking_wait().is_success());
        assert_eq!(probe.0.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct SlowStore {
        inner: MemoryCacheStore,
    }

    impl CacheStore for SlowStore {
        fn get(&self, url: &str, body_hash: &str) -> Result<Option<CachedData>, CacheError> {
            self.inner.get(url, body_hash)
        }

        fn get_by_iv(&self, iv: &str) -> Result<Vec<CachedData>, CacheError> {
            self.inner.get_by_iv(iv)
        }

        fn delete(&self, url: &str, body_hash: &str) -> Result<(), CacheError> {
            self.inner.delete(url, body_hash)
        }

        fn insert(&self, row: CachedData) -> Result<(), CacheError> {
            std::thread::sleep(Duration::from_secs(1));
            self.inner.insert(row)
        }

        fn clear(&self) -> Result<(), CacheError> {
            self.inner.clear()
        }
    }

    #[test]
    fn slow_cache_writes_do_not_hold_the_dispatcher() {
        let transport = ScriptedTransport::new(vec![
            Ok(Response::synthesized("one")),
            Ok(Response::synthesized("two")),
        ]);
        let cache = Arc::new(EncryptedCache::new(
            Arc::new(SlowStore::default()),
            Cipher::in_memory(),
        ));
        let engine = engine(
            transport,
            Vec::new(),
            RetryController::disabled(),
            cache,
            Arc::new(StaticProbe::new(true)),
        );

        let started = Instant::now();
        for url in ["http://local/one", "http://local/two"] {
            let (request, pending) = text_call(url, CacheConfig::enabled());
            engine.send_request(request);
            assert!(pending.blocking_wait().is_success());
        }
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[test]
    fn abandoned_request_is_no_longer_tracked() {
        let engine = dispatcher(
            ScriptedTransport::new(Vec::new()),
            Vec::new(),
            RetryController::new(true, RetryCount::Once),
        );
        let (request, _pending) = text_call("http://local/dropped", CacheConfig::Disabled);
        engine.retry.track(request.id(), request.method(), request.url());
        assert!(engine.retry.is_tracking(request.id()));

        engine.abandon(&request);
        assert!(!engine.retry.is_tracking(request.id()));
    }

    #[test]
    fn shut_down_queue_fails_the_call() {
        let transport = ScriptedTransport::new(Vec::new());
        let engine = dispatcher(transport, Vec::new(), RetryController::disabled());
        engine.queue.shutdown();

        let (request, pending) = text_call("http://local/late", CacheConfig::Disabled);
        engine.send_request(request);

        let result: CallResult<String> = pending.blocking_wait();
        assert!(matches!(
            result.error().and_then(|e| e.cause.clone()),
            Some(NetworkError::Shutdown)
        ));
    }
}
