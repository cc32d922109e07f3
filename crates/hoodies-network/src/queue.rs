//! The request queue and its dispatcher threads.
//!
//! A queue is an unbounded FIFO drained by a fixed number of named worker
//! threads. Workers are spawned lazily, the first time something is
//! enqueued, and run until the queue is shut down or every handle to it is
//! dropped.
//!
//! ```ignore
//! use hoodies_network::{HoodiesNetworkClient, RequestQueue};
//!
//! // One pool shared by two clients.
//! let queue = RequestQueue::with_workers("api", 8);
//! let a = HoodiesNetworkClient::builder().request_queue(queue.clone()).build()?;
//! let b = HoodiesNetworkClient::builder().request_queue(queue).build()?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;

use crate::error::Result;
use crate::request::Request;

/// Default number of dispatcher threads.
pub const DEFAULT_WORKER_COUNT: usize = 4;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs a dequeued request on a dispatcher thread.
pub(crate) trait RequestHandler: Send + Sync {
    fn handle(self: Arc<Self>, request: Request);

    /// Called for a request that leaves the queue without being handled.
    fn abandon(&self, _request: &Request) {}
}

/// A request waiting in the queue, paired with the engine that runs it.
pub(crate) struct QueuedRequest {
    pub(crate) request: Request,
    pub(crate) handler: Arc<dyn RequestHandler>,
}

enum QueueMessage {
    Execute(QueuedRequest),
    Shutdown,
}

struct QueueInner {
    name: String,
    worker_count: usize,
    sender: Sender<QueueMessage>,
    receiver: Receiver<QueueMessage>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueInner {
    fn ensure_started(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }

        for index in 0..self.worker_count {
            let receiver = self.receiver.clone();
            let running = self.running.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-dispatcher-{index}", self.name))
                .spawn(move || dispatcher_loop(receiver, running))?;
            workers.push(handle);
        }

        tracing::debug!(
            target: crate::targets::QUEUE,
            queue = %self.name,
            workers = self.worker_count,
            "started dispatcher threads"
        );
        Ok(())
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut abandoned = 0usize;
        for message in self.receiver.try_iter() {
            if let QueueMessage::Execute(item) = message {
                item.handler.abandon(&item.request);
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            tracing::debug!(
                target: crate::targets::QUEUE,
                queue = %self.name,
                abandoned,
                "dropped queued requests at shutdown"
            );
        }
        for _ in 0..self.workers.lock().len() {
            let _ = self.sender.send(QueueMessage::Shutdown);
        }
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.stop();
        // Don't block in drop; workers exit on their own.
    }
}

/// A thread-safe, unbounded FIFO of requests and the pool that drains it.
///
/// Cloning a queue yields another handle to the same pool.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Create a queue with [`DEFAULT_WORKER_COUNT`] workers.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_workers(name, DEFAULT_WORKER_COUNT)
    }

    /// Create a queue with `worker_count` workers (at least one).
    pub fn with_workers(name: impl Into<String>, worker_count: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                worker_count: worker_count.max(1),
                sender,
                receiver,
                running: Arc::new(AtomicBool::new(true)),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The process-wide default queue.
    pub fn shared() -> Self {
        static DEFAULT: OnceLock<RequestQueue> = OnceLock::new();
        DEFAULT
            .get_or_init(|| RequestQueue::new("hoodies-network"))
            .clone()
    }

    /// The process-wide queue registered under `key`.
    ///
    /// Useful for giving each host or credential set its own pool.
    pub fn shared_for(key: &str) -> Self {
        static KEYED: OnceLock<Mutex<HashMap<String, RequestQueue>>> = OnceLock::new();
        KEYED
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| RequestQueue::new(key))
            .clone()
    }

    /// Queue name, used for thread names and logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of dispatcher threads.
    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    /// Whether the queue accepts requests.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Number of requests waiting for a dispatcher.
    pub fn len(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Whether no request is waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.receiver.is_empty()
    }

    /// Append a request, starting the workers on first use.
    ///
    /// Hands the item back if the queue has been shut down.
    pub(crate) fn enqueue(&self, item: QueuedRequest) -> std::result::Result<(), QueuedRequest> {
        if !self.is_running() {
            return Err(item);
        }
        if let Err(err) = self.inner.ensure_started() {
            tracing::error!(
                target: crate::targets::QUEUE,
                queue = %self.inner.name,
                error = %err,
                "failed to start dispatcher threads"
            );
            return Err(item);
        }

        tracing::trace!(
            target: crate::targets::QUEUE,
            id = %item.request.id(),
            url = %item.request.url(),
            "enqueued"
        );
        if let Err(err) = self.inner.sender.send(QueueMessage::Execute(item)) {
            if let QueueMessage::Execute(item) = err.into_inner() {
                return Err(item);
            }
        }
        Ok(())
    }

    /// Remove the request at the head of the queue without blocking.
    ///
    /// Diagnostic only: the removed request is never executed and its call
    /// resolves as undeliverable.
    pub fn dequeue(&self) -> Option<Request> {
        match self.inner.receiver.try_recv().ok()? {
            QueueMessage::Execute(item) => {
                item.handler.abandon(&item.request);
                Some(item.request)
            }
            QueueMessage::Shutdown => {
                // Put the marker back for the workers.
                let _ = self.inner.sender.send(QueueMessage::Shutdown);
                None
            }
        }
    }

    /// Stop accepting requests and tell every worker to exit.
    ///
    /// Requests still queued are abandoned; the one a worker is executing
    /// runs to completion.
    pub fn shutdown(&self) {
        tracing::debug!(target: crate::targets::QUEUE, queue = %self.inner.name, "shutting down");
        self.inner.stop();
    }

    /// Wait for every worker to exit. Call [`shutdown`](Self::shutdown) first.
    ///
    /// Returns `false` if a worker panicked.
    pub fn join(&self) -> bool {
        let handles: Vec<_> = self.inner.workers.lock().drain(..).collect();
        handles.into_iter().all(|h| h.join().is_ok())
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("name", &self.inner.name)
            .field("worker_count", &self.inner.worker_count)
            .field("pending", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

fn dispatcher_loop(receiver: Receiver<QueueMessage>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(QueueMessage::Execute(item)) => {
                if !running.load(Ordering::Acquire) {
                    item.handler.abandon(&item.request);
                    break;
                }
                item.handler.handle(item.request);
            }
            Ok(QueueMessage::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::trace!(target: crate::targets::QUEUE, "dispatcher thread exiting");
}
