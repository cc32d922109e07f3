//! Exactly-once result delivery.
//!
//! Every logical call owns a single-resolution continuation. Worker threads,
//! cache hits and cancelling interceptors all funnel through the same resolve
//! operation; whichever arrives first wins and every later attempt is a no-op.

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::NetworkError;
use crate::response::Response;
use crate::result::{CallError, CallResult};

/// Receives the outcome just before it is handed to the caller.
pub(crate) type Observer<'a> = &'a mut dyn FnMut(Result<&Response, &CallError>);

/// Turns a raw response into the call's declared result type.
pub(crate) type Parser<T> = Box<dyn Fn(&Response) -> Result<T, CallError> + Send + Sync>;

/// Type-erased view of a call's continuation.
pub(crate) trait Completion: Send + Sync {
    /// Whether the call has been resolved or its caller has gone away.
    fn is_resolved(&self) -> bool;

    /// Parse `response` and resolve the call with it.
    ///
    /// Returns `false` when the call had already been resolved, in which
    /// case neither the parser nor `observe` run.
    fn resolve_response(&self, response: &Response, observe: Observer<'_>) -> bool;

    /// Resolve the call with a failure.
    fn resolve_failure(&self, error: CallError, observe: Observer<'_>) -> bool;
}

/// The typed continuation behind a [`PendingCall`].
pub(crate) struct Delivery<T> {
    parser: Parser<T>,
    sender: Mutex<Option<oneshot::Sender<CallResult<T>>>>,
}

impl<T: Send + 'static> Delivery<T> {
    /// Create a continuation and the handle its caller awaits.
    pub(crate) fn channel(parser: Parser<T>) -> (Self, PendingCall<T>) {
        let (tx, rx) = oneshot::channel();
        let delivery = Self {
            parser,
            sender: Mutex::new(Some(tx)),
        };
        (delivery, PendingCall { receiver: rx })
    }

    fn take_sender(&self) -> Option<oneshot::Sender<CallResult<T>>> {
        self.sender.lock().take()
    }
}

impl<T: Send + 'static> Completion for Delivery<T> {
    fn is_resolved(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_none_or(oneshot::Sender::is_closed)
    }

    fn resolve_response(&self, response: &Response, observe: Observer<'_>) -> bool {
        let Some(sender) = self.take_sender() else {
            return false;
        };

        let result = match (self.parser)(response) {
            Ok(value) => {
                observe(Ok(response));
                CallResult::Success {
                    value,
                    headers: response.headers().to_vec(),
                    url: response.url().map(str::to_string),
                }
            }
            Err(error) => {
                observe(Err(&error));
                CallResult::Failure(error)
            }
        };

        // The caller may have dropped its future; that is not an error here.
        let _ = sender.send(result);
        true
    }

    fn resolve_failure(&self, error: CallError, observe: Observer<'_>) -> bool {
        let Some(sender) = self.take_sender() else {
            return false;
        };

        observe(Err(&error));
        let _ = sender.send(CallResult::Failure(error));
        true
    }
}

/// A submitted call whose result has not been awaited yet.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall<T> {
    receiver: oneshot::Receiver<CallResult<T>>,
}

impl<T> PendingCall<T> {
    /// Wait for the call to resolve.
    pub async fn wait(self) -> CallResult<T> {
        self.receiver.await.unwrap_or_else(|_| abandoned())
    }

    /// Block the current thread until the call resolves.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_wait(self) -> CallResult<T> {
        self.receiver.blocking_recv().unwrap_or_else(|_| abandoned())
    }
}

fn abandoned<T>() -> CallResult<T> {
    tracing::error!(
        target: crate::targets::QUEUE,
        "call was dropped by the engine before it resolved"
    );
    CallResult::Failure(
        NetworkError::Delivery("call was dropped before it resolved".to_string()).into(),
    )
}
