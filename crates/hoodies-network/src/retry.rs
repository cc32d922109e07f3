//! Automatic retry of connection-level failures.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::request::{HttpMethod, RequestId};
use crate::result::CallError;

/// How many automatic retries a client makes for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RetryCount {
    /// Never retry.
    #[default]
    Never,
    /// Retry once.
    Once,
    /// Retry twice.
    Twice,
    /// Retry three times.
    Thrice,
    /// Retry five times.
    Max,
}

impl RetryCount {
    /// The number of retries this level allows.
    pub fn attempts(self) -> u32 {
        match self {
            Self::Never => 0,
            Self::Once => 1,
            Self::Twice => 2,
            Self::Thrice => 3,
            Self::Max => 5,
        }
    }
}

/// What the engine does with a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// Queue the same request again.
    Resubmit,
    /// Deliver the failure to the caller.
    Deliver,
}

#[derive(Debug)]
struct RetryState {
    attempts: u32,
    method: HttpMethod,
    url: String,
}

/// Counts attempts per call and decides whether to resubmit.
///
/// Shared by every dispatcher thread of a client.
#[derive(Debug)]
pub struct RetryController {
    enabled: bool,
    max_attempts: u32,
    states: Mutex<HashMap<RequestId, RetryState>>,
}

impl RetryController {
    /// Create a controller.
    ///
    /// With `enabled == false` no failure is ever retried automatically.
    pub fn new(enabled: bool, count: RetryCount) -> Self {
        Self {
            enabled,
            max_attempts: count.attempts(),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// A controller that never retries.
    pub fn disabled() -> Self {
        Self::new(false, RetryCount::Never)
    }

    /// Whether retry on connection failure is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured retry budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `error` is eligible for automatic retry.
    pub fn is_retryable(&self, error: &CallError) -> bool {
        self.enabled && error.is_transport_fault()
    }

    /// Start tracking a call. Does nothing if it is already tracked.
    pub(crate) fn track(&self, id: RequestId, method: HttpMethod, url: &str) {
        self.states.lock().entry(id).or_insert_with(|| RetryState {
            attempts: 0,
            method,
            url: url.to_string(),
        });
    }

    /// Count one more failed attempt and return the new total.
    pub(crate) fn record_attempt(&self, id: RequestId) -> u32 {
        let mut states = self.states.lock();
        let state = states.entry(id).or_insert_with(|| RetryState {
            attempts: 0,
            method: HttpMethod::Get,
            url: String::new(),
        });
        state.attempts += 1;
        tracing::debug!(
            target: crate::targets::RETRY,
            id = %id,
            method = %state.method,
            url = %state.url,
            attempts = state.attempts,
            "recorded failed attempt"
        );
        state.attempts
    }

    /// Attempts recorded so far for a call.
    pub fn attempts(&self, id: RequestId) -> u32 {
        self.states.lock().get(&id).map_or(0, |state| state.attempts)
    }

    /// Whether a call is being tracked.
    pub fn is_tracking(&self, id: RequestId) -> bool {
        self.states.lock().contains_key(&id)
    }

    /// Stop tracking a call.
    pub(crate) fn forget(&self, id: RequestId) {
        self.states.lock().remove(&id);
    }

    /// Decide what to do after the error hooks have run.
    ///
    /// An interceptor retry always wins. Otherwise a retryable failure is
    /// resubmitted while the attempt count stays within the budget.
    pub(crate) fn decide(
        &self,
        retryable: bool,
        attempts: u32,
        interceptor_retry: bool,
    ) -> RetryDecision {
        if interceptor_retry {
            return RetryDecision::Resubmit;
        }
        if retryable && self.max_attempts > 0 && attempts <= self.max_attempts {
            RetryDecision::Resubmit
        } else {
            RetryDecision::Deliver
        }
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::disabled()
    }
}
