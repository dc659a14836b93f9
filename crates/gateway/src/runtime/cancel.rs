//! Per-request cancellation tokens.
//!
//! Each running request registers a `CancelToken`. Cancelling it signals
//! the agent loop to stop cleanly: the in-flight provider stream is
//! dropped (aborting the upstream call), pending tool executions are
//! abandoned, and a terminal marker still reaches the output stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A cancellation token the runtime both polls and awaits.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // notify_one stores a permit, so a waiter registering after this
        // call still wakes immediately.
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once cancellation is requested. Used in `select!` against
    /// provider streams and tool fan-in so a cancel interrupts waits
    /// instead of riding on the next event.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

/// Active cancellation tokens keyed by request id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a token for a request.
    pub fn register(&self, request_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(request_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running request. Returns whether a token was found.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.tokens.lock().get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when the request completes.
    pub fn remove(&self, request_id: &str) {
        self.tokens.lock().remove(request_id);
    }

    /// Whether a request is still running.
    pub fn is_running(&self, request_id: &str) -> bool {
        self.tokens.lock().contains_key(request_id)
    }
}
