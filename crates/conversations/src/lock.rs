//! Per-conversation write serialization.
//!
//! Merging is read-modify-write, so no two merges may run concurrently
//! against the same stored conversation. Each conversation id maps to a
//! `Semaphore(1)`; holding the permit is holding the write lock. No
//! ordering is implied across different conversations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ConversationLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for ConversationLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the write lock for a conversation, waiting if another
    /// merge holds it. The permit releases on drop.
    pub async fn acquire(&self, conversation_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(conversation_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        // The semaphore is never closed, so acquisition only ever waits.
        match sem.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("conversation lock semaphore is never closed"),
        }
    }

    /// Number of tracked conversations (for monitoring).
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop locks nobody currently holds.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
