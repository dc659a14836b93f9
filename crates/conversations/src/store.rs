//! Conversation persistence.
//!
//! The core consumes only the [`ConversationStore`] contract; the
//! engine behind it is replaceable. Shipped implementations: a JSON-file
//! store (snapshot map, atomic temp-file-and-rename writes) and an
//! in-memory store for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use cg_domain::conversation::Conversation;
use cg_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consumed contract of the conversation storage collaborator.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Conversation>>;
    async fn save(&self, conversation: &Conversation) -> Result<()>;
}

/// Persist with a small bounded number of retries on transient errors
/// (connection resets and friends). Hard failures surface immediately;
/// model calls are never retried this way.
pub async fn save_with_retry(
    store: &dyn ConversationStore,
    conversation: &Conversation,
    max_retries: u32,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match store.save(conversation).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    conversation = %conversation.id,
                    attempt,
                    error = %e,
                    "transient save failure, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON-file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-backed store: the full map lives in memory and every save
/// snapshots it to `conversations.json` via a temp file + rename, so a
/// crash mid-write never corrupts the previous snapshot.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl JsonFileStore {
    /// Load or create the store at `state_path/conversations.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("conversations.json");

        let conversations = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Storage(format!("corrupt conversation snapshot: {e}")))?
        } else {
            HashMap::new()
        };

        tracing::info!(
            conversations = conversations.len(),
            path = %path.display(),
            "conversation store loaded"
        );

        Ok(Self {
            path,
            conversations: RwLock::new(conversations),
        })
    }

    fn persist_snapshot(&self) -> Result<()> {
        let snapshot = {
            let map = self.conversations.read();
            serde_json::to_string_pretty(&*map)?
        };

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, snapshot).map_err(classify_io)?;
        std::fs::rename(&tmp, &self.path).map_err(classify_io)?;
        Ok(())
    }
}

/// Interrupted and reset-style IO errors are worth a retry; everything
/// else is a hard storage failure.
fn classify_io(e: std::io::Error) -> Error {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::ConnectionReset | ErrorKind::WouldBlock => {
            Error::StorageUnavailable(e.to_string())
        }
        _ => Error::Storage(e.to_string()),
    }
}

#[async_trait::async_trait]
impl ConversationStore for JsonFileStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation.clone());
        self.persist_snapshot()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map-backed store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::conversation::Message;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            name: "test".into(),
            model: "gpt-4o-mini".into(),
            system_prompt: String::new(),
            temperature: 0.4,
            user_id: "u1".into(),
            course_name: "CS101".into(),
            folder_id: None,
            messages: vec![Message::user("hello").with_id("m1")],
        }
    }

    #[tokio::test]
    async fn file_store_roundtrip_survives_reload() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = JsonFileStore::new(dir.path()).unwrap();
            store.save(&conversation("c1")).await.unwrap();
        }

        // Reopen from disk.
        let store = JsonFileStore::new(dir.path()).unwrap();
        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].id, "m1");
    }

    #[tokio::test]
    async fn missing_conversation_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        assert!(store.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conversations.json"), "{not json").unwrap();
        let err = JsonFileStore::new(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    /// Fails with a transient error `failures` times, then succeeds.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ConversationStore for FlakyStore {
        async fn load(&self, id: &str) -> Result<Option<Conversation>> {
            self.inner.load(id).await
        }
        async fn save(&self, conversation: &Conversation) -> Result<()> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            })
            .is_ok()
            {
                return Err(Error::StorageUnavailable("connection reset".into()));
            }
            self.inner.save(conversation).await
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_bound() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(2),
        };
        save_with_retry(&store, &conversation("c1"), 2).await.unwrap();
        assert!(store.load("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retry_bound_is_hard() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(3),
        };
        let err = save_with_retry(&store, &conversation("c1"), 2).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(store.load("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hard_failures_are_not_retried() {
        struct BrokenStore;

        #[async_trait::async_trait]
        impl ConversationStore for BrokenStore {
            async fn load(&self, _id: &str) -> Result<Option<Conversation>> {
                Ok(None)
            }
            async fn save(&self, _conversation: &Conversation) -> Result<()> {
                Err(Error::Storage("disk full".into()))
            }
        }

        let err = save_with_retry(&BrokenStore, &conversation("c1"), 5).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
