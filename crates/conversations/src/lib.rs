pub mod lock;
pub mod merge;
pub mod store;

pub use lock::ConversationLockMap;
pub use merge::merge;
pub use store::{save_with_retry, ConversationStore, JsonFileStore, MemoryStore};
