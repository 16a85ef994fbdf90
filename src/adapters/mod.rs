//! Local cache storage
//!
//! The local store is a cache of server state, not the source of truth.
//! Implementations must reflect writes in the very next read
//! (read-your-writes) because reconciliation interleaves both.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{FolderKey, Message, Result, SequenceId};

pub use memory::{MemoryRemote, MemoryStore};
pub use sqlite::SqliteStore;

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Cached message with the highest id in the folder.
    async fn latest_message(&self, folder: &FolderKey) -> Result<Option<Message>>;

    /// Cached message with the lowest assigned id in the folder.
    async fn earliest_message(&self, folder: &FolderKey) -> Result<Option<Message>>;

    /// All cached messages with ids in `[min, max_exclusive)`, in any order.
    async fn messages_in_range(
        &self,
        folder: &FolderKey,
        min: SequenceId,
        max_exclusive: SequenceId,
    ) -> Result<Vec<Message>>;

    /// Insert messages, replacing any cached copy with the same id.
    async fn apply_adds(&self, messages: &[Message]) -> Result<()>;

    /// Overwrite `is_read`/`is_flagged` of existing messages.
    async fn apply_updates(&self, messages: &[Message]) -> Result<()>;

    async fn apply_deletes(&self, messages: &[Message]) -> Result<()>;
}
