//! Process-wide state
//!
//! Owned by the embedding application and passed around explicitly; nothing
//! here is a global.

mod sync_manager;

pub use sync_manager::SyncManager;
