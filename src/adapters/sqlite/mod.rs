//! SQLite-backed local cache

pub mod messages;
pub mod pool;
pub mod schema;

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use super::LocalStore;
use crate::types::{FolderKey, Message, Result, SequenceId};

pub use pool::DbPool;

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("Opening message cache at {:?}", db_path);
        let pool = pool::create_pool(db_path)?;
        schema::initialize_schema(&*pool.get()?)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn latest_message(&self, folder: &FolderKey) -> Result<Option<Message>> {
        messages::get_latest(&self.pool, folder)
    }

    async fn earliest_message(&self, folder: &FolderKey) -> Result<Option<Message>> {
        messages::get_earliest(&self.pool, folder)
    }

    async fn messages_in_range(
        &self,
        folder: &FolderKey,
        min: SequenceId,
        max_exclusive: SequenceId,
    ) -> Result<Vec<Message>> {
        messages::get_in_range(&self.pool, folder, min, max_exclusive)
    }

    async fn apply_adds(&self, batch: &[Message]) -> Result<()> {
        let count = messages::upsert_messages(&self.pool, batch)?;
        debug!("Cached {} messages", count);
        Ok(())
    }

    async fn apply_updates(&self, batch: &[Message]) -> Result<()> {
        let count = messages::update_flags_batch(&self.pool, batch)?;
        debug!("Updated flags on {} messages", count);
        Ok(())
    }

    async fn apply_deletes(&self, batch: &[Message]) -> Result<()> {
        let count = messages::delete_messages(&self.pool, batch)?;
        debug!("Removed {} messages", count);
        Ok(())
    }
}
