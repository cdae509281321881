mod memory;
mod sqlite;

pub use memory::MemoryMessageStore;
pub use sqlite::SqliteMessageStore;

use anyhow::Result;
use std::sync::Arc;
use unibox_core::store::MessageStore;

/// Open the store named by `database.url`: `memory` for the in-process
/// store, anything else is handed to sqlx as a SQLite URL.
pub async fn open_store(url: &str) -> Result<Arc<dyn MessageStore>> {
    if url == "memory" {
        return Ok(Arc::new(MemoryMessageStore::new()));
    }
    Ok(Arc::new(SqliteMessageStore::new(url).await?))
}
