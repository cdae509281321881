use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use unibox_core::error::StoreError;
use unibox_core::store::{InboxStats, InsertOutcome, MessageQuery, MessageStore};
use unibox_core::types::{InboxMessage, MessageStatus, PlatformType, Priority};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    by_id: HashMap<Uuid, InboxMessage>,
    by_key: HashMap<(PlatformType, String), Uuid>,
}

/// In-process store. The natural-key index is updated under the same write
/// lock as the row, so concurrent inserts of one event cannot both win.
#[derive(Default)]
pub struct MemoryMessageStore {
    inner: RwLock<Inner>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn get(&self, id: Uuid) -> Result<Option<InboxMessage>, StoreError> {
        Ok(self.inner.read().await.by_id.get(&id).cloned())
    }

    async fn get_by_platform_id(
        &self,
        platform: PlatformType,
        platform_id: &str,
    ) -> Result<Option<InboxMessage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_key
            .get(&(platform, platform_id.to_string()))
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn insert(&self, message: InboxMessage) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (message.platform_type, message.platform_id.clone());
        if inner.by_key.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.by_key.insert(key, message.id);
        inner.by_id.insert(message.id, message.clone());
        Ok(InsertOutcome::Inserted(message))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let message = inner.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if message.status != expected {
            return Ok(false);
        }
        message.status = next;
        Ok(true)
    }

    async fn update_priority(&self, id: Uuid, priority: Priority) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let message = inner.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        message.priority = priority;
        Ok(true)
    }

    async fn query(&self, query: &MessageQuery) -> Result<Vec<InboxMessage>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<InboxMessage> = inner
            .by_id
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.received_at
                .timestamp_millis()
                .cmp(&a.received_at.timestamp_millis())
                .then_with(|| b.id.cmp(&a.id))
        });
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn stats(&self, account_ids: &BTreeSet<String>) -> Result<InboxStats, StoreError> {
        let inner = self.inner.read().await;
        let mut stats = InboxStats::default();
        for message in inner.by_id.values() {
            if account_ids.is_empty() || account_ids.contains(&message.account_id) {
                stats.record(message.status, message.platform_type, 1);
            }
        }
        Ok(stats)
    }
}
