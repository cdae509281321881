use crate::reply::{ReplyDispatcher, ReplyReceipt};
use crate::sync::{SyncCoordinator, SyncReport};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use unibox_core::accounts::AccountScope;
use unibox_core::audit::audit_log;
use unibox_core::error::InboxError;
use unibox_core::store::{Cursor, InboxStats, MessageQuery, MessageStore};
use unibox_core::types::{InboxMessage, MessageStatus, MessageType, PlatformType, Priority};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
const BULK_CONCURRENCY: usize = 16;

/// Listing filter. Empty sets mean "any".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFilter {
    #[serde(default)]
    pub platforms: BTreeSet<PlatformType>,
    #[serde(default)]
    pub types: BTreeSet<MessageType>,
    #[serde(default)]
    pub statuses: BTreeSet<MessageStatus>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<InboxMessage>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResult {
    pub success_count: usize,
    pub failures: Vec<BulkFailure>,
}

/// Inbox operations over every platform. All calls carry an explicit scope;
/// messages of accounts outside it behave as if they did not exist.
pub struct InboxController {
    store: Arc<dyn MessageStore>,
    dispatcher: ReplyDispatcher,
    sync: SyncCoordinator,
}

impl InboxController {
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: ReplyDispatcher, sync: SyncCoordinator) -> Self {
        Self {
            store,
            dispatcher,
            sync,
        }
    }

    async fn scoped(&self, scope: &AccountScope, id: Uuid) -> Result<InboxMessage, InboxError> {
        self.store
            .get(id)
            .await?
            .filter(|m| scope.contains(&m.account_id))
            .ok_or(InboxError::OriginalMessageNotFound(id))
    }

    pub async fn get_message(&self, scope: &AccountScope, id: Uuid) -> Result<InboxMessage, InboxError> {
        self.scoped(scope, id).await
    }

    /// Newest first, keyset paginated. `page_size` is clamped to
    /// `1..=MAX_PAGE_SIZE`.
    pub async fn get_messages(
        &self,
        scope: &AccountScope,
        filter: &MessageFilter,
        page_size: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<MessagePage, InboxError> {
        let limit = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let after = match cursor.filter(|c| !c.is_empty()) {
            Some(token) => Some(Cursor::decode(token).ok_or(InboxError::InvalidCursor)?),
            None => None,
        };
        if scope.is_empty() {
            return Ok(MessagePage {
                messages: Vec::new(),
                next_cursor: None,
            });
        }

        let query = MessageQuery {
            account_ids: scope.account_ids.clone(),
            platforms: filter.platforms.clone(),
            types: filter.types.clone(),
            statuses: filter.statuses.clone(),
            since: filter.since,
            until: filter.until,
            after,
            limit: limit + 1,
        };
        let mut messages = self.store.query(&query).await?;
        let next_cursor = if messages.len() > limit {
            messages.truncate(limit);
            messages.last().map(|m| Cursor::after(m).encode())
        } else {
            None
        };
        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    async fn update_one(&self, scope: &AccountScope, id: Uuid, next: MessageStatus) -> Result<(), InboxError> {
        let message = self.scoped(scope, id).await?;
        // `replied` records a delivered reply and is only set by `reply`.
        if next == MessageStatus::Replied || !message.status.can_transition_to(next) {
            return Err(InboxError::InvalidTransition {
                from: message.status,
                to: next,
            });
        }
        if message.status == next {
            return Ok(());
        }
        if !self.store.update_status(id, message.status, next).await? {
            return Err(InboxError::InvalidTransition {
                from: message.status,
                to: next,
            });
        }
        audit_log(
            "status_changed",
            &message.account_id,
            json!({ "message_id": id, "from": message.status, "to": next }),
        );
        Ok(())
    }

    /// Apply `next` to every id independently. Failures are reported per id
    /// and never stop the others.
    pub async fn bulk_update_status(
        &self,
        scope: &AccountScope,
        ids: &[Uuid],
        next: MessageStatus,
    ) -> BulkUpdateResult {
        let unique: Vec<Uuid> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let outcomes: Vec<(Uuid, Result<(), InboxError>)> = stream::iter(unique)
            .map(|id| async move { (id, self.update_one(scope, id, next).await) })
            .buffer_unordered(BULK_CONCURRENCY)
            .collect()
            .await;

        let mut result = BulkUpdateResult::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => result.success_count += 1,
                Err(err) => result.failures.push(BulkFailure {
                    id,
                    reason: err.to_string(),
                }),
            }
        }
        result.failures.sort_by_key(|f| f.id);
        info!(
            organization_id = %scope.organization_id,
            status = %next,
            succeeded = result.success_count,
            failed = result.failures.len(),
            "bulk status update"
        );
        result
    }

    pub async fn update_priority(
        &self,
        scope: &AccountScope,
        id: Uuid,
        priority: Priority,
    ) -> Result<InboxMessage, InboxError> {
        let mut message = self.scoped(scope, id).await?;
        if !self.store.update_priority(id, priority).await? {
            return Err(InboxError::OriginalMessageNotFound(id));
        }
        audit_log(
            "priority_changed",
            &message.account_id,
            json!({ "message_id": id, "from": message.priority, "to": priority }),
        );
        message.priority = priority;
        Ok(message)
    }

    pub async fn get_stats(&self, scope: &AccountScope) -> Result<InboxStats, InboxError> {
        if scope.is_empty() {
            return Ok(InboxStats::default());
        }
        Ok(self.store.stats(&scope.account_ids).await?)
    }

    pub async fn sync(&self, scope: &AccountScope) -> SyncReport {
        self.sync.sync(scope).await
    }

    pub async fn reply(
        &self,
        scope: &AccountScope,
        id: Uuid,
        content: &str,
    ) -> Result<ReplyReceipt, InboxError> {
        self.dispatcher.reply(scope, id, content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::tests::ingestor;
    use crate::reply::tests::{account, FakeClient};
    use crate::reply::ClientMap;
    use std::collections::HashMap;
    use unibox_core::accounts::AccountRegistry;
    use unibox_core::config::SyncConfig;
    use unibox_core::metrics::MetricsStore;
    use unibox_core::platform::PlatformClient;
    use unibox_core::store::millis_to_datetime;
    use unibox_core::types::{NewMessage, Sender, Sentiment};
    use unibox_persistence::MemoryMessageStore;

    struct Fixture {
        store: Arc<dyn MessageStore>,
        controller: InboxController,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let accounts = Arc::new(AccountRegistry::new([
            account("fb-main", PlatformType::Facebook),
            account("tw-main", PlatformType::Twitter),
        ]));
        let mut clients: ClientMap = HashMap::new();
        clients.insert(
            PlatformType::Facebook,
            Arc::new(FakeClient::ok(PlatformType::Facebook)) as Arc<dyn PlatformClient>,
        );
        let metrics = MetricsStore::new();
        let controller = InboxController::new(
            store.clone(),
            ReplyDispatcher::new(store.clone(), accounts.clone(), clients.clone(), metrics),
            SyncCoordinator::new(accounts, clients, Arc::new(ingestor(store.clone())), SyncConfig::default()),
        );
        Fixture { store, controller }
    }

    fn scope() -> AccountScope {
        AccountScope::new("org-1", ["fb-main".to_string(), "tw-main".to_string()])
    }

    async fn seed(store: &Arc<dyn MessageStore>, platform: PlatformType, account: &str, n: i64) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for i in 0..n {
            let mut message = InboxMessage::from_new(
                NewMessage::new(platform, format!("{account}-{i}"), account, MessageType::Comment, Sender::new("u")),
                Priority::Medium,
                Sentiment::Neutral,
            );
            message.received_at = millis_to_datetime(1_700_000_000_000 + i * 1_000).unwrap();
            ids.push(message.id);
            store.insert(message).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn pages_walk_every_message_once() {
        let f = fixture();
        seed(&f.store, PlatformType::Facebook, "fb-main", 25).await;
        seed(&f.store, PlatformType::Twitter, "tw-main", 5).await;

        let mut seen = BTreeSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = f
                .controller
                .get_messages(&scope(), &MessageFilter::default(), Some(7), cursor.as_deref())
                .await
                .unwrap();
            pages += 1;
            for m in &page.messages {
                assert!(seen.insert(m.id));
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 30);
        assert_eq!(pages, 5);
    }

    #[tokio::test]
    async fn filters_and_scope_apply() {
        let f = fixture();
        seed(&f.store, PlatformType::Facebook, "fb-main", 3).await;
        seed(&f.store, PlatformType::Twitter, "tw-main", 2).await;
        seed(&f.store, PlatformType::Instagram, "ig-other", 4).await;

        let filter = MessageFilter {
            platforms: [PlatformType::Twitter].into(),
            ..MessageFilter::default()
        };
        let page = f.controller.get_messages(&scope(), &filter, None, None).await.unwrap();
        assert_eq!(page.messages.len(), 2);

        let all = f
            .controller
            .get_messages(&scope(), &MessageFilter::default(), Some(1_000), None)
            .await
            .unwrap();
        assert_eq!(all.messages.len(), 5);

        let stats = f.controller.get_stats(&scope()).await.unwrap();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.unread(), 5);

        let empty = AccountScope::new("org-9", Vec::<String>::new());
        assert!(f.controller.get_messages(&empty, &filter, None, None).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn bad_cursor_is_rejected() {
        let f = fixture();
        let err = f
            .controller
            .get_messages(&scope(), &MessageFilter::default(), None, Some("not-a-cursor"))
            .await
            .unwrap_err();
        assert!(matches!(err, InboxError::InvalidCursor));
    }

    #[tokio::test]
    async fn bulk_update_reports_partial_success() {
        let f = fixture();
        let ids = seed(&f.store, PlatformType::Facebook, "fb-main", 3).await;
        let foreign = seed(&f.store, PlatformType::Instagram, "ig-other", 1).await;

        // Reply to one so it can no longer be archived.
        f.controller.reply(&scope(), ids[0], "thanks").await.unwrap();

        let mut targets = ids.clone();
        targets.push(foreign[0]);
        targets.push(Uuid::new_v4());
        let result = f
            .controller
            .bulk_update_status(&scope(), &targets, MessageStatus::Archived)
            .await;
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failures.len(), 3);

        let archived = f.store.get(ids[1]).await.unwrap().unwrap();
        assert_eq!(archived.status, MessageStatus::Archived);

        // Archived can always be reverted to unread.
        let back = f
            .controller
            .bulk_update_status(&scope(), &[ids[1]], MessageStatus::Unread)
            .await;
        assert_eq!(back.success_count, 1);
    }

    #[tokio::test]
    async fn bulk_cannot_claim_replied() {
        let f = fixture();
        let ids = seed(&f.store, PlatformType::Facebook, "fb-main", 1).await;
        let result = f
            .controller
            .bulk_update_status(&scope(), &ids, MessageStatus::Replied)
            .await;
        assert_eq!(result.success_count, 0);
        assert_eq!(f.store.get(ids[0]).await.unwrap().unwrap().status, MessageStatus::Unread);
    }

    #[tokio::test]
    async fn priority_override() {
        let f = fixture();
        let ids = seed(&f.store, PlatformType::Twitter, "tw-main", 1).await;
        let updated = f
            .controller
            .update_priority(&scope(), ids[0], Priority::High)
            .await
            .unwrap();
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(f.store.get(ids[0]).await.unwrap().unwrap().priority, Priority::High);
    }
}
