use crate::ingest::{IngestOutcome, Ingestor};
use crate::reply::ClientMap;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use unibox_core::accounts::{AccountRegistry, AccountScope, ConnectedAccount};
use unibox_core::audit::audit_log;
use unibox_core::config::SyncConfig;
use unibox_core::platform::BackfillWindow;
use unibox_core::types::PlatformType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    /// Another sync of the same account was already running.
    InProgress,
    /// The platform has no client configured.
    NotConfigured,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSync {
    pub account_id: String,
    pub platform: PlatformType,
    pub status: SyncStatus,
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccountSync {
    fn new(account: &ConnectedAccount, status: SyncStatus) -> Self {
        Self {
            account_id: account.id.clone(),
            platform: account.platform,
            status,
            fetched: 0,
            inserted: 0,
            duplicates: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub accounts: Vec<AccountSync>,
}

impl SyncReport {
    pub fn inserted(&self) -> usize {
        self.accounts.iter().map(|a| a.inserted).sum()
    }
}

/// Pull-based catch-up through the same ingestion path as webhooks.
///
/// Each account has its own lock; a sync that finds it held reports the
/// account as in progress instead of queueing a second backfill.
pub struct SyncCoordinator {
    accounts: Arc<AccountRegistry>,
    clients: ClientMap,
    ingestor: Arc<Ingestor>,
    config: SyncConfig,
    running: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncCoordinator {
    pub fn new(
        accounts: Arc<AccountRegistry>,
        clients: ClientMap,
        ingestor: Arc<Ingestor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            accounts,
            clients,
            ingestor,
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    async fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.running
            .lock()
            .await
            .entry(account_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn sync(&self, scope: &AccountScope) -> SyncReport {
        let window = BackfillWindow {
            since: Utc::now() - Duration::hours(self.config.lookback_hours.max(1)),
            max_pages: self.config.max_pages.max(1),
        };
        let accounts: Vec<ConnectedAccount> = self.accounts.accounts_in_scope(scope).cloned().collect();

        let mut results: Vec<AccountSync> = stream::iter(accounts)
            .map(|account| async move { self.sync_account(&account, window).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        let report = SyncReport { accounts: results };
        audit_log(
            "sync_completed",
            &scope.organization_id,
            json!({ "accounts": report.accounts.len(), "inserted": report.inserted() }),
        );
        report
    }

    async fn sync_account(&self, account: &ConnectedAccount, window: BackfillWindow) -> AccountSync {
        let Some(client) = self.clients.get(&account.platform) else {
            return AccountSync::new(account, SyncStatus::NotConfigured);
        };
        let lock = self.account_lock(&account.id).await;
        let Ok(_guard) = lock.try_lock() else {
            info!(account_id = %account.id, "sync already running, merging");
            return AccountSync::new(account, SyncStatus::InProgress);
        };

        let mut result = AccountSync::new(account, SyncStatus::Completed);
        let messages = match client.backfill(account, &window).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(account_id = %account.id, platform = %account.platform, error = %err, "backfill failed");
                result.status = SyncStatus::Failed;
                result.error = Some(err.to_string());
                return result;
            }
        };
        result.fetched = messages.len();

        for message in messages {
            match self.ingestor.ingest_message(message).await {
                Ok(IngestOutcome::Inserted(_)) => result.inserted += 1,
                Ok(IngestOutcome::Duplicate) => result.duplicates += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(account_id = %account.id, error = %err, "backfill stopped by store failure");
                    result.status = SyncStatus::Failed;
                    result.error = Some(err.to_string());
                    break;
                }
            }
        }
        info!(
            account_id = %account.id,
            platform = %account.platform,
            fetched = result.fetched,
            inserted = result.inserted,
            "backfill finished"
        );
        result
    }
}
