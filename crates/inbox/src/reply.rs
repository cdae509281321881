use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use unibox_core::accounts::{AccountRegistry, AccountScope};
use unibox_core::audit::audit_log;
use unibox_core::error::{InboxError, ProviderError};
use unibox_core::metrics::MetricsStore;
use unibox_core::platform::PlatformClient;
use unibox_core::store::MessageStore;
use unibox_core::types::{InboxMessage, MessageStatus, PlatformType};
use uuid::Uuid;

/// Outbound clients keyed by platform.
pub type ClientMap = HashMap<PlatformType, Arc<dyn PlatformClient>>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyReceipt {
    pub platform_reply_id: String,
    pub message: InboxMessage,
}

/// Sends replies through the originating platform and marks the inbox
/// message replied once the platform has accepted it.
pub struct ReplyDispatcher {
    store: Arc<dyn MessageStore>,
    accounts: Arc<AccountRegistry>,
    clients: ClientMap,
    metrics: Arc<MetricsStore>,
}

impl ReplyDispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        accounts: Arc<AccountRegistry>,
        clients: ClientMap,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        Self {
            store,
            accounts,
            clients,
            metrics,
        }
    }

    pub async fn reply(
        &self,
        scope: &AccountScope,
        message_id: Uuid,
        content: &str,
    ) -> Result<ReplyReceipt, InboxError> {
        let message = self
            .store
            .get(message_id)
            .await?
            .filter(|m| scope.contains(&m.account_id))
            .ok_or(InboxError::OriginalMessageNotFound(message_id))?;

        if content.trim().is_empty() {
            return Err(InboxError::ProviderRejected("reply content is empty".to_string()));
        }
        if !message.message_type.accepts_reply() {
            return Err(InboxError::ProviderRejected(format!(
                "{} messages cannot be replied to",
                message.message_type
            )));
        }
        if !message.status.can_transition_to(MessageStatus::Replied) {
            return Err(InboxError::InvalidTransition {
                from: message.status,
                to: MessageStatus::Replied,
            });
        }

        let account = self
            .accounts
            .get(&message.account_id)
            .ok_or_else(|| InboxError::AccountNotFound(message.account_id.clone()))?;
        let client = self.clients.get(&message.platform_type).ok_or_else(|| {
            InboxError::ProviderRejected(format!("{} is not configured", message.platform_type))
        })?;

        let platform_reply_id = match client.send_reply(account, &message, content).await {
            Ok(id) => id,
            Err(err) => {
                self.metrics.inc_replies_failed();
                warn!(
                    platform = %message.platform_type,
                    account_id = %account.id,
                    message_id = %message.id,
                    error = %err,
                    "reply failed"
                );
                audit_log(
                    "reply_failed",
                    &account.id,
                    json!({ "message_id": message.id, "platform": message.platform_type, "error": err.to_string() }),
                );
                return Err(match err {
                    ProviderError::AuthExpired(_) => InboxError::ProviderAuthExpired(account.id.clone()),
                    other => other.into(),
                });
            }
        };

        self.metrics.inc_replies_sent();
        let message = self.mark_replied(message).await?;
        info!(
            platform = %message.platform_type,
            account_id = %message.account_id,
            message_id = %message.id,
            reply_id = %platform_reply_id,
            "reply sent"
        );
        audit_log(
            "reply_sent",
            &message.account_id,
            json!({ "message_id": message.id, "platform": message.platform_type, "platform_reply_id": platform_reply_id }),
        );
        Ok(ReplyReceipt {
            platform_reply_id,
            message,
        })
    }

    /// The platform already holds the reply, so a concurrent status change
    /// is re-read and retried instead of failing the call.
    async fn mark_replied(&self, mut message: InboxMessage) -> Result<InboxMessage, InboxError> {
        for _ in 0..3 {
            if !message.status.can_transition_to(MessageStatus::Replied) {
                warn!(message_id = %message.id, status = %message.status, "reply sent but status moved on");
                return Ok(message);
            }
            if self
                .store
                .update_status(message.id, message.status, MessageStatus::Replied)
                .await?
            {
                message.status = MessageStatus::Replied;
                return Ok(message);
            }
            message = self
                .store
                .get(message.id)
                .await?
                .ok_or(InboxError::OriginalMessageNotFound(message.id))?;
        }
        warn!(message_id = %message.id, "status kept changing, leaving it as is");
        Ok(message)
    }
}
