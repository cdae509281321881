use crate::error::StoreError;
use crate::types::{InboxMessage, MessageStatus, MessageType, PlatformType, Priority};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Outcome of a conditional insert keyed on `(platformType, platformId)`.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(InboxMessage),
    /// A message with the same natural key already exists; nothing written.
    Duplicate,
}

/// Keyset position: messages are listed newest first by
/// `(received_at, id)`, and a cursor names the last row of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub received_at_ms: i64,
    pub id: Uuid,
}

impl Cursor {
    pub fn after(message: &InboxMessage) -> Self {
        Self {
            received_at_ms: message.received_at.timestamp_millis(),
            id: message.id,
        }
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.received_at_ms, self.id))
    }

    pub fn decode(token: &str) -> Option<Self> {
        let raw = URL_SAFE_NO_PAD.decode(token).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        let (ms, id) = raw.split_once(':')?;
        Some(Self {
            received_at_ms: ms.parse().ok()?,
            id: Uuid::parse_str(id).ok()?,
        })
    }

    /// True when `message` sorts strictly after this cursor (older).
    pub fn precedes(&self, message: &InboxMessage) -> bool {
        let ms = message.received_at.timestamp_millis();
        ms < self.received_at_ms || (ms == self.received_at_ms && message.id < self.id)
    }
}

/// Filter for inbox listing. Empty sets mean "any".
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub account_ids: BTreeSet<String>,
    pub platforms: BTreeSet<PlatformType>,
    pub types: BTreeSet<MessageType>,
    pub statuses: BTreeSet<MessageStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub after: Option<Cursor>,
    pub limit: usize,
}

impl MessageQuery {
    /// Row-level predicate shared by store implementations that filter in
    /// memory. Cursor and limit are applied separately.
    pub fn matches(&self, message: &InboxMessage) -> bool {
        (self.account_ids.is_empty() || self.account_ids.contains(&message.account_id))
            && (self.platforms.is_empty() || self.platforms.contains(&message.platform_type))
            && (self.types.is_empty() || self.types.contains(&message.message_type))
            && (self.statuses.is_empty() || self.statuses.contains(&message.status))
            && self.since.map_or(true, |since| message.received_at >= since)
            && self.until.map_or(true, |until| message.received_at <= until)
            && self.after.map_or(true, |cursor| cursor.precedes(message))
    }
}

/// Aggregate counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxStats {
    pub total: u64,
    pub by_status: BTreeMap<MessageStatus, u64>,
    pub by_platform: BTreeMap<PlatformType, u64>,
}

impl InboxStats {
    pub fn record(&mut self, status: MessageStatus, platform: PlatformType, count: u64) {
        self.total += count;
        *self.by_status.entry(status).or_default() += count;
        *self.by_platform.entry(platform).or_default() += count;
    }

    pub fn unread(&self) -> u64 {
        self.by_status.get(&MessageStatus::Unread).copied().unwrap_or_default()
    }
}

/// Keyed persistent store for inbox messages.
///
/// `insert` must enforce `(platformType, platformId)` uniqueness atomically;
/// the deduplication gate in front of it only saves the write.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<InboxMessage>, StoreError>;

    async fn get_by_platform_id(
        &self,
        platform: PlatformType,
        platform_id: &str,
    ) -> Result<Option<InboxMessage>, StoreError>;

    async fn insert(&self, message: InboxMessage) -> Result<InsertOutcome, StoreError>;

    /// Compare-and-set: write `next` only while the stored status equals
    /// `expected`. Returns whether the write happened.
    async fn update_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, StoreError>;

    async fn update_priority(&self, id: Uuid, priority: Priority) -> Result<bool, StoreError>;

    /// Newest first, at most `query.limit` rows.
    async fn query(&self, query: &MessageQuery) -> Result<Vec<InboxMessage>, StoreError>;

    async fn stats(&self, account_ids: &BTreeSet<String>) -> Result<InboxStats, StoreError>;
}

/// Millisecond timestamp back to `DateTime<Utc>`.
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
