use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::BTreeSet;
use tracing::{info, instrument};
use unibox_core::error::StoreError;
use unibox_core::store::{millis_to_datetime, InboxStats, InsertOutcome, MessageQuery, MessageStore};
use unibox_core::types::{InboxMessage, MessageStatus, PlatformType, Priority};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, platform_type, platform_id, account_id, message_type, \
     status, priority, sentiment, sender, content, content_id, platform_post_id, parent_id, \
     attachments, metrics, received_at, sent_at FROM inbox_messages";

#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct MessageRow {
    id: String,
    platform_type: String,
    platform_id: String,
    account_id: String,
    message_type: String,
    status: String,
    priority: String,
    sentiment: String,
    sender: String,
    content: String,
    content_id: Option<String>,
    platform_post_id: Option<String>,
    parent_id: Option<String>,
    attachments: String,
    metrics: Option<String>,
    received_at: i64,
    sent_at: Option<i64>,
}

fn corrupt(field: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{field}: {err}"))
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

impl TryFrom<MessageRow> for InboxMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(InboxMessage {
            id: Uuid::parse_str(&row.id).map_err(|e| corrupt("id", e))?,
            platform_type: row.platform_type.parse().map_err(|e| corrupt("platform_type", e))?,
            platform_id: row.platform_id,
            account_id: row.account_id,
            message_type: row.message_type.parse().map_err(|e| corrupt("message_type", e))?,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            priority: row.priority.parse().map_err(|e| corrupt("priority", e))?,
            sentiment: row.sentiment.parse().map_err(|e| corrupt("sentiment", e))?,
            sender: serde_json::from_str(&row.sender).map_err(|e| corrupt("sender", e))?,
            content: row.content,
            content_id: row.content_id,
            platform_post_id: row.platform_post_id,
            parent_id: row.parent_id,
            attachments: serde_json::from_str(&row.attachments)
                .map_err(|e| corrupt("attachments", e))?,
            metrics: row
                .metrics
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| corrupt("metrics", e))?,
            received_at: millis_to_datetime(row.received_at)
                .ok_or_else(|| corrupt("received_at", row.received_at))?,
            sent_at: row.sent_at.and_then(millis_to_datetime),
        })
    }
}

fn to_json<T: serde::Serialize>(field: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| corrupt(field, e))
}

/// Append `AND column IN (...)` for a non-empty filter set.
fn push_in<'a, I>(qb: &mut QueryBuilder<'a, Sqlite>, column: &str, values: I)
where
    I: IntoIterator<Item = String>,
{
    let values: Vec<String> = values.into_iter().collect();
    if values.is_empty() {
        return;
    }
    qb.push(format!(" AND {column} IN ("));
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

impl SqliteMessageStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        info!("SqliteMessageStore initialized");
        Ok(Self { pool })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<InboxMessage>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.map(InboxMessage::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_by_platform_id(
        &self,
        platform: PlatformType,
        platform_id: &str,
    ) -> Result<Option<InboxMessage>, StoreError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE platform_type = ? AND platform_id = ?"
        ))
        .bind(platform.as_str())
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        row.map(InboxMessage::try_from).transpose()
    }

    #[instrument(skip(self, message), fields(platform = %message.platform_type, platform_id = %message.platform_id))]
    async fn insert(&self, message: InboxMessage) -> Result<InsertOutcome, StoreError> {
        let sender = to_json("sender", &message.sender)?;
        let attachments = to_json("attachments", &message.attachments)?;
        let metrics = message
            .metrics
            .as_ref()
            .map(|m| to_json("metrics", m))
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO inbox_messages (
                id, platform_type, platform_id, account_id, message_type, status, priority,
                sentiment, sender, content, content_id, platform_post_id, parent_id,
                attachments, metrics, received_at, sent_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (platform_type, platform_id) DO NOTHING
            "#,
        )
        .bind(message.id.to_string())
        .bind(message.platform_type.as_str())
        .bind(&message.platform_id)
        .bind(&message.account_id)
        .bind(message.message_type.as_str())
        .bind(message.status.as_str())
        .bind(message.priority.as_str())
        .bind(message.sentiment.as_str())
        .bind(sender)
        .bind(&message.content)
        .bind(&message.content_id)
        .bind(&message.platform_post_id)
        .bind(&message.parent_id)
        .bind(attachments)
        .bind(metrics)
        .bind(message.received_at.timestamp_millis())
        .bind(message.sent_at.map(|t| t.timestamp_millis()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted(message))
        }
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: Uuid,
        expected: MessageStatus,
        next: MessageStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE inbox_messages SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish a lost compare-and-set from a missing row.
        match self.get(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self))]
    async fn update_priority(&self, id: Uuid, priority: Priority) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE inbox_messages SET priority = ?, updated_at = ? WHERE id = ?")
                .bind(priority.as_str())
                .bind(Utc::now().timestamp_millis())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(true)
    }

    #[instrument(skip(self, query))]
    async fn query(&self, query: &MessageQuery) -> Result<Vec<InboxMessage>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        qb.push(" WHERE 1 = 1");
        push_in(&mut qb, "account_id", query.account_ids.iter().cloned());
        push_in(&mut qb, "platform_type", query.platforms.iter().map(|p| p.as_str().to_string()));
        push_in(&mut qb, "message_type", query.types.iter().map(|t| t.as_str().to_string()));
        push_in(&mut qb, "status", query.statuses.iter().map(|s| s.as_str().to_string()));
        if let Some(since) = query.since {
            qb.push(" AND received_at >= ").push_bind(since.timestamp_millis());
        }
        if let Some(until) = query.until {
            qb.push(" AND received_at <= ").push_bind(until.timestamp_millis());
        }
        if let Some(cursor) = query.after {
            qb.push(" AND (received_at < ")
                .push_bind(cursor.received_at_ms)
                .push(" OR (received_at = ")
                .push_bind(cursor.received_at_ms)
                .push(" AND id < ")
                .push_bind(cursor.id.to_string())
                .push("))");
        }
        qb.push(" ORDER BY received_at DESC, id DESC LIMIT ")
            .push_bind(query.limit as i64);

        let rows: Vec<MessageRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        rows.into_iter().map(InboxMessage::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn stats(&self, account_ids: &BTreeSet<String>) -> Result<InboxStats, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT status, platform_type, COUNT(*) FROM inbox_messages WHERE 1 = 1",
        );
        push_in(&mut qb, "account_id", account_ids.iter().cloned());
        qb.push(" GROUP BY status, platform_type");

        let rows: Vec<(String, String, i64)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut stats = InboxStats::default();
        for (status, platform, count) in rows {
            let status: MessageStatus = status.parse().map_err(|e| corrupt("status", e))?;
            let platform: PlatformType =
                platform.parse().map_err(|e| corrupt("platform_type", e))?;
            stats.record(status, platform, count.max(0) as u64);
        }
        Ok(stats)
    }
}
