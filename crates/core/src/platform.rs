use crate::accounts::ConnectedAccount;
use crate::error::{HandshakeError, NormalizeError, ProviderError};
use crate::types::{InboxMessage, NewMessage, PlatformType};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Request headers with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    inner: HashMap<String, String>,
}

impl WebhookHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.inner.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for WebhookHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// GET handshake success payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeReply {
    /// Echo as `text/plain`.
    Text(String),
    /// Respond with a JSON document (Twitter CRC, LinkedIn challengeCode).
    Json(Value),
}

/// Result of parsing one event out of a webhook batch.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    Message(NewMessage),
    /// Recognized but intentionally dropped: self-origin, unknown account,
    /// or an event kind the inbox does not track.
    Skipped { reason: &'static str },
    Malformed(NormalizeError),
}

impl ParsedEvent {
    pub fn skipped(reason: &'static str) -> Self {
        ParsedEvent::Skipped { reason }
    }

    pub fn from_result(result: Result<Option<NewMessage>, NormalizeError>, skip_reason: &'static str) -> Self {
        match result {
            Ok(Some(message)) => ParsedEvent::Message(message),
            Ok(None) => ParsedEvent::Skipped { reason: skip_reason },
            Err(err) => ParsedEvent::Malformed(err),
        }
    }
}

/// Per-platform webhook endpoint: signature check, GET handshake and POST
/// payload parsing. Implementations hold only immutable configuration and
/// are shared across concurrent requests.
pub trait WebhookReceiver: Send + Sync {
    fn platform(&self) -> PlatformType;

    /// Authenticate the raw request. Must run before `parse`.
    fn verify(&self, body: &[u8], headers: &WebhookHeaders) -> bool;

    fn handshake(&self, query: &HashMap<String, String>) -> Result<HandshakeReply, HandshakeError>;

    /// Split a verified body into events. An `Err` means the envelope itself
    /// is unreadable; individual bad events come back as
    /// `ParsedEvent::Malformed` and never abort the batch.
    fn parse(
        &self,
        body: &[u8],
        query: &HashMap<String, String>,
    ) -> Result<Vec<ParsedEvent>, NormalizeError>;
}

/// Look-back window for a pull-based catch-up.
#[derive(Debug, Clone, Copy)]
pub struct BackfillWindow {
    pub since: DateTime<Utc>,
    pub max_pages: usize,
}

/// Outbound side of a platform: replies and catch-up fetches, authenticated
/// with the connected account's stored credential.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn platform(&self) -> PlatformType;

    /// Send `content` as a reply to `message` and return the platform's id
    /// for the created reply.
    async fn send_reply(
        &self,
        account: &ConnectedAccount,
        message: &InboxMessage,
        content: &str,
    ) -> Result<String, ProviderError>;

    /// Fetch events newer than `window.since` and run them through the same
    /// normalizer as the push path. Platforms without a pull source return
    /// nothing.
    async fn backfill(
        &self,
        _account: &ConnectedAccount,
        _window: &BackfillWindow,
    ) -> Result<Vec<NewMessage>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Access token of an account, or a configuration error naming it.
pub fn require_token(account: &ConnectedAccount) -> Result<&str, ProviderError> {
    account
        .access_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::Config(format!("no access token for account {}", account.id)))
}

/// Parse a JSON body, mapping failures to an envelope-level `NormalizeError`.
pub fn parse_json_body(body: &[u8]) -> Result<Value, NormalizeError> {
    serde_json::from_slice(body)
        .map_err(|e| NormalizeError::new(format!("invalid JSON body: {e}"), String::from_utf8_lossy(body)))
}

/// Deserialize one event of a batch into its typed shape.
pub fn typed_event<T: serde::de::DeserializeOwned>(raw: &Value) -> Result<T, NormalizeError> {
    T::deserialize(raw).map_err(|e| NormalizeError::from_json(e.to_string(), raw))
}

/// Platform id of a comment edit. Edits get their own natural key so the
/// original comment's dedupe entry does not swallow them.
pub fn edit_platform_id(comment_id: &str, edited_at: &str) -> String {
    format!("{comment_id}:{EDIT_MARKER}:{edited_at}")
}

const EDIT_MARKER: &str = "edit";

/// Platform object a reply to `message` should attach to. Edit events point
/// back at the edited comment.
pub fn reply_anchor(message: &InboxMessage) -> &str {
    let id = message.platform_id.as_str();
    match id.split_once(&format!(":{EDIT_MARKER}:")) {
        Some((comment_id, _)) => comment_id,
        None => id,
    }
}

/// Provider timestamps arrive as unix seconds, unix milliseconds, numeric
/// strings, RFC 3339, Graph API `+0000` offsets or Twitter's ctime-like
/// `Wed Oct 10 20:19:24 +0000 2018`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(epoch_to_datetime),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return epoch_to_datetime(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn epoch_to_datetime(n: i64) -> Option<DateTime<Utc>> {
    // Anything past year ~33658 in seconds is really milliseconds.
    if n.abs() >= 1_000_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}
