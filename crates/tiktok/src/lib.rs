//! TikTok webhook events (comments, mentions, engagement, messages).

pub mod client;

pub use client::{TikTokClient, DEFAULT_TIKTOK_API};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use unibox_core::accounts::{AccountContext, AccountRegistry};
use unibox_core::error::{HandshakeError, NormalizeError};
use unibox_core::platform::{
    edit_platform_id, parse_json_body, parse_timestamp, typed_event, HandshakeReply, ParsedEvent,
    WebhookHeaders, WebhookReceiver,
};
use unibox_core::signature::verify_sha256_hex;
use unibox_core::types::{MessageType, NewMessage, PlatformType, Sender};

pub const SIGNATURE_HEADER: &str = "x-tiktok-signature";
pub const TIMESTAMP_HEADER: &str = "x-tiktok-timestamp";

/// Outer notification. `content` is usually a JSON document serialized into
/// a string.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub event: String,
    pub user_openid: String,
    #[serde(default)]
    pub create_time: Option<Value>,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TikTokUser {
    #[serde(alias = "open_id", alias = "user_id")]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub follower_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventContent {
    #[serde(default)]
    pub comment_id: Option<String>,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<TikTokUser>,
    #[serde(default)]
    pub create_time: Option<Value>,
}

/// Typed TikTok event, discriminated on `event`.
#[derive(Debug, Clone)]
pub enum TikTokEvent {
    Comment(EventContent),
    CommentUpdate(EventContent),
    Mention(EventContent),
    Like(EventContent),
    Follow(EventContent),
    Share(EventContent),
    DirectMessage(EventContent),
    Other(String),
}

impl TikTokEvent {
    pub fn from_notification(notification: &Notification) -> Result<Self, NormalizeError> {
        let kind = notification.event.as_str();
        let known = matches!(
            kind,
            "comment" | "comment.create" | "comment.reply" | "comment.update" | "mention" | "like"
                | "follow" | "share" | "direct_message" | "message.receive"
        );
        if !known {
            return Ok(TikTokEvent::Other(kind.to_string()));
        }

        let content = match &notification.content {
            Value::String(raw) => serde_json::from_str::<Value>(raw)
                .map_err(|e| NormalizeError::new(format!("content is not JSON: {e}"), raw))?,
            other => other.clone(),
        };
        let content: EventContent = typed_event(&content)?;

        Ok(match kind {
            "comment" | "comment.create" | "comment.reply" => TikTokEvent::Comment(content),
            "comment.update" => TikTokEvent::CommentUpdate(content),
            "mention" => TikTokEvent::Mention(content),
            "like" => TikTokEvent::Like(content),
            "follow" => TikTokEvent::Follow(content),
            "share" => TikTokEvent::Share(content),
            _ => TikTokEvent::DirectMessage(content),
        })
    }
}

fn sender_of(user: Option<&TikTokUser>) -> Sender {
    match user {
        Some(user) => Sender {
            id: user.id.clone(),
            name: user.display_name.clone().unwrap_or_default(),
            username: user.username.clone().unwrap_or_default(),
            profile_picture: user.avatar_url.clone(),
            verified: None,
            follower_count: user.follower_count,
        },
        None => Sender::default(),
    }
}

fn raw_time(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, NormalizeError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NormalizeError::missing(field))
}

pub fn normalize_event(
    ctx: &AccountContext<'_>,
    notification: &Notification,
    event: &TikTokEvent,
) -> Result<Option<NewMessage>, NormalizeError> {
    let content = match event {
        TikTokEvent::Other(_) => return Ok(None),
        TikTokEvent::Comment(c)
        | TikTokEvent::CommentUpdate(c)
        | TikTokEvent::Mention(c)
        | TikTokEvent::Like(c)
        | TikTokEvent::Follow(c)
        | TikTokEvent::Share(c)
        | TikTokEvent::DirectMessage(c) => c,
    };
    if content.user.as_ref().is_some_and(|u| ctx.is_self(&u.id)) {
        return Ok(None);
    }

    let sender = sender_of(content.user.as_ref());
    let at = content.create_time.as_ref().or(notification.create_time.as_ref());
    let label = sender.display_label().to_string();
    let parent = content
        .parent_comment_id
        .as_deref()
        .filter(|p| !p.is_empty() && *p != "0");
    // Reaction ids are keyed by the acting user.
    let actor = || {
        content
            .user
            .as_ref()
            .map(|u| u.id.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NormalizeError::missing("user"))
    };

    let (platform_id, message_type, text) = match event {
        TikTokEvent::Comment(_) => {
            let kind = if parent.is_some() { MessageType::Reply } else { MessageType::Comment };
            (required(&content.comment_id, "comment_id")?.to_string(), kind, content.text.clone())
        }
        TikTokEvent::CommentUpdate(_) => {
            let comment_id = required(&content.comment_id, "comment_id")?;
            let edited_at = raw_time(at).ok_or_else(|| NormalizeError::missing("create_time"))?;
            (edit_platform_id(comment_id, &edited_at), MessageType::CommentUpdate, content.text.clone())
        }
        TikTokEvent::Mention(_) => {
            let id = content
                .comment_id
                .clone()
                .or_else(|| content.video_id.clone())
                .ok_or_else(|| NormalizeError::missing("video_id"))?;
            (id, MessageType::Mention, content.text.clone())
        }
        TikTokEvent::Like(_) => {
            let video = required(&content.video_id, "video_id")?;
            (
                format!("{video}:like:{}", actor()?),
                MessageType::Like,
                Some(format!("{label} liked your video")),
            )
        }
        TikTokEvent::Follow(_) => {
            let followed_at = raw_time(at).ok_or_else(|| NormalizeError::missing("create_time"))?;
            (
                format!("{}:follow:{followed_at}", actor()?),
                MessageType::Follow,
                Some(format!("{label} followed you")),
            )
        }
        TikTokEvent::Share(_) => {
            let video = required(&content.video_id, "video_id")?;
            let shared_at = raw_time(at).unwrap_or_default();
            (
                format!("{video}:share:{}:{shared_at}", actor()?),
                MessageType::Share,
                Some(format!("{label} shared your video")),
            )
        }
        TikTokEvent::DirectMessage(_) => (
            required(&content.message_id, "message_id")?.to_string(),
            MessageType::DirectMessage,
            content.text.clone(),
        ),
        TikTokEvent::Other(_) => return Ok(None),
    };

    let mut message = NewMessage::new(PlatformType::Tiktok, platform_id, ctx.account_id, message_type, sender)
        .with_content(text.unwrap_or_default())
        .with_sent_at(at.and_then(parse_timestamp));
    if let Some(video) = &content.video_id {
        message = message.with_post(video);
    }
    if let Some(parent) = parent {
        message = message.with_parent(parent);
    }
    Ok(Some(message))
}

/// TikTok signs `body + timestamp` on POST and `challenge + timestamp` on
/// the GET handshake.
pub fn verify_tiktok_signature(
    client_secret: &str,
    body: &[u8],
    timestamp: Option<&str>,
    signature: Option<&str>,
) -> bool {
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return false;
    };
    verify_sha256_hex(client_secret, &[body, timestamp.as_bytes()], signature)
}

pub struct TikTokReceiver {
    client_secret: String,
    tolerance_secs: i64,
    accounts: Arc<AccountRegistry>,
}

impl TikTokReceiver {
    /// `tolerance_secs` bounds the age of a POST timestamp; 0 disables the
    /// freshness check.
    pub fn new(client_secret: impl Into<String>, tolerance_secs: i64, accounts: Arc<AccountRegistry>) -> Self {
        Self {
            client_secret: client_secret.into(),
            tolerance_secs,
            accounts,
        }
    }

    fn is_fresh(&self, timestamp: &str) -> bool {
        if self.tolerance_secs <= 0 {
            return true;
        }
        match timestamp.trim().parse::<i64>() {
            Ok(ts) => (Utc::now().timestamp() - ts).abs() <= self.tolerance_secs,
            Err(_) => false,
        }
    }

    fn parse_one(&self, raw: &Value) -> ParsedEvent {
        let notification: Notification = match typed_event(raw) {
            Ok(n) => n,
            Err(err) => return ParsedEvent::Malformed(err),
        };
        let Some(account) = self.accounts.find(PlatformType::Tiktok, &notification.user_openid) else {
            debug!(user_openid = %notification.user_openid, "no connected account for open id");
            return ParsedEvent::skipped("unknown account");
        };
        let event = match TikTokEvent::from_notification(&notification) {
            Ok(event) => event,
            Err(err) => return ParsedEvent::Malformed(err.with_raw(raw)),
        };
        if let TikTokEvent::Other(kind) = &event {
            debug!(event = %kind, "ignoring untracked TikTok event");
            return ParsedEvent::skipped("unsupported event");
        }
        let result = normalize_event(&account.context(), &notification, &event);
        ParsedEvent::from_result(result.map_err(|e| e.with_raw(raw)), "filtered")
    }
}

impl WebhookReceiver for TikTokReceiver {
    fn platform(&self) -> PlatformType {
        PlatformType::Tiktok
    }

    fn verify(&self, body: &[u8], headers: &WebhookHeaders) -> bool {
        let timestamp = headers.get(TIMESTAMP_HEADER);
        if !verify_tiktok_signature(&self.client_secret, body, timestamp, headers.get(SIGNATURE_HEADER)) {
            return false;
        }
        let fresh = timestamp.is_some_and(|ts| self.is_fresh(ts));
        if !fresh {
            warn!(timestamp = ?timestamp, "rejecting stale TikTok webhook");
        }
        fresh
    }

    fn handshake(&self, query: &HashMap<String, String>) -> Result<HandshakeReply, HandshakeError> {
        let (Some(challenge), Some(timestamp), Some(signature)) =
            (query.get("challenge"), query.get("timestamp"), query.get("signature"))
        else {
            return Err(HandshakeError::BadRequest(
                "challenge, timestamp and signature are required".to_string(),
            ));
        };
        if verify_tiktok_signature(&self.client_secret, challenge.as_bytes(), Some(timestamp), Some(signature)) {
            Ok(HandshakeReply::Text(challenge.clone()))
        } else {
            Err(HandshakeError::Forbidden)
        }
    }

    /// Accepts a single notification, a top-level array, or
    /// `{"events": [...]}`.
    fn parse(
        &self,
        body: &[u8],
        _query: &HashMap<String, String>,
    ) -> Result<Vec<ParsedEvent>, NormalizeError> {
        let raw = parse_json_body(body)?;
        let items: Vec<&Value> = match &raw {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => match map.get("events") {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(_) => return Err(NormalizeError::from_json("`events` must be an array", &raw)),
                None => vec![&raw],
            },
            _ => return Err(NormalizeError::from_json("expected a JSON object or array", &raw)),
        };
        Ok(items.into_iter().map(|item| self.parse_one(item)).collect())
    }
}
