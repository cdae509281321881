use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum using
/// the same spelling serde uses on the wire.
macro_rules! wire_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($ty),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Facebook,
    Instagram,
    Twitter,
    Linkedin,
    Tiktok,
    Youtube,
}

wire_enum!(PlatformType {
    Facebook => "facebook",
    Instagram => "instagram",
    Twitter => "twitter",
    Linkedin => "linkedin",
    Tiktok => "tiktok",
    Youtube => "youtube",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Comment,
    Reply,
    Mention,
    DirectMessage,
    Like,
    Follow,
    Share,
    Postback,
    CommentUpdate,
}

wire_enum!(MessageType {
    Comment => "comment",
    Reply => "reply",
    Mention => "mention",
    DirectMessage => "direct_message",
    Like => "like",
    Follow => "follow",
    Share => "share",
    Postback => "postback",
    CommentUpdate => "comment_update",
});

impl MessageType {
    /// Engagement signals (likes, follows, shares) carry no text to answer.
    pub fn accepts_reply(&self) -> bool {
        !matches!(self, MessageType::Like | MessageType::Follow | MessageType::Share)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Unread,
    Read,
    Replied,
    Archived,
}

wire_enum!(MessageStatus {
    Unread => "unread",
    Read => "read",
    Replied => "replied",
    Archived => "archived",
});

impl MessageStatus {
    /// Status state machine.
    ///
    /// `unread -> read`, `unread|read -> archived`, `unread|read -> replied`,
    /// and any state back to `unread`. Re-applying the current status is a
    /// no-op and always allowed.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        if self == next {
            return true;
        }
        match next {
            Unread => true,
            Read => self == Unread,
            Archived | Replied => matches!(self, Unread | Read),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

wire_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

wire_enum!(Sentiment {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
});

/// Author of an inbound event. Platforms fill these on a best-effort basis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follower_count: Option<u64>,
}

impl Sender {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Label for synthesized content ("Ann liked your post").
    pub fn display_label(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.username.is_empty() {
            &self.username
        } else {
            &self.id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
    Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            thumbnail_url: None,
            title: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
}

/// Normalizer output: an inbox message before the store assigns identity
/// and the pipeline derives status, priority and sentiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub platform_type: PlatformType,
    pub platform_id: String,
    pub account_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub sender: Sender,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EngagementMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(
        platform_type: PlatformType,
        platform_id: impl Into<String>,
        account_id: impl Into<String>,
        message_type: MessageType,
        sender: Sender,
    ) -> Self {
        Self {
            platform_type,
            platform_id: platform_id.into(),
            account_id: account_id.into(),
            message_type,
            sender,
            content: String::new(),
            content_id: None,
            platform_post_id: None,
            parent_id: None,
            attachments: Vec::new(),
            metrics: None,
            sent_at: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Sets both `content_id` and `platform_post_id`: every normalizer uses
    /// the post/video/page the event relates to for both.
    pub fn with_post(mut self, post_id: impl Into<String>) -> Self {
        let post_id = post_id.into();
        self.content_id = Some(post_id.clone());
        self.platform_post_id = Some(post_id);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_sent_at(mut self, sent_at: Option<DateTime<Utc>>) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn add_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_metrics(mut self, metrics: EngagementMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// The canonical inbox unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub id: Uuid,
    pub platform_type: PlatformType,
    pub platform_id: String,
    pub account_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub priority: Priority,
    pub sender: Sender,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EngagementMetrics>,
    pub sentiment: Sentiment,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl InboxMessage {
    /// Materializes a normalized event as a fresh `unread` inbox entry.
    pub fn from_new(new: NewMessage, priority: Priority, sentiment: Sentiment) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform_type: new.platform_type,
            platform_id: new.platform_id,
            account_id: new.account_id,
            message_type: new.message_type,
            status: MessageStatus::Unread,
            priority,
            sender: new.sender,
            content: new.content,
            content_id: new.content_id,
            platform_post_id: new.platform_post_id,
            parent_id: new.parent_id,
            attachments: new.attachments,
            metrics: new.metrics,
            sentiment,
            received_at: Utc::now(),
            sent_at: new.sent_at,
        }
    }

    pub fn dedupe_key(&self) -> String {
        dedupe_key(self.platform_type, &self.platform_id)
    }
}

/// Natural key of an inbox message: `(platformType, platformId)`.
pub fn dedupe_key(platform: PlatformType, platform_id: &str) -> String {
    format!("{}:{}", platform.as_str(), platform_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_allowed_from_unread_and_read_only() {
        assert!(MessageStatus::Unread.can_transition_to(MessageStatus::Archived));
        assert!(MessageStatus::Read.can_transition_to(MessageStatus::Archived));
        assert!(!MessageStatus::Replied.can_transition_to(MessageStatus::Archived));
    }

    #[test]
    fn mark_unread_reverts_any_state() {
        for status in MessageStatus::ALL {
            assert!(status.can_transition_to(MessageStatus::Unread));
        }
    }

    #[test]
    fn archived_cannot_be_read_or_replied() {
        assert!(!MessageStatus::Archived.can_transition_to(MessageStatus::Read));
        assert!(!MessageStatus::Archived.can_transition_to(MessageStatus::Replied));
        assert!(!MessageStatus::Replied.can_transition_to(MessageStatus::Read));
    }

    #[test]
    fn wire_names_round_trip_through_serde() {
        let json = serde_json::to_string(&MessageType::DirectMessage).unwrap();
        assert_eq!(json, "\"direct_message\"");
        assert_eq!(
            "comment_update".parse::<MessageType>().unwrap(),
            MessageType::CommentUpdate
        );
        assert!("tweet".parse::<MessageType>().is_err());
    }

    #[test]
    fn new_message_serializes_type_field() {
        let msg = NewMessage::new(
            PlatformType::Facebook,
            "c1",
            "acct",
            MessageType::Comment,
            Sender::new("u1").with_name("Ann"),
        )
        .with_post("p1");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "comment");
        assert_eq!(value["platformPostId"], "p1");
        assert_eq!(value["sender"]["name"], "Ann");
    }

    #[test]
    fn display_label_falls_back_to_id() {
        assert_eq!(Sender::new("42").display_label(), "42");
        assert_eq!(Sender::new("42").with_username("ann").display_label(), "ann");
    }
}
