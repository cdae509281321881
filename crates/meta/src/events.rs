//! Typed shapes of Graph API webhook payloads (`object = page | instagram`).
//!
//! Only the fields the inbox reads are modelled; everything else is ignored
//! by serde.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    /// Page id or Instagram business account id the batch is addressed to.
    pub id: String,
    #[serde(default)]
    pub time: Option<Value>,
    #[serde(default)]
    pub changes: Vec<Value>,
    #[serde(default)]
    pub messaging: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// `changes[].value` for `field = feed` on a Page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedValue {
    pub item: String,
    #[serde(default)]
    pub verb: String,
    #[serde(default)]
    pub comment_id: Option<String>,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub from: Option<GraphUser>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_time: Option<Value>,
    #[serde(default)]
    pub reaction_type: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaRef {
    pub id: String,
    #[serde(default)]
    pub media_product_type: Option<String>,
}

/// `changes[].value` for `field = comments` on an Instagram account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstagramComment {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from: Option<GraphUser>,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// `changes[].value` for `field = mentions`: the account was tagged in a
/// caption (`comment_id` absent) or a comment.
#[derive(Debug, Clone, Deserialize)]
pub struct InstagramMention {
    pub media_id: String,
    #[serde(default)]
    pub comment_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<AttachmentPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentPayload {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub mid: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
    #[serde(default)]
    pub attachments: Vec<MessagingAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostbackPayload {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

/// One `entry[].messaging[]` item (Messenger / Instagram Direct).
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingEvent {
    pub sender: Participant,
    #[serde(default)]
    pub recipient: Option<Participant>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub message: Option<MessagePayload>,
    #[serde(default)]
    pub postback: Option<PostbackPayload>,
}

/// A single Graph webhook event, typed at the parse boundary.
#[derive(Debug, Clone)]
pub enum MetaEvent {
    Feed(FeedValue),
    InstagramComment(InstagramComment),
    InstagramMention(InstagramMention),
    /// A subscribed field the inbox does not track.
    Unsupported(String),
}

impl MetaEvent {
    /// Type one `changes[]` item.
    pub fn from_change(change: &Change) -> Result<Self, serde_json::Error> {
        Ok(match change.field.as_str() {
            "feed" => MetaEvent::Feed(FeedValue::deserialize(&change.value)?),
            "comments" | "live_comments" => {
                MetaEvent::InstagramComment(InstagramComment::deserialize(&change.value)?)
            }
            "mentions" => MetaEvent::InstagramMention(InstagramMention::deserialize(&change.value)?),
            other => MetaEvent::Unsupported(other.to_string()),
        })
    }
}
