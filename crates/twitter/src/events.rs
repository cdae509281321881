//! Account Activity API payload shapes.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// The subscribed user the batch is delivered for.
    pub for_user_id: String,
    #[serde(default)]
    pub tweet_create_events: Vec<Value>,
    #[serde(default)]
    pub direct_message_events: Vec<Value>,
    #[serde(default)]
    pub favorite_events: Vec<Value>,
    #[serde(default)]
    pub follow_events: Vec<Value>,
    /// Profiles referenced by `direct_message_events`, keyed by user id.
    #[serde(default)]
    pub users: HashMap<String, DmUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwitterUser {
    pub id_str: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub profile_image_url_https: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub followers_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserMention {
    pub id_str: String,
    #[serde(default)]
    pub screen_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlEntity {
    #[serde(default)]
    pub expanded_url: Option<String>,
    #[serde(default)]
    pub display_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoVariant {
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub content_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub variants: Vec<VideoVariant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaEntity {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub media_url_https: Option<String>,
    #[serde(default)]
    pub expanded_url: Option<String>,
    #[serde(default)]
    pub video_info: Option<VideoInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub user_mentions: Vec<UserMention>,
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
    #[serde(default)]
    pub media: Vec<MediaEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtendedEntities {
    #[serde(default)]
    pub media: Vec<MediaEntity>,
}

/// Full text and entities of a tweet longer than the legacy 140 chars.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtendedTweet {
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub entities: Option<Entities>,
    #[serde(default)]
    pub extended_entities: Option<ExtendedEntities>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetweetedStatus {
    pub id_str: String,
    pub user: TwitterUser,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tweet {
    pub id_str: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    pub user: TwitterUser,
    #[serde(default)]
    pub in_reply_to_status_id_str: Option<String>,
    #[serde(default)]
    pub in_reply_to_user_id_str: Option<String>,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub extended_entities: Option<ExtendedEntities>,
    #[serde(default)]
    pub extended_tweet: Option<ExtendedTweet>,
    #[serde(default)]
    pub retweeted_status: Option<Box<RetweetedStatus>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub timestamp_ms: Option<String>,
    #[serde(default)]
    pub favorite_count: Option<u64>,
    #[serde(default)]
    pub reply_count: Option<u64>,
    #[serde(default)]
    pub retweet_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DmUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub profile_image_url_https: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub followers_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub media: Option<MediaEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachment: Option<DmAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub sender_id: String,
    pub message_data: MessageData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectMessageEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub created_timestamp: Option<String>,
    #[serde(default)]
    pub message_create: Option<MessageCreate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FavoriteEvent {
    pub id: String,
    #[serde(default)]
    pub timestamp_ms: Option<Value>,
    pub favorited_status: Tweet,
    pub user: TwitterUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowParty {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub followers_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub created_timestamp: Option<String>,
    pub target: FollowParty,
    pub source: FollowParty,
}

/// One Account Activity event, typed at the parse boundary.
#[derive(Debug, Clone)]
pub enum TwitterEvent {
    Tweet(Tweet),
    DirectMessage(DirectMessageEvent),
    Favorite(FavoriteEvent),
    Follow(FollowEvent),
}
