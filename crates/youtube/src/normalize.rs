use crate::feed::FeedEntry;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use unibox_core::accounts::AccountContext;
use unibox_core::error::NormalizeError;
use unibox_core::platform::parse_timestamp_str;
use unibox_core::types::{
    Attachment, AttachmentKind, EngagementMetrics, MessageType, NewMessage, PlatformType, Sender,
};

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid url regex"));

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelRef {
    #[serde(default)]
    pub value: String,
}

/// `snippet` of a Data API `comment` resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentSnippet {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub text_display: Option<String>,
    #[serde(default)]
    pub text_original: Option<String>,
    #[serde(default)]
    pub author_display_name: Option<String>,
    #[serde(default)]
    pub author_profile_image_url: Option<String>,
    #[serde(default)]
    pub author_channel_id: Option<ChannelRef>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub snippet: CommentSnippet,
}

/// Links found in the raw comment text. The Data API never returns native
/// attachments for comments.
pub fn text_links(text: &str) -> Vec<Attachment> {
    let mut links: Vec<Attachment> = Vec::new();
    for found in URL.find_iter(text) {
        let url = found.as_str().trim_end_matches(['.', ',', '!', '?', ';', ':']);
        if !links.iter().any(|l| l.url == url) {
            links.push(Attachment::new(AttachmentKind::Link, url));
        }
    }
    links
}

/// Normalize a comment fetched from the Data API. `reply_count` comes from
/// the enclosing comment thread, when there is one.
pub fn normalize_comment(
    ctx: &AccountContext<'_>,
    comment: &Comment,
    reply_count: Option<u64>,
) -> Result<Option<NewMessage>, NormalizeError> {
    let snippet = &comment.snippet;
    let author = snippet
        .author_channel_id
        .as_ref()
        .map(|c| c.value.clone())
        .unwrap_or_default();
    if ctx.is_self(&author) {
        return Ok(None);
    }
    let video_id = snippet
        .video_id
        .as_deref()
        .ok_or_else(|| NormalizeError::missing("snippet.videoId"))?;

    let mut sender = Sender::new(author).with_name(snippet.author_display_name.clone().unwrap_or_default());
    sender.profile_picture = snippet.author_profile_image_url.clone();

    let message_type = if snippet.parent_id.is_some() {
        MessageType::Reply
    } else {
        MessageType::Comment
    };
    // textDisplay may be HTML; links are scanned in the original text.
    let original = snippet
        .text_original
        .as_deref()
        .or(snippet.text_display.as_deref())
        .unwrap_or_default();

    let mut message = NewMessage::new(PlatformType::Youtube, &comment.id, ctx.account_id, message_type, sender)
        .with_content(original)
        .with_post(video_id)
        .with_sent_at(snippet.published_at.as_deref().and_then(parse_timestamp_str))
        .with_metrics(EngagementMetrics {
            likes: snippet.like_count,
            replies: reply_count,
            shares: None,
        });
    if let Some(parent) = &snippet.parent_id {
        message = message.with_parent(parent);
    }
    for link in text_links(original) {
        message = message.add_attachment(link);
    }
    Ok(Some(message))
}

/// A feed notification about a video. Uploads by the connected channel are
/// its own activity; videos from other channels reaching this callback are
/// mentions of the account.
pub fn normalize_feed_entry(ctx: &AccountContext<'_>, entry: &FeedEntry) -> Option<NewMessage> {
    if ctx.is_self(&entry.channel_id) {
        return None;
    }
    let mut sender = Sender::new(&entry.channel_id);
    if let Some(name) = &entry.author_name {
        sender = sender.with_name(name);
    }
    let mut message = NewMessage::new(
        PlatformType::Youtube,
        &entry.video_id,
        ctx.account_id,
        MessageType::Mention,
        sender,
    )
    .with_content(entry.title.clone().unwrap_or_default())
    .with_post(&entry.video_id)
    .with_sent_at(
        entry
            .published
            .as_deref()
            .or(entry.updated.as_deref())
            .and_then(parse_timestamp_str),
    );
    if let Some(link) = &entry.link {
        message = message.add_attachment(Attachment::new(AttachmentKind::Video, link));
    }
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> AccountContext<'static> {
        AccountContext {
            account_id: "yt-main",
            platform_account_id: "UC_self",
            username: None,
        }
    }

    fn comment(value: serde_json::Value) -> Comment {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn comment_links_come_from_original_text() {
        let c = comment(json!({
            "id": "Ugx1",
            "snippet": {
                "videoId": "vid1",
                "textDisplay": "see <a href=\"https://example.com/a\">https://example.com/a</a>",
                "textOriginal": "see https://example.com/a, and http://b.example/x?y=1.",
                "authorDisplayName": "Viewer",
                "authorChannelId": { "value": "UC_viewer" },
                "likeCount": 3,
                "publishedAt": "2024-01-02T03:04:05Z"
            }
        }));
        let msg = normalize_comment(&ctx(), &c, Some(2)).unwrap().unwrap();
        assert_eq!(msg.message_type, MessageType::Comment);
        assert_eq!(msg.platform_post_id.as_deref(), Some("vid1"));
        let urls: Vec<&str> = msg.attachments.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, ["https://example.com/a", "http://b.example/x?y=1"]);
        assert_eq!(msg.metrics.as_ref().and_then(|m| m.replies), Some(2));
        assert!(msg.sent_at.is_some());
    }

    #[test]
    fn replies_and_own_comments() {
        let reply = comment(json!({
            "id": "Ugx1.r1",
            "snippet": { "videoId": "vid1", "parentId": "Ugx1", "textOriginal": "agreed",
                         "authorChannelId": { "value": "UC_viewer" } }
        }));
        let msg = normalize_comment(&ctx(), &reply, None).unwrap().unwrap();
        assert_eq!(msg.message_type, MessageType::Reply);
        assert_eq!(msg.parent_id.as_deref(), Some("Ugx1"));

        let own = comment(json!({
            "id": "Ugx2",
            "snippet": { "videoId": "vid1", "authorChannelId": { "value": "UC_self" } }
        }));
        assert!(normalize_comment(&ctx(), &own, None).unwrap().is_none());
    }

    #[test]
    fn comment_without_video_is_malformed() {
        let c = comment(json!({ "id": "Ugx3", "snippet": { "authorChannelId": { "value": "UC_x" } } }));
        assert!(normalize_comment(&ctx(), &c, None).is_err());
    }

    #[test]
    fn feed_entries_from_other_channels_are_mentions() {
        let entry = FeedEntry {
            video_id: "v9".into(),
            channel_id: "UC_other".into(),
            title: Some("Reacting to UC_self".into()),
            author_name: Some("Other".into()),
            published: Some("2015-03-06T21:40:57+00:00".into()),
            ..Default::default()
        };
        let msg = normalize_feed_entry(&ctx(), &entry).unwrap();
        assert_eq!(msg.message_type, MessageType::Mention);
        assert_eq!(msg.platform_id, "v9");
        assert_eq!(msg.sender.name, "Other");

        let own = FeedEntry {
            channel_id: "UC_self".into(),
            ..entry
        };
        assert!(normalize_feed_entry(&ctx(), &own).is_none());
    }
}
