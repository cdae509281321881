use crate::events::{
    DirectMessageEvent, DmUser, FavoriteEvent, FollowEvent, FollowParty, MediaEntity, Tweet, TwitterUser,
};
use std::collections::HashMap;
use unibox_core::accounts::AccountContext;
use unibox_core::error::NormalizeError;
use unibox_core::platform::{parse_timestamp, parse_timestamp_str};
use unibox_core::types::{
    Attachment, AttachmentKind, EngagementMetrics, MessageType, NewMessage, PlatformType, Sender,
};

type Normalized = Result<Option<NewMessage>, NormalizeError>;

fn sender_of(user: &TwitterUser) -> Sender {
    Sender {
        id: user.id_str.clone(),
        name: user.name.clone().unwrap_or_default(),
        username: user.screen_name.clone().unwrap_or_default(),
        profile_picture: user.profile_image_url_https.clone(),
        verified: user.verified,
        follower_count: user.followers_count,
    }
}

fn dm_sender(id: &str, profile: Option<&DmUser>) -> Sender {
    match profile {
        Some(user) => Sender {
            id: id.to_string(),
            name: user.name.clone().unwrap_or_default(),
            username: user.screen_name.clone().unwrap_or_default(),
            profile_picture: user.profile_image_url_https.clone(),
            verified: user.verified,
            follower_count: user.followers_count,
        },
        None => Sender::new(id),
    }
}

fn follow_sender(party: &FollowParty) -> Sender {
    Sender {
        id: party.id.clone(),
        name: party.name.clone().unwrap_or_default(),
        username: party.screen_name.clone().unwrap_or_default(),
        profile_picture: None,
        verified: party.verified,
        follower_count: party.followers_count,
    }
}

/// Playable URL for a video or animated GIF: the highest-bitrate mp4 variant.
pub fn best_video_variant(media: &MediaEntity) -> Option<&str> {
    media
        .video_info
        .as_ref()?
        .variants
        .iter()
        .filter(|v| v.content_type == "video/mp4")
        .max_by_key(|v| v.bitrate.unwrap_or(0))
        .map(|v| v.url.as_str())
}

fn media_attachment(media: &MediaEntity) -> Option<Attachment> {
    match media.kind.as_str() {
        "video" | "animated_gif" => {
            let url = best_video_variant(media).or(media.media_url_https.as_deref())?;
            let mut attachment = Attachment::new(AttachmentKind::Video, url);
            attachment.thumbnail_url = media.media_url_https.clone();
            Some(attachment)
        }
        _ => media
            .media_url_https
            .as_deref()
            .map(|url| Attachment::new(AttachmentKind::Image, url)),
    }
}

/// Media of a tweet. `extended_entities` lists every item with video
/// variants while `entities.media` only has the first photo or a thumbnail,
/// so the extended variant wins when present.
pub fn tweet_attachments(tweet: &Tweet) -> Vec<Attachment> {
    let extended = tweet
        .extended_tweet
        .as_ref()
        .and_then(|t| t.extended_entities.as_ref())
        .or(tweet.extended_entities.as_ref());
    let entities = tweet
        .extended_tweet
        .as_ref()
        .and_then(|t| t.entities.as_ref())
        .unwrap_or(&tweet.entities);

    let media = match extended {
        Some(ext) if !ext.media.is_empty() => &ext.media,
        _ => &entities.media,
    };
    let mut out: Vec<Attachment> = media.iter().filter_map(media_attachment).collect();

    let media_links: Vec<&str> = media.iter().filter_map(|m| m.expanded_url.as_deref()).collect();
    for url in &entities.urls {
        if let Some(link) = url.expanded_url.as_deref() {
            if !media_links.contains(&link) {
                let mut attachment = Attachment::new(AttachmentKind::Link, link);
                attachment.title = url.display_url.clone();
                out.push(attachment);
            }
        }
    }
    out
}

fn tweet_text(tweet: &Tweet) -> String {
    tweet
        .extended_tweet
        .as_ref()
        .and_then(|t| t.full_text.clone())
        .or_else(|| tweet.full_text.clone())
        .or_else(|| tweet.text.clone())
        .unwrap_or_default()
}

fn mentions_account(tweet: &Tweet, ctx: &AccountContext<'_>) -> bool {
    let entities = tweet
        .extended_tweet
        .as_ref()
        .and_then(|t| t.entities.as_ref())
        .unwrap_or(&tweet.entities);
    entities.user_mentions.iter().any(|m| ctx.is_self(&m.id_str))
}

/// `tweet_create_events` item.
///
/// Self-authored tweets are dropped. A tweet answering the account becomes
/// `reply`; a retweet of one of the account's tweets becomes `share`; a
/// tweet tagging the account becomes `mention`. Anything else is not
/// addressed to the account and produces nothing.
pub fn normalize_tweet(ctx: &AccountContext<'_>, tweet: &Tweet) -> Normalized {
    if tweet.id_str.is_empty() {
        return Err(NormalizeError::missing("id_str"));
    }
    if ctx.is_self(&tweet.user.id_str) {
        return Ok(None);
    }

    let sender = sender_of(&tweet.user);
    let sent_at = tweet
        .timestamp_ms
        .as_deref()
        .and_then(parse_timestamp_str)
        .or_else(|| tweet.created_at.as_deref().and_then(parse_timestamp_str));

    let base = |message_type: MessageType, sender: Sender| {
        NewMessage::new(PlatformType::Twitter, &tweet.id_str, ctx.account_id, message_type, sender)
            .with_sent_at(sent_at)
    };

    let message = if let Some(original) = &tweet.retweeted_status {
        if !ctx.is_self(&original.user.id_str) {
            return Ok(None);
        }
        let label = sender.display_label().to_string();
        base(MessageType::Share, sender)
            .with_content(format!("{label} retweeted your Tweet"))
            .with_post(&original.id_str)
    } else if tweet
        .in_reply_to_user_id_str
        .as_deref()
        .is_some_and(|id| ctx.is_self(id))
    {
        let mut msg = base(MessageType::Reply, sender).with_content(tweet_text(tweet));
        if let Some(parent) = &tweet.in_reply_to_status_id_str {
            msg = msg.with_post(parent).with_parent(parent);
        }
        msg
    } else if mentions_account(tweet, ctx) {
        base(MessageType::Mention, sender).with_content(tweet_text(tweet))
    } else {
        return Ok(None);
    };

    let mut message = message;
    message.attachments = tweet_attachments(tweet);
    if tweet.favorite_count.is_some() || tweet.reply_count.is_some() || tweet.retweet_count.is_some() {
        message.metrics = Some(EngagementMetrics {
            likes: tweet.favorite_count,
            replies: tweet.reply_count,
            shares: tweet.retweet_count,
        });
    }
    Ok(Some(message))
}

/// `direct_message_events` item. Messages the account sent are dropped.
pub fn normalize_direct_message(
    ctx: &AccountContext<'_>,
    event: &DirectMessageEvent,
    users: &HashMap<String, DmUser>,
) -> Normalized {
    if event.kind != "message_create" {
        return Ok(None);
    }
    let create = event
        .message_create
        .as_ref()
        .ok_or_else(|| NormalizeError::missing("message_create"))?;
    if ctx.is_self(&create.sender_id) {
        return Ok(None);
    }

    let mut msg = NewMessage::new(
        PlatformType::Twitter,
        &event.id,
        ctx.account_id,
        MessageType::DirectMessage,
        dm_sender(&create.sender_id, users.get(&create.sender_id)),
    )
    .with_content(create.message_data.text.clone())
    .with_sent_at(event.created_timestamp.as_deref().and_then(parse_timestamp_str));

    if let Some(attachment) = &create.message_data.attachment {
        if let Some(item) = attachment.media.as_ref().and_then(media_attachment) {
            msg = msg.add_attachment(item);
        }
    }
    Ok(Some(msg))
}

/// `favorite_events` item: somebody liked one of the account's tweets.
pub fn normalize_favorite(ctx: &AccountContext<'_>, event: &FavoriteEvent) -> Normalized {
    if ctx.is_self(&event.user.id_str) || !ctx.is_self(&event.favorited_status.user.id_str) {
        return Ok(None);
    }
    let sender = sender_of(&event.user);
    let content = format!("{} liked your Tweet", sender.display_label());
    Ok(Some(
        NewMessage::new(PlatformType::Twitter, &event.id, ctx.account_id, MessageType::Like, sender)
            .with_content(content)
            .with_post(&event.favorited_status.id_str)
            .with_sent_at(event.timestamp_ms.as_ref().and_then(parse_timestamp)),
    ))
}

/// `follow_events` item. Only new followers of the account are kept.
pub fn normalize_follow(ctx: &AccountContext<'_>, event: &FollowEvent) -> Normalized {
    if event.kind != "follow" || !ctx.is_self(&event.target.id) || ctx.is_self(&event.source.id) {
        return Ok(None);
    }
    let at = event
        .created_timestamp
        .as_deref()
        .ok_or_else(|| NormalizeError::missing("created_timestamp"))?;
    let sender = follow_sender(&event.source);
    let content = format!("{} followed you", sender.display_label());
    Ok(Some(
        NewMessage::new(
            PlatformType::Twitter,
            format!("{}:follow:{at}", event.source.id),
            ctx.account_id,
            MessageType::Follow,
            sender,
        )
        .with_content(content)
        .with_sent_at(parse_timestamp_str(at)),
    ))
}
