use crate::events::{FeedValue, GraphUser, InstagramComment, InstagramMention, MessagingEvent};
use serde_json::Value;
use unibox_core::accounts::AccountContext;
use unibox_core::error::NormalizeError;
use unibox_core::platform::{edit_platform_id, parse_timestamp};
use unibox_core::types::{Attachment, AttachmentKind, MessageType, NewMessage, PlatformType, Sender};

type Normalized = Result<Option<NewMessage>, NormalizeError>;

fn sender_of(user: &GraphUser) -> Sender {
    let mut sender = Sender::new(&user.id);
    if let Some(name) = &user.name {
        sender = sender.with_name(name);
    }
    if let Some(username) = &user.username {
        sender = sender.with_username(username);
    }
    sender
}

fn raw_time(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn feed_attachments(value: &FeedValue) -> Vec<Attachment> {
    let mut out = Vec::new();
    if let Some(url) = &value.photo {
        out.push(Attachment::new(AttachmentKind::Image, url));
    }
    if let Some(url) = &value.video {
        out.push(Attachment::new(AttachmentKind::Video, url));
    }
    if let Some(url) = &value.link {
        out.push(Attachment::new(AttachmentKind::Link, url));
    }
    out
}

/// Page `feed` change.
///
/// Comments become `comment` (or `reply` when nested under another comment),
/// edits become `comment_update`, reactions `like`, reshares `share`, and
/// posts by visitors on the page `mention`. Anything authored by the page
/// itself is dropped.
pub fn normalize_feed(ctx: &AccountContext<'_>, value: &FeedValue) -> Normalized {
    if let Some(from) = &value.from {
        if ctx.is_self(&from.id) {
            return Ok(None);
        }
    }
    let sender = value.from.as_ref().map(sender_of).unwrap_or_default();
    let sent_at = value.created_time.as_ref().and_then(parse_timestamp);
    let verb = value.verb.as_str();

    let message = match (value.item.as_str(), verb) {
        ("comment", "add" | "edited") => {
            let comment_id = value
                .comment_id
                .as_deref()
                .ok_or_else(|| NormalizeError::missing("comment_id"))?;
            let post_id = value
                .post_id
                .as_deref()
                .ok_or_else(|| NormalizeError::missing("post_id"))?;
            let nested_parent = value.parent_id.as_deref().filter(|p| *p != post_id);

            let (platform_id, message_type) = if verb == "edited" {
                let edited_at = value
                    .created_time
                    .as_ref()
                    .and_then(raw_time)
                    .ok_or_else(|| NormalizeError::missing("created_time"))?;
                (edit_platform_id(comment_id, &edited_at), MessageType::CommentUpdate)
            } else if nested_parent.is_some() {
                (comment_id.to_string(), MessageType::Reply)
            } else {
                (comment_id.to_string(), MessageType::Comment)
            };

            let mut msg = NewMessage::new(
                PlatformType::Facebook,
                platform_id,
                ctx.account_id,
                message_type,
                sender,
            )
            .with_content(value.message.clone().unwrap_or_default())
            .with_post(post_id);
            if let Some(parent) = nested_parent {
                msg = msg.with_parent(parent);
            }
            msg
        }
        ("reaction" | "like", "add") => {
            let from = value.from.as_ref().ok_or_else(|| NormalizeError::missing("from"))?;
            let (target, noun) = match (&value.comment_id, &value.post_id) {
                (Some(comment), _) => (comment.as_str(), "comment"),
                (None, Some(post)) => (post.as_str(), "post"),
                (None, None) => return Err(NormalizeError::missing("post_id")),
            };
            let reaction = value.reaction_type.as_deref().unwrap_or("like");
            let mut msg = NewMessage::new(
                PlatformType::Facebook,
                format!("{target}:like:{}", from.id),
                ctx.account_id,
                MessageType::Like,
                sender,
            )
            .with_content(format!("{} reacted ({reaction}) to a {noun}", from_label(from)));
            if let Some(post) = &value.post_id {
                msg = msg.with_post(post);
            }
            msg
        }
        ("share", "add") => {
            let from = value.from.as_ref().ok_or_else(|| NormalizeError::missing("from"))?;
            let post_id = value
                .post_id
                .as_deref()
                .ok_or_else(|| NormalizeError::missing("post_id"))?;
            let content = value
                .message
                .clone()
                .unwrap_or_else(|| format!("{} shared your post", from_label(from)));
            NewMessage::new(
                PlatformType::Facebook,
                format!("{post_id}:share:{}", from.id),
                ctx.account_id,
                MessageType::Share,
                sender,
            )
            .with_content(content)
            .with_post(post_id)
        }
        ("status" | "post" | "photo" | "video", "add") if value.from.is_some() => {
            let post_id = value
                .post_id
                .as_deref()
                .ok_or_else(|| NormalizeError::missing("post_id"))?;
            NewMessage::new(PlatformType::Facebook, post_id, ctx.account_id, MessageType::Mention, sender)
                .with_content(value.message.clone().unwrap_or_default())
                .with_post(post_id)
        }
        _ => return Ok(None),
    };

    let mut message = message.with_sent_at(sent_at);
    message.attachments.extend(feed_attachments(value));
    Ok(Some(message))
}

fn from_label(user: &GraphUser) -> &str {
    user.name
        .as_deref()
        .or(user.username.as_deref())
        .unwrap_or(&user.id)
}

/// Instagram `comments` change. Replies carry `parent_id`.
pub fn normalize_instagram_comment(ctx: &AccountContext<'_>, comment: &InstagramComment) -> Normalized {
    if let Some(from) = &comment.from {
        let own_username = matches!(
            (ctx.username, from.username.as_deref()),
            (Some(ours), Some(theirs)) if ours.eq_ignore_ascii_case(theirs)
        );
        if ctx.is_self(&from.id) || own_username {
            return Ok(None);
        }
    }

    let message_type = if comment.parent_id.is_some() {
        MessageType::Reply
    } else {
        MessageType::Comment
    };
    let mut msg = NewMessage::new(
        PlatformType::Instagram,
        &comment.id,
        ctx.account_id,
        message_type,
        comment.from.as_ref().map(sender_of).unwrap_or_default(),
    )
    .with_content(comment.text.clone().unwrap_or_default())
    .with_sent_at(comment.timestamp.as_ref().and_then(parse_timestamp));
    if let Some(media) = &comment.media {
        msg = msg.with_post(&media.id);
    }
    if let Some(parent) = &comment.parent_id {
        msg = msg.with_parent(parent);
    }
    Ok(Some(msg))
}

/// Instagram `mentions` change. The payload names only the media (and
/// comment), never the author.
pub fn normalize_instagram_mention(ctx: &AccountContext<'_>, mention: &InstagramMention) -> Normalized {
    let (platform_id, content) = match &mention.comment_id {
        Some(comment_id) => (comment_id.as_str(), "Mentioned you in a comment"),
        None => (mention.media_id.as_str(), "Mentioned you in a caption"),
    };
    Ok(Some(
        NewMessage::new(
            PlatformType::Instagram,
            platform_id,
            ctx.account_id,
            MessageType::Mention,
            Sender::default(),
        )
        .with_content(content)
        .with_post(&mention.media_id),
    ))
}

fn attachment_kind(kind: &str) -> AttachmentKind {
    match kind {
        "image" => AttachmentKind::Image,
        "video" | "ig_reel" | "reel" => AttachmentKind::Video,
        "audio" => AttachmentKind::Audio,
        "file" => AttachmentKind::File,
        _ => AttachmentKind::Link,
    }
}

/// Messenger / Instagram Direct `messaging` item. Echoes of the account's own
/// sends, delivery receipts and read receipts produce nothing.
pub fn normalize_messaging(
    ctx: &AccountContext<'_>,
    platform: PlatformType,
    event: &MessagingEvent,
) -> Normalized {
    if ctx.is_self(&event.sender.id) {
        return Ok(None);
    }
    let sent_at = event.timestamp.as_ref().and_then(parse_timestamp);
    let sender = Sender::new(&event.sender.id);

    if let Some(postback) = &event.postback {
        let platform_id = match (&postback.mid, event.timestamp.as_ref().and_then(raw_time)) {
            (Some(mid), _) => mid.clone(),
            (None, Some(ts)) => format!("{}:{ts}:postback", event.sender.id),
            (None, None) => return Err(NormalizeError::missing("postback.mid")),
        };
        let content = postback
            .title
            .clone()
            .or_else(|| postback.payload.clone())
            .unwrap_or_default();
        return Ok(Some(
            NewMessage::new(platform, platform_id, ctx.account_id, MessageType::Postback, sender)
                .with_content(content)
                .with_sent_at(sent_at),
        ));
    }

    let Some(message) = &event.message else {
        return Ok(None);
    };
    if message.is_echo {
        return Ok(None);
    }

    let mut msg = NewMessage::new(platform, &message.mid, ctx.account_id, MessageType::DirectMessage, sender)
        .with_content(message.text.clone().unwrap_or_default())
        .with_sent_at(sent_at);
    for attachment in &message.attachments {
        let Some(payload) = &attachment.payload else {
            continue;
        };
        let Some(url) = &payload.url else {
            continue;
        };
        let mut item = Attachment::new(attachment_kind(&attachment.kind), url);
        item.title = payload.title.clone();
        msg = msg.add_attachment(item);
    }
    Ok(Some(msg))
}
