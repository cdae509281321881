use crate::events::{DirectMessageEvent, Envelope, FavoriteEvent, FollowEvent, Tweet, TwitterEvent};
use crate::normalize::{normalize_direct_message, normalize_favorite, normalize_follow, normalize_tweet};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use unibox_core::accounts::{AccountContext, AccountRegistry};
use unibox_core::error::{HandshakeError, NormalizeError};
use unibox_core::platform::{
    parse_json_body, typed_event, HandshakeReply, ParsedEvent, WebhookHeaders, WebhookReceiver,
};
use unibox_core::signature::{hmac_sha256_base64, verify_sha256_base64};
use unibox_core::types::PlatformType;

pub const SIGNATURE_HEADER: &str = "x-twitter-webhooks-signature";

/// `sha256=<base64 HMAC-SHA256(consumer secret, body)>`.
pub fn verify_twitter_signature(consumer_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(provided) = header.and_then(|h| h.strip_prefix("sha256=")) else {
        return false;
    };
    verify_sha256_base64(consumer_secret, &[body], provided)
}

/// Challenge-response check answer for a `crc_token`.
pub fn crc_response(consumer_secret: &str, crc_token: &str) -> Option<String> {
    hmac_sha256_base64(consumer_secret, &[crc_token.as_bytes()]).map(|digest| format!("sha256={digest}"))
}

pub struct TwitterReceiver {
    consumer_secret: String,
    accounts: Arc<AccountRegistry>,
}

impl TwitterReceiver {
    pub fn new(consumer_secret: impl Into<String>, accounts: Arc<AccountRegistry>) -> Self {
        Self {
            consumer_secret: consumer_secret.into(),
            accounts,
        }
    }

    fn parse_event(ctx: &AccountContext<'_>, envelope: &Envelope, event: TwitterEvent) -> ParsedEvent {
        let result = match &event {
            TwitterEvent::Tweet(tweet) => normalize_tweet(ctx, tweet),
            TwitterEvent::DirectMessage(dm) => normalize_direct_message(ctx, dm, &envelope.users),
            TwitterEvent::Favorite(favorite) => normalize_favorite(ctx, favorite),
            TwitterEvent::Follow(follow) => normalize_follow(ctx, follow),
        };
        ParsedEvent::from_result(result, "filtered")
    }
}

fn typed<T, F>(raw: &Value, wrap: F) -> Result<TwitterEvent, NormalizeError>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> TwitterEvent,
{
    typed_event::<T>(raw).map(wrap)
}

impl WebhookReceiver for TwitterReceiver {
    fn platform(&self) -> PlatformType {
        PlatformType::Twitter
    }

    fn verify(&self, body: &[u8], headers: &WebhookHeaders) -> bool {
        verify_twitter_signature(&self.consumer_secret, body, headers.get(SIGNATURE_HEADER))
    }

    fn handshake(&self, query: &HashMap<String, String>) -> Result<HandshakeReply, HandshakeError> {
        let token = query
            .get("crc_token")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| HandshakeError::BadRequest("crc_token is required".to_string()))?;
        let response_token = crc_response(&self.consumer_secret, token)
            .ok_or_else(|| HandshakeError::BadRequest("unable to sign crc_token".to_string()))?;
        Ok(HandshakeReply::Json(json!({ "response_token": response_token })))
    }

    fn parse(
        &self,
        body: &[u8],
        _query: &HashMap<String, String>,
    ) -> Result<Vec<ParsedEvent>, NormalizeError> {
        let raw = parse_json_body(body)?;
        let envelope: Envelope = typed_event(&raw)?;

        let typed_events = envelope
            .tweet_create_events
            .iter()
            .map(|raw| (raw, typed::<Tweet, _>(raw, TwitterEvent::Tweet)))
            .chain(
                envelope
                    .direct_message_events
                    .iter()
                    .map(|raw| (raw, typed::<DirectMessageEvent, _>(raw, TwitterEvent::DirectMessage))),
            )
            .chain(
                envelope
                    .favorite_events
                    .iter()
                    .map(|raw| (raw, typed::<FavoriteEvent, _>(raw, TwitterEvent::Favorite))),
            )
            .chain(
                envelope
                    .follow_events
                    .iter()
                    .map(|raw| (raw, typed::<FollowEvent, _>(raw, TwitterEvent::Follow))),
            );

        let Some(account) = self.accounts.find(PlatformType::Twitter, &envelope.for_user_id) else {
            debug!(for_user_id = %envelope.for_user_id, "no connected account for subscription");
            return Ok(typed_events.map(|_| ParsedEvent::skipped("unknown account")).collect());
        };
        let ctx = account.context();

        Ok(typed_events
            .map(|(raw, event)| match event {
                Ok(event) => match Self::parse_event(&ctx, &envelope, event) {
                    ParsedEvent::Malformed(err) => ParsedEvent::Malformed(err.with_raw(raw)),
                    other => other,
                },
                Err(err) => ParsedEvent::Malformed(err),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_core::accounts::ConnectedAccount;
    use unibox_core::types::{AttachmentKind, MessageType, NewMessage};

    const SECRET: &str = "consumer-secret";
    const ACCOUNT: &str = "2244994945";

    fn receiver() -> TwitterReceiver {
        let registry = AccountRegistry::new([ConnectedAccount {
            id: "tw-main".to_string(),
            organization_id: "org-1".to_string(),
            platform: PlatformType::Twitter,
            platform_account_id: ACCOUNT.to_string(),
            username: Some("acme".to_string()),
            access_token: Some("bearer".to_string()),
            business_id: None,
        }]);
        TwitterReceiver::new(SECRET, Arc::new(registry))
    }

    fn parse(body: Value) -> Vec<ParsedEvent> {
        receiver().parse(body.to_string().as_bytes(), &HashMap::new()).unwrap()
    }

    fn messages(events: Vec<ParsedEvent>) -> Vec<NewMessage> {
        events
            .into_iter()
            .filter_map(|e| match e {
                ParsedEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn tweet(extra: Value) -> Value {
        let mut tweet = json!({
            "id_str": "1001",
            "text": "@acme my order is late",
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "user": { "id_str": "42", "name": "Ann", "screen_name": "ann", "verified": false, "followers_count": 12 },
            "entities": { "user_mentions": [] }
        });
        if let (Some(base), Some(extra)) = (tweet.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        json!({ "for_user_id": ACCOUNT, "tweet_create_events": [tweet] })
    }

    #[test]
    fn crc_handshake_signs_token() {
        let query: HashMap<String, String> = [("crc_token".to_string(), "challenge".to_string())].into();
        let reply = receiver().handshake(&query).unwrap();
        let expected = crc_response(SECRET, "challenge").unwrap();
        assert_eq!(reply, HandshakeReply::Json(json!({ "response_token": expected })));
        assert!(expected.starts_with("sha256="));

        assert!(matches!(
            receiver().handshake(&HashMap::new()),
            Err(HandshakeError::BadRequest(_))
        ));
    }

    #[test]
    fn signature_is_base64_with_prefix() {
        let body = br#"{"for_user_id":"1"}"#;
        let header = format!("sha256={}", hmac_sha256_base64(SECRET, &[body]).unwrap());
        let headers = WebhookHeaders::new().with(SIGNATURE_HEADER, header);
        assert!(receiver().verify(body, &headers));
        assert!(!receiver().verify(br#"{"for_user_id":"2"}"#, &headers));
    }

    #[test]
    fn reply_to_account_is_reply() {
        let msgs = messages(parse(tweet(json!({
            "in_reply_to_user_id_str": ACCOUNT,
            "in_reply_to_status_id_str": "900"
        }))));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].message_type, MessageType::Reply);
        assert_eq!(msgs[0].parent_id.as_deref(), Some("900"));
        assert_eq!(msgs[0].sender.username, "ann");
        assert!(msgs[0].sent_at.is_some());
    }

    #[test]
    fn mention_without_reply_is_mention() {
        let msgs = messages(parse(tweet(json!({
            "entities": { "user_mentions": [{ "id_str": ACCOUNT, "screen_name": "acme" }] }
        }))));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].message_type, MessageType::Mention);
        assert_eq!(msgs[0].platform_id, "1001");
    }

    #[test]
    fn tweet_not_addressed_to_account_is_dropped() {
        let events = parse(tweet(json!({ "in_reply_to_user_id_str": "777" })));
        assert!(matches!(events.as_slice(), [ParsedEvent::Skipped { .. }]));
    }

    #[test]
    fn self_authored_tweet_is_dropped() {
        let events = parse(tweet(json!({
            "user": { "id_str": ACCOUNT, "screen_name": "acme" },
            "entities": { "user_mentions": [{ "id_str": ACCOUNT }] }
        })));
        assert!(messages(events).is_empty());
    }

    #[test]
    fn retweet_of_own_tweet_is_share() {
        let msgs = messages(parse(tweet(json!({
            "retweeted_status": { "id_str": "500", "user": { "id_str": ACCOUNT } }
        }))));
        assert_eq!(msgs[0].message_type, MessageType::Share);
        assert_eq!(msgs[0].platform_post_id.as_deref(), Some("500"));
    }

    #[test]
    fn extended_media_prefers_highest_bitrate_mp4() {
        let msgs = messages(parse(tweet(json!({
            "entities": {
                "user_mentions": [{ "id_str": ACCOUNT }],
                "media": [{ "type": "photo", "media_url_https": "https://pbs/thumb.jpg" }]
            },
            "extended_entities": { "media": [{
                "type": "video",
                "media_url_https": "https://pbs/thumb.jpg",
                "video_info": { "variants": [
                    { "content_type": "application/x-mpegURL", "url": "https://video/playlist.m3u8" },
                    { "bitrate": 832000, "content_type": "video/mp4", "url": "https://video/low.mp4" },
                    { "bitrate": 2176000, "content_type": "video/mp4", "url": "https://video/high.mp4" }
                ] }
            }] }
        }))));
        let attachments = &msgs[0].attachments;
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].kind, AttachmentKind::Video);
        assert_eq!(attachments[0].url, "https://video/high.mp4");
        assert_eq!(attachments[0].thumbnail_url.as_deref(), Some("https://pbs/thumb.jpg"));
    }

    #[test]
    fn direct_messages_favorites_and_follows() {
        let body = json!({
            "for_user_id": ACCOUNT,
            "direct_message_events": [
                { "type": "message_create", "id": "dm1", "created_timestamp": "1539202764000",
                  "message_create": { "target": { "recipient_id": ACCOUNT }, "sender_id": "42", "message_data": { "text": "hi there" } } },
                { "type": "message_create", "id": "dm2",
                  "message_create": { "target": { "recipient_id": "42" }, "sender_id": ACCOUNT, "message_data": { "text": "hello" } } }
            ],
            "users": { "42": { "id": "42", "name": "Ann", "screen_name": "ann", "verified": true } },
            "favorite_events": [
                { "id": "fav1", "timestamp_ms": 1539202764000i64, "user": { "id_str": "42", "name": "Ann" },
                  "favorited_status": { "id_str": "300", "user": { "id_str": ACCOUNT } } }
            ],
            "follow_events": [
                { "type": "follow", "created_timestamp": "1539202764000", "target": { "id": ACCOUNT }, "source": { "id": "42", "name": "Ann" } },
                { "type": "unfollow", "created_timestamp": "1539202765000", "target": { "id": ACCOUNT }, "source": { "id": "43" } }
            ]
        });
        let events = parse(body);
        assert_eq!(events.len(), 5);
        let msgs = messages(events);
        let kinds: Vec<_> = msgs.iter().map(|m| m.message_type).collect();
        assert_eq!(kinds, [MessageType::DirectMessage, MessageType::Like, MessageType::Follow]);
        assert_eq!(msgs[0].sender.verified, Some(true));
        assert_eq!(msgs[1].platform_post_id.as_deref(), Some("300"));
        assert_eq!(msgs[2].platform_id, "42:follow:1539202764000");
    }

    #[test]
    fn malformed_tweet_is_isolated() {
        let body = json!({
            "for_user_id": ACCOUNT,
            "tweet_create_events": [
                { "text": "no id or user" },
                { "id_str": "2", "text": "@acme hi", "user": { "id_str": "9" }, "entities": { "user_mentions": [{ "id_str": ACCOUNT }] } }
            ]
        });
        let events = parse(body);
        assert!(matches!(events[0], ParsedEvent::Malformed(_)));
        assert!(matches!(events[1], ParsedEvent::Message(_)));
    }
}
