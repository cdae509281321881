//! YouTube push notifications (PubSubHubbub Atom feeds) and Data API
//! comments.

pub mod client;
pub mod feed;
pub mod normalize;

pub use client::{YouTubeClient, DEFAULT_YOUTUBE_API};

use crate::feed::{parse_feed, FeedItem};
use crate::normalize::normalize_feed_entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use unibox_core::accounts::{AccountRegistry, ConnectedAccount};
use unibox_core::error::{HandshakeError, NormalizeError};
use unibox_core::platform::{HandshakeReply, ParsedEvent, WebhookHeaders, WebhookReceiver};
use unibox_core::signature::{verify_sha1_hex, verify_token_matches};
use unibox_core::types::PlatformType;

pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Query parameter on the callback URL naming the connected account. Hub
/// notifications carry no recipient of their own.
pub const ACCOUNT_PARAM: &str = "account";

/// `sha1=<hex HMAC-SHA1(hub secret, body)>`.
pub fn verify_youtube_signature(hub_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(provided) = header.and_then(|h| h.strip_prefix("sha1=")) else {
        return false;
    };
    verify_sha1_hex(hub_secret, body, provided)
}

pub struct YouTubeReceiver {
    verify_token: String,
    hub_secret: String,
    accounts: Arc<AccountRegistry>,
}

impl YouTubeReceiver {
    pub fn new(
        verify_token: impl Into<String>,
        hub_secret: impl Into<String>,
        accounts: Arc<AccountRegistry>,
    ) -> Self {
        Self {
            verify_token: verify_token.into(),
            hub_secret: hub_secret.into(),
            accounts,
        }
    }

    /// The account named on the callback, or the only YouTube account when
    /// there is exactly one.
    fn resolve_account(&self, query: &HashMap<String, String>) -> Option<&ConnectedAccount> {
        if let Some(id) = query.get(ACCOUNT_PARAM) {
            return self
                .accounts
                .get(id)
                .or_else(|| self.accounts.find(PlatformType::Youtube, id))
                .filter(|a| a.platform == PlatformType::Youtube);
        }
        let mut accounts = self.accounts.for_platform(PlatformType::Youtube);
        match (accounts.next(), accounts.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }
}

impl WebhookReceiver for YouTubeReceiver {
    fn platform(&self) -> PlatformType {
        PlatformType::Youtube
    }

    fn verify(&self, body: &[u8], headers: &WebhookHeaders) -> bool {
        verify_youtube_signature(&self.hub_secret, body, headers.get(SIGNATURE_HEADER))
    }

    /// Only `subscribe` intents are confirmed by echoing `hub.challenge`.
    fn handshake(&self, query: &HashMap<String, String>) -> Result<HandshakeReply, HandshakeError> {
        let mode = query.get("hub.mode").map(String::as_str);
        let (Some(mode), Some(token), Some(challenge)) =
            (mode, query.get("hub.verify_token"), query.get("hub.challenge"))
        else {
            return Err(HandshakeError::BadRequest(
                "hub.mode, hub.verify_token and hub.challenge are required".to_string(),
            ));
        };
        if mode != "subscribe" || !verify_token_matches(&self.verify_token, token) {
            return Err(HandshakeError::Forbidden);
        }
        debug!(mode, topic = ?query.get("hub.topic"), "confirming hub subscription");
        Ok(HandshakeReply::Text(challenge.clone()))
    }

    fn parse(
        &self,
        body: &[u8],
        query: &HashMap<String, String>,
    ) -> Result<Vec<ParsedEvent>, NormalizeError> {
        let xml = String::from_utf8_lossy(body);
        let items = parse_feed(&xml)?;

        let Some(account) = self.resolve_account(query) else {
            debug!(account = ?query.get(ACCOUNT_PARAM), "no connected account for hub callback");
            return Ok(items.iter().map(|_| ParsedEvent::skipped("unknown account")).collect());
        };
        let ctx = account.context();

        Ok(items
            .into_iter()
            .map(|item| match item {
                FeedItem::Entry(entry) => match normalize_feed_entry(&ctx, &entry) {
                    Some(message) => ParsedEvent::Message(message),
                    None => ParsedEvent::skipped("filtered"),
                },
                FeedItem::Deleted(_) => ParsedEvent::skipped("deleted"),
                FeedItem::Broken(err) => ParsedEvent::Malformed(err),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_core::signature::hmac_sha1_hex;
    use unibox_core::types::MessageType;

    const SECRET: &str = "hub-secret";

    fn account(id: &str, channel: &str) -> ConnectedAccount {
        ConnectedAccount {
            id: id.to_string(),
            organization_id: "org".to_string(),
            platform: PlatformType::Youtube,
            platform_account_id: channel.to_string(),
            username: None,
            access_token: None,
            business_id: None,
        }
    }

    fn receiver(accounts: Vec<ConnectedAccount>) -> YouTubeReceiver {
        YouTubeReceiver::new("verify-me", SECRET, Arc::new(AccountRegistry::new(accounts)))
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn feed(entries: &[(&str, &str)]) -> String {
        let body: String = entries
            .iter()
            .map(|(video, channel)| {
                format!(
                    "<entry><yt:videoId>{video}</yt:videoId><yt:channelId>{channel}</yt:channelId>\
                     <title>video {video}</title><published>2024-05-01T10:00:00+00:00</published></entry>"
                )
            })
            .collect();
        format!(r#"<feed xmlns="http://www.w3.org/2005/Atom">{body}</feed>"#)
    }

    #[test]
    fn sha1_signature() {
        let body = feed(&[("v1", "UC_other")]);
        let digest = hmac_sha1_hex(SECRET, body.as_bytes()).unwrap();
        let r = receiver(vec![]);
        assert!(r.verify(body.as_bytes(), &WebhookHeaders::new().with(SIGNATURE_HEADER, format!("sha1={digest}"))));
        assert!(!r.verify(body.as_bytes(), &WebhookHeaders::new().with(SIGNATURE_HEADER, digest)));
        assert!(!r.verify(body.as_bytes(), &WebhookHeaders::new()));
    }

    #[test]
    fn hub_handshake_modes() {
        let r = receiver(vec![]);
        let ok = query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", "https://www.youtube.com/xml/feeds/videos.xml?channel_id=UC_self"),
            ("hub.verify_token", "verify-me"),
            ("hub.challenge", "c-42"),
        ]);
        assert_eq!(r.handshake(&ok), Ok(HandshakeReply::Text("c-42".into())));

        let unsubscribe = query(&[
            ("hub.mode", "unsubscribe"),
            ("hub.verify_token", "verify-me"),
            ("hub.challenge", "c-43"),
        ]);
        assert_eq!(r.handshake(&unsubscribe), Err(HandshakeError::Forbidden));

        let wrong = query(&[("hub.mode", "subscribe"), ("hub.verify_token", "nope"), ("hub.challenge", "c")]);
        assert_eq!(r.handshake(&wrong), Err(HandshakeError::Forbidden));

        let partial = query(&[("hub.mode", "subscribe")]);
        assert!(matches!(r.handshake(&partial), Err(HandshakeError::BadRequest(_))));
    }

    #[test]
    fn routes_by_account_query() {
        let r = receiver(vec![account("yt-a", "UC_a"), account("yt-b", "UC_b")]);
        let body = feed(&[("v1", "UC_other"), ("v2", "UC_b")]);

        let events = r.parse(body.as_bytes(), &query(&[("account", "yt-b")])).unwrap();
        let ParsedEvent::Message(msg) = &events[0] else {
            panic!("expected mention, got {:?}", events[0]);
        };
        assert_eq!(msg.account_id, "yt-b");
        assert_eq!(msg.message_type, MessageType::Mention);
        assert!(matches!(events[1], ParsedEvent::Skipped { reason: "filtered" }));

        // Ambiguous without the query parameter.
        let events = r.parse(body.as_bytes(), &HashMap::new()).unwrap();
        assert!(events.iter().all(|e| matches!(e, ParsedEvent::Skipped { reason: "unknown account" })));
    }

    #[test]
    fn single_account_is_the_default_route() {
        let r = receiver(vec![account("yt-a", "UC_a")]);
        let events = r.parse(feed(&[("v1", "UC_other")]).as_bytes(), &HashMap::new()).unwrap();
        assert!(matches!(&events[0], ParsedEvent::Message(m) if m.account_id == "yt-a"));
    }

    #[test]
    fn non_feed_body_is_an_envelope_error() {
        let r = receiver(vec![account("yt-a", "UC_a")]);
        assert!(r.parse(b"not xml", &HashMap::new()).is_err());
    }
}
