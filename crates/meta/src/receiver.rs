use crate::events::{Change, Entry, Envelope, MessagingEvent, MetaEvent};
use crate::normalize::{
    normalize_feed, normalize_instagram_comment, normalize_instagram_mention, normalize_messaging,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use unibox_core::accounts::{AccountContext, AccountRegistry};
use unibox_core::error::{HandshakeError, NormalizeError};
use unibox_core::platform::{
    parse_json_body, typed_event, HandshakeReply, ParsedEvent, WebhookHeaders, WebhookReceiver,
};
use unibox_core::signature::{verify_sha256_hex, verify_token_matches};
use unibox_core::types::PlatformType;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Verify a Graph API `X-Hub-Signature-256` header (`sha256=<hex>`).
pub fn verify_hub_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(provided) = header.and_then(|h| h.strip_prefix("sha256=")) else {
        return false;
    };
    verify_sha256_hex(app_secret, &[body], provided)
}

/// `hub.mode=subscribe` + matching `hub.verify_token` echoes `hub.challenge`.
pub fn hub_handshake(
    verify_token: &str,
    query: &HashMap<String, String>,
) -> Result<HandshakeReply, HandshakeError> {
    let mode = query.get("hub.mode").map(String::as_str);
    let token = query.get("hub.verify_token");
    let challenge = query.get("hub.challenge");

    match (mode, token, challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) => {
            if verify_token_matches(verify_token, token) {
                Ok(HandshakeReply::Text(challenge.clone()))
            } else {
                Err(HandshakeError::Forbidden)
            }
        }
        (Some(_), Some(_), Some(_)) => Err(HandshakeError::Forbidden),
        _ => Err(HandshakeError::BadRequest(
            "hub.mode, hub.verify_token and hub.challenge are required".to_string(),
        )),
    }
}

/// Facebook Page or Instagram webhook endpoint. Both share the Graph API
/// envelope and signing; the platform decides which `object` and fields are
/// accepted.
pub struct MetaReceiver {
    platform: PlatformType,
    app_secret: String,
    verify_token: String,
    accounts: Arc<AccountRegistry>,
}

impl MetaReceiver {
    pub fn new(
        platform: PlatformType,
        app_secret: impl Into<String>,
        verify_token: impl Into<String>,
        accounts: Arc<AccountRegistry>,
    ) -> Self {
        Self {
            platform,
            app_secret: app_secret.into(),
            verify_token: verify_token.into(),
            accounts,
        }
    }

    fn expected_object(&self) -> &'static str {
        match self.platform {
            PlatformType::Instagram => "instagram",
            _ => "page",
        }
    }

    fn parse_change(&self, ctx: &AccountContext<'_>, raw: &Value) -> ParsedEvent {
        let change: Change = match typed_event(raw) {
            Ok(change) => change,
            Err(err) => return ParsedEvent::Malformed(err),
        };
        let event = match MetaEvent::from_change(&change) {
            Ok(event) => event,
            Err(err) => return ParsedEvent::Malformed(NormalizeError::from_json(err.to_string(), raw)),
        };

        let result = match (self.platform, event) {
            (PlatformType::Facebook, MetaEvent::Feed(value)) => normalize_feed(ctx, &value),
            (PlatformType::Instagram, MetaEvent::InstagramComment(comment)) => {
                normalize_instagram_comment(ctx, &comment)
            }
            (PlatformType::Instagram, MetaEvent::InstagramMention(mention)) => {
                normalize_instagram_mention(ctx, &mention)
            }
            (_, MetaEvent::Unsupported(field)) => {
                debug!(platform = %self.platform, field = %field, "ignoring unsubscribed field");
                return ParsedEvent::skipped("unsupported field");
            }
            _ => return ParsedEvent::skipped("unsupported field"),
        };
        ParsedEvent::from_result(result.map_err(|e| e.with_raw(raw)), "filtered")
    }

    fn parse_messaging(&self, ctx: &AccountContext<'_>, raw: &Value) -> ParsedEvent {
        let event: MessagingEvent = match typed_event(raw) {
            Ok(event) => event,
            Err(err) => return ParsedEvent::Malformed(err),
        };
        let result = normalize_messaging(ctx, self.platform, &event);
        ParsedEvent::from_result(result.map_err(|e| e.with_raw(raw)), "filtered")
    }
}

impl WebhookReceiver for MetaReceiver {
    fn platform(&self) -> PlatformType {
        self.platform
    }

    fn verify(&self, body: &[u8], headers: &WebhookHeaders) -> bool {
        verify_hub_signature(&self.app_secret, body, headers.get(SIGNATURE_HEADER))
    }

    fn handshake(&self, query: &HashMap<String, String>) -> Result<HandshakeReply, HandshakeError> {
        hub_handshake(&self.verify_token, query)
    }

    fn parse(
        &self,
        body: &[u8],
        _query: &HashMap<String, String>,
    ) -> Result<Vec<ParsedEvent>, NormalizeError> {
        let raw = parse_json_body(body)?;
        let envelope: Envelope = typed_event(&raw)?;
        if envelope.object != self.expected_object() {
            return Err(NormalizeError::from_json(
                format!("unexpected object `{}`", envelope.object),
                &raw,
            ));
        }

        let mut events = Vec::new();
        for raw_entry in &envelope.entry {
            let entry: Entry = match typed_event(raw_entry) {
                Ok(entry) => entry,
                Err(err) => {
                    events.push(ParsedEvent::Malformed(err));
                    continue;
                }
            };
            let Some(account) = self.accounts.find(self.platform, &entry.id) else {
                debug!(platform = %self.platform, entry_id = %entry.id, "no connected account for entry");
                let count = (entry.changes.len() + entry.messaging.len()).max(1);
                events.extend((0..count).map(|_| ParsedEvent::skipped("unknown account")));
                continue;
            };
            let ctx = account.context();
            for change in &entry.changes {
                events.push(self.parse_change(&ctx, change));
            }
            for item in &entry.messaging {
                events.push(self.parse_messaging(&ctx, item));
            }
        }
        Ok(events)
    }
}
