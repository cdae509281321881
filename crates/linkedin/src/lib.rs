//! LinkedIn organization social-action notifications.

pub mod client;
pub mod urn;

pub use client::{LinkedInClient, DEFAULT_LINKEDIN_API};

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use unibox_core::accounts::{AccountContext, AccountRegistry};
use unibox_core::error::{HandshakeError, NormalizeError};
use unibox_core::platform::{
    edit_platform_id, parse_json_body, parse_timestamp, typed_event, HandshakeReply, ParsedEvent,
    WebhookHeaders, WebhookReceiver,
};
use unibox_core::signature::{hmac_sha256_hex, verify_sha256_hex};
use unibox_core::types::{MessageType, NewMessage, PlatformType, Sender};

pub const SIGNATURE_HEADER: &str = "x-linkedin-signature";

/// One notification. Field names follow the flattened `eventType` form;
/// aliases accept the raw `ORGANIZATION_SOCIAL_ACTION_NOTIFICATIONS` names.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialActionEvent {
    #[serde(alias = "action")]
    pub event_type: String,
    #[serde(alias = "organizationalEntity")]
    pub organization_urn: String,
    pub actor: String,
    #[serde(default)]
    pub actor_name: Option<String>,
    /// Post the action relates to.
    #[serde(default, alias = "sourcePost")]
    pub object: Option<String>,
    #[serde(default, alias = "commentUrn")]
    pub comment: Option<String>,
    #[serde(default, alias = "parentCommentUrn")]
    pub parent_comment: Option<String>,
    #[serde(default, alias = "commentText")]
    pub text: Option<String>,
    #[serde(default, alias = "lastModifiedAt")]
    pub created_at: Option<Value>,
}

/// Typed event union. LinkedIn's discriminator is `eventType`.
#[derive(Debug, Clone)]
pub enum LinkedInEvent {
    Comment(SocialActionEvent),
    CommentEdit(SocialActionEvent),
    Mention(SocialActionEvent),
    Like(SocialActionEvent),
    Share(SocialActionEvent),
    Other(String),
}

impl From<SocialActionEvent> for LinkedInEvent {
    fn from(event: SocialActionEvent) -> Self {
        match event.event_type.to_ascii_uppercase().as_str() {
            "COMMENT" => LinkedInEvent::Comment(event),
            "COMMENT_EDIT" | "COMMENT_EDITED" => LinkedInEvent::CommentEdit(event),
            "MENTION" | "SHARE_MENTION" | "COMMENT_MENTION" => LinkedInEvent::Mention(event),
            "LIKE" | "REACTION" => LinkedInEvent::Like(event),
            "SHARE" | "RESHARE" | "REPOST" => LinkedInEvent::Share(event),
            other => LinkedInEvent::Other(other.to_string()),
        }
    }
}

/// Hex HMAC-SHA256 of the body with the client secret. LinkedIn sends the
/// digest bare; a `hmacsha256=` prefix is tolerated.
pub fn verify_linkedin_signature(client_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(provided) = header else {
        return false;
    };
    let provided = provided.strip_prefix("hmacsha256=").unwrap_or(provided);
    verify_sha256_hex(client_secret, &[body], provided)
}

fn sender_of(event: &SocialActionEvent) -> Sender {
    let id = urn::person_id(&event.actor)
        .or_else(|| urn::organization_id(&event.actor))
        .unwrap_or(&event.actor);
    let mut sender = Sender::new(id);
    if let Some(name) = &event.actor_name {
        sender = sender.with_name(name);
    }
    sender
}

fn is_self(ctx: &AccountContext<'_>, event: &SocialActionEvent) -> bool {
    urn::organization_id(&event.actor).is_some_and(|id| ctx.is_self(id))
}

fn raw_time(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Attach the post: extracted id as `platform_post_id`, full URN as
/// `content_id` so replies can address the post again.
fn with_post_urn(message: NewMessage, post_urn: &str) -> NewMessage {
    let mut message = match urn::post_urn(post_urn) {
        Some(post) => message.with_post(post.id),
        None => message.with_post(post_urn),
    };
    message.content_id = Some(post_urn.to_string());
    message
}

pub fn normalize_event(ctx: &AccountContext<'_>, event: &LinkedInEvent) -> Result<Option<NewMessage>, NormalizeError> {
    let (event, message_type) = match event {
        LinkedInEvent::Comment(e) if e.parent_comment.is_some() => (e, MessageType::Reply),
        LinkedInEvent::Comment(e) => (e, MessageType::Comment),
        LinkedInEvent::CommentEdit(e) => (e, MessageType::CommentUpdate),
        LinkedInEvent::Mention(e) => (e, MessageType::Mention),
        LinkedInEvent::Like(e) => (e, MessageType::Like),
        LinkedInEvent::Share(e) => (e, MessageType::Share),
        LinkedInEvent::Other(_) => return Ok(None),
    };
    if is_self(ctx, event) {
        return Ok(None);
    }

    let sender = sender_of(event);
    let comment = event.comment.as_deref().map(|raw| {
        urn::comment_urn(raw).ok_or_else(|| NormalizeError::new(format!("unrecognized comment URN `{raw}`"), raw))
    });
    let comment = comment.transpose()?;
    let post_urn = match (&event.object, &comment) {
        (Some(object), _) => object.clone(),
        (None, Some(comment)) => comment.post_urn(),
        (None, None) => return Err(NormalizeError::missing("object")),
    };
    let post_id = urn::post_urn(&post_urn).map(|p| p.id.to_string()).unwrap_or_else(|| post_urn.clone());

    let platform_id = match message_type {
        MessageType::Comment | MessageType::Reply => comment
            .as_ref()
            .map(|c| c.comment_id.to_string())
            .ok_or_else(|| NormalizeError::missing("comment"))?,
        MessageType::CommentUpdate => {
            let comment_id = comment.as_ref().ok_or_else(|| NormalizeError::missing("comment"))?.comment_id;
            let edited_at = event
                .created_at
                .as_ref()
                .and_then(raw_time)
                .ok_or_else(|| NormalizeError::missing("createdAt"))?;
            edit_platform_id(comment_id, &edited_at)
        }
        MessageType::Mention => comment
            .as_ref()
            .map(|c| c.comment_id.to_string())
            .unwrap_or_else(|| post_id.clone()),
        MessageType::Like => format!("{post_id}:like:{}", sender.id),
        _ => format!("{post_id}:share:{}", sender.id),
    };

    let content = match message_type {
        MessageType::Like => format!("{} liked your post", sender.display_label()),
        MessageType::Share => event
            .text
            .clone()
            .unwrap_or_else(|| format!("{} reposted your post", sender.display_label())),
        _ => event.text.clone().unwrap_or_default(),
    };

    let mut message = NewMessage::new(PlatformType::Linkedin, platform_id, ctx.account_id, message_type, sender)
        .with_content(content)
        .with_sent_at(event.created_at.as_ref().and_then(parse_timestamp));
    message = with_post_urn(message, &post_urn);
    if let Some(parent) = event.parent_comment.as_deref() {
        let parent_id = urn::comment_urn(parent).map(|c| c.comment_id).unwrap_or(parent);
        message = message.with_parent(parent_id);
    }
    Ok(Some(message))
}

pub struct LinkedInReceiver {
    client_secret: String,
    accounts: Arc<AccountRegistry>,
}

impl LinkedInReceiver {
    pub fn new(client_secret: impl Into<String>, accounts: Arc<AccountRegistry>) -> Self {
        Self {
            client_secret: client_secret.into(),
            accounts,
        }
    }

    fn parse_one(&self, raw: &Value) -> ParsedEvent {
        let event: SocialActionEvent = match typed_event(raw) {
            Ok(event) => event,
            Err(err) => return ParsedEvent::Malformed(err),
        };
        let Some(org_id) = urn::organization_id(&event.organization_urn) else {
            return ParsedEvent::Malformed(NormalizeError::from_json("organization URN not recognized", raw));
        };
        let Some(account) = self.accounts.find(PlatformType::Linkedin, org_id) else {
            debug!(organization = %org_id, "no connected account for organization");
            return ParsedEvent::skipped("unknown account");
        };
        let ctx = account.context();
        let result = normalize_event(&ctx, &LinkedInEvent::from(event));
        ParsedEvent::from_result(result.map_err(|e| e.with_raw(raw)), "filtered")
    }
}

impl WebhookReceiver for LinkedInReceiver {
    fn platform(&self) -> PlatformType {
        PlatformType::Linkedin
    }

    fn verify(&self, body: &[u8], headers: &WebhookHeaders) -> bool {
        verify_linkedin_signature(&self.client_secret, body, headers.get(SIGNATURE_HEADER))
    }

    /// `challengeCode` is answered with its HMAC; a plain `challenge` is
    /// echoed back.
    fn handshake(&self, query: &HashMap<String, String>) -> Result<HandshakeReply, HandshakeError> {
        if let Some(code) = query.get("challengeCode").filter(|c| !c.is_empty()) {
            let response = hmac_sha256_hex(&self.client_secret, &[code.as_bytes()])
                .ok_or_else(|| HandshakeError::BadRequest("unable to sign challengeCode".to_string()))?;
            return Ok(HandshakeReply::Json(json!({
                "challengeCode": code,
                "challengeResponse": response,
            })));
        }
        match query.get("challenge").filter(|c| !c.is_empty()) {
            Some(challenge) => Ok(HandshakeReply::Text(challenge.clone())),
            None => Err(HandshakeError::BadRequest("challenge is required".to_string())),
        }
    }

    /// Accepts a single notification object or `{"events": [...]}`.
    fn parse(
        &self,
        body: &[u8],
        _query: &HashMap<String, String>,
    ) -> Result<Vec<ParsedEvent>, NormalizeError> {
        let raw = parse_json_body(body)?;
        match raw.get("events") {
            Some(Value::Array(items)) => Ok(items.iter().map(|item| self.parse_one(item)).collect()),
            Some(_) => Err(NormalizeError::from_json("`events` must be an array", &raw)),
            None if raw.is_object() => Ok(vec![self.parse_one(&raw)]),
            None => Err(NormalizeError::from_json("expected a JSON object", &raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_core::accounts::ConnectedAccount;

    const SECRET: &str = "li-secret";

    fn receiver() -> LinkedInReceiver {
        let registry = AccountRegistry::new([ConnectedAccount {
            id: "li-main".to_string(),
            organization_id: "org-1".to_string(),
            platform: PlatformType::Linkedin,
            platform_account_id: "2414183".to_string(),
            username: None,
            access_token: Some("token".to_string()),
            business_id: None,
        }]);
        LinkedInReceiver::new(SECRET, Arc::new(registry))
    }

    fn parse(body: Value) -> Vec<ParsedEvent> {
        receiver().parse(body.to_string().as_bytes(), &HashMap::new()).unwrap()
    }

    fn message(event: &ParsedEvent) -> &NewMessage {
        match event {
            ParsedEvent::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        }
    }

    fn comment_event(extra: Value) -> Value {
        let mut event = json!({
            "eventType": "COMMENT",
            "organizationUrn": "urn:li:organization:2414183",
            "actor": "urn:li:person:abc123",
            "actorName": "Ann Lee",
            "object": "urn:li:activity:6789",
            "comment": "urn:li:comment:(activity:6789,1234)",
            "text": "Great update",
            "createdAt": 1700000000000i64
        });
        if let (Some(base), Some(extra)) = (event.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        event
    }

    #[test]
    fn signature_is_bare_hex() {
        let body = br#"{"eventType":"COMMENT"}"#;
        let digest = hmac_sha256_hex(SECRET, &[body]).unwrap();
        assert!(receiver().verify(body, &WebhookHeaders::new().with(SIGNATURE_HEADER, digest.clone())));
        assert!(receiver().verify(
            body,
            &WebhookHeaders::new().with(SIGNATURE_HEADER, format!("hmacsha256={digest}"))
        ));
        assert!(!receiver().verify(b"{}", &WebhookHeaders::new().with(SIGNATURE_HEADER, digest)));
    }

    #[test]
    fn handshake_echoes_or_signs_challenge() {
        let echo: HashMap<String, String> = [("challenge".to_string(), "abc".to_string())].into();
        assert_eq!(receiver().handshake(&echo), Ok(HandshakeReply::Text("abc".into())));

        let code: HashMap<String, String> = [("challengeCode".to_string(), "xyz".to_string())].into();
        let expected = hmac_sha256_hex(SECRET, &[b"xyz"]).unwrap();
        assert_eq!(
            receiver().handshake(&code),
            Ok(HandshakeReply::Json(json!({ "challengeCode": "xyz", "challengeResponse": expected })))
        );

        assert!(receiver().handshake(&HashMap::new()).is_err());
    }

    #[test]
    fn comment_extracts_ids_from_urns() {
        let events = parse(comment_event(json!({})));
        let msg = message(&events[0]);
        assert_eq!(msg.message_type, MessageType::Comment);
        assert_eq!(msg.platform_id, "1234");
        assert_eq!(msg.platform_post_id.as_deref(), Some("6789"));
        assert_eq!(msg.content_id.as_deref(), Some("urn:li:activity:6789"));
        assert_eq!(msg.sender.id, "abc123");
        assert_eq!(msg.sender.name, "Ann Lee");
    }

    #[test]
    fn nested_comment_is_reply_with_parent() {
        let events = parse(comment_event(json!({
            "comment": "urn:li:comment:(activity:6789,1300)",
            "parentComment": "urn:li:comment:(activity:6789,1234)"
        })));
        let msg = message(&events[0]);
        assert_eq!(msg.message_type, MessageType::Reply);
        assert_eq!(msg.parent_id.as_deref(), Some("1234"));
    }

    #[test]
    fn organization_actor_is_self_origin() {
        let events = parse(comment_event(json!({ "actor": "urn:li:organization:2414183" })));
        assert!(matches!(events[0], ParsedEvent::Skipped { .. }));
    }

    #[test]
    fn events_array_isolates_bad_items() {
        let events = parse(json!({
            "events": [
                comment_event(json!({})),
                comment_event(json!({ "comment": "urn:li:comment:garbage" })),
                { "eventType": "LIKE" },
                comment_event(json!({ "eventType": "LIKE", "comment": null })),
                comment_event(json!({ "organizationUrn": "urn:li:organization:1" }))
            ]
        }));
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], ParsedEvent::Message(_)));
        assert!(matches!(events[1], ParsedEvent::Malformed(_)));
        assert!(matches!(events[2], ParsedEvent::Malformed(_)));
        let like = message(&events[3]);
        assert_eq!(like.message_type, MessageType::Like);
        assert_eq!(like.platform_id, "6789:like:abc123");
        assert!(matches!(events[4], ParsedEvent::Skipped { reason: "unknown account" }));
    }

    #[test]
    fn comment_edit_gets_own_platform_id() {
        let events = parse(comment_event(json!({ "eventType": "COMMENT_EDIT", "createdAt": 1700000999000i64 })));
        let msg = message(&events[0]);
        assert_eq!(msg.message_type, MessageType::CommentUpdate);
        assert_eq!(msg.platform_id, "1234:edit:1700000999000");
    }
}
