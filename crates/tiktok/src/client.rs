use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;
use unibox_core::accounts::ConnectedAccount;
use unibox_core::error::ProviderError;
use unibox_core::outbound::{response_id, send_write_with_retry, RetryPolicy};
use unibox_core::platform::{reply_anchor, require_token, PlatformClient};
use unibox_core::types::{InboxMessage, MessageType, PlatformType};

pub const DEFAULT_TIKTOK_API: &str = "https://business-api.tiktok.com";

/// Business API codes for missing, invalid or expired access tokens.
const TOKEN_ERROR_CODES: std::ops::RangeInclusive<i64> = 40100..=40105;

/// Comment replies through the TikTok Business API. TikTok has no reply
/// surface for direct messages, and no pull source for catch-up.
#[derive(Clone)]
pub struct TikTokClient {
    api_base: String,
    retry: RetryPolicy,
    http: Client,
}

impl TikTokClient {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_TIKTOK_API.to_string())
                .trim_end_matches('/')
                .to_string(),
            retry: RetryPolicy::default(),
            http: Client::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// The Business API answers HTTP 200 with an application-level `code`.
fn check_code(body: &Value) -> Result<(), ProviderError> {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    if TOKEN_ERROR_CODES.contains(&code) {
        Err(ProviderError::AuthExpired(format!("{code}: {message}")))
    } else {
        Err(ProviderError::Rejected(format!("{code}: {message}")))
    }
}

#[async_trait]
impl PlatformClient for TikTokClient {
    fn platform(&self) -> PlatformType {
        PlatformType::Tiktok
    }

    async fn send_reply(
        &self,
        account: &ConnectedAccount,
        message: &InboxMessage,
        content: &str,
    ) -> Result<String, ProviderError> {
        let token = require_token(account)?;
        let video_id = message
            .platform_post_id
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("message has no TikTok video".to_string()))?;
        let business_id = account
            .business_id
            .as_deref()
            .unwrap_or(&account.platform_account_id);

        let anchor = reply_anchor(message);
        let (path, body) = match message.message_type {
            // A mention of the account on a video is answered with a new
            // top-level comment.
            MessageType::Mention if anchor == video_id => (
                "comment/create/",
                json!({ "business_id": business_id, "video_id": video_id, "text": content }),
            ),
            MessageType::Comment | MessageType::Reply | MessageType::CommentUpdate | MessageType::Mention => (
                "comment/reply/create/",
                json!({
                    "business_id": business_id,
                    "video_id": video_id,
                    "comment_id": anchor,
                    "text": content,
                }),
            ),
            other => {
                return Err(ProviderError::Rejected(format!(
                    "{other} messages cannot be replied to on TikTok"
                )))
            }
        };

        let url = format!("{}/open_api/v1.3/business/{path}", self.api_base);
        let response = send_write_with_retry("tiktok", &self.retry, || {
            self.http.post(&url).header("Access-Token", token).json(&body)
        })
        .await?;
        check_code(&response)?;

        let reply_id = response_id(&response, &["/data/comment_id", "/data/id"])?;
        info!(platform = "tiktok", account_id = %account.id, reply_id = %reply_id, "reply delivered");
        Ok(reply_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_core::types::{NewMessage, Priority, Sender, Sentiment};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account() -> ConnectedAccount {
        ConnectedAccount {
            id: "tt-main".to_string(),
            organization_id: "org".to_string(),
            platform: PlatformType::Tiktok,
            platform_account_id: "open-1".to_string(),
            username: None,
            access_token: Some("tt-token".to_string()),
            business_id: Some("biz-1".to_string()),
        }
    }

    fn message(platform_id: &str, message_type: MessageType) -> InboxMessage {
        let new = NewMessage::new(PlatformType::Tiktok, platform_id, "tt-main", message_type, Sender::new("fan"))
            .with_post("v1");
        InboxMessage::from_new(new, Priority::Medium, Sentiment::Neutral)
    }

    #[tokio::test]
    async fn replies_to_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open_api/v1.3/business/comment/reply/create/"))
            .and(header("Access-Token", "tt-token"))
            .and(body_partial_json(json!({
                "business_id": "biz-1",
                "video_id": "v1",
                "comment_id": "tc1",
                "text": "thank you"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "message": "OK",
                "data": { "comment_id": "tc9" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TikTokClient::new(Some(server.uri())).with_retry(RetryPolicy::immediate(1));
        let id = client
            .send_reply(&account(), &message("tc1:edit:1700000000", MessageType::CommentUpdate), "thank you")
            .await
            .unwrap();
        assert_eq!(id, "tc9");
    }

    #[tokio::test]
    async fn video_mention_gets_top_level_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open_api/v1.3/business/comment/create/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": { "comment_id": "tc10" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TikTokClient::new(Some(server.uri())).with_retry(RetryPolicy::immediate(1));
        let id = client
            .send_reply(&account(), &message("v1", MessageType::Mention), "hey")
            .await
            .unwrap();
        assert_eq!(id, "tc10");
    }

    #[tokio::test]
    async fn application_codes_map_to_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 40105,
                "message": "access token has expired"
            })))
            .mount(&server)
            .await;

        let client = TikTokClient::new(Some(server.uri())).with_retry(RetryPolicy::immediate(1));
        let err = client
            .send_reply(&account(), &message("tc1", MessageType::Comment), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthExpired(_)));

        assert!(matches!(
            check_code(&json!({ "code": 40002, "message": "comment closed" })),
            Err(ProviderError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn direct_messages_are_rejected() {
        let client = TikTokClient::new(Some("http://127.0.0.1:9".to_string()));
        let err = client
            .send_reply(&account(), &message("dm1", MessageType::DirectMessage), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }
}
