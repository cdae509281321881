use crate::urn::{encode_urn, post_urn};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;
use unibox_core::accounts::ConnectedAccount;
use unibox_core::error::ProviderError;
use unibox_core::outbound::{response_id, send_write_with_retry, RetryPolicy};
use unibox_core::platform::{reply_anchor, require_token, PlatformClient};
use unibox_core::types::{InboxMessage, MessageType, PlatformType};

pub const DEFAULT_LINKEDIN_API: &str = "https://api.linkedin.com";
const LINKEDIN_VERSION: &str = "202401";

/// Comments on organization posts through the Community Management API.
/// LinkedIn has no pull source wired for catch-up, so `backfill` keeps the
/// default empty result.
#[derive(Clone)]
pub struct LinkedInClient {
    api_base: String,
    retry: RetryPolicy,
    http: Client,
}

impl LinkedInClient {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_LINKEDIN_API.to_string())
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

/// Full URN of the post a message belongs to.
fn post_urn_of(message: &InboxMessage) -> Result<String, ProviderError> {
    if let Some(urn) = message.content_id.as_deref().filter(|u| post_urn(u).is_some()) {
        return Ok(urn.to_string());
    }
    message
        .platform_post_id
        .as_deref()
        .map(|id| format!("urn:li:activity:{id}"))
        .ok_or_else(|| ProviderError::Rejected("message has no LinkedIn post".to_string()))
}

#[async_trait]
impl PlatformClient for LinkedInClient {
    fn platform(&self) -> PlatformType {
        PlatformType::Linkedin
    }

    async fn send_reply(
        &self,
        account: &ConnectedAccount,
        message: &InboxMessage,
        content: &str,
    ) -> Result<String, ProviderError> {
        let token = require_token(account)?;
        if !matches!(
            message.message_type,
            MessageType::Comment | MessageType::Reply | MessageType::CommentUpdate | MessageType::Mention
        ) {
            return Err(ProviderError::Rejected(format!(
                "{} messages cannot be replied to on LinkedIn",
                message.message_type
            )));
        }

        let object = post_urn_of(message)?;
        let mut body = json!({
            "actor": format!("urn:li:organization:{}", account.platform_account_id),
            "object": &object,
            "message": { "text": content },
        });
        // A mention on a post (no comment) is answered at the top level.
        let is_post_mention =
            message.message_type == MessageType::Mention && message.platform_post_id.as_deref() == Some(reply_anchor(message));
        if !is_post_mention {
            let kind = post_urn(&object).map(|p| p.kind).unwrap_or("activity");
            let post_id = post_urn(&object).map(|p| p.id).unwrap_or_default();
            let parent = format!("urn:li:comment:({kind}:{post_id},{})", reply_anchor(message));
            body["parentComment"] = json!(parent);
        }

        let url = format!("{}/rest/socialActions/{}/comments", self.api_base, encode_urn(&object));
        let response = send_write_with_retry("linkedin", &self.retry, || {
            self.http
                .post(&url)
                .bearer_auth(token)
                .header("LinkedIn-Version", LINKEDIN_VERSION)
                .header("X-Restli-Protocol-Version", "2.0.0")
                .json(&body)
        })
        .await?;

        let reply_id = response_id(&response, &["/commentUrn", "/$URN", "/id"])?;
        info!(platform = "linkedin", account_id = %account.id, reply_id = %reply_id, "reply delivered");
        Ok(reply_id)
    }
}
