use crate::events::{FeedValue, GraphUser, InstagramComment, MediaRef};
use crate::normalize::{normalize_feed, normalize_instagram_comment};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use unibox_core::accounts::ConnectedAccount;
use unibox_core::error::ProviderError;
use unibox_core::outbound::{response_id, send_with_retry, send_write_with_retry, RetryPolicy};
use unibox_core::platform::{parse_timestamp, reply_anchor, require_token, BackfillWindow, PlatformClient};
use unibox_core::types::{InboxMessage, MessageType, NewMessage, PlatformType};

pub const DEFAULT_GRAPH_API: &str = "https://graph.facebook.com/v20.0";

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GraphComment {
    id: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    from: Option<GraphUser>,
    #[serde(default)]
    created_time: Option<Value>,
    #[serde(default)]
    parent: Option<PostRef>,
}

#[derive(Debug, Deserialize)]
struct GraphMedia {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GraphIgComment {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    from: Option<GraphUser>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    parent_id: Option<String>,
}

/// Graph API client for replies and catch-up on Facebook Pages and
/// Instagram business accounts.
#[derive(Clone)]
pub struct MetaClient {
    platform: PlatformType,
    api_base: String,
    retry: RetryPolicy,
    http: Client,
}

impl MetaClient {
    pub fn new(platform: PlatformType, api_base: Option<String>) -> Self {
        Self {
            platform,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_GRAPH_API.to_string())
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

    async fn post(&self, token: &str, path: &str, body: Value) -> Result<Value, ProviderError> {
        let url = format!("{}/{}", self.api_base, path);
        send_write_with_retry(self.platform.as_str(), &self.retry, || {
            self.http.post(&url).bearer_auth(token).json(&body)
        })
        .await
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let body = send_with_retry(self.platform.as_str(), &self.retry, || {
            self.http.get(url).bearer_auth(token).query(query)
        })
        .await?;
        serde_json::from_value(body)
            .map_err(|e| ProviderError::Rejected(format!("unexpected Graph API response: {e}")))
    }

    /// Follow `paging.next` for at most `max_pages` pages.
    async fn collect_pages<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, String)],
        max_pages: usize,
    ) -> Result<Vec<T>, ProviderError> {
        let mut items = Vec::new();
        let mut page: Page<T> = self
            .get(token, &format!("{}/{}", self.api_base, path), query)
            .await?;
        for _ in 1..max_pages.max(1) {
            let next = page.paging.as_ref().and_then(|p| p.next.clone());
            items.append(&mut page.data);
            let Some(next) = next else {
                return Ok(items);
            };
            page = self.get(token, &next, &[]).await?;
        }
        items.append(&mut page.data);
        Ok(items)
    }

    async fn backfill_page(
        &self,
        account: &ConnectedAccount,
        token: &str,
        window: &BackfillWindow,
    ) -> Result<Vec<NewMessage>, ProviderError> {
        let since = window.since.timestamp().to_string();
        let posts: Vec<PostRef> = self
            .collect_pages(
                token,
                &format!("{}/feed", account.platform_account_id),
                &[("fields", "id".to_string()), ("since", since.clone()), ("limit", "25".to_string())],
                window.max_pages,
            )
            .await?;

        let ctx = account.context();
        let mut out = Vec::new();
        for post in posts {
            let comments: Page<GraphComment> = self
                .get(
                    token,
                    &format!("{}/{}/comments", self.api_base, post.id),
                    &[
                        ("fields", "id,message,from,created_time,parent{id}".to_string()),
                        ("filter", "stream".to_string()),
                        ("since", since.clone()),
                        ("limit", "100".to_string()),
                    ],
                )
                .await?;
            for comment in comments.data {
                let value = FeedValue {
                    item: "comment".to_string(),
                    verb: "add".to_string(),
                    comment_id: Some(comment.id),
                    post_id: Some(post.id.clone()),
                    parent_id: comment.parent.map(|p| p.id),
                    from: comment.from,
                    message: comment.message,
                    created_time: comment.created_time,
                    ..Default::default()
                };
                match normalize_feed(&ctx, &value) {
                    Ok(Some(message)) => out.push(message),
                    Ok(None) => {}
                    Err(err) => warn!(platform = "facebook", error = %err, "skipping backfilled comment"),
                }
            }
        }
        Ok(out)
    }

    async fn backfill_instagram(
        &self,
        account: &ConnectedAccount,
        token: &str,
        window: &BackfillWindow,
    ) -> Result<Vec<NewMessage>, ProviderError> {
        let media: Vec<GraphMedia> = self
            .collect_pages(
                token,
                &format!("{}/media", account.platform_account_id),
                &[("fields", "id".to_string()), ("limit", "25".to_string())],
                window.max_pages,
            )
            .await?;

        let ctx = account.context();
        let mut out = Vec::new();
        for item in media {
            let comments: Page<GraphIgComment> = self
                .get(
                    token,
                    &format!("{}/{}/comments", self.api_base, item.id),
                    &[
                        ("fields", "id,text,username,from,timestamp,parent_id".to_string()),
                        ("limit", "50".to_string()),
                    ],
                )
                .await?;
            for comment in comments.data {
                let at = comment.timestamp.as_ref().and_then(parse_timestamp);
                if at.is_some_and(|at| at < window.since) {
                    continue;
                }
                let from = comment.from.or_else(|| {
                    comment.username.clone().map(|username| GraphUser {
                        id: String::new(),
                        name: None,
                        username: Some(username),
                    })
                });
                let value = InstagramComment {
                    id: comment.id,
                    text: comment.text,
                    from,
                    media: Some(MediaRef {
                        id: item.id.clone(),
                        media_product_type: None,
                    }),
                    parent_id: comment.parent_id,
                    timestamp: comment.timestamp,
                };
                match normalize_instagram_comment(&ctx, &value) {
                    Ok(Some(message)) => out.push(message),
                    Ok(None) => {}
                    Err(err) => warn!(platform = "instagram", error = %err, "skipping backfilled comment"),
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl PlatformClient for MetaClient {
    fn platform(&self) -> PlatformType {
        self.platform
    }

    async fn send_reply(
        &self,
        account: &ConnectedAccount,
        message: &InboxMessage,
        content: &str,
    ) -> Result<String, ProviderError> {
        let token = require_token(account)?;
        let body = match (self.platform, message.message_type) {
            (_, MessageType::DirectMessage | MessageType::Postback) => {
                self.post(
                    token,
                    "me/messages",
                    json!({
                        "recipient": { "id": message.sender.id },
                        "messaging_type": "RESPONSE",
                        "message": { "text": content },
                    }),
                )
                .await?
            }
            (PlatformType::Instagram, MessageType::Mention) => {
                let media_id = message
                    .platform_post_id
                    .as_deref()
                    .ok_or_else(|| ProviderError::Rejected("mention has no media id".into()))?;
                let mut payload = json!({ "media_id": media_id, "message": content });
                if message.platform_id != media_id {
                    payload["comment_id"] = json!(message.platform_id);
                }
                self.post(token, &format!("{}/mentions", account.platform_account_id), payload)
                    .await?
            }
            (PlatformType::Instagram, MessageType::Comment | MessageType::Reply | MessageType::CommentUpdate) => {
                self.post(
                    token,
                    &format!("{}/replies", reply_anchor(message)),
                    json!({ "message": content }),
                )
                .await?
            }
            (_, MessageType::Comment | MessageType::Reply | MessageType::CommentUpdate | MessageType::Mention) => {
                self.post(
                    token,
                    &format!("{}/comments", reply_anchor(message)),
                    json!({ "message": content }),
                )
                .await?
            }
            (_, other) => {
                return Err(ProviderError::Rejected(format!(
                    "{other} messages cannot be replied to"
                )))
            }
        };

        let reply_id = response_id(&body, &["/id", "/message_id"])?;
        info!(platform = %self.platform, account_id = %account.id, reply_id = %reply_id, "reply delivered");
        Ok(reply_id)
    }

    async fn backfill(
        &self,
        account: &ConnectedAccount,
        window: &BackfillWindow,
    ) -> Result<Vec<NewMessage>, ProviderError> {
        let token = require_token(account)?;
        match self.platform {
            PlatformType::Instagram => self.backfill_instagram(account, token, window).await,
            _ => self.backfill_page(account, token, window).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use unibox_core::types::{Priority, Sender, Sentiment};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account(platform: PlatformType, external: &str) -> ConnectedAccount {
        ConnectedAccount {
            id: "acct".to_string(),
            organization_id: "org".to_string(),
            platform,
            platform_account_id: external.to_string(),
            username: None,
            access_token: Some("page-token".to_string()),
            business_id: None,
        }
    }

    fn inbound(platform: PlatformType, message_type: MessageType, platform_id: &str) -> InboxMessage {
        InboxMessage::from_new(
            NewMessage::new(platform, platform_id, "acct", message_type, Sender::new("u1")).with_post("p1"),
            Priority::Medium,
            Sentiment::Neutral,
        )
    }

    fn client(platform: PlatformType, server: &MockServer) -> MetaClient {
        MetaClient::new(platform, Some(server.uri())).with_retry(RetryPolicy::immediate(2))
    }

    #[tokio::test]
    async fn facebook_comment_reply_threads_under_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/c1/comments"))
            .and(header("authorization", "Bearer page-token"))
            .and(body_partial_json(json!({ "message": "Thanks Ann" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c1_r1" })))
            .expect(1)
            .mount(&server)
            .await;

        let reply_id = client(PlatformType::Facebook, &server)
            .send_reply(
                &account(PlatformType::Facebook, "page-1"),
                &inbound(PlatformType::Facebook, MessageType::Comment, "c1"),
                "Thanks Ann",
            )
            .await
            .unwrap();
        assert_eq!(reply_id, "c1_r1");
    }

    #[tokio::test]
    async fn edited_comment_reply_targets_original_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ic1/replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "r9" })))
            .expect(1)
            .mount(&server)
            .await;

        let reply_id = client(PlatformType::Instagram, &server)
            .send_reply(
                &account(PlatformType::Instagram, "ig-1"),
                &inbound(PlatformType::Instagram, MessageType::CommentUpdate, "ic1:edit:1700000000"),
                "noted",
            )
            .await
            .unwrap();
        assert_eq!(reply_id, "r9");
    }

    #[tokio::test]
    async fn direct_message_reply_uses_send_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .and(body_partial_json(json!({ "recipient": { "id": "u1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "recipient_id": "u1", "message_id": "mid.1" })))
            .mount(&server)
            .await;

        let reply_id = client(PlatformType::Facebook, &server)
            .send_reply(
                &account(PlatformType::Facebook, "page-1"),
                &inbound(PlatformType::Facebook, MessageType::DirectMessage, "m1"),
                "hi",
            )
            .await
            .unwrap();
        assert_eq!(reply_id, "mid.1");
    }

    #[tokio::test]
    async fn expired_token_is_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": { "message": "Session has expired" } })))
            .mount(&server)
            .await;

        let err = client(PlatformType::Facebook, &server)
            .send_reply(
                &account(PlatformType::Facebook, "page-1"),
                &inbound(PlatformType::Facebook, MessageType::Comment, "c1"),
                "hi",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthExpired(_)));
    }

    #[tokio::test]
    async fn reply_is_sent_once_when_graph_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/c1/comments"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(PlatformType::Facebook, &server)
            .send_reply(
                &account(PlatformType::Facebook, "page-1"),
                &inbound(PlatformType::Facebook, MessageType::Comment, "c1"),
                "Thanks Ann",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn likes_are_not_replyable() {
        let server = MockServer::start().await;
        let err = client(PlatformType::Facebook, &server)
            .send_reply(
                &account(PlatformType::Facebook, "page-1"),
                &inbound(PlatformType::Facebook, MessageType::Like, "p1:like:u1"),
                "hi",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn page_backfill_normalizes_feed_comments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page-1/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "id": "p1" }] })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "id": "c1", "message": "Nice!", "from": { "id": "u1", "name": "Ann" }, "created_time": "2024-01-02T10:00:00+0000" },
                    { "id": "c2", "message": "thanks", "from": { "id": "page-1", "name": "Acme" }, "created_time": "2024-01-02T11:00:00+0000", "parent": { "id": "c1" } }
                ]
            })))
            .mount(&server)
            .await;

        let window = BackfillWindow {
            since: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            max_pages: 2,
        };
        let messages = client(PlatformType::Facebook, &server)
            .backfill(&account(PlatformType::Facebook, "page-1"), &window)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].platform_id, "c1");
        assert_eq!(messages[0].message_type, MessageType::Comment);
        assert_eq!(messages[0].platform_post_id.as_deref(), Some("p1"));
    }
}
