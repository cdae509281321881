use crate::normalize::{normalize_comment, Comment};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use unibox_core::accounts::ConnectedAccount;
use unibox_core::error::ProviderError;
use unibox_core::outbound::{response_id, send_with_retry, send_write_with_retry, RetryPolicy};
use unibox_core::platform::{parse_timestamp_str, reply_anchor, require_token, BackfillWindow, PlatformClient};
use unibox_core::types::{InboxMessage, MessageType, NewMessage, PlatformType};

pub const DEFAULT_YOUTUBE_API: &str = "https://www.googleapis.com";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadPage {
    #[serde(default)]
    items: Vec<CommentThread>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThread {
    snippet: ThreadSnippet,
    #[serde(default)]
    replies: Option<ThreadReplies>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadSnippet {
    top_level_comment: Comment,
    #[serde(default)]
    total_reply_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ThreadReplies {
    #[serde(default)]
    comments: Vec<Comment>,
}

/// YouTube Data API v3 client: comment replies and comment-thread catch-up
/// for a channel.
#[derive(Clone)]
pub struct YouTubeClient {
    api_base: String,
    retry: RetryPolicy,
    http: Client,
}

impl YouTubeClient {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_YOUTUBE_API.to_string())
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

    async fn fetch_threads(
        &self,
        token: &str,
        channel_id: &str,
        page_token: Option<&str>,
    ) -> Result<ThreadPage, ProviderError> {
        let url = format!("{}/youtube/v3/commentThreads", self.api_base);
        let mut query = vec![
            ("part", "snippet,replies".to_string()),
            ("allThreadsRelatedToChannelId", channel_id.to_string()),
            ("order", "time".to_string()),
            ("maxResults", "100".to_string()),
        ];
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token.to_string()));
        }
        let body = send_with_retry("youtube", &self.retry, || {
            self.http.get(&url).bearer_auth(token).query(&query)
        })
        .await?;
        serde_json::from_value(body)
            .map_err(|e| ProviderError::Rejected(format!("unexpected commentThreads response: {e}")))
    }
}

fn published_after(comment: &Comment, window: &BackfillWindow) -> bool {
    comment
        .snippet
        .published_at
        .as_deref()
        .and_then(parse_timestamp_str)
        .is_some_and(|at| at >= window.since)
}

#[async_trait]
impl PlatformClient for YouTubeClient {
    fn platform(&self) -> PlatformType {
        PlatformType::Youtube
    }

    async fn send_reply(
        &self,
        account: &ConnectedAccount,
        message: &InboxMessage,
        content: &str,
    ) -> Result<String, ProviderError> {
        let token = require_token(account)?;
        let (path, body) = match message.message_type {
            MessageType::Mention => {
                let video_id = message
                    .platform_post_id
                    .as_deref()
                    .ok_or_else(|| ProviderError::Rejected("mention has no video".to_string()))?;
                (
                    "commentThreads",
                    json!({
                        "snippet": {
                            "videoId": video_id,
                            "topLevelComment": { "snippet": { "textOriginal": content } }
                        }
                    }),
                )
            }
            MessageType::Comment | MessageType::Reply | MessageType::CommentUpdate => {
                // Threads are one level deep: replies attach to the top-level
                // comment.
                let parent = match message.message_type {
                    MessageType::Reply => message.parent_id.as_deref().unwrap_or(reply_anchor(message)),
                    _ => reply_anchor(message),
                };
                (
                    "comments",
                    json!({ "snippet": { "parentId": parent, "textOriginal": content } }),
                )
            }
            other => {
                return Err(ProviderError::Rejected(format!(
                    "{other} messages cannot be replied to on YouTube"
                )))
            }
        };

        let url = format!("{}/youtube/v3/{path}", self.api_base);
        let response = send_write_with_retry("youtube", &self.retry, || {
            self.http
                .post(&url)
                .bearer_auth(token)
                .query(&[("part", "snippet")])
                .json(&body)
        })
        .await?;

        let reply_id = response_id(&response, &["/id"])?;
        info!(platform = "youtube", account_id = %account.id, reply_id = %reply_id, "reply delivered");
        Ok(reply_id)
    }

    /// Comment threads are returned newest first; paging stops at the first
    /// thread older than the window.
    async fn backfill(
        &self,
        account: &ConnectedAccount,
        window: &BackfillWindow,
    ) -> Result<Vec<NewMessage>, ProviderError> {
        let token = require_token(account)?;
        let ctx = account.context();
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..window.max_pages.max(1) {
            let page = self
                .fetch_threads(token, &account.platform_account_id, page_token.as_deref())
                .await?;
            let mut reached_end = false;

            for thread in page.items {
                let top = &thread.snippet.top_level_comment;
                if !published_after(top, window) {
                    reached_end = true;
                    break;
                }
                let replies = thread.replies.map(|r| r.comments).unwrap_or_default();
                let fresh_replies = replies.iter().filter(|r| published_after(r, window));
                for (comment, reply_count) in std::iter::once((top, thread.snippet.total_reply_count))
                    .chain(fresh_replies.map(|r| (r, None)))
                {
                    match normalize_comment(&ctx, comment, reply_count) {
                        Ok(Some(message)) => out.push(message),
                        Ok(None) => {}
                        Err(err) => warn!(platform = "youtube", error = %err, "skipping backfilled comment"),
                    }
                }
            }

            page_token = page.next_page_token;
            if reached_end || page_token.is_none() {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use unibox_core::types::{Priority, Sender, Sentiment};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account() -> ConnectedAccount {
        ConnectedAccount {
            id: "yt-main".to_string(),
            organization_id: "org".to_string(),
            platform: PlatformType::Youtube,
            platform_account_id: "UC_self".to_string(),
            username: None,
            access_token: Some("yt-token".to_string()),
            business_id: None,
        }
    }

    fn message(platform_id: &str, message_type: MessageType, parent: Option<&str>) -> InboxMessage {
        let mut new = NewMessage::new(PlatformType::Youtube, platform_id, "yt-main", message_type, Sender::new("UC_v"))
            .with_post("vid1");
        new.parent_id = parent.map(str::to_string);
        InboxMessage::from_new(new, Priority::Medium, Sentiment::Neutral)
    }

    fn client(server: &MockServer) -> YouTubeClient {
        YouTubeClient::new(Some(server.uri())).with_retry(RetryPolicy::immediate(1))
    }

    #[tokio::test]
    async fn reply_to_nested_comment_targets_thread_root() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/youtube/v3/comments"))
            .and(query_param("part", "snippet"))
            .and(header("authorization", "Bearer yt-token"))
            .and(body_partial_json(json!({
                "snippet": { "parentId": "Ugx1", "textOriginal": "thanks" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "Ugx1.r9" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .send_reply(&account(), &message("Ugx1.r1", MessageType::Reply, Some("Ugx1")), "thanks")
            .await
            .unwrap();
        assert_eq!(id, "Ugx1.r9");
    }

    #[tokio::test]
    async fn mention_starts_new_thread() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/youtube/v3/commentThreads"))
            .and(body_partial_json(json!({ "snippet": { "videoId": "vid1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "Ugz7" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .send_reply(&account(), &message("vid1", MessageType::Mention, None), "hello")
            .await
            .unwrap();
        assert_eq!(id, "Ugz7");
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Invalid Credentials" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_reply(&account(), &message("Ugx1", MessageType::Comment, None), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthExpired(_)));
    }

    #[tokio::test]
    async fn backfill_stops_at_window_edge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/youtube/v3/commentThreads"))
            .and(query_param("allThreadsRelatedToChannelId", "UC_self"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nextPageToken": "p2",
                "items": [
                    {
                        "snippet": {
                            "totalReplyCount": 1,
                            "topLevelComment": { "id": "Ugx1", "snippet": {
                                "videoId": "vid1", "textOriginal": "new one",
                                "authorChannelId": { "value": "UC_v" },
                                "publishedAt": "2024-05-02T10:00:00Z" } }
                        },
                        "replies": { "comments": [
                            { "id": "Ugx1.r1", "snippet": {
                                "videoId": "vid1", "parentId": "Ugx1", "textOriginal": "from us",
                                "authorChannelId": { "value": "UC_self" },
                                "publishedAt": "2024-05-02T11:00:00Z" } }
                        ] }
                    },
                    {
                        "snippet": {
                            "topLevelComment": { "id": "Ugx0", "snippet": {
                                "videoId": "vid1", "textOriginal": "old",
                                "authorChannelId": { "value": "UC_v" },
                                "publishedAt": "2024-04-01T10:00:00Z" } }
                        }
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let window = BackfillWindow {
            since: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            max_pages: 5,
        };
        let messages = client(&server).backfill(&account(), &window).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.platform_id.as_str()).collect();
        assert_eq!(ids, ["Ugx1"]);
    }
}
