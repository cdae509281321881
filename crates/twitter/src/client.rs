use crate::events::{Entities, Tweet, TwitterUser, UrlEntity, UserMention};
use crate::normalize::normalize_tweet;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};
use unibox_core::accounts::ConnectedAccount;
use unibox_core::error::ProviderError;
use unibox_core::outbound::{response_id, send_with_retry, send_write_with_retry, RetryPolicy};
use unibox_core::platform::{reply_anchor, require_token, BackfillWindow, PlatformClient};
use unibox_core::types::{InboxMessage, MessageType, NewMessage, PlatformType};

pub const DEFAULT_TWITTER_API: &str = "https://api.twitter.com";

const TWEET_FIELDS: &str = "created_at,author_id,in_reply_to_user_id,referenced_tweets,entities,public_metrics";
const USER_FIELDS: &str = "name,username,profile_image_url,verified,public_metrics";

#[derive(Debug, Default, Deserialize)]
struct MentionsPage {
    #[serde(default)]
    data: Vec<V2Tweet>,
    #[serde(default)]
    includes: Includes,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<V2User>,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    reply_count: Option<u64>,
    #[serde(default)]
    retweet_count: Option<u64>,
    #[serde(default)]
    followers_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct V2User {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    profile_image_url: Option<String>,
    #[serde(default)]
    verified: Option<bool>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct V2Mention {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct V2Url {
    #[serde(default)]
    expanded_url: Option<String>,
    #[serde(default)]
    display_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct V2Entities {
    #[serde(default)]
    mentions: Vec<V2Mention>,
    #[serde(default)]
    urls: Vec<V2Url>,
}

#[derive(Debug, Deserialize)]
struct V2Tweet {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    in_reply_to_user_id: Option<String>,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedTweet>,
    #[serde(default)]
    entities: Option<V2Entities>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

impl V2Tweet {
    /// Shape a v2 timeline tweet like an Account Activity tweet so the
    /// webhook normalizer can classify it.
    fn into_activity_tweet(self, users: &HashMap<&str, &V2User>) -> Tweet {
        let author = self
            .author_id
            .as_deref()
            .and_then(|id| users.get(id).copied());
        let user = TwitterUser {
            id_str: self.author_id.clone().unwrap_or_default(),
            name: author.and_then(|u| u.name.clone()),
            screen_name: author.and_then(|u| u.username.clone()),
            profile_image_url_https: author.and_then(|u| u.profile_image_url.clone()),
            verified: author.and_then(|u| u.verified),
            followers_count: author
                .and_then(|u| u.public_metrics.as_ref())
                .and_then(|m| m.followers_count),
        };
        let entities = self.entities.unwrap_or_default();
        let metrics = self.public_metrics.unwrap_or_default();
        Tweet {
            id_str: self.id,
            text: Some(self.text),
            user,
            in_reply_to_status_id_str: self
                .referenced_tweets
                .iter()
                .find(|r| r.kind == "replied_to")
                .map(|r| r.id.clone()),
            in_reply_to_user_id_str: self.in_reply_to_user_id,
            entities: Entities {
                user_mentions: entities
                    .mentions
                    .into_iter()
                    .filter_map(|m| {
                        m.id.map(|id_str| UserMention {
                            id_str,
                            screen_name: m.username,
                        })
                    })
                    .collect(),
                urls: entities
                    .urls
                    .into_iter()
                    .map(|u| UrlEntity {
                        expanded_url: u.expanded_url,
                        display_url: u.display_url,
                    })
                    .collect(),
                media: Vec::new(),
            },
            created_at: self.created_at,
            favorite_count: metrics.like_count,
            reply_count: metrics.reply_count,
            retweet_count: metrics.retweet_count,
            ..Default::default()
        }
    }
}

/// Twitter API v2 client: threaded tweet replies, DM replies and the
/// mentions timeline for catch-up.
#[derive(Clone)]
pub struct TwitterClient {
    api_base: String,
    retry: RetryPolicy,
    http: Client,
}

impl TwitterClient {
    pub fn new(api_base: Option<String>) -> Self {
        Self {
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_TWITTER_API.to_string())
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
        let url = format!("{}{}", self.api_base, path);
        send_write_with_retry("twitter", &self.retry, || {
            self.http.post(&url).bearer_auth(token).json(&body)
        })
        .await
    }
}

#[async_trait]
impl PlatformClient for TwitterClient {
    fn platform(&self) -> PlatformType {
        PlatformType::Twitter
    }

    async fn send_reply(
        &self,
        account: &ConnectedAccount,
        message: &InboxMessage,
        content: &str,
    ) -> Result<String, ProviderError> {
        let token = require_token(account)?;
        let reply_id = match message.message_type {
            MessageType::DirectMessage => {
                let body = self
                    .post(
                        token,
                        &format!("/2/dm_conversations/with/{}/messages", message.sender.id),
                        json!({ "text": content }),
                    )
                    .await?;
                response_id(&body, &["/data/dm_event_id", "/dm_event_id"])?
            }
            MessageType::Comment | MessageType::Reply | MessageType::Mention | MessageType::CommentUpdate => {
                let body = self
                    .post(
                        token,
                        "/2/tweets",
                        json!({
                            "text": content,
                            "reply": { "in_reply_to_tweet_id": reply_anchor(message) },
                        }),
                    )
                    .await?;
                response_id(&body, &["/data/id"])?
            }
            other => {
                return Err(ProviderError::Rejected(format!(
                    "{other} messages cannot be replied to"
                )))
            }
        };
        info!(platform = "twitter", account_id = %account.id, reply_id = %reply_id, "reply delivered");
        Ok(reply_id)
    }

    async fn backfill(
        &self,
        account: &ConnectedAccount,
        window: &BackfillWindow,
    ) -> Result<Vec<NewMessage>, ProviderError> {
        let token = require_token(account)?;
        let url = format!("{}/2/users/{}/mentions", self.api_base, account.platform_account_id);
        let start_time = window.since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let ctx = account.context();

        let mut out = Vec::new();
        let mut next_token: Option<String> = None;
        for _ in 0..window.max_pages.max(1) {
            let mut query = vec![
                ("start_time", start_time.clone()),
                ("max_results", "100".to_string()),
                ("tweet.fields", TWEET_FIELDS.to_string()),
                ("expansions", "author_id".to_string()),
                ("user.fields", USER_FIELDS.to_string()),
            ];
            if let Some(cursor) = &next_token {
                query.push(("pagination_token", cursor.clone()));
            }
            let body = send_with_retry("twitter", &self.retry, || {
                self.http.get(&url).bearer_auth(token).query(&query)
            })
            .await?;
            let page: MentionsPage = serde_json::from_value(body)
                .map_err(|e| ProviderError::Rejected(format!("unexpected mentions response: {e}")))?;

            let users: HashMap<&str, &V2User> =
                page.includes.users.iter().map(|u| (u.id.as_str(), u)).collect();
            for tweet in page.data {
                let tweet = tweet.into_activity_tweet(&users);
                match normalize_tweet(&ctx, &tweet) {
                    Ok(Some(message)) => out.push(message),
                    Ok(None) => {}
                    Err(err) => warn!(platform = "twitter", error = %err, "skipping backfilled tweet"),
                }
            }

            next_token = page.meta.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(out)
    }
}
