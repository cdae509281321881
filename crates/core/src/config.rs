use crate::accounts::{AccountRegistry, ConnectedAccount};
use crate::credentials::CredentialStore;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub accounts: Vec<ConnectedAccount>,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// If set, inbox API endpoints require `Authorization: Bearer <token>`
    /// and the server binds publicly; otherwise it binds to 127.0.0.1.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_token: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, or `memory` for the in-process store.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://unibox.db?mode=rwc".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Acknowledge after parsing, ingest on the worker pool.
    #[default]
    Queued,
    /// Ingest before responding; store failures become 5xx.
    Inline,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub mode: IngestMode,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_dedupe_ttl_secs")]
    pub dedupe_ttl_secs: i64,
    #[serde(default = "default_dedupe_max_entries")]
    pub dedupe_max_entries: usize,
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Attempts a queued event gets against the store before it is dropped.
    #[serde(default = "default_store_retry_attempts")]
    pub store_retry_attempts: u32,
    #[serde(default = "default_store_retry_base_ms")]
    pub store_retry_base_ms: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_workers() -> usize {
    4
}

fn default_dedupe_ttl_secs() -> i64 {
    600
}

fn default_dedupe_max_entries() -> usize {
    4096
}

fn default_enqueue_timeout_ms() -> u64 {
    2_000
}

fn default_store_retry_attempts() -> u32 {
    5
}

fn default_store_retry_base_ms() -> u64 {
    250
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::default(),
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            dedupe_ttl_secs: default_dedupe_ttl_secs(),
            dedupe_max_entries: default_dedupe_max_entries(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            store_retry_attempts: default_store_retry_attempts(),
            store_retry_base_ms: default_store_retry_base_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_sync_concurrency")]
    pub concurrency: usize,
}

fn default_lookback_hours() -> i64 {
    168
}

fn default_max_pages() -> usize {
    3
}

fn default_sync_concurrency() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            max_pages: default_max_pages(),
            concurrency: default_sync_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SentimentConfig {
    /// OpenAI-compatible endpoint; without a key only the keyword
    /// heuristic runs.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_sentiment_model")]
    pub model: String,
    #[serde(default = "default_sentiment_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_positive_words")]
    pub positive_words: Vec<String>,
    #[serde(default = "default_negative_words")]
    pub negative_words: Vec<String>,
}

fn default_sentiment_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_sentiment_timeout_ms() -> u64 {
    1_500
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

pub fn default_positive_words() -> Vec<String> {
    words(&[
        "love", "great", "awesome", "amazing", "excellent", "good", "nice", "thanks",
        "thank", "happy", "best", "fantastic", "wonderful", "perfect", "beautiful", "cool",
    ])
}

pub fn default_negative_words() -> Vec<String> {
    words(&[
        "hate", "bad", "terrible", "awful", "worst", "angry", "disappointed", "broken",
        "refund", "scam", "poor", "horrible", "useless", "annoying", "problem", "issue",
    ])
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            model: default_sentiment_model(),
            timeout_ms: default_sentiment_timeout_ms(),
            positive_words: default_positive_words(),
            negative_words: default_negative_words(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PlatformsConfig {
    pub facebook: Option<MetaConfig>,
    pub instagram: Option<MetaConfig>,
    pub twitter: Option<TwitterConfig>,
    pub linkedin: Option<LinkedInConfig>,
    pub tiktok: Option<TikTokConfig>,
    pub youtube: Option<YouTubeConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetaConfig {
    pub app_secret: String,
    pub verify_token: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwitterConfig {
    pub consumer_secret: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LinkedInConfig {
    pub client_secret: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TikTokConfig {
    pub client_secret: String,
    pub api_base: Option<String>,
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: i64,
}

fn default_signature_tolerance_secs() -> i64 {
    300
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YouTubeConfig {
    pub verify_token: String,
    pub hub_secret: String,
    pub api_base: Option<String>,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".unibox/config.toml")
    }

    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = custom_path.unwrap_or_else(Self::default_path);

        let s = Config::builder()
            .add_source(File::from(config_path).required(true))
            // Environment overrides: UNIBOX__SERVER__PORT=9000
            .add_source(Environment::with_prefix("UNIBOX").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// A configured platform must carry non-empty webhook secrets; an empty
    /// HMAC key or verify token would accept forged deliveries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.platforms;
        let mut required: Vec<(&str, &str)> = Vec::new();
        for (name, meta) in [("facebook", &p.facebook), ("instagram", &p.instagram)] {
            if let Some(cfg) = meta {
                required.push((name, cfg.app_secret.as_str()));
                required.push((name, cfg.verify_token.as_str()));
            }
        }
        if let Some(cfg) = &p.twitter {
            required.push(("twitter", cfg.consumer_secret.as_str()));
        }
        if let Some(cfg) = &p.linkedin {
            required.push(("linkedin", cfg.client_secret.as_str()));
        }
        if let Some(cfg) = &p.tiktok {
            required.push(("tiktok", cfg.client_secret.as_str()));
        }
        if let Some(cfg) = &p.youtube {
            required.push(("youtube", cfg.verify_token.as_str()));
            required.push(("youtube", cfg.hub_secret.as_str()));
        }

        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((platform, _)) => Err(ConfigError::Message(format!(
                "platforms.{platform} has an empty webhook secret or verify token"
            ))),
            None => Ok(()),
        }
    }

    /// Platforms that have webhook secrets configured.
    pub fn configured_platforms(&self) -> Vec<&'static str> {
        let p = &self.platforms;
        let mut out = Vec::new();
        if p.facebook.is_some() {
            out.push("facebook");
        }
        if p.instagram.is_some() {
            out.push("instagram");
        }
        if p.twitter.is_some() {
            out.push("twitter");
        }
        if p.linkedin.is_some() {
            out.push("linkedin");
        }
        if p.tiktok.is_some() {
            out.push("tiktok");
        }
        if p.youtube.is_some() {
            out.push("youtube");
        }
        out
    }

    /// Build the account registry, filling missing access tokens from the
    /// credential store.
    pub fn account_registry(&self, credentials: &CredentialStore) -> AccountRegistry {
        let accounts = self.accounts.iter().cloned().map(|mut account| {
            if account.access_token.is_none() {
                account.access_token = credentials.get(&account.id).map(|t| t.to_string());
            }
            if account.access_token.is_none() {
                warn!(account_id = %account.id, "account has no access token; replies and sync will fail");
            }
            account
        });
        AccountRegistry::new(accounts)
    }
}
