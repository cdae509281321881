use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use unibox_core::config::SentimentConfig;
use unibox_core::types::Sentiment;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You label the sentiment of social media messages sent to a brand. \
Answer with exactly one word: positive, neutral or negative.";

#[derive(Debug, Error)]
enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Network(String),
    #[error("classifier returned {0}")]
    Api(String),
    #[error("classifier timed out")]
    Timeout,
    #[error("unrecognized label: {0}")]
    Label(String),
}

/// Deterministic word-count heuristic. The side with more hits wins; ties
/// and no hits are neutral.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    positive: HashSet<String>,
    negative: HashSet<String>,
}

impl KeywordClassifier {
    pub fn new(positive: &[String], negative: &[String]) -> Self {
        let normalize = |words: &[String]| words.iter().map(|w| w.trim().to_lowercase()).filter(|w| !w.is_empty()).collect();
        Self {
            positive: normalize(positive),
            negative: normalize(negative),
        }
    }

    pub fn classify(&self, text: &str) -> Sentiment {
        let lowered = text.to_lowercase();
        let (mut pos, mut neg) = (0usize, 0usize);
        for word in lowered.split(|c: char| !c.is_alphanumeric() && c != '\'') {
            let word = word.trim_matches('\'');
            if word.is_empty() {
                continue;
            }
            if self.positive.contains(word) {
                pos += 1;
            }
            if self.negative.contains(word) {
                neg += 1;
            }
        }
        match pos.cmp(&neg) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        }
    }
}

/// OpenAI-compatible chat completion used as a one-word labeler.
struct ChatBackend {
    api_key: String,
    api_base: String,
    model: String,
    client: Client,
}

impl ChatBackend {
    async fn label(&self, text: &str) -> Result<Sentiment, ClassifierError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "max_tokens": 3,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": text }
            ]
        });

        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(format!("{status}: {error_text}")));
        }

        let json: Value = res
            .json()
            .await
            .map_err(|e| ClassifierError::Api(format!("unreadable response: {e}")))?;
        let answer = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('.')
            .to_lowercase();
        answer.parse::<Sentiment>().map_err(|_| ClassifierError::Label(answer))
    }
}

/// Best-effort sentiment scoring that never fails: the chat backend when an
/// API key is configured, otherwise (or on any error or timeout) the
/// keyword heuristic.
pub struct SentimentClassifier {
    backend: Option<ChatBackend>,
    timeout: Duration,
    fallback: KeywordClassifier,
}

impl SentimentClassifier {
    pub fn from_config(config: &SentimentConfig) -> Self {
        let backend = config
            .api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|api_key| ChatBackend {
                api_key: api_key.clone(),
                api_base: config
                    .api_base
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                model: config.model.clone(),
                client: Client::new(),
            });
        Self {
            backend,
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            fallback: KeywordClassifier::new(&config.positive_words, &config.negative_words),
        }
    }

    /// Keyword heuristic only.
    pub fn keywords_only(config: &SentimentConfig) -> Self {
        Self {
            backend: None,
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            fallback: KeywordClassifier::new(&config.positive_words, &config.negative_words),
        }
    }

    pub async fn classify(&self, text: &str) -> Sentiment {
        if text.trim().is_empty() {
            return Sentiment::Neutral;
        }
        let Some(backend) = &self.backend else {
            return self.fallback.classify(text);
        };

        let result = match tokio::time::timeout(self.timeout, backend.label(text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout),
        };
        match result {
            Ok(sentiment) => {
                debug!(%sentiment, "sentiment from classifier");
                sentiment
            }
            Err(err) => {
                warn!(error = %err, "sentiment classifier unavailable, using keyword fallback");
                self.fallback.classify(text)
            }
        }
    }
}
