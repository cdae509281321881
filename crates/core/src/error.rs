use crate::types::MessageStatus;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a `MessageStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("message not found: {0}")]
    NotFound(Uuid),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

/// One event in a webhook batch could not be turned into a message.
///
/// `raw` keeps a truncated copy of the offending event so it can be replayed
/// from the logs.
#[derive(Debug, Clone, Error)]
#[error("malformed event: {reason}")]
pub struct NormalizeError {
    pub reason: String,
    pub raw: String,
}

const RAW_EXCERPT_LIMIT: usize = 512;

impl NormalizeError {
    pub fn new(reason: impl Into<String>, raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        let raw = match raw.char_indices().nth(RAW_EXCERPT_LIMIT) {
            Some((idx, _)) => format!("{}...", &raw[..idx]),
            None => raw.to_string(),
        };
        Self {
            reason: reason.into(),
            raw,
        }
    }

    pub fn from_json(reason: impl Into<String>, raw: &serde_json::Value) -> Self {
        Self::new(reason, raw.to_string())
    }

    /// A required field was absent. The raw excerpt is attached later by the
    /// caller that still holds the untyped event.
    pub fn missing(field: &str) -> Self {
        Self {
            reason: format!("missing required field `{field}`"),
            raw: String::new(),
        }
    }

    pub fn with_raw(self, raw: &serde_json::Value) -> Self {
        if self.raw.is_empty() {
            Self::from_json(self.reason, raw)
        } else {
            self
        }
    }
}

/// Errors from outbound calls to a platform API.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider credential expired: {0}")]
    AuthExpired(String),
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// GET handshake refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("handshake request is missing or malformed: {0}")]
    BadRequest(String),
    #[error("handshake verification failed")]
    Forbidden,
}

/// Errors surfaced by the inbox controller and reply dispatcher.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("original message not found: {0}")]
    OriginalMessageNotFound(Uuid),
    #[error("provider credential expired for account {0}")]
    ProviderAuthExpired(String),
    #[error("provider rejected request: {0}")]
    ProviderRejected(String),
    #[error("status transition {from} -> {to} is not allowed")]
    InvalidTransition { from: MessageStatus, to: MessageStatus },
    #[error("invalid pagination cursor")]
    InvalidCursor,
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ProviderError> for InboxError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::AuthExpired(account) => InboxError::ProviderAuthExpired(account),
            ProviderError::Rejected(reason) => InboxError::ProviderRejected(reason),
            ProviderError::Network(reason) => {
                InboxError::ProviderRejected(format!("network: {reason}"))
            }
            ProviderError::Config(reason) => {
                InboxError::ProviderRejected(format!("configuration: {reason}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_excerpt_is_truncated() {
        let long = "x".repeat(2_000);
        let err = NormalizeError::new("bad", &long);
        assert!(err.raw.len() < 600);
        assert!(err.raw.ends_with("..."));
    }

    #[test]
    fn network_errors_surface_as_rejections() {
        let err: InboxError = ProviderError::Network("timeout".into()).into();
        assert!(matches!(err, InboxError::ProviderRejected(reason) if reason.contains("timeout")));
    }
}
