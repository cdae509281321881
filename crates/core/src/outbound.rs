use crate::error::ProviderError;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Retry settings for outbound platform calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub retry_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            retry_jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(0),
            retry_jitter_ms: 0,
        }
    }

    fn jitter_delay(&self, attempt: u32) -> StdDuration {
        if self.retry_jitter_ms == 0 {
            return StdDuration::from_millis(0);
        }
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let jitter = (seed ^ ((attempt as u64) << 7)) % (self.retry_jitter_ms + 1);
        StdDuration::from_millis(jitter)
    }
}

/// Best-effort human readable error out of a platform error body.
pub fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.pointer("/errors/0/message"))
                .or_else(|| v.pointer("/errors/0/detail"))
                .or_else(|| v.get("detail"))
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error_description"))
                .or_else(|| v.get("error"))
        })
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.chars().take(300).collect())
}

/// First string (or number) id found at one of the JSON `pointers`.
pub fn response_id(body: &Value, pointers: &[&str]) -> Result<String, ProviderError> {
    pointers
        .iter()
        .filter_map(|p| body.pointer(p))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| ProviderError::Rejected(format!("response carried no id: {body}")))
}

/// Which failures a request may be re-sent after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Reads: any transient failure.
    Any,
    /// Writes: only failures where the platform cannot have acted.
    Undelivered,
}

/// Send a read request built by `build`, retrying transient failures.
///
/// 401 maps to `AuthExpired`, other 4xx (except 429) to `Rejected`, and
/// 429/5xx or transport errors are retried with exponential backoff plus
/// jitter. The response body is returned as JSON (`Null` when empty).
pub async fn send_with_retry<F>(
    platform: &str,
    policy: &RetryPolicy,
    build: F,
) -> Result<Value, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    send(platform, policy, Replay::Any, build).await
}

/// Send a write (reply, comment) built by `build`.
///
/// Only 429 and connect failures are retried: after a 5xx, a timeout or a
/// dropped response the write may already be live, and re-sending would
/// post it twice.
pub async fn send_write_with_retry<F>(
    platform: &str,
    policy: &RetryPolicy,
    build: F,
) -> Result<Value, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    send(platform, policy, Replay::Undelivered, build).await
}

async fn send<F>(
    platform: &str,
    policy: &RetryPolicy,
    replay: Replay,
    build: F,
) -> Result<Value, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=attempts {
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = match resp.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(platform, attempt, %status, error = %e, "outbound response body unreadable");
                        last_error = format!("{status}: response body unreadable: {e}");
                        if replay == Replay::Undelivered {
                            return Err(ProviderError::Network(format!("{platform} {last_error}")));
                        }
                        if attempt < attempts {
                            sleep(delay + policy.jitter_delay(attempt)).await;
                            delay *= 2;
                        }
                        continue;
                    }
                };

                if status.is_success() {
                    info!(platform, attempt, %status, "outbound call succeeded");
                    if body.trim().is_empty() {
                        return Ok(Value::Null);
                    }
                    return serde_json::from_str(&body).map_err(|e| {
                        ProviderError::Rejected(format!("unreadable response body: {e}"))
                    });
                }

                if status == StatusCode::UNAUTHORIZED {
                    return Err(ProviderError::AuthExpired(error_message(&body)));
                }
                if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                    return Err(ProviderError::Rejected(format!(
                        "{status}: {}",
                        error_message(&body)
                    )));
                }

                warn!(platform, attempt, %status, body = %body, "outbound call failed");
                last_error = format!("{status}: {}", error_message(&body));
                if replay == Replay::Undelivered && status != StatusCode::TOO_MANY_REQUESTS {
                    return Err(ProviderError::Network(format!("{platform} write failed: {last_error}")));
                }
            }
            Err(e) => {
                warn!(platform, attempt, error = %e, "outbound network error");
                last_error = e.to_string();
                if replay == Replay::Undelivered && !e.is_connect() {
                    return Err(ProviderError::Network(format!("{platform} write failed: {last_error}")));
                }
            }
        }

        if attempt < attempts {
            sleep(delay + policy.jitter_delay(attempt)).await;
            delay *= 2;
        }
    }

    Err(ProviderError::Network(format!(
        "{platform} call failed after {attempts} attempts: {last_error}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(
            error_message(r#"{"error":{"message":"Invalid OAuth access token"}}"#),
            "Invalid OAuth access token"
        );
        assert_eq!(error_message(r#"{"detail":"Forbidden"}"#), "Forbidden");
        assert_eq!(error_message("plain"), "plain");
    }

    #[test]
    fn response_id_checks_pointers_in_order() {
        let body = json!({"data": {"id": "t1"}, "id": 7});
        assert_eq!(response_id(&body, &["/data/id", "/id"]).unwrap(), "t1");
        assert_eq!(response_id(&body, &["/missing", "/id"]).unwrap(), "7");
        assert!(response_id(&body, &["/nope"]).is_err());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_expired_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reply"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "expired"}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/reply", server.uri());
        let err = send_with_retry("test", &RetryPolicy::immediate(3), || client.post(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthExpired(m) if m == "expired"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = send_with_retry("test", &RetryPolicy::immediate(3), || client.post(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn write_is_not_resent_after_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = send_write_with_retry("test", &RetryPolicy::immediate(3), || client.post(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn write_is_resent_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "r2"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let body = send_write_with_retry("test", &RetryPolicy::immediate(3), || client.post(&url))
            .await
            .unwrap();
        assert_eq!(body["id"], "r2");
    }

    #[tokio::test]
    async fn write_is_resent_after_connect_failure() {
        // Nothing listens on the port once the listener is dropped.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/reply");
        let client = reqwest::Client::new();
        let err = send_write_with_retry("test", &RetryPolicy::immediate(2), || client.post(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(m) if m.contains("after 2 attempts")));
    }

    #[tokio::test]
    async fn success_returns_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "r1"})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let body = send_with_retry("test", &RetryPolicy::immediate(1), || client.post(&url))
            .await
            .unwrap();
        assert_eq!(body["id"], "r1");
    }
}
