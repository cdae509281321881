use crate::gateway::{record_platform_error, record_platform_events, AppState};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use unibox_core::error::HandshakeError;
use unibox_core::platform::{HandshakeReply, WebhookHeaders, WebhookReceiver};
use unibox_core::types::PlatformType;
use unibox_inbox::{IngestJob, QueueError};

fn receiver_for(state: &AppState, platform: &str) -> Result<Arc<dyn WebhookReceiver>, Response> {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no webhook configured for `{platform}`") })),
        )
            .into_response()
    };
    let platform: PlatformType = platform.parse().map_err(|_| not_found())?;
    state.receivers.get(&platform).cloned().ok_or_else(not_found)
}

fn webhook_headers(headers: &HeaderMap) -> WebhookHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

/// GET subscription handshake (Meta hub.challenge, Twitter CRC, LinkedIn
/// challengeCode, TikTok challenge, WebSub).
pub(crate) async fn handshake(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let receiver = match receiver_for(&state, &platform) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match receiver.handshake(&query) {
        Ok(HandshakeReply::Text(body)) => {
            info!(platform = %receiver.platform(), "webhook handshake accepted");
            ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
        }
        Ok(HandshakeReply::Json(body)) => {
            info!(platform = %receiver.platform(), "webhook handshake accepted");
            Json(body).into_response()
        }
        Err(HandshakeError::BadRequest(reason)) => {
            debug!(platform = %receiver.platform(), %reason, "bad handshake request");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
        }
        Err(HandshakeError::Forbidden) => {
            warn!(platform = %receiver.platform(), "webhook handshake rejected");
            (StatusCode::FORBIDDEN, Json(json!({ "error": "verification failed" }))).into_response()
        }
    }
}

/// POST delivery: verify, parse, then ingest inline or hand to the queue.
pub(crate) async fn receive(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let receiver = match receiver_for(&state, &platform) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let platform = receiver.platform();

    if !receiver.verify(&body, &webhook_headers(&headers)) {
        warn!(platform = %platform, bytes = body.len(), "webhook signature rejected");
        state.metrics.inc_signature_failures();
        record_platform_error(&state, platform, "invalid signature").await;
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    let events = match receiver.parse(&body, &query) {
        Ok(events) => events,
        Err(err) => {
            // Acknowledge so the provider does not keep redelivering a body
            // that will never parse.
            warn!(platform = %platform, reason = %err.reason, raw = %err.raw, "malformed webhook envelope");
            state.metrics.inc_malformed();
            record_platform_error(&state, platform, err.reason).await;
            return Json(json!({ "status": "malformed_ignored" })).into_response();
        }
    };
    record_platform_events(&state, platform, events.len()).await;

    match &state.queue {
        Some(queue) => {
            let count = events.len();
            match queue.submit(IngestJob { platform, events }).await {
                Ok(()) => {
                    debug!(platform = %platform, events = count, "webhook delivery queued");
                    Json(json!({ "status": "accepted", "events": count })).into_response()
                }
                Err(err @ (QueueError::Full | QueueError::Closed)) => {
                    record_platform_error(&state, platform, err.to_string()).await;
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(json!({ "error": err.to_string() })),
                    )
                        .into_response()
                }
            }
        }
        None => match state.ingestor.ingest_batch(platform, events).await {
            Ok(report) => Json(json!({ "status": "processed", "report": report })).into_response(),
            Err(err) => {
                error!(platform = %platform, error = %err, "webhook ingestion failed");
                record_platform_error(&state, platform, err.to_string()).await;
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "failed to store events" })),
                )
                    .into_response()
            }
        },
    }
}
