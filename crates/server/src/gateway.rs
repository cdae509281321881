use crate::api;
use crate::platforms::ReceiverMap;
use crate::webhooks;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tracing::{info, warn};
use unibox_core::accounts::AccountRegistry;
use unibox_core::config::ServerConfig;
use unibox_core::metrics::{MetricsSnapshot, MetricsStore};
use unibox_core::signature::constant_time_eq;
use unibox_core::types::PlatformType;
use unibox_inbox::{InboxController, Ingestor, IngestQueue};

#[derive(Debug, Clone, Serialize, Default)]
pub(crate) struct PlatformRuntimeStats {
    last_event_at_ms: Option<i64>,
    events_received: u64,
    error_count: u64,
    last_error: Option<String>,
    last_error_at_ms: Option<i64>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// If set, inbox and monitoring endpoints require
    /// `Authorization: Bearer <token>`.
    pub(crate) auth_token: Option<String>,
    pub(crate) receivers: Arc<ReceiverMap>,
    pub(crate) ingestor: Arc<Ingestor>,
    pub(crate) queue: Option<Arc<IngestQueue>>,
    pub(crate) controller: Arc<InboxController>,
    pub(crate) accounts: Arc<AccountRegistry>,
    pub(crate) metrics: Arc<MetricsStore>,
    platform_stats: Arc<tokio::sync::Mutex<HashMap<PlatformType, PlatformRuntimeStats>>>,
}

/// HTTP front door: provider webhooks plus the inbox API.
pub struct Gateway {
    host: String,
    port: u16,
    max_body_bytes: usize,
    state: AppState,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

impl Gateway {
    pub fn new(
        server: &ServerConfig,
        receivers: ReceiverMap,
        ingestor: Arc<Ingestor>,
        queue: Option<Arc<IngestQueue>>,
        controller: Arc<InboxController>,
        accounts: Arc<AccountRegistry>,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            max_body_bytes: server.max_body_bytes,
            state: AppState {
                auth_token: server.auth_token.clone().filter(|t| !t.is_empty()),
                receivers: Arc::new(receivers),
                ingestor,
                queue,
                controller,
                accounts,
                metrics,
                platform_stats: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/api/monitor/metrics", get(get_metrics))
            .route("/api/platforms/health", get(platform_health))
            .route(
                "/webhooks/:platform",
                get(webhooks::handshake).post(webhooks::receive),
            )
            .route("/api/inbox/messages", get(api::list_messages))
            .route("/api/inbox/messages/bulk-status", post(api::bulk_status))
            .route("/api/inbox/messages/:id", get(api::get_message))
            .route("/api/inbox/messages/:id/reply", post(api::reply))
            .route("/api/inbox/messages/:id/priority", put(api::update_priority))
            .route("/api/inbox/stats", get(api::stats))
            .route("/api/inbox/sync", post(api::sync))
            .layer(DefaultBodyLimit::max(self.max_body_bytes))
            .with_state(self.state.clone())
    }

    fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        // Security: bind to localhost-only if no auth token configured
        if self.state.auth_token.is_none() {
            warn!("No inbox API auth token configured, binding to 127.0.0.1 only");
            return Ok(SocketAddr::from(([127, 0, 0, 1], self.port)));
        }
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let addr = self.bind_addr()?;
        info!(%addr, platforms = ?self.state.receivers.keys().collect::<Vec<_>>(), "gateway listening");

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Verify the Authorization header against the configured token.
pub(crate) fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected_token) = &state.auth_token else {
        // No auth configured = local-only, all requests allowed
        return Ok(());
    };

    let provided_token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or("");

    if constant_time_eq(provided_token, expected_token) {
        Ok(())
    } else {
        warn!("Unauthorized inbox API access attempt");
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn now_ms_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub(crate) async fn record_platform_events(state: &AppState, platform: PlatformType, count: usize) {
    let mut stats = state.platform_stats.lock().await;
    let entry = stats.entry(platform).or_default();
    entry.last_event_at_ms = Some(now_ms_epoch());
    entry.events_received += count as u64;
}

pub(crate) async fn record_platform_error(state: &AppState, platform: PlatformType, error: impl Into<String>) {
    let mut stats = state.platform_stats.lock().await;
    let entry = stats.entry(platform).or_default();
    entry.error_count += 1;
    entry.last_error = Some(error.into());
    entry.last_error_at_ms = Some(now_ms_epoch());
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MetricsSnapshot>, StatusCode> {
    check_auth(&state, &headers)?;
    Ok(Json(state.metrics.snapshot()))
}

#[derive(Serialize)]
struct PlatformHealth {
    configured: bool,
    accounts: usize,
    #[serde(flatten)]
    runtime: PlatformRuntimeStats,
}

async fn platform_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BTreeMap<PlatformType, PlatformHealth>>, StatusCode> {
    check_auth(&state, &headers)?;
    let stats = state.platform_stats.lock().await;
    let report = PlatformType::ALL
        .iter()
        .map(|platform| {
            (
                *platform,
                PlatformHealth {
                    configured: state.receivers.contains_key(platform),
                    accounts: state.accounts.for_platform(*platform).count(),
                    runtime: stats.get(platform).cloned().unwrap_or_default(),
                },
            )
        })
        .collect();
    Ok(Json(report))
}
