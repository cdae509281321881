use crate::gateway::{check_auth, AppState};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, warn};
use unibox_core::accounts::AccountScope;
use unibox_core::error::{InboxError, StoreError};
use unibox_core::store::InboxStats;
use unibox_core::types::{InboxMessage, MessageStatus, Priority};
use unibox_inbox::{BulkUpdateResult, MessageFilter, MessagePage, ReplyReceipt, SyncReport};
use uuid::Uuid;

#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Inbox(#[from] InboxError),
}

impl From<StatusCode> for ApiError {
    fn from(_: StatusCode) -> Self {
        ApiError::Unauthorized
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Inbox(err) => match err {
                InboxError::OriginalMessageNotFound(_) | InboxError::AccountNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                InboxError::ProviderAuthExpired(_) => StatusCode::UNAUTHORIZED,
                InboxError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
                InboxError::InvalidTransition { .. } => StatusCode::CONFLICT,
                InboxError::InvalidCursor => StatusCode::BAD_REQUEST,
                InboxError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
                InboxError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                InboxError::Store(StoreError::Corrupt(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        if status.is_server_error() {
            error!(error = %self, "inbox API request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "inbox API request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn scope_for(state: &AppState, organization_id: &str) -> Result<AccountScope, ApiError> {
    if organization_id.trim().is_empty() {
        return Err(ApiError::BadRequest("organization_id is required".into()));
    }
    Ok(state.accounts.scope_for_org(organization_id))
}

fn parse_list<T: FromStr + Ord>(raw: Option<&str>, field: &str) -> Result<BTreeSet<T>, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid {field} `{s}`")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrgQuery {
    #[serde(default)]
    organization_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    organization_id: String,
    platform: Option<String>,
    #[serde(rename = "type")]
    message_type: Option<String>,
    status: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    page_size: Option<usize>,
    cursor: Option<String>,
}

pub(crate) async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<MessagePage> {
    check_auth(&state, &headers)?;
    let scope = scope_for(&state, &query.organization_id)?;
    let filter = MessageFilter {
        platforms: parse_list(query.platform.as_deref(), "platform")?,
        types: parse_list(query.message_type.as_deref(), "type")?,
        statuses: parse_list(query.status.as_deref(), "status")?,
        since: query.since,
        until: query.until,
    };
    let page = state
        .controller
        .get_messages(&scope, &filter, query.page_size, query.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

pub(crate) async fn get_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(query): Query<OrgQuery>,
) -> ApiResult<InboxMessage> {
    check_auth(&state, &headers)?;
    let scope = scope_for(&state, &query.organization_id)?;
    Ok(Json(state.controller.get_message(&scope, id).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkStatusRequest {
    organization_id: String,
    ids: Vec<Uuid>,
    status: MessageStatus,
}

pub(crate) async fn bulk_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BulkStatusRequest>,
) -> ApiResult<BulkUpdateResult> {
    check_auth(&state, &headers)?;
    let scope = scope_for(&state, &req.organization_id)?;
    Ok(Json(
        state
            .controller
            .bulk_update_status(&scope, &req.ids, req.status)
            .await,
    ))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplyRequest {
    organization_id: String,
    content: String,
}

pub(crate) async fn reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> ApiResult<ReplyReceipt> {
    check_auth(&state, &headers)?;
    let scope = scope_for(&state, &req.organization_id)?;
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("reply content is empty".into()));
    }
    Ok(Json(state.controller.reply(&scope, id, &req.content).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriorityRequest {
    organization_id: String,
    priority: Priority,
}

pub(crate) async fn update_priority(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<PriorityRequest>,
) -> ApiResult<InboxMessage> {
    check_auth(&state, &headers)?;
    let scope = scope_for(&state, &req.organization_id)?;
    Ok(Json(
        state.controller.update_priority(&scope, id, req.priority).await?,
    ))
}

pub(crate) async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OrgQuery>,
) -> ApiResult<InboxStats> {
    check_auth(&state, &headers)?;
    let scope = scope_for(&state, &query.organization_id)?;
    Ok(Json(state.controller.get_stats(&scope).await?))
}

pub(crate) async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OrgQuery>,
) -> ApiResult<SyncReport> {
    check_auth(&state, &headers)?;
    let scope = scope_for(&state, &req.organization_id)?;
    Ok(Json(state.controller.sync(&scope).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_core::types::PlatformType;

    #[test]
    fn comma_lists_parse_and_reject_unknown_values() {
        let platforms: BTreeSet<PlatformType> =
            parse_list(Some("twitter, linkedin,,"), "platform").unwrap();
        assert_eq!(
            platforms.into_iter().collect::<Vec<_>>(),
            [PlatformType::Twitter, PlatformType::Linkedin]
        );

        let empty: BTreeSet<PlatformType> = parse_list(None, "platform").unwrap();
        assert!(empty.is_empty());

        let statuses: BTreeSet<MessageStatus> = parse_list(Some("unread"), "status").unwrap();
        assert_eq!(statuses.into_iter().collect::<Vec<_>>(), [MessageStatus::Unread]);

        let err = parse_list::<PlatformType>(Some("myspace"), "platform").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("myspace")));
    }

    #[test]
    fn inbox_errors_map_to_status_codes() {
        let cases = [
            (InboxError::OriginalMessageNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (InboxError::ProviderAuthExpired("acct".into()), StatusCode::UNAUTHORIZED),
            (InboxError::ProviderRejected("nope".into()), StatusCode::BAD_GATEWAY),
            (
                InboxError::InvalidTransition {
                    from: MessageStatus::Archived,
                    to: MessageStatus::Read,
                },
                StatusCode::CONFLICT,
            ),
            (InboxError::InvalidCursor, StatusCode::BAD_REQUEST),
            (
                InboxError::Store(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
