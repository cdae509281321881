use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

#[derive(Serialize)]
pub struct AuditEvent<'a> {
    pub timestamp: i64,
    pub event_type: &'a str,
    pub account_id: &'a str,
    pub details: Value,
}

/// Emit one JSON audit record on the `audit` tracing target. The CLI routes
/// that target to a rolling file instead of stdout.
pub fn audit_log(event_type: &str, account_id: &str, details: Value) {
    let event = AuditEvent {
        timestamp: Utc::now().timestamp_millis(),
        event_type,
        account_id,
        details,
    };

    // Serialize up front so the subscriber receives the record as clean JSON.
    if let Ok(json_str) = serde_json::to_string(&event) {
        info!(target: "audit", "{}", json_str);
    }
}
