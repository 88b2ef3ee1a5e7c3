//! Audit trail viewer

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use super::AppState;
use crate::dashboard::auth::AdminSession;

const RECENT_ENTRIES: usize = 50;

pub async fn list_audit_log(_session: AdminSession, State(state): State<AppState>) -> Json<Value> {
    let logs = state.audit.recent(RECENT_ENTRIES).await;
    Json(json!({ "logs": logs }))
}

pub fn audit_log_router() -> Router<AppState> {
    Router::new().route("/audit-log", get(list_audit_log))
}
