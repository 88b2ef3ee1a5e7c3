//! Console settings: a flat key/value table.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::{ApiError, AppState, Success};
use crate::audit::AuditAction;
use crate::dashboard::auth::AdminSession;
use crate::store::{value_text, Query};

const SETTINGS_TABLE: &str = "admin_settings";

#[derive(Debug, Deserialize)]
pub struct SettingUpdate {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

pub async fn get_settings(_session: AdminSession, State(state): State<AppState>) -> Json<Value> {
    let mut settings = Map::new();

    match state.store.select(SETTINGS_TABLE, &Query::new()).await {
        Ok(rows) => {
            for row in rows.rows {
                if let Some(key) = row.get("key").and_then(value_text) {
                    let value = row.get("value").cloned().unwrap_or(Value::Null);
                    settings.insert(key, value);
                }
            }
        }
        Err(e) => warn!("Failed to load settings: {}", e),
    }

    Json(json!({ "settings": settings }))
}

pub async fn update_setting(
    session: AdminSession,
    State(state): State<AppState>,
    body: Result<Json<SettingUpdate>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let Json(update) = body?;
    let key = update
        .key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::Validation("Key is required".into()))?;

    let value = match update.value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    };

    state
        .store
        .upsert(
            SETTINGS_TABLE,
            json!({ "key": key, "value": value, "updated_at": Utc::now().to_rfc3339() }),
            "key",
        )
        .await
        .map_err(|e| {
            warn!("Settings upsert failed: {}", e);
            ApiError::Upstream("Failed to save setting".into())
        })?;

    state
        .audit
        .log(session.username(), AuditAction::SettingsUpdate, &format!("Updated setting: {}", key), None)
        .await;

    Ok(Success::ok())
}

pub fn settings_router() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).post(update_setting))
}
