//! Broadcast API
//!
//! - `GET /api/broadcasts` - Recent broadcast history
//! - `POST /api/broadcasts` - Send a message (optionally with a photo) to every active user
//!
//! The POST request returns only after the whole fan-out has finished.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::broadcast::{BroadcastError, BroadcastOutcome, BroadcastRequest};
use crate::dashboard::auth::AdminSession;

const HISTORY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct BroadcastBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: BroadcastOutcome,
}

impl From<BroadcastError> for ApiError {
    fn from(error: BroadcastError) -> Self {
        match error {
            BroadcastError::EmptyMessage => Self::Validation("Message text is empty".into()),
            BroadcastError::NoRecipients => Self::Validation(error.to_string()),
            BroadcastError::Store(e) => Self::Upstream(format!("Failed to load recipients: {}", e)),
        }
    }
}

pub async fn list_broadcasts(_session: AdminSession, State(state): State<AppState>) -> Json<Value> {
    let history = state.broadcasts.history(HISTORY_LIMIT).await;
    Json(json!({ "history": history }))
}

pub async fn send_broadcast(
    session: AdminSession,
    State(state): State<AppState>,
    body: Result<Json<BroadcastBody>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let Json(body) = body?;
    let request = BroadcastRequest {
        message: body.message.unwrap_or_default(),
        photo_url: body.photo_url,
    };

    let outcome = state.broadcasts.send(session.username(), request).await?;

    Ok(Json(BroadcastResponse {
        success: true,
        outcome,
    }))
}

pub fn broadcasts_router() -> Router<AppState> {
    Router::new().route("/broadcasts", get(list_broadcasts).post(send_broadcast))
}
