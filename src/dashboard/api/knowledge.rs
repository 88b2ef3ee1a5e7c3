//! AI Knowledge Base API
//!
//! Reference material the bot's assistant draws on, highest priority first.

use axum::{
    extract::{rejection::JsonRejection, Query as QueryParams, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::catalog::object_body;
use super::{ApiError, AppState, IdParam, Success};
use crate::audit::AuditAction;
use crate::dashboard::auth::AdminSession;
use crate::store::{Filter, Query};

const KNOWLEDGE_TABLE: &str = "ai_knowledge_base";

const DEFAULT_SOURCE: &str = "admin";
const DEFAULT_PRIORITY: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct NewKnowledgeItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
}

pub async fn list_items(_session: AdminSession, State(state): State<AppState>) -> Json<Value> {
    let query = Query::new().order_by("priority", false);
    let items = match state.store.select(KNOWLEDGE_TABLE, &query).await {
        Ok(rows) => rows.rows,
        Err(e) => {
            warn!("Failed to list knowledge base: {}", e);
            Vec::new()
        }
    };
    Json(json!({ "items": items }))
}

pub async fn add_item(
    session: AdminSession,
    State(state): State<AppState>,
    body: Result<Json<NewKnowledgeItem>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let Json(item) = body?;
    let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());

    let (Some(title), Some(content)) = (non_empty(item.title), non_empty(item.content)) else {
        return Err(ApiError::Validation("Title and content are required".into()));
    };

    let row = json!({
        "title": title,
        "content": content,
        "source": non_empty(item.source).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        "priority": item.priority.filter(|p| *p != 0).unwrap_or(DEFAULT_PRIORITY),
        "is_active": true,
    });

    state
        .store
        .insert(KNOWLEDGE_TABLE, row)
        .await
        .map_err(ApiError::rejected)?;

    state
        .audit
        .log(session.username(), AuditAction::AddKnowledge, &format!("Added material: {}", title), None)
        .await;

    Ok(Success::ok())
}

pub async fn patch_item(
    _session: AdminSession,
    State(state): State<AppState>,
    QueryParams(params): QueryParams<IdParam>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let id = params.require()?;
    let patch = object_body(body)?;

    state
        .store
        .update(KNOWLEDGE_TABLE, &[Filter::eq("id", &id)], patch)
        .await
        .map_err(ApiError::rejected)?;

    Ok(Success::ok())
}

pub async fn delete_item(
    session: AdminSession,
    State(state): State<AppState>,
    QueryParams(params): QueryParams<IdParam>,
) -> Result<Json<Success>, ApiError> {
    let id = params.require()?;

    state
        .store
        .delete(KNOWLEDGE_TABLE, &[Filter::eq("id", &id)])
        .await
        .map_err(ApiError::rejected)?;

    state
        .audit
        .log(
            session.username(),
            AuditAction::DeleteKnowledge,
            &format!("Deleted material #{}", id),
            Some(id.as_str()),
        )
        .await;

    Ok(Success::ok())
}

pub fn knowledge_router() -> Router<AppState> {
    Router::new().route(
        "/ai-knowledge",
        get(list_items).post(add_item).patch(patch_item).delete(delete_item),
    )
}
