//! User Management API
//!
//! Bot users are owned by the bot product; the console reads them and
//! changes a few fields under admin action.
//!
//! # Endpoints
//!
//! - `GET /api/users` - Paginated, searchable user list
//! - `GET /api/users/{id}` - User with referrer and two referral levels
//! - `POST /api/users/{id}/balance` - Adjust caps balance
//! - `POST /api/users/{id}/block` - Block or unblock, notifying the user
//! - `POST /api/users/{id}/level` - Set basic/vip level
//! - `POST /api/users/{id}/message` - Direct message through the bot
//! - `GET /api/users/{id}/messages` - Admin message history

use axum::{
    extract::{rejection::JsonRejection, Path, Query as QueryParams, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use super::{ApiError, AppState, Success};
use crate::audit::AuditAction;
use crate::dashboard::auth::AdminSession;
use crate::store::{find_by_id, value_text, Filter, Query};

const USERS_TABLE: &str = "users";

const LIST_COLUMNS: &[&str] = &[
    "id",
    "telegram_id",
    "system_uid",
    "first_name",
    "username",
    "caps_balance",
    "is_blocked",
    "created_at",
    "last_activity",
    "total_referrals",
    "ai_requests_count",
];

const SEARCH_COLUMNS: &[&str] = &["first_name", "username", "telegram_id", "system_uid"];

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;
const MESSAGE_HISTORY_LIMIT: usize = 100;

/// Block state filter for the list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFilter {
    #[default]
    All,
    Blocked,
    Active,
}

/// List query parameters
#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub filter: UserFilter,
}

/// User list response
#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<Value>,
    pub total: u64,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub success: bool,
    #[serde(rename = "newBalance")]
    pub new_balance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    Block,
    Unblock,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub action: BlockAction,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLevel {
    Basic,
    Vip,
}

impl UserLevel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Vip => "vip",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LevelRequest {
    #[serde(default)]
    pub level: Value,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse a balance delta sent as a JSON number or numeric string
fn parse_amount(amount: &Value) -> Option<i64> {
    let parsed = match amount {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.filter(|a| *a != 0)
}

fn text_field(row: &Value, column: &str) -> String {
    row.get(column).and_then(value_text).unwrap_or_default()
}

async fn require_user(state: &AppState, id: &str, columns: &[&str]) -> Result<Value, ApiError> {
    find_by_id(state.store.as_ref(), USERS_TABLE, columns, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

/// List users
pub async fn list_users(
    _session: AdminSession,
    State(state): State<AppState>,
    QueryParams(params): QueryParams<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let mut query = Query::new()
        .columns(LIST_COLUMNS)
        .order_by("created_at", false)
        .limit(limit)
        .offset((page - 1) * limit)
        .with_count();

    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(Filter::search(SEARCH_COLUMNS, search));
    }
    match params.filter {
        UserFilter::All => {}
        UserFilter::Blocked => query = query.filter(Filter::eq("is_blocked", true)),
        UserFilter::Active => query = query.filter(Filter::eq("is_blocked", false)),
    }

    let rows = state.store.select(USERS_TABLE, &query).await?;
    let total = rows.total.unwrap_or(rows.rows.len() as u64);

    Ok(Json(UserListResponse {
        users: rows.rows,
        total,
        page,
        limit,
    }))
}

/// User detail with referral tree
pub async fn get_user(
    _session: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut user = require_user(&state, &id, &[]).await?;
    let store = state.store.as_ref();

    let referrer = match user.get("referrer_id").and_then(value_text) {
        Some(referrer_id) => find_by_id(store, USERS_TABLE, &["id", "first_name", "username"], &referrer_id).await?,
        None => None,
    };

    let user_id = user.get("id").and_then(value_text).unwrap_or_else(|| id.clone());
    let level_one_ids: Vec<String> = store
        .select(
            "referrals",
            &Query::new()
                .columns(&["referred_id"])
                .filter(Filter::eq("referrer_id", &user_id)),
        )
        .await?
        .rows
        .iter()
        .filter_map(|r| r.get("referred_id").and_then(value_text))
        .collect();

    let mut referrals = Vec::new();
    let mut referrals_l2 = Vec::new();

    if !level_one_ids.is_empty() {
        referrals = store
            .select(
                USERS_TABLE,
                &Query::new()
                    .columns(&["id", "first_name", "username", "created_at"])
                    .filter(Filter::any_of("id", &level_one_ids)),
            )
            .await?
            .rows;

        let level_two_ids: Vec<String> = store
            .select(
                "referrals",
                &Query::new()
                    .columns(&["referred_id", "referrer_id"])
                    .filter(Filter::any_of("referrer_id", &level_one_ids)),
            )
            .await?
            .rows
            .iter()
            .filter_map(|r| r.get("referred_id").and_then(value_text))
            .collect();

        if !level_two_ids.is_empty() {
            let parents: HashMap<String, String> = referrals
                .iter()
                .filter_map(|r| Some((r.get("id").and_then(value_text)?, text_field(r, "first_name"))))
                .collect();

            referrals_l2 = store
                .select(
                    USERS_TABLE,
                    &Query::new()
                        .columns(&["id", "first_name", "username", "created_at", "referrer_id"])
                        .filter(Filter::any_of("id", &level_two_ids)),
                )
                .await?
                .rows
                .into_iter()
                .map(|mut row| {
                    let via = row
                        .get("referrer_id")
                        .and_then(value_text)
                        .and_then(|parent| parents.get(&parent).cloned())
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| "—".to_string());
                    if let Value::Object(map) = &mut row {
                        map.insert("via".into(), Value::String(via));
                    }
                    row
                })
                .collect();
        }
    }

    if let Value::Object(map) = &mut user {
        map.insert("referrer".into(), referrer.unwrap_or(Value::Null));
        map.insert("referrals".into(), Value::Array(referrals));
        map.insert("referrals_l2".into(), Value::Array(referrals_l2));
    }

    Ok(Json(json!({ "user": user })))
}

/// Adjust a user's caps balance by a signed delta
pub async fn change_balance(
    session: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BalanceRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let Json(request) = body?;
    let amount = parse_amount(&request.amount).ok_or_else(|| ApiError::Validation("Invalid amount".into()))?;

    let user = require_user(&state, &id, &["caps_balance", "first_name", "telegram_id"]).await?;
    let old_balance = user.get("caps_balance").and_then(Value::as_i64).unwrap_or(0);

    let new_balance = old_balance
        .checked_add(amount)
        .ok_or_else(|| ApiError::Validation("Invalid amount".into()))?;
    if new_balance < 0 {
        return Err(ApiError::Validation("Balance cannot be negative".into()));
    }

    // Read-then-write: concurrent changes to the same user are not serialized
    state
        .store
        .update(USERS_TABLE, &[Filter::eq("id", &id)], json!({ "caps_balance": new_balance }))
        .await?;

    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("not specified");
    state
        .audit
        .log(
            session.username(),
            AuditAction::BalanceChange,
            &format!(
                "Balance of {}: {} → {} ({:+}). Reason: {}",
                text_field(&user, "first_name"),
                old_balance,
                new_balance,
                amount,
                reason
            ),
            Some(id.as_str()),
        )
        .await;

    info!("{} changed balance of user {} by {}", session.username(), id, amount);

    Ok(Json(BalanceResponse {
        success: true,
        new_balance,
    }))
}

/// Block or unblock a user
pub async fn change_block(
    session: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BlockRequest>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let Json(request) = body?;
    let user = require_user(&state, &id, &["telegram_id", "first_name"]).await?;
    let telegram_id = text_field(&user, "telegram_id");
    let name = text_field(&user, "first_name");

    match request.action {
        BlockAction::Block => {
            let reason = request
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| ApiError::Validation("Block reason is required".into()))?;

            state
                .store
                .update(
                    USERS_TABLE,
                    &[Filter::eq("id", &id)],
                    json!({ "is_blocked": true, "block_reason": reason }),
                )
                .await?;

            notify(
                &state,
                &telegram_id,
                &format!(
                    "🚫 <b>Your account has been blocked</b>\n\nReason: {}\n\nContact an administrator to be unblocked.",
                    reason
                ),
            )
            .await;

            if let Some(video_url) = request.video_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
                match state
                    .messenger
                    .send_video(&telegram_id, video_url, Some(&format!("🚫 Blocked: {}", reason)))
                    .await
                {
                    Ok(outcome) if !outcome.ok => {
                        warn!("Block video to {} rejected: {:?}", telegram_id, outcome.description)
                    }
                    Err(e) => warn!("Block video to {} failed: {}", telegram_id, e),
                    Ok(_) => {}
                }
            }

            state
                .audit
                .log(
                    session.username(),
                    AuditAction::BlockUser,
                    &format!("Blocked {} ({}). Reason: {}", name, telegram_id, reason),
                    Some(id.as_str()),
                )
                .await;
        }
        BlockAction::Unblock => {
            state
                .store
                .update(
                    USERS_TABLE,
                    &[Filter::eq("id", &id)],
                    json!({ "is_blocked": false, "block_reason": null }),
                )
                .await?;

            notify(
                &state,
                &telegram_id,
                "✅ <b>Your account has been unblocked</b>\n\nWelcome back to CRAFT! 🍺",
            )
            .await;

            state
                .audit
                .log(
                    session.username(),
                    AuditAction::UnblockUser,
                    &format!("Unblocked {} ({})", name, telegram_id),
                    Some(id.as_str()),
                )
                .await;
        }
    }

    Ok(Success::ok())
}

/// Best-effort notification
async fn notify(state: &AppState, telegram_id: &str, text: &str) {
    match state.messenger.send_text(telegram_id, text).await {
        Ok(outcome) if !outcome.ok => {
            warn!("Notification to {} rejected: {:?}", telegram_id, outcome.description)
        }
        Err(e) => warn!("Notification to {} failed: {}", telegram_id, e),
        Ok(_) => {}
    }
}

/// Set a user's level
pub async fn change_level(
    session: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<LevelRequest>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let Json(request) = body?;
    let level: UserLevel = serde_json::from_value(request.level)
        .map_err(|_| ApiError::Validation("Invalid level".into()))?;

    require_user(&state, &id, &["id"]).await?;

    state
        .store
        .update(USERS_TABLE, &[Filter::eq("id", &id)], json!({ "level": level.as_str() }))
        .await?;

    state
        .audit
        .log(
            session.username(),
            AuditAction::ChangeLevel,
            &format!("User {} → {}", id, level.as_str().to_uppercase()),
            Some(id.as_str()),
        )
        .await;

    Ok(Success::ok())
}

/// Send a direct message to a user
pub async fn send_message(
    session: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = body?;
    let text = request
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Message text is empty".into()))?;

    let user = require_user(&state, &id, &["telegram_id", "first_name"]).await?;
    let telegram_id = text_field(&user, "telegram_id");

    let outcome = state
        .messenger
        .send_text(&telegram_id, &text)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    state
        .audit
        .log(
            session.username(),
            AuditAction::SendMessage,
            &format!("Message to {} ({})", text_field(&user, "first_name"), telegram_id),
            Some(id.as_str()),
        )
        .await;

    Ok(Json(MessageResponse {
        success: outcome.ok,
        error: if outcome.ok { None } else { outcome.description },
    }))
}

/// Admin message history, oldest first
pub async fn list_messages(
    _session: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = match find_by_id(state.store.as_ref(), USERS_TABLE, &["telegram_id"], &id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ApiError::NotFound("User not found".into())),
        Err(e) => {
            warn!("Failed to look up user {} for message history: {}", id, e);
            return Ok(Json(json!({ "messages": [] })));
        }
    };
    let telegram_id = text_field(&user, "telegram_id");

    let query = Query::new()
        .filter(Filter::eq("user_telegram_id", &telegram_id))
        .order_by("created_at", true)
        .limit(MESSAGE_HISTORY_LIMIT);

    let messages = match state.store.select("admin_messages", &query).await {
        Ok(rows) => rows.rows,
        Err(e) => {
            warn!("Failed to load messages for user {}: {}", id, e);
            Vec::new()
        }
    };

    Ok(Json(json!({ "messages": messages })))
}

pub fn users_router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/balance", post(change_balance))
        .route("/users/{id}/block", post(change_block))
        .route("/users/{id}/level", post(change_level))
        .route("/users/{id}/message", post(send_message))
        .route("/users/{id}/messages", get(list_messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AUDIT_TABLE;
    use crate::dashboard::api::test_support::{Fixture, RecordingMessenger};
    use crate::store::StoreError;
    use axum::http::{Method, StatusCode};

    fn seed_users(fixture: &Fixture) {
        fixture.store.seed(
            USERS_TABLE,
            vec![
                json!({"id": 1, "telegram_id": 1001, "first_name": "Ivan", "username": "ivan",
                       "caps_balance": 100, "is_blocked": false, "created_at": "2026-01-01T10:00:00Z"}),
                json!({"id": 2, "telegram_id": 1002, "first_name": "Olga", "username": "olga",
                       "caps_balance": 5, "is_blocked": true, "created_at": "2026-01-02T10:00:00Z",
                       "referrer_id": 1}),
                json!({"id": 3, "telegram_id": 1003, "first_name": "Petr", "username": "petr_k",
                       "caps_balance": 0, "is_blocked": false, "created_at": "2026-01-03T10:00:00Z",
                       "referrer_id": 2}),
            ],
        );
        fixture.store.seed(
            "referrals",
            vec![
                json!({"referrer_id": 1, "referred_id": 2}),
                json!({"referrer_id": 2, "referred_id": 3}),
            ],
        );
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(&json!(50)), Some(50));
        assert_eq!(parse_amount(&json!(-20)), Some(-20));
        assert_eq!(parse_amount(&json!("15")), Some(15));
        assert_eq!(parse_amount(&json!(0)), None);
        assert_eq!(parse_amount(&json!(1.5)), None);
        assert_eq!(parse_amount(&json!("abc")), None);
        assert_eq!(parse_amount(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filters() {
        let fixture = Fixture::new();
        seed_users(&fixture);

        let (status, body) = fixture.call(Method::GET, "/users", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["users"][0]["first_name"], "Petr");

        let (_, body) = fixture.call(Method::GET, "/users?filter=blocked", None).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["users"][0]["first_name"], "Olga");

        let (_, body) = fixture.call(Method::GET, "/users?filter=active&search=PETR", None).await;
        assert_eq!(body["total"], 1);

        let (_, body) = fixture.call(Method::GET, "/users?page=2&limit=2", None).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["users"].as_array().unwrap().len(), 1);
        assert_eq!(body["users"][0]["first_name"], "Ivan");
    }

    #[tokio::test]
    async fn test_detail_with_referral_tree() {
        let fixture = Fixture::new();
        seed_users(&fixture);

        let (status, body) = fixture.call(Method::GET, "/users/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let user = &body["user"];
        assert!(user["referrer"].is_null());
        assert_eq!(user["referrals"][0]["first_name"], "Olga");
        assert_eq!(user["referrals_l2"][0]["first_name"], "Petr");
        assert_eq!(user["referrals_l2"][0]["via"], "Olga");

        let (_, body) = fixture.call(Method::GET, "/users/3", None).await;
        assert_eq!(body["user"]["referrer"]["first_name"], "Olga");

        let (status, body) = fixture.call(Method::GET, "/users/99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "User not found");
    }

    #[tokio::test]
    async fn test_balance_change_and_audit() {
        let fixture = Fixture::new();
        seed_users(&fixture);

        let (status, body) = fixture
            .call(Method::POST, "/users/1/balance", Some(json!({"amount": -30, "reason": "refund"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newBalance"], 70);
        assert_eq!(fixture.store.rows(USERS_TABLE)[0]["caps_balance"], 70);

        let audit = fixture.store.rows(AUDIT_TABLE);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0]["action"], "BALANCE_CHANGE");
        assert_eq!(audit[0]["target_id"], "1");
        let details = audit[0]["details"].as_str().unwrap();
        assert!(details.contains("100 → 70"), "{}", details);
    }

    #[tokio::test]
    async fn test_balance_cannot_go_negative() {
        let fixture = Fixture::new();
        seed_users(&fixture);

        let (status, body) = fixture
            .call(Method::POST, "/users/2/balance", Some(json!({"amount": -6})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Balance cannot be negative");
        assert_eq!(fixture.store.rows(USERS_TABLE)[1]["caps_balance"], 5);
        assert!(fixture.store.rows(AUDIT_TABLE).is_empty());

        let (status, _) = fixture
            .call(Method::POST, "/users/2/balance", Some(json!({"amount": 0})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = fixture
            .call(Method::POST, "/users/99/balance", Some(json!({"amount": 5})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_block_requires_reason_and_notifies() {
        let fixture = Fixture::new();
        seed_users(&fixture);

        let (status, _) = fixture
            .call(Method::POST, "/users/1/block", Some(json!({"action": "block", "reason": "  "})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(fixture.store.rows(USERS_TABLE)[0]["is_blocked"], false);

        let (status, body) = fixture
            .call(
                Method::POST,
                "/users/1/block",
                Some(json!({"action": "block", "reason": "spam", "video_url": "https://cdn.example.com/v.mp4"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let row = &fixture.store.rows(USERS_TABLE)[0];
        assert_eq!(row["is_blocked"], true);
        assert_eq!(row["block_reason"], "spam");

        let sent = fixture.messenger.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "1001");
        assert!(sent[0].1.contains("spam"));
        assert_eq!(fixture.messenger.videos.lock().len(), 1);

        assert_eq!(fixture.store.rows(AUDIT_TABLE)[0]["action"], "BLOCK_USER");
    }

    #[tokio::test]
    async fn test_unblock_survives_failed_notification() {
        let fixture = Fixture::with_messenger(RecordingMessenger {
            failing: vec!["1002".into()],
            ..Default::default()
        });
        seed_users(&fixture);

        let (status, _) = fixture
            .call(Method::POST, "/users/2/block", Some(json!({"action": "unblock"})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let row = &fixture.store.rows(USERS_TABLE)[1];
        assert_eq!(row["is_blocked"], false);
        assert!(row["block_reason"].is_null());
        assert_eq!(fixture.store.rows(AUDIT_TABLE)[0]["action"], "UNBLOCK_USER");
    }

    #[tokio::test]
    async fn test_level_change() {
        let fixture = Fixture::new();
        seed_users(&fixture);

        let (status, body) = fixture
            .call(Method::POST, "/users/1/level", Some(json!({"level": "gold"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid level");

        let (status, _) = fixture
            .call(Method::POST, "/users/1/level", Some(json!({"level": "vip"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fixture.store.rows(USERS_TABLE)[0]["level"], "vip");
        assert_eq!(fixture.store.rows(AUDIT_TABLE)[0]["action"], "CHANGE_LEVEL");
    }

    #[tokio::test]
    async fn test_send_message_reports_outcome() {
        let fixture = Fixture::with_messenger(RecordingMessenger {
            failing: vec!["1002".into()],
            ..Default::default()
        });
        seed_users(&fixture);

        let (status, body) = fixture
            .call(Method::POST, "/users/1/message", Some(json!({"text": "Hello <b>Ivan</b>"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (status, body) = fixture
            .call(Method::POST, "/users/2/message", Some(json!({"text": "Hello"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("blocked"));

        let (status, _) = fixture
            .call(Method::POST, "/users/1/message", Some(json!({"text": "   "})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(fixture.store.rows(AUDIT_TABLE).len(), 2);
    }

    #[tokio::test]
    async fn test_message_history_oldest_first() {
        let fixture = Fixture::new();
        seed_users(&fixture);
        fixture.store.seed(
            "admin_messages",
            vec![
                json!({"user_telegram_id": 1001, "text": "second", "created_at": "2026-02-02T00:00:00Z"}),
                json!({"user_telegram_id": 1001, "text": "first", "created_at": "2026-02-01T00:00:00Z"}),
                json!({"user_telegram_id": 1002, "text": "other", "created_at": "2026-02-01T00:00:00Z"}),
            ],
        );

        let (status, body) = fixture.call(Method::GET, "/users/1/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["text"], "first");
    }

    struct DownStore;

    #[async_trait::async_trait]
    impl crate::store::Store for DownStore {
        async fn select(&self, _: &str, _: &Query) -> Result<crate::store::Rows, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn insert(&self, _: &str, _: Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn upsert(&self, _: &str, _: Value, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn update(&self, _: &str, _: &[Filter], _: Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn delete(&self, _: &str, _: &[Filter]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
        async fn count(&self, _: &str, _: &[Filter]) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_message_history_empty_when_store_down() {
        let mut fixture = Fixture::new();
        fixture.state.store = std::sync::Arc::new(DownStore);

        let (status, body) = fixture.call(Method::GET, "/users/1/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"messages": []}));

        // Other lookups still surface the outage
        let (status, _) = fixture.call(Method::GET, "/users/1", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_message_history_unknown_user() {
        let fixture = Fixture::new();
        seed_users(&fixture);

        let (status, body) = fixture.call(Method::GET, "/users/99/messages", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "User not found");
    }
}
