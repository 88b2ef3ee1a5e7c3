//! Dashboard Statistics API
//!
//! Headline numbers for the console landing page. All queries run
//! concurrently; "today" starts at midnight UTC.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::{ApiError, AppState};
use crate::dashboard::auth::AdminSession;
use crate::store::{Filter, Query};

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_users: u64,
    pub new_today: u64,
    pub active_today: u64,
    pub total_ai_requests: u64,
    pub ai_cost_usd: f64,
    pub total_caps_circulation: i64,
    pub total_caps_on_balances: i64,
    pub total_referrals: u64,
    pub pending_applications: u64,
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

fn int_column(row: &Value, column: &str) -> i64 {
    row.get(column).and_then(Value::as_i64).unwrap_or(0)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub async fn get_stats(
    _session: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let store = state.store.as_ref();
    let today = start_of_day(Utc::now()).to_rfc3339();

    let created_today = [Filter::gte("created_at", &today)];
    let seen_today = [Filter::gte("last_activity", &today)];
    let pending = [Filter::eq("status", "pending")];
    let ai_query = Query::new().columns(&["tokens_used", "cost_usd"]);
    let balance_query = Query::new().columns(&["caps_balance", "total_earned_caps", "total_spent_caps"]);

    let (total_users, new_today, active_today, ai_rows, balance_rows, total_referrals, pending_applications) =
        tokio::try_join!(
            store.count("users", &[]),
            store.count("users", &created_today),
            store.count("users", &seen_today),
            store.select("ai_conversations", &ai_query),
            store.select("users", &balance_query),
            store.count("referrals", &[]),
            store.count("applications", &pending),
        )
        .map_err(|e| {
            tracing::warn!("Stats query failed: {}", e);
            ApiError::Upstream("Failed to fetch stats".into())
        })?;

    let ai_cost: f64 = ai_rows
        .rows
        .iter()
        .filter_map(|r| r.get("cost_usd").and_then(Value::as_f64))
        .sum();

    let on_balances = balance_rows.rows.iter().map(|r| int_column(r, "caps_balance")).sum();
    let circulation = balance_rows
        .rows
        .iter()
        .map(|r| int_column(r, "total_earned_caps") + int_column(r, "total_spent_caps"))
        .sum();

    Ok(Json(StatsResponse {
        total_users,
        new_today,
        active_today,
        total_ai_requests: ai_rows.rows.len() as u64,
        ai_cost_usd: round_cents(ai_cost),
        total_caps_circulation: circulation,
        total_caps_on_balances: on_balances,
        total_referrals,
        pending_applications,
    }))
}

pub fn stats_router() -> Router<AppState> {
    Router::new().route("/stats", get(get_stats))
}
