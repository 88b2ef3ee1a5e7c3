//! Dashboard API Endpoints
//!
//! JSON API consumed by the admin console front end. Every route except
//! login and the health probes takes an [`AdminSession`](super::auth::AdminSession)
//! as its first extractor, so an unauthenticated request is rejected before
//! the handler body runs.

pub mod audit_log;
pub mod broadcasts;
pub mod catalog;
pub mod health;
pub mod knowledge;
pub mod settings;
pub mod stats;
pub mod upload;
pub mod users;

use axum::{
    extract::{rejection::JsonRejection, FromRef},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::audit::AuditRecorder;
use crate::broadcast::BroadcastEngine;
use crate::dashboard::auth::{auth_router, AuthState};
use crate::rate_limit::{LockoutPolicy, LoginThrottle};
use crate::store::{BlobStore, Store, StoreError};
use crate::telegram::Messenger;

pub use health::{health_router, HealthState};

/// API errors, serialized as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// Store refused a write; its message is passed through
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Store error on a write whose message the client should see
    pub fn rejected(error: StoreError) -> Self {
        Self::Rejected(error.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::Upstream(error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// `{"success": true}`
#[derive(Debug, Serialize)]
pub struct Success {
    pub success: bool,
}

impl Success {
    pub fn ok() -> Json<Self> {
        Json(Self { success: true })
    }
}

/// `?id=` selector for collection writes
#[derive(Debug, Deserialize)]
pub struct IdParam {
    pub id: Option<String>,
}

impl IdParam {
    pub fn require(self) -> Result<String, ApiError> {
        self.id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Validation("Missing id".into()))
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub messenger: Arc<dyn Messenger>,
    pub auth: Arc<AuthState>,
    pub throttle: Arc<LoginThrottle>,
    pub audit: AuditRecorder,
    pub broadcasts: BroadcastEngine,
    pub health: Arc<HealthState>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        messenger: Arc<dyn Messenger>,
        auth: AuthState,
        lockout: LockoutPolicy,
        broadcast_delay: Duration,
    ) -> Self {
        let audit = AuditRecorder::new(store.clone());
        let broadcasts =
            BroadcastEngine::new(store.clone(), messenger.clone(), audit.clone(), broadcast_delay);

        Self {
            store,
            blobs,
            messenger,
            auth: Arc::new(auth),
            throttle: Arc::new(LoginThrottle::new(lockout)),
            audit,
            broadcasts,
            health: Arc::new(HealthState::new()),
        }
    }
}

impl FromRef<AppState> for Arc<AuthState> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl FromRef<AppState> for Arc<HealthState> {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

/// Create the full API router
///
/// Routes (relative to `/api`):
/// - /auth/login, /auth/verify
/// - /users, /users/{id}, /users/{id}/{balance,block,level,message,messages}
/// - /offers, /achievements, /ai-knowledge, /settings
/// - /stats, /audit-log, /broadcasts, /upload
/// - /health, /healthz, /readyz
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/auth", auth_router())
        .merge(users::users_router())
        .merge(catalog::catalog_router())
        .merge(knowledge::knowledge_router())
        .merge(settings::settings_router())
        .merge(stats::stats_router())
        .merge(audit_log::audit_log_router())
        .merge(broadcasts::broadcasts_router())
        .merge(upload::upload_router())
        .merge(health_router())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use axum::http::Method;

    #[test]
    fn test_error_statuses() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Rejected("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::RateLimited("x".into()).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::from(StoreError::Unavailable("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rejected_passes_store_message() {
        let error = ApiError::rejected(StoreError::Rejected("duplicate key value".into()));
        assert_eq!(error.to_string(), "duplicate key value");
    }

    #[test]
    fn test_id_param() {
        assert_eq!(IdParam { id: Some(" 7 ".into()) }.require().unwrap(), "7");
        assert!(IdParam { id: Some("".into()) }.require().is_err());
        assert!(IdParam { id: None }.require().is_err());
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let fixture = Fixture::new();

        for (method, uri) in [
            (Method::GET, "/users"),
            (Method::GET, "/users/1"),
            (Method::POST, "/users/1/balance"),
            (Method::GET, "/offers"),
            (Method::DELETE, "/achievements?id=1"),
            (Method::GET, "/ai-knowledge"),
            (Method::POST, "/settings"),
            (Method::GET, "/stats"),
            (Method::GET, "/audit-log"),
            (Method::POST, "/broadcasts"),
            (Method::GET, "/auth/verify"),
        ] {
            let (status, body) = fixture.call_with(method.clone(), uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
            assert_eq!(body["error"], "Unauthorized");

            let (status, body) = fixture.call_with(method.clone(), uri, None, Some("forged")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
            assert_eq!(body["error"], "Invalid or expired token");
        }
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let fixture = Fixture::new();
        let (status, body) = fixture.call_with(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
