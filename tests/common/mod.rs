//! Shared harness for the gateway integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use craft_admin::dashboard::{api_router, hash_password, AuthState, CredentialStore, TokenService};
use craft_admin::audit::AUDIT_TABLE;
use craft_admin::broadcast::HISTORY_TABLE;
use craft_admin::store::{Filter, Query, Rows};
use craft_admin::telegram::{Messenger, MessengerError, SendOutcome};
use craft_admin::{AppState, LockoutPolicy, MemoryStore, Store, StoreError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret-9f8e7d6c5b4a";
pub const ADMIN: &str = "barkeeper";
pub const PASSWORD: &str = "hoppy-ipa-2026";

/// Messenger that records every send; ids in `blocked_by` reject delivery
#[derive(Default)]
pub struct RecordingMessenger {
    pub blocked_by: Vec<String>,
    pub sends: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    fn deliver(&self, recipient: &str) -> SendOutcome {
        self.sends.lock().push(recipient.to_string());
        if self.blocked_by.iter().any(|id| id == recipient) {
            SendOutcome::rejected("Forbidden: bot was blocked by the user")
        } else {
            SendOutcome::delivered()
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, recipient: &str, _text: &str) -> Result<SendOutcome, MessengerError> {
        Ok(self.deliver(recipient))
    }

    async fn send_photo(
        &self,
        recipient: &str,
        _url: &str,
        _caption: Option<&str>,
    ) -> Result<SendOutcome, MessengerError> {
        Ok(self.deliver(recipient))
    }

    async fn send_video(
        &self,
        recipient: &str,
        _url: &str,
        _caption: Option<&str>,
    ) -> Result<SendOutcome, MessengerError> {
        Ok(self.deliver(recipient))
    }
}

/// Store whose audit and broadcast history tables refuse every write
pub struct LogRejectingStore {
    inner: Arc<MemoryStore>,
}

impl LogRejectingStore {
    fn guard(table: &str) -> Result<(), StoreError> {
        if table == AUDIT_TABLE || table == HISTORY_TABLE {
            return Err(StoreError::Unavailable(format!("{} is read-only", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for LogRejectingStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Rows, StoreError> {
        self.inner.select(table, query).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        Self::guard(table)?;
        self.inner.insert(table, row).await
    }

    async fn upsert(&self, table: &str, row: Value, conflict_column: &str) -> Result<(), StoreError> {
        Self::guard(table)?;
        self.inner.upsert(table, row, conflict_column).await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<(), StoreError> {
        self.inner.update(table, filters, patch).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), StoreError> {
        self.inner.delete(table, filters).await
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        self.inner.count(table, filters).await
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub messenger: Arc<RecordingMessenger>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(RecordingMessenger::default(), LockoutPolicy::default())
    }

    pub fn with(messenger: RecordingMessenger, lockout: LockoutPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), store, messenger, lockout)
    }

    /// App whose audit log and broadcast history writes always fail
    pub fn with_rejected_logs(messenger: RecordingMessenger) -> Self {
        let store = Arc::new(MemoryStore::new());
        let logs = Arc::new(LogRejectingStore { inner: store.clone() });
        Self::build(store, logs, messenger, LockoutPolicy::default())
    }

    fn build(
        store: Arc<MemoryStore>,
        rows: Arc<dyn Store>,
        messenger: RecordingMessenger,
        lockout: LockoutPolicy,
    ) -> Self {
        let hash = hash_password(PASSWORD).expect("hash password");
        let credentials = CredentialStore::from_toml_str(&format!(
            "[admins.{}]\npassword_hash = \"{}\"\nrole = \"admin\"\n",
            ADMIN, hash
        ))
        .expect("credential table");

        let messenger = Arc::new(messenger);
        let state = AppState::new(
            rows,
            store.clone(),
            messenger.clone(),
            AuthState::new(TokenService::new(SECRET), credentials),
            lockout,
            Duration::from_millis(1),
        );

        Self { store, messenger, state }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        client: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", client);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = api_router(self.state.clone())
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub async fn login(&self, username: &str, password: &str, client: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            "/auth/login",
            Some(serde_json::json!({"username": username, "password": password})),
            None,
            client,
        )
        .await
    }

    /// Log in as the seeded admin and return the token
    pub async fn token(&self) -> String {
        let (status, body) = self.login(ADMIN, PASSWORD, "10.0.0.1").await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().expect("token").to_string()
    }
}
