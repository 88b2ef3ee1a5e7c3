//! Dashboard Authentication
//!
//! Stateless JWT sessions for a fixed set of admins.
//!
//! # Security Model
//!
//! - **Credentials**: read-only table loaded once at startup from a TOML file,
//!   passwords stored as Argon2id PHC strings
//! - **Tokens**: HS256, 24-hour expiry, no refresh and no revocation list.
//!   Rotating the signing secret invalidates every outstanding token.
//! - **Login lockout**: repeated failures from one client address lock it out
//!   for a while, 5 failures / 5 minutes by default
//!   (see [`crate::rate_limit::LoginThrottle`])
//!
//! # Endpoints
//!
//! - `POST /api/auth/login` - Exchange username/password for a token
//! - `GET /api/auth/verify` - Check a token and return its identity

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{rejection::JsonRejection, FromRef, FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::AuditAction;
use crate::dashboard::api::{ApiError, AppState};
use crate::rate_limit::client_ip;

/// Session token lifetime
pub const TOKEN_TTL_HOURS: i64 = 24;

// ============================================================================
// Identities and credentials
// ============================================================================

/// Admin role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Admin,
    Superadmin,
}

impl fmt::Display for AdminRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => f.write_str("admin"),
            Self::Superadmin => f.write_str("superadmin"),
        }
    }
}

/// Authenticated admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub username: String,
    pub role: AdminRole,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read credentials file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid credentials file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid password hash for admin '{0}'")]
    InvalidHash(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    admins: HashMap<String, AdminEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct AdminEntry {
    password_hash: String,
    role: AdminRole,
}

/// Read-only admin credential table
///
/// ```toml
/// [admins.craft_admin]
/// password_hash = "$argon2id$v=19$..."
/// role = "superadmin"
/// ```
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    admins: HashMap<String, AdminEntry>,
}

impl CredentialStore {
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CredentialError> {
        let file: CredentialsFile = toml::from_str(raw)?;

        for (username, entry) in &file.admins {
            PasswordHash::new(&entry.password_hash)
                .map_err(|_| CredentialError::InvalidHash(username.clone()))?;
        }

        Ok(Self { admins: file.admins })
    }

    pub fn len(&self) -> usize {
        self.admins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.admins.contains_key(username)
    }

    /// Check a username/password pair
    ///
    /// Unknown usernames still pay for one argon2 verification.
    pub fn verify(&self, username: &str, password: &str) -> Option<AdminIdentity> {
        let Some(entry) = self.admins.get(username) else {
            if let Some(hash) = dummy_hash().and_then(|h| PasswordHash::new(h).ok()) {
                let _ = Argon2::default().verify_password(password.as_bytes(), &hash);
            }
            return None;
        };
        let parsed = PasswordHash::new(&entry.password_hash).ok()?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .ok()
            .map(|_| AdminIdentity {
                username: username.to_string(),
                role: entry.role,
            })
    }
}

/// Hash compared against when the username is unknown
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("craft-admin-placeholder").ok())
        .as_deref()
}

/// Hash a password as an Argon2id PHC string
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hashing(e.to_string()))
}

// ============================================================================
// Token service
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("Invalid token")]
    Invalid,

    #[error("Token expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Admin username
    pub sub: String,
    pub role: AdminRole,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(TOKEN_TTL_HOURS),
        }
    }

    pub fn issue(&self, identity: &AdminIdentity) -> Result<String, TokenError> {
        self.issue_at(identity, Utc::now())
    }

    pub fn verify(&self, token: &str) -> Result<AdminIdentity, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn issue_at(&self, identity: &AdminIdentity, now: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims {
            sub: identity.username.clone(),
            role: identity.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Valid strictly before `exp`
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<AdminIdentity, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the caller's clock
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| TokenError::Invalid)?;

        if now.timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(AdminIdentity {
            username: data.claims.sub,
            role: data.claims.role,
        })
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Token service plus the credential table it vouches for
pub struct AuthState {
    pub tokens: TokenService,
    pub credentials: CredentialStore,
}

impl AuthState {
    pub fn new(tokens: TokenService, credentials: CredentialStore) -> Self {
        Self { tokens, credentials }
    }
}

/// Rejection returned verbatim by every protected endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("Unauthorized")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Resolve the admin behind a request's bearer token
pub fn authorize(headers: &HeaderMap, auth: &AuthState) -> Result<AdminIdentity, AuthRejection> {
    let Some(bearer) = headers.typed_get::<Authorization<Bearer>>() else {
        return Err(AuthRejection::MissingToken);
    };

    let identity = auth
        .tokens
        .verify(bearer.token())
        .map_err(|_| AuthRejection::InvalidToken)?;

    if !auth.credentials.contains(&identity.username) {
        warn!("Token for unknown admin '{}' rejected", identity.username);
        return Err(AuthRejection::InvalidToken);
    }

    Ok(identity)
}

/// Authenticated admin, extracted before any handler logic runs
#[derive(Debug, Clone)]
pub struct AdminSession(pub AdminIdentity);

impl AdminSession {
    pub fn username(&self) -> &str {
        &self.0.username
    }

    pub fn role(&self) -> AdminRole {
        self.0.role
    }
}

impl<S> FromRequestParts<S> for AdminSession
where
    Arc<AuthState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<AuthState>::from_ref(state);
        authorize(&parts.headers, &auth).map(AdminSession)
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub username: String,
    pub role: AdminRole,
}

/// Verify response
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub username: String,
    pub role: AdminRole,
}

/// Login handler
pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let ip = client_ip(&headers);

    let locked = |secs: Option<u64>| {
        ApiError::RateLimited(format!(
            "Too many login attempts. Try again in {}s",
            secs.unwrap_or(1)
        ))
    };

    let check = state.throttle.check(&ip);
    if !check.allowed {
        return Err(locked(check.retry_after_secs));
    }

    let Json(request) = body?;
    let (Some(username), Some(password)) = (
        request.username.filter(|u| !u.is_empty()),
        request.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::Validation("Username and password are required".into()));
    };

    // Charged as a failure until the password checks out
    let attempt = state.throttle.begin(&ip);
    if !attempt.allowed {
        return Err(locked(attempt.retry_after_secs));
    }

    let auth = state.auth.clone();
    let name = username.clone();
    let verified = tokio::task::spawn_blocking(move || auth.credentials.verify(&name, &password))
        .await
        .map_err(|e| ApiError::Internal(format!("Password check failed: {}", e)))?;

    let Some(identity) = verified else {
        warn!("Failed login for '{}' from {}", username, ip);
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    state.throttle.record(&ip, true);

    let token = state
        .auth
        .tokens
        .issue(&identity)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state
        .audit
        .log(&identity.username, AuditAction::Login, &format!("Login from IP: {}", ip), None)
        .await;

    info!("Admin '{}' logged in from {}", identity.username, ip);

    Ok(Json(LoginResponse {
        success: true,
        token,
        username: identity.username,
        role: identity.role,
    }))
}

/// Verify handler
pub async fn verify_handler(session: AdminSession) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        username: session.0.username,
        role: session.0.role,
    })
}

/// Create the authentication router
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login_handler))
        .route("/verify", get(verify_handler))
}

// ============================================================================
// Tests
// ============================================================================
