//! Admin Dashboard Module
//!
//! HTTP gateway behind the CRAFT admin console. Every route except login
//! and the health probes requires a bearer token issued by `/api/auth/login`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Dashboard Server                │
//! ├──────────────────────────────────────────────┤
//! │  rate limit → AdminSession → handler         │
//! │                                              │
//! │  POST /api/auth/login     → Issue token      │
//! │  GET  /api/auth/verify    → Check token      │
//! │  /api/users[/{id}/...]    → Users            │
//! │  /api/offers              → Shop offers      │
//! │  /api/achievements        → Achievements     │
//! │  /api/ai-knowledge        → Knowledge base   │
//! │  /api/settings            → Key/value store  │
//! │  GET  /api/stats          → Dashboard totals │
//! │  GET  /api/audit-log      → Audit trail      │
//! │  /api/broadcasts          → Fan-out + history│
//! │  POST /api/upload         → Broadcast images │
//! │  GET  /api/health{,z}     → Probes           │
//! └──────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod server;

pub use api::{api_router, ApiError, AppState, ErrorResponse, HealthState};
pub use auth::{
    authorize, hash_password, AdminIdentity, AdminRole, AdminSession, AuthRejection, AuthState,
    CredentialError, CredentialStore, TokenError, TokenService,
};
pub use config::DashboardConfig;
pub use server::DashboardServer;
