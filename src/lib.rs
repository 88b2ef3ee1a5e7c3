//! CRAFT Admin Gateway
//!
//! Authenticated HTTP backend for the CRAFT Telegram bot's admin console.
//!
//! # Features
//!
//! - **Auth Gateway**: argon2 credentials, HS256 session tokens, bearer extractor
//! - **Login Throttle**: per-client lockout after repeated failures
//! - **Rate Limiting**: fixed-window limiter as axum middleware
//! - **Audit Trail**: one entry per state-changing admin action
//! - **Broadcasts**: paced fan-out to every active bot user
//!
//! # Architecture
//!
//! ```text
//! Admin console ──► /api ──► AdminSession ──► handler ──► Store (PostgREST)
//!                   │                            │
//!                   └── rate limit               ├── Messenger (Telegram)
//!                                                └── AuditRecorder
//! ```

pub mod audit;
pub mod broadcast;
pub mod config;
pub mod dashboard;
pub mod rate_limit;
pub mod store;
pub mod telegram;

pub use audit::{AuditAction, AuditRecorder};
pub use broadcast::{BroadcastEngine, BroadcastError, BroadcastOutcome, BroadcastRequest};
pub use config::Config;
pub use dashboard::{AppState, DashboardConfig, DashboardServer};
pub use rate_limit::{LockoutPolicy, LoginThrottle, RateLimiter};
pub use store::{BlobStore, MemoryStore, PostgrestStore, Store, StoreError};
pub use telegram::{Messenger, SendOutcome, TelegramMessenger};
