//! Rate Limiting and Login Lockout
//!
//! Two in-process guards share one keyed counter store:
//!
//! - [`LoginThrottle`]: per-address failure counter with a lockout window
//! - [`RateLimiter`]: fixed-window request counter for arbitrary keys
//!
//! Counters live in process memory. A restart clears every lockout and
//! several server instances do not see each other's counters; swap the
//! [`CounterStore`] for a shared one to lift that.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dashboard::api::ApiError;

/// Keyed value store with optional per-entry expiry
pub trait CounterStore<V>: Send + Sync {
    /// Current value, or `None` if absent or expired at `now`
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V>;

    /// Store a value, optionally expiring at `expires_at`
    fn set(&self, key: &str, value: V, expires_at: Option<DateTime<Utc>>);

    fn delete(&self, key: &str);

    /// Drop entries expired at `now`, returning how many were removed
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

/// Single-instance [`CounterStore`]
pub struct MemoryCounterStore<V> {
    entries: Mutex<HashMap<String, (V, Option<DateTime<Utc>>)>>,
}

impl<V> MemoryCounterStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for MemoryCounterStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> CounterStore<V> for MemoryCounterStore<V> {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = matches!(entries.get(key), Some((_, Some(at))) if *at <= now);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|(value, _)| value.clone())
    }

    fn set(&self, key: &str, value: V, expires_at: Option<DateTime<Utc>>) {
        self.entries.lock().insert(key.to_string(), (value, expires_at));
    }

    fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires)| !matches!(expires, Some(at) if *at <= now));
        before - entries.len()
    }
}

// ============================================================================
// Login throttle
// ============================================================================

/// Lockout policy
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// Failures that arm the lock
    pub max_failures: u32,
    /// How long the lock lasts
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            lockout: Duration::seconds(300),
        }
    }
}

/// Failed login attempts for one source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginAttemptRecord {
    pub failures: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Result of a pre-login check
#[derive(Debug, Clone, PartialEq)]
pub struct LoginCheck {
    pub allowed: bool,
    pub retry_after_secs: Option<u64>,
}

/// Brute-force guard for the login endpoint
pub struct LoginThrottle {
    policy: LockoutPolicy,
    records: Arc<dyn CounterStore<LoginAttemptRecord>>,
    // Serializes read-modify-write on the counter store
    guard: Mutex<()>,
}

impl LoginThrottle {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self::with_store(policy, Arc::new(MemoryCounterStore::new()))
    }

    pub fn with_store(policy: LockoutPolicy, records: Arc<dyn CounterStore<LoginAttemptRecord>>) -> Self {
        Self {
            policy,
            records,
            guard: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn check(&self, key: &str) -> LoginCheck {
        self.check_at(key, Utc::now())
    }

    pub fn record(&self, key: &str, success: bool) {
        self.record_at(key, success, Utc::now())
    }

    /// Reserve a login attempt for `key`; see [`begin_at`](Self::begin_at)
    pub fn begin(&self, key: &str) -> LoginCheck {
        self.begin_at(key, Utc::now())
    }

    /// Drop records whose lock or failure window has passed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let _guard = self.guard.lock();
        self.records.purge_expired(now)
    }

    /// Whether an attempt from `key` may proceed at `now`
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> LoginCheck {
        let _guard = self.guard.lock();
        self.check_locked(key, now)
    }

    /// Check and count an attempt as a failure in one step
    ///
    /// The attempt is charged before the password is verified, so concurrent
    /// attempts from one key can never exceed `max_failures`. A successful
    /// login clears the charge with `record(key, true)`.
    pub fn begin_at(&self, key: &str, now: DateTime<Utc>) -> LoginCheck {
        let _guard = self.guard.lock();

        let check = self.check_locked(key, now);
        if check.allowed {
            self.fail_locked(key, now);
        }
        check
    }

    /// Record the outcome of an attempt from `key`
    pub fn record_at(&self, key: &str, success: bool, now: DateTime<Utc>) {
        let _guard = self.guard.lock();

        if success {
            self.records.delete(key);
        } else {
            self.fail_locked(key, now);
        }
    }

    fn check_locked(&self, key: &str, now: DateTime<Utc>) -> LoginCheck {
        let Some(record) = self.records.get(key, now) else {
            return LoginCheck { allowed: true, retry_after_secs: None };
        };

        match record.locked_until {
            Some(until) if until > now => {
                let remaining_ms = (until - now).num_milliseconds().max(0) as u64;
                let secs = remaining_ms.div_ceil(1000).max(1);
                LoginCheck {
                    allowed: false,
                    retry_after_secs: Some(secs),
                }
            }
            Some(_) => {
                // Lock elapsed: back to a clean slate
                self.records.delete(key);
                debug!("Login lockout expired for {}", key);
                LoginCheck { allowed: true, retry_after_secs: None }
            }
            None => LoginCheck { allowed: true, retry_after_secs: None },
        }
    }

    fn fail_locked(&self, key: &str, now: DateTime<Utc>) {
        let mut record = match self.records.get(key, now) {
            Some(record) if record.locked_until.map_or(true, |until| until > now) => record,
            _ => LoginAttemptRecord::default(),
        };
        record.failures += 1;

        if record.failures >= self.policy.max_failures && record.locked_until.is_none() {
            record.locked_until = Some(now + self.policy.lockout);
            warn!(
                "Login locked for {} after {} failed attempts",
                key, record.failures
            );
        }

        // Failures older than one lockout window are forgotten
        let expires_at = record.locked_until.unwrap_or(now + self.policy.lockout);
        self.records.set(key, record, Some(expires_at));
    }
}

// ============================================================================
// General rate limiter
// ============================================================================

/// Request counter for one key
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

/// Fixed-window rate limiter
pub struct RateLimiter {
    records: Arc<dyn CounterStore<RateLimitRecord>>,
    guard: Mutex<()>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryCounterStore::new()))
    }

    pub fn with_store(records: Arc<dyn CounterStore<RateLimitRecord>>) -> Self {
        Self {
            records,
            guard: Mutex::new(()),
        }
    }

    /// Drop records whose window has closed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let _guard = self.guard.lock();
        self.records.purge_expired(now)
    }

    pub fn check(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        self.check_at(key, max_requests, window, Utc::now())
    }

    /// Count a request for `key`; `false` once `max_requests` is reached in the window
    pub fn check_at(&self, key: &str, max_requests: u32, window: Duration, now: DateTime<Utc>) -> bool {
        let _guard = self.guard.lock();

        match self.records.get(key, now) {
            Some(record) if now <= record.window_reset_at => {
                if record.count >= max_requests {
                    return false;
                }
                let reset = record.window_reset_at;
                self.records.set(
                    key,
                    RateLimitRecord {
                        count: record.count + 1,
                        window_reset_at: reset,
                    },
                    Some(reset),
                );
                true
            }
            _ => {
                let reset = now + window;
                self.records.set(
                    key,
                    RateLimitRecord {
                        count: 1,
                        window_reset_at: reset,
                    },
                    Some(reset),
                );
                true
            }
        }
    }
}

/// Per-client limiter settings for the API middleware
#[derive(Clone)]
pub struct RateLimitLayerState {
    pub limiter: Arc<RateLimiter>,
    pub requests_per_minute: u32,
}

/// Client address from proxy headers
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return ip.to_string();
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return ip.to_string();
    }

    "unknown".to_string()
}

/// Per-client request limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<RateLimitLayerState>,
    req: Request,
    next: Next,
) -> Response {
    let key = format!("api:{}", client_ip(req.headers()));

    if !state
        .limiter
        .check(&key, state.requests_per_minute, Duration::seconds(60))
    {
        warn!("Rate limit exceeded for {}", key);
        return ApiError::RateLimited("Too many requests".into()).into_response();
    }

    next.run(req).await
}
