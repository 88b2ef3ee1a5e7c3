//! Configuration management

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::rate_limit::LockoutPolicy;
use crate::store::PostgrestConfig;

/// Longest accepted lockout window, one week
const MAX_LOCKOUT_SECS: i64 = 7 * 24 * 60 * 60;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HS256 signing secret for session tokens (required)
    pub jwt_secret: String,

    /// Hosted store project URL
    pub supabase_url: String,

    /// Service role key, or the anon key when no service key is set
    pub supabase_key: String,

    /// Bot token used for user notifications and broadcasts
    pub telegram_bot_token: String,

    /// TOML credential table
    pub admins_file: PathBuf,

    /// Failed logins before lockout
    pub login_max_failures: u32,

    /// Lockout length in seconds
    pub login_lockout_secs: i64,

    /// Pause after every broadcast send
    pub broadcast_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{} must be set", key));

        let jwt_secret = required("JWT_SECRET")?;
        let supabase_url = required("SUPABASE_URL")?;
        let supabase_key = get("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| get("SUPABASE_ANON_KEY"))
            .context("SUPABASE_SERVICE_ROLE_KEY or SUPABASE_ANON_KEY must be set")?;
        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;

        let admins_file = get("CRAFT_ADMINS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("admins.toml"));

        let login_max_failures = match get("LOGIN_MAX_FAILURES") {
            Some(v) => v.parse().context("LOGIN_MAX_FAILURES must be a positive integer")?,
            None => 5,
        };
        if login_max_failures == 0 {
            bail!("LOGIN_MAX_FAILURES must be at least 1");
        }

        let login_lockout_secs = match get("LOGIN_LOCKOUT_SECS") {
            Some(v) => v.parse().context("LOGIN_LOCKOUT_SECS must be an integer")?,
            None => 300,
        };
        if !(1..=MAX_LOCKOUT_SECS).contains(&login_lockout_secs) {
            bail!("LOGIN_LOCKOUT_SECS must be between 1 and {}", MAX_LOCKOUT_SECS);
        }

        let broadcast_delay_ms: u64 = match get("BROADCAST_DELAY_MS") {
            Some(v) => v.parse().context("BROADCAST_DELAY_MS must be an integer")?,
            None => 50,
        };

        Ok(Self {
            jwt_secret,
            supabase_url,
            supabase_key,
            telegram_bot_token,
            admins_file,
            login_max_failures,
            login_lockout_secs,
            broadcast_delay: Duration::from_millis(broadcast_delay_ms),
        })
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_failures: self.login_max_failures,
            lockout: chrono::Duration::seconds(self.login_lockout_secs),
        }
    }

    pub fn store_config(&self) -> PostgrestConfig {
        PostgrestConfig {
            url: self.supabase_url.clone(),
            api_key: self.supabase_key.clone(),
        }
    }
}
