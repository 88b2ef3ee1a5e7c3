//! CRAFT Admin Gateway - Entry Point
//!
//! Modes:
//! - serve (default): run the admin API
//! - hash-password <password>: print an argon2 hash for the credentials file

use anyhow::Context;
use craft_admin::dashboard::{hash_password, AuthState, CredentialStore, TokenService};
use craft_admin::{AppState, Config, DashboardConfig, DashboardServer, PostgrestStore, TelegramMessenger};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("CRAFT Admin Gateway v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: craft-admin [COMMAND]");
    println!();
    println!("Commands:");
    println!("  serve                      Run the admin API (default)");
    println!("  hash-password <password>   Print an argon2 hash for admins.toml");
    println!("  --help, -h                 Show this help");
    println!();
    println!("Environment variables:");
    println!("  JWT_SECRET                 Session token signing secret (required)");
    println!("  SUPABASE_URL               Hosted store URL (required)");
    println!("  SUPABASE_SERVICE_ROLE_KEY  Store key (falls back to SUPABASE_ANON_KEY)");
    println!("  TELEGRAM_BOT_TOKEN         Bot token for notifications (required)");
    println!("  CRAFT_ADMINS_FILE          Credential table (default: admins.toml)");
    println!("  LOGIN_MAX_FAILURES         Failed logins before lockout (default: 5)");
    println!("  LOGIN_LOCKOUT_SECS         Lockout length (default: 300)");
    println!("  BROADCAST_DELAY_MS         Pause between broadcast sends (default: 50)");
    println!("  DASHBOARD_BIND_ADDR        Listen address (default: 127.0.0.1)");
    println!("  DASHBOARD_PORT             Listen port (default: 8080)");
    println!("  DASHBOARD_RATE_LIMIT_RPM   Requests per minute per client, 0 disables");
    println!("  DASHBOARD_CORS_ORIGINS     Comma-separated allowed origins");
    println!("  CRAFT_LOG_JSON             Set to 1 for JSON logs");
}

fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("CRAFT_LOG_JSON").map(|v| v == "1" || v == "true").unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder
            .json()
            .with_ansi(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let dashboard = DashboardConfig::from_env();

    let credentials = CredentialStore::load(&config.admins_file)
        .with_context(|| format!("loading admin credentials from {}", config.admins_file.display()))?;
    if credentials.is_empty() {
        anyhow::bail!("{} defines no admins", config.admins_file.display());
    }
    info!("Loaded {} admin account(s)", credentials.len());

    let store = Arc::new(PostgrestStore::new(config.store_config()));
    let state = AppState::new(
        store.clone(),
        store,
        Arc::new(TelegramMessenger::new(&config.telegram_bot_token)),
        AuthState::new(TokenService::new(&config.jwt_secret), credentials),
        config.lockout_policy(),
        config.broadcast_delay,
    );

    DashboardServer::new(dashboard, state).run().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("--help") | Some("-h") => {
            print_help();
            Ok(())
        }
        Some("hash-password") => {
            let password = args.get(1).context("usage: craft-admin hash-password <password>")?;
            println!("{}", hash_password(password)?);
            Ok(())
        }
        None | Some("serve") => {
            init_logging()?;
            info!("CRAFT Admin Gateway v{}", env!("CARGO_PKG_VERSION"));
            serve().await
        }
        Some(other) => {
            print_help();
            anyhow::bail!("unknown command: {}", other)
        }
    }
}
