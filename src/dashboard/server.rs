//! Dashboard HTTP Server
//!
//! Axum server for the admin API with CORS, per-client rate limiting and
//! graceful shutdown.

use crate::dashboard::api::{api_router, AppState};
use crate::dashboard::config::DashboardConfig;
use crate::rate_limit::{rate_limit_middleware, LoginThrottle, RateLimitLayerState, RateLimiter};
use axum::{
    http::{header, HeaderValue, Method},
    middleware, Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// How often expired throttle and limiter records are dropped
const COUNTER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Dashboard server
pub struct DashboardServer {
    config: DashboardConfig,
    state: AppState,
    limiter: Arc<RateLimiter>,
}

impl DashboardServer {
    pub fn new(config: DashboardConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// Build the router with all routes and middleware
    fn build_router(&self) -> Router {
        let origins: Vec<HeaderValue> = self
            .config
            .cors_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(origin) => Some(origin),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();

        let cors = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        let mut api = api_router(self.state.clone());
        if self.config.rate_limit_enabled {
            api = api.layer(middleware::from_fn_with_state(
                RateLimitLayerState {
                    limiter: self.limiter.clone(),
                    requests_per_minute: self.config.rate_limit_rpm,
                },
                rate_limit_middleware,
            ));
        }

        let mut router = Router::new().nest("/api", api).layer(cors);

        if self.config.log_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Periodically reclaim expired login and request counters
    fn spawn_counter_sweeper(&self) -> JoinHandle<()> {
        let throttle = self.state.throttle.clone();
        let limiter = self.limiter.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(COUNTER_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = sweep_counters(&throttle, &limiter, Utc::now());
                if removed > 0 {
                    debug!("Dropped {} expired rate-limit records", removed);
                }
            }
        })
    }

    /// Start the server and run until shutdown signal
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let router = self.build_router();

        info!("Starting admin API on {}", addr);
        if !self.config.is_localhost() {
            warn!("Admin API bound to {} - ensure it is behind TLS", addr);
        }
        info!("Admin API available at {}/api", self.config.base_url());

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let sweeper = self.spawn_counter_sweeper();

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        sweeper.abort();
        served?;

        info!("Admin API shut down gracefully");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }
}

fn sweep_counters(throttle: &LoginThrottle, limiter: &RateLimiter, now: DateTime<Utc>) -> usize {
    throttle.purge_expired(now) + limiter.purge_expired(now)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
