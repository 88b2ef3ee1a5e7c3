//! Dashboard Configuration
//!
//! Listener, CORS and request-limiting settings for the admin API server.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Dashboard server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Bind address (default: 127.0.0.1, front with a reverse proxy)
    pub bind_addr: IpAddr,
    /// Port number (default: 8080)
    pub port: u16,
    /// Enable per-client request limiting on `/api`
    pub rate_limit_enabled: bool,
    /// Max requests per minute per client
    pub rate_limit_rpm: u32,
    /// Origins allowed to call the API from a browser
    pub cors_origins: Vec<String>,
    /// Enable request logging
    pub log_requests: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            rate_limit_enabled: true,
            rate_limit_rpm: 120,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            log_requests: true,
        }
    }
}

fn flag(value: &str) -> bool {
    value == "true" || value == "1"
}

impl DashboardConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unparsable values keep the default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(parsed) = lookup("DASHBOARD_BIND_ADDR").and_then(|v| v.parse().ok()) {
            config.bind_addr = parsed;
        }

        if let Some(parsed) = lookup("DASHBOARD_PORT").and_then(|v| v.parse().ok()) {
            config.port = parsed;
        }

        if let Some(rpm) = lookup("DASHBOARD_RATE_LIMIT_RPM").and_then(|v| v.parse::<u32>().ok()) {
            // 0 turns the limiter off
            config.rate_limit_enabled = rpm > 0;
            config.rate_limit_rpm = rpm;
        }

        if let Some(origins) = lookup("DASHBOARD_CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(val) = lookup("DASHBOARD_LOG_REQUESTS") {
            config.log_requests = flag(&val);
        }

        if !config.is_localhost() {
            tracing::warn!(
                "Dashboard binding to {} - make sure TLS terminates in front of it",
                config.bind_addr
            );
        }

        config
    }

    /// Check if bound to localhost only
    pub fn is_localhost(&self) -> bool {
        self.bind_addr.is_loopback()
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.socket_addr())
    }
}
