//! Gateway configuration

use hold_invoice::domain::config::duration_serde;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// HTTP gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub http: HttpConfig,
    pub cors: CorsConfig,
    pub timeouts: TimeoutConfig,
    pub limits: LimitsConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.limits.max_request_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_request_size cannot be 0".into(),
            ));
        }

        if self.limits.max_description_len == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_description_len cannot be 0".into(),
            ));
        }

        if self.timeouts.default.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default timeout cannot be 0".into(),
            ));
        }

        if let Some(route) = self.timeouts.routes.iter().find(|r| r.timeout.is_zero()) {
            return Err(ConfigError::InvalidTimeout(format!(
                "timeout for {} cannot be 0",
                route.path
            )));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 3000)
    pub port: u16,
    /// Enable HTTP server
    pub enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3000,
            enabled: true,
        }
    }
}

/// Request size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max request body size in bytes
    pub max_request_size: usize,
    /// Max invoice description length in bytes (BOLT11 caps it at 639)
    pub max_description_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 64 * 1024,
            max_description_len: 639,
        }
    }
}

/// Timeout override for one route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTimeout {
    pub path: String,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

/// Request timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default timeout for most requests
    #[serde(with = "duration_serde")]
    pub default: Duration,
    /// Per-route overrides
    pub routes: Vec<RouteTimeout>,
    /// Routes that run without a request timeout. Settlement waits are
    /// bounded by the invoice expiry instead.
    pub exempt: Vec<String>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            routes: vec![RouteTimeout {
                path: "/pay".into(),
                timeout: Duration::from_secs(60),
            }],
            exempt: vec!["/settleholdinvoice".into()],
        }
    }
}

impl TimeoutConfig {
    /// Timeout for `path`, or `None` when the route is exempt
    pub fn for_path(&self, path: &str) -> Option<Duration> {
        if self.exempt.iter().any(|p| p == path) {
            return None;
        }
        let timeout = self
            .routes
            .iter()
            .find(|r| r.path == path)
            .map_or(self.default, |r| r.timeout);
        Some(timeout)
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins ("*" for all)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Exposed headers
    pub expose_headers: Vec<String>,
    /// Max age for preflight cache (seconds)
    pub max_age: u64,
    /// Allow credentials
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            allowed_headers: vec!["Content-Type".to_string(), "traceparent".to_string()],
            expose_headers: vec!["x-request-id".to_string()],
            max_age: 3600,
            allow_credentials: false,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("HTTP port cannot be 0")]
    InvalidPort,

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
