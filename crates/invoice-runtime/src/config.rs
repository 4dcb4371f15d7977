//! # Runtime Configuration
//!
//! Everything the process needs, loaded from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PORT` | `3000` |
//! | `INVOICE_HTTP_HOST` | `0.0.0.0` |
//! | `INVOICE_NODE_BACKEND` | `simulated` (`simulated` or `lnd`) |
//! | `LND_REST_HOST` | required for `lnd` |
//! | `LND_MACAROON_BASE64` / `LND_MACAROON_HEX` | one required for `lnd` |
//! | `LND_TLS_CERT_BASE64` | optional |
//! | `INVOICE_SECRET_CUSTODY` | `client` |
//! | `INVOICE_DEFAULT_TTL_SECS` | `3600` |
//! | `INVOICE_TERMINAL_RETENTION_SECS` | `600` |
//! | `INVOICE_SWEEP_INTERVAL_SECS` | `10` |
//! | `INVOICE_LOG_LEVEL` / `RUST_LOG` | `info` |
//! | `INVOICE_JSON_LOGS` | on inside containers |

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hold_invoice::{LifecycleConfig, SecretCustody};
use invoice_gateway::GatewayConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeConfigError {
    #[error("{0} is required when INVOICE_NODE_BACKEND=lnd")]
    Missing(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("lifecycle configuration: {0}")]
    Lifecycle(#[from] hold_invoice::ConfigError),

    #[error("gateway configuration: {0}")]
    Gateway(#[from] invoice_gateway::ConfigError),
}

fn invalid(var: &'static str, reason: impl fmt::Display) -> RuntimeConfigError {
    RuntimeConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub gateway: GatewayConfig,
    pub lifecycle: LifecycleConfig,
    pub backend: NodeBackendConfig,
    pub telemetry: TelemetryConfig,
}

/// Which node the service drives
#[derive(Debug, Clone, Default)]
pub enum NodeBackendConfig {
    /// In-memory node for development
    #[default]
    Simulated,
    Lnd(LndConfig),
}

impl NodeBackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Lnd(_) => "lnd",
        }
    }
}

/// LND REST connection settings
#[derive(Clone)]
pub struct LndConfig {
    /// Base URL, e.g. `https://127.0.0.1:8080`
    pub rest_url: String,
    pub macaroon_hex: String,
    /// PEM of the node's TLS certificate, pinned as the only trust root
    pub tls_cert_pem: Option<Vec<u8>>,
    pub request_timeout: Duration,
}

impl fmt::Debug for LndConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LndConfig")
            .field("rest_url", &self.rest_url)
            .field("macaroon_hex", &"<redacted>")
            .field("tls_cert_pem", &self.tls_cert_pem.as_ref().map(Vec::len))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Logging settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RuntimeConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(port) = var("PORT") {
            config.gateway.http.port = port.parse().map_err(|e| invalid("PORT", e))?;
        }
        if let Some(host) = var("INVOICE_HTTP_HOST") {
            config.gateway.http.host =
                IpAddr::from_str(&host).map_err(|e| invalid("INVOICE_HTTP_HOST", e))?;
        }

        if let Some(custody) = var("INVOICE_SECRET_CUSTODY") {
            config.lifecycle.secret_custody = SecretCustody::from_str(&custody)
                .map_err(|e| invalid("INVOICE_SECRET_CUSTODY", e))?;
        }
        if let Some(ttl) = parse_secs(&var, "INVOICE_DEFAULT_TTL_SECS")? {
            config.lifecycle.default_ttl = ttl;
        }
        if let Some(retention) = parse_secs(&var, "INVOICE_TERMINAL_RETENTION_SECS")? {
            config.lifecycle.terminal_retention = retention;
        }
        if let Some(interval) = parse_secs(&var, "INVOICE_SWEEP_INTERVAL_SECS")? {
            config.lifecycle.sweep_interval = interval;
        }

        config.backend = match var("INVOICE_NODE_BACKEND").as_deref() {
            None | Some("simulated") => NodeBackendConfig::Simulated,
            Some("lnd") => NodeBackendConfig::Lnd(lnd_from(&var)?),
            Some(other) => {
                return Err(invalid(
                    "INVOICE_NODE_BACKEND",
                    format!("unknown backend {other:?} (expected simulated or lnd)"),
                ))
            }
        };

        let is_container = lookup("KUBERNETES_SERVICE_HOST").is_some()
            || lookup("DOCKER_CONTAINER").is_some();
        config.telemetry = TelemetryConfig {
            log_level: var("INVOICE_LOG_LEVEL")
                .or_else(|| var("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),
            json_logs: var("INVOICE_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(is_container),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate all nested configuration
    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        self.lifecycle.validate()?;
        self.gateway.validate()?;
        Ok(())
    }
}

fn parse_secs<F>(var: &F, key: &'static str) -> Result<Option<Duration>, RuntimeConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|v| v.parse::<u64>().map(Duration::from_secs).map_err(|e| invalid(key, e)))
        .transpose()
}

fn lnd_from<F>(var: &F) -> Result<LndConfig, RuntimeConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = var("LND_REST_HOST").ok_or(RuntimeConfigError::Missing("LND_REST_HOST"))?;
    let rest_url = if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };

    let macaroon_hex = match (var("LND_MACAROON_HEX"), var("LND_MACAROON_BASE64")) {
        (Some(hex_value), _) => {
            hex::decode(&hex_value).map_err(|e| invalid("LND_MACAROON_HEX", e))?;
            hex_value.to_lowercase()
        }
        (None, Some(b64)) => {
            let bytes = BASE64
                .decode(b64.as_bytes())
                .map_err(|e| invalid("LND_MACAROON_BASE64", e))?;
            hex::encode(bytes)
        }
        (None, None) => return Err(RuntimeConfigError::Missing("LND_MACAROON_BASE64")),
    };

    let tls_cert_pem = var("LND_TLS_CERT_BASE64")
        .map(|b64| {
            BASE64
                .decode(b64.as_bytes())
                .map_err(|e| invalid("LND_TLS_CERT_BASE64", e))
        })
        .transpose()?;

    Ok(LndConfig {
        rest_url,
        macaroon_hex,
        tls_cert_pem,
        request_timeout: Duration::from_secs(30),
    })
}
