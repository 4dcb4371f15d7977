//! Lifecycle manager configuration with validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Who keeps the secret after an invoice is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretCustody {
    /// Secret is returned once to the creator and then forgotten.
    /// Settling requires the creator to present it again.
    #[default]
    Client,
    /// Secret stays in process memory and is never returned.
    /// Settling needs only the invoice id.
    Server,
}

impl FromStr for SecretCustody {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(ConfigError::Invalid(format!(
                "unknown secret custody mode '{other}' (expected client or server)"
            ))),
        }
    }
}

impl fmt::Display for SecretCustody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Lifecycle manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Expiry applied when a create request names none
    #[serde(with = "duration_serde")]
    pub default_ttl: Duration,
    /// Shortest accepted expiry
    #[serde(with = "duration_serde")]
    pub min_ttl: Duration,
    /// Longest accepted expiry
    #[serde(with = "duration_serde")]
    pub max_ttl: Duration,
    /// Where secrets live after creation
    pub secret_custody: SecretCustody,
    /// How long terminal records stay visible before eviction
    #[serde(with = "duration_serde")]
    pub terminal_retention: Duration,
    /// Period of the expiry/eviction sweep
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            min_ttl: Duration::from_secs(1),
            max_ttl: Duration::from_secs(30 * 24 * 3600),
            secret_custody: SecretCustody::Client,
            terminal_retention: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

impl LifecycleConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_ttl.is_zero() {
            return Err(ConfigError::InvalidTtl("min_ttl cannot be 0".into()));
        }
        if self.min_ttl > self.max_ttl {
            return Err(ConfigError::InvalidTtl(
                "min_ttl cannot exceed max_ttl".into(),
            ));
        }
        if self.default_ttl < self.min_ttl || self.default_ttl > self.max_ttl {
            return Err(ConfigError::InvalidTtl(format!(
                "default_ttl {}s outside [{}s, {}s]",
                self.default_ttl.as_secs(),
                self.min_ttl.as_secs(),
                self.max_ttl.as_secs()
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("sweep_interval cannot be 0".into()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Expiry bounds are inconsistent
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Duration serde as `"<n>s"`, `"<n>ms"`, `"<n>m"` or plain seconds
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m.saturating_mul(60)))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LifecycleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.secret_custody, SecretCustody::Client);
    }

    #[test]
    fn test_default_ttl_outside_bounds() {
        let config = LifecycleConfig {
            default_ttl: Duration::from_secs(60 * 24 * 3600),
            ..LifecycleConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTtl(_))));
    }

    #[test]
    fn test_zero_sweep_interval() {
        let config = LifecycleConfig {
            sweep_interval: Duration::ZERO,
            ..LifecycleConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_custody_from_str() {
        assert_eq!("Server".parse::<SecretCustody>(), Ok(SecretCustody::Server));
        assert_eq!(" client ".parse::<SecretCustody>(), Ok(SecretCustody::Client));
        assert!("vault".parse::<SecretCustody>().is_err());
    }

    #[test]
    fn test_duration_formats() {
        use duration_serde::parse_duration;
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: LifecycleConfig =
            serde_json::from_str(r#"{"default_ttl":"120s","secret_custody":"server"}"#).unwrap();
        assert_eq!(config.default_ttl, Duration::from_secs(120));
        assert_eq!(config.secret_custody, SecretCustody::Server);
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
    }
}
