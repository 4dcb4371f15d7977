//! Gateway domain: configuration and error mapping

pub mod config;
pub mod error;

pub use config::{
    ConfigError, CorsConfig, GatewayConfig, HttpConfig, LimitsConfig, RouteTimeout, TimeoutConfig,
};
pub use error::{ApiError, GatewayServiceError};
