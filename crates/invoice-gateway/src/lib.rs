//! Invoice Gateway - HTTP interface for the hold-invoice service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      INVOICE GATEWAY                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │   HTTP :3000                                                  │
//! │        │                                                      │
//! │  ┌─────┴──────────────────────────────────────┐               │
//! │  │  Middleware: CORS → Tracing → Metrics →    │               │
//! │  │              Timeout → body limit          │               │
//! │  └─────┬──────────────────────────────────────┘               │
//! │        │                                                      │
//! │  ┌─────┴──────────┐   ┌─────────────────┐                     │
//! │  │  hold routes   │   │  wallet routes  │                     │
//! │  └─────┬──────────┘   └───────┬─────────┘                     │
//! └────────┼──────────────────────┼──────────────────────────────┘
//!          ▼                      ▼
//!    HoldInvoiceApi         WalletGateway
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use invoice_gateway::{GatewayConfig, InvoiceGatewayService};
//!
//! let gateway = InvoiceGatewayService::new(GatewayConfig::default(), lifecycle, wallet)?;
//! gateway.start(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod middleware;
pub mod routes;
pub mod service;

pub use domain::{
    ApiError, ConfigError, CorsConfig, GatewayConfig, GatewayServiceError, HttpConfig,
    LimitsConfig, RouteTimeout, TimeoutConfig,
};
pub use middleware::GatewayMetrics;
pub use routes::AppState;
pub use service::InvoiceGatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
