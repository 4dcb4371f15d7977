//! # Invoice Runtime
//!
//! Process entry for the hold-invoice service. The `invoice-runtime` binary
//! loads [`RuntimeConfig`] from the environment, installs logging and runs
//! [`InvoiceRuntime`] until Ctrl+C.
//!
//! ## Modules
//!
//! - `config/` - environment configuration
//! - `telemetry/` - tracing subscriber setup
//! - `adapters/` - LND REST backend
//! - `runtime/` - component wiring and the sweeper task

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod config;
pub mod runtime;
pub mod telemetry;

pub use adapters::LndRestClient;
pub use config::{LndConfig, NodeBackendConfig, RuntimeConfig, RuntimeConfigError, TelemetryConfig};
pub use runtime::InvoiceRuntime;
pub use telemetry::{init_logging, TelemetryError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
