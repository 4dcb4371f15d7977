//! Hold-invoice lifecycle manager
//!
//! Creates hold invoices locked to a fresh secret, watches each one until a
//! payment is held, and then settles or cancels it. Exactly one of those
//! actions is ever dispatched per invoice.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    HOLD INVOICE LIFECYCLE                          │
//! ├───────────────────────────────────────────────────────────────────┤
//! │   HoldInvoiceApi  (create_hold / await_and_settle / cancel)        │
//! │          │                                                         │
//! │  ┌───────┴──────────────────────────────┐                          │
//! │  │  HoldInvoiceService                  │   sweep_task             │
//! │  │  DashMap<InvoiceId, InvoiceSlot>     │◄── expiry / eviction     │
//! │  │  slot = Mutex<record> + outcome      │                          │
//! │  └───────┬──────────────────────────────┘                          │
//! │          │ one task per watched invoice                            │
//! │  ┌───────┴──────────┐                                              │
//! │  │  InvoiceWatcher  │  select!(cancel, deadline, next update)      │
//! │  └───────┬──────────┘                                              │
//! └──────────┼─────────────────────────────────────────────────────────┘
//!            │ NodeGateway / WalletGateway / CommitmentSource
//!     ┌──────┴───────┬────────────────┐
//!     ▼              ▼                ▼
//!  LND REST     SimulatedNode      OsEntropy
//! ```
//!
//! # Invoice states
//!
//! OPEN → HELD → SETTLED, with CANCELLED, EXPIRED and FAILED as the other
//! terminal states. See [`domain::invoice`] for the transition table.
//!
//! # Usage
//!
//! ```ignore
//! use hold_invoice::{CreateHold, HoldInvoiceApi, HoldInvoiceService, LifecycleConfig};
//!
//! let service = HoldInvoiceService::new(LifecycleConfig::default(), node)?;
//! let created = service.create_hold(CreateHold::new(1_000)).await?;
//! let secret = created.secret.expect("client custody returns the secret");
//! let state = service.await_and_settle(&created.id, secret).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

mod slot;
mod watcher;

pub use adapters::{OsEntropy, SimulatedCalls, SimulatedNode};
pub use domain::{
    Commitment, ConfigError, HexValueError, InvoiceId, InvoiceState, InvoiceUpdate, InvoiceView,
    LifecycleConfig, NodeInvoice, PaymentHash, Preimage, SecretCustody,
};
pub use error::{
    GatewayError, LifecycleError, LifecycleResult, NodeContext, Operation, SettlementResult,
};
pub use metrics::{LifecycleMetrics, LifecycleMetricsSnapshot};
pub use ports::{
    CommitmentSource, CreateHold, CreateHoldRequest, CreatedHoldInvoice, EntropyError,
    HoldExpiry, HoldInvoiceApi, HoldInvoiceCreated, InvoiceUpdateStream, NodeGateway, NodeInfo,
    PaymentOutcome, PlainInvoice, WalletBalance, WalletGateway,
};
pub use service::{sweep_task, HoldInvoiceService, SweepReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
