//! Driving Ports (API - Inbound)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::{
    InvoiceId, InvoiceState, InvoiceView, NodeInvoice, PaymentHash, Preimage, SecretCustody,
};
use crate::error::{LifecycleResult, SettlementResult};
use crate::metrics::LifecycleMetricsSnapshot;

/// When a new hold invoice should expire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HoldExpiry {
    /// Configured default TTL
    #[default]
    Default,
    /// Relative to creation
    After(Duration),
    /// Absolute deadline
    At(DateTime<Utc>),
}

/// Request to create a hold invoice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateHold {
    pub amount_sats: u64,
    pub description: Option<String>,
    pub expiry: HoldExpiry,
}

impl CreateHold {
    pub fn new(amount_sats: u64) -> Self {
        Self {
            amount_sats,
            description: None,
            expiry: HoldExpiry::Default,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_expiry(mut self, expiry: HoldExpiry) -> Self {
        self.expiry = expiry;
        self
    }
}

/// A newly created hold invoice
#[derive(Clone, Debug)]
pub struct HoldInvoiceCreated {
    pub id: InvoiceId,
    pub payment_request: String,
    pub commitment_hash: PaymentHash,
    pub expires_at: DateTime<Utc>,
    /// Present only under client custody. This is the single time the
    /// secret leaves the service.
    pub secret: Option<Preimage>,
}

/// Primary hold-invoice API
///
/// This is the driving port used by the HTTP layer.
#[async_trait]
pub trait HoldInvoiceApi: Send + Sync {
    /// Generate a secret, create the invoice on the node, and start tracking it
    async fn create_hold(&self, request: CreateHold) -> LifecycleResult<HoldInvoiceCreated>;

    /// Watch the invoice until it is held, then settle it with `secret`
    ///
    /// Resolves once the invoice reaches a terminal state. `Ok` means this
    /// process released the secret and the node accepted it.
    async fn await_and_settle(&self, id: &InvoiceId, secret: Preimage) -> SettlementResult;

    /// Same as [`HoldInvoiceApi::await_and_settle`] with the custodied secret
    async fn settle_custodied(&self, id: &InvoiceId) -> SettlementResult;

    /// Cancel an invoice that has not been decided yet
    ///
    /// Idempotent: on a terminal invoice this returns the terminal state and
    /// makes no node call.
    async fn cancel(&self, id: &InvoiceId) -> LifecycleResult<InvoiceState>;

    /// Read the node's view of an invoice
    async fn lookup(&self, id: &InvoiceId) -> LifecycleResult<NodeInvoice>;

    /// Local view of a tracked invoice
    fn tracked(&self, id: &InvoiceId) -> Option<InvoiceView>;

    fn secret_custody(&self) -> SecretCustody;

    /// Name of the node backend in use
    fn node_backend(&self) -> &'static str;

    fn metrics(&self) -> LifecycleMetricsSnapshot;
}
