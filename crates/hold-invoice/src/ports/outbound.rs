//! Driven Ports (SPI - Outbound Dependencies)
//!
//! The Lightning node and the random source are the only things the
//! lifecycle manager talks to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::domain::{Commitment, InvoiceId, InvoiceUpdate, NodeInvoice, PaymentHash, Preimage};
use crate::error::GatewayError;

/// Live invoice updates. Dropping the stream ends the subscription.
pub type InvoiceUpdateStream = BoxStream<'static, Result<InvoiceUpdate, GatewayError>>;

/// Parameters for a new hold invoice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateHoldRequest {
    pub amount_sats: u64,
    pub description: Option<String>,
    pub payment_hash: PaymentHash,
    pub expires_at: DateTime<Utc>,
}

/// What the node hands back for a new invoice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedHoldInvoice {
    pub id: InvoiceId,
    pub payment_request: String,
}

/// Hold-invoice operations on a Lightning node
#[async_trait]
pub trait NodeGateway: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Create an invoice locked to `request.payment_hash`
    async fn create_hold_invoice(
        &self,
        request: CreateHoldRequest,
    ) -> Result<CreatedHoldInvoice, GatewayError>;

    /// Open a live update stream for one invoice
    async fn subscribe_invoice_updates(
        &self,
        id: &InvoiceId,
    ) -> Result<InvoiceUpdateStream, GatewayError>;

    /// Release the secret, capturing the held payment
    async fn settle_hold_invoice(&self, secret: &Preimage) -> Result<(), GatewayError>;

    /// Return held HTLCs and close the invoice
    async fn cancel_invoice(&self, id: &InvoiceId) -> Result<(), GatewayError>;

    /// Read the node's current view of an invoice
    async fn get_invoice(&self, id: &InvoiceId) -> Result<NodeInvoice, GatewayError>;
}

/// Node identity and sync status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub alias: String,
    pub public_key: String,
    pub block_height: u64,
    pub active_channels: u64,
    pub peers: u64,
    pub synced_to_chain: bool,
    pub version: String,
}

/// Funds held by the node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub onchain_confirmed_sats: u64,
    pub onchain_unconfirmed_sats: u64,
    pub channel_local_sats: u64,
    pub channel_remote_sats: u64,
}

/// A regular (non-hold) invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainInvoice {
    pub id: InvoiceId,
    pub payment_request: String,
    pub amount_sats: u64,
    pub description: Option<String>,
}

/// Result of paying a BOLT11 request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub payment_hash: PaymentHash,
    pub preimage: Option<Preimage>,
    pub amount_sats: u64,
    pub fee_sats: u64,
    pub is_confirmed: bool,
}

/// Read-through wallet operations exposed next to the hold-invoice API
#[async_trait]
pub trait WalletGateway: Send + Sync {
    async fn get_info(&self) -> Result<NodeInfo, GatewayError>;

    async fn get_balance(&self) -> Result<WalletBalance, GatewayError>;

    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: Option<String>,
    ) -> Result<PlainInvoice, GatewayError>;

    async fn list_invoices(&self) -> Result<Vec<NodeInvoice>, GatewayError>;

    async fn pay(&self, payment_request: &str) -> Result<PaymentOutcome, GatewayError>;
}

/// Random source failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("entropy unavailable: {0}")]
pub struct EntropyError(pub String);

/// Source of fresh secrets
pub trait CommitmentSource: Send + Sync {
    fn generate(&self) -> Result<Commitment, EntropyError>;
}
