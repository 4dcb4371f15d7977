//! Ports module for the hold-invoice lifecycle

pub mod inbound;
pub mod outbound;

pub use inbound::{CreateHold, HoldExpiry, HoldInvoiceApi, HoldInvoiceCreated};
pub use outbound::{
    CommitmentSource, CreateHoldRequest, CreatedHoldInvoice, EntropyError, InvoiceUpdateStream,
    NodeGateway, NodeInfo, PaymentOutcome, PlainInvoice, WalletBalance, WalletGateway,
};
