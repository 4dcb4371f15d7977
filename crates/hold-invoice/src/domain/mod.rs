//! Domain layer for the hold-invoice lifecycle
//!
//! Pure types and state transitions. Nothing here touches the network.

pub mod commitment;
pub mod config;
pub mod invoice;

pub use commitment::{Commitment, HexValueError, PaymentHash, Preimage, SECRET_LEN};
pub use config::{ConfigError, LifecycleConfig, SecretCustody};
pub use invoice::{
    CancelVerdict, InvoiceId, InvoiceRecord, InvoiceState, InvoiceUpdate, InvoiceView,
    NodeInvoice, UpdateVerdict, MAX_INVOICE_ID_LEN,
};
