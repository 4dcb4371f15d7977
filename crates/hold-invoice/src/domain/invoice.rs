//! Hold invoice entity and its state machine
//!
//! ```text
//! OPEN ──held──────────────► HELD ──settle ok─────► SETTLED
//!   │                          │ └──settle failed──► FAILED
//!   ├──cancel────────────────► CANCELLED ◄──cancel / expiry
//!   └──expiry (undecided)────► EXPIRED
//! ```
//!
//! Every transition out of OPEN or HELD first sets `decision_made`. The flag
//! is only ever written while the owning slot's mutex is held, so at most one
//! settle or cancel is dispatched per invoice.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::commitment::{PaymentHash, Preimage};

/// Longest accepted invoice identifier
pub const MAX_INVOICE_ID_LEN: usize = 128;

/// Node-assigned invoice identifier
///
/// Treated as opaque. LND uses the hex payment hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(String);

impl InvoiceId {
    /// Wrap an identifier produced by a node backend
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validate an identifier supplied by a caller
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_INVOICE_ID_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'));
        valid.then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a tracked invoice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceState {
    /// Created on the node, no HTLC locked in yet
    #[default]
    Open,
    /// Payment locked in, waiting for settle or cancel
    Held,
    /// Secret released, funds captured
    Settled,
    /// Cancelled, HTLCs returned to the payer
    Cancelled,
    /// Expiry passed before any payment was held
    Expired,
    /// A settle was dispatched and the node rejected it
    Failed,
}

impl InvoiceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Settled | Self::Cancelled | Self::Expired | Self::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Held => "HELD",
            Self::Settled => "SETTLED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event from a node's invoice subscription
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceUpdate {
    pub is_held: bool,
    pub is_confirmed: bool,
    pub is_canceled: bool,
}

impl InvoiceUpdate {
    pub fn held() -> Self {
        Self {
            is_held: true,
            ..Self::default()
        }
    }

    pub fn confirmed() -> Self {
        Self {
            is_held: true,
            is_confirmed: true,
            ..Self::default()
        }
    }

    pub fn canceled() -> Self {
        Self {
            is_canceled: true,
            ..Self::default()
        }
    }
}

/// The node's own view of an invoice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInvoice {
    pub id: InvoiceId,
    pub payment_hash: Option<PaymentHash>,
    pub amount_sats: u64,
    pub description: Option<String>,
    pub payment_request: Option<String>,
    pub is_held: bool,
    pub is_confirmed: bool,
    pub is_canceled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NodeInvoice {
    /// Map the node flags onto the local state machine
    pub fn state(&self, now: DateTime<Utc>) -> InvoiceState {
        if self.is_canceled {
            InvoiceState::Cancelled
        } else if self.is_confirmed {
            InvoiceState::Settled
        } else if self.is_held {
            InvoiceState::Held
        } else if self.expires_at.is_some_and(|at| now >= at) {
            InvoiceState::Expired
        } else {
            InvoiceState::Open
        }
    }
}

/// What the watcher should do with a subscription event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateVerdict {
    /// A decision was already made; the event is stale
    Discard,
    /// Not held yet, keep listening
    Wait,
    /// Held and this caller won the decision: dispatch settle
    Settle,
    /// The node reports the invoice settled without our decision
    SettledElsewhere,
    /// The node reports the invoice cancelled without our decision
    CancelledElsewhere,
}

/// Outcome of claiming the decision for a cancel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelVerdict {
    /// Decision claimed, the caller must dispatch the cancel
    Proceed,
    /// A settle or cancel is already in flight
    InFlight,
    /// Nothing to do, the invoice already ended in this state
    Terminal(InvoiceState),
}

/// A hold invoice tracked by the lifecycle manager
#[derive(Clone, Debug)]
pub struct InvoiceRecord {
    pub id: InvoiceId,
    pub commitment_hash: PaymentHash,
    pub amount_sats: u64,
    pub description: Option<String>,
    pub payment_request: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    state: InvoiceState,
    decision_made: bool,
    resolved_at: Option<DateTime<Utc>>,
    custodied_secret: Option<Preimage>,
}

impl InvoiceRecord {
    /// A freshly created OPEN invoice
    pub fn open(
        id: InvoiceId,
        commitment_hash: PaymentHash,
        amount_sats: u64,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            commitment_hash,
            amount_sats,
            description: None,
            payment_request: None,
            created_at,
            expires_at,
            state: InvoiceState::Open,
            decision_made: false,
            resolved_at: None,
            custodied_secret: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_payment_request(mut self, payment_request: Option<String>) -> Self {
        self.payment_request = payment_request;
        self
    }

    /// Keep the secret in memory (server custody)
    pub fn with_custodied_secret(mut self, secret: Preimage) -> Self {
        self.custodied_secret = Some(secret);
        self
    }

    /// Start tracking an invoice this process did not create
    ///
    /// Returns `None` when the node does not report a payment hash, since
    /// secrets could not be checked against it.
    pub fn adopt(
        node: &NodeInvoice,
        fallback_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let hash = node.payment_hash?;
        let state = node.state(now);
        let mut record = Self::open(
            node.id.clone(),
            hash,
            node.amount_sats,
            node.created_at.unwrap_or(now),
            node.expires_at.unwrap_or(fallback_expiry),
        )
        .with_description(node.description.clone())
        .with_payment_request(node.payment_request.clone());

        record.state = state;
        if state.is_terminal() {
            record.decision_made = true;
            record.resolved_at = Some(now);
        }
        Some(record)
    }

    pub fn state(&self) -> InvoiceState {
        self.state
    }

    pub fn decision_made(&self) -> bool {
        self.decision_made
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn custodied_secret(&self) -> Option<&Preimage> {
        self.custodied_secret.as_ref()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True once a settle/cancel/expiry has been claimed or completed
    pub fn is_decided(&self) -> bool {
        self.decision_made || self.state.is_terminal()
    }

    /// Apply one subscription event
    pub fn observe(&mut self, update: &InvoiceUpdate, now: DateTime<Utc>) -> UpdateVerdict {
        if self.is_decided() {
            return UpdateVerdict::Discard;
        }
        if update.is_canceled {
            self.decision_made = true;
            self.resolve(InvoiceState::Cancelled, now);
            return UpdateVerdict::CancelledElsewhere;
        }
        if update.is_confirmed {
            self.decision_made = true;
            self.resolve(InvoiceState::Settled, now);
            return UpdateVerdict::SettledElsewhere;
        }
        if !update.is_held {
            return UpdateVerdict::Wait;
        }
        self.state = InvoiceState::Held;
        self.decision_made = true;
        UpdateVerdict::Settle
    }

    /// Claim the decision for a cancel
    pub fn begin_cancel(&mut self) -> CancelVerdict {
        if self.state.is_terminal() {
            return CancelVerdict::Terminal(self.state);
        }
        if self.decision_made {
            return CancelVerdict::InFlight;
        }
        self.decision_made = true;
        CancelVerdict::Proceed
    }

    /// Expire an undecided invoice whose deadline has passed
    ///
    /// OPEN becomes EXPIRED. A HELD invoice that nobody settled becomes
    /// CANCELLED, as the node returns the HTLC on its own. No node call is
    /// implied either way.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<InvoiceState> {
        if self.is_decided() || !self.is_expired(now) {
            return None;
        }
        let next = match self.state {
            InvoiceState::Held => InvoiceState::Cancelled,
            _ => InvoiceState::Expired,
        };
        self.decision_made = true;
        self.resolve(next, now);
        Some(next)
    }

    /// Record the terminal state reached after a dispatched decision
    pub fn resolve(&mut self, state: InvoiceState, now: DateTime<Utc>) {
        debug_assert!(self.decision_made, "resolve without a decision");
        debug_assert!(state.is_terminal(), "resolve into non-terminal state");
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        self.resolved_at = Some(now);
    }

    /// Terminal records older than `cutoff` can be forgotten
    pub fn resolved_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.resolved_at.is_some_and(|at| at <= cutoff)
    }

    pub fn view(&self, watching: bool) -> InvoiceView {
        InvoiceView {
            id: self.id.clone(),
            state: self.state,
            decision_made: self.decision_made,
            watching,
            amount_sats: self.amount_sats,
            description: self.description.clone(),
            commitment_hash: self.commitment_hash,
            payment_request: self.payment_request.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            resolved_at: self.resolved_at,
        }
    }
}

/// Read-only view of a tracked invoice. Never carries the secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceView {
    pub id: InvoiceId,
    pub state: InvoiceState,
    pub decision_made: bool,
    pub watching: bool,
    pub amount_sats: u64,
    pub description: Option<String>,
    pub commitment_hash: PaymentHash,
    pub payment_request: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
