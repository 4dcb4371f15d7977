//! Error types for the hold-invoice lifecycle

use std::fmt;

use thiserror::Error;

use crate::domain::{InvoiceId, InvoiceState};

/// Node operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateHold,
    Subscribe,
    Settle,
    Cancel,
    Lookup,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateHold => "create-hold",
            Self::Subscribe => "subscribe",
            Self::Settle => "settle",
            Self::Cancel => "cancel",
            Self::Lookup => "lookup",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which operation on which invoice a node error belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    pub operation: Operation,
    pub id: Option<InvoiceId>,
}

impl NodeContext {
    pub fn new(operation: Operation, id: &InvoiceId) -> Self {
        Self {
            operation,
            id: Some(id.clone()),
        }
    }

    pub fn create() -> Self {
        Self {
            operation: Operation::CreateHold,
            id: None,
        }
    }
}

impl fmt::Display for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{} of invoice {}", self.operation, id),
            None => write!(f, "{}", self.operation),
        }
    }
}

/// Errors reported by a node backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Transport failure or node not ready
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    /// The node rejected the request parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The presented secret does not unlock the invoice
    #[error("secret does not match invoice")]
    SecretMismatch,

    /// Settle on an invoice the node already settled
    #[error("invoice already settled")]
    AlreadySettled,

    /// Unknown invoice
    #[error("invoice not found: {0}")]
    NotFound(String),

    /// Settle/cancel on an invoice the node already finished
    #[error("invoice already in a terminal state: {0}")]
    AlreadyTerminal(String),

    /// Any other node-side failure
    #[error("node error: {0}")]
    Node(String),
}

/// Hold-invoice lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Amount must be a positive number of satoshis
    #[error("invalid amount: {amount_sats} sats (must be greater than 0)")]
    InvalidAmount { amount_sats: u64 },

    /// Malformed or out-of-range input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Neither tracked locally nor known to the node
    #[error("invoice not found: {id}")]
    NotFound { id: InvoiceId },

    /// Another caller already watches this invoice
    #[error("invoice {id} is already being watched")]
    AlreadyWatching { id: InvoiceId },

    /// The invoice reached a terminal state other than the one asked for
    #[error("invoice {id} is already {state}")]
    AlreadyTerminal { id: InvoiceId, state: InvoiceState },

    /// sha256(secret) differs from the invoice commitment
    #[error("secret does not match the commitment of invoice {id}")]
    SecretMismatch { id: InvoiceId },

    /// The invoice was cancelled while waiting for payment
    #[error("invoice {id} was cancelled")]
    Cancelled { id: InvoiceId },

    /// Expiry passed before any payment was held
    #[error("invoice {id} expired before payment was held")]
    Timeout { id: InvoiceId },

    /// The node closed the update stream before a decision was made
    #[error("update subscription for invoice {id} closed before payment was held")]
    SubscriptionClosed { id: InvoiceId },

    /// Node transport failure
    #[error("node unavailable during {context}: {reason}")]
    NodeUnavailable { context: NodeContext, reason: String },

    /// Node rejected the operation
    #[error("node rejected {context}: {reason}")]
    Node { context: NodeContext, reason: String },

    /// The secure random source failed
    #[error("entropy source unavailable: {0}")]
    Entropy(String),

    /// Bug or broken internal channel
    #[error("internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Attach the operation context to a node error
    pub fn from_gateway(err: GatewayError, context: NodeContext) -> Self {
        let subject = context.id.clone();
        match (err, subject) {
            (GatewayError::NodeUnavailable(reason), _) => Self::NodeUnavailable { context, reason },
            (GatewayError::InvalidParameters(reason), _) => Self::InvalidRequest(reason),
            (GatewayError::SecretMismatch, Some(id)) => Self::SecretMismatch { id },
            (GatewayError::AlreadySettled, Some(id)) => Self::AlreadyTerminal {
                id,
                state: InvoiceState::Settled,
            },
            (GatewayError::NotFound(_), Some(id)) => Self::NotFound { id },
            (other, _) => Self::Node {
                context,
                reason: other.to_string(),
            },
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyWatching { .. } => "already_watching",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::SecretMismatch { .. } => "secret_mismatch",
            Self::Cancelled { .. } => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::SubscriptionClosed { .. } => "subscription_closed",
            Self::NodeUnavailable { .. } => "node_unavailable",
            Self::Node { .. } => "node_error",
            Self::Entropy(_) => "entropy_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Outcome of a settlement watch. `Ok` carries the terminal state reached.
pub type SettlementResult = LifecycleResult<InvoiceState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_errors_keep_context() {
        let id = InvoiceId::new("abc");
        let err = LifecycleError::from_gateway(
            GatewayError::NodeUnavailable("connection refused".into()),
            NodeContext::new(Operation::Settle, &id),
        );
        assert_eq!(err.code(), "node_unavailable");
        assert_eq!(
            err.to_string(),
            "node unavailable during settle of invoice abc: connection refused"
        );
    }

    #[test]
    fn test_already_settled_maps_to_terminal() {
        let id = InvoiceId::new("abc");
        let err = LifecycleError::from_gateway(
            GatewayError::AlreadySettled,
            NodeContext::new(Operation::Settle, &id),
        );
        assert_eq!(
            err,
            LifecycleError::AlreadyTerminal {
                id,
                state: InvoiceState::Settled
            }
        );
    }

    #[test]
    fn test_create_errors_have_no_subject() {
        let err = LifecycleError::from_gateway(
            GatewayError::NotFound("wallet".into()),
            NodeContext::create(),
        );
        assert!(matches!(err, LifecycleError::Node { .. }));
        assert!(err.to_string().starts_with("node rejected create-hold:"));
    }
}
