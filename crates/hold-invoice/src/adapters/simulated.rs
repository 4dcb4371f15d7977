//! In-memory Lightning node
//!
//! Behaves like a hold-invoice capable node closely enough to drive the
//! lifecycle end to end without a real backend: ids are the hex payment
//! hash, subscriptions replay the current state on connect, and settle only
//! succeeds on a held invoice. Test hooks inject raw updates, failures and
//! latency, and every node call is counted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::domain::{Commitment, InvoiceId, InvoiceUpdate, NodeInvoice, Preimage};
use crate::error::GatewayError;
use crate::ports::{
    CreateHoldRequest, CreatedHoldInvoice, InvoiceUpdateStream, NodeGateway, NodeInfo,
    PaymentOutcome, PlainInvoice, WalletBalance, WalletGateway,
};

type UpdateSender = mpsc::UnboundedSender<Result<InvoiceUpdate, GatewayError>>;

/// Node call counters
#[derive(Debug, Default)]
struct CallCounters {
    create: AtomicU64,
    subscribe: AtomicU64,
    settle: AtomicU64,
    cancel: AtomicU64,
    lookup: AtomicU64,
}

/// Snapshot of how often each node operation was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedCalls {
    pub create: u64,
    pub subscribe: u64,
    pub settle: u64,
    pub cancel: u64,
    pub lookup: u64,
}

#[derive(Default)]
struct SimState {
    invoices: BTreeMap<InvoiceId, NodeInvoice>,
    hold: HashMap<InvoiceId, bool>,
    subscribers: HashMap<InvoiceId, Vec<UpdateSender>>,
    fail_next_settle: Option<GatewayError>,
    fail_next_cancel: Option<GatewayError>,
    unavailable: bool,
}

impl SimState {
    fn broadcast(&mut self, id: &InvoiceId, update: Result<InvoiceUpdate, GatewayError>) {
        if let Some(senders) = self.subscribers.get_mut(id) {
            senders.retain(|tx| tx.send(update.clone()).is_ok());
        }
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable {
            return Err(GatewayError::NodeUnavailable(
                "simulated node is offline".into(),
            ));
        }
        Ok(())
    }
}

fn update_of(invoice: &NodeInvoice) -> InvoiceUpdate {
    InvoiceUpdate {
        is_held: invoice.is_held,
        is_confirmed: invoice.is_confirmed,
        is_canceled: invoice.is_canceled,
    }
}

/// Simulated hold-invoice node
#[derive(Default)]
pub struct SimulatedNode {
    state: Mutex<SimState>,
    settle_delay: Mutex<Duration>,
    balance: Mutex<WalletBalance>,
    calls: CallCounters,
}

impl SimulatedNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, balance: WalletBalance) -> Self {
        *self.balance.lock() = balance;
        self
    }

    /// Payer locks in an HTLC: the invoice becomes held
    pub fn lock_in(&self, id: &InvoiceId) -> bool {
        let mut state = self.state.lock();
        let update = match state.invoices.get_mut(id) {
            Some(inv) if !inv.is_confirmed && !inv.is_canceled => {
                inv.is_held = true;
                update_of(inv)
            }
            _ => return false,
        };
        state.broadcast(id, Ok(update));
        true
    }

    /// Deliver a raw update to current subscribers without touching node state
    pub fn push_update(&self, id: &InvoiceId, update: InvoiceUpdate) {
        self.state.lock().broadcast(id, Ok(update));
    }

    /// Deliver a stream error to current subscribers
    pub fn push_error(&self, id: &InvoiceId, error: GatewayError) {
        self.state.lock().broadcast(id, Err(error));
    }

    /// Mark the invoice settled or cancelled node-side, as if another client did it
    pub fn resolve_externally(&self, id: &InvoiceId, settled: bool) {
        let mut state = self.state.lock();
        let update = match state.invoices.get_mut(id) {
            Some(inv) => {
                if settled {
                    inv.is_held = true;
                    inv.is_confirmed = true;
                } else {
                    inv.is_canceled = true;
                }
                update_of(inv)
            }
            None => return,
        };
        state.broadcast(id, Ok(update));
    }

    /// End every open subscription for `id`
    pub fn close_subscriptions(&self, id: &InvoiceId) {
        self.state.lock().subscribers.remove(id);
    }

    pub fn subscriber_count(&self, id: &InvoiceId) -> usize {
        let mut state = self.state.lock();
        match state.subscribers.get_mut(id) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// Register an invoice created elsewhere
    pub fn insert_invoice(&self, invoice: NodeInvoice, hold: bool) {
        let mut state = self.state.lock();
        state.hold.insert(invoice.id.clone(), hold);
        state.invoices.insert(invoice.id.clone(), invoice);
    }

    pub fn invoice(&self, id: &InvoiceId) -> Option<NodeInvoice> {
        self.state.lock().invoices.get(id).cloned()
    }

    pub fn fail_next_settle(&self, error: GatewayError) {
        self.state.lock().fail_next_settle = Some(error);
    }

    pub fn fail_next_cancel(&self, error: GatewayError) {
        self.state.lock().fail_next_cancel = Some(error);
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    /// Latency added before every settle reaches the node
    pub fn set_settle_delay(&self, delay: Duration) {
        *self.settle_delay.lock() = delay;
    }

    pub fn calls(&self) -> SimulatedCalls {
        SimulatedCalls {
            create: self.calls.create.load(Ordering::SeqCst),
            subscribe: self.calls.subscribe.load(Ordering::SeqCst),
            settle: self.calls.settle.load(Ordering::SeqCst),
            cancel: self.calls.cancel.load(Ordering::SeqCst),
            lookup: self.calls.lookup.load(Ordering::SeqCst),
        }
    }

    fn payment_request(amount_sats: u64, id: &InvoiceId) -> String {
        let tail: String = id.as_str().chars().take(24).collect();
        format!("lnsim{amount_sats}n1{tail}")
    }
}

#[async_trait]
impl NodeGateway for SimulatedNode {
    fn backend(&self) -> &'static str {
        "simulated"
    }

    async fn create_hold_invoice(
        &self,
        request: CreateHoldRequest,
    ) -> Result<CreatedHoldInvoice, GatewayError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.check_available()?;

        let id = InvoiceId::new(request.payment_hash.to_hex());
        if state.invoices.contains_key(&id) {
            return Err(GatewayError::InvalidParameters(
                "invoice with payment hash already exists".into(),
            ));
        }
        let payment_request = Self::payment_request(request.amount_sats, &id);
        let invoice = NodeInvoice {
            id: id.clone(),
            payment_hash: Some(request.payment_hash),
            amount_sats: request.amount_sats,
            description: request.description,
            payment_request: Some(payment_request.clone()),
            is_held: false,
            is_confirmed: false,
            is_canceled: false,
            created_at: Some(Utc::now()),
            expires_at: Some(request.expires_at),
        };
        state.hold.insert(id.clone(), true);
        state.invoices.insert(id.clone(), invoice);
        debug!(invoice_id = %id, "Simulated hold invoice created");

        Ok(CreatedHoldInvoice {
            id,
            payment_request,
        })
    }

    async fn subscribe_invoice_updates(
        &self,
        id: &InvoiceId,
    ) -> Result<InvoiceUpdateStream, GatewayError> {
        self.calls.subscribe.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.check_available()?;

        let current = state
            .invoices
            .get(id)
            .map(update_of)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        // replay current state, as real nodes do on subscribe
        let _ = tx.send(Ok(current));
        state.subscribers.entry(id.clone()).or_default().push(tx);

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn settle_hold_invoice(&self, secret: &Preimage) -> Result<(), GatewayError> {
        self.calls.settle.fetch_add(1, Ordering::SeqCst);
        let delay = *self.settle_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.check_available()?;
        if let Some(err) = state.fail_next_settle.take() {
            return Err(err);
        }

        let hash = secret.payment_hash();
        let (id, update) = {
            let invoice = state
                .invoices
                .values_mut()
                .find(|inv| inv.payment_hash == Some(hash))
                .ok_or_else(|| GatewayError::NotFound(hash.to_hex()))?;
            if invoice.is_canceled {
                return Err(GatewayError::AlreadyTerminal("invoice canceled".into()));
            }
            if invoice.is_confirmed {
                return Err(GatewayError::AlreadySettled);
            }
            if !invoice.is_held {
                return Err(GatewayError::Node("invoice still open".into()));
            }
            invoice.is_confirmed = true;
            (invoice.id.clone(), update_of(invoice))
        };
        state.broadcast(&id, Ok(update));
        Ok(())
    }

    async fn cancel_invoice(&self, id: &InvoiceId) -> Result<(), GatewayError> {
        self.calls.cancel.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.check_available()?;
        if let Some(err) = state.fail_next_cancel.take() {
            return Err(err);
        }

        let update = {
            let invoice = state
                .invoices
                .get_mut(id)
                .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
            if invoice.is_confirmed {
                return Err(GatewayError::AlreadyTerminal("invoice already settled".into()));
            }
            if invoice.is_canceled {
                return Err(GatewayError::AlreadyTerminal("invoice already canceled".into()));
            }
            invoice.is_canceled = true;
            invoice.is_held = false;
            update_of(invoice)
        };
        state.broadcast(id, Ok(update));
        Ok(())
    }

    async fn get_invoice(&self, id: &InvoiceId) -> Result<NodeInvoice, GatewayError> {
        self.calls.lookup.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        state.check_available()?;
        state
            .invoices
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl WalletGateway for SimulatedNode {
    async fn get_info(&self) -> Result<NodeInfo, GatewayError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(NodeInfo {
            alias: "simulated".into(),
            public_key: format!("02{}", "00".repeat(32)),
            block_height: 0,
            active_channels: 0,
            peers: 0,
            synced_to_chain: true,
            version: env!("CARGO_PKG_VERSION").into(),
        })
    }

    async fn get_balance(&self) -> Result<WalletBalance, GatewayError> {
        self.state.lock().check_available()?;
        Ok(*self.balance.lock())
    }

    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: Option<String>,
    ) -> Result<PlainInvoice, GatewayError> {
        if amount_sats == 0 {
            return Err(GatewayError::InvalidParameters(
                "amount must be greater than 0".into(),
            ));
        }
        let commitment = Commitment::generate(&mut OsRng)
            .map_err(|e| GatewayError::Node(format!("entropy unavailable: {e}")))?;

        let mut state = self.state.lock();
        state.check_available()?;
        let id = InvoiceId::new(commitment.hash.to_hex());
        let payment_request = Self::payment_request(amount_sats, &id);
        state.hold.insert(id.clone(), false);
        state.invoices.insert(
            id.clone(),
            NodeInvoice {
                id: id.clone(),
                payment_hash: Some(commitment.hash),
                amount_sats,
                description: description.clone(),
                payment_request: Some(payment_request.clone()),
                is_held: false,
                is_confirmed: false,
                is_canceled: false,
                created_at: Some(Utc::now()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            },
        );

        Ok(PlainInvoice {
            id,
            payment_request,
            amount_sats,
            description,
        })
    }

    async fn list_invoices(&self) -> Result<Vec<NodeInvoice>, GatewayError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.invoices.values().cloned().collect())
    }

    async fn pay(&self, payment_request: &str) -> Result<PaymentOutcome, GatewayError> {
        let payment_request = payment_request.trim();
        if !payment_request.starts_with("ln") {
            return Err(GatewayError::InvalidParameters(
                "not a lightning payment request".into(),
            ));
        }
        let mut state = self.state.lock();
        state.check_available()?;

        let local = state
            .invoices
            .values()
            .find(|inv| inv.payment_request.as_deref() == Some(payment_request))
            .map(|inv| inv.id.clone());

        match local {
            Some(id) => {
                let is_hold = state.hold.get(&id).copied().unwrap_or(false);
                let (hash, amount, update) = {
                    let invoice = state
                        .invoices
                        .get_mut(&id)
                        .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
                    if invoice.is_canceled || invoice.is_confirmed {
                        return Err(GatewayError::AlreadyTerminal(
                            "invoice is no longer payable".into(),
                        ));
                    }
                    if is_hold {
                        invoice.is_held = true;
                    } else {
                        invoice.is_confirmed = true;
                    }
                    (
                        invoice.payment_hash,
                        invoice.amount_sats,
                        update_of(invoice),
                    )
                };
                state.broadcast(&id, Ok(update));
                let payment_hash = hash.ok_or_else(|| {
                    GatewayError::Node("local invoice without payment hash".into())
                })?;
                Ok(PaymentOutcome {
                    payment_hash,
                    preimage: None,
                    amount_sats: amount,
                    fee_sats: 0,
                    is_confirmed: !is_hold,
                })
            }
            None => Err(GatewayError::NotFound(
                "no route to payment request".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn hold_request(secret: &Preimage) -> CreateHoldRequest {
        CreateHoldRequest {
            amount_sats: 1_000,
            description: Some("test".into()),
            payment_hash: secret.payment_hash(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_settle_requires_held_invoice() {
        let node = SimulatedNode::new();
        let secret = Preimage::from_bytes([9u8; 32]);
        let created = node.create_hold_invoice(hold_request(&secret)).await.unwrap();

        assert!(matches!(
            node.settle_hold_invoice(&secret).await,
            Err(GatewayError::Node(_))
        ));

        assert!(node.lock_in(&created.id));
        node.settle_hold_invoice(&secret).await.unwrap();
        assert_eq!(
            node.settle_hold_invoice(&secret).await,
            Err(GatewayError::AlreadySettled)
        );
        assert_eq!(node.calls().settle, 3);
    }

    #[tokio::test]
    async fn test_subscription_replays_current_state() {
        let node = SimulatedNode::new();
        let secret = Preimage::from_bytes([4u8; 32]);
        let created = node.create_hold_invoice(hold_request(&secret)).await.unwrap();

        let mut stream = node.subscribe_invoice_updates(&created.id).await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(InvoiceUpdate::default())));

        node.lock_in(&created.id);
        assert_eq!(stream.next().await, Some(Ok(InvoiceUpdate::held())));

        node.close_subscriptions(&created.id);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_cancel_settled_invoice_is_terminal() {
        let node = SimulatedNode::new();
        let secret = Preimage::from_bytes([5u8; 32]);
        let created = node.create_hold_invoice(hold_request(&secret)).await.unwrap();
        node.lock_in(&created.id);
        node.settle_hold_invoice(&secret).await.unwrap();

        assert!(matches!(
            node.cancel_invoice(&created.id).await,
            Err(GatewayError::AlreadyTerminal(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_node() {
        let node = SimulatedNode::new();
        node.set_available(false);
        assert!(matches!(
            node.get_info().await,
            Err(GatewayError::NodeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_pay_local_invoice() {
        let node = SimulatedNode::new();
        let invoice = node.create_invoice(250, None).await.unwrap();
        let outcome = node.pay(&invoice.payment_request).await.unwrap();
        assert!(outcome.is_confirmed);
        assert_eq!(outcome.amount_sats, 250);
        assert!(node.invoice(&invoice.id).unwrap().is_confirmed);

        assert!(matches!(
            node.pay("garbage").await,
            Err(GatewayError::InvalidParameters(_))
        ));
    }
}
