//! Hold-invoice lifecycle service
//!
//! Owns the table of tracked invoices and implements [`HoldInvoiceApi`].
//!
//! ## Decision rule
//!
//! Settle and cancel are only dispatched by whoever flips `decision_made`
//! on the invoice record, and that flag is only read or written under the
//! slot mutex. A watcher flips it when the first held update arrives, a
//! cancel flips it before calling the node, and expiry flips it without any
//! node call. Everyone else waits on the published outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapters::OsEntropy;
use crate::domain::{
    CancelVerdict, ConfigError, InvoiceId, InvoiceRecord, InvoiceState, InvoiceView,
    LifecycleConfig, NodeInvoice, Preimage, SecretCustody,
};
use crate::error::{
    GatewayError, LifecycleError, LifecycleResult, NodeContext, Operation, SettlementResult,
};
use crate::metrics::{LifecycleMetrics, LifecycleMetricsSnapshot};
use crate::ports::{
    CommitmentSource, CreateHold, CreateHoldRequest, HoldExpiry, HoldInvoiceApi,
    HoldInvoiceCreated, NodeGateway,
};
use crate::slot::{ActiveWatch, InvoiceSlot};
use crate::watcher::InvoiceWatcher;

/// Result of one expiry/eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

/// How an `await_and_settle` call was admitted
enum Admission {
    /// Someone already decided; wait for their outcome
    Decided,
    /// Expiry had passed; the invoice was expired on the spot
    Expired(InvoiceState),
    /// This caller now owns the watch
    Watch {
        watch_id: u64,
        cancel_rx: oneshot::Receiver<()>,
        expires_at: DateTime<Utc>,
    },
}

/// Hold-invoice lifecycle manager
pub struct HoldInvoiceService {
    config: LifecycleConfig,
    gateway: Arc<dyn NodeGateway>,
    commitments: Arc<dyn CommitmentSource>,
    invoices: DashMap<InvoiceId, Arc<InvoiceSlot>>,
    metrics: Arc<LifecycleMetrics>,
}

impl HoldInvoiceService {
    /// Create a service backed by `gateway`, drawing secrets from the OS RNG
    pub fn new(
        config: LifecycleConfig,
        gateway: Arc<dyn NodeGateway>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            gateway,
            commitments: Arc::new(OsEntropy),
            invoices: DashMap::new(),
            metrics: Arc::new(LifecycleMetrics::new()),
        })
    }

    pub fn with_commitment_source(mut self, commitments: Arc<dyn CommitmentSource>) -> Self {
        self.commitments = commitments;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn tracked_count(&self) -> usize {
        self.invoices.len()
    }

    fn resolve_expiry(
        &self,
        expiry: HoldExpiry,
        now: DateTime<Utc>,
    ) -> LifecycleResult<DateTime<Utc>> {
        let ttl = match expiry {
            HoldExpiry::Default => self.config.default_ttl,
            HoldExpiry::After(ttl) => ttl,
            HoldExpiry::At(at) => (at - now).to_std().map_err(|_| {
                LifecycleError::InvalidRequest("expiry must be in the future".into())
            })?,
        };
        if ttl < self.config.min_ttl || ttl > self.config.max_ttl {
            return Err(LifecycleError::InvalidRequest(format!(
                "expiry must be between {:?} and {:?} from now",
                self.config.min_ttl, self.config.max_ttl
            )));
        }
        match expiry {
            HoldExpiry::At(at) => Ok(at),
            _ => chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(|| LifecycleError::InvalidRequest("expiry out of range".into())),
        }
    }

    /// Tracked slot for `id`, adopting the invoice from the node if needed
    async fn slot_or_adopt(&self, id: &InvoiceId) -> LifecycleResult<Arc<InvoiceSlot>> {
        let existing = self.invoices.get(id).map(|slot| Arc::clone(slot.value()));
        if let Some(slot) = existing {
            return Ok(slot);
        }

        let node = self
            .gateway
            .get_invoice(id)
            .await
            .map_err(|e| LifecycleError::from_gateway(e, NodeContext::new(Operation::Lookup, id)))?;

        let now = Utc::now();
        let fallback_expiry = self.resolve_expiry(HoldExpiry::Default, now)?;
        let record = InvoiceRecord::adopt(&node, fallback_expiry, now).ok_or_else(|| {
            LifecycleError::InvalidRequest(format!("node reports no payment hash for invoice {id}"))
        })?;
        let state = record.state();

        let slot = match self.invoices.entry(id.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                self.metrics.record_adopted();
                info!(invoice_id = %id, %state, "Adopted invoice from node");
                Arc::clone(entry.insert(Arc::new(InvoiceSlot::new(record))).value())
            }
        };
        Ok(slot)
    }

    async fn settle_with(&self, id: &InvoiceId, secret: Preimage) -> SettlementResult {
        let slot = self.slot_or_adopt(id).await?;

        let admission = {
            let mut guard = slot.lock();
            if !guard.record.commitment_hash.matches(&secret) {
                debug!(invoice_id = %id, "Rejected secret that does not match commitment");
                return Err(LifecycleError::SecretMismatch { id: id.clone() });
            }
            if guard.record.is_decided() {
                Admission::Decided
            } else if guard.watch.is_some() {
                return Err(LifecycleError::AlreadyWatching { id: id.clone() });
            } else if let Some(state) = guard.record.expire(Utc::now()) {
                Admission::Expired(state)
            } else {
                let (watch, cancel_rx) = ActiveWatch::new();
                let watch_id = watch.id;
                guard.watch = Some(watch);
                Admission::Watch {
                    watch_id,
                    cancel_rx,
                    expires_at: guard.record.expires_at,
                }
            }
        };

        let (watch_id, cancel_rx, expires_at) = match admission {
            Admission::Decided => {
                debug!(invoice_id = %id, "Invoice already decided, returning its outcome");
                return slot.decided_outcome().await;
            }
            Admission::Expired(state) => {
                info!(invoice_id = %id, %state, "Invoice expired before the watch started");
                self.metrics.record_terminal(state);
                let result = Err(LifecycleError::Timeout { id: id.clone() });
                slot.publish(result.clone());
                return result;
            }
            Admission::Watch {
                watch_id,
                cancel_rx,
                expires_at,
            } => (watch_id, cancel_rx, expires_at),
        };

        let stream = match self.gateway.subscribe_invoice_updates(id).await {
            Ok(stream) => stream,
            Err(err) => {
                slot.lock().release_watch(watch_id);
                warn!(invoice_id = %id, error = %err, "Could not subscribe to invoice updates");
                return Err(LifecycleError::from_gateway(
                    err,
                    NodeContext::new(Operation::Subscribe, id),
                ));
            }
        };

        debug!(invoice_id = %id, %expires_at, "Watching invoice");
        let watcher = InvoiceWatcher {
            id: id.clone(),
            watch_id,
            secret,
            expires_at,
            slot,
            gateway: Arc::clone(&self.gateway),
            metrics: Arc::clone(&self.metrics),
        };
        let (report_tx, report_rx) = oneshot::channel();
        tokio::spawn(watcher.run(stream, cancel_rx, report_tx));

        report_rx.await.unwrap_or_else(|_| {
            Err(LifecycleError::Internal(
                "watcher ended without reporting".into(),
            ))
        })
    }

    /// Expire unwatched invoices and forget old terminal ones
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = chrono::Duration::from_std(self.config.terminal_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention));
        let mut expired = Vec::new();
        let mut evicted = 0;

        self.invoices.retain(|id, slot| {
            let mut guard = slot.lock();
            if guard.watch.is_some() {
                return true;
            }
            if let Some(state) = guard.record.expire(now) {
                info!(invoice_id = %id, %state, "Invoice expired without a watcher");
                expired.push((id.clone(), Arc::clone(slot), state));
                return true;
            }
            let evict = cutoff.is_some_and(|cutoff| guard.record.resolved_before(cutoff));
            if evict {
                debug!(invoice_id = %id, state = %guard.record.state(), "Evicting terminal invoice");
                evicted += 1;
            }
            !evict
        });

        for (id, slot, state) in &expired {
            self.metrics.record_terminal(*state);
            let result = match state {
                InvoiceState::Cancelled => Err(LifecycleError::Cancelled { id: id.clone() }),
                _ => Err(LifecycleError::Timeout { id: id.clone() }),
            };
            slot.publish(result);
        }
        self.metrics.record_evicted(evicted as u64);

        SweepReport {
            expired: expired.len(),
            evicted,
        }
    }
}

async fn dispatch_cancel(
    gateway: Arc<dyn NodeGateway>,
    slot: Arc<InvoiceSlot>,
    id: InvoiceId,
    metrics: Arc<LifecycleMetrics>,
) -> LifecycleResult<InvoiceState> {
    info!(invoice_id = %id, "Cancelling invoice");
    metrics.record_cancel_dispatched();

    match gateway.cancel_invoice(&id).await {
        Ok(()) => {
            metrics.record_terminal(InvoiceState::Cancelled);
            slot.resolve(
                InvoiceState::Cancelled,
                Err(LifecycleError::Cancelled { id: id.clone() }),
            );
            info!(invoice_id = %id, "Invoice cancelled");
            Ok(InvoiceState::Cancelled)
        }
        Err(GatewayError::AlreadyTerminal(reason)) => {
            let state = terminal_state_on_node(gateway.as_ref(), &id).await;
            info!(invoice_id = %id, %state, %reason, "Node had already finished the invoice");
            metrics.record_terminal(state);
            slot.resolve(
                state,
                Err(LifecycleError::AlreadyTerminal {
                    id: id.clone(),
                    state,
                }),
            );
            Ok(state)
        }
        Err(GatewayError::AlreadySettled) => {
            metrics.record_terminal(InvoiceState::Settled);
            slot.resolve(
                InvoiceState::Settled,
                Err(LifecycleError::AlreadyTerminal {
                    id: id.clone(),
                    state: InvoiceState::Settled,
                }),
            );
            Ok(InvoiceState::Settled)
        }
        Err(err) => {
            let error = LifecycleError::from_gateway(err, NodeContext::new(Operation::Cancel, &id));
            warn!(invoice_id = %id, error = %error, "Cancel failed after decision");
            metrics.record_terminal(InvoiceState::Failed);
            slot.resolve(InvoiceState::Failed, Err(error.clone()));
            Err(error)
        }
    }
}

async fn terminal_state_on_node(gateway: &dyn NodeGateway, id: &InvoiceId) -> InvoiceState {
    match gateway.get_invoice(id).await {
        Ok(node) => match node.state(Utc::now()) {
            state if state.is_terminal() => state,
            _ => InvoiceState::Failed,
        },
        Err(err) => {
            warn!(invoice_id = %id, error = %err, "Could not read terminal state from node");
            InvoiceState::Failed
        }
    }
}

#[async_trait]
impl HoldInvoiceApi for HoldInvoiceService {
    async fn create_hold(&self, request: CreateHold) -> LifecycleResult<HoldInvoiceCreated> {
        if request.amount_sats == 0 {
            return Err(LifecycleError::InvalidAmount {
                amount_sats: request.amount_sats,
            });
        }
        let now = Utc::now();
        let expires_at = self.resolve_expiry(request.expiry, now)?;
        let commitment = self
            .commitments
            .generate()
            .map_err(|e| LifecycleError::Entropy(e.0))?;

        let created = self
            .gateway
            .create_hold_invoice(CreateHoldRequest {
                amount_sats: request.amount_sats,
                description: request.description.clone(),
                payment_hash: commitment.hash,
                expires_at,
            })
            .await
            .map_err(|e| LifecycleError::from_gateway(e, NodeContext::create()))?;

        let mut record = InvoiceRecord::open(
            created.id.clone(),
            commitment.hash,
            request.amount_sats,
            now,
            expires_at,
        )
        .with_description(request.description)
        .with_payment_request(Some(created.payment_request.clone()));
        if self.config.secret_custody == SecretCustody::Server {
            record = record.with_custodied_secret(commitment.secret.clone());
        }

        match self.invoices.entry(created.id.clone()) {
            Entry::Occupied(_) => {
                return Err(LifecycleError::Internal(format!(
                    "node returned an id that is already tracked: {}",
                    created.id
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(InvoiceSlot::new(record)));
            }
        }
        self.metrics.record_created();
        info!(
            invoice_id = %created.id,
            amount_sats = request.amount_sats,
            %expires_at,
            custody = %self.config.secret_custody,
            "Hold invoice created"
        );

        let secret = match self.config.secret_custody {
            SecretCustody::Client => Some(commitment.secret),
            SecretCustody::Server => None,
        };
        Ok(HoldInvoiceCreated {
            id: created.id,
            payment_request: created.payment_request,
            commitment_hash: commitment.hash,
            expires_at,
            secret,
        })
    }

    async fn await_and_settle(&self, id: &InvoiceId, secret: Preimage) -> SettlementResult {
        self.settle_with(id, secret).await
    }

    async fn settle_custodied(&self, id: &InvoiceId) -> SettlementResult {
        if self.config.secret_custody != SecretCustody::Server {
            return Err(LifecycleError::InvalidRequest(
                "secret is required under client custody".into(),
            ));
        }
        let slot = self.slot_or_adopt(id).await?;
        let secret = slot.lock().record.custodied_secret().cloned();
        match secret {
            Some(secret) => self.settle_with(id, secret).await,
            None => Err(LifecycleError::InvalidRequest(format!(
                "no custodied secret for invoice {id}"
            ))),
        }
    }

    async fn cancel(&self, id: &InvoiceId) -> LifecycleResult<InvoiceState> {
        let slot = self.slot_or_adopt(id).await?;

        let (expired, verdict) = {
            let mut guard = slot.lock();
            // past expiry nothing is left to cancel on the node
            let expired = guard.record.expire(Utc::now());
            let verdict = guard.record.begin_cancel();
            if expired.is_some() || verdict == CancelVerdict::Proceed {
                if let Some(watch) = guard.watch.take() {
                    watch.interrupt();
                }
            }
            (expired, verdict)
        };

        if let Some(state) = expired {
            info!(invoice_id = %id, %state, "Invoice expired before cancel");
            self.metrics.record_terminal(state);
            let result = match state {
                InvoiceState::Cancelled => Err(LifecycleError::Cancelled { id: id.clone() }),
                _ => Err(LifecycleError::Timeout { id: id.clone() }),
            };
            slot.publish(result);
            return Ok(state);
        }

        match verdict {
            CancelVerdict::Terminal(state) => {
                debug!(invoice_id = %id, %state, "Cancel on terminal invoice is a no-op");
                Ok(state)
            }
            CancelVerdict::InFlight => {
                debug!(invoice_id = %id, "Decision in flight, waiting for its outcome");
                let outcome = slot.decided_outcome().await;
                match (slot.state(), outcome) {
                    (InvoiceState::Failed, Err(err)) => Err(err),
                    (state, _) => Ok(state),
                }
            }
            CancelVerdict::Proceed => {
                // the node call runs detached so a dropped caller cannot strand the decision
                let task = tokio::spawn(dispatch_cancel(
                    Arc::clone(&self.gateway),
                    slot,
                    id.clone(),
                    Arc::clone(&self.metrics),
                ));
                task.await
                    .map_err(|e| LifecycleError::Internal(format!("cancel task failed: {e}")))?
            }
        }
    }

    async fn lookup(&self, id: &InvoiceId) -> LifecycleResult<NodeInvoice> {
        self.gateway
            .get_invoice(id)
            .await
            .map_err(|e| LifecycleError::from_gateway(e, NodeContext::new(Operation::Lookup, id)))
    }

    fn tracked(&self, id: &InvoiceId) -> Option<InvoiceView> {
        self.invoices.get(id).map(|slot| {
            let guard = slot.lock();
            guard.record.view(guard.watch.is_some())
        })
    }

    fn secret_custody(&self) -> SecretCustody {
        self.config.secret_custody
    }

    fn node_backend(&self) -> &'static str {
        self.gateway.backend()
    }

    fn metrics(&self) -> LifecycleMetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Periodically expire and evict invoices until the task is aborted
pub async fn sweep_task(service: Arc<HoldInvoiceService>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let report = service.sweep();
        if report.expired > 0 || report.evicted > 0 {
            debug!(
                expired = report.expired,
                evicted = report.evicted,
                tracked = service.tracked_count(),
                "Swept hold invoices"
            );
        }
    }
}
