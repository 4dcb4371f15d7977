//! Per-invoice slot: the record, its active watch, and the decided outcome
//!
//! The record mutex is never held across an `.await`. Every decision is
//! claimed under it, and the outcome of that decision is published through
//! a `watch` channel so that late or duplicate callers read the same result.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};

use crate::domain::{InvoiceRecord, InvoiceState};
use crate::error::{LifecycleError, SettlementResult};

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

/// A running settlement watch
#[derive(Debug)]
pub(crate) struct ActiveWatch {
    pub id: u64,
    cancel: oneshot::Sender<()>,
}

impl ActiveWatch {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (cancel, cancel_rx) = oneshot::channel();
        let watch = Self {
            id: NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed),
            cancel,
        };
        (watch, cancel_rx)
    }

    /// Interrupt the watcher task
    pub fn interrupt(self) {
        let _ = self.cancel.send(());
    }
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub record: InvoiceRecord,
    pub watch: Option<ActiveWatch>,
}

impl SlotState {
    /// Drop the watch if it is still the one identified by `watch_id`
    pub fn release_watch(&mut self, watch_id: u64) {
        if self.watch.as_ref().is_some_and(|w| w.id == watch_id) {
            self.watch = None;
        }
    }
}

pub(crate) struct InvoiceSlot {
    state: Mutex<SlotState>,
    outcome: watch::Sender<Option<SettlementResult>>,
}

impl InvoiceSlot {
    pub fn new(record: InvoiceRecord) -> Self {
        let initial = match record.state() {
            state if state.is_terminal() => Some(Err(LifecycleError::AlreadyTerminal {
                id: record.id.clone(),
                state,
            })),
            _ => None,
        };
        let (outcome, _) = watch::channel(initial);
        Self {
            state: Mutex::new(SlotState {
                record,
                watch: None,
            }),
            outcome,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }

    pub fn state(&self) -> InvoiceState {
        self.state.lock().record.state()
    }

    /// Move to `state` and publish `result` to everyone waiting on the decision
    pub fn resolve(&self, state: InvoiceState, result: SettlementResult) {
        {
            let mut guard = self.state.lock();
            guard.record.resolve(state, Utc::now());
            guard.watch = None;
        }
        self.publish(result);
    }

    pub fn publish(&self, result: SettlementResult) {
        self.outcome.send_replace(Some(result));
    }

    /// Wait for whoever owns the decision to publish its outcome
    pub async fn decided_outcome(&self) -> SettlementResult {
        let mut rx = self.outcome.subscribe();
        let decided = {
            let waited = rx.wait_for(Option::is_some).await;
            waited.ok().and_then(|value| value.clone())
        };
        decided.unwrap_or_else(|| {
            Err(LifecycleError::Internal(
                "decision outcome channel closed".into(),
            ))
        })
    }
}
