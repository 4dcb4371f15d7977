//! Settlement watcher
//!
//! One task per watched invoice. It consumes the node's update stream until
//! the invoice is held, the deadline passes, the stream ends, or a cancel
//! interrupts it. When it wins the decision it tears the subscription down
//! first and only then dispatches the settle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::{InvoiceId, InvoiceState, InvoiceUpdate, Preimage, UpdateVerdict};
use crate::error::{GatewayError, LifecycleError, NodeContext, Operation, SettlementResult};
use crate::metrics::LifecycleMetrics;
use crate::ports::{InvoiceUpdateStream, NodeGateway};
use crate::slot::InvoiceSlot;

/// How a watch ended
enum WatchEnd {
    /// Outcome already known
    Resolved(SettlementResult),
    /// This watcher won the decision and must settle
    Settle,
}

pub(crate) struct InvoiceWatcher {
    pub id: InvoiceId,
    pub watch_id: u64,
    pub secret: Preimage,
    pub expires_at: DateTime<Utc>,
    pub slot: Arc<InvoiceSlot>,
    pub gateway: Arc<dyn NodeGateway>,
    pub metrics: Arc<LifecycleMetrics>,
}

impl InvoiceWatcher {
    /// Drive the watch to completion and report the outcome to the caller
    pub async fn run(
        self,
        stream: InvoiceUpdateStream,
        cancel_rx: oneshot::Receiver<()>,
        report: oneshot::Sender<SettlementResult>,
    ) {
        self.metrics.record_watch_started();
        let mut guard = WatchGuard::new(&self);
        let result = match self.consume(stream, cancel_rx).await {
            WatchEnd::Resolved(result) => result,
            WatchEnd::Settle => {
                guard.settling = true;
                self.dispatch_settle().await
            }
        };
        guard.finished = true;
        drop(guard);
        self.metrics.record_watch_finished();

        if report.send(result).is_err() {
            debug!(invoice_id = %self.id, "Caller left before the settlement outcome");
        }
    }

    async fn consume(
        &self,
        mut stream: InvoiceUpdateStream,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> WatchEnd {
        let deadline = tokio::time::sleep(until(self.expires_at));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = &mut cancel_rx => {
                    debug!(invoice_id = %self.id, "Watch interrupted by cancel");
                    return WatchEnd::Resolved(self.slot.decided_outcome().await);
                }
                _ = &mut deadline => {
                    return WatchEnd::Resolved(self.on_deadline().await);
                }
                item = stream.next() => match item {
                    Some(Ok(update)) => {
                        if let Some(end) = self.on_update(update) {
                            return end;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(invoice_id = %self.id, error = %err, "Invoice subscription failed");
                        return WatchEnd::Resolved(self.on_stream_end(Some(err)).await);
                    }
                    None => {
                        return WatchEnd::Resolved(self.on_stream_end(None).await);
                    }
                },
            }
        }
    }

    fn on_update(&self, update: InvoiceUpdate) -> Option<WatchEnd> {
        let verdict = {
            let mut guard = self.slot.lock();
            let verdict = guard.record.observe(&update, Utc::now());
            if verdict != UpdateVerdict::Wait && verdict != UpdateVerdict::Discard {
                guard.release_watch(self.watch_id);
            }
            verdict
        };
        self.metrics
            .record_update(verdict == UpdateVerdict::Discard);

        match verdict {
            UpdateVerdict::Wait => {
                debug!(invoice_id = %self.id, ?update, "Invoice not held yet");
                None
            }
            // a cancel claimed the decision; its signal arrives next
            UpdateVerdict::Discard => {
                debug!(invoice_id = %self.id, ?update, "Discarding update after decision");
                None
            }
            UpdateVerdict::Settle => Some(WatchEnd::Settle),
            UpdateVerdict::SettledElsewhere => {
                warn!(invoice_id = %self.id, "Invoice settled by another client");
                let result = Err(LifecycleError::AlreadyTerminal {
                    id: self.id.clone(),
                    state: InvoiceState::Settled,
                });
                self.metrics.record_terminal(InvoiceState::Settled);
                self.slot.publish(result.clone());
                Some(WatchEnd::Resolved(result))
            }
            UpdateVerdict::CancelledElsewhere => {
                info!(invoice_id = %self.id, "Invoice cancelled on the node");
                let result = Err(LifecycleError::Cancelled {
                    id: self.id.clone(),
                });
                self.metrics.record_terminal(InvoiceState::Cancelled);
                self.slot.publish(result.clone());
                Some(WatchEnd::Resolved(result))
            }
        }
    }

    async fn on_deadline(&self) -> SettlementResult {
        // the timer and the wall clock can disagree by a few ms
        let now = Utc::now().max(self.expires_at);
        let expired = {
            let mut guard = self.slot.lock();
            let expired = guard.record.expire(now);
            if expired.is_some() {
                guard.release_watch(self.watch_id);
            }
            expired
        };

        match expired {
            Some(state) => {
                info!(invoice_id = %self.id, %state, "Invoice expired before payment was held");
                self.metrics.record_terminal(state);
                let result = Err(LifecycleError::Timeout {
                    id: self.id.clone(),
                });
                self.slot.publish(result.clone());
                result
            }
            None => self.slot.decided_outcome().await,
        }
    }

    async fn on_stream_end(&self, error: Option<GatewayError>) -> SettlementResult {
        if Utc::now() >= self.expires_at {
            return self.on_deadline().await;
        }

        let decided = {
            let mut guard = self.slot.lock();
            guard.release_watch(self.watch_id);
            guard.record.is_decided()
        };
        if decided {
            return self.slot.decided_outcome().await;
        }

        match error {
            Some(err) => Err(LifecycleError::from_gateway(
                err,
                NodeContext::new(Operation::Subscribe, &self.id),
            )),
            None => {
                warn!(invoice_id = %self.id, "Invoice subscription closed before payment was held");
                Err(LifecycleError::SubscriptionClosed {
                    id: self.id.clone(),
                })
            }
        }
    }

    async fn dispatch_settle(&self) -> SettlementResult {
        info!(invoice_id = %self.id, "Invoice held, releasing secret");
        self.metrics.record_settle_dispatched();

        let (state, result) = match self.gateway.settle_hold_invoice(&self.secret).await {
            Ok(()) => (InvoiceState::Settled, Ok(InvoiceState::Settled)),
            Err(GatewayError::AlreadySettled) => (
                InvoiceState::Settled,
                Err(LifecycleError::AlreadyTerminal {
                    id: self.id.clone(),
                    state: InvoiceState::Settled,
                }),
            ),
            Err(err) => (
                InvoiceState::Failed,
                Err(LifecycleError::from_gateway(
                    err,
                    NodeContext::new(Operation::Settle, &self.id),
                )),
            ),
        };

        match &result {
            Ok(_) => info!(invoice_id = %self.id, "Invoice settled"),
            Err(err) => warn!(invoice_id = %self.id, error = %err, %state, "Settle did not complete"),
        }
        self.metrics.record_terminal(state);
        self.slot.resolve(state, result.clone());
        result
    }
}

/// Cleans up after a watcher that stopped without finishing, by panic or abort
///
/// A watcher that already owns the settle decision resolves the invoice as
/// FAILED so waiters are not left on an outcome nobody will publish.
/// Otherwise it only gives the watch slot back.
struct WatchGuard<'a> {
    watcher: &'a InvoiceWatcher,
    settling: bool,
    finished: bool,
}

impl<'a> WatchGuard<'a> {
    fn new(watcher: &'a InvoiceWatcher) -> Self {
        Self {
            watcher,
            settling: false,
            finished: false,
        }
    }
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let watcher = self.watcher;
        watcher.metrics.record_watch_finished();
        if self.settling {
            warn!(invoice_id = %watcher.id, "Watcher stopped while settling");
            watcher.metrics.record_terminal(InvoiceState::Failed);
            watcher.slot.resolve(
                InvoiceState::Failed,
                Err(LifecycleError::Internal(
                    "watcher stopped before publishing a decision".into(),
                )),
            );
        } else {
            debug!(invoice_id = %watcher.id, "Watcher stopped early");
            watcher.slot.lock().release_watch(watcher.watch_id);
        }
    }
}

fn until(deadline: DateTime<Utc>) -> std::time::Duration {
    (deadline - Utc::now()).to_std().unwrap_or_default()
}
