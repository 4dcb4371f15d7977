//! Lifecycle counters
//!
//! Plain atomics, read by the HTTP layer's `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::InvoiceState;

/// Hold-invoice lifecycle metrics
#[derive(Debug, Default)]
pub struct LifecycleMetrics {
    pub invoices_created: AtomicU64,
    pub invoices_adopted: AtomicU64,
    pub active_watches: AtomicU64,
    pub updates_received: AtomicU64,
    pub updates_discarded: AtomicU64,
    pub settle_dispatched: AtomicU64,
    pub cancel_dispatched: AtomicU64,
    pub settled: AtomicU64,
    pub cancelled: AtomicU64,
    pub expired: AtomicU64,
    pub failed: AtomicU64,
    pub evicted: AtomicU64,
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.invoices_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_adopted(&self) {
        self.invoices_adopted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_started(&self) {
        self.active_watches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_finished(&self) {
        self.active_watches.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one subscription event, and whether it arrived after the decision
    pub fn record_update(&self, discarded: bool) {
        self.updates_received.fetch_add(1, Ordering::Relaxed);
        if discarded {
            self.updates_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_settle_dispatched(&self) {
        self.settle_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancel_dispatched(&self) {
        self.cancel_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an invoice reaching a terminal state
    pub fn record_terminal(&self, state: InvoiceState) {
        let counter = match state {
            InvoiceState::Settled => &self.settled,
            InvoiceState::Cancelled => &self.cancelled,
            InvoiceState::Expired => &self.expired,
            InvoiceState::Failed => &self.failed,
            InvoiceState::Open | InvoiceState::Held => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LifecycleMetricsSnapshot {
        LifecycleMetricsSnapshot {
            invoices_created: self.invoices_created.load(Ordering::Relaxed),
            invoices_adopted: self.invoices_adopted.load(Ordering::Relaxed),
            active_watches: self.active_watches.load(Ordering::Relaxed),
            updates_received: self.updates_received.load(Ordering::Relaxed),
            updates_discarded: self.updates_discarded.load(Ordering::Relaxed),
            settle_dispatched: self.settle_dispatched.load(Ordering::Relaxed),
            cancel_dispatched: self.cancel_dispatched.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LifecycleMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleMetricsSnapshot {
    pub invoices_created: u64,
    pub invoices_adopted: u64,
    pub active_watches: u64,
    pub updates_received: u64,
    pub updates_discarded: u64,
    pub settle_dispatched: u64,
    pub cancel_dispatched: u64,
    pub settled: u64,
    pub cancelled: u64,
    pub expired: u64,
    pub failed: u64,
    pub evicted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_counters() {
        let metrics = LifecycleMetrics::new();
        metrics.record_terminal(InvoiceState::Settled);
        metrics.record_terminal(InvoiceState::Expired);
        metrics.record_terminal(InvoiceState::Held);

        let snap = metrics.snapshot();
        assert_eq!(snap.settled, 1);
        assert_eq!(snap.expired, 1);
        assert_eq!(snap.cancelled, 0);
    }

    #[test]
    fn test_watch_gauge() {
        let metrics = LifecycleMetrics::new();
        metrics.record_watch_started();
        metrics.record_watch_started();
        metrics.record_watch_finished();
        assert_eq!(metrics.snapshot().active_watches, 1);
    }
}
