//! # Lifecycle Flows
//!
//! The lifecycle service and the wallet port driven against one simulated
//! node, the way the runtime wires them.
//!
//! 1. **Payer → hold → settle**: a payment made through the wallet port is
//!    what the watcher sees as the held event
//! 2. **Concurrent invoices**: watchers are independent
//! 3. **Settle/cancel races**: exactly one node decision per invoice
//! 4. **Background sweep**: unwatched invoices expire without node calls

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use hold_invoice::{
        sweep_task, CreateHold, HoldExpiry, HoldInvoiceApi, HoldInvoiceService, InvoiceState,
        LifecycleConfig, LifecycleError, SimulatedNode, WalletGateway,
    };
    use tokio::time::timeout;

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    fn setup_with(config: LifecycleConfig) -> (Arc<SimulatedNode>, Arc<HoldInvoiceService>) {
        let node = Arc::new(SimulatedNode::new());
        let service = Arc::new(HoldInvoiceService::new(config, node.clone()).unwrap());
        (node, service)
    }

    fn setup() -> (Arc<SimulatedNode>, Arc<HoldInvoiceService>) {
        setup_with(LifecycleConfig::default())
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // =========================================================================
    // PAYER → HOLD → SETTLE
    // =========================================================================

    #[tokio::test]
    async fn test_wallet_payment_is_held_then_settled() {
        let (node, service) = setup();
        let created = service
            .create_hold(CreateHold::new(2_100).with_description("escrow"))
            .await
            .unwrap();
        let secret = created.secret.clone().unwrap();

        let settle = {
            let service = Arc::clone(&service);
            let id = created.id.clone();
            tokio::spawn(async move { service.await_and_settle(&id, secret).await })
        };
        wait_until(|| node.subscriber_count(&created.id) == 1).await;

        let paid = node.pay(&created.payment_request).await.unwrap();
        assert_eq!(paid.payment_hash, created.commitment_hash);

        let state = timeout(Duration::from_secs(5), settle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(state, InvoiceState::Settled);

        let on_node = node.invoice(&created.id).unwrap();
        assert!(on_node.is_confirmed);
        assert_eq!(node.calls().settle, 1);
        assert_eq!(node.calls().cancel, 0);

        // The payer's plain wallet listing sees the settled hold invoice too
        let listed = node.list_invoices().await.unwrap();
        assert!(listed.iter().any(|inv| inv.id == created.id && inv.is_confirmed));
    }

    // =========================================================================
    // CONCURRENT INVOICES
    // =========================================================================

    #[tokio::test]
    async fn test_many_invoices_settle_independently() {
        let (node, service) = setup();
        let mut created = Vec::new();
        for amount in 1..=20u64 {
            created.push(service.create_hold(CreateHold::new(amount * 100)).await.unwrap());
        }

        let watches: Vec<_> = created
            .iter()
            .map(|inv| {
                let service = Arc::clone(&service);
                let id = inv.id.clone();
                let secret = inv.secret.clone().unwrap();
                tokio::spawn(async move { service.await_and_settle(&id, secret).await })
            })
            .collect();

        for inv in &created {
            wait_until(|| node.subscriber_count(&inv.id) == 1).await;
            node.pay(&inv.payment_request).await.unwrap();
        }

        let outcomes = timeout(Duration::from_secs(10), join_all(watches))
            .await
            .unwrap();
        for outcome in outcomes {
            assert_eq!(outcome.unwrap().unwrap(), InvoiceState::Settled);
        }

        let metrics = service.metrics();
        assert_eq!(metrics.invoices_created, 20);
        assert_eq!(metrics.settled, 20);
        assert_eq!(metrics.settle_dispatched, 20);
        assert_eq!(metrics.active_watches, 0);
    }

    // =========================================================================
    // SETTLE / CANCEL RACES
    // =========================================================================

    #[tokio::test]
    async fn test_settle_cancel_race_decides_once_per_invoice() {
        let (node, service) = setup();
        node.set_settle_delay(Duration::from_millis(10));

        for round in 0..10u64 {
            let created = service.create_hold(CreateHold::new(500)).await.unwrap();
            let secret = created.secret.clone().unwrap();
            node.pay(&created.payment_request).await.unwrap();

            let before = node.calls();
            let (settled, cancelled) = tokio::join!(
                service.await_and_settle(&created.id, secret),
                service.cancel(&created.id),
            );
            let after = node.calls();

            let decisions = (after.settle - before.settle) + (after.cancel - before.cancel);
            assert_eq!(decisions, 1, "round {round} dispatched {decisions} decisions");

            let final_state = service.tracked(&created.id).unwrap().state;
            match final_state {
                InvoiceState::Settled => {
                    assert_eq!(settled.unwrap(), InvoiceState::Settled);
                    assert_eq!(cancelled.unwrap(), InvoiceState::Settled);
                }
                InvoiceState::Cancelled => {
                    assert!(matches!(
                        settled,
                        Err(LifecycleError::Cancelled { .. } | LifecycleError::AlreadyTerminal { .. })
                    ));
                    assert_eq!(cancelled.unwrap(), InvoiceState::Cancelled);
                }
                other => panic!("unexpected final state {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_invoice_cannot_be_paid() {
        let (node, service) = setup();
        let created = service.create_hold(CreateHold::new(800)).await.unwrap();

        assert_eq!(service.cancel(&created.id).await.unwrap(), InvoiceState::Cancelled);
        assert!(node.pay(&created.payment_request).await.is_err());
        assert!(node.invoice(&created.id).unwrap().is_canceled);
    }

    // =========================================================================
    // BACKGROUND SWEEP
    // =========================================================================

    #[tokio::test]
    async fn test_background_sweeper_expires_unwatched_invoice() {
        let config = LifecycleConfig {
            sweep_interval: Duration::from_millis(50),
            ..LifecycleConfig::default()
        };
        let (node, service) = setup_with(config);
        let created = service
            .create_hold(CreateHold::new(300).with_expiry(HoldExpiry::After(Duration::from_secs(1))))
            .await
            .unwrap();

        let sweeper = tokio::spawn(sweep_task(Arc::clone(&service), Duration::from_millis(50)));
        wait_until(|| {
            service
                .tracked(&created.id)
                .is_some_and(|view| view.state == InvoiceState::Expired)
        })
        .await;
        sweeper.abort();

        assert_eq!(node.calls().settle, 0);
        assert_eq!(node.calls().cancel, 0);
        assert_eq!(service.metrics().expired, 1);
    }
}
