//! # HTTP Flows
//!
//! Full round trips through the gateway on a bound socket: the merchant
//! creates and settles over HTTP while the payer pays through `/pay` on the
//! same simulated node.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use hold_invoice::{
        HoldInvoiceService, InvoiceId, LifecycleConfig, SecretCustody, SimulatedNode,
    };
    use invoice_gateway::{GatewayConfig, InvoiceGatewayService};
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    struct Harness {
        base: String,
        client: reqwest::Client,
        node: Arc<SimulatedNode>,
        _stop: oneshot::Sender<()>,
    }

    impl Harness {
        async fn start(lifecycle: LifecycleConfig) -> Self {
            let node = Arc::new(SimulatedNode::new());
            let service = Arc::new(HoldInvoiceService::new(lifecycle, node.clone()).unwrap());
            let gateway =
                InvoiceGatewayService::new(GatewayConfig::default(), service, node.clone())
                    .unwrap();

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let (stop, stopped) = oneshot::channel::<()>();
            tokio::spawn(async move {
                gateway
                    .serve(listener, async {
                        let _ = stopped.await;
                    })
                    .await
            });

            Self {
                base,
                client: reqwest::Client::new(),
                node,
                _stop: stop,
            }
        }

        async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
            let response = self
                .client
                .post(format!("{}{}", self.base, path))
                .json(&body)
                .send()
                .await
                .unwrap();
            let status = response.status();
            (status, response.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> (StatusCode, Value) {
            let response = self
                .client
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap();
            let status = response.status();
            (status, response.json().await.unwrap())
        }

        async fn wait_for_watcher(&self, id: &str) {
            let id = InvoiceId::new(id);
            timeout(Duration::from_secs(5), async {
                while self.node.subscriber_count(&id) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("settle request never started watching");
        }
    }

    // =========================================================================
    // CREATE → PAY → SETTLE
    // =========================================================================

    #[tokio::test]
    async fn test_create_pay_settle_over_http() {
        let harness = Arc::new(Harness::start(LifecycleConfig::default()).await);

        let (status, created) = harness
            .post("/holdinvoice", json!({ "amount": 4200, "description": "rental deposit" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["id"].as_str().unwrap().to_string();
        let secret = created["secret"].as_str().unwrap().to_string();
        let payment_request = created["paymentRequest"].as_str().unwrap().to_string();
        assert_eq!(created["paymentHash"], created["id"]);

        let settle = {
            let harness = Arc::clone(&harness);
            let body = json!({ "id": id, "secret": secret });
            tokio::spawn(async move { harness.post("/settleholdinvoice", body).await })
        };
        harness.wait_for_watcher(&id).await;

        let (status, paid) = harness
            .post("/pay", json!({ "request": payment_request }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paid["success"], true);

        let (status, settled) = timeout(Duration::from_secs(5), settle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settled["state"], "SETTLED");

        let (status, view) = harness.get(&format!("/holdinvoice/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], "SETTLED");

        let (_, node_view) = harness.get(&format!("/invoice/{id}")).await;
        assert_eq!(node_view["isConfirmed"], true);

        let (_, metrics) = harness.get("/metrics").await;
        assert_eq!(metrics["lifecycle"]["settled"], 1);
        assert_eq!(metrics["lifecycle"]["settle_dispatched"], 1);
    }

    // =========================================================================
    // CANCEL WHILE A SETTLE IS WAITING
    // =========================================================================

    #[tokio::test]
    async fn test_cancel_releases_pending_settle() {
        let harness = Arc::new(Harness::start(LifecycleConfig::default()).await);
        let (_, created) = harness.post("/holdinvoice", json!({ "amount": 900 })).await;
        let id = created["id"].as_str().unwrap().to_string();
        let secret = created["secret"].as_str().unwrap().to_string();

        let settle = {
            let harness = Arc::clone(&harness);
            let body = json!({ "id": id, "secret": secret });
            tokio::spawn(async move { harness.post("/settleholdinvoice", body).await })
        };
        harness.wait_for_watcher(&id).await;

        let (status, cancelled) = harness.post("/cancel-invoice", json!({ "id": id })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["state"], "CANCELLED");

        let (status, body) = timeout(Duration::from_secs(5), settle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "cancelled");

        // Cancelling again is idempotent and reports the terminal state
        let (status, again) = harness.post("/cancel-invoice", json!({ "id": id })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["state"], "CANCELLED");
        assert_eq!(harness.node.calls().cancel, 1);

        // The payer can no longer pay it
        let (status, _) = harness
            .post("/pay", json!({ "request": created["paymentRequest"] }))
            .await;
        assert!(status.is_client_error());
    }

    // =========================================================================
    // SERVER CUSTODY
    // =========================================================================

    #[tokio::test]
    async fn test_server_custody_settles_by_id() {
        let lifecycle = LifecycleConfig {
            secret_custody: SecretCustody::Server,
            ..LifecycleConfig::default()
        };
        let harness = Arc::new(Harness::start(lifecycle).await);

        let (_, created) = harness.post("/holdinvoice", json!({ "amount": 1500 })).await;
        assert!(created.get("secret").is_none());
        let id = created["id"].as_str().unwrap().to_string();

        // Pay first: the watcher picks up the held state on subscribe
        let (status, _) = harness
            .post("/pay", json!({ "request": created["paymentRequest"] }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, settled) = harness.post("/settleholdinvoice", json!({ "id": id })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settled["state"], "SETTLED");
    }

    // =========================================================================
    // REJECTED REQUESTS
    // =========================================================================

    #[tokio::test]
    async fn test_wrong_secret_rejected_without_node_call() {
        let harness = Harness::start(LifecycleConfig::default()).await;
        let (_, created) = harness.post("/holdinvoice", json!({ "amount": 10 })).await;

        let (status, body) = harness
            .post(
                "/settleholdinvoice",
                json!({ "id": created["id"], "secret": "11".repeat(32) }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "secret_mismatch");
        assert_eq!(harness.node.calls().settle, 0);

        let (status, body) = harness.post("/holdinvoice", json!({ "amount": 0 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_amount");
    }
}
