//! HTTP routes
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /`, `GET /health`, `GET /metrics` | [`system`] |
//! | `GET /getinfo`, `GET /balance`, `POST /invoice`, `GET /invoices`, `POST /pay` | [`wallet`] |
//! | `POST /holdinvoice`, `POST /settleholdinvoice`, `POST /cancel-invoice`, `GET /invoice/:id`, `GET /holdinvoice/:id` | [`hold`] |
//!
//! Bodies are parsed by hand so that malformed input produces the same
//! JSON error shape as every other failure.

pub mod hold;
pub mod system;
pub mod wallet;

use axum::{
    body::Bytes,
    routing::{get, post},
    Router,
};
use hold_invoice::{HoldInvoiceApi, InvoiceId, WalletGateway};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::domain::config::LimitsConfig;
use crate::domain::error::ApiError;
use crate::middleware::GatewayMetrics;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn HoldInvoiceApi>,
    pub wallet: Arc<dyn WalletGateway>,
    pub metrics: Arc<GatewayMetrics>,
    pub limits: LimitsConfig,
}

/// All gateway routes, without middleware
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(system::banner))
        .route("/health", get(system::health))
        .route("/metrics", get(system::metrics))
        .route("/getinfo", get(wallet::get_info))
        .route("/balance", get(wallet::balance))
        .route("/invoice", post(wallet::create_invoice))
        .route("/invoices", get(wallet::list_invoices))
        .route("/pay", post(wallet::pay))
        .route("/holdinvoice", post(hold::create_hold_invoice))
        .route("/holdinvoice/:id", get(hold::tracked_invoice))
        .route("/settleholdinvoice", post(hold::settle_hold_invoice))
        .route("/cancel-invoice", post(hold::cancel_invoice))
        .route("/invoice/:id", get(hold::lookup_invoice))
}

/// Parse a JSON body; an empty body reads as `T::default()`
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))
}

pub(crate) fn parse_invoice_id(raw: &str) -> Result<InvoiceId, ApiError> {
    InvoiceId::parse(raw).ok_or_else(|| ApiError::bad_request(format!("Invalid invoice id: {raw:?}")))
}

/// Satoshi amount given as a JSON number or a numeric string
pub(crate) fn parse_sats(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn check_description(
    description: Option<&str>,
    limits: &LimitsConfig,
) -> Result<(), ApiError> {
    match description {
        Some(d) if d.len() > limits.max_description_len => Err(ApiError::bad_request(format!(
            "Description exceeds {} bytes.",
            limits.max_description_len
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::{body::Body, http::Request, response::Response};
    use hold_invoice::{HoldInvoiceService, LifecycleConfig, SecretCustody, SimulatedNode};
    use http_body_util::BodyExt;

    pub struct TestApp {
        pub router: Router,
        pub node: Arc<SimulatedNode>,
        pub service: Arc<HoldInvoiceService>,
    }

    pub fn app_with(custody: SecretCustody) -> TestApp {
        let node = Arc::new(SimulatedNode::new());
        let config = LifecycleConfig {
            secret_custody: custody,
            ..LifecycleConfig::default()
        };
        let service = Arc::new(HoldInvoiceService::new(config, node.clone()).unwrap());
        let state = AppState {
            api: service.clone(),
            wallet: node.clone(),
            metrics: Arc::new(GatewayMetrics::new()),
            limits: LimitsConfig::default(),
        };
        TestApp {
            router: routes().with_state(state),
            node,
            service,
        }
    }

    pub fn app() -> TestApp {
        app_with(SecretCustody::Client)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }
}
