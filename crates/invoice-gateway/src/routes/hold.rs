//! Hold-invoice routes

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use hold_invoice::{
    CreateHold, HoldExpiry, InvoiceId, InvoiceState, InvoiceView, NodeInvoice, PaymentHash,
    Preimage, SecretCustody,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use super::{check_description, parse_body, parse_invoice_id, parse_sats, AppState};
use crate::domain::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldInvoiceBody {
    #[serde(alias = "sats")]
    pub amount: Option<Value>,
    pub description: Option<String>,
    /// RFC 3339 string or unix milliseconds
    #[serde(alias = "timestamp", alias = "expiry")]
    pub expires_at: Option<Value>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldInvoiceResponse {
    pub id: InvoiceId,
    pub payment_request: String,
    pub payment_hash: PaymentHash,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<Preimage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettleBody {
    pub id: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    pub id: Option<String>,
}

/// Outcome of a settle or cancel request
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub id: InvoiceId,
    pub state: InvoiceState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct NodeInvoiceResponse {
    #[serde(flatten)]
    pub invoice: NodeInvoice,
    pub state: InvoiceState,
}

/// POST /holdinvoice
pub async fn create_hold_invoice(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<HoldInvoiceResponse>, ApiError> {
    let body: HoldInvoiceBody = parse_body(&body)?;

    let amount_sats = parse_sats(body.amount.as_ref())
        .ok_or_else(|| ApiError::bad_request("A positive numeric `amount` value is required."))?;
    check_description(body.description.as_deref(), &state.limits)?;
    let expiry = parse_expiry(&body)?;

    let mut request = CreateHold::new(amount_sats).with_expiry(expiry);
    if let Some(description) = body.description {
        request = request.with_description(description);
    }

    let created = state.api.create_hold(request).await?;
    Ok(Json(HoldInvoiceResponse {
        id: created.id,
        payment_request: created.payment_request,
        payment_hash: created.commitment_hash,
        expires_at: created.expires_at,
        secret: created.secret,
    }))
}

/// POST /settleholdinvoice
///
/// Blocks until the invoice is held and settled, or reaches another
/// terminal state.
pub async fn settle_hold_invoice(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DecisionResponse>, ApiError> {
    let body: SettleBody = parse_body(&body)?;
    let custody = state.api.secret_custody();

    let (raw_id, raw_secret) = match (body.id, body.secret, custody) {
        (Some(id), secret @ Some(_), _) | (Some(id), secret @ None, SecretCustody::Server) => {
            (id, secret)
        }
        _ => return Err(ApiError::bad_request("Both `id` and `secret` are required.")),
    };
    let id = parse_invoice_id(&raw_id)?;

    let settled = match raw_secret {
        Some(secret) => {
            let secret = Preimage::from_hex(secret.trim())
                .map_err(|e| ApiError::bad_request(format!("Invalid secret: {e}")))?;
            state.api.await_and_settle(&id, secret).await?
        }
        None => state.api.settle_custodied(&id).await?,
    };

    info!(invoice_id = %id, state = %settled, "Settle request completed");
    Ok(Json(DecisionResponse {
        message: "Invoice settled".into(),
        id,
        state: settled,
    }))
}

/// POST /cancel-invoice
pub async fn cancel_invoice(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DecisionResponse>, ApiError> {
    let body: CancelBody = parse_body(&body)?;
    let raw_id = body
        .id
        .ok_or_else(|| ApiError::bad_request("An invoice `id` is required."))?;
    let id = parse_invoice_id(&raw_id)?;

    let final_state = state.api.cancel(&id).await?;
    let message = match final_state {
        InvoiceState::Cancelled => "Invoice cancelled".to_string(),
        other => format!("Invoice already {other}"),
    };
    Ok(Json(DecisionResponse {
        id,
        state: final_state,
        message,
    }))
}

/// GET /invoice/:id — the node's view
pub async fn lookup_invoice(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<NodeInvoiceResponse>, ApiError> {
    let id = parse_invoice_id(&raw_id)?;
    let invoice = state.api.lookup(&id).await?;
    let invoice_state = invoice.state(Utc::now());
    Ok(Json(NodeInvoiceResponse {
        invoice,
        state: invoice_state,
    }))
}

/// GET /holdinvoice/:id — the lifecycle manager's view
pub async fn tracked_invoice(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<InvoiceView>, ApiError> {
    let id = parse_invoice_id(&raw_id)?;
    state
        .api
        .tracked(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("invoice not tracked: {id}")))
}

fn parse_expiry(body: &HoldInvoiceBody) -> Result<HoldExpiry, ApiError> {
    match (&body.expires_at, body.ttl_seconds) {
        (Some(_), Some(_)) => Err(ApiError::bad_request(
            "Use either `expiresAt` or `ttlSeconds`, not both.",
        )),
        (Some(value), None) => parse_timestamp(value).map(HoldExpiry::At).ok_or_else(|| {
            ApiError::bad_request("`expiresAt` must be an RFC 3339 timestamp or unix milliseconds.")
        }),
        (None, Some(secs)) => Ok(HoldExpiry::After(Duration::from_secs(secs))),
        (None, None) => Ok(HoldExpiry::Default),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{app, app_with, get, json, post};
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[test]
    fn test_parse_timestamp_forms() {
        let at = parse_timestamp(&json!("2030-01-01T00:00:00Z")).unwrap();
        assert_eq!(at.timestamp(), 1_893_456_000);
        let at = parse_timestamp(&json!(1_893_456_000_000i64)).unwrap();
        assert_eq!(at.timestamp(), 1_893_456_000);
        assert!(parse_timestamp(&json!("tomorrow")).is_none());
        assert!(parse_timestamp(&json!(true)).is_none());
    }

    #[tokio::test]
    async fn test_create_returns_secret_under_client_custody() {
        let app = app();
        let response = app
            .router
            .oneshot(post(
                "/holdinvoice",
                json!({"amount": 1500, "description": "escrow", "ttlSeconds": 120}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        let secret = Preimage::from_hex(body["secret"].as_str().unwrap()).unwrap();
        assert_eq!(secret.payment_hash().to_hex(), body["paymentHash"]);
        assert!(body["paymentRequest"].as_str().unwrap().starts_with("ln"));
        assert_eq!(app.service.tracked_count(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let app = app();
        let cases = [
            (json!({}), "invalid_request"),
            (json!({"amount": "lots"}), "invalid_request"),
            (json!({"amount": 0}), "invalid_amount"),
            (
                json!({"amount": 10, "expiresAt": "2030-01-01T00:00:00Z", "ttlSeconds": 60}),
                "invalid_request",
            ),
            (json!({"amount": 10, "expiresAt": "2001-01-01T00:00:00Z"}), "invalid_request"),
            (json!({"amount": 10, "description": "x".repeat(700)}), "invalid_request"),
        ];

        for (body, code) in cases {
            let response = app
                .router
                .clone()
                .oneshot(post("/holdinvoice", body.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json(response).await["error"]["code"], code, "{body}");
        }
        assert_eq!(app.node.calls().create, 0);
    }

    #[tokio::test]
    async fn test_settle_requires_id_and_secret() {
        let app = app();
        let response = app
            .router
            .oneshot(post("/settleholdinvoice", json!({"id": "abc"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json(response).await["error"]["message"],
            "Both `id` and `secret` are required."
        );
    }

    #[tokio::test]
    async fn test_settle_with_wrong_secret() {
        let app = app();
        let created = json(
            app.router
                .clone()
                .oneshot(post("/holdinvoice", json!({"amount": 100})))
                .await
                .unwrap(),
        )
        .await;

        let response = app
            .router
            .clone()
            .oneshot(post(
                "/settleholdinvoice",
                json!({"id": created["id"], "secret": "11".repeat(32)}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"]["code"], "secret_mismatch");
        assert_eq!(app.node.calls().subscribe, 0);
    }

    #[tokio::test]
    async fn test_settle_after_payment_is_held() {
        let app = app();
        let created = json(
            app.router
                .clone()
                .oneshot(post("/holdinvoice", json!({"amount": 100})))
                .await
                .unwrap(),
        )
        .await;
        let id = InvoiceId::new(created["id"].as_str().unwrap());
        assert!(app.node.lock_in(&id));

        let response = app
            .router
            .clone()
            .oneshot(post(
                "/settleholdinvoice",
                json!({"id": created["id"], "secret": created["secret"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["state"], "SETTLED");
        assert_eq!(app.node.calls().settle, 1);

        let view = json(
            app.router
                .oneshot(get(&format!("/holdinvoice/{id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(view["state"], "SETTLED");
        assert_eq!(view["decisionMade"], true);
        assert!(view.get("secret").is_none());
    }

    #[tokio::test]
    async fn test_server_custody_settles_without_secret() {
        let app = app_with(SecretCustody::Server);
        let created = json(
            app.router
                .clone()
                .oneshot(post("/holdinvoice", json!({"amount": 100})))
                .await
                .unwrap(),
        )
        .await;
        assert!(created.get("secret").is_none());
        let id = InvoiceId::new(created["id"].as_str().unwrap());
        app.node.lock_in(&id);

        let response = app
            .router
            .oneshot(post("/settleholdinvoice", json!({"id": created["id"]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["state"], "SETTLED");
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let app = app();
        let created = json(
            app.router
                .clone()
                .oneshot(post("/holdinvoice", json!({"amount": 100})))
                .await
                .unwrap(),
        )
        .await;

        for _ in 0..2 {
            let response = app
                .router
                .clone()
                .oneshot(post("/cancel-invoice", json!({"id": created["id"]})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json(response).await;
            assert_eq!(body["state"], "CANCELLED");
        }
        assert_eq!(app.node.calls().cancel, 1);
    }

    #[tokio::test]
    async fn test_cancel_requires_id() {
        let app = app();
        let response = app
            .router
            .oneshot(post("/cancel-invoice", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_lookup_reports_node_state() {
        let app = app();
        let created = json(
            app.router
                .clone()
                .oneshot(post("/holdinvoice", json!({"amount": 42})))
                .await
                .unwrap(),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        let body = json(
            app.router
                .clone()
                .oneshot(get(&format!("/invoice/{id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["state"], "OPEN");
        assert_eq!(body["amountSats"], 42);

        let response = app
            .router
            .oneshot(get(&format!("/invoice/{}", "ab".repeat(32))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_untracked_view_is_not_found() {
        let app = app();
        let response = app
            .router
            .oneshot(get("/holdinvoice/unknown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["error"]["code"], "not_found");
    }
}
