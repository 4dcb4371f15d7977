//! Read-through wallet routes. These never touch the lifecycle manager.

use axum::{body::Bytes, extract::State, Json};
use hold_invoice::{NodeInfo, NodeInvoice, PaymentOutcome, PlainInvoice};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{check_description, parse_body, parse_sats, AppState};
use crate::domain::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceBody {
    pub sats: Option<Value>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayBody {
    pub request: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainBalance {
    pub confirmed_sats: u64,
    pub unconfirmed_sats: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OffChainBalance {
    pub local_sats: u64,
    pub remote_sats: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub on_chain_balance: OnChainBalance,
    pub off_chain_balance: OffChainBalance,
}

#[derive(Debug, Serialize)]
pub struct InvoicesResponse {
    pub invoices: Vec<NodeInvoice>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayResponse {
    pub success: bool,
    pub payment_info: PaymentOutcome,
}

/// GET /getinfo
pub async fn get_info(State(state): State<AppState>) -> Result<Json<NodeInfo>, ApiError> {
    Ok(Json(state.wallet.get_info().await?))
}

/// GET /balance
pub async fn balance(State(state): State<AppState>) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.wallet.get_balance().await?;
    Ok(Json(BalanceResponse {
        on_chain_balance: OnChainBalance {
            confirmed_sats: balance.onchain_confirmed_sats,
            unconfirmed_sats: balance.onchain_unconfirmed_sats,
        },
        off_chain_balance: OffChainBalance {
            local_sats: balance.channel_local_sats,
            remote_sats: balance.channel_remote_sats,
        },
    }))
}

/// POST /invoice
pub async fn create_invoice(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PlainInvoice>, ApiError> {
    let body: InvoiceBody = parse_body(&body)?;
    let sats = parse_sats(body.sats.as_ref())
        .filter(|sats| *sats > 0)
        .ok_or_else(|| ApiError::bad_request("A positive numeric `sats` value is required."))?;
    check_description(body.description.as_deref(), &state.limits)?;

    Ok(Json(
        state.wallet.create_invoice(sats, body.description).await?,
    ))
}

/// GET /invoices
pub async fn list_invoices(
    State(state): State<AppState>,
) -> Result<Json<InvoicesResponse>, ApiError> {
    let invoices = state.wallet.list_invoices().await?;
    Ok(Json(InvoicesResponse { invoices }))
}

/// POST /pay
pub async fn pay(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PayResponse>, ApiError> {
    let body: PayBody = parse_body(&body)?;
    let request = body
        .request
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("A payment `request` is required."))?;

    let payment_info = state.wallet.pay(&request).await?;
    Ok(Json(PayResponse {
        success: true,
        payment_info,
    }))
}
