//! LND REST backend
//!
//! Implements both node ports against LND's REST proxy. Requests carry the
//! macaroon in `Grpc-Metadata-macaroon`; when a certificate is configured
//! it becomes the only trusted root. Invoice ids are the hex payment hash.
//!
//! LND encodes 64-bit integers as JSON strings and byte fields as base64.
//! The wire structs below accept both forms.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE as BASE64_URL};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use hold_invoice::{
    CreateHoldRequest, CreatedHoldInvoice, GatewayError, InvoiceId, InvoiceUpdate,
    InvoiceUpdateStream, NodeGateway, NodeInfo, NodeInvoice, PaymentHash, PaymentOutcome,
    PlainInvoice, Preimage, WalletBalance, WalletGateway,
};
use hold_invoice::domain::SECRET_LEN;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::LndConfig;

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Longest subscription frame accepted before the stream is dropped
const MAX_FRAME_LEN: usize = 64 * 1024;

/// LND REST client
pub struct LndRestClient {
    base_url: String,
    macaroon_hex: String,
    /// Bounded requests
    client: Client,
    /// Long-lived invoice subscriptions; no overall timeout
    stream_client: Client,
}

impl LndRestClient {
    pub fn new(config: &LndConfig) -> Result<Self, reqwest::Error> {
        let builder = || {
            let mut builder = Client::builder()
                .use_rustls_tls()
                .connect_timeout(Duration::from_secs(10));
            if let Some(pem) = &config.tls_cert_pem {
                if let Ok(cert) = reqwest::Certificate::from_pem(pem) {
                    builder = builder
                        .tls_built_in_root_certs(false)
                        .add_root_certificate(cert);
                } else {
                    warn!("LND TLS certificate is not valid PEM, using system roots");
                }
            }
            builder
        };

        Ok(Self {
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            macaroon_hex: config.macaroon_hex.clone(),
            client: builder().timeout(config.request_timeout).build()?,
            stream_client: builder().build()?,
        })
    }

    fn request(&self, client: &Client, method: Method, path: &str) -> RequestBuilder {
        client
            .request(method, format!("{}{}", self.base_url, path))
            .header(MACAROON_HEADER, &self.macaroon_hex)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Node(format!("unexpected LND response: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.send(self.request(&self.client, Method::GET, path)).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        self.send(self.request(&self.client, Method::POST, path).json(&body))
            .await
    }
}

#[async_trait]
impl NodeGateway for LndRestClient {
    fn backend(&self) -> &'static str {
        "lnd"
    }

    async fn create_hold_invoice(
        &self,
        request: CreateHoldRequest,
    ) -> Result<CreatedHoldInvoice, GatewayError> {
        let expiry = (request.expires_at - Utc::now()).num_seconds().max(1);
        let body = json!({
            "hash": BASE64.encode(request.payment_hash.as_bytes()),
            "value": request.amount_sats.to_string(),
            "memo": request.description.unwrap_or_default(),
            "expiry": expiry.to_string(),
        });

        let created: AddHoldInvoiceResponse = self.post("/v2/invoices/hodl", body).await?;
        debug!(payment_hash = %request.payment_hash, "LND hold invoice added");
        Ok(CreatedHoldInvoice {
            id: InvoiceId::new(request.payment_hash.to_hex()),
            payment_request: created.payment_request,
        })
    }

    async fn subscribe_invoice_updates(
        &self,
        id: &InvoiceId,
    ) -> Result<InvoiceUpdateStream, GatewayError> {
        let hash = hash_of(id)?;
        let path = format!(
            "/v2/invoices/subscribe/{}",
            BASE64_URL.encode(hash.as_bytes())
        );
        let response = self
            .request(&self.stream_client, Method::GET, &path)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let bytes = Box::pin(response.bytes_stream());
        let updates = stream::unfold(
            (bytes, NdjsonDecoder::default(), false),
            |(mut bytes, mut decoder, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(line) = decoder.next_line() {
                        match decode_update_line(&line) {
                            Some(item) => return Some((item, (bytes, decoder, false))),
                            None => continue,
                        }
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            if let Err(e) = decoder.push(&chunk) {
                                warn!(error = %e, "Dropping invoice subscription");
                                return Some((Err(e), (bytes, decoder, true)));
                            }
                        }
                        Some(Err(e)) => {
                            return Some((Err(transport_error(e)), (bytes, decoder, true)));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(updates.boxed())
    }

    async fn settle_hold_invoice(&self, secret: &Preimage) -> Result<(), GatewayError> {
        let body = json!({ "preimage": BASE64.encode(secret.as_bytes()) });
        let _: serde_json::Value = self.post("/v2/invoices/settle", body).await?;
        Ok(())
    }

    async fn cancel_invoice(&self, id: &InvoiceId) -> Result<(), GatewayError> {
        let hash = hash_of(id)?;
        let body = json!({ "payment_hash": BASE64.encode(hash.as_bytes()) });
        let _: serde_json::Value = self.post("/v2/invoices/cancel", body).await?;
        Ok(())
    }

    async fn get_invoice(&self, id: &InvoiceId) -> Result<NodeInvoice, GatewayError> {
        let hash = hash_of(id)?;
        let invoice: LndInvoice = self.get(&format!("/v1/invoice/{}", hash.to_hex())).await?;
        invoice.into_node_invoice()
    }
}

#[async_trait]
impl WalletGateway for LndRestClient {
    async fn get_info(&self) -> Result<NodeInfo, GatewayError> {
        let info: LndInfo = self.get("/v1/getinfo").await?;
        Ok(NodeInfo {
            alias: info.alias,
            public_key: info.identity_pubkey,
            block_height: info.block_height,
            active_channels: info.num_active_channels,
            peers: info.num_peers,
            synced_to_chain: info.synced_to_chain,
            version: info.version,
        })
    }

    async fn get_balance(&self) -> Result<WalletBalance, GatewayError> {
        let (onchain, channels) = futures::try_join!(
            self.get::<LndChainBalance>("/v1/balance/blockchain"),
            self.get::<LndChannelBalance>("/v1/balance/channels"),
        )?;
        Ok(WalletBalance {
            onchain_confirmed_sats: onchain.confirmed_balance,
            onchain_unconfirmed_sats: onchain.unconfirmed_balance,
            channel_local_sats: channels.local_balance.sat,
            channel_remote_sats: channels.remote_balance.sat,
        })
    }

    async fn create_invoice(
        &self,
        amount_sats: u64,
        description: Option<String>,
    ) -> Result<PlainInvoice, GatewayError> {
        let body = json!({
            "value": amount_sats.to_string(),
            "memo": description.clone().unwrap_or_default(),
        });
        let added: AddInvoiceResponse = self.post("/v1/invoices", body).await?;
        let hash = hash_from_base64(&added.r_hash)?;
        Ok(PlainInvoice {
            id: InvoiceId::new(hash.to_hex()),
            payment_request: added.payment_request,
            amount_sats,
            description,
        })
    }

    async fn list_invoices(&self) -> Result<Vec<NodeInvoice>, GatewayError> {
        let listed: ListInvoicesResponse = self.get("/v1/invoices").await?;
        listed
            .invoices
            .into_iter()
            .map(LndInvoice::into_node_invoice)
            .collect()
    }

    async fn pay(&self, payment_request: &str) -> Result<PaymentOutcome, GatewayError> {
        let body = json!({ "payment_request": payment_request });
        let sent: SendPaymentResponse = self.post("/v1/channels/transactions", body).await?;
        if !sent.payment_error.is_empty() {
            return Err(classify_node_error(StatusCode::OK, &sent.payment_error));
        }

        let preimage = bytes32(&sent.payment_preimage)?.map(Preimage::from_bytes);
        let payment_hash = match bytes32(&sent.payment_hash)? {
            Some(bytes) => PaymentHash::from_bytes(bytes),
            None => preimage
                .as_ref()
                .map(Preimage::payment_hash)
                .ok_or_else(|| GatewayError::Node("payment response without hash".into()))?,
        };
        let route = sent.payment_route.unwrap_or_default();
        Ok(PaymentOutcome {
            payment_hash,
            amount_sats: route.total_amt.saturating_sub(route.total_fees),
            fee_sats: route.total_fees,
            is_confirmed: preimage.is_some(),
            preimage,
        })
    }
}

/// Map a failed LND call onto the gateway error taxonomy
pub fn classify_node_error(status: StatusCode, message: &str) -> GatewayError {
    let lower = message.to_ascii_lowercase();
    let reason = message.to_string();

    if lower.contains("already settled") {
        GatewayError::AlreadySettled
    } else if lower.contains("already canceled") || lower.contains("already cancelled") {
        GatewayError::AlreadyTerminal(reason)
    } else if lower.contains("unable to locate invoice")
        || lower.contains("invoice still open")
        || lower.contains("there are no existing invoices")
        || status == StatusCode::NOT_FOUND
    {
        GatewayError::NotFound(reason)
    } else if lower.contains("server is still in the process of starting")
        || lower.contains("wallet locked")
        || lower.contains("not yet ready")
        || status == StatusCode::SERVICE_UNAVAILABLE
    {
        GatewayError::NodeUnavailable(reason)
    } else if lower.contains("preimage does not match") || lower.contains("invalid preimage") {
        GatewayError::SecretMismatch
    } else if status == StatusCode::BAD_REQUEST {
        GatewayError::InvalidParameters(reason)
    } else {
        GatewayError::Node(reason)
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() || err.is_timeout() {
        GatewayError::NodeUnavailable(err.to_string())
    } else {
        GatewayError::Node(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<LndErrorBody>(&body)
        .ok()
        .and_then(LndErrorBody::message)
        .unwrap_or(body);
    warn!(status = %status, error = %message, "LND request failed");
    Err(classify_node_error(status, &message))
}

fn hash_of(id: &InvoiceId) -> Result<PaymentHash, GatewayError> {
    PaymentHash::from_hex(id.as_str())
        .map_err(|e| GatewayError::InvalidParameters(format!("invoice id is not a payment hash: {e}")))
}

fn hash_from_base64(value: &str) -> Result<PaymentHash, GatewayError> {
    bytes32(value)?
        .map(PaymentHash::from_bytes)
        .ok_or_else(|| GatewayError::Node("invoice without payment hash".into()))
}

/// Decode an optional base64 field that must hold 32 bytes
fn bytes32(value: &str) -> Result<Option<[u8; SECRET_LEN]>, GatewayError> {
    if value.is_empty() {
        return Ok(None);
    }
    let bytes = BASE64
        .decode(value)
        .or_else(|_| BASE64_URL.decode(value))
        .map_err(|e| GatewayError::Node(format!("bad base64 from LND: {e}")))?;
    <[u8; SECRET_LEN]>::try_from(bytes.as_slice())
        .map(Some)
        .map_err(|_| GatewayError::Node(format!("expected 32 bytes, got {}", bytes.len())))
}

/// Splits a chunked body into newline-terminated lines
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    /// Buffer a chunk; fails once an unterminated frame outgrows the limit
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), GatewayError> {
        self.buffer.extend_from_slice(chunk);
        let pending = match self.buffer.iter().rposition(|b| *b == b'\n') {
            Some(end) => self.buffer.len() - end - 1,
            None => self.buffer.len(),
        };
        if pending > MAX_FRAME_LEN {
            self.buffer.clear();
            return Err(GatewayError::Node("subscription frame too large".into()));
        }
        Ok(())
    }

    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// Decode one line of the subscription stream; blank lines yield `None`
pub fn decode_update_line(line: &str) -> Option<Result<InvoiceUpdate, GatewayError>> {
    if line.trim().is_empty() {
        return None;
    }
    let frame: StreamFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            return Some(Err(GatewayError::Node(format!(
                "malformed subscription frame: {e}"
            ))))
        }
    };
    match (frame.result, frame.error) {
        (Some(invoice), _) => Some(Ok(invoice.update())),
        (None, Some(error)) => {
            let message = error.message().unwrap_or_default();
            Some(Err(classify_node_error(StatusCode::OK, &message)))
        }
        (None, None) => None,
    }
}

// LND wire types

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num {
        Int(u64),
        Text(String),
    }
    match Num::deserialize(deserializer)? {
        Num::Int(n) => Ok(n),
        Num::Text(s) if s.is_empty() => Ok(0),
        Num::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
struct LndErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl LndErrorBody {
    fn message(self) -> Option<String> {
        self.message.or(self.error).filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    result: Option<LndInvoice>,
    #[serde(default)]
    error: Option<LndErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AddHoldInvoiceResponse {
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct ListInvoicesResponse {
    #[serde(default)]
    invoices: Vec<LndInvoice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum LndInvoiceState {
    #[default]
    Open,
    Settled,
    Canceled,
    Accepted,
}

#[derive(Debug, Default, Deserialize)]
struct LndInvoice {
    #[serde(default)]
    memo: String,
    #[serde(default)]
    r_hash: String,
    #[serde(default, deserialize_with = "de_u64")]
    value: u64,
    #[serde(default)]
    settled: bool,
    #[serde(default, deserialize_with = "de_u64")]
    creation_date: u64,
    #[serde(default, deserialize_with = "de_u64")]
    expiry: u64,
    #[serde(default)]
    payment_request: String,
    #[serde(default)]
    state: LndInvoiceState,
}

impl LndInvoice {
    fn update(&self) -> InvoiceUpdate {
        InvoiceUpdate {
            is_held: matches!(self.state, LndInvoiceState::Accepted),
            is_confirmed: self.settled || matches!(self.state, LndInvoiceState::Settled),
            is_canceled: matches!(self.state, LndInvoiceState::Canceled),
        }
    }

    fn into_node_invoice(self) -> Result<NodeInvoice, GatewayError> {
        let hash = hash_from_base64(&self.r_hash)?;
        let update = self.update();
        let created_at = i64::try_from(self.creation_date)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        let expires_at = created_at.and_then(|created| {
            i64::try_from(self.expiry)
                .ok()
                .filter(|secs| *secs > 0)
                .and_then(chrono::Duration::try_seconds)
                .and_then(|ttl| created.checked_add_signed(ttl))
        });

        Ok(NodeInvoice {
            id: InvoiceId::new(hash.to_hex()),
            payment_hash: Some(hash),
            amount_sats: self.value,
            description: Some(self.memo).filter(|m| !m.is_empty()),
            payment_request: Some(self.payment_request).filter(|p| !p.is_empty()),
            is_held: update.is_held,
            is_confirmed: update.is_confirmed,
            is_canceled: update.is_canceled,
            created_at,
            expires_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LndInfo {
    #[serde(default)]
    alias: String,
    #[serde(default)]
    identity_pubkey: String,
    #[serde(default)]
    block_height: u64,
    #[serde(default)]
    num_active_channels: u64,
    #[serde(default)]
    num_peers: u64,
    #[serde(default)]
    synced_to_chain: bool,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct LndChainBalance {
    #[serde(default, deserialize_with = "de_u64")]
    confirmed_balance: u64,
    #[serde(default, deserialize_with = "de_u64")]
    unconfirmed_balance: u64,
}

#[derive(Debug, Default, Deserialize)]
struct LndAmount {
    #[serde(default, deserialize_with = "de_u64")]
    sat: u64,
}

#[derive(Debug, Deserialize)]
struct LndChannelBalance {
    #[serde(default)]
    local_balance: LndAmount,
    #[serde(default)]
    remote_balance: LndAmount,
}

#[derive(Debug, Default, Deserialize)]
struct LndRoute {
    #[serde(default, deserialize_with = "de_u64")]
    total_fees: u64,
    #[serde(default, deserialize_with = "de_u64")]
    total_amt: u64,
}

#[derive(Debug, Deserialize)]
struct SendPaymentResponse {
    #[serde(default)]
    payment_error: String,
    #[serde(default)]
    payment_preimage: String,
    #[serde(default)]
    payment_hash: String,
    #[serde(default)]
    payment_route: Option<LndRoute>,
}
