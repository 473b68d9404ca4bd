//! Ethereum JSON-RPC client.
//!
//! ## Resilience
//!
//! * Reads (`eth_call`, receipts, chain id) retry transient network errors,
//!   HTTP 429 and 5xx responses with exponential back-off, up to
//!   [`MAX_BACKOFF_SECS`] seconds between attempts and [`MAX_READ_ATTEMPTS`]
//!   attempts in total.
//! * Writes (`eth_sendTransaction`) are sent exactly once.
//! * JSON-RPC error objects are returned as-is; a revert is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dealblock_lifecycle::Address;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::abi::{from_hex, to_hex};
use crate::errors::{GatewayError, Result};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
pub const MAX_READ_ATTEMPTS: u32 = 5;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    /// Revert payload, whether the node sends it as a string or nested
    /// under `data.data`.
    pub fn revert_data(&self) -> Option<String> {
        match self.data.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("data").and_then(Value::as_str).map(String::from),
            _ => None,
        }
    }
}

impl From<RpcError> for GatewayError {
    fn from(err: RpcError) -> Self {
        let data = err.revert_data();
        GatewayError::from_rpc(err.code, err.message, data)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    /// `0x1` on success, `0x0` on revert.
    pub status: Option<String>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some("0x1")
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct RpcClient {
    client: Client,
    rpc_url: String,
    wallet_rpc_url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(client: Client, rpc_url: String, wallet_rpc_url: String) -> Self {
        RpcClient {
            client,
            rpc_url,
            wallet_rpc_url,
            next_id: AtomicU64::new(1),
        }
    }

    /// `eth_call` against the latest block. Returns the raw return data.
    pub async fn call(&self, from: Option<Address>, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let mut tx = json!({ "to": to.to_string(), "data": to_hex(data) });
        if let Some(from) = from {
            tx["from"] = json!(from.to_string());
        }
        let result = self.read("eth_call", json!([tx, "latest"])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| GatewayError::Abi(format!("eth_call returned {result}")))?;
        from_hex(raw)
    }

    /// Submit through the wallet endpoint. Returns the transaction hash.
    pub async fn send_transaction(&self, from: Address, to: Address, data: &[u8]) -> Result<String> {
        let tx = json!({
            "from": from.to_string(),
            "to": to.to_string(),
            "data": to_hex(data),
        });
        let result = self
            .request(&self.wallet_rpc_url, "eth_sendTransaction", json!([tx]))
            .await?;
        result
            .as_str()
            .map(String::from)
            .ok_or_else(|| GatewayError::Abi(format!("eth_sendTransaction returned {result}")))
    }

    /// `None` while the transaction is pending.
    pub async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let result = self
            .read("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let result = self.read("eth_chainId", json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| GatewayError::Abi(format!("eth_chainId returned {result}")))?;
        parse_quantity(raw)
    }

    async fn read(&self, method: &str, params: Value) -> Result<Value> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;

        loop {
            match self.request(&self.rpc_url, method, params.clone()).await {
                Err(e) if is_transient(&e) && attempt < MAX_READ_ATTEMPTS => {
                    warn!("{method} failed (attempt {attempt}, will retry in {backoff}s): {e}");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn request(&self, url: &str, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(url)
            .json(&request_body(id, method, params))
            .send()
            .await?
            .error_for_status()?;

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            debug!("{method} returned error {}: {}", err.code, err.message);
            return Err(err.into());
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

pub fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

fn is_transient(err: &GatewayError) -> bool {
    match err {
        GatewayError::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.is_request()
                || e.status().is_some_and(|s| {
                    s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                })
        }
        _ => false,
    }
}

/// Parse a hex `QUANTITY` such as `0xaa36a7`.
pub fn parse_quantity(raw: &str) -> Result<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| GatewayError::Abi(format!("invalid quantity {raw:?}: {e}")))
}
