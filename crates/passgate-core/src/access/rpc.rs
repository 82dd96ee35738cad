//! ============================================================================
//! JSON-RPC Chain Client - `ChainQuery` over an Ethereum RPC endpoint
//! ============================================================================
//! Every call carries the client timeout. Quantities are hex strings; an RPC
//! `error` object or unparsable result is a hard error.
//! ============================================================================

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::chain::{ChainQuery, TxReceipt};
use crate::error::{ExternalServiceKind, GateError, GateResult};
use crate::types::Address;

const SERVICE: &str = "chain RPC";

/// ERC-721 `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    from: String,
    #[serde(default)]
    to: Option<String>,
    value: String,
    #[serde(default)]
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcReceipt {
    #[serde(default)]
    status: Option<String>,
}

/// Ethereum JSON-RPC client
pub struct RpcChainClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> GateResult<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("RPC {} (id {})", method, id);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GateError::from_transport(SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GateError::external(
                SERVICE,
                ExternalServiceKind::Status(status.as_u16()),
                body,
            ));
        }

        let rpc: RpcResponse = response.json().await.map_err(|e| {
            GateError::external(SERVICE, ExternalServiceKind::Malformed, e.to_string())
        })?;

        if let Some(err) = rpc.error {
            return Err(GateError::external(
                SERVICE,
                ExternalServiceKind::Rejected,
                format!("{} failed ({}): {}", method, err.code, err.message),
            ));
        }

        match rpc.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                GateError::external(
                    SERVICE,
                    ExternalServiceKind::Malformed,
                    format!("{} result: {}", method, e),
                )
            }),
        }
    }

    async fn call_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> GateResult<T> {
        self.call(method, params).await?.ok_or_else(|| {
            GateError::external(
                SERVICE,
                ExternalServiceKind::Malformed,
                format!("{} returned null", method),
            )
        })
    }

    async fn quantity(&self, method: &str, params: Value) -> GateResult<u128> {
        let hex: String = self.call_required(method, params).await?;
        parse_quantity(&hex)
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(hex: &str) -> GateResult<u128> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|_| {
        GateError::external(
            SERVICE,
            ExternalServiceKind::Malformed,
            format!("invalid quantity '{}'", hex),
        )
    })
}

/// Parse a 32-byte ABI word as an unsigned integer
fn parse_word(hex: &str) -> GateResult<u128> {
    let digits = hex.trim_start_matches("0x");
    let trimmed = digits.trim_start_matches('0');
    if trimmed.len() > 32 {
        return Err(GateError::external(
            SERVICE,
            ExternalServiceKind::Malformed,
            "word does not fit in 128 bits",
        ));
    }
    parse_quantity(trimmed)
}

fn u64_from(value: u128, what: &str) -> GateResult<u64> {
    u64::try_from(value).map_err(|_| {
        GateError::external(
            SERVICE,
            ExternalServiceKind::Malformed,
            format!("{} out of range: {}", what, value),
        )
    })
}

#[async_trait]
impl ChainQuery for RpcChainClient {
    async fn chain_id(&self) -> GateResult<u64> {
        let id = self.quantity("eth_chainId", json!([])).await?;
        u64_from(id, "chain id")
    }

    async fn block_number(&self) -> GateResult<u64> {
        let block = self.quantity("eth_blockNumber", json!([])).await?;
        u64_from(block, "block number")
    }

    async fn native_balance(&self, address: &Address) -> GateResult<u128> {
        self.quantity("eth_getBalance", json!([address.to_string(), "latest"]))
            .await
    }

    async fn code_at(&self, address: &Address) -> GateResult<Vec<u8>> {
        let code: String = self
            .call_required("eth_getCode", json!([address.to_string(), "latest"]))
            .await?;
        hex::decode(code.trim_start_matches("0x")).map_err(|e| {
            GateError::external(SERVICE, ExternalServiceKind::Malformed, e.to_string())
        })
    }

    async fn pass_balance(&self, contract: &Address, owner: &Address) -> GateResult<u64> {
        let data = format!(
            "0x{}{:0>64}",
            BALANCE_OF_SELECTOR,
            hex::encode(owner.as_bytes())
        );
        let word: String = self
            .call_required(
                "eth_call",
                json!([{"to": contract.to_string(), "data": data}, "latest"]),
            )
            .await?;
        let balance = parse_word(&word)?;
        u64_from(balance, "pass balance")
    }

    async fn transaction(&self, tx_hash: &str) -> GateResult<Option<TxReceipt>> {
        let Some(tx) = self
            .call::<RpcTransaction>("eth_getTransactionByHash", json!([tx_hash]))
            .await?
        else {
            return Ok(None);
        };

        let block_number = tx
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .map(|b| u64_from(b, "block number"))
            .transpose()?;

        let success = if block_number.is_some() {
            self.call::<RpcReceipt>("eth_getTransactionReceipt", json!([tx_hash]))
                .await?
                .and_then(|r| r.status)
                .map(|s| s == "0x1")
        } else {
            None
        };

        Ok(Some(TxReceipt {
            hash: tx.hash,
            from: Address::parse(&tx.from)?,
            to: tx.to.as_deref().map(Address::parse).transpose()?,
            value_wei: parse_quantity(&tx.value)?,
            block_number,
            success,
        }))
    }
}
