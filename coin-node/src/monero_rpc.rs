use std::time::Duration;

use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::CoinNodeError;
use crate::types::{NewAddress, Receipt, SendResult, ATOMIC_UNITS_PER_XMR};

/// A thin client over `monero-wallet-rpc`'s JSON-RPC interface.
#[derive(Clone)]
pub struct MoneroRpcClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct CreateAddressResult {
    address: String,
    address_index: u32,
}

#[derive(Deserialize)]
struct TransferResult {
    tx_hash: String,
}

#[derive(Deserialize)]
struct SubaddrIndex {
    minor: u32,
}

#[derive(Deserialize)]
struct IncomingTransferEntry {
    txid: String,
    amount: i128,
    confirmations: u32,
    subaddr_index: SubaddrIndex,
    timestamp: i64,
}

#[derive(Deserialize)]
struct GetTransfersResult {
    #[serde(rename = "in", default)]
    incoming: Vec<IncomingTransferEntry>,
}

impl MoneroRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with static config");
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, CoinNodeError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: "exchange",
            method,
            params,
        };

        debug!(method, "sending monero rpc request");

        let response = self
            .client
            .post(format!("{}/json_rpc", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoinNodeError::Timeout(Duration::from_secs(10))
                } else {
                    CoinNodeError::Transport(e)
                }
            })?;

        let parsed: RpcResponse<T> = response.json().await.map_err(CoinNodeError::Transport)?;

        if let Some(err) = parsed.error {
            return Err(CoinNodeError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        parsed
            .result
            .ok_or(CoinNodeError::MalformedResponse("result"))
    }

    /// Decimal XMR amount to integer piconero.
    pub fn to_atomic(amount: Decimal) -> i128 {
        (amount * Decimal::from(ATOMIC_UNITS_PER_XMR))
            .trunc()
            .try_into()
            .unwrap_or(0)
    }

    /// Integer piconero to decimal XMR, quantized to 8 fractional digits.
    pub fn from_atomic(atomic: i128) -> Decimal {
        let mut amount = Decimal::from_i128_with_scale(atomic, 12);
        amount.rescale(8);
        amount
    }

    pub async fn create_subaddress(&self, label: &str) -> Result<NewAddress, CoinNodeError> {
        let result: CreateAddressResult = self
            .call(
                "create_address",
                json!({ "account_index": 0, "label": label }),
            )
            .await?;

        Ok(NewAddress {
            address: result.address,
            subaddress_index: Some(result.address_index),
        })
    }

    /// `amount` is the decimal XMR value; converted to atomic units here so
    /// the atomic representation never leaks past this adapter boundary.
    pub async fn send(&self, address: &str, amount: Decimal) -> Result<SendResult, CoinNodeError> {
        let atomic = Self::to_atomic(amount);
        let result: TransferResult = self
            .call(
                "transfer",
                json!({
                    "destinations": [{ "amount": atomic, "address": address }],
                    "account_index": 0,
                    "priority": 1,
                }),
            )
            .await?;
        Ok(SendResult {
            txid: result.tx_hash,
        })
    }

    pub async fn list_incoming_transfers(&self) -> Result<Vec<Receipt>, CoinNodeError> {
        let result: GetTransfersResult = self
            .call(
                "get_transfers",
                json!({ "in": true, "account_index": 0 }),
            )
            .await?;

        Ok(result
            .incoming
            .into_iter()
            .map(|e| Receipt {
                txid: e.txid,
                amount: Self::from_atomic(e.amount),
                confirmations: e.confirmations,
                address: None,
                subaddress_index: Some(e.subaddr_index.minor),
                block_hash: None,
                timestamp: chrono::DateTime::from_timestamp(e.timestamp, 0)
                    .unwrap_or_else(chrono::Utc::now),
            })
            .collect())
    }

    pub async fn block_height(&self) -> Result<u64, CoinNodeError> {
        #[derive(Deserialize)]
        struct Height {
            height: u64,
        }
        let result: Height = self.call("get_height", json!({})).await?;
        Ok(result.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn create_subaddress_parses_result() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/json_rpc")
            .with_status(200)
            .with_body(r#"{"result":{"address":"4Axampleaddr","address_index":3},"error":null,"id":"exchange"}"#)
            .create_async()
            .await;

        let client = MoneroRpcClient::new(server.url());
        let address = client.create_subaddress("user-1").await.unwrap();
        assert_eq!(address.address, "4Axampleaddr");
        assert_eq!(address.subaddress_index, Some(3));
    }

    #[tokio::test]
    async fn send_converts_decimal_to_atomic_units() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/json_rpc")
            .with_status(200)
            .with_body(r#"{"result":{"tx_hash":"abc123"},"error":null,"id":"exchange"}"#)
            .create_async()
            .await;

        let client = MoneroRpcClient::new(server.url());
        let result = client.send("4Adestination", dec!(1.5)).await.unwrap();
        assert_eq!(result.txid, "abc123");
    }

    #[tokio::test]
    async fn list_incoming_transfers_converts_atomic_to_decimal() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/json_rpc")
            .with_status(200)
            .with_body(
                r#"{
                    "result": {
                        "in": [
                            {"txid":"tx1","amount":1500000000000,"confirmations":10,"subaddr_index":{"minor":2},"timestamp":1700000000}
                        ]
                    },
                    "error": null,
                    "id": "exchange"
                }"#,
            )
            .create_async()
            .await;

        let client = MoneroRpcClient::new(server.url());
        let receipts = client.list_incoming_transfers().await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].amount, dec!(1.5));
        assert_eq!(receipts[0].subaddress_index, Some(2));
    }
}
