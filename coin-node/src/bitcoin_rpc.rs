use std::time::Duration;

use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::CoinNodeError;
use crate::types::{NewAddress, Receipt, SendResult};

/// A thin client over a Bitcoin-family full node's JSON-RPC interface
/// (`bitcoind`, and its descendants that keep the same wire format).
#[derive(Clone)]
pub struct BitcoinRpcClient {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
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
struct ListTransactionsEntry {
    address: Option<String>,
    category: String,
    amount: Decimal,
    confirmations: i64,
    blockhash: Option<String>,
    txid: String,
    time: i64,
}

impl BitcoinRpcClient {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            url: url.into(),
            user: user.into(),
            password: password.into(),
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
            jsonrpc: "1.0",
            id: "exchange",
            method,
            params,
        };

        debug!(method, "sending bitcoin-family rpc request");

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
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

    pub async fn new_receive_address(&self) -> Result<NewAddress, CoinNodeError> {
        let address: String = self.call("getnewaddress", json!([])).await?;
        Ok(NewAddress {
            address,
            subaddress_index: None,
        })
    }

    /// `amount` must already be quantized to 8 fractional digits.
    pub async fn send(&self, address: &str, amount: Decimal) -> Result<SendResult, CoinNodeError> {
        let txid: String = self
            .call("sendtoaddress", json!([address, amount.to_string()]))
            .await?;
        Ok(SendResult { txid })
    }

    /// `since_blockhash` is the cursor from the last pass, if any.
    pub async fn list_recent_receipts(
        &self,
        since_blockhash: Option<&str>,
    ) -> Result<Vec<Receipt>, CoinNodeError> {
        let entries: Vec<ListTransactionsEntry> = self
            .call(
                "listtransactions",
                json!(["*", 1000, 0, true, since_blockhash]),
            )
            .await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.category == "receive")
            .map(|e| Receipt {
                txid: e.txid,
                amount: e.amount,
                confirmations: e.confirmations.max(0) as u32,
                address: e.address,
                subaddress_index: None,
                block_hash: e.blockhash,
                timestamp: chrono::DateTime::from_timestamp(e.time, 0)
                    .unwrap_or_else(chrono::Utc::now),
            })
            .collect())
    }

    pub async fn block_height(&self) -> Result<u64, CoinNodeError> {
        self.call("getblockcount", json!([])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn new_receive_address_parses_result() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(
                r#"{"method":"getnewaddress"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"result":"bc1qexampleaddress","error":null,"id":"exchange"}"#)
            .create_async()
            .await;

        let client = BitcoinRpcClient::new(server.url(), "user", "pass");
        let address = client.new_receive_address().await.unwrap();
        assert_eq!(address.address, "bc1qexampleaddress");
    }

    #[tokio::test]
    async fn rpc_error_response_surfaces_as_rpc_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"result":null,"error":{"code":-5,"message":"Invalid address"},"id":"exchange"}"#,
            )
            .create_async()
            .await;

        let client = BitcoinRpcClient::new(server.url(), "user", "pass");
        let result = client.send("invalid", dec!(0.1)).await;
        assert!(matches!(result, Err(CoinNodeError::Rpc { code: -5, .. })));
    }

    #[tokio::test]
    async fn list_recent_receipts_filters_to_incoming_only() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{
                    "result": [
                        {"address":"bc1qexample","category":"receive","amount":0.5,"confirmations":6,"blockhash":"abc","txid":"tx1","time":1700000000},
                        {"address":"bc1qexample","category":"send","amount":0.1,"confirmations":6,"blockhash":"abc","txid":"tx2","time":1700000001}
                    ],
                    "error": null,
                    "id": "exchange"
                }"#,
            )
            .create_async()
            .await;

        let client = BitcoinRpcClient::new(server.url(), "user", "pass");
        let receipts = client.list_recent_receipts(None).await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].txid, "tx1");
    }
}
