//! Solana JSON-RPC client for the payment engine.

use super::types::{
    Commitment, SendOptions, SignatureInfo, SignatureStatus, SimulateOptions, SimulationResult,
    TransactionRecord, UiTokenAmount,
};
use super::LedgerRpc;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// `{ "context": .., "value": .. }` envelope used by several methods.
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

/// [`LedgerRpc`] over HTTP JSON-RPC.
pub struct JsonRpcLedger {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    /// Create a client for the given endpoint.
    ///
    /// Every call is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("rpc {} (id={})", method, id);

        let exchange = async {
            self.client
                .post(&self.url)
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<RpcResponse>()
                .await
        };

        let response = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("rpc {} transport error: {}", method, e);
                return Err(Error::Network(format!("{method} failed: {e}")));
            }
            Err(_) => {
                warn!("rpc {} timed out after {:?}", method, self.timeout);
                return Err(Error::Timeout(method.to_string()));
            }
        };

        if let Some(error) = response.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcLedger {
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        self.call(
            "getSignaturesForAddress",
            json!([address, { "limit": limit, "commitment": Commitment::Confirmed.as_str() }]),
        )
        .await
    }

    async fn get_transaction(
        &self,
        signature: &str,
        commitment: Commitment,
    ) -> Result<Option<TransactionRecord>> {
        self.call(
            "getTransaction",
            json!([signature, {
                "encoding": "jsonParsed",
                "commitment": commitment.as_str(),
                "maxSupportedTransactionVersion": 0,
            }]),
        )
        .await
    }

    async fn simulate_transaction(
        &self,
        transaction: &str,
        options: SimulateOptions,
    ) -> Result<SimulationResult> {
        let result: WithContext<SimulationResult> = self
            .call(
                "simulateTransaction",
                json!([transaction, {
                    "encoding": "base64",
                    "sigVerify": options.sig_verify,
                    "commitment": options.commitment.as_str(),
                    "innerInstructions": true,
                }]),
            )
            .await?;
        Ok(result.value)
    }

    async fn send_transaction(&self, transaction: &str, options: SendOptions) -> Result<Value> {
        self.call(
            "sendTransaction",
            json!([transaction, {
                "encoding": "base64",
                "skipPreflight": options.skip_preflight,
                "preflightCommitment": options.preflight_commitment.as_str(),
            }]),
        )
        .await
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> Result<Vec<Option<SignatureStatus>>> {
        let result: WithContext<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([signatures, { "searchTransactionHistory": true }]),
            )
            .await?;
        Ok(result.value)
    }

    async fn get_token_supply(&self, mint: &str) -> Result<UiTokenAmount> {
        let result: WithContext<UiTokenAmount> = self
            .call(
                "getTokenSupply",
                json!([mint, { "commitment": Commitment::Confirmed.as_str() }]),
            )
            .await?;
        Ok(result.value)
    }
}
