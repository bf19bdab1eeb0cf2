//! JSON-RPC implementation of [`ChainClient`].

use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::{
    client::{ChainClient, PendingDeployment, TxReceipt, TxRequest, TxStatus},
    error::ChainError,
    signer::{LegacyTransaction, Signing},
};

/// Default timeout for a single RPC request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts for read-only requests that fail at the transport level.
const READ_RETRY_ATTEMPTS: usize = 3;

/// Method prefix of the node's JSON-RPC API.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RpcNamespace {
    #[default]
    Eth,
    Quai,
}

impl RpcNamespace {
    /// Fully-qualified method name, e.g. `quai_getTransactionReceipt`.
    pub fn method(&self, name: &str) -> String {
        format!("{self}_{name}")
    }
}

/// Connection settings for [`RpcChainClient`].
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub url: Url,
    /// Checked against the node on connect and signed into every transaction.
    pub chain_id: u64,
    pub namespace: RpcNamespace,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

/// Raw receipt as returned by `*_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    status: Option<U64>,
}

impl From<RpcReceipt> for TxReceipt {
    fn from(raw: RpcReceipt) -> Self {
        // Receipts without a status field predate status codes and mean success.
        let status = match raw.status {
            Some(status) if status.is_zero() => TxStatus::Reverted,
            _ => TxStatus::Confirmed,
        };
        Self {
            transaction_hash: raw.transaction_hash,
            contract_address: raw.contract_address,
            block_number: raw.block_number.map(|n| n.to::<u64>()),
            status,
        }
    }
}

/// Fields of a transaction before it is signed.
struct UnsignedTx {
    to: Option<Address>,
    data: Bytes,
    value: U256,
    gas_limit: Option<u64>,
}

/// Chain client speaking JSON-RPC over HTTP.
///
/// With [`Signing::Local`] transactions are signed here and sent raw; with
/// [`Signing::Node`] they go through the node's `*_sendTransaction`. Either way
/// the nonce is taken under `submit_lock` so concurrent callers cannot
/// interleave submissions.
pub struct RpcChainClient {
    http: reqwest::Client,
    config: RpcClientConfig,
    signing: Signing,
    submit_lock: Mutex<()>,
}

impl RpcChainClient {
    /// Connect to `config.url` and check that the node serves
    /// `config.chain_id`.
    pub async fn connect(config: RpcClientConfig, signing: Signing) -> anyhow::Result<Self> {
        if config.namespace == RpcNamespace::Quai && matches!(signing, Signing::Local(_)) {
            anyhow::bail!(
                "quai nodes do not accept EIP-155 transactions; use signing = \"node\" for {}",
                config.url
            );
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let client = Self {
            http,
            config,
            signing,
            submit_lock: Mutex::new(()),
        };

        let chain_id: U64 = client
            .read("chainId", Vec::new())
            .await
            .with_context(|| format!("Failed to query the chain id of {}", client.config.url))?;
        if chain_id.to::<u64>() != client.config.chain_id {
            anyhow::bail!(
                "{} serves chain id {chain_id}, the network is configured with {}",
                client.config.url,
                client.config.chain_id
            );
        }

        tracing::debug!(
            url = %client.config.url,
            namespace = %client.config.namespace,
            chain_id = client.config.chain_id,
            sender = %client.sender(),
            local_signing = matches!(client.signing, Signing::Local(_)),
            "Chain client connected"
        );

        Ok(client)
    }

    /// Make a JSON-RPC call and deserialize the result.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ChainError> {
        let method = self.config.namespace.method(method);
        let response = self
            .http
            .post(self.config.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .with_context(|| format!("Failed to send {method} request"))
            .map_err(ChainError::Transport)?;

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {method} response"))
            .map_err(ChainError::Transport)?;

        if let Some(error) = body.get("error") {
            return Err(ChainError::Rpc {
                method,
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        let result = body.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| ChainError::Decode {
            what: format!("{method} result"),
            message: e.to_string(),
        })
    }

    /// Read-only request, retried with back-off on transport failures.
    async fn read<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ChainError> {
        (|| self.request(method, params.clone()))
            .retry(ExponentialBuilder::default().with_max_times(READ_RETRY_ATTEMPTS))
            .when(|e| matches!(e, ChainError::Transport(_)))
            .notify(|e, after| {
                tracing::debug!(error = %e, method, retry_in = ?after, "Read-only RPC failed, retrying");
            })
            .await
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        let nonce: U64 = self
            .read(
                "getTransactionCount",
                vec![serde_json::json!(self.sender()), serde_json::json!("pending")],
            )
            .await?;
        Ok(nonce.to::<u64>())
    }

    /// Transaction object in the shape `*_sendTransaction` and
    /// `*_estimateGas` take.
    fn tx_object(&self, tx: &UnsignedTx, nonce: Option<u64>) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("from".to_string(), serde_json::json!(self.sender()));
        if let Some(to) = tx.to {
            object.insert("to".to_string(), serde_json::json!(to));
        }
        object.insert("data".to_string(), serde_json::json!(tx.data));
        object.insert("value".to_string(), serde_json::json!(tx.value));
        if let Some(nonce) = nonce {
            object.insert("nonce".to_string(), serde_json::json!(U64::from(nonce)));
        }
        if let Some(gas) = tx.gas_limit {
            object.insert("gas".to_string(), serde_json::json!(U64::from(gas)));
        }
        Value::Object(object)
    }

    /// Submit `tx` at `nonce`. Must be called with `submit_lock` held.
    async fn submit(&self, tx: UnsignedTx, nonce: u64) -> Result<B256, ChainError> {
        let signer = match &self.signing {
            Signing::Node(_) => {
                return self
                    .request("sendTransaction", vec![self.tx_object(&tx, Some(nonce))])
                    .await;
            }
            Signing::Local(signer) => signer,
        };

        let gas_price: U256 = self.read("gasPrice", Vec::new()).await?;
        let gas_limit = match tx.gas_limit {
            Some(gas) => gas,
            None => {
                let estimate: U64 = self
                    .read("estimateGas", vec![self.tx_object(&tx, None)])
                    .await?;
                estimate.to::<u64>()
            }
        };

        let raw = signer.sign(&LegacyTransaction {
            chain_id: self.config.chain_id,
            nonce,
            gas_price,
            gas_limit,
            to: tx.to,
            value: tx.value,
            data: tx.data,
        })?;
        tracing::trace!(nonce, gas_limit, %gas_price, "Sending signed transaction");
        self.request("sendRawTransaction", vec![serde_json::json!(raw)])
            .await
    }
}

impl ChainClient for RpcChainClient {
    fn sender(&self) -> Address {
        self.signing.sender()
    }

    async fn deploy(
        &self,
        init_code: Bytes,
        gas_limit: Option<u64>,
    ) -> Result<PendingDeployment, ChainError> {
        let _guard = self.submit_lock.lock().await;

        let nonce = self.pending_nonce().await?;
        let tx = UnsignedTx {
            to: None,
            data: init_code,
            value: U256::ZERO,
            gas_limit,
        };

        let tx_hash = self.submit(tx, nonce).await?;
        Ok(PendingDeployment {
            tx_hash,
            predicted_address: Some(self.sender().create(nonce)),
        })
    }

    async fn send(&self, request: TxRequest) -> Result<B256, ChainError> {
        let _guard = self.submit_lock.lock().await;

        let nonce = self.pending_nonce().await?;
        let tx = UnsignedTx {
            to: Some(request.to),
            data: request.data,
            value: request.value,
            gas_limit: request.gas_limit,
        };

        self.submit(tx, nonce).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.read(
            "call",
            vec![
                serde_json::json!({ "from": self.sender(), "to": to, "data": data }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainError> {
        self.read(
            "getBalance",
            vec![serde_json::json!(account), serde_json::json!("latest")],
        )
        .await
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let raw: Option<RpcReceipt> = self
            .read("getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await?;
        Ok(raw.map(TxReceipt::from))
    }

    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, ChainError> {
        let tx: Option<Value> = self
            .read("getTransactionByHash", vec![serde_json::json!(tx_hash)])
            .await?;
        Ok(tx.is_some())
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, ChainError> {
        let start = Instant::now();

        loop {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                tracing::debug!(
                    %tx_hash,
                    status = %receipt.status,
                    block_number = ?receipt.block_number,
                    "Transaction mined"
                );
                return Ok(receipt);
            }

            if start.elapsed() > self.config.confirmation_timeout {
                return Err(ChainError::ConfirmationTimeout {
                    tx_hash,
                    waited_secs: start.elapsed().as_secs(),
                });
            }

            tracing::trace!(%tx_hash, "Transaction pending, polling again...");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
