//! Chain client abstraction consumed by every deployment step and bootstrap
//! state.
//!
//! Transaction submission and inclusion are opaque: the only outcomes this
//! crate reasons about are pending, confirmed, reverted and unknown to the
//! node.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};

use crate::error::ChainError;

/// A state-changing call to an existing contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

/// A submitted contract creation awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDeployment {
    pub tx_hash: B256,
    /// Address derived from the sender nonce at submission time. Chains that
    /// grind addresses into a shard range may place the contract elsewhere, so
    /// the receipt's address always wins.
    pub predicted_address: Option<Address>,
}

/// Execution status of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TxStatus {
    Confirmed,
    Reverted,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
    pub status: TxStatus,
}

/// Observable outcome of a transaction, as seen when re-querying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Known to the node but not mined yet.
    Pending,
    /// The node has never seen it, or dropped it from its pool.
    Unknown,
    Confirmed(TxReceipt),
    Reverted(TxReceipt),
}

impl TxOutcome {
    pub fn from_receipt(receipt: TxReceipt) -> Self {
        match receipt.status {
            TxStatus::Confirmed => Self::Confirmed(receipt),
            TxStatus::Reverted => Self::Reverted(receipt),
        }
    }
}

/// Re-query a transaction submitted earlier, possibly by another process.
pub async fn transaction_outcome<C: ChainClient>(
    client: &C,
    tx_hash: B256,
) -> Result<TxOutcome, ChainError> {
    if let Some(receipt) = client.receipt(tx_hash).await? {
        return Ok(TxOutcome::from_receipt(receipt));
    }
    // A transaction mined between the two queries still reads as known.
    if client.transaction_known(tx_hash).await? {
        Ok(TxOutcome::Pending)
    } else {
        Ok(TxOutcome::Unknown)
    }
}

/// JSON-RPC connection bound to a single signing identity.
///
/// Implementations must serialize chain-mutating calls (`deploy`, `send`) for
/// their identity so nonces are consumed in submission order. Read-only calls
/// carry no ordering requirement.
pub trait ChainClient: Send + Sync {
    /// Address every transaction is sent from.
    fn sender(&self) -> Address;

    /// Submit a contract creation transaction.
    fn deploy(
        &self,
        init_code: Bytes,
        gas_limit: Option<u64>,
    ) -> impl Future<Output = Result<PendingDeployment, ChainError>> + Send;

    /// Submit a call to an existing contract, returning its transaction hash.
    fn send(&self, tx: TxRequest) -> impl Future<Output = Result<B256, ChainError>> + Send;

    /// Execute a read-only call against the latest state.
    fn call(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<Bytes, ChainError>> + Send;

    /// Native balance of `account`.
    fn balance(&self, account: Address) -> impl Future<Output = Result<U256, ChainError>> + Send;

    /// Receipt of `tx_hash`, or `None` while it is pending or unknown.
    fn receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<TxReceipt>, ChainError>> + Send;

    /// Whether the node knows `tx_hash` at all, mined or waiting in its pool.
    fn transaction_known(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// Wait until `tx_hash` is mined. How long to wait is the client's call.
    fn wait_for_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<TxReceipt, ChainError>> + Send;
}

impl<C: ChainClient + ?Sized> ChainClient for &C {
    fn sender(&self) -> Address {
        (**self).sender()
    }

    fn deploy(
        &self,
        init_code: Bytes,
        gas_limit: Option<u64>,
    ) -> impl Future<Output = Result<PendingDeployment, ChainError>> + Send {
        (**self).deploy(init_code, gas_limit)
    }

    fn send(&self, tx: TxRequest) -> impl Future<Output = Result<B256, ChainError>> + Send {
        (**self).send(tx)
    }

    fn call(
        &self,
        to: Address,
        data: Bytes,
    ) -> impl Future<Output = Result<Bytes, ChainError>> + Send {
        (**self).call(to, data)
    }

    fn balance(&self, account: Address) -> impl Future<Output = Result<U256, ChainError>> + Send {
        (**self).balance(account)
    }

    fn receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<Option<TxReceipt>, ChainError>> + Send {
        (**self).receipt(tx_hash)
    }

    fn transaction_known(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send {
        (**self).transaction_known(tx_hash)
    }

    fn wait_for_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<TxReceipt, ChainError>> + Send {
        (**self).wait_for_receipt(tx_hash)
    }
}
