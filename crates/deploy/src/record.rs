//! Per-network deployment record and its persisted JSON layout.
//!
//! The file keeps one flat `<logicalName>Address` key per contract next to
//! `network`, `chainId` and `timestamp`, so the example scripts can read it
//! directly. Transaction details live under `transactions` and in-flight
//! deployments under `pending`. Files without those sections still load.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::network::NetworkId;

const ADDRESS_SUFFIX: &str = "Address";
const NETWORK_KEY: &str = "network";
const CHAIN_ID_KEY: &str = "chainId";
const TIMESTAMP_KEY: &str = "timestamp";
const TRANSACTIONS_KEY: &str = "transactions";
const PENDING_KEY: &str = "pending";

/// A confirmed deployment of one logical contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentEntry {
    pub address: Address,
    /// Absent for entries imported from files that did not keep hashes.
    pub transaction_hash: Option<B256>,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the creation bytecode the contract was deployed from.
    pub fingerprint: Option<String>,
}

impl DeploymentEntry {
    pub fn new(address: Address, transaction_hash: B256, fingerprint: Option<String>) -> Self {
        Self {
            address,
            transaction_hash: Some(transaction_hash),
            timestamp: Utc::now(),
            fingerprint,
        }
    }
}

/// A deployment submitted but not yet seen confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub transaction_hash: B256,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
}

/// Deployment state of one network. At most one record per network is
/// authoritative; entries are keyed by logical name and overwritten in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub network: NetworkId,
    pub entries: BTreeMap<String, DeploymentEntry>,
    pub pending: BTreeMap<String, PendingEntry>,
    /// Time of the last mutation.
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn empty(network: NetworkId) -> Self {
        Self {
            network,
            entries: BTreeMap::new(),
            pending: BTreeMap::new(),
            updated_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.pending.is_empty()
    }

    pub fn get(&self, logical_name: &str) -> Option<&DeploymentEntry> {
        self.entries.get(logical_name)
    }

    pub fn address(&self, logical_name: &str) -> Option<Address> {
        self.entries.get(logical_name).map(|e| e.address)
    }

    /// Store a confirmed entry, replacing any previous one and its pending marker.
    pub fn insert(&mut self, logical_name: impl Into<String>, entry: DeploymentEntry) {
        let logical_name = logical_name.into();
        self.pending.remove(&logical_name);
        self.updated_at = Some(entry.timestamp);
        self.entries.insert(logical_name, entry);
    }

    pub fn mark_pending(&mut self, logical_name: impl Into<String>, pending: PendingEntry) {
        self.updated_at = Some(pending.submitted_at);
        self.pending.insert(logical_name.into(), pending);
    }

    pub fn clear_pending(&mut self, logical_name: &str) -> Option<PendingEntry> {
        let removed = self.pending.remove(logical_name);
        if removed.is_some() {
            self.updated_at = Some(Utc::now());
        }
        removed
    }

    /// Render the persisted JSON layout.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(NETWORK_KEY.to_string(), Value::from(self.network.name.clone()));
        object.insert(CHAIN_ID_KEY.to_string(), Value::from(self.network.chain_id));

        let mut transactions = Map::new();
        for (name, entry) in &self.entries {
            object.insert(
                format!("{name}{ADDRESS_SUFFIX}"),
                Value::from(entry.address.to_checksum(None)),
            );
            let details = TransactionDetails {
                transaction_hash: entry.transaction_hash,
                timestamp: Some(entry.timestamp),
                fingerprint: entry.fingerprint.clone(),
            };
            transactions.insert(name.clone(), serde_json::json!(details));
        }

        if let Some(updated_at) = self.updated_at {
            object.insert(TIMESTAMP_KEY.to_string(), serde_json::json!(updated_at));
        }
        object.insert(TRANSACTIONS_KEY.to_string(), Value::Object(transactions));
        if !self.pending.is_empty() {
            object.insert(PENDING_KEY.to_string(), serde_json::json!(self.pending));
        }

        Value::Object(object)
    }

    /// Parse the persisted JSON layout.
    ///
    /// `fallback` names the record when the file carries no `network` /
    /// `chainId` fields.
    pub fn from_json(value: Value, fallback: &NetworkId) -> Result<Self, serde_json::Error> {
        let Value::Object(mut object) = value else {
            return Err(serde::de::Error::custom("deployment record must be a JSON object"));
        };

        let name = match object.remove(NETWORK_KEY) {
            Some(Value::String(name)) => name,
            _ => fallback.name.clone(),
        };
        let chain_id = match object.remove(CHAIN_ID_KEY) {
            Some(value) => serde_json::from_value(value)?,
            None => fallback.chain_id,
        };
        let updated_at: Option<DateTime<Utc>> = object
            .remove(TIMESTAMP_KEY)
            .map(serde_json::from_value)
            .transpose()?;
        let mut transactions: BTreeMap<String, TransactionDetails> = object
            .remove(TRANSACTIONS_KEY)
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let pending: BTreeMap<String, PendingEntry> = object
            .remove(PENDING_KEY)
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let mut entries = BTreeMap::new();
        for (key, value) in object {
            let Some(logical_name) = key.strip_suffix(ADDRESS_SUFFIX) else {
                continue;
            };
            if logical_name.is_empty() {
                continue;
            }
            let address: Address = serde_json::from_value(value)?;
            let details = transactions.remove(logical_name);
            let entry = DeploymentEntry {
                address,
                transaction_hash: details.as_ref().and_then(|d| d.transaction_hash),
                timestamp: details
                    .as_ref()
                    .and_then(|d| d.timestamp)
                    .or(updated_at)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                fingerprint: details.and_then(|d| d.fingerprint),
            };
            entries.insert(logical_name.to_string(), entry);
        }

        Ok(Self {
            network: NetworkId::new(name, chain_id),
            entries,
            pending,
            updated_at,
        })
    }
}
