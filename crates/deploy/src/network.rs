//! Explicit network and signer context threaded through every operation.

use std::fmt;

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Identity of a target network.
///
/// Records are keyed by `name`: several network configurations may share a
/// chain id in test setups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId {
    pub name: String,
    pub chain_id: u64,
}

impl NetworkId {
    pub fn new(name: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            chain_id,
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chain id {})", self.name, self.chain_id)
    }
}

/// The signing identity all chain-mutating calls are issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignerContext {
    pub address: Address,
}

impl SignerContext {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    /// Derive the signer address from a hex-encoded secp256k1 private key.
    pub fn from_private_key(private_key: &str) -> anyhow::Result<Self> {
        let signer: alloy_signer_local::PrivateKeySigner = private_key
            .trim()
            .parse()
            .context("Failed to parse signer private key")?;
        let address = signer.address();
        Ok(Self {
            address: Address::from(address.0.0),
        })
    }
}
