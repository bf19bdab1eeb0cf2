//! Local transaction signing with the configured private key.

use std::fmt;

use alloy_core::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    rlp::{Encodable, Header},
};
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};

use crate::{error::ChainError, network::SignerContext};

/// A legacy (type 0) transaction, replay-protected with EIP-155.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    /// `None` creates a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl LegacyTransaction {
    fn to_field(&self) -> &[u8] {
        self.to.as_ref().map(|to| to.as_slice()).unwrap_or_default()
    }

    fn fields_length(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + self.to_field().length()
            + self.value.length()
            + self.data.length()
    }

    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to_field().encode(out);
        self.value.encode(out);
        self.data.encode(out);
    }

    /// RLP of the six fields followed by `chain_id, 0, 0`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let payload_length = self.fields_length() + self.chain_id.length() + 2 * 0u8.length();
        let mut out = Vec::with_capacity(payload_length + 3);
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.encode_fields(&mut out);
        self.chain_id.encode(&mut out);
        0u8.encode(&mut out);
        0u8.encode(&mut out);
        out
    }

    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    /// Raw transaction bytes for `*_sendRawTransaction`.
    pub fn encode_signed(&self, v: u64, r: U256, s: U256) -> Bytes {
        let payload_length = self.fields_length() + v.length() + r.length() + s.length();
        let mut out = Vec::with_capacity(payload_length + 3);
        Header {
            list: true,
            payload_length,
        }
        .encode(&mut out);
        self.encode_fields(&mut out);
        v.encode(&mut out);
        r.encode(&mut out);
        s.encode(&mut out);
        out.into()
    }
}

/// Signs transactions for one account.
#[derive(Clone)]
pub struct TransactionSigner {
    key: SigningKey,
    context: SignerContext,
}

impl fmt::Debug for TransactionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSigner")
            .field("address", &self.context.address)
            .finish_non_exhaustive()
    }
}

impl TransactionSigner {
    /// Load a hex-encoded secp256k1 private key.
    pub fn from_private_key(private_key: &str) -> anyhow::Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .context("Failed to parse signer private key")?;
        Ok(Self {
            key: signer.credential().clone(),
            context: SignerContext::new(Address::from(signer.address().0.0)),
        })
    }

    pub fn address(&self) -> Address {
        self.context.address
    }

    /// Sign `tx` and return its raw encoding.
    pub fn sign(&self, tx: &LegacyTransaction) -> Result<Bytes, ChainError> {
        let (signature, recovery_id) = self.sign_hash(tx.signing_hash())?;
        let bytes = signature.to_bytes();
        let r = U256::from_be_slice(&bytes[..32]);
        let s = U256::from_be_slice(&bytes[32..]);
        let v = u64::from(recovery_id.to_byte()) + 35 + tx.chain_id * 2;
        Ok(tx.encode_signed(v, r, s))
    }

    fn sign_hash(&self, hash: B256) -> Result<(Signature, RecoveryId), ChainError> {
        self.key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| ChainError::Signing(e.to_string()))
    }
}

/// Who signs the transactions a client submits.
#[derive(Debug, Clone)]
pub enum Signing {
    /// Signed here and sent with `*_sendRawTransaction`.
    Local(TransactionSigner),
    /// Sent with `*_sendTransaction`; the node holds the unlocked account.
    Node(SignerContext),
}

impl Signing {
    pub fn sender(&self) -> Address {
        match self {
            Self::Local(signer) => signer.address(),
            Self::Node(context) => context.address,
        }
    }
}
