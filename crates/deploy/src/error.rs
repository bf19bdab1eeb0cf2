//! Error taxonomy for deployment and bootstrap.
//!
//! Lower layers ([`ChainError`], store I/O) return typed failures. The
//! orchestrator and the bootstrap sequencer attach the step or state they were
//! running and re-surface them unchanged; nothing in this crate retries.

use std::path::PathBuf;

use alloy_core::primitives::B256;

use crate::{artifacts::ArtifactSource, bootstrap::BootstrapState, bootstrap::PriceError};

/// Failures reported by a [`crate::ChainClient`].
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The node answered with a JSON-RPC error object.
    #[error("RPC {method} failed: {message}")]
    Rpc { method: String, message: String },
    /// The request never produced a JSON-RPC answer.
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    /// The transaction was mined but execution reverted.
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
    /// The client gave up waiting for a receipt.
    #[error("timed out after {waited_secs}s waiting for transaction {tx_hash}")]
    ConfirmationTimeout { tx_hash: B256, waited_secs: u64 },
    /// A response could not be decoded.
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },
    #[error("failed to sign transaction: {0}")]
    Signing(String),
}

/// Why a single deployment step failed.
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("invalid constructor arguments: {0}")]
    Arguments(String),
    #[error("receipt for {tx_hash} carries no contract address")]
    MissingContractAddress { tx_hash: B256 },
}

/// Errors surfaced by the deployment orchestrator, the artifact loader and the
/// deployment store.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("artifact {name} not found in {source_kind} at {}", path.display())]
    ArtifactNotFound {
        name: String,
        source_kind: ArtifactSource,
        path: PathBuf,
    },
    #[error("artifact {name} is invalid: {reason}")]
    InvalidArtifact { name: String, reason: String },
    #[error("step {id} is declared more than once")]
    DuplicateStep { id: String },
    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },
    #[error("dependency cycle between steps: {}", ids.join(", "))]
    CyclicDependency { ids: Vec<String> },
    #[error("deployment of {logical_name} failed: {cause}")]
    StepFailed {
        logical_name: String,
        #[source]
        cause: StepFailure,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("deployment record {} is corrupt: {source}", path.display())]
    CorruptRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("deployment aborted after {completed} step(s)")]
    Aborted { completed: usize },
}

impl DeployError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the bootstrap sequencer. Every variant that happens while
/// a state runs names that state.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("deployment record has no {name} address")]
    MissingContract { name: String },
    #[error("{state}: slippage or approval failure: {reason}")]
    SlippageOrApprovalFailure {
        state: BootstrapState,
        reason: String,
    },
    #[error("{state} failed: {cause}")]
    StateFailed {
        state: BootstrapState,
        #[source]
        cause: ChainError,
    },
    #[error("{state} post-condition failed: {reason}")]
    PostConditionFailed {
        state: BootstrapState,
        reason: String,
    },
    #[error("swap without amountOutMinimum is not allowed in a production run")]
    UnguardedSwap,
    #[error("{state}: {source}")]
    InvalidPrice {
        state: BootstrapState,
        #[source]
        source: PriceError,
    },
    #[error(transparent)]
    Deploy(#[from] DeployError),
}

impl BootstrapError {
    /// The bootstrap state that failed, when the failure happened inside one.
    pub fn state(&self) -> Option<BootstrapState> {
        match self {
            Self::SlippageOrApprovalFailure { state, .. }
            | Self::StateFailed { state, .. }
            | Self::PostConditionFailed { state, .. }
            | Self::InvalidPrice { state, .. } => Some(*state),
            Self::UnguardedSwap => Some(BootstrapState::Swap),
            Self::MissingContract { .. } | Self::Deploy(_) => None,
        }
    }
}
