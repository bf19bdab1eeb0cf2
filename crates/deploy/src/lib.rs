//! shardswap-deploy - Deployment and bootstrap library for a Uniswap v3 style
//! DEX on sharded EVM chains.
//!
//! This crate deploys the DEX contract stack in dependency order, keeps a
//! durable per-network record of what is deployed, and bootstraps a first pool
//! (wrap, create, add liquidity, swap) against the deployed stack.

mod artifacts;
pub use artifacts::{
    ArtifactLoader, ArtifactPaths, ArtifactSource, ContractArtifact, ContractSpec,
    FsArtifactLoader, INLINE_POSITION_DESCRIPTOR, inline_artifact,
};

pub mod bootstrap;
pub use bootstrap::{
    BootstrapResult, BootstrapSequencer, BootstrapSettings, BootstrapState, FeeTier,
    PoolBootstrapPlan, PriceRatio,
};

mod client;
pub use client::{
    ChainClient, PendingDeployment, TxOutcome, TxReceipt, TxRequest, TxStatus, transaction_outcome,
};

mod config;
pub use config::{
    ArtifactsConfig, CONFIG_FILENAME, ENV_PREFIX, NetworkConfig, ShardswapConfig, SigningMode,
};

mod constraint;
pub use constraint::{
    AddressConstraint, ByteRule, ConstraintViolation, Ledger, Validation, Zone, validate,
};

pub mod contracts;

mod error;
pub use error::{BootstrapError, ChainError, DeployError, StepFailure};

mod network;
pub use network::{NetworkId, SignerContext};

mod orchestrator;
pub use orchestrator::{DeploymentOutcome, DeploymentWarning, Orchestrator};

mod record;
pub use record::{DeploymentEntry, DeploymentRecord, PendingEntry};

mod rpc;
pub use rpc::{RpcChainClient, RpcClientConfig, RpcNamespace};

mod signer;
pub use signer::{LegacyTransaction, Signing, TransactionSigner};

pub mod stack;

mod step;
pub use step::{DeploymentPlan, DeploymentStep, ResolvedAddresses, StepId};

mod store;
pub use store::{
    DEFAULT_RECORD_PREFIX, DeploymentStore, FileDeploymentStore, MemoryDeploymentStore,
};

pub mod workflow;
pub use workflow::{Workflow, WorkflowOutcome, run_workflow};
