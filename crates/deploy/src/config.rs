//! Layered configuration: built-in defaults, then `shardswap.toml`, then
//! `SHARDSWAP_*` environment variables.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    artifacts::ArtifactPaths,
    bootstrap::BootstrapSettings,
    constraint::AddressConstraint,
    network::{NetworkId, SignerContext},
    rpc::{RpcClientConfig, RpcNamespace},
    signer::{Signing, TransactionSigner},
};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "shardswap.toml";

/// Prefix of environment overrides. Nested keys are separated by `__`, e.g.
/// `SHARDSWAP_NETWORKS__CYPRUS1__PRIVATE_KEY`.
pub const ENV_PREFIX: &str = "SHARDSWAP_";

const DEFAULT_NETWORK: &str = "cyprus1";
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Where transactions get signed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    /// With `private_key`, as EIP-155 transactions.
    #[default]
    Local,
    /// By the node, for an account it holds unlocked.
    Node,
}

/// One target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub url: String,
    pub chain_id: u64,
    #[serde(default)]
    pub rpc_namespace: RpcNamespace,
    #[serde(default)]
    pub signing: SigningMode,
    /// Hex-encoded key of the deploying account. Usually supplied through the
    /// environment rather than the file. With node signing it only names the
    /// sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Account the node signs for. Derived from `private_key` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Placement rules checked against every deployed address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_constraint: Option<AddressConstraint>,
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl NetworkConfig {
    pub fn rpc_client_config(&self) -> Result<RpcClientConfig> {
        Ok(RpcClientConfig {
            url: Url::parse(&self.url)
                .with_context(|| format!("Invalid RPC URL {}", self.url))?,
            chain_id: self.chain_id,
            namespace: self.rpc_namespace,
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }

    /// How transactions on `network` are signed, and by which account.
    pub fn signing(&self, network: &str) -> Result<Signing> {
        let env_key = |field: &str| {
            format!("{ENV_PREFIX}NETWORKS__{}__{field}", network.to_uppercase())
        };

        match self.signing {
            SigningMode::Local => {
                let key = self.private_key.as_deref().with_context(|| {
                    format!(
                        "No private key configured for network {network}; set {}",
                        env_key("PRIVATE_KEY")
                    )
                })?;
                Ok(Signing::Local(TransactionSigner::from_private_key(key)?))
            }
            SigningMode::Node => {
                let sender = match (self.sender, self.private_key.as_deref()) {
                    (Some(sender), _) => SignerContext::new(sender),
                    (None, Some(key)) => {
                        let context = SignerContext::from_private_key(key)?;
                        tracing::info!(
                            network,
                            sender = %context.address,
                            "Node signing: the private key only names the sender"
                        );
                        context
                    }
                    (None, None) => anyhow::bail!(
                        "No sender configured for network {network}; set {} or {}",
                        env_key("SENDER"),
                        env_key("PRIVATE_KEY")
                    ),
                };
                Ok(Signing::Node(sender))
            }
        }
    }
}

/// Where artifacts are read from and ABI metadata is written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(flatten)]
    pub paths: ArtifactPaths,
    /// `<Name>_abi.json` files are written here after each fresh deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_dir: Option<PathBuf>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            paths: ArtifactPaths::default(),
            metadata_dir: Some(PathBuf::from("metadata")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardswapConfig {
    pub default_network: String,
    /// Directory holding one deployment record per network.
    pub deployments_dir: PathBuf,
    pub artifacts: ArtifactsConfig,
    pub bootstrap: BootstrapSettings,
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for ShardswapConfig {
    fn default() -> Self {
        let cyprus1 = NetworkConfig {
            url: "https://orchard.rpc.quai.network/cyprus1".to_string(),
            chain_id: 15_000,
            rpc_namespace: RpcNamespace::Quai,
            // Quai transactions are not EIP-155 encoded.
            signing: SigningMode::Node,
            private_key: None,
            sender: None,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            address_constraint: Some(AddressConstraint::quai_zone(0, 0)),
        };

        Self {
            default_network: DEFAULT_NETWORK.to_string(),
            deployments_dir: PathBuf::from("deployments"),
            artifacts: ArtifactsConfig::default(),
            bootstrap: BootstrapSettings::default(),
            networks: BTreeMap::from([(DEFAULT_NETWORK.to_string(), cyprus1)]),
        }
    }
}

impl ShardswapConfig {
    /// Defaults, merged with `path` when it exists, merged with the
    /// environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.is_file() {
            figment = figment.merge(Toml::file(path));
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            default_network = %config.default_network,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Write `self` as pretty TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// The network called `name`, or the default network.
    pub fn network(&self, name: Option<&str>) -> Result<(NetworkId, &NetworkConfig)> {
        let name = name.unwrap_or(&self.default_network);
        let network = self.networks.get(name).with_context(|| {
            format!(
                "Unknown network {name}; configured networks: {}",
                self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })?;
        Ok((NetworkId::new(name, network.chain_id), network))
    }
}
