//! Compiled contract artifacts (ABI + creation bytecode) and the loader that
//! resolves them by logical name.

use std::path::{Path, PathBuf};

use alloy_core::{
    dyn_abi::{DynSolValue, Specifier},
    json_abi::JsonAbi,
    primitives::Bytes,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DeployError;

/// Name under which the minimal position-descriptor stand-in is embedded.
pub const INLINE_POSITION_DESCRIPTOR: &str = "MockPositionDescriptor";

/// Creation code of a minimal token-URI descriptor. The full
/// NonfungibleTokenPositionDescriptor exceeds the contract size limit on the
/// target chains, so the position manager is wired to this one instead.
const POSITION_DESCRIPTOR_BYTECODE: &str = "608060405234801561001057600080fd5b5061017f806100206000396000f3fe608060405234801561001057600080fd5b50600436106100365760003560e01c806356702c7a1461003b578063c87b56dd14610059575b600080fd5b610043610089565b60405161005091906100c8565b60405180910390f35b610072610067366004610115565b6100a9565b60405161005091906100e5565b60606040518060600160405280602581526020016101306025913990505b90565b6060604051806060016040528060258152602001610130602591399050919050565b600060208083528351808285015260005b818110156100f55785810183015185820160400152602001610109565b81811115610107576000604083870101525b50601f01601f1916929092016040019392505050565b60006020828403121561012657600080fd5b503591905056fe68747470733a2f2f756e69737761702e6f72672f7661756c742f746f6b656e732f7b69647da16469706673582212207a26e26bc02b9d2fb7fb6bae8467edcab54bc9eec0091aab55b0c0c94599796c64736f6c634300080b0033";

/// Where a compiled artifact comes from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactSource {
    /// This project's own build output (WETH9, test tokens).
    LocalBuild,
    /// Pre-built v3-core artifacts (factory, pool interface).
    CoreRepository,
    /// Pre-built v3-periphery artifacts (position manager, router).
    PeripheryRepository,
    /// Embedded in this binary.
    Inline,
}

/// A compiled contract: ABI and creation bytecode. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// Hex-encoded SHA-256 of the creation bytecode.
    ///
    /// Stored next to each deployment so a later run can tell that the
    /// artifact changed since the contract was deployed.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytecode);
        hex::encode(hasher.finalize())
    }

    /// Write the ABI to `<metadata_dir>/<Name>_abi.json` for reference.
    pub fn export_abi(&self, metadata_dir: &Path) -> Result<PathBuf, DeployError> {
        std::fs::create_dir_all(metadata_dir).map_err(|e| DeployError::io(metadata_dir, e))?;
        let path = metadata_dir.join(format!("{}_abi.json", self.name));
        let content = serde_json::to_string_pretty(&self.abi).map_err(|e| {
            DeployError::InvalidArtifact {
                name: self.name.clone(),
                reason: format!("ABI serialization failed: {e}"),
            }
        })?;
        std::fs::write(&path, content).map_err(|e| DeployError::io(&path, e))?;
        tracing::debug!(contract = %self.name, path = %path.display(), "ABI saved for reference");
        Ok(path)
    }
}

/// A contract ready to deploy: artifact plus constructor arguments.
#[derive(Debug, Clone)]
pub struct ContractSpec {
    pub logical_name: String,
    pub artifact: ContractArtifact,
    pub constructor_args: Vec<DynSolValue>,
}

impl ContractSpec {
    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    ///
    /// Arguments are checked against the ABI constructor, both in count and in
    /// type.
    pub fn init_code(&self) -> Result<Bytes, String> {
        let inputs = self
            .artifact
            .abi
            .constructor
            .as_ref()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default();

        if inputs.len() != self.constructor_args.len() {
            return Err(format!(
                "{} expects {} constructor argument(s), got {}",
                self.artifact.name,
                inputs.len(),
                self.constructor_args.len()
            ));
        }

        for (param, value) in inputs.iter().zip(&self.constructor_args) {
            let ty = param
                .resolve()
                .map_err(|e| format!("unsupported constructor parameter {}: {e}", param.name))?;
            if !value.matches(&ty) {
                return Err(format!(
                    "constructor parameter {} expects {}, got {:?}",
                    param.name, ty, value
                ));
            }
        }

        let mut code = self.artifact.bytecode.to_vec();
        if !self.constructor_args.is_empty() {
            code.extend(DynSolValue::Tuple(self.constructor_args.clone()).abi_encode_params());
        }
        Ok(code.into())
    }
}

/// Resolves compiled artifacts by name from one of several sources.
pub trait ArtifactLoader: Send + Sync {
    fn resolve(&self, name: &str, source: ArtifactSource)
    -> Result<ContractArtifact, DeployError>;
}

/// Hardhat artifact JSON as written by `hardhat compile`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    abi: JsonAbi,
    bytecode: String,
}

/// Artifact roots on disk, one per source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// Root of this project's Hardhat `artifacts/` directory.
    pub local_build: PathBuf,
    /// Root of the v3-core `artifacts/` directory.
    pub core_repository: PathBuf,
    /// Root of the v3-periphery `artifacts/` directory.
    pub periphery_repository: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            local_build: PathBuf::from("artifacts"),
            core_repository: PathBuf::from("../v3-core/artifacts"),
            periphery_repository: PathBuf::from("../v3-periphery/artifacts"),
        }
    }
}

/// Loads Hardhat artifacts from the filesystem.
#[derive(Debug, Clone)]
pub struct FsArtifactLoader {
    paths: ArtifactPaths,
}

impl FsArtifactLoader {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    /// Path of the artifact JSON for `name` in `source`, if the source is on disk.
    pub fn artifact_path(&self, name: &str, source: ArtifactSource) -> Option<PathBuf> {
        let root = match source {
            ArtifactSource::LocalBuild => &self.paths.local_build,
            ArtifactSource::CoreRepository => &self.paths.core_repository,
            ArtifactSource::PeripheryRepository => &self.paths.periphery_repository,
            ArtifactSource::Inline => return None,
        };
        Some(
            root.join("contracts")
                .join(format!("{name}.sol"))
                .join(format!("{name}.json")),
        )
    }

    fn load_file(name: &str, path: &Path) -> Result<ContractArtifact, DeployError> {
        let content = std::fs::read_to_string(path).map_err(|e| DeployError::io(path, e))?;
        let artifact: HardhatArtifact =
            serde_json::from_str(&content).map_err(|e| DeployError::InvalidArtifact {
                name: name.to_string(),
                reason: format!("failed to parse {}: {e}", path.display()),
            })?;
        let bytecode = decode_bytecode(name, &artifact.bytecode)?;

        Ok(ContractArtifact {
            name: name.to_string(),
            abi: artifact.abi,
            bytecode,
        })
    }
}

impl ArtifactLoader for FsArtifactLoader {
    fn resolve(
        &self,
        name: &str,
        source: ArtifactSource,
    ) -> Result<ContractArtifact, DeployError> {
        let Some(path) = self.artifact_path(name, source) else {
            return inline_artifact(name);
        };

        if !path.is_file() {
            return Err(DeployError::ArtifactNotFound {
                name: name.to_string(),
                source_kind: source,
                path,
            });
        }

        let artifact = Self::load_file(name, &path)?;
        tracing::debug!(
            contract = name,
            %source,
            path = %path.display(),
            fingerprint = %artifact.fingerprint(),
            "Artifact resolved"
        );
        Ok(artifact)
    }
}

/// Artifacts embedded in the binary.
pub fn inline_artifact(name: &str) -> Result<ContractArtifact, DeployError> {
    match name {
        INLINE_POSITION_DESCRIPTOR => Ok(ContractArtifact {
            name: name.to_string(),
            abi: JsonAbi::default(),
            bytecode: decode_bytecode(name, POSITION_DESCRIPTOR_BYTECODE)?,
        }),
        _ => Err(DeployError::ArtifactNotFound {
            name: name.to_string(),
            source_kind: ArtifactSource::Inline,
            path: PathBuf::from(name),
        }),
    }
}

fn decode_bytecode(name: &str, bytecode: &str) -> Result<Bytes, DeployError> {
    let raw = bytecode.trim().trim_start_matches("0x");
    if raw.is_empty() {
        return Err(DeployError::InvalidArtifact {
            name: name.to_string(),
            reason: "empty bytecode (abstract contract or interface?)".to_string(),
        });
    }
    hex::decode(raw)
        .map(Bytes::from)
        .map_err(|e| DeployError::InvalidArtifact {
            name: name.to_string(),
            reason: format!("bytecode is not valid hex (unlinked library?): {e}"),
        })
}
