//! The standard DEX deployment plan.

use alloy_core::{dyn_abi::DynSolValue, primitives::U256};

use crate::{
    artifacts::{ArtifactLoader, ArtifactSource, INLINE_POSITION_DESCRIPTOR},
    error::DeployError,
    step::{DeploymentPlan, DeploymentStep},
};

pub const WETH: &str = "weth";
pub const FACTORY: &str = "factory";
pub const POSITION_DESCRIPTOR: &str = "positionDescriptor";
pub const POSITION_MANAGER: &str = "positionManager";
pub const ROUTER: &str = "router";

/// Artifact name of the ERC-20 used by the example workflows.
pub const TEST_TOKEN_CONTRACT: &str = "TestToken";

/// Wrapped native asset, factory, position descriptor, position manager and
/// swap router, with every artifact resolved up front.
pub fn dex_stack(loader: &impl ArtifactLoader) -> Result<DeploymentPlan, DeployError> {
    let weth = loader.resolve("WETH9", ArtifactSource::LocalBuild)?;
    let factory = loader.resolve("UniswapV3Factory", ArtifactSource::CoreRepository)?;
    let descriptor = loader.resolve(INLINE_POSITION_DESCRIPTOR, ArtifactSource::Inline)?;
    let manager = loader.resolve(
        "NonfungiblePositionManager",
        ArtifactSource::PeripheryRepository,
    )?;
    let router = loader.resolve("SwapRouter", ArtifactSource::PeripheryRepository)?;

    Ok(DeploymentPlan::new()
        .with_step(DeploymentStep::new(WETH, weth))
        .with_step(DeploymentStep::new(FACTORY, factory))
        .with_step(DeploymentStep::new(POSITION_DESCRIPTOR, descriptor))
        .with_step(
            DeploymentStep::new(POSITION_MANAGER, manager)
                .depends_on([FACTORY, WETH, POSITION_DESCRIPTOR])
                .with_args(|deps| {
                    Ok(vec![
                        deps.arg(FACTORY)?,
                        deps.arg(WETH)?,
                        deps.arg(POSITION_DESCRIPTOR)?,
                    ])
                }),
        )
        .with_step(
            DeploymentStep::new(ROUTER, router)
                .depends_on([FACTORY, WETH])
                .with_args(|deps| Ok(vec![deps.arg(FACTORY)?, deps.arg(WETH)?])),
        ))
}

/// An ERC-20 minted to the deployer: `TestToken(name, symbol, supply)`.
///
/// `supply` is in whole tokens and scaled to 18 decimals.
pub fn test_token_step(
    loader: &impl ArtifactLoader,
    id: &str,
    name: &str,
    symbol: &str,
    supply: u64,
) -> Result<DeploymentStep, DeployError> {
    let artifact = loader.resolve(TEST_TOKEN_CONTRACT, ArtifactSource::LocalBuild)?;
    let supply = U256::from(supply) * U256::from(10u64).pow(U256::from(18u64));

    Ok(DeploymentStep::new(id, artifact).with_static_args(vec![
        DynSolValue::String(name.to_string()),
        DynSolValue::String(symbol.to_string()),
        DynSolValue::Uint(supply, 256),
    ]))
}
