//! End-to-end example workflows: deploy the stack and test tokens, then
//! bootstrap a pool.

use alloy_core::primitives::Address;

use crate::{
    artifacts::ArtifactLoader,
    bootstrap::{BootstrapResult, BootstrapSequencer, BootstrapSettings, PoolBootstrapPlan},
    client::ChainClient,
    error::{BootstrapError, DeployError},
    network::NetworkId,
    orchestrator::{DeploymentOutcome, Orchestrator},
    record::DeploymentRecord,
    stack::{self, dex_stack, test_token_step},
    step::DeploymentPlan,
    store::DeploymentStore,
};

pub const TEST_TOKEN: &str = "testToken";
pub const TOKEN_A: &str = "tokenA";
pub const TOKEN_B: &str = "tokenB";

/// Whole tokens minted to the deployer by every test token.
pub const TEST_TOKEN_SUPPLY: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Workflow {
    /// One test token pooled against the wrapped native asset.
    SingleToken,
    /// Two test tokens pooled against each other.
    TwoTokens,
}

impl Workflow {
    /// The DEX stack plus this workflow's test tokens.
    pub fn plan(&self, loader: &impl ArtifactLoader) -> Result<DeploymentPlan, DeployError> {
        let mut plan = dex_stack(loader)?;
        match self {
            Self::SingleToken => {
                plan.push(test_token_step(
                    loader,
                    TEST_TOKEN,
                    "Example Token",
                    "EXTKN",
                    TEST_TOKEN_SUPPLY,
                )?);
            }
            Self::TwoTokens => {
                plan.push(test_token_step(
                    loader,
                    TOKEN_A,
                    "Token A",
                    "TKNA",
                    TEST_TOKEN_SUPPLY,
                )?);
                plan.push(test_token_step(
                    loader,
                    TOKEN_B,
                    "Token B",
                    "TKNB",
                    TEST_TOKEN_SUPPLY,
                )?);
            }
        }
        Ok(plan)
    }

    /// The pool to bootstrap, taken from a record holding this workflow's
    /// contracts.
    pub fn pool_plan(
        &self,
        record: &DeploymentRecord,
        settings: &BootstrapSettings,
    ) -> Result<PoolBootstrapPlan, BootstrapError> {
        let (token_a, token_b) = match self {
            Self::SingleToken => (
                required(record, TEST_TOKEN)?,
                required(record, stack::WETH)?,
            ),
            Self::TwoTokens => (required(record, TOKEN_A)?, required(record, TOKEN_B)?),
        };
        Ok(PoolBootstrapPlan::new(token_a, token_b, settings.fee)
            .with_initial_price(settings.initial_price))
    }
}

fn required(record: &DeploymentRecord, name: &str) -> Result<Address, BootstrapError> {
    record
        .address(name)
        .ok_or_else(|| BootstrapError::MissingContract {
            name: name.to_string(),
        })
}

#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub deployment: DeploymentOutcome,
    pub pool_plan: PoolBootstrapPlan,
    pub bootstrap: BootstrapResult,
}

/// Deploy whatever the workflow still lacks, then run every bootstrap state.
///
/// The bootstrap sequencer shares the orchestrator's client and address
/// constraint.
pub async fn run_workflow<C, S>(
    workflow: Workflow,
    orchestrator: &Orchestrator<C, S>,
    loader: &impl ArtifactLoader,
    network: &NetworkId,
    settings: BootstrapSettings,
) -> Result<WorkflowOutcome, BootstrapError>
where
    C: ChainClient,
    S: DeploymentStore,
{
    tracing::info!(%workflow, %network, "Running workflow");

    let plan = workflow.plan(loader)?;
    let deployment = orchestrator.run(&plan, network).await?;
    let pool_plan = workflow.pool_plan(&deployment.record, &settings)?;

    let mut sequencer = BootstrapSequencer::new(orchestrator.client(), settings);
    if let Some(constraint) = orchestrator.constraint() {
        sequencer = sequencer.with_constraint(constraint.clone());
    }
    let bootstrap = sequencer.bootstrap(&deployment.record, &pool_plan).await?;

    tracing::info!(
        %workflow,
        states = bootstrap.completed.len(),
        unguarded_swap = bootstrap.unguarded_swap,
        "Workflow complete"
    );

    Ok(WorkflowOutcome {
        deployment,
        pool_plan,
        bootstrap,
    })
}
