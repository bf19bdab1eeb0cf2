//! Bootstrap sequencer and workflows against the in-memory chain.

mod common;

use alloy_core::primitives::U256;
use alloy_sol_types::SolCall;
use common::{MockChain, TestLoader, deployer, ether};
use shardswap_deploy::{
    AddressConstraint, BootstrapError, BootstrapSequencer, BootstrapSettings, BootstrapState,
    DeploymentRecord, DeploymentStore, DeploymentWarning, FeeTier, MemoryDeploymentStore,
    NetworkId, Orchestrator, Workflow,
    contracts::INonfungiblePositionManager,
    run_workflow, stack,
};

fn network() -> NetworkId {
    NetworkId::new("cyprus1", 9000)
}

/// Deploy what `workflow` needs and return the record.
async fn deployed(chain: &MockChain, workflow: Workflow) -> DeploymentRecord {
    let store = MemoryDeploymentStore::new();
    let plan = workflow.plan(&TestLoader).unwrap();
    Orchestrator::new(chain, &store)
        .run(&plan, &network())
        .await
        .unwrap()
        .record
}

#[tokio::test]
async fn test_single_token_workflow() {
    let chain = MockChain::new();
    let store = MemoryDeploymentStore::new();
    let orchestrator = Orchestrator::new(&chain, &store);
    let settings = BootstrapSettings::default();

    let outcome = run_workflow(
        Workflow::SingleToken,
        &orchestrator,
        &TestLoader,
        &network(),
        settings.clone(),
    )
    .await
    .unwrap();

    let result = outcome.bootstrap;
    assert_eq!(
        result.completed,
        [
            BootstrapState::WrapAsset,
            BootstrapState::EnsurePool,
            BootstrapState::AddLiquidity,
            BootstrapState::Swap
        ]
    );

    let record = store.load(&network()).unwrap();
    let weth = record.address(stack::WETH).unwrap();
    assert!(record.address("testToken").is_some());

    let wrap = result.wrap.unwrap();
    assert_eq!(wrap.balance_after - wrap.balance_before, settings.wrap_amount);

    let pool = result.pool.unwrap();
    assert!(pool.created);
    assert!(pool.token0 < pool.token1);
    assert!(pool.token0 == weth || pool.token1 == weth);
    assert_eq!(pool.tick_spacing, 60);
    assert_eq!(
        chain.pool_tokens(pool.pool),
        Some((pool.token0, pool.token1, 3000))
    );

    let liquidity = result.liquidity.unwrap();
    assert_eq!(liquidity.amount0, settings.amount0_desired);
    assert_eq!(liquidity.amount1, settings.amount1_desired);
    assert_eq!((liquidity.tick_lower, liquidity.tick_upper), (-60, 60));

    let swap = result.swap.unwrap();
    assert_eq!(swap.token_in, pool.token0);
    assert_eq!(
        swap.amount_out,
        settings.swap_amount_in * U256::from(997u32) / U256::from(1000u32)
    );
    assert!(result.unguarded_swap);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_two_token_workflow_orders_tokens() {
    let chain = MockChain::new();
    let store = MemoryDeploymentStore::new();
    let orchestrator = Orchestrator::new(&chain, &store);

    let outcome = run_workflow(
        Workflow::TwoTokens,
        &orchestrator,
        &TestLoader,
        &network(),
        BootstrapSettings::default(),
    )
    .await
    .unwrap();

    let token_a = outcome.deployment.address("tokenA").unwrap();
    let token_b = outcome.deployment.address("tokenB").unwrap();
    assert_eq!(outcome.pool_plan.token_a, token_a);

    let pool = outcome.bootstrap.pool.unwrap();
    assert_eq!((pool.token0, pool.token1), outcome.pool_plan.canonical_pair());
    assert_eq!(
        (pool.token0.min(pool.token1), pool.token0.max(pool.token1)),
        (token_a.min(token_b), token_a.max(token_b))
    );
    // The wrap state still ran first.
    assert!(outcome.bootstrap.wrap.is_some());
}

#[tokio::test]
async fn test_existing_pool_is_reused() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::TwoTokens).await;
    let plan = Workflow::TwoTokens
        .pool_plan(&record, &BootstrapSettings::default())
        .unwrap();
    let sequencer = BootstrapSequencer::new(&chain, BootstrapSettings::default());

    let first = sequencer.bootstrap(&record, &plan).await.unwrap();
    let second = sequencer.bootstrap(&record, &plan).await.unwrap();

    let (first, second) = (first.pool.unwrap(), second.pool.unwrap());
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.pool, second.pool);
    assert_eq!(chain.pool_count(), 1);
}

#[tokio::test]
async fn test_missing_approval_stops_add_liquidity() {
    let chain = MockChain::new();
    let store = MemoryDeploymentStore::new();
    let plan = Workflow::TwoTokens.plan(&TestLoader).unwrap();
    Orchestrator::new(&chain, &store)
        .run(&plan, &network())
        .await
        .unwrap();
    let record = store.load(&network()).unwrap();
    let saves = store.save_count();

    let settings = BootstrapSettings {
        grant_approvals: false,
        ..Default::default()
    };
    let pool_plan = Workflow::TwoTokens.pool_plan(&record, &settings).unwrap();
    let err = BootstrapSequencer::new(&chain, settings)
        .bootstrap(&record, &pool_plan)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::SlippageOrApprovalFailure {
            state: BootstrapState::AddLiquidity,
            ..
        }
    ));
    // Earlier states keep their effects; the record is untouched.
    assert_eq!(chain.pool_count(), 1);
    assert_eq!(store.load(&network()).unwrap(), record);
    assert_eq!(store.save_count(), saves);
}

#[tokio::test]
async fn test_mint_slippage_is_caught_before_sending() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::TwoTokens).await;
    let settings = BootstrapSettings::default();
    let plan = Workflow::TwoTokens.pool_plan(&record, &settings).unwrap();
    chain.set_mint_fill_bps(9_000);

    let err = BootstrapSequencer::new(&chain, settings)
        .bootstrap(&record, &plan)
        .await
        .unwrap_err();

    assert_eq!(err.state(), Some(BootstrapState::AddLiquidity));
    assert!(matches!(err, BootstrapError::SlippageOrApprovalFailure { .. }));

    let manager = record.address(stack::POSITION_MANAGER).unwrap();
    assert!(
        !chain
            .sent_to(manager)
            .contains(&INonfungiblePositionManager::mintCall::SELECTOR)
    );
}

#[tokio::test]
async fn test_production_run_requires_swap_guard() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::SingleToken).await;
    let settings = BootstrapSettings {
        production: true,
        ..Default::default()
    };
    let plan = Workflow::SingleToken.pool_plan(&record, &settings).unwrap();
    let mutations = chain.mutations();

    let err = BootstrapSequencer::new(&chain, settings.clone())
        .bootstrap(&record, &plan)
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::UnguardedSwap));
    assert_eq!(chain.mutations(), mutations);

    let guarded = BootstrapSettings {
        amount_out_minimum: Some(U256::from(1u8)),
        ..settings
    };
    let result = BootstrapSequencer::new(&chain, guarded)
        .bootstrap(&record, &plan)
        .await
        .unwrap();
    assert!(!result.unguarded_swap);
    assert_eq!(result.swap.unwrap().amount_out_minimum, U256::from(1u8));
}

#[tokio::test]
async fn test_unreachable_output_minimum_fails_swap() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::SingleToken).await;
    let settings = BootstrapSettings {
        amount_out_minimum: Some(ether(1)),
        ..Default::default()
    };
    let plan = Workflow::SingleToken.pool_plan(&record, &settings).unwrap();

    let err = BootstrapSequencer::new(&chain, settings)
        .bootstrap(&record, &plan)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::SlippageOrApprovalFailure {
            state: BootstrapState::Swap,
            ..
        }
    ));
}

#[tokio::test]
async fn test_bootstrap_until_stops_early() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::SingleToken).await;
    let settings = BootstrapSettings::default();
    let plan = Workflow::SingleToken.pool_plan(&record, &settings).unwrap();

    let result = BootstrapSequencer::new(&chain, settings)
        .bootstrap_until(&record, &plan, BootstrapState::EnsurePool)
        .await
        .unwrap();

    assert_eq!(
        result.completed,
        [BootstrapState::WrapAsset, BootstrapState::EnsurePool]
    );
    assert!(result.pool.is_some());
    assert!(result.liquidity.is_none() && result.swap.is_none());
}

#[tokio::test]
async fn test_missing_stack_contract() {
    let chain = MockChain::new();
    let record = DeploymentRecord::empty(network());
    let plan = shardswap_deploy::PoolBootstrapPlan::new(
        deployer(),
        deployer().create(99),
        FeeTier::MEDIUM,
    );

    let err = BootstrapSequencer::new(&chain, BootstrapSettings::default())
        .bootstrap(&record, &plan)
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::MissingContract { name } if name == stack::WETH));
    assert_eq!(chain.mutations(), 0);
}

#[tokio::test]
async fn test_disabled_fee_tier() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::TwoTokens).await;
    let settings = BootstrapSettings {
        fee: FeeTier::new(100),
        ..Default::default()
    };
    let plan = Workflow::TwoTokens.pool_plan(&record, &settings).unwrap();

    let err = BootstrapSequencer::new(&chain, settings)
        .bootstrap(&record, &plan)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::PostConditionFailed {
            state: BootstrapState::EnsurePool,
            ..
        }
    ));
    assert_eq!(chain.pool_count(), 0);
}

#[tokio::test]
async fn test_pool_address_constraint() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::TwoTokens).await;
    let settings = BootstrapSettings::default();
    let plan = Workflow::TwoTokens.pool_plan(&record, &settings).unwrap();

    // Mock pools land in the 0x00 shard.
    let inside = BootstrapSequencer::new(&chain, settings.clone())
        .with_constraint(AddressConstraint::quai_zone(0, 0))
        .bootstrap_until(&record, &plan, BootstrapState::EnsurePool)
        .await
        .unwrap();
    assert!(inside.warnings.is_empty());

    let outside = BootstrapSequencer::new(&chain, settings)
        .with_constraint(AddressConstraint::quai_zone(1, 0))
        .bootstrap_until(&record, &plan, BootstrapState::EnsurePool)
        .await
        .unwrap();
    assert!(matches!(
        outside.warnings.as_slice(),
        [DeploymentWarning::AddressConstraint { logical_name, .. }] if logical_name == "pool"
    ));
}

#[tokio::test]
async fn test_unlimited_approvals() {
    let chain = MockChain::new();
    let record = deployed(&chain, Workflow::TwoTokens).await;
    let settings = BootstrapSettings {
        unlimited_approvals: true,
        ..Default::default()
    };
    let plan = Workflow::TwoTokens.pool_plan(&record, &settings).unwrap();

    let result = BootstrapSequencer::new(&chain, settings)
        .bootstrap(&record, &plan)
        .await
        .unwrap();

    let pool = result.pool.unwrap();
    let manager = record.address(stack::POSITION_MANAGER).unwrap();
    let router = record.address(stack::ROUTER).unwrap();
    assert_eq!(chain.allowance(pool.token0, deployer(), manager), U256::MAX);
    assert_eq!(chain.allowance(pool.token0, deployer(), router), U256::MAX);
}
