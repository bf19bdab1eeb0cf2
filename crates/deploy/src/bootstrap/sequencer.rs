use alloy_core::primitives::{
    Address, B256, U256,
    aliases::{I24, U24, U160},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    BootstrapState, FeeTier, PoolBootstrapPlan, PriceRatio, encode_sqrt_price_x96, tick_range,
};
use crate::{
    client::ChainClient,
    constraint::{AddressConstraint, Validation, Zone},
    contracts::{
        IERC20, IUniswapV3Factory, IUniswapV3Pool, IWETH9, INonfungiblePositionManager,
        ISwapRouter, call_contract, is_unset, send_contract,
    },
    error::{BootstrapError, ChainError},
    orchestrator::DeploymentWarning,
    record::DeploymentRecord,
    stack,
};

const ONE_TOKEN: u64 = 1_000_000_000_000_000_000;

/// Tunables of a bootstrap run. Token amounts are in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Native value deposited into the wrapped-asset contract.
    pub wrap_amount: U256,
    pub fee: FeeTier,
    /// Price of the first workflow token in the second.
    pub initial_price: PriceRatio,
    pub amount0_desired: U256,
    pub amount1_desired: U256,
    /// Minimum accepted mint amounts, in basis points below desired.
    pub slippage_bps: u32,
    /// Half-width of the liquidity range, in tick spacings.
    pub tick_range_multiplier: u32,
    pub swap_amount_in: U256,
    /// `None` swaps without an output guard, which only non-production runs
    /// accept.
    pub amount_out_minimum: Option<U256>,
    pub sqrt_price_limit_x96: Option<U256>,
    pub deadline_secs: u64,
    /// Approve the position manager and router when allowances fall short.
    pub grant_approvals: bool,
    /// Approve `U256::MAX` instead of the exact amount needed.
    pub unlimited_approvals: bool,
    pub production: bool,
    pub gas_limit: Option<u64>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            wrap_amount: U256::from(ONE_TOKEN),
            fee: FeeTier::MEDIUM,
            initial_price: PriceRatio::one(),
            amount0_desired: U256::from(ONE_TOKEN / 2),
            amount1_desired: U256::from(ONE_TOKEN / 2),
            slippage_bps: 500,
            tick_range_multiplier: 1,
            swap_amount_in: U256::from(ONE_TOKEN / 100),
            amount_out_minimum: None,
            sqrt_price_limit_x96: None,
            deadline_secs: 1200,
            grant_approvals: true,
            unlimited_approvals: false,
            production: false,
            gas_limit: Some(5_000_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapOutcome {
    pub amount: U256,
    pub balance_before: U256,
    pub balance_after: U256,
    pub tx_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutcome {
    pub pool: Address,
    pub token0: Address,
    pub token1: Address,
    pub fee: FeeTier,
    pub tick_spacing: i32,
    /// False when the pool already existed.
    pub created: bool,
    pub sqrt_price_x96: Option<U256>,
    pub tx_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidityOutcome {
    pub token_id: U256,
    pub liquidity: u128,
    pub amount0: U256,
    pub amount1: U256,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub tx_hash: B256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub amount_out_minimum: U256,
    pub tx_hash: B256,
}

/// What a bootstrap run did, state by state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapResult {
    pub completed: Vec<BootstrapState>,
    pub wrap: Option<WrapOutcome>,
    pub pool: Option<PoolOutcome>,
    pub liquidity: Option<LiquidityOutcome>,
    pub swap: Option<SwapOutcome>,
    pub warnings: Vec<DeploymentWarning>,
    /// The swap ran with a zero `amountOutMinimum`.
    pub unguarded_swap: bool,
}

struct StackAddresses {
    weth: Address,
    factory: Address,
    position_manager: Address,
    router: Address,
}

impl StackAddresses {
    fn from_record(record: &DeploymentRecord) -> Result<Self, BootstrapError> {
        let lookup = |name: &str| {
            record
                .address(name)
                .ok_or_else(|| BootstrapError::MissingContract {
                    name: name.to_string(),
                })
        };
        Ok(Self {
            weth: lookup(stack::WETH)?,
            factory: lookup(stack::FACTORY)?,
            position_manager: lookup(stack::POSITION_MANAGER)?,
            router: lookup(stack::ROUTER)?,
        })
    }
}

/// Runs [`BootstrapState`]s in order against a deployed stack.
///
/// The sequencer never writes the deployment record. A failing state stops the
/// run and earlier effects (wrapped balance, approvals, pool) stay in place.
pub struct BootstrapSequencer<C> {
    client: C,
    settings: BootstrapSettings,
    constraint: Option<AddressConstraint>,
}

impl<C: ChainClient> BootstrapSequencer<C> {
    pub fn new(client: C, settings: BootstrapSettings) -> Self {
        Self {
            client,
            settings,
            constraint: None,
        }
    }

    /// Check the pool address against `constraint`.
    pub fn with_constraint(mut self, constraint: AddressConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.settings
    }

    /// Run every state.
    pub async fn bootstrap(
        &self,
        record: &DeploymentRecord,
        plan: &PoolBootstrapPlan,
    ) -> Result<BootstrapResult, BootstrapError> {
        self.bootstrap_until(record, plan, BootstrapState::Swap)
            .await
    }

    /// Run states up to and including `last`.
    pub async fn bootstrap_until(
        &self,
        record: &DeploymentRecord,
        plan: &PoolBootstrapPlan,
        last: BootstrapState,
    ) -> Result<BootstrapResult, BootstrapError> {
        if last >= BootstrapState::Swap
            && self.settings.production
            && self.settings.amount_out_minimum.is_none()
        {
            return Err(BootstrapError::UnguardedSwap);
        }

        let stack = StackAddresses::from_record(record)?;
        let mut result = BootstrapResult::default();
        let mut state = Some(BootstrapState::FIRST);

        while let Some(current) = state {
            tracing::info!(state = %current, "Entering bootstrap state");

            match current {
                BootstrapState::WrapAsset => {
                    result.wrap = Some(self.wrap_asset(&stack).await?);
                }
                BootstrapState::EnsurePool => {
                    let pool = self.ensure_pool(&stack, plan).await?;
                    if let Some(warning) = self.check_pool_address(pool.pool) {
                        result.warnings.push(warning);
                    }
                    result.pool = Some(pool);
                }
                BootstrapState::AddLiquidity => {
                    let pool = required_pool(&result, current)?;
                    result.liquidity = Some(self.add_liquidity(&stack, pool).await?);
                }
                BootstrapState::Swap => {
                    let pool = required_pool(&result, current)?;
                    let (swap, unguarded) = self.swap(&stack, pool).await?;
                    result.unguarded_swap = unguarded;
                    result.swap = Some(swap);
                }
            }

            tracing::info!(state = %current, "Bootstrap state complete");
            result.completed.push(current);
            if current == last {
                break;
            }
            state = current.next();
        }

        Ok(result)
    }

    fn gas_limit(&self) -> Option<u64> {
        self.settings.gas_limit
    }

    fn deadline(&self) -> U256 {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        U256::from(now.saturating_add(self.settings.deadline_secs))
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        Ok(
            call_contract(&self.client, token, &IERC20::balanceOfCall { account: owner })
                .await?
                .balance,
        )
    }

    async fn allowance(&self, token: Address, spender: Address) -> Result<U256, ChainError> {
        let owner = self.client.sender();
        Ok(
            call_contract(&self.client, token, &IERC20::allowanceCall { owner, spender })
                .await?
                .remaining,
        )
    }

    async fn wrap_asset(&self, stack: &StackAddresses) -> Result<WrapOutcome, BootstrapError> {
        let state = BootstrapState::WrapAsset;
        let sender = self.client.sender();
        let amount = self.settings.wrap_amount;

        let balance_before = self
            .balance_of(stack.weth, sender)
            .await
            .map_err(failed(state))?;

        if amount.is_zero() {
            tracing::info!("Nothing to wrap");
            return Ok(WrapOutcome {
                amount,
                balance_before,
                balance_after: balance_before,
                tx_hash: None,
            });
        }

        let receipt = send_contract(
            &self.client,
            stack.weth,
            &IWETH9::depositCall {},
            amount,
            self.gas_limit(),
        )
        .await
        .map_err(failed(state))?;

        let balance_after = self
            .balance_of(stack.weth, sender)
            .await
            .map_err(failed(state))?;

        if balance_after.checked_sub(balance_before) != Some(amount) {
            return Err(BootstrapError::PostConditionFailed {
                state,
                reason: format!(
                    "wrapped balance went from {balance_before} to {balance_after}, expected +{amount}"
                ),
            });
        }

        tracing::info!(
            %amount,
            %balance_after,
            tx_hash = %receipt.transaction_hash,
            "Native asset wrapped"
        );

        Ok(WrapOutcome {
            amount,
            balance_before,
            balance_after,
            tx_hash: Some(receipt.transaction_hash),
        })
    }

    async fn ensure_pool(
        &self,
        stack: &StackAddresses,
        plan: &PoolBootstrapPlan,
    ) -> Result<PoolOutcome, BootstrapError> {
        let state = BootstrapState::EnsurePool;
        let (token0, token1) = plan.canonical_pair();
        if token0 == token1 {
            return Err(BootstrapError::PostConditionFailed {
                state,
                reason: format!("pool needs two distinct tokens, got {token0} twice"),
            });
        }
        let fee = U24::saturating_from(plan.fee.fee());

        let spacing = call_contract(
            &self.client,
            stack.factory,
            &IUniswapV3Factory::feeAmountTickSpacingCall { fee },
        )
        .await
        .map_err(failed(state))?
        .tickSpacing;
        let tick_spacing = tick_to_i32(state, spacing)?;
        if tick_spacing <= 0 {
            return Err(BootstrapError::PostConditionFailed {
                state,
                reason: format!("fee tier {} is not enabled on the factory", plan.fee),
            });
        }

        let existing = self.get_pool(stack, token0, token1, fee).await?;
        if !is_unset(&existing) {
            tracing::info!(pool = %existing, %token0, %token1, fee = %plan.fee, "Pool already exists");
            return Ok(PoolOutcome {
                pool: existing,
                token0,
                token1,
                fee: plan.fee,
                tick_spacing,
                created: false,
                sqrt_price_x96: None,
                tx_hash: None,
            });
        }

        let sqrt_price_x96 = encode_sqrt_price_x96(plan.canonical_price())
            .map_err(|source| BootstrapError::InvalidPrice { state, source })?;

        tracing::info!(%token0, %token1, fee = %plan.fee, %sqrt_price_x96, "Creating pool");

        let receipt = send_contract(
            &self.client,
            stack.position_manager,
            &INonfungiblePositionManager::createAndInitializePoolIfNecessaryCall {
                token0,
                token1,
                fee,
                sqrtPriceX96: U160::saturating_from(sqrt_price_x96),
            },
            U256::ZERO,
            self.gas_limit(),
        )
        .await
        .map_err(failed(state))?;

        // The pool address comes from the factory: on sharded chains it is
        // ground into range and cannot be predicted.
        let pool = self.get_pool(stack, token0, token1, fee).await?;
        if is_unset(&pool) {
            return Err(BootstrapError::PostConditionFailed {
                state,
                reason: "factory has no pool after creation".to_string(),
            });
        }

        tracing::info!(
            %pool,
            zone = %Zone::from_address(pool),
            tx_hash = %receipt.transaction_hash,
            "Pool created"
        );

        Ok(PoolOutcome {
            pool,
            token0,
            token1,
            fee: plan.fee,
            tick_spacing,
            created: true,
            sqrt_price_x96: Some(sqrt_price_x96),
            tx_hash: Some(receipt.transaction_hash),
        })
    }

    async fn get_pool(
        &self,
        stack: &StackAddresses,
        token0: Address,
        token1: Address,
        fee: U24,
    ) -> Result<Address, BootstrapError> {
        Ok(call_contract(
            &self.client,
            stack.factory,
            &IUniswapV3Factory::getPoolCall {
                tokenA: token0,
                tokenB: token1,
                fee,
            },
        )
        .await
        .map_err(failed(BootstrapState::EnsurePool))?
        .pool)
    }

    fn check_pool_address(&self, pool: Address) -> Option<DeploymentWarning> {
        match self.constraint.as_ref()?.validate(pool) {
            Validation::Ok => {
                tracing::info!(%pool, "Pool address is in the configured shard range");
                None
            }
            Validation::Violation(violation) => {
                tracing::warn!(%violation, "Pool address is outside the configured shard range");
                Some(DeploymentWarning::AddressConstraint {
                    logical_name: "pool".to_string(),
                    violation,
                })
            }
        }
    }

    /// Make sure `spender` may move `amount` of `token` for the sender.
    async fn ensure_allowance(
        &self,
        state: BootstrapState,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), BootstrapError> {
        let current = self
            .allowance(token, spender)
            .await
            .map_err(failed(state))?;
        if current >= amount {
            return Ok(());
        }

        if !self.settings.grant_approvals {
            return Err(BootstrapError::SlippageOrApprovalFailure {
                state,
                reason: format!(
                    "allowance of {spender} on token {token} is {current}, {amount} required"
                ),
            });
        }

        let approve_amount = if self.settings.unlimited_approvals {
            U256::MAX
        } else {
            amount
        };
        tracing::info!(%token, %spender, amount = %approve_amount, "Approving token");

        send_contract(
            &self.client,
            token,
            &IERC20::approveCall {
                spender,
                amount: approve_amount,
            },
            U256::ZERO,
            self.gas_limit(),
        )
        .await
        .map_err(guarded(state))?;

        let granted = self
            .allowance(token, spender)
            .await
            .map_err(failed(state))?;
        if granted < amount {
            return Err(BootstrapError::SlippageOrApprovalFailure {
                state,
                reason: format!("approval of {spender} on token {token} left allowance at {granted}"),
            });
        }
        Ok(())
    }

    async fn add_liquidity(
        &self,
        stack: &StackAddresses,
        pool: &PoolOutcome,
    ) -> Result<LiquidityOutcome, BootstrapError> {
        let state = BootstrapState::AddLiquidity;

        let slot0 = call_contract(&self.client, pool.pool, &IUniswapV3Pool::slot0Call {})
            .await
            .map_err(failed(state))?;
        let current_tick = tick_to_i32(state, slot0.tick)?;
        let (tick_lower, tick_upper) = tick_range(
            current_tick,
            pool.tick_spacing,
            self.settings.tick_range_multiplier,
        );

        let amount0_desired = self.settings.amount0_desired;
        let amount1_desired = self.settings.amount1_desired;
        let amount0_min = apply_slippage(amount0_desired, self.settings.slippage_bps);
        let amount1_min = apply_slippage(amount1_desired, self.settings.slippage_bps);

        self.ensure_allowance(state, pool.token0, stack.position_manager, amount0_desired)
            .await?;
        self.ensure_allowance(state, pool.token1, stack.position_manager, amount1_desired)
            .await?;

        let call = INonfungiblePositionManager::mintCall {
            params: INonfungiblePositionManager::MintParams {
                token0: pool.token0,
                token1: pool.token1,
                fee: U24::saturating_from(pool.fee.fee()),
                tickLower: tick_from_i32(state, tick_lower)?,
                tickUpper: tick_from_i32(state, tick_upper)?,
                amount0Desired: amount0_desired,
                amount1Desired: amount1_desired,
                amount0Min: amount0_min,
                amount1Min: amount1_min,
                recipient: self.client.sender(),
                deadline: self.deadline(),
            },
        };

        tracing::info!(
            pool = %pool.pool,
            current_tick,
            tick_lower,
            tick_upper,
            %amount0_desired,
            %amount1_desired,
            %amount0_min,
            %amount1_min,
            "Adding liquidity"
        );

        // Dry run first so a slippage revert is reported without spending gas.
        let expected = call_contract(&self.client, stack.position_manager, &call)
            .await
            .map_err(guarded(state))?;
        if expected.amount0 < amount0_min || expected.amount1 < amount1_min {
            return Err(BootstrapError::SlippageOrApprovalFailure {
                state,
                reason: format!(
                    "mint would use {}/{} but at least {amount0_min}/{amount1_min} is required",
                    expected.amount0, expected.amount1
                ),
            });
        }

        let receipt = send_contract(
            &self.client,
            stack.position_manager,
            &call,
            U256::ZERO,
            self.gas_limit(),
        )
        .await
        .map_err(guarded(state))?;

        tracing::info!(
            token_id = %expected.tokenId,
            liquidity = expected.liquidity,
            tx_hash = %receipt.transaction_hash,
            "Liquidity added"
        );

        Ok(LiquidityOutcome {
            token_id: expected.tokenId,
            liquidity: expected.liquidity,
            amount0: expected.amount0,
            amount1: expected.amount1,
            tick_lower,
            tick_upper,
            tx_hash: receipt.transaction_hash,
        })
    }

    async fn swap(
        &self,
        stack: &StackAddresses,
        pool: &PoolOutcome,
    ) -> Result<(SwapOutcome, bool), BootstrapError> {
        let state = BootstrapState::Swap;
        let sender = self.client.sender();
        let (token_in, token_out) = (pool.token0, pool.token1);
        let amount_in = self.settings.swap_amount_in;

        let (amount_out_minimum, unguarded) = match self.settings.amount_out_minimum {
            Some(minimum) => (minimum, false),
            None if self.settings.production => return Err(BootstrapError::UnguardedSwap),
            None => {
                tracing::warn!(
                    "Swapping with amountOutMinimum = 0; acceptable for non-production runs only"
                );
                (U256::ZERO, true)
            }
        };

        self.ensure_allowance(state, token_in, stack.router, amount_in)
            .await?;

        let (in_before, out_before) = futures::try_join!(
            self.balance_of(token_in, sender),
            self.balance_of(token_out, sender)
        )
        .map_err(failed(state))?;

        let call = ISwapRouter::exactInputSingleCall {
            params: ISwapRouter::ExactInputSingleParams {
                tokenIn: token_in,
                tokenOut: token_out,
                fee: U24::saturating_from(pool.fee.fee()),
                recipient: sender,
                deadline: self.deadline(),
                amountIn: amount_in,
                amountOutMinimum: amount_out_minimum,
                sqrtPriceLimitX96: U160::saturating_from(
                    self.settings.sqrt_price_limit_x96.unwrap_or(U256::ZERO),
                ),
            },
        };

        tracing::info!(%token_in, %token_out, %amount_in, %amount_out_minimum, "Swapping");

        let receipt = send_contract(
            &self.client,
            stack.router,
            &call,
            U256::ZERO,
            self.gas_limit(),
        )
        .await
        .map_err(guarded(state))?;

        let (in_after, out_after) = futures::try_join!(
            self.balance_of(token_in, sender),
            self.balance_of(token_out, sender)
        )
        .map_err(failed(state))?;

        if in_before.checked_sub(in_after) != Some(amount_in) {
            return Err(BootstrapError::PostConditionFailed {
                state,
                reason: format!(
                    "input balance went from {in_before} to {in_after}, expected -{amount_in}"
                ),
            });
        }
        let amount_out = out_after.saturating_sub(out_before);
        if amount_out < amount_out_minimum {
            return Err(BootstrapError::PostConditionFailed {
                state,
                reason: format!("received {amount_out}, below minimum {amount_out_minimum}"),
            });
        }

        tracing::info!(
            %amount_in,
            %amount_out,
            tx_hash = %receipt.transaction_hash,
            "Swap executed"
        );

        Ok((
            SwapOutcome {
                token_in,
                token_out,
                amount_in,
                amount_out,
                amount_out_minimum,
                tx_hash: receipt.transaction_hash,
            },
            unguarded,
        ))
    }
}

fn required_pool(
    result: &BootstrapResult,
    state: BootstrapState,
) -> Result<&PoolOutcome, BootstrapError> {
    result
        .pool
        .as_ref()
        .ok_or_else(|| BootstrapError::PostConditionFailed {
            state,
            reason: "no pool from a previous state".to_string(),
        })
}

/// `amount` reduced by `bps` basis points.
fn apply_slippage(amount: U256, bps: u32) -> U256 {
    let keep = U256::from(10_000u32.saturating_sub(bps));
    let scale = U256::from(10_000u32);
    match amount.checked_mul(keep) {
        Some(product) => product / scale,
        None => amount / scale * keep,
    }
}

fn tick_to_i32(state: BootstrapState, tick: I24) -> Result<i32, BootstrapError> {
    i32::try_from(tick).map_err(|e| BootstrapError::PostConditionFailed {
        state,
        reason: format!("tick {tick} does not fit an i32: {e}"),
    })
}

fn tick_from_i32(state: BootstrapState, tick: i32) -> Result<I24, BootstrapError> {
    I24::try_from(tick).map_err(|e| BootstrapError::PostConditionFailed {
        state,
        reason: format!("tick {tick} does not fit an int24: {e}"),
    })
}

/// Map a chain failure to a failure of `state`.
fn failed(state: BootstrapState) -> impl Fn(ChainError) -> BootstrapError {
    move |cause| BootstrapError::StateFailed { state, cause }
}

/// Like [`failed`], but a revert means the guarded operation was refused.
fn guarded(state: BootstrapState) -> impl Fn(ChainError) -> BootstrapError {
    move |cause| match cause {
        ChainError::Reverted { tx_hash } => BootstrapError::SlippageOrApprovalFailure {
            state,
            reason: format!("transaction {tx_hash} reverted"),
        },
        ChainError::Rpc { message, .. } if message.contains("revert") => {
            BootstrapError::SlippageOrApprovalFailure {
                state,
                reason: message,
            }
        }
        cause => BootstrapError::StateFailed { state, cause },
    }
}
