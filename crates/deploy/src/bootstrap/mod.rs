//! Post-deployment bootstrap: wrap the native asset, create a pool, add
//! liquidity and swap through it.

mod pool;
pub use pool::{FeeTier, MAX_TICK, MIN_TICK, PoolBootstrapPlan, tick_range};

mod price;
pub use price::{
    MAX_SQRT_RATIO, MIN_SQRT_RATIO, PriceError, PriceRatio, Q96, decode_price_x192,
    encode_sqrt_price_x96,
};

mod sequencer;
pub use sequencer::{
    BootstrapResult, BootstrapSequencer, BootstrapSettings, LiquidityOutcome, PoolOutcome,
    SwapOutcome, WrapOutcome,
};

/// Bootstrap states, run in declaration order. Each one only starts once the
/// previous one succeeded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumIter,
)]
pub enum BootstrapState {
    WrapAsset,
    EnsurePool,
    AddLiquidity,
    Swap,
}

impl BootstrapState {
    pub const FIRST: Self = Self::WrapAsset;

    pub fn next(self) -> Option<Self> {
        match self {
            Self::WrapAsset => Some(Self::EnsurePool),
            Self::EnsurePool => Some(Self::AddLiquidity),
            Self::AddLiquidity => Some(Self::Swap),
            Self::Swap => None,
        }
    }
}
