use std::fmt;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use super::price::PriceRatio;

/// Lowest tick a position may use.
pub const MIN_TICK: i32 = -887_272;
/// Highest tick a position may use.
pub const MAX_TICK: i32 = 887_272;

/// Pool fee in hundredths of a basis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeTier(u32);

impl FeeTier {
    pub const LOW: Self = Self(500);
    pub const MEDIUM: Self = Self(3000);
    pub const HIGH: Self = Self(10_000);

    pub fn new(fee: u32) -> Self {
        Self(fee)
    }

    pub fn fee(&self) -> u32 {
        self.0
    }

    /// Tick spacing the factory enables for this fee by default. Custom fees
    /// have none; their spacing must be read from the factory.
    pub fn standard_tick_spacing(&self) -> Option<i32> {
        match self.0 {
            500 => Some(10),
            3000 => Some(60),
            10_000 => Some(200),
            _ => None,
        }
    }
}

impl Default for FeeTier {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}% ({})", f64::from(self.0) / 10_000.0, self.0)
    }
}

/// A pool to create (or find) and bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolBootstrapPlan {
    pub token_a: Address,
    pub token_b: Address,
    pub fee: FeeTier,
    /// Price of `token_a` expressed in `token_b`.
    pub initial_price: PriceRatio,
}

impl PoolBootstrapPlan {
    pub fn new(token_a: Address, token_b: Address, fee: FeeTier) -> Self {
        Self {
            token_a,
            token_b,
            fee,
            initial_price: PriceRatio::one(),
        }
    }

    pub fn with_initial_price(mut self, price: PriceRatio) -> Self {
        self.initial_price = price;
        self
    }

    /// `(token0, token1)` with `token0 < token1`.
    pub fn canonical_pair(&self) -> (Address, Address) {
        if self.token_a < self.token_b {
            (self.token_a, self.token_b)
        } else {
            (self.token_b, self.token_a)
        }
    }

    /// Initial price of token0 in token1.
    pub fn canonical_price(&self) -> PriceRatio {
        if self.token_a <= self.token_b {
            self.initial_price
        } else {
            self.initial_price.inverted()
        }
    }
}

/// `[lower, upper]` spanning `multiplier` spacings on each side of the spacing
/// boundary at or below `current_tick`, clamped to the usable range.
pub fn tick_range(current_tick: i32, tick_spacing: i32, multiplier: u32) -> (i32, i32) {
    let spacing = tick_spacing.max(1);
    let width = spacing.saturating_mul(i32::try_from(multiplier.max(1)).unwrap_or(i32::MAX));
    let base = current_tick.div_euclid(spacing) * spacing;

    // Usable bounds are the spacing multiples inside [MIN_TICK, MAX_TICK].
    let min_usable = -(MAX_TICK.div_euclid(spacing) * spacing);
    let max_usable = MAX_TICK.div_euclid(spacing) * spacing;

    let mut lower = base.saturating_sub(width).max(min_usable);
    let mut upper = base.saturating_add(width).min(max_usable);

    // Clamping next to a bound can collapse the range; widen the other side.
    if upper <= lower {
        if lower == min_usable {
            upper = lower.saturating_add(width).min(max_usable);
        } else {
            lower = upper.saturating_sub(width).max(min_usable);
        }
    }
    (lower, upper)
}
