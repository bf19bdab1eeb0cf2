//! Q64.96 square-root price encoding.

use alloy_core::primitives::{U256, U512, uint};
use serde::{Deserialize, Serialize};

/// `2^96`: the encoding of a 1:1 price.
pub const Q96: U256 = uint!(79228162514264337593543950336_U256);

/// Smallest sqrt price a pool accepts (at tick -887272).
pub const MIN_SQRT_RATIO: U256 = uint!(4295128739_U256);

/// Exclusive upper bound of the sqrt price (at tick 887272).
pub const MAX_SQRT_RATIO: U256 =
    uint!(1461446703485210103287273052203988822378723970342_U256);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("price ratio {reserve1}/{reserve0} has a zero side")]
    ZeroReserve { reserve0: U256, reserve1: U256 },
    #[error("sqrt price {sqrt_price_x96} is outside the range a pool accepts")]
    OutOfRange { sqrt_price_x96: U512 },
}

/// Price of token0 in token1, as `reserve1 / reserve0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRatio {
    pub reserve0: U256,
    pub reserve1: U256,
}

impl Default for PriceRatio {
    fn default() -> Self {
        Self::one()
    }
}

impl PriceRatio {
    pub fn new(reserve1: U256, reserve0: U256) -> Self {
        Self { reserve0, reserve1 }
    }

    pub fn one() -> Self {
        Self::new(U256::from(1u8), U256::from(1u8))
    }

    pub fn is_one(&self) -> bool {
        self.reserve0 == self.reserve1 && !self.reserve0.is_zero()
    }

    /// The same price seen from the other token.
    pub fn inverted(&self) -> Self {
        Self::new(self.reserve0, self.reserve1)
    }
}

/// `sqrt(reserve1 / reserve0) * 2^96`, rounded down.
///
/// Computed as the integer square root of `(reserve1 << 192) / reserve0`, so
/// the only rounding is the final floor.
pub fn encode_sqrt_price_x96(ratio: PriceRatio) -> Result<U256, PriceError> {
    if ratio.reserve0.is_zero() || ratio.reserve1.is_zero() {
        return Err(PriceError::ZeroReserve {
            reserve0: ratio.reserve0,
            reserve1: ratio.reserve1,
        });
    }
    if ratio.is_one() {
        return Ok(Q96);
    }

    let scaled = (U512::from(ratio.reserve1) << 192) / U512::from(ratio.reserve0);
    let sqrt = isqrt(scaled);

    if sqrt < U512::from(MIN_SQRT_RATIO) || sqrt >= U512::from(MAX_SQRT_RATIO) {
        return Err(PriceError::OutOfRange {
            sqrt_price_x96: sqrt,
        });
    }
    Ok(sqrt.to::<U256>())
}

/// Square of a Q64.96 sqrt price: the price as a Q128.192 number.
pub fn decode_price_x192(sqrt_price_x96: U256) -> U512 {
    let sqrt = U512::from(sqrt_price_x96);
    sqrt * sqrt
}

/// Integer square root by Newton's method.
fn isqrt(n: U512) -> U512 {
    if n < U512::from(2u8) {
        return n;
    }
    let mut x = n;
    let mut y = (x + U512::from(1u8)) >> 1;
    while y < x {
        x = y;
        y = (x + n / x) >> 1;
    }
    x
}
