//! Solidity interfaces of the DEX stack and typed call helpers over a
//! [`ChainClient`].

use alloy_core::primitives::{Address, Bytes, U256};
use alloy_sol_types::{SolCall, sol};

use crate::{
    client::{ChainClient, TxReceipt, TxRequest, TxStatus},
    error::ChainError,
};

sol! {
    interface IWETH9 {
        function deposit() external payable;
        function withdraw(uint256 wad) external;
    }

    interface IERC20 {
        function decimals() external view returns (uint8 decimals);
        function balanceOf(address account) external view returns (uint256 balance);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
        function approve(address spender, uint256 amount) external returns (bool approved);
        function transfer(address recipient, uint256 amount) external returns (bool sent);
    }

    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
        function feeAmountTickSpacing(uint24 fee) external view returns (int24 tickSpacing);
    }

    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
    }

    interface INonfungiblePositionManager {
        struct MintParams {
            address token0;
            address token1;
            uint24 fee;
            int24 tickLower;
            int24 tickUpper;
            uint256 amount0Desired;
            uint256 amount1Desired;
            uint256 amount0Min;
            uint256 amount1Min;
            address recipient;
            uint256 deadline;
        }

        function createAndInitializePoolIfNecessary(
            address token0,
            address token1,
            uint24 fee,
            uint160 sqrtPriceX96
        ) external payable returns (address pool);

        function mint(MintParams calldata params) external payable returns (
            uint256 tokenId,
            uint128 liquidity,
            uint256 amount0,
            uint256 amount1
        );
    }

    interface ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut);
    }
}

/// Run a read-only call and decode its return values.
pub async fn call_contract<Client, Call>(
    client: &Client,
    to: Address,
    call: &Call,
) -> Result<Call::Return, ChainError>
where
    Client: ChainClient,
    Call: SolCall + Sync,
{
    let output = client.call(to, Bytes::from(call.abi_encode())).await?;
    Call::abi_decode_returns(&output, true).map_err(|e| ChainError::Decode {
        what: format!("{} return data from {to}", Call::SIGNATURE),
        message: e.to_string(),
    })
}

/// Submit a state-changing call and wait for its receipt.
///
/// A reverted receipt is turned into [`ChainError::Reverted`].
pub async fn send_contract<Client, Call>(
    client: &Client,
    to: Address,
    call: &Call,
    value: U256,
    gas_limit: Option<u64>,
) -> Result<TxReceipt, ChainError>
where
    Client: ChainClient,
    Call: SolCall + Sync,
{
    let tx_hash = client
        .send(TxRequest {
            to,
            data: Bytes::from(call.abi_encode()),
            value,
            gas_limit,
        })
        .await?;

    tracing::debug!(%tx_hash, %to, method = Call::SIGNATURE, "Transaction broadcasted");

    let receipt = client.wait_for_receipt(tx_hash).await?;
    ensure_confirmed(&receipt)?;
    Ok(receipt)
}

fn ensure_confirmed(receipt: &TxReceipt) -> Result<(), ChainError> {
    match receipt.status {
        TxStatus::Confirmed => Ok(()),
        TxStatus::Reverted => Err(ChainError::Reverted {
            tx_hash: receipt.transaction_hash,
        }),
    }
}

/// The zero address the factory returns for pools that do not exist.
pub fn is_unset(address: &Address) -> bool {
    *address == Address::ZERO
}
