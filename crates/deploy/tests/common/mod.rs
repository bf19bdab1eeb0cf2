//! In-memory chain shared by the integration tests.
//!
//! `MockChain` executes just enough of WETH9, ERC-20, the factory, the pool,
//! the position manager and the router for the orchestrator and the bootstrap
//! sequencer to run end to end. Calls are decoded with the same `sol!`
//! interfaces the library encodes them with.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    json_abi::JsonAbi,
    primitives::{
        Address, B256, Bytes, U256,
        aliases::{I24, U160},
    },
};
use alloy_sol_types::SolCall;
use shardswap_deploy::{
    ArtifactLoader, ArtifactSource, ChainClient, ChainError, ContractArtifact, DeployError,
    PendingDeployment, TxReceipt, TxRequest, TxStatus,
    contracts::{
        IERC20, INonfungiblePositionManager, ISwapRouter, IUniswapV3Factory, IUniswapV3Pool,
        IWETH9,
    },
    inline_artifact,
};
use tokio::sync::watch;

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

pub fn deployer() -> Address {
    "0x00a3e45aa16163F2663015b6695894D918866d19"
        .parse()
        .unwrap()
}

/// Artifacts whose creation code starts with `<Name>:` so the mock chain can
/// tell what is being deployed.
pub struct TestLoader;

impl ArtifactLoader for TestLoader {
    fn resolve(&self, name: &str, source: ArtifactSource) -> Result<ContractArtifact, DeployError> {
        if source == ArtifactSource::Inline {
            return inline_artifact(name);
        }

        let constructor = match name {
            "NonfungiblePositionManager" => {
                Some("constructor(address factory, address weth, address descriptor)")
            }
            "SwapRouter" => Some("constructor(address factory, address weth)"),
            "TestToken" => Some("constructor(string name, string symbol, uint256 supply)"),
            _ => None,
        };
        let abi = match constructor {
            Some(signature) => JsonAbi::parse([signature]).unwrap(),
            None => JsonAbi::default(),
        };

        Ok(ContractArtifact {
            name: name.to_string(),
            abi,
            bytecode: Bytes::from(format!("{name}:").into_bytes()),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct TokenState {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl TokenState {
    fn balance(&self, owner: Address) -> U256 {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    fn credit(&mut self, owner: Address, amount: U256) {
        *self.balances.entry(owner).or_default() += amount;
    }

    fn debit(&mut self, owner: Address, amount: U256) -> Result<(), String> {
        let balance = self.balance(owner);
        if balance < amount {
            return Err("insufficient balance".to_string());
        }
        self.balances.insert(owner, balance - amount);
        Ok(())
    }

    fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), String> {
        let allowance = self
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default();
        if allowance < amount {
            return Err("insufficient allowance".to_string());
        }
        if allowance != U256::MAX {
            self.allowances.insert((owner, spender), allowance - amount);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PoolState {
    token0: Address,
    token1: Address,
    fee: u32,
    sqrt_price_x96: U256,
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    nonce: u64,
    native: HashMap<Address, U256>,
    tokens: HashMap<Address, TokenState>,
    weth: HashSet<Address>,
    factories: HashMap<Address, HashMap<(Address, Address, u32), Address>>,
    /// Position manager and router address -> factory address.
    managers: HashMap<Address, Address>,
    routers: HashMap<Address, Address>,
    pools: HashMap<Address, PoolState>,
    opaque: HashSet<Address>,
    next_token_id: u64,
    /// Share of the desired amounts a mint actually uses, in basis points.
    mint_fill_bps: u32,
}

impl ChainState {
    fn token(&mut self, address: Address) -> Result<&mut TokenState, String> {
        self.tokens
            .get_mut(&address)
            .ok_or_else(|| format!("no token at {address}"))
    }

    fn transfer_from(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), String> {
        let token = self.token(token)?;
        token.spend_allowance(owner, spender, amount)?;
        token.debit(owner, amount)?;
        token.credit(to, amount);
        Ok(())
    }

    fn create(&mut self, init_code: &[u8], from: Address, address: Address) -> Result<(), String> {
        let split = |prefix: &str| init_code.strip_prefix(format!("{prefix}:").as_bytes());

        if split("WETH9").is_some() {
            self.tokens.insert(address, TokenState::default());
            self.weth.insert(address);
        } else if split("UniswapV3Factory").is_some() {
            self.factories.insert(address, HashMap::new());
        } else if let Some(args) = split("NonfungiblePositionManager") {
            let args = decode_args(args, vec![DynSolType::Address; 3])?;
            self.managers.insert(address, as_address(&args[0])?);
        } else if let Some(args) = split("SwapRouter") {
            let args = decode_args(args, vec![DynSolType::Address; 2])?;
            self.routers.insert(address, as_address(&args[0])?);
        } else if let Some(args) = split("TestToken") {
            let args = decode_args(
                args,
                vec![DynSolType::String, DynSolType::String, DynSolType::Uint(256)],
            )?;
            let (supply, _) = args[2].as_uint().ok_or("bad supply")?;
            let mut token = TokenState::default();
            token.credit(from, supply);
            self.tokens.insert(address, token);
        } else {
            self.opaque.insert(address);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        from: Address,
        to: Address,
        data: &[u8],
        value: U256,
    ) -> Result<Vec<u8>, String> {
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or("missing selector")?;

        if let Some(native) = self.native.get_mut(&from) {
            if *native < value {
                return Err("insufficient native balance".to_string());
            }
            *native -= value;
        }

        if self.tokens.contains_key(&to) {
            self.token_call(from, to, selector, data, value)
        } else if self.factories.contains_key(&to) {
            self.factory_call(to, selector, data)
        } else if let Some(factory) = self.managers.get(&to).copied() {
            self.manager_call(from, to, factory, selector, data)
        } else if let Some(factory) = self.routers.get(&to).copied() {
            self.router_call(from, to, factory, selector, data)
        } else if let Some(pool) = self.pools.get(&to) {
            if selector != IUniswapV3Pool::slot0Call::SELECTOR {
                return Err("unknown pool method".to_string());
            }
            Ok(IUniswapV3Pool::slot0Call::abi_encode_returns(&(
                U160::saturating_from(pool.sqrt_price_x96),
                I24::ZERO,
                0u16,
                1u16,
                1u16,
                0u8,
                true,
            )))
        } else {
            Err(format!("no callable contract at {to}"))
        }
    }

    fn token_call(
        &mut self,
        from: Address,
        to: Address,
        selector: [u8; 4],
        data: &[u8],
        value: U256,
    ) -> Result<Vec<u8>, String> {
        let is_weth = self.weth.contains(&to);
        let token = self.token(to)?;

        match selector {
            IWETH9::depositCall::SELECTOR if is_weth => {
                token.credit(from, value);
                Ok(IWETH9::depositCall::abi_encode_returns(&()))
            }
            IERC20::balanceOfCall::SELECTOR => {
                let call = decode::<IERC20::balanceOfCall>(data)?;
                Ok(IERC20::balanceOfCall::abi_encode_returns(&(
                    token.balance(call.account),
                )))
            }
            IERC20::allowanceCall::SELECTOR => {
                let call = decode::<IERC20::allowanceCall>(data)?;
                let remaining = token
                    .allowances
                    .get(&(call.owner, call.spender))
                    .copied()
                    .unwrap_or_default();
                Ok(IERC20::allowanceCall::abi_encode_returns(&(remaining,)))
            }
            IERC20::approveCall::SELECTOR => {
                let call = decode::<IERC20::approveCall>(data)?;
                token.allowances.insert((from, call.spender), call.amount);
                Ok(IERC20::approveCall::abi_encode_returns(&(true,)))
            }
            IERC20::transferCall::SELECTOR => {
                let call = decode::<IERC20::transferCall>(data)?;
                token.debit(from, call.amount)?;
                token.credit(call.recipient, call.amount);
                Ok(IERC20::transferCall::abi_encode_returns(&(true,)))
            }
            IERC20::decimalsCall::SELECTOR => Ok(IERC20::decimalsCall::abi_encode_returns(&(18u8,))),
            _ => Err("unknown token method".to_string()),
        }
    }

    fn factory_call(
        &mut self,
        factory: Address,
        selector: [u8; 4],
        data: &[u8],
    ) -> Result<Vec<u8>, String> {
        match selector {
            IUniswapV3Factory::getPoolCall::SELECTOR => {
                let call = decode::<IUniswapV3Factory::getPoolCall>(data)?;
                let (a, b) = if call.tokenA < call.tokenB {
                    (call.tokenA, call.tokenB)
                } else {
                    (call.tokenB, call.tokenA)
                };
                let pool = self.factories[&factory]
                    .get(&(a, b, call.fee.to::<u32>()))
                    .copied()
                    .unwrap_or_default();
                Ok(IUniswapV3Factory::getPoolCall::abi_encode_returns(&(pool,)))
            }
            IUniswapV3Factory::feeAmountTickSpacingCall::SELECTOR => {
                let call = decode::<IUniswapV3Factory::feeAmountTickSpacingCall>(data)?;
                let spacing: i32 = match call.fee.to::<u32>() {
                    500 => 10,
                    3000 => 60,
                    10_000 => 200,
                    _ => 0,
                };
                Ok(
                    IUniswapV3Factory::feeAmountTickSpacingCall::abi_encode_returns(&(
                        I24::try_from(spacing).unwrap(),
                    )),
                )
            }
            _ => Err("unknown factory method".to_string()),
        }
    }

    fn manager_call(
        &mut self,
        from: Address,
        manager: Address,
        factory: Address,
        selector: [u8; 4],
        data: &[u8],
    ) -> Result<Vec<u8>, String> {
        match selector {
            INonfungiblePositionManager::createAndInitializePoolIfNecessaryCall::SELECTOR => {
                let call =
                    decode::<INonfungiblePositionManager::createAndInitializePoolIfNecessaryCall>(
                        data,
                    )?;
                if call.token0 >= call.token1 {
                    return Err("token0 must sort before token1".to_string());
                }
                let fee = call.fee.to::<u32>();
                let key = (call.token0, call.token1, fee);

                let pools = self.factories.get_mut(&factory).ok_or("no factory")?;
                let pool = match pools.get(&key) {
                    Some(pool) => *pool,
                    None => {
                        // Ground into the 0x00 shard, like the factory does on
                        // sharded chains.
                        let mut bytes = [0u8; 20];
                        bytes[1] = 0x42;
                        bytes[19] = u8::try_from(pools.len() + 1).unwrap_or(u8::MAX);
                        let pool = Address::from(bytes);
                        pools.insert(key, pool);
                        self.pools.insert(
                            pool,
                            PoolState {
                                token0: call.token0,
                                token1: call.token1,
                                fee,
                                sqrt_price_x96: U256::from(call.sqrtPriceX96),
                            },
                        );
                        pool
                    }
                };
                Ok(
                    INonfungiblePositionManager::createAndInitializePoolIfNecessaryCall::abi_encode_returns(
                        &(pool,),
                    ),
                )
            }
            INonfungiblePositionManager::mintCall::SELECTOR => {
                let params = decode::<INonfungiblePositionManager::mintCall>(data)?.params;
                let pool = self.factories[&factory]
                    .get(&(params.token0, params.token1, params.fee.to::<u32>()))
                    .copied()
                    .ok_or("pool does not exist")?;
                if params.tickLower >= params.tickUpper {
                    return Err("invalid tick range".to_string());
                }

                let fill = U256::from(self.mint_fill_bps);
                let amount0 = params.amount0Desired * fill / U256::from(10_000u32);
                let amount1 = params.amount1Desired * fill / U256::from(10_000u32);
                if amount0 < params.amount0Min || amount1 < params.amount1Min {
                    return Err("Price slippage check".to_string());
                }

                self.transfer_from(params.token0, from, manager, pool, amount0)?;
                self.transfer_from(params.token1, from, manager, pool, amount1)?;

                self.next_token_id += 1;
                Ok(INonfungiblePositionManager::mintCall::abi_encode_returns(&(
                    U256::from(self.next_token_id),
                    1_000_000u128,
                    amount0,
                    amount1,
                )))
            }
            _ => Err("unknown position manager method".to_string()),
        }
    }

    fn router_call(
        &mut self,
        from: Address,
        router: Address,
        factory: Address,
        selector: [u8; 4],
        data: &[u8],
    ) -> Result<Vec<u8>, String> {
        if selector != ISwapRouter::exactInputSingleCall::SELECTOR {
            return Err("unknown router method".to_string());
        }
        let params = decode::<ISwapRouter::exactInputSingleCall>(data)?.params;
        let (a, b) = if params.tokenIn < params.tokenOut {
            (params.tokenIn, params.tokenOut)
        } else {
            (params.tokenOut, params.tokenIn)
        };
        let pool = self.factories[&factory]
            .get(&(a, b, params.fee.to::<u32>()))
            .copied()
            .ok_or("pool does not exist")?;

        // Constant 0.3% haircut, capped by what the pool holds.
        let reserve_out = self.token(params.tokenOut)?.balance(pool);
        let amount_out = (params.amountIn * U256::from(997u32) / U256::from(1000u32))
            .min(reserve_out);
        if amount_out < params.amountOutMinimum {
            return Err("Too little received".to_string());
        }

        self.transfer_from(params.tokenIn, from, router, pool, params.amountIn)?;
        let out = self.token(params.tokenOut)?;
        out.debit(pool, amount_out)?;
        out.credit(params.recipient, amount_out);

        Ok(ISwapRouter::exactInputSingleCall::abi_encode_returns(&(
            amount_out,
        )))
    }
}

fn decode<C: SolCall>(data: &[u8]) -> Result<C, String> {
    C::abi_decode(data, true).map_err(|e| e.to_string())
}

fn decode_args(data: &[u8], types: Vec<DynSolType>) -> Result<Vec<DynSolValue>, String> {
    match DynSolType::Tuple(types).abi_decode_params(data) {
        Ok(DynSolValue::Tuple(values)) => Ok(values),
        Ok(other) => Err(format!("unexpected constructor arguments {other:?}")),
        Err(e) => Err(e.to_string()),
    }
}

fn as_address(value: &DynSolValue) -> Result<Address, String> {
    value.as_address().ok_or_else(|| "expected address".to_string())
}

/// Knobs and counters that survive dry runs.
#[derive(Default)]
struct Controls {
    mutations: usize,
    deploys: usize,
    tx_counter: u64,
    /// 1-based index of the deployment that reverts.
    revert_deploy: Option<usize>,
    /// 1-based index of the deployment whose receipt is withheld.
    withhold_deploy: Option<usize>,
    omit_contract_address: bool,
    abort_after: Option<(usize, watch::Sender<bool>)>,
    receipts: HashMap<B256, TxReceipt>,
    withheld: HashSet<B256>,
    sent: Vec<(Address, [u8; 4])>,
}

pub struct MockChain {
    sender: Address,
    state: Mutex<ChainState>,
    controls: Mutex<Controls>,
}

impl MockChain {
    pub fn new() -> Self {
        let sender = deployer();
        let state = ChainState {
            native: HashMap::from([(sender, ether(1_000))]),
            mint_fill_bps: 10_000,
            ..Default::default()
        };
        Self {
            sender,
            state: Mutex::new(state),
            controls: Mutex::new(Controls::default()),
        }
    }

    /// Chain-mutating calls (deployments and transactions) seen so far.
    pub fn mutations(&self) -> usize {
        self.controls.lock().unwrap().mutations
    }

    pub fn deploys(&self) -> usize {
        self.controls.lock().unwrap().deploys
    }

    /// Selectors of every transaction sent to `to`.
    pub fn sent_to(&self, to: Address) -> Vec<[u8; 4]> {
        self.controls
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(target, _)| *target == to)
            .map(|(_, selector)| *selector)
            .collect()
    }

    pub fn revert_deploy(&self, nth: usize) {
        self.controls.lock().unwrap().revert_deploy = Some(nth);
    }

    /// The `nth` deployment lands but its receipt stays hidden until
    /// [`Self::release_withheld`].
    pub fn withhold_deploy(&self, nth: usize) {
        self.controls.lock().unwrap().withhold_deploy = Some(nth);
    }

    pub fn release_withheld(&self) {
        self.controls.lock().unwrap().withheld.clear();
    }

    /// Forget withheld transactions entirely, as a node that dropped them.
    pub fn drop_withheld(&self) {
        let mut controls = self.controls.lock().unwrap();
        let withheld: Vec<_> = controls.withheld.drain().collect();
        for tx_hash in withheld {
            controls.receipts.remove(&tx_hash);
        }
    }

    /// Receipts carry no contract address, as on chains that grind addresses.
    pub fn omit_contract_address(&self) {
        self.controls.lock().unwrap().omit_contract_address = true;
    }

    /// Flip `abort` once `deploys` deployments went through.
    pub fn abort_after(&self, deploys: usize, abort: watch::Sender<bool>) {
        self.controls.lock().unwrap().abort_after = Some((deploys, abort));
    }

    pub fn set_mint_fill_bps(&self, bps: u32) {
        self.state.lock().unwrap().mint_fill_bps = bps;
    }

    pub fn token_balance(&self, token: Address, owner: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(&token)
            .map(|t| t.balance(owner))
            .unwrap_or_default()
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(&token)
            .and_then(|t| t.allowances.get(&(owner, spender)).copied())
            .unwrap_or_default()
    }

    pub fn pool_count(&self) -> usize {
        self.state.lock().unwrap().pools.len()
    }

    pub fn pool_tokens(&self, pool: Address) -> Option<(Address, Address, u32)> {
        self.state
            .lock()
            .unwrap()
            .pools
            .get(&pool)
            .map(|p| (p.token0, p.token1, p.fee))
    }

    fn next_hash(controls: &mut Controls) -> B256 {
        controls.tx_counter += 1;
        B256::left_padding_from(&controls.tx_counter.to_be_bytes())
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainClient for MockChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn deploy(
        &self,
        init_code: Bytes,
        _gas_limit: Option<u64>,
    ) -> Result<PendingDeployment, ChainError> {
        let mut controls = self.controls.lock().unwrap();
        let mut state = self.state.lock().unwrap();

        controls.mutations += 1;
        controls.deploys += 1;
        let nth = controls.deploys;
        let tx_hash = Self::next_hash(&mut controls);

        let nonce = state.nonce;
        state.nonce += 1;
        let address = self.sender.create(nonce);

        let status = if controls.revert_deploy == Some(nth) {
            TxStatus::Reverted
        } else {
            state
                .create(&init_code, self.sender, address)
                .map_err(|message| ChainError::Rpc {
                    method: "eth_sendTransaction".to_string(),
                    message,
                })?;
            TxStatus::Confirmed
        };

        let contract_address = (status == TxStatus::Confirmed && !controls.omit_contract_address)
            .then_some(address);
        controls.receipts.insert(
            tx_hash,
            TxReceipt {
                transaction_hash: tx_hash,
                contract_address,
                block_number: Some(nonce + 1),
                status,
            },
        );
        if controls.withhold_deploy == Some(nth) {
            controls.withheld.insert(tx_hash);
        }

        if let Some((after, abort)) = &controls.abort_after {
            if nth >= *after {
                abort.send_replace(true);
            }
        }

        Ok(PendingDeployment {
            tx_hash,
            predicted_address: Some(address),
        })
    }

    async fn send(&self, tx: TxRequest) -> Result<B256, ChainError> {
        let mut controls = self.controls.lock().unwrap();
        let mut state = self.state.lock().unwrap();

        controls.mutations += 1;
        let tx_hash = Self::next_hash(&mut controls);
        let selector = tx
            .data
            .get(..4)
            .and_then(|s| <[u8; 4]>::try_from(s).ok())
            .unwrap_or_default();
        controls.sent.push((tx.to, selector));

        state.nonce += 1;
        let mut next = state.clone();
        let status = match next.execute(self.sender, tx.to, &tx.data, tx.value) {
            Ok(_) => {
                *state = next;
                TxStatus::Confirmed
            }
            Err(_) => TxStatus::Reverted,
        };

        controls.receipts.insert(
            tx_hash,
            TxReceipt {
                transaction_hash: tx_hash,
                contract_address: None,
                block_number: Some(state.nonce),
                status,
            },
        );
        Ok(tx_hash)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let mut dry_run = self.state.lock().unwrap().clone();
        dry_run
            .execute(self.sender, to, &data, U256::ZERO)
            .map(Bytes::from)
            .map_err(|reason| ChainError::Rpc {
                method: "eth_call".to_string(),
                message: format!("execution reverted: {reason}"),
            })
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .native
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let controls = self.controls.lock().unwrap();
        if controls.withheld.contains(&tx_hash) {
            return Ok(None);
        }
        Ok(controls.receipts.get(&tx_hash).cloned())
    }

    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, ChainError> {
        // Withheld transactions keep their receipt entry until dropped.
        Ok(self.controls.lock().unwrap().receipts.contains_key(&tx_hash))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, ChainError> {
        let controls = self.controls.lock().unwrap();
        if controls.withheld.contains(&tx_hash) {
            return Err(ChainError::ConfirmationTimeout {
                tx_hash,
                waited_secs: 0,
            });
        }
        controls
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| ChainError::Rpc {
                method: "eth_getTransactionReceipt".to_string(),
                message: format!("unknown transaction {tx_hash}"),
            })
    }
}
