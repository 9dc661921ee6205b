//! Contract Bindings and Chain Reads
//!
//! `sol!` interfaces for every contract the router touches plus
//! [`ChainClient`], which performs `eth_call`s and Multicall3 batches
//! against one chain.
//!
//! OPTIMIZATIONS:
//! - Token metadata and balances are read in one Multicall3 batch
//! - Batches are chunked so a large vault list never hits the gas cap

use alloy_primitives::aliases::U24;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::{eyre, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::amounts;
use crate::balances::BalanceReader;
use crate::chains::{self, ChainInfo};
use crate::permit::PermitReader;
use crate::pricing::PriceOracle;
use crate::registry::{MetadataReader, TokenMetadata};
use crate::trade::{JuggleInput, JuggleRequest, ProtocolReader};

// ============================================
// SOLIDITY INTERFACES
// ============================================

sol! {
    #[derive(Debug)]
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function nonces(address owner) external view returns (uint256);
        function DOMAIN_SEPARATOR() external view returns (bytes32);
    }

    /// Timeless Uniswap V3 swapper
    #[derive(Debug)]
    interface ISwapper {
        struct SwapArgs {
            address gate;
            address vault;
            address underlying;
            address nyt;
            address pyt;
            address xPYT;
            uint256 tokenAmountIn;
            uint256 minAmountOut;
            address recipient;
            bool useSwapperBalance;
            bool usePYT;
            uint256 deadline;
            bytes extraArgs;
        }

        function protocolFeeInfo() external view returns (uint8 fee, address recipient);

        function swapUnderlyingToNyt(SwapArgs calldata args) external payable returns (uint256 tokenAmountOut);
        function swapUnderlyingToXpyt(SwapArgs calldata args) external payable returns (uint256 tokenAmountOut);
        function swapNytToUnderlying(SwapArgs calldata args) external payable returns (uint256 tokenAmountOut);
        function swapXpytToUnderlying(SwapArgs calldata args) external payable returns (uint256 tokenAmountOut);

        function doZeroExSwap(
            address tokenIn,
            uint256 tokenAmountIn,
            address tokenOut,
            uint256 minAmountOut,
            address recipient,
            bool useSwapperBalance,
            bool doTransferIn,
            uint256 deadline,
            bytes calldata swapData
        ) external payable returns (uint256 tokenAmountOut);

        function wrapEthInput() external payable;

        function selfPermitIfNecessary(
            address token,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external payable;

        function multicall(bytes[] calldata data) external payable returns (bytes[] memory results);
    }

    /// Timeless gate: mints and burns PYT/NYT against vault deposits
    #[derive(Debug)]
    interface IGate {
        function enterWithUnderlying(
            address nytRecipient,
            address pytRecipient,
            address vault,
            address xPYT,
            uint256 underlyingAmount
        ) external returns (uint256 mintAmount);

        function enterWithVaultShares(
            address nytRecipient,
            address pytRecipient,
            address vault,
            address xPYT,
            uint256 vaultSharesAmount
        ) external returns (uint256 mintAmount);

        function exitToUnderlying(address recipient, address vault, address xPYT, uint256 underlyingAmount)
            external returns (uint256 burnAmount);

        function exitToVaultShares(address recipient, address vault, address xPYT, uint256 vaultSharesAmount)
            external returns (uint256 burnAmount);

        function claimYieldInUnderlying(address recipient, address vault) external returns (uint256 yieldAmount);
        function claimYieldInVaultShares(address recipient, address vault) external returns (uint256 yieldAmount);
        function claimYieldAndEnter(address nytRecipient, address pytRecipient, address vault, address xPYT)
            external returns (uint256 yieldAmount);

        function getClaimableYieldAmount(address vault, address user) external view returns (uint256 yieldAmount);

        function selfPermitIfNecessary(
            address token,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external payable;

        function multicall(bytes[] calldata data) external payable returns (bytes[] memory results);
    }

    /// Timeless Uniswap V3 juggler
    #[derive(Debug)]
    interface IJuggler {
        function juggleXpytInput(address nyt, address xPYT, uint24 fee, uint256 tokenAmountIn, uint256 maxError)
            external returns (uint256 swapAmountIn);
        function juggleNytInput(address nyt, address xPYT, uint24 fee, uint256 tokenAmountIn, uint256 maxError)
            external returns (uint256 swapAmountIn);
    }

    #[derive(Debug)]
    interface IXpyt {
        function deposit(uint256 assets, address receiver) external returns (uint256 shares);
        function redeem(uint256 shares, address receiver, address owner) external returns (uint256 assets);
    }

    #[derive(Debug)]
    interface IWETH {
        function deposit() external payable;
        function withdraw(uint256 wad) external;
    }

    #[derive(Debug)]
    interface IYearnPriceOracle {
        function getPriceUsdcRecommended(address tokenAddress) external view returns (uint256);
    }

    /// Multicall3 - deployed at same address on all EVM chains
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);

        function getEthBalance(address addr) external view returns (uint256 balance);
    }

    /// Uniswap V3 QuoterV2 interface
    #[derive(Debug)]
    interface IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        function quoteExactInputSingle(QuoteExactInputSingleParams memory params)
            external
            returns (
                uint256 amountOut,
                uint160 sqrtPriceX96After,
                uint32 initializedTicksCrossed,
                uint256 gasEstimate
            );
    }

    #[derive(Debug)]
    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
    }

    /// Uniswap SwapRouter02
    #[derive(Debug)]
    interface ISwapRouter02 {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params)
            external payable returns (uint256 amountOut);

        function multicall(uint256 deadline, bytes[] calldata data)
            external payable returns (bytes[] memory results);
    }
}

/// Maximum calls per Multicall3 batch (to avoid gas limits)
const MAX_CALLS_PER_BATCH: usize = 300;

/// Juggler tolerance passed as `maxError`
const JUGGLE_MAX_ERROR: u64 = 1;

pub fn u24(value: u32) -> Result<U24> {
    U24::try_from(value).map_err(|_| eyre!("fee {} does not fit in uint24", value))
}

// ============================================
// CHAIN CLIENT
// ============================================

/// Read access to one chain over HTTP JSON-RPC
pub struct ChainClient {
    rpc_url: String,
    chain: &'static ChainInfo,
}

impl ChainClient {
    pub fn new(chain_id: u64, rpc_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            rpc_url: rpc_url.into(),
            chain: chains::chain(chain_id)?,
        })
    }

    pub fn chain(&self) -> &'static ChainInfo {
        self.chain
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub async fn call_contract(&self, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let provider = ProviderBuilder::new()
            .connect_http(self.rpc_url.parse()?);

        let tx = TransactionRequest::default()
            .to(to)
            .input(calldata.into());

        let result = provider.call(tx).await
            .map_err(|e| eyre!("eth_call failed: {}", e))?;

        Ok(result.to_vec())
    }

    /// Execute Multicall3 batches, preserving call order in the results
    pub async fn multicall(&self, calls: Vec<IMulticall3::Call3>) -> Result<Vec<IMulticall3::Result>> {
        let mut results = Vec::with_capacity(calls.len());

        for chunk in calls.chunks(MAX_CALLS_PER_BATCH) {
            let calldata = IMulticall3::aggregate3Call { calls: chunk.to_vec() }.abi_encode();
            let output = self.call_contract(self.chain.contracts.multicall3, calldata).await
                .map_err(|e| eyre!("Multicall3 failed: {}", e))?;

            let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&output)
                .map_err(|e| eyre!("Failed to decode multicall result: {}", e))?;
            results.extend(decoded);
        }

        Ok(results)
    }

    pub async fn eth_balance(&self, owner: Address) -> Result<U256> {
        let provider = ProviderBuilder::new()
            .connect_http(self.rpc_url.parse()?);
        provider.get_balance(owner).await
            .map_err(|e| eyre!("eth_getBalance failed: {}", e))
    }

    pub async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let output = self.call_contract(token, IERC20::balanceOfCall { owner }.abi_encode()).await?;
        IERC20::balanceOfCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("Failed to decode balanceOf: {}", e))
    }

    pub async fn nonce(&self, token: Address, owner: Address) -> Result<U256> {
        let output = self.call_contract(token, IERC20::noncesCall { owner }.abi_encode()).await?;
        IERC20::noncesCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("Failed to decode nonces: {}", e))
    }

    /// Raw underlying yield `user` can claim from `vault` through `gate`
    pub async fn claimable_yield(&self, gate: Address, vault: Address, user: Address) -> Result<U256> {
        let output = self.call_contract(gate, IGate::getClaimableYieldAmountCall { vault, user }.abi_encode()).await?;
        IGate::getClaimableYieldAmountCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("Failed to decode getClaimableYieldAmount: {}", e))
    }

    /// EIP-712 domain separator of `token`; reverts when it has none
    pub async fn domain_separator(&self, token: Address) -> Result<B256> {
        let output = self.call_contract(token, IERC20::DOMAIN_SEPARATORCall {}.abi_encode()).await?;
        IERC20::DOMAIN_SEPARATORCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("Failed to decode DOMAIN_SEPARATOR: {}", e))
    }
}

// ============================================
// SERVICE READS
// ============================================

#[async_trait]
impl ProtocolReader for ChainClient {
    async fn protocol_fee_bps(&self) -> Result<u32> {
        let swapper = self.chain.contracts.uniswap_v3_swapper;
        let output = self.call_contract(swapper, ISwapper::protocolFeeInfoCall {}.abi_encode()).await?;
        let info = ISwapper::protocolFeeInfoCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("Failed to decode protocolFeeInfo: {}", e))?;
        Ok(info.fee as u32)
    }

    async fn juggle(&self, request: JuggleRequest) -> Result<U256> {
        let juggler = self.chain.contracts.uniswap_v3_juggler;
        let fee = u24(request.fee)?;
        let max_error = U256::from(JUGGLE_MAX_ERROR);

        let output = match request.input {
            JuggleInput::Xpyt => {
                let call = IJuggler::juggleXpytInputCall {
                    nyt: request.nyt,
                    xPYT: request.xpyt,
                    fee,
                    tokenAmountIn: request.amount_in,
                    maxError: max_error,
                };
                let output = self.call_contract(juggler, call.abi_encode()).await?;
                IJuggler::juggleXpytInputCall::abi_decode_returns(&output)
            }
            JuggleInput::Nyt => {
                let call = IJuggler::juggleNytInputCall {
                    nyt: request.nyt,
                    xPYT: request.xpyt,
                    fee,
                    tokenAmountIn: request.amount_in,
                    maxError: max_error,
                };
                let output = self.call_contract(juggler, call.abi_encode()).await?;
                IJuggler::juggleNytInputCall::abi_decode_returns(&output)
            }
        };

        let swap_amount_in = output.map_err(|e| eyre!("Failed to decode juggle result: {}", e))?;
        debug!("🤹 Juggled {} -> swap {}", request.amount_in, swap_amount_in);
        Ok(swap_amount_in)
    }
}

#[async_trait]
impl MetadataReader for ChainClient {
    async fn token_metadata(&self, tokens: &[Address]) -> Result<HashMap<Address, TokenMetadata>> {
        let mut calls = Vec::with_capacity(tokens.len() * 3);
        for token in tokens {
            for calldata in [
                IERC20::nameCall {}.abi_encode(),
                IERC20::symbolCall {}.abi_encode(),
                IERC20::decimalsCall {}.abi_encode(),
            ] {
                calls.push(IMulticall3::Call3 {
                    target: *token,
                    allowFailure: true,
                    callData: calldata.into(),
                });
            }
        }

        let results = self.multicall(calls).await?;
        let mut metadata = HashMap::new();

        for (token, chunk) in tokens.iter().zip(results.chunks(3)) {
            let [name, symbol, decimals] = chunk else { continue };
            let decoded = (
                name.success.then(|| IERC20::nameCall::abi_decode_returns(&name.returnData).ok()).flatten(),
                symbol.success.then(|| IERC20::symbolCall::abi_decode_returns(&symbol.returnData).ok()).flatten(),
                decimals.success.then(|| IERC20::decimalsCall::abi_decode_returns(&decimals.returnData).ok()).flatten(),
            );
            match decoded {
                (Some(name), Some(symbol), Some(decimals)) => {
                    metadata.insert(*token, TokenMetadata { name, symbol, decimals });
                }
                _ => warn!("⚠️ Skipping token {} with unreadable metadata", token),
            }
        }

        Ok(metadata)
    }
}

#[async_trait]
impl PriceOracle for ChainClient {
    async fn price_usd(&self, token: Address) -> Result<Option<BigDecimal>> {
        let Some(oracle) = self.chain.contracts.yearn_price_oracle else {
            return Ok(None);
        };
        let call = IYearnPriceOracle::getPriceUsdcRecommendedCall { tokenAddress: token };
        let output = self.call_contract(oracle, call.abi_encode()).await?;
        let raw = IYearnPriceOracle::getPriceUsdcRecommendedCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("Failed to decode oracle price: {}", e))?;
        Ok(Some(amounts::from_chain_units(raw, 6)))
    }
}

#[async_trait]
impl BalanceReader for ChainClient {
    async fn balances(&self, owner: Address, tokens: &[Address]) -> Result<HashMap<Address, U256>> {
        let multicall3 = self.chain.contracts.multicall3;
        let calls = tokens
            .iter()
            .map(|token| {
                let (target, calldata) = if *token == crate::tokens::ETH_ADDRESS {
                    (multicall3, IMulticall3::getEthBalanceCall { addr: owner }.abi_encode())
                } else {
                    (*token, IERC20::balanceOfCall { owner }.abi_encode())
                };
                IMulticall3::Call3 { target, allowFailure: true, callData: calldata.into() }
            })
            .collect();

        let results = self.multicall(calls).await?;
        let mut balances = HashMap::new();
        for (token, result) in tokens.iter().zip(results) {
            if !result.success {
                continue;
            }
            // balanceOf and getEthBalance share the same uint256 return layout
            if let Ok(balance) = IERC20::balanceOfCall::abi_decode_returns(&result.returnData) {
                balances.insert(*token, balance);
            }
        }
        Ok(balances)
    }

    async fn balance(&self, owner: Address, token: Address) -> Result<U256> {
        if token == crate::tokens::ETH_ADDRESS {
            self.eth_balance(owner).await
        } else {
            self.erc20_balance(token, owner).await
        }
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let output = self.call_contract(token, IERC20::allowanceCall { owner, spender }.abi_encode()).await?;
        IERC20::allowanceCall::abi_decode_returns(&output)
            .map_err(|e| eyre!("Failed to decode allowance: {}", e))
    }
}

#[async_trait]
impl PermitReader for ChainClient {
    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256> {
        self.nonce(token, owner).await
    }

    async fn is_permittable(&self, token: Address) -> bool {
        self.domain_separator(token).await.is_ok()
    }
}

/// Encode a bare calldata blob into `Bytes`
pub fn encode<C: SolCall>(call: &C) -> Bytes {
    call.abi_encode().into()
}
