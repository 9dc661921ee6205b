//! Uniswap V3 routing through the official QuoterV2 contract
//!
//! Each candidate pool is quoted via eth_call together with its current
//! `slot0` price. The pool with the largest output wins; price impact is the
//! shortfall against the pre-trade mid price after the pool fee.

use alloy_primitives::aliases::U160;
use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed, Zero};
use eyre::{eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

use super::{after_slippage, RouteRequest, SwapRoute, SwapRouter};
use crate::amounts;
use crate::contracts::{u24, ChainClient, IQuoterV2, ISwapRouter02, IUniswapV3Pool};
use crate::errors::QuoteError;
use crate::tokens::Pool;

/// Raw quote from one pool
#[derive(Debug, Clone)]
struct PoolQuote {
    pool: Pool,
    amount_out: U256,
    sqrt_price_x96: U256,
}

/// QuoterV2-backed router
pub struct UniswapRouter {
    client: Arc<ChainClient>,
}

impl UniswapRouter {
    pub fn new(client: Arc<ChainClient>) -> Self {
        Self { client }
    }

    async fn quote_pool(&self, pool: &Pool, token_in: Address, token_out: Address, amount_in: U256) -> Result<PoolQuote> {
        let contracts = &self.client.chain().contracts;

        let params = IQuoterV2::QuoteExactInputSingleParams {
            tokenIn: token_in,
            tokenOut: token_out,
            amountIn: amount_in,
            fee: u24(pool.fee)?,
            sqrtPriceLimitX96: U160::ZERO,
        };
        let quote_call = IQuoterV2::quoteExactInputSingleCall { params }.abi_encode();
        let slot0_call = IUniswapV3Pool::slot0Call {}.abi_encode();

        let (quote_out, slot0_out) = tokio::try_join!(
            self.client.call_contract(contracts.uniswap_v3_quoter, quote_call),
            self.client.call_contract(pool.id, slot0_call),
        )?;

        let quote = IQuoterV2::quoteExactInputSingleCall::abi_decode_returns(&quote_out)
            .map_err(|e| eyre!("Failed to decode quote: {}", e))?;
        let slot0 = IUniswapV3Pool::slot0Call::abi_decode_returns(&slot0_out)
            .map_err(|e| eyre!("Failed to decode slot0: {}", e))?;

        Ok(PoolQuote {
            pool: pool.clone(),
            amount_out: quote.amountOut,
            sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
        })
    }
}

#[async_trait]
impl SwapRouter for UniswapRouter {
    async fn route(&self, request: RouteRequest<'_>) -> Result<SwapRoute> {
        let token_in = request.token_in;
        let token_out = request.token_out;

        if request.pools.is_empty() {
            return Err(QuoteError::NoPool(token_in.address).into());
        }

        let amount_in = amounts::to_chain_units(request.amount_in, token_in.decimals)?;
        debug!(
            "Routing {} {} -> {} across {} pool(s)",
            request.amount_in, token_in.symbol, token_out.symbol, request.pools.len()
        );

        let quotes = join_all(
            request
                .pools
                .iter()
                .map(|pool| self.quote_pool(pool, token_in.address, token_out.address, amount_in)),
        )
        .await;

        let mut best: Option<PoolQuote> = None;
        let mut last_error = None;
        for quote in quotes {
            match quote {
                Ok(q) => {
                    if best.as_ref().map_or(true, |b| q.amount_out > b.amount_out) {
                        best = Some(q);
                    }
                }
                Err(e) => {
                    debug!("Pool quote failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        let best = match (best, last_error) {
            (Some(best), _) => best,
            (None, Some(e)) => return Err(e),
            (None, None) => return Err(QuoteError::NoPool(token_in.address).into()),
        };

        let zero_for_one = token_in.address == best.pool.token0;
        let price_impact = price_impact_pct(best.sqrt_price_x96, zero_for_one, best.pool.fee, amount_in, best.amount_out);
        let amount_out = amounts::from_chain_units(best.amount_out, token_out.decimals);
        let min_amount_out = after_slippage(&amount_out, request.slippage_bps, token_out.decimals);

        let swap = ISwapRouter02::exactInputSingleCall {
            params: ISwapRouter02::ExactInputSingleParams {
                tokenIn: token_in.address,
                tokenOut: token_out.address,
                fee: u24(best.pool.fee)?,
                recipient: request.recipient,
                amountIn: amount_in,
                amountOutMinimum: amounts::to_chain_units(&min_amount_out, token_out.decimals)?,
                sqrtPriceLimitX96: U160::ZERO,
            },
        };
        let calldata = ISwapRouter02::multicallCall {
            deadline: U256::from(request.deadline),
            data: vec![swap.abi_encode().into()],
        }
        .abi_encode();

        info!(
            "🔀 Route {} {} -> {} {} via pool {} (fee {}, impact {}%)",
            request.amount_in,
            token_in.symbol,
            amount_out,
            token_out.symbol,
            best.pool.id,
            best.pool.fee,
            amounts::round_dp(&price_impact, 4)
        );

        Ok(SwapRoute {
            pool: best.pool.id,
            fee: best.pool.fee,
            token_in: token_in.address,
            token_out: token_out.address,
            amount_in: request.amount_in.clone(),
            amount_out,
            min_amount_out,
            price_impact,
            calldata: calldata.into(),
        })
    }
}

/// Percent shortfall of `amount_out` against the fee-adjusted mid price.
/// Raw amounts on both sides, so decimals cancel out.
pub fn price_impact_pct(sqrt_price_x96: U256, zero_for_one: bool, fee: u32, amount_in: U256, amount_out: U256) -> BigDecimal {
    let q96 = amounts::u256_to_decimal(U256::from(1) << 96);
    let sqrt_price = amounts::u256_to_decimal(sqrt_price_x96) / q96;
    // token1 per token0
    let price = (&sqrt_price * &sqrt_price).with_prec(50);

    let mid = if zero_for_one {
        Some(price)
    } else {
        amounts::checked_div(&BigDecimal::from(1), &price)
    };
    let Some(mid) = mid else {
        return BigDecimal::zero();
    };

    let fee_factor = BigDecimal::from(1_000_000u32.saturating_sub(fee)) / BigDecimal::from(1_000_000u32);
    let expected = amounts::u256_to_decimal(amount_in) * mid * fee_factor;
    let Some(ratio) = amounts::checked_div(&amounts::u256_to_decimal(amount_out), &expected) else {
        return BigDecimal::zero();
    };

    let impact = (BigDecimal::from(1) - ratio) * BigDecimal::from(100);
    if impact.is_negative() {
        BigDecimal::zero()
    } else {
        impact.with_prec(20)
    }
}
