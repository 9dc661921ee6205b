//! AMM Routing
//!
//! A route is an exact-input swap through one Uniswap V3 pool of an xPYT's
//! NYT pair. [`SwapRouter`] is the seam the trade composer quotes through;
//! [`uniswap::UniswapRouter`] implements it with the on-chain QuoterV2.

pub mod uniswap;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::Result;

use crate::amounts;
use crate::tokens::{Pool, Token};

pub use uniswap::UniswapRouter;

/// Inputs for one exact-input route
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    pub token_in: &'a Token,
    pub token_out: &'a Token,
    pub amount_in: &'a BigDecimal,
    /// Candidate pools; the best quote wins
    pub pools: &'a [Pool],
    pub slippage_bps: u32,
    pub recipient: Address,
    /// Unix timestamp after which the router call reverts
    pub deadline: u64,
}

/// A quoted AMM route
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRoute {
    pub pool: Address,
    pub fee: u32,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: BigDecimal,
    pub amount_out: BigDecimal,
    /// Worst-case output once slippage is applied
    pub min_amount_out: BigDecimal,
    /// Percent, positive magnitude, pool fee excluded
    pub price_impact: BigDecimal,
    /// SwapRouter02 `multicall(deadline, [exactInputSingle])`
    pub calldata: Bytes,
}

#[async_trait]
pub trait SwapRouter: Send + Sync {
    async fn route(&self, request: RouteRequest<'_>) -> Result<SwapRoute>;
}

/// Worst-case output for a tolerance: `out / (1 + slippage)`, truncated to
/// the token's decimals
pub fn after_slippage(amount_out: &BigDecimal, slippage_bps: u32, decimals: u8) -> BigDecimal {
    let denominator = BigDecimal::from(10_000u32 + slippage_bps);
    amounts::truncate(&(amount_out * BigDecimal::from(10_000u32) / denominator), decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_after_slippage() {
        // 1% tolerance: 101 / 1.01 = 100
        let out = BigDecimal::from_str("101").unwrap();
        assert_eq!(after_slippage(&out, 100, 18), BigDecimal::from(100));
        // zero tolerance keeps the full amount
        assert_eq!(after_slippage(&out, 0, 18), out);
    }

    #[test]
    fn test_after_slippage_truncates() {
        let out = BigDecimal::from_str("1").unwrap();
        let min = after_slippage(&out, 50, 6);
        assert_eq!(min, BigDecimal::from_str("0.995024").unwrap());
    }
}
