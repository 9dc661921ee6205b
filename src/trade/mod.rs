//! Trade Quotes
//!
//! Turns a (from, to, amount) request into a [`Quote`]: a plan saying which
//! contracts carry the trade plus the [`Trade`] record with expected and
//! worst-case output.
//!
//! - [`classify`]: token roles, vault matching, plan selection
//! - [`math`]: fee, conversion, slippage and impact arithmetic
//! - [`composer`]: quotes each plan against the router, aggregator and chain
//! - [`desk`]: debounced, sequence-checked front door for interactive callers

pub mod classify;
pub mod composer;
pub mod desk;
pub mod math;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::Result;
use serde::Serialize;

use crate::amounts;
use crate::router::SwapRoute;
use crate::tokens::{Token, Xpyt};

pub use classify::{TradePlan, VaultPath};
pub use composer::TradeComposer;
pub use desk::{DeskOutcome, QuoteDesk};

// ============================================
// QUOTE TYPES
// ============================================

/// One quote request
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub from: Token,
    pub to: Token,
    pub amount: BigDecimal,
    pub slippage_bps: u32,
    /// Seconds from now
    pub deadline_secs: u64,
    pub recipient: Address,
}

/// Quoted outcome of one leg or one whole trade
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trade {
    /// xPYT the trade goes through
    pub xpyt: Option<Xpyt>,
    pub route: Option<SwapRoute>,
    /// Aggregator payload
    pub swap_data: Option<Bytes>,
    /// Input the Swapper pushes through the pool
    pub swap_amount_in: BigDecimal,
    /// Expected output before slippage
    pub token_amount_out: BigDecimal,
    /// Output per input token
    pub execution_price: BigDecimal,
    /// Output not exposed to slippage
    pub slippage_base: BigDecimal,
    pub min_amount_out: BigDecimal,
    /// Percent, positive magnitude
    pub price_impact: BigDecimal,
}

impl Trade {
    /// 1:1 conversion with no market exposure
    pub fn exact(amount: &BigDecimal, xpyt: Option<Xpyt>, out: BigDecimal) -> Self {
        Self {
            xpyt,
            execution_price: execution_price(&out, amount),
            min_amount_out: out.clone(),
            token_amount_out: out,
            ..Default::default()
        }
    }
}

/// `out / amount_in`, zero for a zero input
pub fn execution_price(amount_out: &BigDecimal, amount_in: &BigDecimal) -> BigDecimal {
    amounts::checked_div(amount_out, amount_in).unwrap_or_default()
}

/// A composed quote, ready for display or execution
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub plan: TradePlan,
    /// Source as requested
    pub from: Token,
    /// Destination after ETH normalization
    pub to: Token,
    pub amount_in: BigDecimal,
    pub slippage_bps: u32,
    /// Absolute unix timestamp
    pub deadline: u64,
    /// Protocol fee applied, basis points
    pub fee_bps: u32,
    pub trade: Trade,
    /// Composite legs: aggregator, vault leg at expected, vault leg at worst case
    pub legs: Vec<Trade>,
}

/// Display form of a quote for the CLI
#[derive(Debug, Clone, Serialize)]
pub struct QuoteSummary {
    pub plan: &'static str,
    pub from: String,
    pub to: String,
    pub amount_in: String,
    pub amount_out: String,
    pub min_amount_out: String,
    pub execution_price: String,
    pub price_impact_pct: String,
}

impl From<&Quote> for QuoteSummary {
    fn from(quote: &Quote) -> Self {
        Self {
            plan: quote.plan.label(),
            from: quote.from.symbol.clone(),
            to: quote.to.symbol.clone(),
            amount_in: quote.amount_in.normalized().to_string(),
            amount_out: amounts::display_amount(&quote.trade.token_amount_out, 6),
            min_amount_out: amounts::display_amount(&quote.trade.min_amount_out, 6),
            execution_price: amounts::display_amount(&quote.trade.execution_price, 6),
            price_impact_pct: amounts::round_dp(&quote.trade.price_impact, 4).normalized().to_string(),
        }
    }
}

// ============================================
// ON-CHAIN READS
// ============================================

/// Which side of the xPYT/NYT pair is supplied to the juggler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JuggleInput {
    Xpyt,
    Nyt,
}

/// Juggler query: how much of `amount_in` to swap so the holder ends up
/// with equal PYT and NYT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JuggleRequest {
    pub nyt: Address,
    pub xpyt: Address,
    /// xPYT's Uniswap pool fee
    pub fee: u32,
    /// Raw units of the input side
    pub amount_in: U256,
    pub input: JuggleInput,
}

/// Protocol reads the composer depends on
#[async_trait]
pub trait ProtocolReader: Send + Sync {
    /// Swapper protocol fee in basis points
    async fn protocol_fee_bps(&self) -> Result<u32>;

    /// Raw amount of the input side to swap
    async fn juggle(&self, request: JuggleRequest) -> Result<U256>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::fixtures::dec;

    #[test]
    fn test_exact_trade_has_no_market_exposure() {
        let trade = Trade::exact(&dec("2"), None, dec("1.6"));
        assert_eq!(trade.min_amount_out, trade.token_amount_out);
        assert_eq!(trade.price_impact, BigDecimal::default());
        assert_eq!(trade.execution_price, dec("0.8"));
    }

    #[test]
    fn test_execution_price_zero_input() {
        assert_eq!(execution_price(&dec("5"), &BigDecimal::default()), BigDecimal::default());
    }
}
