//! 0x Aggregator Quotes
//!
//! Off-chain quote API used for plain token-to-token swaps and for the first
//! hop of composite trades.
//!
//! API: https://api.0x.org/swap/v1/quote?sellToken=..&buyToken=..&sellAmount=..&slippagePercentage=..

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use eyre::{eyre, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::amounts;
use crate::tokens::Token;

/// Default 0x API base URL (mainnet)
pub const ZERO_EX_API_URL: &str = "https://api.0x.org";

// ============================================
// API RESPONSE TYPES
// ============================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZeroExQuoteResponse {
    /// Raw buy-token units
    pub buy_amount: BigDecimal,
    pub price: BigDecimal,
    pub guaranteed_price: BigDecimal,
    #[serde(default)]
    pub estimated_price_impact: Option<BigDecimal>,
    pub data: Bytes,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub allowance_target: Option<Address>,
}

/// Normalized aggregator quote in token units
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorQuote {
    pub buy_amount: BigDecimal,
    /// Buy token per sell token
    pub price: BigDecimal,
    /// Worst-case buy token per sell token
    pub guaranteed_price: BigDecimal,
    /// Percent, positive magnitude
    pub price_impact: BigDecimal,
    /// Opaque payload forwarded to `doZeroExSwap`
    pub swap_data: Bytes,
}

impl AggregatorQuote {
    pub fn from_response(response: ZeroExQuoteResponse, buy: &Token) -> Self {
        Self {
            buy_amount: amounts::truncate(&(&response.buy_amount / &buy.precision), buy.decimals),
            price: response.price,
            guaranteed_price: response.guaranteed_price,
            price_impact: response.estimated_price_impact.map(|i| i.abs()).unwrap_or_default(),
            swap_data: response.data,
        }
    }

    /// Output guaranteed for `sell_amount`
    pub fn min_amount_out(&self, sell_amount: &BigDecimal, buy: &Token) -> BigDecimal {
        amounts::truncate(&(sell_amount * &self.guaranteed_price), buy.decimals)
    }
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, sell: &Token, buy: &Token, sell_amount: &BigDecimal, slippage_bps: u32) -> Result<AggregatorQuote>;
}

// ============================================
// 0x CLIENT
// ============================================

pub struct ZeroExClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ZeroExClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Tokens go by address; ETH sources are swapped to WETH before quoting
    fn token_param(token: &Token) -> String {
        token.address.to_string()
    }

    /// `slippagePercentage` expects a fraction: 50 bps -> 0.005
    pub fn slippage_fraction(slippage_bps: u32) -> BigDecimal {
        BigDecimal::new(BigInt::from(slippage_bps), 4).normalized()
    }
}

#[async_trait]
impl QuoteSource for ZeroExClient {
    async fn quote(&self, sell: &Token, buy: &Token, sell_amount: &BigDecimal, slippage_bps: u32) -> Result<AggregatorQuote> {
        let raw_amount = amounts::to_chain_units(sell_amount, sell.decimals)?;
        let url = format!("{}/swap/v1/quote", self.base_url.trim_end_matches('/'));

        debug!("0x quote: {} {} -> {}", sell_amount, sell.symbol, buy.symbol);

        let mut request = self.client.get(&url).query(&[
            ("sellToken", Self::token_param(sell)),
            ("buyToken", Self::token_param(buy)),
            ("sellAmount", raw_amount.to_string()),
            ("slippagePercentage", Self::slippage_fraction(slippage_bps).to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("0x-api-key", key);
        }

        let response = request.send().await
            .map_err(|e| eyre!("0x request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(eyre!("0x quote failed ({}): {}", status, body));
        }

        let raw: ZeroExQuoteResponse = response.json().await
            .map_err(|e| eyre!("Failed to parse 0x quote: {}", e))?;
        let quote = AggregatorQuote::from_response(raw, buy);

        info!(
            "🌐 0x quote {} {} -> {} {} (impact {}%)",
            sell_amount, sell.symbol, quote.buy_amount, buy.symbol, quote.price_impact
        );
        Ok(quote)
    }
}
