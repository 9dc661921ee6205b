//! Raw subgraph payloads.
//!
//! BigInt / BigDecimal fields arrive as JSON strings; small integers may
//! arrive either way depending on the schema.

use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

fn string_or_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + TryFrom<u64>,
    <T as FromStr>::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.parse().map_err(de::Error::custom),
        Raw::Num(n) => T::try_from(n).map_err(|_| de::Error::custom("number out of range")),
    }
}

// ============================================
// GATES
// ============================================

#[derive(Debug, Clone, Deserialize)]
pub struct GatesResponse {
    pub gates: Vec<RawGate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGate {
    pub address: Address,
    pub vaults: Vec<RawVault>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVault {
    pub price_per_vault_share: BigDecimal,
    /// Scaled by 1e6
    #[serde(rename = "underlyingPriceUSD")]
    pub underlying_price_usd: BigDecimal,
    pub underlying: Address,
    pub share: Address,
    pub pyt: Address,
    pub nyt: Address,
    #[serde(default)]
    pub xpyt: Vec<RawXpyt>,
}

impl RawVault {
    /// Token slots that need on-chain metadata
    pub fn slot_addresses(&self) -> [Address; 4] {
        [self.underlying, self.share, self.pyt, self.nyt]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawXpyt {
    pub name: String,
    pub symbol: String,
    pub address: Address,
    #[serde(deserialize_with = "string_or_number")]
    pub decimals: u8,
    pub precision: BigDecimal,
    pub conversion_rate: BigDecimal,
    #[serde(deserialize_with = "string_or_number")]
    pub uniswap_v3_pool_fee: u32,
    #[serde(deserialize_with = "string_or_number")]
    pub uniswap_v3_twap_seconds_ago: u32,
    pub pounder_reward_multiplier: BigDecimal,
    pub min_output_multiplier: BigDecimal,
    #[serde(default)]
    pub pools: Vec<RawPool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPool {
    pub id: Address,
    #[serde(deserialize_with = "string_or_number")]
    pub fee: u32,
    pub token0: Address,
    pub token1: Address,
    pub liquidity: BigDecimal,
    pub token0_price: BigDecimal,
    pub token1_price: BigDecimal,
}

// ============================================
// BLOCKS
// ============================================

#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    #[serde(deserialize_with = "string_or_number")]
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<RawBlock>,
}

/// `t{i}` alias -> matching blocks
pub type BlocksBatchResponse = HashMap<String, Vec<RawBlock>>;

// ============================================
// ANALYTICS / APY
// ============================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTvlSnapshot {
    pub yield_token_total_supply: BigDecimal,
    #[serde(rename = "underlyingPriceUSD")]
    pub underlying_price_usd: BigDecimal,
    #[serde(default)]
    pub underlying: Option<Address>,
    pub share: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsResponse {
    pub vaults: Vec<RawTvlSnapshot>,
    pub day: Option<Vec<RawTvlSnapshot>>,
    pub week: Option<Vec<RawTvlSnapshot>>,
    pub month: Option<Vec<RawTvlSnapshot>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSharePrice {
    pub share: Address,
    pub price_per_vault_share: BigDecimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultApyResponse {
    pub current: Vec<RawSharePrice>,
    pub last: Option<Vec<RawSharePrice>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gate_payload_parses() {
        let payload = json!({
            "gates": [{
                "address": "0x36b49ebf089be8860d7fc60f2553461e9cc8e9e2",
                "vaults": [{
                    "pricePerVaultShare": "1010000000000000000000000000",
                    "underlyingPriceUSD": "1000000",
                    "underlying": "0x6b175474e89094c44da98b954eedeac495271d0f",
                    "share": "0xdA816459F1AB5631232FE5e97a05BBBb94970c95",
                    "pyt": "0x1111111111111111111111111111111111111111",
                    "nyt": "0x2222222222222222222222222222222222222222",
                    "xpyt": [{
                        "name": "xPYT DAI",
                        "symbol": "xpDAI",
                        "address": "0x3333333333333333333333333333333333333333",
                        "decimals": 18,
                        "precision": "1000000000000000000",
                        "conversionRate": "980000000000000000",
                        "uniswapV3PoolFee": "3000",
                        "uniswapV3TwapSecondsAgo": "3600",
                        "pounderRewardMultiplier": "0.05",
                        "minOutputMultiplier": "0.95",
                        "pools": [{
                            "id": "0x4444444444444444444444444444444444444444",
                            "fee": "3000",
                            "token0": "0x2222222222222222222222222222222222222222",
                            "token1": "0x3333333333333333333333333333333333333333",
                            "liquidity": "123456789",
                            "token0Price": "1.25",
                            "token1Price": "0.8"
                        }]
                    }]
                }]
            }]
        });

        let parsed: GatesResponse = serde_json::from_value(payload).unwrap();
        let vault = &parsed.gates[0].vaults[0];
        assert_eq!(vault.xpyt[0].uniswap_v3_pool_fee, 3000);
        assert_eq!(vault.xpyt[0].decimals, 18);
        assert_eq!(vault.xpyt[0].pools[0].fee, 3000);
        assert_eq!(vault.underlying_price_usd, BigDecimal::from(1_000_000));
    }

    #[test]
    fn test_blocks_batch_parses() {
        let payload = json!({ "t0": [{ "id": "0xab", "number": "15000000", "timestamp": "1" }], "t1": [] });
        let parsed: BlocksBatchResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed["t0"][0].number, 15_000_000);
        assert!(parsed["t1"].is_empty());
    }
}
