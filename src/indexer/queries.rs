//! GraphQL query builders.
//!
//! Historical snapshots are joined into one request through aliases pinned
//! to a block number (`day: vaults(block: {number: N})`).

use std::fmt::Write;

/// Blocks fetched per request in batched timestamp lookups
pub const BLOCK_BATCH_SIZE: usize = 100;

/// Seconds after a timestamp searched for the first block
pub const BLOCK_SEARCH_WINDOW: i64 = 600;

/// Every gate with its vaults, xPYT deployments and their pools
pub fn gates() -> String {
    r#"{
  gates(first: 1000) {
    address
    vaults(first: 1000) {
      pricePerVaultShare
      underlyingPriceUSD
      underlying
      share
      pyt
      nyt
      xpyt(first: 1000) {
        name
        symbol
        address
        decimals
        precision
        conversionRate
        uniswapV3PoolFee
        uniswapV3TwapSecondsAgo
        pounderRewardMultiplier
        minOutputMultiplier
        pools {
          id
          fee
          token0
          token1
          liquidity
          token0Price
          token1Price
        }
      }
    }
  }
}"#
    .to_string()
}

fn block_filter(alias: &str, timestamp: i64) -> String {
    format!(
        "{}: blocks(first: 1, orderBy: timestamp, orderDirection: asc, where: {{timestamp_gt: {}, timestamp_lt: {}}}) {{ id number timestamp }}",
        alias,
        timestamp,
        timestamp + BLOCK_SEARCH_WINDOW
    )
}

/// First block after `timestamp`
pub fn block_at(timestamp: i64) -> String {
    format!("{{ {} }}", block_filter("blocks", timestamp))
}

/// Aliased block lookups `t{offset+i}` for one batch of timestamps
pub fn blocks_batch(offset: usize, timestamps: &[i64]) -> String {
    let mut query = String::from("query GetBlocks {");
    for (i, ts) in timestamps.iter().enumerate() {
        let _ = write!(query, " {}", block_filter(&format!("t{}", offset + i), *ts));
    }
    query.push_str(" }");
    query
}

/// TVL snapshot at the chain head plus optional historical windows
pub fn analytics(windows: &[(&str, u64)]) -> String {
    let mut query = String::from(
        "query Analytics { vaults(first: 1000) { yieldTokenTotalSupply underlyingPriceUSD underlying share }",
    );
    for (alias, block) in windows {
        let _ = write!(
            query,
            " {}: vaults(first: 1000, block: {{number: {}}}) {{ yieldTokenTotalSupply underlyingPriceUSD share }}",
            alias, block
        );
    }
    query.push_str(" }");
    query
}

/// Share prices now and, when `last_block` is given, at that block
pub fn vault_apy(last_block: Option<u64>) -> String {
    let mut query = String::from("query VaultAPY { current: vaults(first: 1000) { share pricePerVaultShare }");
    if let Some(block) = last_block {
        let _ = write!(
            query,
            " last: vaults(first: 1000, block: {{number: {}}}) {{ share pricePerVaultShare }}",
            block
        );
    }
    query.push_str(" }");
    query
}
