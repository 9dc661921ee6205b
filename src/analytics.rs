//! Vault analytics: TVL with windowed change, APY and leverage
//!
//! Historical values come from the same subgraph pinned to the block at the
//! start of each window. When the historical part of a query fails it is
//! retried once without it, and the windowed fields come back empty.

use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::amounts;
use crate::chains::ChainInfo;
use crate::indexer::types::{AnalyticsResponse, RawTvlSnapshot, VaultApyResponse};
use crate::indexer::{self, queries, Subgraph};
use crate::pricing;
use crate::registry::GateRegistry;
use crate::time::{BlockSource, DAY, MONTH, WEEK};

/// Days between the share prices an APY is measured over
pub const APY_PERIOD_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultTvl {
    pub name: String,
    pub symbol: String,
    pub share: Address,
    pub icon_path: String,
    pub tvl: BigDecimal,
    /// Percent; `None` without a usable baseline
    pub day_change: Option<BigDecimal>,
    pub week_change: Option<BigDecimal>,
    pub month_change: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TvlReport {
    /// Largest first
    pub vaults: Vec<VaultTvl>,
    pub total: BigDecimal,
    pub total_yesterday: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultApy {
    pub share: Address,
    /// Fraction; `None` for vaults without a price 14 days back
    pub apy: Option<BigDecimal>,
    /// `None` when the chosen xPYT has no liquid pool
    pub leverage: Option<BigDecimal>,
    /// PYT -> xPYT rate
    pub xpyt_conversion_rate: BigDecimal,
    pub is_new_vault: bool,
}

/// `supply / precision × price / 1e6`
pub fn tvl_of(snapshot: &RawTvlSnapshot, precision: &BigDecimal) -> BigDecimal {
    let supply = amounts::checked_div(&snapshot.yield_token_total_supply, precision).unwrap_or_default();
    supply * &snapshot.underlying_price_usd / amounts::pow10(6)
}

/// Compound a per-period rate over a year of `period_days` periods
pub fn annualize(rate: &BigDecimal, period_days: i64) -> BigDecimal {
    let periods = (365.0 / period_days as f64).round() as u32;
    amounts::pow(&(BigDecimal::from(1) + rate), periods) - BigDecimal::from(1)
}

pub struct Analytics {
    chain: &'static ChainInfo,
    subgraph: Arc<dyn Subgraph>,
    blocks: Arc<dyn BlockSource>,
    registry: Arc<GateRegistry>,
}

impl Analytics {
    pub fn new(
        chain: &'static ChainInfo,
        subgraph: Arc<dyn Subgraph>,
        blocks: Arc<dyn BlockSource>,
        registry: Arc<GateRegistry>,
    ) -> Self {
        Self {
            chain,
            subgraph,
            blocks,
            registry,
        }
    }

    // ============================================
    // TVL
    // ============================================

    async fn tvl_with_history(&self, now: i64) -> Result<AnalyticsResponse> {
        let mut windows = Vec::new();
        for (alias, length) in [("day", DAY), ("week", WEEK), ("month", MONTH)] {
            let start = now - length;
            if start > self.chain.deployment_timestamp {
                windows.push((alias, self.blocks.block_at(start).await?));
            }
        }
        indexer::query(self.subgraph.as_ref(), &queries::analytics(&windows)).await
    }

    /// TVL per vault as of `now` (unix seconds)
    pub async fn tvl(&self, now: i64) -> Result<TvlReport> {
        let response = match self.tvl_with_history(now).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️ Historical TVL query failed ({}), retrying without history", e);
                indexer::query(self.subgraph.as_ref(), &queries::analytics(&[])).await?
            }
        };

        let chain_id = self.chain.chain_id;
        let mut vaults = Vec::new();
        let mut total = BigDecimal::default();
        let mut total_yesterday = BigDecimal::default();

        for snapshot in &response.vaults {
            let Some(underlying) = snapshot.underlying else {
                continue;
            };
            let Some(token) = self.registry.token(chain_id, underlying).await? else {
                debug!("Skipping TVL for unknown underlying {}", underlying);
                continue;
            };
            let share = self.registry.token(chain_id, snapshot.share).await?;

            let tvl = tvl_of(snapshot, &token.precision);
            let past = |window: &Option<Vec<RawTvlSnapshot>>| {
                window
                    .as_ref()
                    .and_then(|w| w.iter().find(|v| v.share == snapshot.share))
                    .map(|v| tvl_of(v, &token.precision))
            };
            let change = |baseline: &Option<BigDecimal>| {
                baseline.as_ref().and_then(|b| amounts::percent_change(&tvl, b))
            };

            let day = past(&response.day);
            let week = past(&response.week);
            let month = past(&response.month);

            total += &tvl;
            total_yesterday += day.clone().unwrap_or_default();

            vaults.push(VaultTvl {
                name: share.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
                symbol: share.as_ref().map(|s| s.symbol.clone()).unwrap_or_default(),
                share: snapshot.share,
                icon_path: token.icon_path.clone(),
                day_change: change(&day),
                week_change: change(&week),
                month_change: change(&month),
                tvl,
            });
        }

        vaults.sort_by(|a, b| b.tvl.cmp(&a.tvl));
        info!("📊 TVL on {}: ${}", self.chain.display_name, amounts::display_amount(&total, 2));

        Ok(TvlReport {
            vaults,
            total,
            total_yesterday,
        })
    }

    // ============================================
    // APY / LEVERAGE
    // ============================================

    async fn apy_with_history(&self, now: i64) -> Result<VaultApyResponse> {
        let block = self.blocks.block_at(now - DAY * APY_PERIOD_DAYS).await?;
        indexer::query(self.subgraph.as_ref(), &queries::vault_apy(Some(block))).await
    }

    /// APY and leverage for every vault with an xPYT
    pub async fn apy(&self, now: i64) -> Result<Vec<VaultApy>> {
        let response = match self.apy_with_history(now).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️ Historical share price query failed ({}), retrying without history", e);
                indexer::query(self.subgraph.as_ref(), &queries::vault_apy(None)).await?
            }
        };

        let mut results = Vec::new();
        for current in &response.current {
            let Some(vault) = self.registry.vault_by_share(self.chain.chain_id, current.share).await? else {
                continue;
            };
            let Some(xpyt) = vault.choose_xpyt() else {
                continue;
            };

            let last = response
                .last
                .as_ref()
                .and_then(|l| l.iter().find(|v| v.share == current.share));
            let apy = last
                .and_then(|l| {
                    let delta = &current.price_per_vault_share - &l.price_per_vault_share;
                    amounts::checked_div(&delta, &l.price_per_vault_share)
                })
                .map(|rate| annualize(&rate, APY_PERIOD_DAYS));

            let k = pricing::k(Some(xpyt));
            let has_liquidity = xpyt.pools.iter().any(|p| p.liquidity > BigDecimal::default());
            let leverage = if has_liquidity {
                amounts::checked_div(&pricing::l(Some(xpyt)), &k).map(|ratio| ratio + BigDecimal::from(1))
            } else {
                None
            };

            results.push(VaultApy {
                share: current.share,
                apy,
                leverage,
                xpyt_conversion_rate: k,
                is_new_vault: last.is_none(),
            });
        }
        Ok(results)
    }
}
