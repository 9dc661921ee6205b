//! USD prices for vault tokens
//!
//! With K = PYT -> xPYT conversion rate and L = xPYT per NYT at the pool:
//!
//! ```text
//! 1 xPYT = U / (K + L)
//! 1 PYT  = K·U / (K + L)
//! 1 NYT  = L·U / (K + L)
//! ```
//!
//! where U is the underlying USD price. Tokens outside any vault fall back to
//! the chain's price oracle, else zero.

use alloy_primitives::Address;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::amounts;
use crate::tokens::{Vault, Xpyt};

const PRICE_DP: i64 = 6;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// USD price, `None` when the chain has no oracle
    async fn price_usd(&self, token: Address) -> Result<Option<BigDecimal>>;
}

/// PYT -> xPYT rate; 1 without an xPYT
pub fn k(xpyt: Option<&Xpyt>) -> BigDecimal {
    match xpyt {
        Some(x) => amounts::checked_div(&x.conversion_rate, x.precision()).unwrap_or_default(),
        None => BigDecimal::from(1),
    }
}

/// xPYT per NYT at the first pool; K without pools
pub fn l(xpyt: Option<&Xpyt>) -> BigDecimal {
    match xpyt.and_then(|x| x.pools.first().map(|p| (x, p))) {
        Some((x, pool)) => pool.price_from(x.address()).clone(),
        None => k(xpyt),
    }
}

fn share_of(numerator: &BigDecimal, xpyt: Option<&Xpyt>, underlying: &BigDecimal) -> BigDecimal {
    let denominator = k(xpyt) + l(xpyt);
    let price = amounts::checked_div(&(numerator * underlying), &denominator).unwrap_or_default();
    amounts::round_dp(&price, PRICE_DP)
}

/// Price of every token facet of `vault`
pub fn vault_prices(vault: &Vault) -> HashMap<Address, BigDecimal> {
    let mut prices = HashMap::new();
    let underlying = if vault.underlying.is_some() {
        vault.underlying_price_usd.clone()
    } else {
        BigDecimal::default()
    };
    let first = vault.xpyt.first();

    if let Some(token) = &vault.underlying {
        prices.insert(token.address, underlying.clone());
    }
    if let Some(token) = &vault.share {
        prices.insert(token.address, amounts::round_dp(&vault.apply_price_per_share(&underlying), PRICE_DP));
    }
    for xpyt in &vault.xpyt {
        prices.insert(xpyt.address(), share_of(&BigDecimal::from(1), Some(xpyt), &underlying));
    }
    if let Some(token) = &vault.pyt {
        prices.insert(token.address, share_of(&k(first), first, &underlying));
    }
    if let Some(token) = &vault.nyt {
        prices.insert(token.address, share_of(&l(first), first, &underlying));
    }
    prices
}

/// Per-chain price cache
pub struct PriceBook {
    oracles: HashMap<u64, Arc<dyn PriceOracle>>,
    prices: RwLock<HashMap<u64, HashMap<Address, BigDecimal>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self {
            oracles: HashMap::new(),
            prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_oracle(mut self, chain_id: u64, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracles.insert(chain_id, oracle);
        self
    }

    /// Price every vault token on `chain_id`
    pub async fn load(&self, chain_id: u64, vaults: &[Vault]) {
        let mut loaded = HashMap::new();
        for vault in vaults {
            loaded.extend(vault_prices(vault));
        }
        debug!("Priced {} tokens on chain {}", loaded.len(), chain_id);
        self.prices.write().await.entry(chain_id).or_default().extend(loaded);
    }

    pub async fn price(&self, chain_id: u64, token: Address) -> BigDecimal {
        if let Some(price) = self.prices.read().await.get(&chain_id).and_then(|p| p.get(&token)) {
            return price.clone();
        }

        let Some(oracle) = self.oracles.get(&chain_id) else {
            return BigDecimal::default();
        };
        let price = match oracle.price_usd(token).await {
            Ok(price) => price.unwrap_or_default(),
            Err(e) => {
                warn!("⚠️ Oracle price for {} failed: {}", token, e);
                return BigDecimal::default();
            }
        };

        self.prices
            .write()
            .await
            .entry(chain_id)
            .or_default()
            .insert(token, price.clone());
        price
    }

    pub async fn invalidate(&self, chain_id: u64) {
        self.prices.write().await.remove(&chain_id);
    }
}

impl Default for PriceBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::fixtures::{addr, dec, vault};
    use eyre::eyre;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingOracle {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PriceOracle for CountingOracle {
        async fn price_usd(&self, _token: Address) -> Result<Option<BigDecimal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(eyre!("oracle reverted"))
            } else {
                Ok(Some(dec("2.5")))
            }
        }
    }

    #[test]
    fn test_k_and_l() {
        let v = vault();
        let x = v.xpyt.first();
        assert_eq!(k(x), dec("0.8"));
        // fixture pool has the xPYT as token0 at 0.25
        assert_eq!(l(x), dec("0.25"));
        assert_eq!(k(None), dec("1"));
        assert_eq!(l(None), dec("1"));
    }

    #[test]
    fn test_l_defaults_to_k_without_pools() {
        let mut v = vault();
        v.xpyt[0].pools.clear();
        assert_eq!(l(v.xpyt.first()), dec("0.8"));
    }

    #[test]
    fn test_vault_prices() {
        let mut v = vault();
        v.underlying_price_usd = dec("2.1");
        let prices = vault_prices(&v);

        assert_eq!(prices[&addr(0x11)], dec("2.1"));
        assert_eq!(prices[&addr(0x12)], dec("2.205"));
        // K + L = 1.05
        assert_eq!(prices[&addr(0x15)], dec("2"));
        assert_eq!(prices[&addr(0x13)], dec("1.6"));
        assert_eq!(prices[&addr(0x14)], dec("0.5"));
        // PYT + NYT always add up to the underlying
        assert_eq!(&prices[&addr(0x13)] + &prices[&addr(0x14)], dec("2.1"));
    }

    #[tokio::test]
    async fn test_oracle_fallback_is_cached() {
        let oracle = Arc::new(CountingOracle { calls: AtomicUsize::new(0), fail: false });
        let book = PriceBook::new().with_oracle(1, oracle.clone());
        book.load(1, &[vault()]).await;

        assert_eq!(book.price(1, addr(0x11)).await, dec("1"));
        assert_eq!(book.price(1, addr(0x99)).await, dec("2.5"));
        assert_eq!(book.price(1, addr(0x99)).await, dec("2.5"));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);

        book.invalidate(1).await;
        assert_eq!(book.price(1, addr(0x11)).await, dec("2.5"));
    }

    #[tokio::test]
    async fn test_missing_or_failing_oracle_prices_zero() {
        let book = PriceBook::new();
        assert_eq!(book.price(1, addr(0x99)).await, BigDecimal::default());

        let failing = Arc::new(CountingOracle { calls: AtomicUsize::new(0), fail: true });
        let book = PriceBook::new().with_oracle(1, failing.clone());
        assert_eq!(book.price(1, addr(0x99)).await, BigDecimal::default());
        assert_eq!(book.price(1, addr(0x99)).await, BigDecimal::default());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }
}
