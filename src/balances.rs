//! Per-(chain, user) token balances
//!
//! Balances are kept as raw on-chain integers and scaled with the token's
//! decimals on the way out. The whole book is dropped whenever the
//! connected account changes.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use eyre::{eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::amounts;
use crate::tokens::{Token, Vault, ETH_ADDRESS};

#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// Balances of `owner` for every readable token, ETH included
    async fn balances(&self, owner: Address, tokens: &[Address]) -> Result<HashMap<Address, U256>>;

    async fn balance(&self, owner: Address, token: Address) -> Result<U256>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;
}

type BookKey = (u64, Address);

pub struct BalanceBook {
    readers: HashMap<u64, Arc<dyn BalanceReader>>,
    balances: RwLock<HashMap<BookKey, HashMap<Address, U256>>>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
            balances: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_reader(mut self, chain_id: u64, reader: Arc<dyn BalanceReader>) -> Self {
        self.readers.insert(chain_id, reader);
        self
    }

    fn reader(&self, chain_id: u64) -> Result<&Arc<dyn BalanceReader>> {
        self.readers
            .get(&chain_id)
            .ok_or_else(|| eyre!("No balance reader for chain {}", chain_id))
    }

    /// Read every vault token plus ETH in one batch and replace the cached
    /// entry for `(chain_id, owner)`
    pub async fn load(&self, chain_id: u64, owner: Address, vaults: &[Vault]) -> Result<HashMap<Address, U256>> {
        let mut seen = HashSet::new();
        let mut tokens = vec![ETH_ADDRESS];
        seen.insert(ETH_ADDRESS);
        for token in vaults.iter().flat_map(|v| v.tokens()) {
            if seen.insert(token.address) {
                tokens.push(token.address);
            }
        }

        let loaded = self.reader(chain_id)?.balances(owner, &tokens).await?;
        info!("💰 Loaded {} balance(s) for {} on chain {}", loaded.len(), owner, chain_id);
        self.balances.write().await.insert((chain_id, owner), loaded.clone());
        Ok(loaded)
    }

    /// Cached raw balance
    pub async fn get(&self, chain_id: u64, owner: Address, token: Address) -> Option<U256> {
        self.balances
            .read()
            .await
            .get(&(chain_id, owner))
            .and_then(|b| b.get(&token))
            .copied()
    }

    /// Cached balance in token units, zero when unknown
    pub async fn amount(&self, chain_id: u64, owner: Address, token: &Token) -> BigDecimal {
        self.get(chain_id, owner, token.address)
            .await
            .map(|raw| amounts::from_chain_units(raw, token.decimals))
            .unwrap_or_default()
    }

    /// Re-read a single token, typically after a transaction touched it
    pub async fn refresh(&self, chain_id: u64, owner: Address, token: Address) -> Result<U256> {
        let balance = self.reader(chain_id)?.balance(owner, token).await?;
        debug!("Refreshed {} balance for {}: {}", token, owner, balance);
        self.balances
            .write()
            .await
            .entry((chain_id, owner))
            .or_default()
            .insert(token, balance);
        Ok(balance)
    }

    /// Uncached allowance read
    pub async fn allowance(&self, chain_id: u64, token: Address, owner: Address, spender: Address) -> Result<U256> {
        self.reader(chain_id)?.allowance(token, owner, spender).await
    }

    pub async fn clear(&self) {
        self.balances.write().await.clear();
    }
}

impl Default for BalanceBook {
    fn default() -> Self {
        Self::new()
    }
}
