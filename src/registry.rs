//! Gate Registry
//!
//! Per-chain cache of gates and their vaults. Each chain keeps one snapshot
//! that expires after a TTL; every refill or invalidation bumps the chain's
//! version so in-flight work can tell it was computed against old data.

use alloy_primitives::Address;
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::amounts;
use crate::chains;
use crate::indexer::types::{GatesResponse, RawPool, RawVault, RawXpyt};
use crate::indexer::{self, queries, Subgraph};
use crate::tokens::{Gate, Pool, Token, Vault, Xpyt};

// ============================================
// SOURCES
// ============================================

/// ERC-20 metadata read on-chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[async_trait]
pub trait MetadataReader: Send + Sync {
    /// Metadata for every readable token; unreadable ones are left out
    async fn token_metadata(&self, tokens: &[Address]) -> Result<HashMap<Address, TokenMetadata>>;
}

#[async_trait]
pub trait GateSource: Send + Sync {
    async fn load_gates(&self) -> Result<Vec<Gate>>;
}

/// Gates from the subgraph, token slots filled from on-chain metadata
pub struct IndexerGateSource {
    subgraph: Arc<dyn Subgraph>,
    metadata: Arc<dyn MetadataReader>,
    icons: HashMap<Address, String>,
}

impl IndexerGateSource {
    pub fn new(chain_id: u64, subgraph: Arc<dyn Subgraph>, metadata: Arc<dyn MetadataReader>) -> Self {
        let icons = chains::default_tokens(chain_id)
            .into_iter()
            .map(|t| (t.address, t.icon_path))
            .collect();
        Self { subgraph, metadata, icons }
    }

    fn slot_token(&self, address: Address, metadata: &HashMap<Address, TokenMetadata>) -> Option<Token> {
        if address.is_zero() {
            return None;
        }
        let Some(meta) = metadata.get(&address) else {
            warn!("⚠️ No metadata for {}, leaving slot empty", address);
            return None;
        };
        let token = Token::new(meta.name.clone(), meta.symbol.clone(), address, meta.decimals);
        Some(match self.icons.get(&address) {
            Some(icon) => token.with_icon(icon.clone()),
            None => token,
        })
    }

    fn build_vault(&self, raw: RawVault, metadata: &HashMap<Address, TokenMetadata>) -> Vault {
        Vault {
            price_per_vault_share: raw.price_per_vault_share,
            underlying_price_usd: raw.underlying_price_usd / amounts::pow10(6),
            underlying: self.slot_token(raw.underlying, metadata),
            share: self.slot_token(raw.share, metadata),
            pyt: self.slot_token(raw.pyt, metadata),
            nyt: self.slot_token(raw.nyt, metadata),
            xpyt: raw.xpyt.into_iter().map(build_xpyt).collect(),
        }
    }
}

fn build_xpyt(raw: RawXpyt) -> Xpyt {
    Xpyt {
        token: Token::new(raw.name, raw.symbol, raw.address, raw.decimals),
        uniswap_v3_pool_fee: raw.uniswap_v3_pool_fee,
        uniswap_v3_twap_seconds_ago: raw.uniswap_v3_twap_seconds_ago,
        pounder_reward_multiplier: raw.pounder_reward_multiplier,
        min_output_multiplier: raw.min_output_multiplier,
        conversion_rate: raw.conversion_rate,
        pools: raw.pools.into_iter().map(build_pool).collect(),
    }
}

fn build_pool(raw: RawPool) -> Pool {
    Pool {
        id: raw.id,
        fee: raw.fee,
        token0: raw.token0,
        token1: raw.token1,
        liquidity: raw.liquidity,
        token0_price: raw.token0_price,
        token1_price: raw.token1_price,
    }
}

#[async_trait]
impl GateSource for IndexerGateSource {
    async fn load_gates(&self) -> Result<Vec<Gate>> {
        let response: GatesResponse = indexer::query(self.subgraph.as_ref(), &queries::gates()).await?;

        let mut seen = HashSet::new();
        let slots: Vec<Address> = response
            .gates
            .iter()
            .flat_map(|g| g.vaults.iter())
            .flat_map(|v| v.slot_addresses())
            .filter(|a| !a.is_zero() && seen.insert(*a))
            .collect();
        let metadata = self.metadata.token_metadata(&slots).await?;

        Ok(response
            .gates
            .into_iter()
            .map(|g| Gate {
                address: g.address,
                vaults: g.vaults.into_iter().map(|v| self.build_vault(v, &metadata)).collect(),
            })
            .collect())
    }
}

// ============================================
// REGISTRY
// ============================================

#[derive(Debug, Clone)]
struct Snapshot {
    fetched_at: Instant,
    gates: Arc<Vec<Gate>>,
}

#[derive(Default)]
struct RegistryState {
    snapshots: HashMap<u64, Snapshot>,
    versions: HashMap<u64, u64>,
}

impl RegistryState {
    fn bump(&mut self, chain_id: u64) -> u64 {
        let version = self.versions.entry(chain_id).or_insert(0);
        *version += 1;
        *version
    }
}

pub struct GateRegistry {
    sources: HashMap<u64, Arc<dyn GateSource>>,
    ttl: Duration,
    state: RwLock<RegistryState>,
}

impl GateRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sources: HashMap::new(),
            ttl,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn with_source(mut self, chain_id: u64, source: Arc<dyn GateSource>) -> Self {
        self.sources.insert(chain_id, source);
        self
    }

    /// Gates for `chain_id`, refetched when stale or when `refresh` is set
    pub async fn gates(&self, chain_id: u64, refresh: bool) -> Result<Arc<Vec<Gate>>> {
        Ok(self.snapshot(chain_id, refresh).await?.1)
    }

    pub async fn vaults(&self, chain_id: u64, refresh: bool) -> Result<Vec<Vault>> {
        Ok(self.versioned_vaults(chain_id, refresh).await?.1)
    }

    /// Vaults together with the version of the snapshot they came from
    pub async fn versioned_vaults(&self, chain_id: u64, refresh: bool) -> Result<(u64, Vec<Vault>)> {
        let (version, gates) = self.snapshot(chain_id, refresh).await?;
        Ok((version, gates.iter().flat_map(|g| g.vaults.iter().cloned()).collect()))
    }

    /// Version and gates, read under the same lock guard
    async fn snapshot(&self, chain_id: u64, refresh: bool) -> Result<(u64, Arc<Vec<Gate>>)> {
        if !refresh {
            let state = self.state.read().await;
            if let Some(snapshot) = state.snapshots.get(&chain_id) {
                if snapshot.fetched_at.elapsed() < self.ttl {
                    let version = state.versions.get(&chain_id).copied().unwrap_or(0);
                    return Ok((version, snapshot.gates.clone()));
                }
                debug!("Gate snapshot for chain {} expired", chain_id);
            }
        }

        let source = self
            .sources
            .get(&chain_id)
            .ok_or_else(|| eyre!("No gate source for chain {}", chain_id))?;
        let gates = Arc::new(source.load_gates().await?);

        let mut state = self.state.write().await;
        let version = state.bump(chain_id);
        state.snapshots.insert(
            chain_id,
            Snapshot {
                fetched_at: Instant::now(),
                gates: gates.clone(),
            },
        );

        let vault_count: usize = gates.iter().map(|g| g.vaults.len()).sum();
        info!("🏛️ Loaded {} gates / {} vaults on chain {} (v{})", gates.len(), vault_count, chain_id, version);
        Ok((version, gates))
    }

    /// Token by address, searching vault slots before xPYTs
    pub async fn token(&self, chain_id: u64, address: Address) -> Result<Option<Token>> {
        let vaults = self.vaults(chain_id, false).await?;
        let slot = vaults
            .iter()
            .flat_map(|v| [&v.underlying, &v.share, &v.pyt, &v.nyt])
            .flatten()
            .find(|t| t.address == address);
        if let Some(token) = slot {
            return Ok(Some(token.clone()));
        }
        Ok(vaults
            .iter()
            .flat_map(|v| v.xpyt.iter())
            .find(|x| x.address() == address)
            .map(|x| x.token.clone()))
    }

    pub async fn vault_by_share(&self, chain_id: u64, share: Address) -> Result<Option<Vault>> {
        let vaults = self.vaults(chain_id, false).await?;
        Ok(vaults
            .into_iter()
            .find(|v| v.share.as_ref().is_some_and(|s| s.address == share)))
    }

    /// The vault containing `token`, only when exactly one does
    pub async fn token_vault(&self, chain_id: u64, token: Address) -> Result<Option<Vault>> {
        let vaults = self.vaults(chain_id, false).await?;
        Ok(crate::trade::classify::unique_vault(token, &vaults).cloned())
    }

    /// Gate owning `vault`
    pub async fn vault_gate(&self, chain_id: u64, vault: &Vault) -> Result<Option<Address>> {
        let gates = self.gates(chain_id, false).await?;
        Ok(gates
            .iter()
            .find(|g| g.vaults.iter().any(|v| v.share == vault.share && v.underlying == vault.underlying))
            .map(|g| g.address))
    }

    pub fn gate_name(&self, chain_id: u64, gate: Address) -> Option<&'static str> {
        chains::chain(chain_id).ok().and_then(|c| c.gate_name(gate))
    }

    /// Drop the chain's snapshot; the next read refetches
    pub async fn invalidate(&self, chain_id: u64) {
        let mut state = self.state.write().await;
        if state.snapshots.remove(&chain_id).is_some() {
            let version = state.bump(chain_id);
            debug!("Invalidated gates for chain {} (v{})", chain_id, version);
        }
    }

    pub async fn version(&self, chain_id: u64) -> u64 {
        self.state.read().await.versions.get(&chain_id).copied().unwrap_or(0)
    }
}
