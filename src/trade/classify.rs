//! Token classification, vault matching and trade planning
//!
//! A quote request is reduced to a [`TradePlan`]: one of the vault paths when
//! a single vault holds both tokens, otherwise a wrap, a plain aggregator swap
//! or an aggregator hop into a vault path.

use alloy_primitives::Address;
use tracing::warn;

use crate::chains::ChainInfo;
use crate::errors::QuoteError;
use crate::tokens::{Token, TokenRole, Vault};

/// Conversion inside one vault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultPath {
    UnderlyingToXpyt { xpyt: Address },
    UnderlyingToPyt,
    UnderlyingToNyt,
    XpytToUnderlying { xpyt: Address },
    PytToUnderlying,
    NytToUnderlying,
    XpytToNyt { xpyt: Address },
    NytToXpyt { xpyt: Address },
    PytToXpyt { xpyt: Address },
    XpytToPyt { xpyt: Address },
}

impl VaultPath {
    /// Resolve a role pair into a vault path
    pub fn resolve(from_role: TokenRole, to_role: TokenRole, from: Address, to: Address) -> Result<Self, QuoteError> {
        use TokenRole::*;

        match (from_role, to_role) {
            (Underlying, Xpyt) => Ok(VaultPath::UnderlyingToXpyt { xpyt: to }),
            (Underlying, Pyt) => Ok(VaultPath::UnderlyingToPyt),
            (Underlying, Nyt) => Ok(VaultPath::UnderlyingToNyt),
            (Xpyt, Underlying) => Ok(VaultPath::XpytToUnderlying { xpyt: from }),
            (Pyt, Underlying) => Ok(VaultPath::PytToUnderlying),
            (Nyt, Underlying) => Ok(VaultPath::NytToUnderlying),
            (Xpyt, Nyt) => Ok(VaultPath::XpytToNyt { xpyt: from }),
            (Nyt, Xpyt) => Ok(VaultPath::NytToXpyt { xpyt: to }),
            (Pyt, Xpyt) => Ok(VaultPath::PytToXpyt { xpyt: to }),
            (Xpyt, Pyt) => Ok(VaultPath::XpytToPyt { xpyt: from }),
            (Underlying | Share | Pyt | Nyt | Xpyt, _) => Err(QuoteError::UnsupportedPair { from: from_role, to: to_role }),
        }
    }

    /// Whether the path goes through an AMM pool
    pub fn uses_amm(&self) -> bool {
        !matches!(self, VaultPath::PytToXpyt { .. } | VaultPath::XpytToPyt { .. })
    }
}

/// How a quote is produced
#[derive(Debug, Clone, PartialEq)]
pub enum TradePlan {
    /// Both tokens belong to one vault
    Vault { vault: Vault, path: VaultPath },
    /// ETH -> WETH
    Wrap,
    /// WETH -> ETH
    Unwrap,
    /// Underlying -> underlying through the aggregator
    Aggregator,
    /// Aggregator into the vault's underlying, then a vault path
    Composite { vault: Vault, path: VaultPath },
}

impl TradePlan {
    pub fn label(&self) -> &'static str {
        match self {
            TradePlan::Vault { .. } => "vault",
            TradePlan::Wrap => "wrap",
            TradePlan::Unwrap => "unwrap",
            TradePlan::Aggregator => "aggregator",
            TradePlan::Composite { .. } => "composite",
        }
    }
}

/// Role of a token across all vaults; tokens no vault claims are treated as
/// underlying assets
pub fn classify(token: Address, vaults: &[Vault]) -> TokenRole {
    vaults
        .iter()
        .find_map(|vault| vault.role_of(token))
        .unwrap_or(TokenRole::Underlying)
}

/// First vault holding `from` and `to` in the given roles
pub fn match_vault<'a>(
    from_role: TokenRole,
    to_role: TokenRole,
    from: Address,
    to: Address,
    vaults: &'a [Vault],
) -> Option<&'a Vault> {
    let mut matches = vaults
        .iter()
        .filter(|vault| vault.holds(from_role, from) && vault.holds(to_role, to));

    let first = matches.next()?;
    let extra = matches.count();
    if extra > 0 {
        warn!(
            "⚠️ {} vaults hold {} ({}) and {} ({}); using {}",
            extra + 1, from, from_role, to, to_role, first.label()
        );
    }
    Some(first)
}

/// The vault containing `token`, only when exactly one does
pub fn unique_vault(token: Address, vaults: &[Vault]) -> Option<&Vault> {
    let mut matches = vaults.iter().filter(|vault| vault.contains(token));
    let first = matches.next()?;
    match matches.next() {
        Some(_) => None,
        None => Some(first),
    }
}

/// Choose how to trade `from` into `to`
pub fn plan(from: &Token, to: &Token, vaults: &[Vault], chain: &ChainInfo) -> Result<TradePlan, QuoteError> {
    let weth = chain.contracts.weth;

    if from.address == to.address {
        return Err(QuoteError::SameToken(from.address));
    }
    if from.is_eth() && to.address == weth {
        return Ok(TradePlan::Wrap);
    }
    if from.address == weth && to.is_eth() {
        return Ok(TradePlan::Unwrap);
    }

    let from_addr = if from.is_eth() { weth } else { from.address };
    let to_addr = if to.is_eth() { weth } else { to.address };
    let from_role = classify(from_addr, vaults);
    let to_role = classify(to_addr, vaults);

    if let Some(vault) = match_vault(from_role, to_role, from_addr, to_addr, vaults) {
        let path = VaultPath::resolve(from_role, to_role, from_addr, to_addr)?;
        return Ok(TradePlan::Vault { vault: vault.clone(), path });
    }

    use TokenRole::*;
    match (from_role, to_role) {
        (Underlying, Underlying) => {
            if !chain.supports_aggregator {
                return Err(QuoteError::AggregatorUnavailable(chain.chain_id));
            }
            Ok(TradePlan::Aggregator)
        }
        (Underlying, Pyt | Nyt | Xpyt) => {
            if !chain.supports_aggregator {
                return Err(QuoteError::AggregatorUnavailable(chain.chain_id));
            }
            let vault = unique_vault(to_addr, vaults).ok_or(QuoteError::NoUniqueVault(to_addr))?;
            let underlying = vault
                .underlying
                .as_ref()
                .ok_or_else(|| QuoteError::MissingSlot { vault: vault.label(), role: Underlying })?;
            let path = VaultPath::resolve(Underlying, to_role, underlying.address, to_addr)?;
            Ok(TradePlan::Composite { vault: vault.clone(), path })
        }
        (Underlying | Share | Pyt | Nyt | Xpyt, _) => Err(QuoteError::UnsupportedPair { from: from_role, to: to_role }),
    }
}
