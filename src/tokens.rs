//! Token and vault data model
//!
//! Every vault groups five token facets of one yield-bearing position:
//! - the underlying asset and the vault share it is deposited into
//! - the PYT / NYT pair minted 1:1 against deposits
//! - zero or more xPYT deployments wrapping the PYT
//!
//! Entities are loaded from the indexer plus one multicall for metadata and
//! are never mutated in place; a refetch replaces them wholesale.

use alloy_primitives::{address, Address};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amounts;

/// Pseudo-address used for native ETH
pub const ETH_ADDRESS: Address = address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");

/// Icon used when the token list has no entry for an address
pub const UNKNOWN_ICON: &str = "assets/img/tokens/unknown.svg";

// ============================================
// TOKEN
// ============================================

/// An ERC-20 token (or the ETH pseudo-token)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub name: String,
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    /// 10^decimals
    pub precision: BigDecimal,
    pub icon_path: String,
}

impl Token {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, address: Address, decimals: u8) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            address,
            decimals,
            precision: amounts::pow10(decimals as u32),
            icon_path: UNKNOWN_ICON.to_string(),
        }
    }

    pub fn with_icon(mut self, icon_path: impl Into<String>) -> Self {
        self.icon_path = icon_path.into();
        self
    }

    /// Native ether
    pub fn ether() -> Self {
        Self::new("Ether", "ETH", ETH_ADDRESS, 18).with_icon("assets/img/tokens/eth.png")
    }

    pub fn is_eth(&self) -> bool {
        self.address == ETH_ADDRESS
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.address)
    }
}

// ============================================
// POOL / xPYT
// ============================================

/// Point-in-time snapshot of a Uniswap V3 pool pairing an xPYT with its NYT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool contract address
    pub id: Address,
    /// Fee tier in hundredths of a bip (3000 = 0.3%)
    pub fee: u32,
    pub token0: Address,
    pub token1: Address,
    pub liquidity: BigDecimal,
    /// token0 received for one token1
    pub token0_price: BigDecimal,
    /// token1 received for one token0
    pub token1_price: BigDecimal,
}

impl Pool {
    /// Units of `token` per one unit of the other side
    pub fn price_from(&self, token: Address) -> &BigDecimal {
        if token == self.token0 {
            &self.token0_price
        } else {
            &self.token1_price
        }
    }
}

/// Wrapped, auto-compounding PYT deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xpyt {
    pub token: Token,
    pub uniswap_v3_pool_fee: u32,
    pub uniswap_v3_twap_seconds_ago: u32,
    pub pounder_reward_multiplier: BigDecimal,
    pub min_output_multiplier: BigDecimal,
    /// 1 PYT = conversion_rate / precision xPYT
    pub conversion_rate: BigDecimal,
    pub pools: Vec<Pool>,
}

impl Xpyt {
    pub fn address(&self) -> Address {
        self.token.address
    }

    pub fn precision(&self) -> &BigDecimal {
        &self.token.precision
    }

    /// Highest liquidity among this deployment's pools
    pub fn max_pool_liquidity(&self) -> Option<&BigDecimal> {
        self.pools.iter().map(|p| &p.liquidity).max()
    }
}

// ============================================
// VAULT / GATE
// ============================================

/// Role a token plays inside a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRole {
    Underlying,
    Share,
    Pyt,
    Nyt,
    Xpyt,
}

impl TokenRole {
    pub const ALL: [TokenRole; 5] = [
        TokenRole::Underlying,
        TokenRole::Share,
        TokenRole::Pyt,
        TokenRole::Nyt,
        TokenRole::Xpyt,
    ];
}

impl fmt::Display for TokenRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRole::Underlying => write!(f, "underlying"),
            TokenRole::Share => write!(f, "share"),
            TokenRole::Pyt => write!(f, "pyt"),
            TokenRole::Nyt => write!(f, "nyt"),
            TokenRole::Xpyt => write!(f, "xpyt"),
        }
    }
}

/// One yield-bearing position and its token facets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Share price scaled by 1e27
    pub price_per_vault_share: BigDecimal,
    pub underlying_price_usd: BigDecimal,
    pub underlying: Option<Token>,
    pub share: Option<Token>,
    pub pyt: Option<Token>,
    pub nyt: Option<Token>,
    pub xpyt: Vec<Xpyt>,
}

impl Vault {
    /// Token in a single-token slot. `Xpyt` has no single slot and yields `None`.
    pub fn slot(&self, role: TokenRole) -> Option<&Token> {
        match role {
            TokenRole::Underlying => self.underlying.as_ref(),
            TokenRole::Share => self.share.as_ref(),
            TokenRole::Pyt => self.pyt.as_ref(),
            TokenRole::Nyt => self.nyt.as_ref(),
            TokenRole::Xpyt => None,
        }
    }

    /// Whether `address` fills the given role in this vault
    pub fn holds(&self, role: TokenRole, address: Address) -> bool {
        match role {
            TokenRole::Xpyt => self.xpyt_by_address(address).is_some(),
            _ => self.slot(role).is_some_and(|t| t.address == address),
        }
    }

    /// Role of `address` in this vault, if any
    pub fn role_of(&self, address: Address) -> Option<TokenRole> {
        TokenRole::ALL.into_iter().find(|role| self.holds(*role, address))
    }

    pub fn contains(&self, address: Address) -> bool {
        self.role_of(address).is_some()
    }

    pub fn xpyt_by_address(&self, address: Address) -> Option<&Xpyt> {
        self.xpyt.iter().find(|x| x.address() == address)
    }

    /// The xPYT trades route through: the only deployment, else the one
    /// owning the most liquid pool, else the first listed.
    pub fn choose_xpyt(&self) -> Option<&Xpyt> {
        if self.xpyt.len() <= 1 {
            return self.xpyt.first();
        }
        let mut best: Option<(&Xpyt, &BigDecimal)> = None;
        for xpyt in &self.xpyt {
            if let Some(liquidity) = xpyt.max_pool_liquidity() {
                if best.map_or(true, |(_, top)| liquidity > top) {
                    best = Some((xpyt, liquidity));
                }
            }
        }
        best.map(|(x, _)| x).or_else(|| self.xpyt.first())
    }

    /// pricePerVaultShare as a plain ratio
    pub fn price_per_share(&self) -> BigDecimal {
        &self.price_per_vault_share / amounts::pow10(27)
    }

    /// Scale an underlying amount by the vault share price
    pub fn apply_price_per_share(&self, amount: &BigDecimal) -> BigDecimal {
        amount * self.price_per_share()
    }

    /// Every populated token facet, xPYTs included
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        [&self.underlying, &self.share, &self.pyt, &self.nyt]
            .into_iter()
            .filter_map(|t| t.as_ref())
            .chain(self.xpyt.iter().map(|x| &x.token))
    }

    pub fn label(&self) -> String {
        self.share
            .as_ref()
            .or(self.underlying.as_ref())
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| "unknown vault".to_string())
    }
}

/// Adapter contract owning a set of vaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    pub address: Address,
    pub vaults: Vec<Vault>,
}

// ============================================
// TEST FIXTURES
// ============================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::str::FromStr;

    pub fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    pub fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    pub fn pool(id: u8, xpyt: Address, nyt: Address, liquidity: &str) -> Pool {
        Pool {
            id: addr(id),
            fee: 3000,
            token0: xpyt,
            token1: nyt,
            liquidity: dec(liquidity),
            token0_price: dec("0.25"),
            token1_price: dec("4"),
        }
    }

    pub fn xpyt(byte: u8, rate: &str, pools: Vec<Pool>) -> Xpyt {
        Xpyt {
            token: Token::new("xPYT", "xPYT", addr(byte), 18),
            uniswap_v3_pool_fee: 3000,
            uniswap_v3_twap_seconds_ago: 1800,
            pounder_reward_multiplier: dec("0.05"),
            min_output_multiplier: dec("0.95"),
            conversion_rate: dec(rate),
            pools,
        }
    }

    /// Vault on underlying 0x11, share 0x12, pyt 0x13, nyt 0x14, xpyt 0x15
    pub fn vault() -> Vault {
        let x = addr(0x15);
        let nyt = addr(0x14);
        Vault {
            price_per_vault_share: dec("1050000000000000000000000000"),
            underlying_price_usd: dec("1"),
            underlying: Some(Token::new("Dai", "DAI", addr(0x11), 18)),
            share: Some(Token::new("yvDAI", "yvDAI", addr(0x12), 18)),
            pyt: Some(Token::new("PYT", "pDAI", addr(0x13), 18)),
            nyt: Some(Token::new("NYT", "nDAI", nyt, 18)),
            xpyt: vec![xpyt(0x15, "800000000000000000", vec![pool(0x16, x, nyt, "1000")])],
        }
    }
}
