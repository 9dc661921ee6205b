//! Supported chains and their contract address book
//!
//! Ethereum mainnet, Rinkeby and Arbitrum. Everything a quote or a
//! transaction needs to know about a chain lives in one [`ChainInfo`] entry.

use alloy_primitives::{address, Address};
use eyre::{eyre, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::tokens::Token;

pub const ETHEREUM: u64 = 1;
pub const RINKEBY: u64 = 4;
pub const ARBITRUM: u64 = 42161;

/// Multicall3 (same address on all EVM chains)
pub const MULTICALL3: Address = address!("ca11bde05977b3631167028862bf2a173976ca11");

/// Uniswap SwapRouter02 (same address on all supported chains)
pub const UNISWAP_V3_ROUTER: Address = address!("68b3465833fb72a70ecdf485e0e4c7bd8665fc45");

/// Uniswap QuoterV2
pub const UNISWAP_V3_QUOTER: Address = address!("61ffe014ba17989e743c5f6cb21bf9697530b21e");

/// On-chain contracts the router talks to
#[derive(Debug, Clone)]
pub struct AddressBook {
    pub uniswap_v3_swapper: Address,
    pub uniswap_v3_juggler: Address,
    pub uniswap_v3_router: Address,
    pub uniswap_v3_quoter: Address,
    pub multicall3: Address,
    pub weth: Address,
    pub dai: Address,
    pub usdc: Address,
    pub zero_ex_proxy: Option<Address>,
    pub yearn_price_oracle: Option<Address>,
    pub yearn_gate: Address,
    pub erc4626_gate: Address,
}

/// Static description of a supported chain
#[derive(Debug, Clone)]
pub struct ChainInfo {
    pub chain_id: u64,
    pub name: &'static str,
    pub display_name: &'static str,
    pub native_symbol: &'static str,
    pub explorer_url: &'static str,
    /// Whether the 0x aggregator serves this chain
    pub supports_aggregator: bool,
    /// Whether transactions should carry an EIP-2930 access list
    pub use_access_list: bool,
    pub graphql_endpoint: &'static str,
    pub blocks_graphql_endpoint: &'static str,
    /// Earliest timestamp historical queries may reach back to
    pub deployment_timestamp: i64,
    pub contracts: AddressBook,
}

impl ChainInfo {
    /// Human name of a gate contract
    pub fn gate_name(&self, gate: Address) -> Option<&'static str> {
        if gate == self.contracts.yearn_gate {
            Some("YearnGate")
        } else if gate == self.contracts.erc4626_gate {
            Some("ERC4626Gate")
        } else {
            None
        }
    }

    pub fn weth_token(&self) -> Token {
        Token::new("Wrapped Ether", "WETH", self.contracts.weth, 18)
    }

    pub fn tx_url(&self, hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url, hash)
    }
}

lazy_static! {
    static ref CHAINS: HashMap<u64, ChainInfo> = {
        let mut m = HashMap::new();
        m.insert(ETHEREUM, ChainInfo {
            chain_id: ETHEREUM,
            name: "Ethereum",
            display_name: "Ethereum",
            native_symbol: "ETH",
            explorer_url: "https://etherscan.io",
            supports_aggregator: true,
            use_access_list: true,
            graphql_endpoint: "https://api.thegraph.com/subgraphs/name/timeless-fi/timeless",
            blocks_graphql_endpoint: "https://api.thegraph.com/subgraphs/name/blocklytics/ethereum-blocks",
            deployment_timestamp: 1654546268,
            contracts: AddressBook {
                uniswap_v3_swapper: address!("21b6e092a03456871ce14493c526832305618e27"),
                uniswap_v3_juggler: address!("79464810c6df82cbdbb4be23900250ed2311f105"),
                uniswap_v3_router: UNISWAP_V3_ROUTER,
                uniswap_v3_quoter: UNISWAP_V3_QUOTER,
                multicall3: MULTICALL3,
                weth: address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
                dai: address!("6b175474e89094c44da98b954eedeac495271d0f"),
                usdc: address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
                zero_ex_proxy: Some(address!("def1c0ded9bec7f1a1670819833240f027b25eff")),
                yearn_price_oracle: Some(address!("83d95e0d5f402511db06817aff3f9ea88224b030")),
                yearn_gate: address!("36b49ebf089be8860d7fc60f2553461e9cc8e9e2"),
                erc4626_gate: address!("bb443d6740322293fcee4414d03978c7e4bf5d55"),
            },
        });
        m.insert(RINKEBY, ChainInfo {
            chain_id: RINKEBY,
            name: "Rinkeby",
            display_name: "Rinkeby",
            native_symbol: "ETH",
            explorer_url: "https://rinkeby.etherscan.io",
            supports_aggregator: false,
            use_access_list: true,
            graphql_endpoint: "https://api.thegraph.com/subgraphs/name/timeless-fi/timeless-rinkeby",
            blocks_graphql_endpoint: "https://api.thegraph.com/subgraphs/name/blocklytics/rinkeby-blocks",
            deployment_timestamp: 1653189604,
            contracts: AddressBook {
                uniswap_v3_swapper: address!("407ab1393ad777f7511defead9b2d8a812e5f034"),
                uniswap_v3_juggler: address!("afa1aa79ed9eb33d4d6b32771d984fce97894926"),
                uniswap_v3_router: UNISWAP_V3_ROUTER,
                uniswap_v3_quoter: UNISWAP_V3_QUOTER,
                multicall3: MULTICALL3,
                weth: address!("c778417e063141139fce010982780140aa0cd5ab"),
                dai: address!("5592ec0cfb4dbc12d3ab100b257153436a1f0fea"),
                usdc: address!("4dbcdf9b62e891a7cec5a2568c3f4faf9e8abe2b"),
                zero_ex_proxy: None,
                yearn_price_oracle: None,
                yearn_gate: address!("d6ef221be3331e16478e73229e40e1f69c94d9e6"),
                erc4626_gate: address!("b5c82a0d5854e3bceb57f51776fb7bbf05ed4ac2"),
            },
        });
        m.insert(ARBITRUM, ChainInfo {
            chain_id: ARBITRUM,
            name: "Arbitrum One",
            display_name: "Arbitrum",
            native_symbol: "AETH",
            explorer_url: "https://arbiscan.io",
            supports_aggregator: false,
            use_access_list: false,
            graphql_endpoint: "https://api.thegraph.com/subgraphs/name/timeless-fi/timeless-arbitrum",
            blocks_graphql_endpoint: "https://api.thegraph.com/subgraphs/name/sushiswap/arbitrum-blocks",
            deployment_timestamp: 1661213374,
            contracts: AddressBook {
                uniswap_v3_swapper: address!("983dfd698bbbf72e585dbacda5b242221306565f"),
                uniswap_v3_juggler: address!("79464810c6df82cbdbb4be23900250ed2311f105"),
                uniswap_v3_router: UNISWAP_V3_ROUTER,
                uniswap_v3_quoter: UNISWAP_V3_QUOTER,
                multicall3: MULTICALL3,
                weth: address!("82af49447d8a07e3bd95bd0d56f35241523fbab1"),
                dai: address!("da10009cbd5d07dd0cecc66161fc93d7c9000da1"),
                usdc: address!("ff970a61a04b1ca14834a43f5de4533ebddb5cc8"),
                zero_ex_proxy: None,
                yearn_price_oracle: Some(address!("043518ab266485dc085a1db095b8d9c2fc78e9b9")),
                yearn_gate: address!("36b49ebf089be8860d7fc60f2553461e9cc8e9e2"),
                erc4626_gate: address!("bb443d6740322293fcee4414d03978c7e4bf5d55"),
            },
        });
        m
    };
}

/// Look up a supported chain
pub fn chain(chain_id: u64) -> Result<&'static ChainInfo> {
    CHAINS
        .get(&chain_id)
        .ok_or_else(|| eyre!("unsupported chain id {}", chain_id))
}

pub fn is_supported(chain_id: u64) -> bool {
    CHAINS.contains_key(&chain_id)
}

pub fn supported_chains() -> Vec<u64> {
    let mut ids: Vec<u64> = CHAINS.keys().copied().collect();
    ids.sort_unstable();
    ids
}

fn trustwallet_icon(address: &str) -> String {
    format!(
        "https://raw.githubusercontent.com/trustwallet/assets/master/blockchains/ethereum/assets/{}/logo.png",
        address
    )
}

/// Non-vault tokens offered for aggregator swaps
pub fn default_tokens(chain_id: u64) -> Vec<Token> {
    match chain_id {
        ETHEREUM => vec![
            Token::new("Dai Stablecoin", "DAI", address!("6b175474e89094c44da98b954eedeac495271d0f"), 18)
                .with_icon(trustwallet_icon("0x6B175474E89094C44Da98b954EedeAC495271d0F")),
            Token::new("Tether USD", "USDT", address!("dac17f958d2ee523a2206206994597c13d831ec7"), 6)
                .with_icon(trustwallet_icon("0xdAC17F958D2ee523a2206206994597C13D831ec7")),
            Token::new("USD Coin", "USDC", address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"), 6)
                .with_icon(trustwallet_icon("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")),
            Token::new("Wrapped BTC", "WBTC", address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599"), 8)
                .with_icon(trustwallet_icon("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599")),
            Token::new("Wrapped Ether", "WETH", address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"), 18)
                .with_icon(trustwallet_icon("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")),
        ],
        _ => vec![],
    }
}
