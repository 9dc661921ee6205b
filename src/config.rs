//! Runtime configuration
//!
//! Loaded from the environment (with `.env` support) or from a TOML file.
//! Every field has a default so a bare `pyt-router quote ...` works against
//! mainnet with public endpoints.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::aggregator::ZERO_EX_API_URL;
use crate::chains::{self, ChainInfo};

/// Upper bound accepted for the default slippage (50%)
pub const MAX_SLIPPAGE_BPS: u32 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Network ==========
    pub chain_id: u64,
    pub rpc_url: String,

    /// Overrides the chain's default vault indexer
    pub indexer_endpoint: Option<String>,

    /// Overrides the chain's default blocks indexer
    pub blocks_endpoint: Option<String>,

    // ========== Aggregator ==========
    pub aggregator_url: String,
    pub aggregator_api_key: Option<String>,

    // ========== Trading ==========
    /// Default slippage tolerance in basis points
    pub slippage_bps: u32,

    /// Seconds a quoted trade stays executable
    pub deadline_secs: u64,

    /// Quote desk debounce window
    pub debounce_ms: u64,

    // ========== Caching / IO ==========
    /// Lifetime of cached gates and vaults
    pub cache_ttl_secs: u64,
    pub http_timeout_secs: u64,

    // ========== Wallet ==========
    /// Hex private key used for permits and submission (KEEP SECRET!)
    pub signer_key: Option<String>,

    pub log_filter: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            // Network
            chain_id: env::var("CHAIN_ID")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            rpc_url: env::var("RPC_URL")
                .unwrap_or_else(|_| "https://eth.llamarpc.com".to_string()),
            indexer_endpoint: env::var("INDEXER_ENDPOINT").ok(),
            blocks_endpoint: env::var("BLOCKS_ENDPOINT").ok(),

            // Aggregator
            aggregator_url: env::var("AGGREGATOR_URL")
                .unwrap_or_else(|_| ZERO_EX_API_URL.to_string()),
            aggregator_api_key: env::var("AGGREGATOR_API_KEY").ok(),

            // Trading
            slippage_bps: env::var("SLIPPAGE_BPS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            deadline_secs: env::var("DEADLINE_SECS")
                .unwrap_or_else(|_| "1200".to_string())
                .parse()
                .unwrap_or(1200),
            debounce_ms: env::var("DEBOUNCE_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),

            // Caching
            cache_ttl_secs: env::var("CACHE_TTL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            http_timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),

            // Wallet
            signer_key: env::var("SIGNER_KEY").ok(),

            log_filter: env::var("LOG_FILTER")
                .unwrap_or_else(|_| "pyt_router=info".to_string()),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !chains::is_supported(self.chain_id) {
            return Err(eyre::eyre!(
                "Unsupported CHAIN_ID {} (supported: {:?})",
                self.chain_id,
                chains::supported_chains()
            ));
        }
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre::eyre!("Invalid RPC_URL - please set a valid node URL"));
        }
        if self.slippage_bps == 0 || self.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(eyre::eyre!(
                "SLIPPAGE_BPS should be between 1 and {} (currently {})",
                MAX_SLIPPAGE_BPS,
                self.slippage_bps
            ));
        }
        if self.deadline_secs == 0 {
            return Err(eyre::eyre!("DEADLINE_SECS must be positive"));
        }
        if self.http_timeout_secs == 0 {
            return Err(eyre::eyre!("HTTP_TIMEOUT_SECS must be positive"));
        }
        Ok(())
    }

    pub fn chain(&self) -> Result<&'static ChainInfo> {
        chains::chain(self.chain_id)
    }

    /// Vault indexer for the configured chain
    pub fn indexer_endpoint(&self) -> Result<String> {
        Ok(match &self.indexer_endpoint {
            Some(url) => url.clone(),
            None => self.chain()?.graphql_endpoint.to_string(),
        })
    }

    pub fn blocks_endpoint(&self) -> Result<String> {
        Ok(match &self.blocks_endpoint {
            Some(url) => url.clone(),
            None => self.chain()?.blocks_graphql_endpoint.to_string(),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let chain = self.chain().map(|c| c.display_name).unwrap_or("unknown");
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║              PYT ROUTER - CONFIGURATION                    ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Chain:             {:^40} ║", format!("{} ({})", chain, self.chain_id));
        println!("║ Indexer:           {:^40} ║",
            if self.indexer_endpoint.is_some() { "✓ Override" } else { "Chain default" }
        );
        println!("║ Blocks Indexer:    {:^40} ║",
            if self.blocks_endpoint.is_some() { "✓ Override" } else { "Chain default" }
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ TRADING                                                    ║");
        println!("║ • Slippage:        {:>38.2}% ║", self.slippage_bps as f64 / 100.0);
        println!("║ • Deadline:        {:>38} s ║", self.deadline_secs);
        println!("║ • Debounce:        {:>37} ms ║", self.debounce_ms);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SERVICES                                                   ║");
        println!("║ • Cache TTL:       {:>38} s ║", self.cache_ttl_secs);
        println!("║ • HTTP Timeout:    {:>38} s ║", self.http_timeout_secs);
        println!("║ • 0x API Key:      {:^40} ║",
            if self.aggregator_api_key.is_some() { "✓ Configured" } else { "✗ Not Set" }
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ WALLET                                                     ║");
        println!("║ • Signer Key:      {:^40} ║",
            if self.signer_key.is_some() { "✓ Configured" } else { "✗ Read-only" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: chains::ETHEREUM,
            rpc_url: "https://eth.llamarpc.com".to_string(),
            indexer_endpoint: None,
            blocks_endpoint: None,
            aggregator_url: ZERO_EX_API_URL.to_string(),
            aggregator_api_key: None,
            slippage_bps: 50,
            deadline_secs: 1200,
            debounce_ms: 500,
            cache_ttl_secs: 60,
            http_timeout_secs: 15,
            signer_key: None,
            log_filter: "pyt_router=info".to_string(),
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::ARBITRUM;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.slippage_bps, 50);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_validation() {
        let config = Config { chain_id: 56, ..Config::default() };
        assert_err!(config.validate());

        let config = Config { rpc_url: "https://mainnet.infura.io/v3/YOUR_API_KEY".into(), ..Config::default() };
        assert_err!(config.validate());

        let config = Config { slippage_bps: 0, ..Config::default() };
        assert_err!(config.validate());

        let config = Config { slippage_bps: 5_001, ..Config::default() };
        assert_err!(config.validate());
    }

    #[test]
    fn test_endpoint_overrides() {
        let config = Config { chain_id: ARBITRUM, ..Config::default() };
        assert_eq!(config.indexer_endpoint().unwrap(), chains::chain(ARBITRUM).unwrap().graphql_endpoint);

        let config = Config { blocks_endpoint: Some("http://localhost:8000/blocks".into()), ..config };
        assert_eq!(config.blocks_endpoint().unwrap(), "http://localhost:8000/blocks");
    }

    #[test]
    fn test_toml_file_roundtrip() {
        let path = env::temp_dir().join(format!("pyt-router-config-{}.toml", std::process::id()));
        let config = Config { slippage_bps: 125, signer_key: None, ..Config::default() };
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded.slippage_bps, 125);
        assert_eq!(loaded.indexer_endpoint, None);
    }
}
