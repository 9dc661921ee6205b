//! PYT Router
//!
//! Quotes and executes trades between a yield vault's underlying asset,
//! its share token and the yield-split tokens minted against it (PYT, NYT
//! and the auto-compounding xPYT wrapper).
//!
//! Architecture:
//! - Registry: gates and vaults from the indexer, cached per chain
//! - Trade: classification, vault matching and quote composition
//! - Router / Aggregator: Uniswap V3 pools and the 0x quote API
//! - Executor: Swapper and Gate calldata and transaction submission

pub mod aggregator;
pub mod amounts;
pub mod analytics;
pub mod app;
pub mod balances;
pub mod chains;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod executor;
pub mod indexer;
pub mod permit;
pub mod pricing;
pub mod registry;
pub mod router;
pub mod session;
pub mod time;
pub mod tokens;
pub mod trade;

pub use app::App;
pub use config::Config;
pub use errors::{PermitError, QuoteError};
pub use tokens::{Token, Vault};
pub use trade::{Quote, QuoteRequest};
