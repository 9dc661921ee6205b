//! Typed failures callers are expected to branch on.
//!
//! These travel inside `eyre::Report` and can be recovered with
//! `report.downcast_ref::<QuoteError>()`.

use alloy_primitives::Address;
use thiserror::Error;

use crate::tokens::TokenRole;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("source and destination are the same token ({0})")]
    SameToken(Address),

    #[error("no trade path from {from} to {to}")]
    UnsupportedPair { from: TokenRole, to: TokenRole },

    #[error("vault {0} has no xPYT deployment")]
    NoXpyt(String),

    #[error("vault {vault} is missing its {role} token")]
    MissingSlot { vault: String, role: TokenRole },

    #[error("xPYT {0} has no pool to route through")]
    NoPool(Address),

    #[error("token {0} does not belong to exactly one vault")]
    NoUniqueVault(Address),

    #[error("aggregator swaps are not available on chain {0}")]
    AggregatorUnavailable(u64),

    #[error("{0} has a zero conversion rate")]
    ZeroConversionRate(Address),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermitError {
    #[error("{0} permits are not supported")]
    Unsupported(String),

    #[error("token {0} does not expose a permit domain")]
    NotPermittable(Address),
}
