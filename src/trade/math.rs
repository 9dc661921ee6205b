//! Fee, conversion, slippage and price-impact arithmetic

use bigdecimal::BigDecimal;
use bigdecimal::ToPrimitive;

use crate::amounts;
use crate::errors::QuoteError;
use crate::tokens::Xpyt;

/// PYT -> xPYT units: `amount × conversionRate / precision`
pub fn convert_to_shares(xpyt: &Xpyt, pyt_amount: &BigDecimal) -> BigDecimal {
    pyt_amount * &xpyt.conversion_rate / xpyt.precision()
}

/// xPYT -> PYT units: `amount × precision / conversionRate`
pub fn convert_to_assets(xpyt: &Xpyt, xpyt_amount: &BigDecimal) -> Result<BigDecimal, QuoteError> {
    amounts::checked_div(&(xpyt_amount * xpyt.precision()), &xpyt.conversion_rate)
        .ok_or(QuoteError::ZeroConversionRate(xpyt.address()))
}

/// Deduct the protocol fee (basis points) from an input amount
pub fn apply_fee(amount: &BigDecimal, fee_bps: u32) -> BigDecimal {
    let fee = BigDecimal::from(fee_bps) / BigDecimal::from(10_000u32);
    amount - amount * fee
}

/// Per-hop tolerance so that `hops` sequential hops compound to at most
/// `slippage_bps` in total: `(1 - (1 - s)^(1/hops)) × 10000`, floored.
pub fn calculate_slippage(slippage_bps: u32, hops: u32) -> u32 {
    if hops <= 1 {
        return slippage_bps;
    }
    let total = (slippage_bps.min(10_000) as f64) / 10_000.0;
    let per_hop = 1.0 - (1.0 - total).powf(1.0 / hops as f64);
    let bps = (per_hop * 10_000.0).floor();
    // floating error must never round a hop above what compounds back to the total
    let mut hop = bps as u32;
    while hop > 0 && compounded_slippage(hop, hops) > slippage_bps {
        hop -= 1;
    }
    hop
}

/// Total tolerance of `hops` sequential hops at `hop_bps`, rounded up to whole bps
pub fn compounded_slippage(hop_bps: u32, hops: u32) -> u32 {
    let keep = BigDecimal::from(10_000u32 - hop_bps.min(10_000)) / BigDecimal::from(10_000u32);
    let total_keep = amounts::pow(&keep, hops);
    let lost = (BigDecimal::from(1) - total_keep) * BigDecimal::from(10_000u32);
    lost.with_scale_round(0, bigdecimal::RoundingMode::Ceiling)
        .to_u32()
        .unwrap_or(u32::MAX)
}

/// Combine two sequential percent impacts as independent losses
pub fn combine_price_impact(first: &BigDecimal, second: &BigDecimal) -> BigDecimal {
    first + second - first * second / BigDecimal::from(100)
}
