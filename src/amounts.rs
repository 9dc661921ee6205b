//! Decimal / chain-unit arithmetic
//!
//! UI-facing values are `BigDecimal`, never floats. Chain-facing values are
//! integers obtained by scaling with the token precision and truncating
//! toward zero, so a contract never receives more than was authorized.

use alloy_primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::{BigDecimal, RoundingMode, Signed, Zero};
use eyre::{ensure, eyre, Result};
use std::str::FromStr;

/// 10^exp as an exact decimal
pub fn pow10(exp: u32) -> BigDecimal {
    BigDecimal::new(BigInt::from(1), -(exp as i64))
}

pub fn u256_to_big_int(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

pub fn big_int_to_u256(value: &BigInt) -> Result<U256> {
    let (sign, bytes) = value.to_bytes_be();
    ensure!(sign != Sign::Minus, "negative value cannot be sent on-chain: {}", value);
    ensure!(bytes.len() <= 32, "value too large for uint256: {}", value);
    U256::try_from_be_slice(&bytes).ok_or_else(|| eyre!("value too large for uint256: {}", value))
}

/// Raw integer as a decimal, no scaling
pub fn u256_to_decimal(value: U256) -> BigDecimal {
    BigDecimal::new(u256_to_big_int(value), 0)
}

/// Raw on-chain integer to token units
pub fn from_chain_units(raw: U256, decimals: u8) -> BigDecimal {
    BigDecimal::new(u256_to_big_int(raw), decimals as i64)
}

/// Token units to the raw on-chain integer, truncating toward zero
pub fn to_chain_units(amount: &BigDecimal, decimals: u8) -> Result<U256> {
    let scaled = (amount * pow10(decimals as u32)).with_scale_round(0, RoundingMode::Down);
    let (int, _) = scaled.as_bigint_and_exponent();
    big_int_to_u256(&int)
}

/// Drop digits beyond `decimals` places (toward zero)
pub fn truncate(amount: &BigDecimal, decimals: u8) -> BigDecimal {
    amount.with_scale_round(decimals as i64, RoundingMode::Down)
}

/// Round half-up to `places` for display and price tables
pub fn round_dp(amount: &BigDecimal, places: i64) -> BigDecimal {
    amount.with_scale_round(places, RoundingMode::HalfUp)
}

/// `a / b`, or `None` when `b` is zero
pub fn checked_div(a: &BigDecimal, b: &BigDecimal) -> Option<BigDecimal> {
    if b.is_zero() {
        None
    } else {
        Some(a / b)
    }
}

/// Percentage change from `baseline` to `current`; `None` when there is no
/// usable baseline
pub fn percent_change(current: &BigDecimal, baseline: &BigDecimal) -> Option<BigDecimal> {
    checked_div(&(current - baseline), baseline).map(|ratio| ratio * BigDecimal::from(100))
}

/// Parse a user-entered amount, rejecting zero and negatives
pub fn parse_amount(input: &str) -> Result<BigDecimal> {
    let value = BigDecimal::from_str(input.trim()).map_err(|e| eyre!("invalid amount '{}': {}", input, e))?;
    ensure!(value.is_positive(), "amount must be positive, got {}", input);
    Ok(value)
}

/// Integer power for decimals (exact, repeated squaring)
pub fn pow(base: &BigDecimal, exp: u32) -> BigDecimal {
    let mut result = BigDecimal::from(1);
    let mut acc = base.clone();
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = (&result * &acc).with_prec(60);
        }
        acc = (&acc * &acc).with_prec(60);
        e >>= 1;
    }
    result
}

/// Split a value into a short number and a magnitude label:
/// 1_250_000 -> (1.25, "m"). Values outside [1e3, 1e15) are returned as-is.
pub fn format_magnitude(value: &BigDecimal) -> (BigDecimal, Option<&'static str>) {
    const LABELS: [(u32, &str); 4] = [(12, "t"), (9, "b"), (6, "m"), (3, "k")];

    if *value >= pow10(15) {
        return (value.clone(), None);
    }
    for (exp, label) in LABELS {
        let unit = pow10(exp);
        if *value >= unit {
            return ((value / unit).normalized(), Some(label));
        }
    }
    (value.clone(), None)
}

/// Human-readable amount, e.g. "1.25m"
pub fn display_amount(value: &BigDecimal, places: i64) -> String {
    let (short, label) = format_magnitude(value);
    format!("{}{}", round_dp(&short, places), label.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_to_chain_units_truncates() {
        // 1.9999999 USDC -> 1_999_999 raw, never rounded up
        assert_eq!(to_chain_units(&dec("1.9999999"), 6).unwrap(), U256::from(1_999_999u64));
        assert_eq!(to_chain_units(&dec("0"), 18).unwrap(), U256::ZERO);
        assert_eq!(
            to_chain_units(&dec("1.5"), 18).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
    }

    #[test]
    fn test_to_chain_units_rejects_negative() {
        assert!(to_chain_units(&dec("-1"), 18).is_err());
    }

    #[test]
    fn test_from_chain_units() {
        let raw = U256::from(123_456_789u64);
        assert_eq!(from_chain_units(raw, 6), dec("123.456789"));
        assert_eq!(to_chain_units(&from_chain_units(raw, 6), 6).unwrap(), raw);
    }

    #[test]
    fn test_u256_max_survives_conversion() {
        let max = u256_to_decimal(U256::MAX);
        let (int, _) = max.as_bigint_and_exponent();
        assert_eq!(big_int_to_u256(&int).unwrap(), U256::MAX);
    }

    #[test]
    fn test_percent_change_without_baseline() {
        assert_eq!(percent_change(&dec("110"), &dec("100")), Some(dec("10")));
        assert_eq!(percent_change(&dec("5"), &dec("0")), None);
    }

    #[test]
    fn test_format_magnitude() {
        assert_eq!(format_magnitude(&dec("1250000")), (dec("1.25"), Some("m")));
        assert_eq!(format_magnitude(&dec("999")), (dec("999"), None));
        assert_eq!(format_magnitude(&dec("2000000000000")), (dec("2"), Some("t")));
        assert_eq!(display_amount(&dec("4321"), 2), "4.32k");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(" 12.5 ").unwrap(), dec("12.5"));
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_pow() {
        assert_eq!(pow(&dec("1.1"), 2), dec("1.21"));
        assert_eq!(pow(&dec("2"), 0), dec("1"));
    }
}
