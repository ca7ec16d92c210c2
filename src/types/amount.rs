//! Integer amount and decimal rate utilities.
//!
//! ## Overview
//!
//! Balances, order amounts and reserves are plain `u64` base units
//! (`1 NAMO = 1_000_000 unamo`). Rates, fee shares and discounts are
//! [`Decimal`] values. Every conversion from a `Decimal` product back to an
//! amount goes through this module so the rounding direction is explicit:
//!
//! - `mul_rate` / `div_rate` truncate toward zero (amounts paid out)
//! - `mul_rate_ceil` / `div_rate_ceil` round up (amounts charged)
//!
//! ## Why no floating point?
//!
//! Floating-point arithmetic can produce different results on different
//! hardware, breaking determinism across validating nodes.
//!
//! ## Examples
//!
//! ```
//! use money_order_engine::types::amount::{mul_rate, parse_rate};
//!
//! let fee_rate = parse_rate("0.003").unwrap();
//! assert_eq!(mul_rate(10_000, fee_rate), Some(30));
//! ```

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Base units per whole token.
pub const UNITS_PER_TOKEN: u64 = 1_000_000;

// ============================================================================
// Rate Conversion
// ============================================================================

/// Parse a non-negative decimal rate from a string.
///
/// # Example
///
/// ```
/// use money_order_engine::types::amount::parse_rate;
///
/// assert!(parse_rate("0.25").is_some());
/// assert!(parse_rate("-0.1").is_none());
/// assert!(parse_rate("abc").is_none());
/// ```
pub fn parse_rate(s: &str) -> Option<Decimal> {
    let rate = Decimal::from_str(s).ok()?;
    if rate.is_sign_negative() {
        return None;
    }
    Some(rate)
}

/// `true` if `rate` lies in `[0, 1]`.
#[inline]
pub fn is_fraction(rate: Decimal) -> bool {
    !rate.is_sign_negative() && rate <= Decimal::ONE
}

/// Convert a whole-token decimal (e.g. `"12.5"`) to base units.
pub fn tokens_to_units(tokens: Decimal) -> Option<u64> {
    if tokens.is_sign_negative() {
        return None;
    }
    tokens
        .checked_mul(Decimal::from(UNITS_PER_TOKEN))?
        .trunc()
        .to_u64()
}

/// Render base units as whole tokens, trailing zeros trimmed.
///
/// ```
/// use money_order_engine::types::amount::units_to_tokens;
///
/// assert_eq!(units_to_tokens(1_500_000), "1.5");
/// assert_eq!(units_to_tokens(10_000_000), "10");
/// ```
pub fn units_to_tokens(units: u64) -> String {
    let decimal = Decimal::from(units) / Decimal::from(UNITS_PER_TOKEN);
    format!("{}", decimal.normalize())
}

// ============================================================================
// Amount x Rate (rust_decimal for exactness)
// ============================================================================

/// `trunc(amount * rate)`
///
/// # Returns
///
/// * `Some(u64)` - the truncated product
/// * `None` - if the rate is negative or the product does not fit in `u64`
///
/// # Example
///
/// ```
/// use money_order_engine::types::amount::mul_rate;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(mul_rate(1_000, dec!(0.45)), Some(450));
/// assert_eq!(mul_rate(999, dec!(0.5)), Some(499));
/// ```
pub fn mul_rate(amount: u64, rate: Decimal) -> Option<u64> {
    if rate.is_sign_negative() {
        return None;
    }
    Decimal::from(amount).checked_mul(rate)?.trunc().to_u64()
}

/// `ceil(amount * rate)`
pub fn mul_rate_ceil(amount: u64, rate: Decimal) -> Option<u64> {
    if rate.is_sign_negative() {
        return None;
    }
    Decimal::from(amount).checked_mul(rate)?.ceil().to_u64()
}

/// `trunc(amount / rate)`, `None` for a zero rate.
pub fn div_rate(amount: u64, rate: Decimal) -> Option<u64> {
    if rate <= Decimal::ZERO {
        return None;
    }
    Decimal::from(amount).checked_div(rate)?.trunc().to_u64()
}

/// `ceil(amount / rate)`, `None` for a zero rate.
pub fn div_rate_ceil(amount: u64, rate: Decimal) -> Option<u64> {
    if rate <= Decimal::ZERO {
        return None;
    }
    Decimal::from(amount).checked_div(rate)?.ceil().to_u64()
}

// ============================================================================
// Integer helpers (u128 intermediates)
// ============================================================================

/// `floor(a * b / c)` with a `u128` intermediate.
///
/// ```
/// use money_order_engine::types::amount::mul_div;
///
/// assert_eq!(mul_div(u64::MAX, 2, 4), Some(u64::MAX / 2));
/// assert_eq!(mul_div(1, 1, 0), None);
/// ```
pub fn mul_div(a: u64, b: u64, c: u64) -> Option<u64> {
    if c == 0 {
        return None;
    }
    let result = (a as u128) * (b as u128) / (c as u128);
    u64::try_from(result).ok()
}

/// `ceil(a * b / c)` with a `u128` intermediate.
pub fn mul_div_ceil(a: u64, b: u64, c: u64) -> Option<u64> {
    if c == 0 {
        return None;
    }
    let numerator = (a as u128) * (b as u128);
    let c = c as u128;
    let result = numerator / c + u128::from(numerator % c != 0);
    u64::try_from(result).ok()
}

/// Integer square root, rounded down.
pub fn isqrt(value: u128) -> u64 {
    if value < 2 {
        return value as u64;
    }
    // Newton iteration from an upper bound
    let mut x = value;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x as u64
}

/// `a / b` as a Decimal, `None` when `b` is zero.
pub fn ratio(a: u64, b: u64) -> Option<Decimal> {
    if b == 0 {
        return None;
    }
    Decimal::from(a).checked_div(Decimal::from(b))
}

/// Compare two amounts with a tolerance (for testing)
pub fn approx_eq(a: u64, b: u64, tolerance: u64) -> bool {
    a.abs_diff(b) <= tolerance
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("0.003"), Some(dec!(0.003)));
        assert_eq!(parse_rate("1"), Some(Decimal::ONE));
        assert_eq!(parse_rate("-0.5"), None);
        assert_eq!(parse_rate(""), None);
    }

    #[test]
    fn test_is_fraction() {
        assert!(is_fraction(Decimal::ZERO));
        assert!(is_fraction(dec!(0.5)));
        assert!(is_fraction(Decimal::ONE));
        assert!(!is_fraction(dec!(1.0001)));
        assert!(!is_fraction(dec!(-0.1)));
    }

    #[test]
    fn test_mul_rate_truncates() {
        assert_eq!(mul_rate(10_000, dec!(0.003)), Some(30));
        assert_eq!(mul_rate(333, dec!(0.01)), Some(3));
        assert_eq!(mul_rate(1, dec!(0.999)), Some(0));
        assert_eq!(mul_rate(100, dec!(-1)), None);
    }

    #[test]
    fn test_mul_rate_ceil_rounds_up() {
        assert_eq!(mul_rate_ceil(333, dec!(0.01)), Some(4));
        assert_eq!(mul_rate_ceil(300, dec!(0.01)), Some(3));
    }

    #[test]
    fn test_div_rate() {
        assert_eq!(div_rate(997_000, dec!(100)), Some(9_970));
        assert_eq!(div_rate(10, dec!(3)), Some(3));
        assert_eq!(div_rate_ceil(10, dec!(3)), Some(4));
        assert_eq!(div_rate(10, Decimal::ZERO), None);
    }

    #[test]
    fn test_mul_div() {
        assert_eq!(mul_div(10, 10, 3), Some(33));
        assert_eq!(mul_div_ceil(10, 10, 3), Some(34));
        assert_eq!(mul_div_ceil(10, 9, 3), Some(30));
        assert_eq!(mul_div(u64::MAX, u64::MAX, 1), None);
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(1_000_000u128 * 4_000_000u128), 2_000_000);
        let big = (u64::MAX as u128) * (u64::MAX as u128);
        assert_eq!(isqrt(big), u64::MAX);
    }

    #[test]
    fn test_tokens_units() {
        assert_eq!(tokens_to_units(dec!(12.5)), Some(12_500_000));
        assert_eq!(tokens_to_units(dec!(-1)), None);
        assert_eq!(units_to_tokens(12_500_000), "12.5");
    }

    #[test]
    fn test_approx_eq() {
        assert!(approx_eq(100, 101, 1));
        assert!(approx_eq(101, 100, 1));
        assert!(!approx_eq(100, 102, 1));
    }
}
