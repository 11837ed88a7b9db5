//! Human-readable currency amounts.
//!
//! Plan prices are decimal strings denominated in USD (`"350"`, `"12.50"`).
//! Tokens move in integer minor units, so a price is scaled by
//! `10^decimals` before it becomes part of a transfer, and scaled back when a
//! confirmed transfer is written to a receipt.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Errors produced while converting between display and minor-unit amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The input is not a decimal number.
    #[error("invalid amount {0:?}")]
    Malformed(String),
    /// Zero and negative amounts cannot be paid.
    #[error("amount must be greater than zero, got {0}")]
    NotPositive(Decimal),
    /// The amount has more fractional digits than the token supports.
    #[error("amount {amount} has more than {decimals} decimal places")]
    TooPrecise {
        /// The rejected amount.
        amount: Decimal,
        /// Decimal places supported by the token.
        decimals: u8,
    },
    /// The scaled amount does not fit in a `u64`.
    #[error("amount {0} overflows the token's minor units")]
    Overflow(Decimal),
}

/// Parses a decimal price string into token minor units.
///
/// `"350"` with 6 decimals becomes `350_000_000`.
///
/// # Errors
///
/// Returns [`AmountError`] if the string is not a positive decimal, carries
/// more precision than `decimals`, or overflows `u64` once scaled.
pub fn to_minor_units(price: &str, decimals: u8) -> Result<u64, AmountError> {
    let amount = Decimal::from_str(price.trim())
        .map_err(|_| AmountError::Malformed(price.to_owned()))?;
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive(amount));
    }
    if amount.normalize().scale() > u32::from(decimals) {
        return Err(AmountError::TooPrecise { amount, decimals });
    }
    let scale = 10_i128
        .checked_pow(u32::from(decimals))
        .and_then(|s| Decimal::try_from_i128_with_scale(s, 0).ok())
        .ok_or(AmountError::Overflow(amount))?;
    amount
        .checked_mul(scale)
        .and_then(|scaled| scaled.to_u64())
        .ok_or(AmountError::Overflow(amount))
}

/// Converts minor units back to a display amount.
///
/// The result is normalized, so `350_000_000` with 6 decimals is `350`.
#[must_use]
pub fn from_minor_units(amount: u64, decimals: u8) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(amount), u32::from(decimals)).normalize()
}

/// Formats minor units as the plain decimal string used in receipts.
#[must_use]
pub fn format_minor_units(amount: u64, decimals: u8) -> String {
    from_minor_units(amount, decimals).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_price_scales_by_decimals() {
        assert_eq!(to_minor_units("350", 6).unwrap(), 350_000_000);
        assert_eq!(to_minor_units("1000", 6).unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_fractional_price() {
        assert_eq!(to_minor_units("12.50", 6).unwrap(), 12_500_000);
        assert_eq!(to_minor_units(" 0.000001 ", 6).unwrap(), 1);
    }

    #[test]
    fn test_rejects_non_positive() {
        assert!(matches!(
            to_minor_units("0", 6),
            Err(AmountError::NotPositive(_))
        ));
        assert!(matches!(
            to_minor_units("-5", 6),
            Err(AmountError::NotPositive(_))
        ));
    }

    #[test]
    fn test_rejects_excess_precision() {
        assert!(matches!(
            to_minor_units("1.0000001", 6),
            Err(AmountError::TooPrecise { decimals: 6, .. })
        ));
        // trailing zeros are not precision
        assert_eq!(to_minor_units("1.5000000", 6).unwrap(), 1_500_000);
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(
            to_minor_units("ten", 6),
            Err(AmountError::Malformed("ten".to_owned()))
        );
    }

    #[test]
    fn test_format_is_normalized() {
        assert_eq!(format_minor_units(350_000_000, 6), "350");
        assert_eq!(format_minor_units(12_500_000, 6), "12.5");
        assert_eq!(from_minor_units(5_000_000, 9), Decimal::new(5, 3));
    }
}
