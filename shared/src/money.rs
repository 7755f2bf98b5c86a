//! Fixed-point money helpers
//!
//! Amounts are `Decimal` everywhere in the API and `i64` minor units in
//! storage. One currency unit is `MINOR_UNITS_PER_UNIT` minor units, so sums
//! computed by the database stay exact. Rounding to two fractional digits is
//! applied only when a value is prepared for display.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Currency label used on reports
pub const CURRENCY: &str = "DA";

/// Number of fractional digits kept in storage
pub const MINOR_UNIT_SCALE: u32 = 4;

/// Minor units in one currency unit (10^MINOR_UNIT_SCALE)
pub const MINOR_UNITS_PER_UNIT: i64 = 10_000;

/// Fractional digits shown to operators
pub const DISPLAY_SCALE: u32 = 2;

/// Divisor used to split minor-unit columns before SQL aggregation, so
/// `SUM(x / SUM_SPLIT)` and `SUM(x % SUM_SPLIT)` stay far inside `i64`
pub const SUM_SPLIT: i64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("amount {amount} has more than {MINOR_UNIT_SCALE} fractional digits")]
    TooPrecise { amount: Decimal },

    #[error("amount is too large to be recorded")]
    Overflow,
}

/// Convert an amount to storage minor units
pub fn to_minor_units(amount: Decimal) -> Result<i64, MoneyError> {
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(MoneyError::TooPrecise { amount });
    }
    amount
        .checked_mul(Decimal::from(MINOR_UNITS_PER_UNIT))
        .and_then(|minor| minor.to_i64())
        .ok_or(MoneyError::Overflow)
}

/// Convert storage minor units back to an exact amount
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

/// Exact amount from a minor-unit total wider than `i64`
pub fn from_wide_minor_units(minor: i128) -> Result<Decimal, MoneyError> {
    Decimal::try_from_i128_with_scale(minor, MINOR_UNIT_SCALE).map_err(|_| MoneyError::Overflow)
}

/// Reassemble a total aggregated as high and low parts of [`SUM_SPLIT`]
pub fn from_split_sum(high: i64, low: i64) -> Result<Decimal, MoneyError> {
    from_wide_minor_units(i128::from(high) * i128::from(SUM_SPLIT) + i128::from(low))
}

/// `unit_price × quantity` in minor units, without rounding
pub fn line_total_minor(unit_price_minor: i64, quantity: i64) -> Result<i64, MoneyError> {
    unit_price_minor
        .checked_mul(quantity)
        .ok_or(MoneyError::Overflow)
}

/// `unit_price × quantity` as an exact amount
pub fn line_total(unit_price: Decimal, quantity: i64) -> Result<Decimal, MoneyError> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or(MoneyError::Overflow)
}

/// Round half away from zero to two fractional digits
pub fn round_for_display(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(DISPLAY_SCALE);
    rounded
}

/// Minor-unit sum straight to a display amount
pub fn display_from_minor(minor: i64) -> Decimal {
    round_for_display(from_minor_units(minor))
}

/// Render an amount as `1,234.50`
pub fn format_amount(amount: Decimal) -> String {
    let rounded = round_for_display(amount);
    let text = rounded.abs().to_string();
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac)
}
