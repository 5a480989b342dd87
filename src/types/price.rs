//! Decimal price and quantity utilities.
//!
//! ## Overview
//!
//! All prices and quantities use `rust_decimal::Decimal`. Nothing in the
//! matching or settlement path touches floating point, so a value stored as
//! `"0.000001"` comes back as exactly `0.000001`.
//!
//! ## Base Units
//!
//! Collaborators that work in integer token units (the proving circuit, the
//! settlement contract) expect amounts scaled by 10^18. [`to_base_units`]
//! performs that scaling with overflow checks.
//!
//! ## Examples
//!
//! ```
//! use dark_settlement::types::price::{parse_positive, clearing_price, midpoint};
//!
//! let a = parse_positive("100").unwrap();
//! let b = parse_positive("102").unwrap();
//! assert_eq!(clearing_price(a, b), Some(parse_positive("101").unwrap()));
//! assert_eq!(midpoint(a, b), clearing_price(a, b));
//! ```

use std::str::FromStr;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Decimal places used by on-chain token amounts.
pub const BASE_UNIT_DECIMALS: u32 = 18;

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

// ============================================================================
// Parsing
// ============================================================================

/// Parse a strictly positive decimal.
///
/// # Returns
///
/// * `Some(Decimal)` - The parsed value, normalized
/// * `None` - If parsing fails, or the value is zero or negative
///
/// # Example
///
/// ```
/// use dark_settlement::types::price::parse_positive;
///
/// assert!(parse_positive("1.5").is_some());
/// assert!(parse_positive("0").is_none());
/// assert!(parse_positive("-1").is_none());
/// assert!(parse_positive("abc").is_none());
/// ```
pub fn parse_positive(s: &str) -> Option<Decimal> {
    let d = Decimal::from_str(s.trim()).ok()?;
    if d.is_sign_negative() || d.is_zero() {
        return None;
    }
    Some(d.normalize())
}

/// Parse a decimal that may be zero (e.g. a `filled` quantity).
pub fn parse_non_negative(s: &str) -> Option<Decimal> {
    let d = Decimal::from_str(s.trim()).ok()?;
    if d.is_sign_negative() {
        return None;
    }
    Some(d.normalize())
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Notional value of an order: `size * price`.
///
/// Returns `None` on overflow.
pub fn checked_value(size: Decimal, price: Decimal) -> Option<Decimal> {
    size.checked_mul(price).map(|v| v.normalize())
}

/// Clearing price of a match: the arithmetic mean of both stated prices.
pub fn clearing_price(a: Decimal, b: Decimal) -> Option<Decimal> {
    let sum = a.checked_add(b)?;
    sum.checked_div(Decimal::TWO).map(|v| v.normalize())
}

/// Reference price from a book ticker: midpoint of bid and ask.
pub fn midpoint(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    clearing_price(bid, ask)
}

/// Absolute deviation of `price` from `reference` in basis points.
///
/// Returns `None` if the reference is zero.
pub fn deviation_bps(price: Decimal, reference: Decimal) -> Option<Decimal> {
    if reference.is_zero() {
        return None;
    }
    let diff = (price - reference).abs();
    diff.checked_mul(Decimal::from(BPS_DENOMINATOR))?
        .checked_div(reference)
}

/// Whether `price` lies within `tolerance_bps` of `reference`.
pub fn within_tolerance(price: Decimal, reference: Decimal, tolerance_bps: u32) -> bool {
    match deviation_bps(price, reference) {
        Some(dev) => dev <= Decimal::from(tolerance_bps),
        None => false,
    }
}

// ============================================================================
// Base-unit conversion
// ============================================================================

/// Scale a decimal amount to integer base units (10^18 per whole unit).
///
/// Fractional base units are truncated toward zero.
///
/// # Example
///
/// ```
/// use dark_settlement::types::price::{parse_positive, to_base_units};
///
/// let one = parse_positive("1").unwrap();
/// assert_eq!(to_base_units(one), Some(1_000_000_000_000_000_000));
/// ```
pub fn to_base_units(amount: Decimal) -> Option<u128> {
    if amount.is_sign_negative() {
        return None;
    }
    let whole = amount.trunc().to_u128()?;
    let frac = amount.fract();
    let scale = 10u128.pow(BASE_UNIT_DECIMALS);

    // Decimal carries at most 28 fractional digits, so the fraction scaled by
    // 10^18 always fits.
    let frac_units = frac
        .checked_mul(Decimal::from_u128(scale)?)?
        .trunc()
        .to_u128()?;

    whole.checked_mul(scale)?.checked_add(frac_units)
}

/// Inverse of [`to_base_units`].
pub fn from_base_units(units: u128) -> Option<Decimal> {
    let scale = 10u128.pow(BASE_UNIT_DECIMALS);
    let whole = Decimal::from_u128(units / scale)?;
    let frac = Decimal::from_i128_with_scale((units % scale) as i128, BASE_UNIT_DECIMALS);
    whole.checked_add(frac).map(|v| v.normalize())
}

// ============================================================================
// Unit Tests
// ============================================================================
