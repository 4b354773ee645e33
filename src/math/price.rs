//! Math utilities for price-related functions.

use crate::error::{EngineError, EngineResult};
use crate::ledger::Side;

use super::safe_math::SafeMath;

/// Rounds a price to the nearest valid tick, rounding away from the resting
/// side so that a standardized order never crosses a price it wasn't willing
/// to accept.
pub fn standardize_price(price: u64, tick_size: u64, side: Side) -> EngineResult<u64> {
    if price == 0 {
        return Ok(0);
    }

    let remainder = price.checked_rem_euclid(tick_size).ok_or(EngineError::MathError)?;

    if remainder == 0 {
        return Ok(price);
    }

    match side {
        Side::Bid => price.safe_sub(remainder),
        Side::Ask => price.safe_add(tick_size.safe_sub(remainder)?),
    }
}

pub fn standardize_price_i64(price: i64, tick_size: i64, side: Side) -> EngineResult<i64> {
    if price == 0 {
        return Ok(0);
    }

    let remainder = price.checked_rem_euclid(tick_size).ok_or(EngineError::MathError)?;

    if remainder == 0 {
        return Ok(price);
    }

    match side {
        Side::Bid => price.safe_sub(remainder),
        Side::Ask => price.safe_add(tick_size.safe_sub(remainder)?),
    }
}

pub fn standardize_base_asset_amt(base_asset_amt: u64, order_step_size: u64) -> EngineResult<u64> {
    let remainder = base_asset_amt
        .checked_rem_euclid(order_step_size)
        .ok_or(EngineError::MathError)?;

    base_asset_amt.safe_sub(remainder)
}

pub fn standardize_base_asset_amt_ceil(base_asset_amt: u64, order_step_size: u64) -> EngineResult<u64> {
    let remainder = base_asset_amt
        .checked_rem_euclid(order_step_size)
        .ok_or(EngineError::MathError)?;

    if remainder == 0 {
        Ok(base_asset_amt)
    } else {
        base_asset_amt.safe_add(order_step_size)?.safe_sub(remainder)
    }
}

pub fn is_base_asset_amt_multiple_of_order_step_size(
    base_asset_amt: u64,
    order_step_size: u64,
) -> EngineResult<bool> {
    let remainder = base_asset_amt
        .checked_rem_euclid(order_step_size)
        .ok_or(EngineError::MathError)?;

    Ok(remainder == 0)
}

/// Compares two prices expressed as (numerator, denominator) ratios by
/// cross-multiplying instead of reducing to a common denominator, so the
/// comparison never depends on `gcd` normalization having already happened.
pub fn cross_multiply_cmp(a_num: u64, a_den: u64, b_num: u64, b_den: u64) -> EngineResult<std::cmp::Ordering> {
    let lhs = (a_num as u128).safe_mul(b_den as u128)?;
    let rhs = (b_num as u128).safe_mul(a_den as u128)?;
    Ok(lhs.cmp(&rhs))
}

/// A price as a ratio of a base amount to a quote amount: `base_amount` units
/// of the base asset trade for `quote_amount` units of the quote asset.
/// Never reduced; every comparison and multiplication cross-multiplies
/// instead of assuming a canonical form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Price {
    pub base_amount: u64,
    pub quote_amount: u64,
}

impl Price {
    pub fn new(base_amount: u64, quote_amount: u64) -> EngineResult<Self> {
        crate::validate!(
            base_amount > 0 && quote_amount > 0,
            EngineError::validation("price amounts must be positive")
        )?;
        Ok(Self { base_amount, quote_amount })
    }

    /// `amount_in_base * price -> amount_in_quote`, floored.
    pub fn base_to_quote(&self, amount_in_base: u64) -> EngineResult<u64> {
        (amount_in_base as u128)
            .safe_mul(self.quote_amount as u128)?
            .safe_div(self.base_amount as u128)?
            .try_into()
            .map_err(|_| EngineError::CastingFailure)
    }

    /// `amount_in_quote * price^-1 -> amount_in_base`, ceiled (a.k.a.
    /// `multiply_and_round_up`).
    pub fn quote_to_base_ceil(&self, amount_in_quote: u64) -> EngineResult<u64> {
        (amount_in_quote as u128)
            .safe_mul(self.base_amount as u128)?
            .safe_ceil_div(self.quote_amount as u128)?
            .try_into()
            .map_err(|_| EngineError::CastingFailure)
    }

    /// The reciprocal price (for comparing a taker's price against the
    /// opposite side of the book).
    pub fn reciprocal(&self) -> Self {
        Price {
            base_amount: self.quote_amount,
            quote_amount: self.base_amount,
        }
    }

    pub fn cmp_cross(&self, other: &Self) -> EngineResult<std::cmp::Ordering> {
        cross_multiply_cmp(self.quote_amount, self.base_amount, other.quote_amount, other.base_amount)
    }

    pub fn ge(&self, other: &Self) -> EngineResult<bool> {
        Ok(!matches!(self.cmp_cross(other)?, std::cmp::Ordering::Less))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardize_price_rounds_bid_down_and_ask_up() {
        assert_eq!(standardize_price(103, 10, Side::Bid).unwrap(), 100);
        assert_eq!(standardize_price(103, 10, Side::Ask).unwrap(), 110);
        assert_eq!(standardize_price(100, 10, Side::Bid).unwrap(), 100);
    }

    #[test]
    fn cross_multiply_cmp_agrees_with_float_comparison_without_reduction() {
        // 1/3 vs 2/7: 1*7=7, 2*3=6 -> 1/3 > 2/7
        assert_eq!(
            cross_multiply_cmp(1, 3, 2, 7).unwrap(),
            std::cmp::Ordering::Greater
        );
        assert_eq!(cross_multiply_cmp(1, 2, 2, 4).unwrap(), std::cmp::Ordering::Equal);
    }

    use proptest::prelude::*;

    proptest::proptest! {
        /// Cross-multiplied comparison must agree with comparing the same
        /// ratios after scaling both to a shared denominator, for any pair
        /// of ratios that don't overflow u128 when cross-multiplied.
        #[test]
        fn cross_multiply_cmp_matches_scaled_comparison(
            a_num in 1u64..1_000_000,
            a_den in 1u64..1_000_000,
            b_num in 1u64..1_000_000,
            b_den in 1u64..1_000_000,
        ) {
            let ordering = cross_multiply_cmp(a_num, a_den, b_num, b_den).unwrap();
            let lhs = a_num as u128 * b_den as u128;
            let rhs = b_num as u128 * a_den as u128;
            prop_assert_eq!(ordering, lhs.cmp(&rhs));
        }

        /// `base_to_quote` then `quote_to_base_ceil` never returns more base
        /// than was put in, for any positive price and amount that stay
        /// within u64 after conversion.
        #[test]
        fn base_to_quote_then_quote_to_base_ceil_does_not_manufacture_base(
            base_amount in 1u64..1_000_000_000,
            quote_amount in 1u64..1_000_000_000,
            amount_in_base in 0u64..1_000_000,
        ) {
            let price = Price::new(base_amount, quote_amount).unwrap();
            let quote = price.base_to_quote(amount_in_base).unwrap();
            let recovered_base = price.quote_to_base_ceil(quote).unwrap();
            prop_assert!(recovered_base <= amount_in_base.saturating_add(1));
        }
    }
}
