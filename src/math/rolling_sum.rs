//! Function to calculate rolling sum of a defined TWAP.

use crate::{
    error::EngineResult,
    math::{casting::Cast, safe_math::SafeMath},
};
use std::cmp::max;

/// Blends a previous data point with a new one using a weightage numerator/denominator
/// pair (e.g. elapsed-time / window-length), the way every time-weighted average in the
/// engine (feed TWAP, utilization TWAP, funding TWAP) is updated incrementally instead of
/// recomputed from history.
pub fn calculate_rolling_sum(
    data_point_1: u64,
    data_point_2: u64,
    weightage_numerator: i64,
    weightage_denominator: i64,
) -> EngineResult<u64> {
    let previous_weighted = data_point_1
        .cast::<u128>()?
        .safe_mul(max(0, weightage_denominator.safe_sub(weightage_numerator)?).cast::<u128>()?)?
        .safe_div(weightage_denominator.cast::<u128>()?)?;

    previous_weighted.cast::<u64>()?.safe_add(data_point_2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_window_ignores_previous_value() {
        let result = calculate_rolling_sum(1_000, 500, 10, 10).unwrap();
        assert_eq!(result, 500);
    }

    #[test]
    fn no_elapsed_time_keeps_previous_value_untouched() {
        let result = calculate_rolling_sum(1_000, 0, 0, 10).unwrap();
        assert_eq!(result, 1_000);
    }
}
