//! Integer-exact arithmetic primitives shared by every book and ledger.
//!
//! No floating point anywhere in this module tree: amounts are `i64`/`u64`
//! shares, intermediate products use `u128`/`U256`, and every division
//! direction (floor vs. ceil) is explicit at the call site.

pub mod bignumber;
pub mod casting;
pub mod ceil_div;
pub mod constants;
pub mod floor_div;
pub mod price;
pub mod rolling_sum;
pub mod safe_math;
pub mod safe_unwrap;
