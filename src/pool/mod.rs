//! Pools: the liquidity pool (constant-product price of last resort) and the
//! credit pool (per-asset lending with utilization-based interest).

pub mod credit;
pub mod liquidity;

pub use credit::CreditPool;
pub use liquidity::LiquidityPool;
