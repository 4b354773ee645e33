//! Constant-product liquidity pools, used as the price-of-last-resort when
//! orderbook matching cannot fill an order or a call-order cover.

use crate::{
    error::{EngineError, EngineResult},
    ledger::AssetSymbol,
    math::{casting::Cast, safe_math::SafeMath},
};

/// A single base/quote constant-product pair pool. `k = base_reserve *
/// quote_reserve` is held invariant (up to integer rounding) across swaps.
#[derive(Clone, Debug)]
pub struct LiquidityPool {
    pub base_symbol: AssetSymbol,
    pub quote_symbol: AssetSymbol,
    pub base_reserve: u64,
    pub quote_reserve: u64,
    pub pool_share_supply: u64,
    pub swap_fee_bps: u32,
}

impl LiquidityPool {
    pub fn new(base_symbol: AssetSymbol, quote_symbol: AssetSymbol, swap_fee_bps: u32) -> Self {
        Self {
            base_symbol,
            quote_symbol,
            base_reserve: 0,
            quote_reserve: 0,
            pool_share_supply: 0,
            swap_fee_bps,
        }
    }

    pub fn invariant(&self) -> u128 {
        self.base_reserve as u128 * self.quote_reserve as u128
    }

    /// Deposits proportional liquidity, minting pool shares. The first
    /// deposit sets the initial price and mints shares 1:1 with the
    /// geometric mean of the two amounts.
    pub fn deposit(&mut self, base_amount: u64, quote_amount: u64) -> EngineResult<u64> {
        crate::validate!(
            base_amount > 0 && quote_amount > 0,
            EngineError::validation("liquidity deposit amounts must be positive")
        )?;

        let minted = if self.pool_share_supply == 0 {
            integer_sqrt(base_amount as u128 * quote_amount as u128).cast::<u64>()?
        } else {
            let by_base = (base_amount as u128)
                .safe_mul(self.pool_share_supply as u128)?
                .safe_div(self.base_reserve as u128)?;
            let by_quote = (quote_amount as u128)
                .safe_mul(self.pool_share_supply as u128)?
                .safe_div(self.quote_reserve as u128)?;
            by_base.min(by_quote).cast::<u64>()?
        };

        self.base_reserve = self.base_reserve.safe_add(base_amount)?;
        self.quote_reserve = self.quote_reserve.safe_add(quote_amount)?;
        self.pool_share_supply = self.pool_share_supply.safe_add(minted)?;
        Ok(minted)
    }

    pub fn withdraw(&mut self, shares: u64) -> EngineResult<(u64, u64)> {
        crate::validate!(
            shares > 0 && shares <= self.pool_share_supply,
            EngineError::InsufficientFunds {
                needed: shares as i128,
                have: self.pool_share_supply as i128,
            }
        )?;
        let base_out = (self.base_reserve as u128)
            .safe_mul(shares as u128)?
            .safe_div(self.pool_share_supply as u128)?
            .cast::<u64>()?;
        let quote_out = (self.quote_reserve as u128)
            .safe_mul(shares as u128)?
            .safe_div(self.pool_share_supply as u128)?
            .cast::<u64>()?;

        self.base_reserve = self.base_reserve.safe_sub(base_out)?;
        self.quote_reserve = self.quote_reserve.safe_sub(quote_out)?;
        self.pool_share_supply = self.pool_share_supply.safe_sub(shares)?;
        Ok((base_out, quote_out))
    }

    /// Swaps an exact `amount_in` of the base asset for the quote asset,
    /// after fee, holding `k` invariant for the post-fee amount.
    pub fn swap_base_for_quote(&mut self, amount_in: u64) -> EngineResult<u64> {
        crate::validate!(amount_in > 0, EngineError::validation("swap amount must be positive"))?;
        let amount_in_after_fee = (amount_in as u128)
            .safe_mul((10_000 - self.swap_fee_bps) as u128)?
            .safe_div(10_000)?;

        let new_base_reserve = (self.base_reserve as u128).safe_add(amount_in_after_fee)?;
        let new_quote_reserve = self
            .invariant()
            .safe_ceil_div(new_base_reserve)?;
        crate::validate!(
            new_quote_reserve < self.quote_reserve as u128,
            EngineError::constraint("swap would not decrease quote reserve")
        )?;
        let amount_out = (self.quote_reserve as u128).safe_sub(new_quote_reserve)?;

        self.base_reserve = self.base_reserve.safe_add(amount_in)?;
        self.quote_reserve = self.quote_reserve.safe_sub(amount_out.cast::<u64>()?)?;
        amount_out.cast::<u64>()
    }

    pub fn swap_quote_for_base(&mut self, amount_in: u64) -> EngineResult<u64> {
        crate::validate!(amount_in > 0, EngineError::validation("swap amount must be positive"))?;
        let amount_in_after_fee = (amount_in as u128)
            .safe_mul((10_000 - self.swap_fee_bps) as u128)?
            .safe_div(10_000)?;

        let new_quote_reserve = (self.quote_reserve as u128).safe_add(amount_in_after_fee)?;
        let new_base_reserve = self.invariant().safe_ceil_div(new_quote_reserve)?;
        crate::validate!(
            new_base_reserve < self.base_reserve as u128,
            EngineError::constraint("swap would not decrease base reserve")
        )?;
        let amount_out = (self.base_reserve as u128).safe_sub(new_base_reserve)?;

        self.quote_reserve = self.quote_reserve.safe_add(amount_in)?;
        self.base_reserve = self.base_reserve.safe_sub(amount_out.cast::<u64>()?)?;
        amount_out.cast::<u64>()
    }
}

/// Every liquidity pool the engine knows about, keyed by canonical symbol
/// pair so both trade directions share one pool.
#[derive(Clone, Default)]
pub struct LiquidityPoolRegistry {
    pools: std::collections::BTreeMap<(AssetSymbol, AssetSymbol), LiquidityPool>,
}

impl LiquidityPoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(a: &str, b: &str) -> (AssetSymbol, AssetSymbol) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn get_or_create(&mut self, base: &str, quote: &str, swap_fee_bps: u32) -> &mut LiquidityPool {
        self.pools
            .entry(Self::key(base, quote))
            .or_insert_with(|| LiquidityPool::new(base.to_string(), quote.to_string(), swap_fee_bps))
    }

    pub fn get(&self, base: &str, quote: &str) -> Option<&LiquidityPool> {
        self.pools.get(&Self::key(base, quote))
    }
}

fn integer_sqrt(value: u128) -> u128 {
    if value == 0 {
        return 0;
    }
    let mut x = value;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_then_withdraw_returns_original_reserves() {
        let mut pool = LiquidityPool::new("COIN".into(), "USD".into(), 30);
        pool.deposit(1_000, 1_000).unwrap();
        let shares = pool.pool_share_supply;
        let (base, quote) = pool.withdraw(shares).unwrap();
        assert_eq!(base, 1_000);
        assert_eq!(quote, 1_000);
    }

    #[test]
    fn swap_decreases_invariant_only_by_fee() {
        let mut pool = LiquidityPool::new("COIN".into(), "USD".into(), 30);
        pool.deposit(10_000, 10_000).unwrap();
        let k_before = pool.invariant();
        let out = pool.swap_base_for_quote(1_000).unwrap();
        assert!(out > 0 && out < 1_000);
        assert!(pool.invariant() >= k_before);
    }
}
