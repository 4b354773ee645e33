//! Credit pool: per-asset lending pool, lent into by suppliers and borrowed
//! against `CreditCollateral` deposits, with utilization-based interest and
//! liquidation of undercollateralized `CreditLoan`s.

use std::collections::BTreeMap;

use crate::{
    error::{EngineError, EngineResult},
    ledger::AssetSymbol,
    math::{casting::Cast, constants::RATE_PRECISION_U32, safe_math::SafeMath},
};

#[derive(Clone, Debug, Default)]
pub struct CreditCollateral {
    pub owner: String,
    pub symbol: AssetSymbol,
    pub collateral: u64,
}

#[derive(Clone, Debug)]
pub struct CreditLoan {
    pub owner: String,
    pub loan_id: String,
    pub debt_symbol: AssetSymbol,
    pub debt: u64,
    pub collateral_symbol: AssetSymbol,
    pub collateral: u64,
    pub interest_accrued: u64,
    /// collateral-per-debt price at which the loan was opened.
    pub loan_price_base: u64,
    pub loan_price_quote: u64,
    /// collateral-per-debt price below which the loan is liquidated.
    pub liquidation_price_base: u64,
    pub liquidation_price_quote: u64,
}

impl CreditLoan {
    /// Current `collateral / debt` expressed against the feed's settlement
    /// price to check against `liquidation_price`.
    pub fn is_liquidatable(&self, feed_price_base: u64, feed_price_quote: u64) -> EngineResult<bool> {
        // collateral/debt >= liquidation_price  <=>  collateral * liq.quote >= liq.base * debt,
        // cross-multiplied against the feed's own price domain.
        let lhs = (self.collateral as u128)
            .safe_mul(self.liquidation_price_quote as u128)?
            .safe_mul(feed_price_quote as u128)?;
        let rhs = (self.liquidation_price_base as u128)
            .safe_mul(self.debt.safe_add(self.interest_accrued)? as u128)?
            .safe_mul(feed_price_base as u128)?;
        Ok(lhs < rhs)
    }
}

/// State per lent asset: total lent funds, total currently borrowed, and the
/// outstanding supply of the corresponding credit-receipt asset.
#[derive(Clone, Debug, Default)]
pub struct CreditPoolState {
    pub base_balance: u64,
    pub borrowed_balance: u64,
    pub credit_balance: u64,
}

impl CreditPoolState {
    pub fn utilization_bps(&self) -> EngineResult<u32> {
        if self.base_balance == 0 {
            return Ok(0);
        }
        (self.borrowed_balance as u128)
            .safe_mul(RATE_PRECISION_U32 as u128)?
            .safe_div(self.base_balance as u128)?
            .cast::<u32>()
    }

    /// Hourly interest rate in basis points of `RATE_PRECISION`, linear in
    /// utilization up to 100% where it saturates at `min + variable`.
    pub fn interest_rate_bps(&self, min_interest_bps: u32, variable_interest_bps: u32) -> EngineResult<u32> {
        let utilization = self.utilization_bps()?.min(RATE_PRECISION_U32);
        let variable_component = (variable_interest_bps as u128)
            .safe_mul(utilization as u128)?
            .safe_div(RATE_PRECISION_U32 as u128)?
            .cast::<u32>()?;
        min_interest_bps.safe_add(variable_component)
    }
}

#[derive(Clone)]
pub struct CreditPool {
    pools: BTreeMap<AssetSymbol, CreditPoolState>,
    collateral: BTreeMap<(String, AssetSymbol), CreditCollateral>,
    loans: BTreeMap<(String, String), CreditLoan>,
    pub open_ratio_bps: u32,
    pub liquidation_ratio_bps: u32,
    pub min_interest_bps: u32,
    pub variable_interest_bps: u32,
}

impl CreditPool {
    pub fn new(open_ratio_bps: u32, liquidation_ratio_bps: u32, min_interest_bps: u32, variable_interest_bps: u32) -> Self {
        Self {
            pools: BTreeMap::new(),
            collateral: BTreeMap::new(),
            loans: BTreeMap::new(),
            open_ratio_bps,
            liquidation_ratio_bps,
            min_interest_bps,
            variable_interest_bps,
        }
    }

    pub fn pool_state(&self, symbol: &str) -> CreditPoolState {
        self.pools.get(symbol).cloned().unwrap_or_default()
    }

    /// Supplier deposits `amount` to be lent out, receiving credit-receipt
    /// units 1:1 at par (the receipt asset itself accrues value via
    /// `credit_balance` growing slower than `base_balance`).
    pub fn lend(&mut self, symbol: &str, amount: u64) -> EngineResult<u64> {
        crate::validate!(amount > 0, EngineError::validation("lend amount must be positive"))?;
        let state = self.pools.entry(symbol.to_string()).or_default();
        let minted = if state.credit_balance == 0 || state.base_balance == 0 {
            amount
        } else {
            (amount as u128)
                .safe_mul(state.credit_balance as u128)?
                .safe_div(state.base_balance as u128)?
                .cast::<u64>()?
        };
        state.base_balance = state.base_balance.safe_add(amount)?;
        state.credit_balance = state.credit_balance.safe_add(minted)?;
        Ok(minted)
    }

    pub fn withdraw_lend(&mut self, symbol: &str, credit_amount: u64, max_credit_ratio_bps: u32) -> EngineResult<u64> {
        let state = self
            .pools
            .get_mut(symbol)
            .ok_or_else(|| EngineError::not_found(format!("credit pool for {symbol}")))?;
        crate::validate!(
            credit_amount <= state.credit_balance,
            EngineError::InsufficientFunds {
                needed: credit_amount as i128,
                have: state.credit_balance as i128,
            }
        )?;
        let base_out = (credit_amount as u128)
            .safe_mul(state.base_balance as u128)?
            .safe_div(state.credit_balance as u128)?
            .cast::<u64>()?;
        let available = state.base_balance.safe_sub(state.borrowed_balance)?;
        crate::validate!(
            base_out <= available,
            EngineError::InsufficientFunds {
                needed: base_out as i128,
                have: available as i128,
            }
        )?;
        state.base_balance = state.base_balance.safe_sub(base_out)?;
        state.credit_balance = state.credit_balance.safe_sub(credit_amount)?;

        let post_utilization = if state.base_balance == 0 {
            0
        } else {
            state.borrowed_balance as u128 * 10_000 / state.base_balance as u128
        };
        crate::validate!(
            post_utilization <= max_credit_ratio_bps as u128,
            EngineError::constraint("withdrawal would exceed the market's max credit ratio")
        )?;
        Ok(base_out)
    }

    pub fn deposit_collateral(&mut self, owner: &str, symbol: &str, amount: u64) -> EngineResult<()> {
        let key = (owner.to_string(), symbol.to_string());
        let entry = self.collateral.entry(key).or_insert_with(|| CreditCollateral {
            owner: owner.to_string(),
            symbol: symbol.to_string(),
            collateral: 0,
        });
        entry.collateral = entry.collateral.safe_add(amount)?;
        Ok(())
    }

    pub fn collateral_of(&self, owner: &str, symbol: &str) -> u64 {
        self.collateral
            .get(&(owner.to_string(), symbol.to_string()))
            .map(|c| c.collateral)
            .unwrap_or(0)
    }

    /// Opens a loan, requiring `collateral * feed >= open_ratio * debt`.
    pub fn open_loan(
        &mut self,
        owner: &str,
        loan_id: &str,
        debt_symbol: &str,
        debt: u64,
        collateral_symbol: &str,
        collateral: u64,
        feed_price_base: u64,
        feed_price_quote: u64,
    ) -> EngineResult<()> {
        let key = (owner.to_string(), loan_id.to_string());
        crate::validate!(
            !self.loans.contains_key(&key),
            EngineError::DuplicateId {
                owner: owner.to_string(),
                order_id: loan_id.to_string(),
            }
        )?;

        let collateral_value = (collateral as u128)
            .safe_mul(feed_price_quote as u128)?
            .safe_div(feed_price_base as u128)?;
        let required = (debt as u128)
            .safe_mul(self.open_ratio_bps as u128)?
            .safe_div(10_000)?;
        crate::validate!(
            collateral_value >= required,
            EngineError::constraint("loan undercollateralized at open_ratio")
        )?;

        let state = self.pools.entry(debt_symbol.to_string()).or_default();
        let available = state.base_balance.safe_sub(state.borrowed_balance)?;
        crate::validate!(
            debt <= available,
            EngineError::InsufficientFunds {
                needed: debt as i128,
                have: available as i128,
            }
        )?;
        state.borrowed_balance = state.borrowed_balance.safe_add(debt)?;

        let liquidation_price_base = (feed_price_base as u128)
            .safe_mul(self.liquidation_ratio_bps as u128)?
            .safe_div(10_000)?
            .cast::<u64>()?;

        self.loans.insert(
            key,
            CreditLoan {
                owner: owner.to_string(),
                loan_id: loan_id.to_string(),
                debt_symbol: debt_symbol.to_string(),
                debt,
                collateral_symbol: collateral_symbol.to_string(),
                collateral,
                interest_accrued: 0,
                loan_price_base: feed_price_base,
                loan_price_quote: feed_price_quote,
                liquidation_price_base,
                liquidation_price_quote: feed_price_quote,
            },
        );
        Ok(())
    }

    pub fn loan(&self, owner: &str, loan_id: &str) -> EngineResult<&CreditLoan> {
        self.loans
            .get(&(owner.to_string(), loan_id.to_string()))
            .ok_or_else(|| EngineError::not_found(format!("loan {owner}/{loan_id}")))
    }

    pub fn loans_by_debt_symbol(&self, debt_symbol: &str) -> Vec<CreditLoan> {
        self.loans.values().filter(|l| l.debt_symbol == debt_symbol).cloned().collect()
    }

    /// Applies `amount` of `debt_symbol` to a loan's interest first, then
    /// principal. Returns the amount actually applied and, once both the
    /// principal and accrued interest reach zero, the freed collateral
    /// (symbol, amount) to release back to the owner.
    pub fn repay_loan(&mut self, owner: &str, loan_id: &str, amount: u64) -> EngineResult<(u64, Option<(AssetSymbol, u64)>)> {
        let key = (owner.to_string(), loan_id.to_string());
        let loan = self
            .loans
            .get_mut(&key)
            .ok_or_else(|| EngineError::not_found(format!("loan {owner}/{loan_id}")))?;
        let owed = loan.debt.safe_add(loan.interest_accrued)?;
        let applied = amount.min(owed);
        let to_interest = applied.min(loan.interest_accrued);
        loan.interest_accrued = loan.interest_accrued.safe_sub(to_interest)?;
        let to_principal = applied.safe_sub(to_interest)?;
        loan.debt = loan.debt.safe_sub(to_principal)?;
        if let Some(state) = self.pools.get_mut(&loan.debt_symbol) {
            state.borrowed_balance = state.borrowed_balance.safe_sub(to_principal)?;
        }

        let released = if loan.debt == 0 && loan.interest_accrued == 0 {
            let collateral_symbol = loan.collateral_symbol.clone();
            let collateral = loan.collateral;
            self.loans.remove(&key);
            Some((collateral_symbol, collateral))
        } else {
            None
        };
        Ok((applied, released))
    }

    /// Credits recovered liquidation proceeds back into a pool's lendable
    /// balance, making suppliers whole for whatever the forced sale of a
    /// liquidated loan's collateral actually recovered.
    pub fn repay_pool_balance(&mut self, symbol: &str, amount: u64) -> EngineResult<()> {
        let state = self.pools.entry(symbol.to_string()).or_default();
        state.base_balance = state.base_balance.safe_add(amount)?;
        Ok(())
    }

    /// Removes a loan from the book for liquidation (§4.5: "proceeds
    /// identically to a margin liquidation"), releasing its borrowed balance
    /// back to the pool so the caller can settle collateral against the
    /// limit book.
    pub fn remove_loan_for_liquidation(&mut self, owner: &str, loan_id: &str) -> EngineResult<CreditLoan> {
        let key = (owner.to_string(), loan_id.to_string());
        let loan = self
            .loans
            .remove(&key)
            .ok_or_else(|| EngineError::not_found(format!("loan {owner}/{loan_id}")))?;
        if let Some(state) = self.pools.get_mut(&loan.debt_symbol) {
            state.borrowed_balance = state.borrowed_balance.saturating_sub(loan.debt);
        }
        Ok(loan)
    }

    /// Accrues one hour of interest on `borrowed_balance` for every open pool;
    /// called by the scheduler's interest-compounding pass.
    pub fn accrue_hourly_interest(&mut self) -> EngineResult<()> {
        for (_, state) in self.pools.iter_mut() {
            if state.borrowed_balance == 0 {
                continue;
            }
            let rate_bps = state.interest_rate_bps(self.min_interest_bps, self.variable_interest_bps)?;
            let hourly = (state.borrowed_balance as u128)
                .safe_mul(rate_bps as u128)?
                .safe_div(RATE_PRECISION_U32 as u128)?
                .safe_div(365 * 24)?
                .cast::<u64>()?;
            state.borrowed_balance = state.borrowed_balance.safe_add(hourly)?;
        }
        for loan in self.loans.values_mut() {
            if let Some(pool) = self.pools.get(&loan.debt_symbol) {
                let rate_bps = pool.interest_rate_bps(self.min_interest_bps, self.variable_interest_bps)?;
                let hourly = (loan.debt as u128)
                    .safe_mul(rate_bps as u128)?
                    .safe_div(RATE_PRECISION_U32 as u128)?
                    .safe_div(365 * 24)?
                    .cast::<u64>()?;
                loan.interest_accrued = loan.interest_accrued.safe_add(hourly)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_rate_scales_linearly_with_utilization() {
        let mut state = CreditPoolState::default();
        state.base_balance = 1_000;
        state.borrowed_balance = 500;
        let rate = state.interest_rate_bps(200, 1_800).unwrap();
        assert_eq!(rate, 200 + 900);
    }

    #[test]
    fn open_loan_requires_open_ratio_collateral() {
        let mut pool = CreditPool::new(20_000, 15_000, 200, 1_800);
        pool.lend("USD", 10_000).unwrap();
        let err = pool
            .open_loan("alice", "loan-1", "USD", 1_000, "COIN", 1_000, 1, 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn open_loan_succeeds_with_sufficient_collateral() {
        let mut pool = CreditPool::new(20_000, 15_000, 200, 1_800);
        pool.lend("USD", 10_000).unwrap();
        pool.open_loan("alice", "loan-1", "USD", 1_000, "COIN", 2_000, 1, 1).unwrap();
        assert_eq!(pool.loan("alice", "loan-1").unwrap().debt, 1_000);
    }
}
