//! Call-order book: collateralized debt positions (CDPs) per (borrower,
//! debt-symbol), margin-called when collateralization dips below
//! maintenance, with black-swan global settlement when no cover is found.

use std::collections::BTreeMap;

use crate::{
    error::{EngineError, EngineResult},
    ledger::{AccountId, AssetSymbol},
    math::{
        bignumber::U256,
        casting::Cast,
        price::Price,
        safe_math::SafeMath,
    },
    oracle::FeedAggregate,
};

#[derive(Clone, Debug)]
pub struct CallOrder {
    pub borrower: AccountId,
    pub collateral_symbol: AssetSymbol,
    pub collateral: u64,
    pub debt_symbol: AssetSymbol,
    pub debt: u64,
    /// optional target collateral ratio, in basis points of `MARGIN_PRECISION`;
    /// `None` means "use maintenance" when computing max_debt_to_cover.
    pub target_collateral_ratio_bps: Option<u32>,
}

impl CallOrder {
    /// `collateral / debt` as a price (collateral-per-debt).
    pub fn collateralization(&self) -> Price {
        Price {
            base_amount: self.debt.max(1),
            quote_amount: self.collateral,
        }
    }

    pub fn is_undercollateralized(&self, feed: &FeedAggregate) -> EngineResult<bool> {
        let (mcr_base, mcr_quote) = feed.maintenance_collateralization();
        // collateralization() <= mcr  <=>  collateral * mcr_quote... we compare
        // against the feed-scaled maintenance price directly.
        let lhs = (self.collateral as u128).safe_mul(mcr_base as u128)?;
        let rhs = (self.debt as u128)
            .safe_mul(mcr_quote as u128)?
            .safe_mul(feed.settlement_price_base as u128)?
            .safe_div(feed.settlement_price_quote.max(1) as u128)?;
        Ok(lhs <= rhs)
    }

    /// The price at which this call is forced to sell collateral:
    /// `feed * MSSR/MCR`, i.e. the feed price scaled by the ratio of the max
    /// short-squeeze ratio to the maintenance collateralization ratio.
    pub fn margin_call_price(&self, feed: &FeedAggregate) -> EngineResult<Price> {
        let base = (feed.settlement_price_base as u128)
            .safe_mul(feed.max_short_squeeze_ratio_bps as u128)?
            .safe_div(feed.maintenance_collateralization_bps.max(1) as u128)?
            .cast::<u64>()?;
        Ok(Price {
            base_amount: feed.settlement_price_quote,
            quote_amount: base,
        })
    }
}

/// Closed-form `max_debt_to_cover` from §4.3, computed with 256-bit
/// intermediates so the four-way product never overflows.
///
/// `feed`: collateral/debt settlement price. `match_price`: collateral/debt
/// price the cover would execute at. `target_cr_bps`: target collateral
/// ratio in basis points of `cr_denom`. `debt`, `collateral`: the call's
/// current balances.
pub fn max_debt_to_cover(
    feed: Price,
    match_price: Price,
    target_cr_bps: u64,
    cr_denom: u64,
    debt: u64,
    collateral: u64,
) -> EngineResult<u64> {
    let pf_coll = U256::from(feed.quote_amount);
    let pf_debt = U256::from(feed.base_amount);
    let pm_coll = U256::from(match_price.quote_amount);
    let pm_debt = U256::from(match_price.base_amount);
    let d = U256::from(debt);
    let c = U256::from(collateral);
    let t_cr = U256::from(target_cr_bps);
    let denom_k = U256::from(cr_denom);

    let numerator = pf_coll
        .safe_mul(pm_debt)?
        .safe_mul(d)?
        .safe_mul(t_cr)?
        .checked_sub(pf_debt.safe_mul(pm_debt)?.safe_mul(c)?.safe_mul(denom_k)?)
        .ok_or(EngineError::MathError)?;

    let denominator = pf_coll
        .safe_mul(pm_debt)?
        .safe_mul(t_cr)?
        .checked_sub(pf_debt.safe_mul(pm_coll)?.safe_mul(denom_k)?)
        .ok_or(EngineError::MathError)?;

    if denominator.is_zero() {
        return Ok(0);
    }

    let cover = numerator.safe_div(denominator)?;
    let cover_u64 = cover.to_u64().unwrap_or(u64::MAX).min(debt);

    // The closed form above floors at the final division, which can leave
    // the call a unit or two short of `target_cr_bps`. Reconcile by
    // binary-searching the smallest cover in [cover_u64, debt] that actually
    // reaches the target, since `meets_target_cr` is monotonic in cover.
    let mut lo = cover_u64;
    let mut hi = debt;
    if meets_target_cr(feed, match_price, target_cr_bps, cr_denom, debt, collateral, lo)? {
        return Ok(lo);
    }
    if !meets_target_cr(feed, match_price, target_cr_bps, cr_denom, debt, collateral, hi)? {
        return Ok(hi);
    }
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if meets_target_cr(feed, match_price, target_cr_bps, cr_denom, debt, collateral, mid)? {
            hi = mid;
        } else {
            lo = mid.safe_add(1)?;
        }
    }
    Ok(lo)
}

/// Whether covering `x` of `debt` leaves the call at or above
/// `target_cr_bps`, per the same equality this module's closed form solves
/// exactly: `new_collateral * pf_debt * cr_denom >= new_debt * pf_coll *
/// target_cr_bps`.
#[allow(clippy::too_many_arguments)]
fn meets_target_cr(
    feed: Price,
    match_price: Price,
    target_cr_bps: u64,
    cr_denom: u64,
    debt: u64,
    collateral: u64,
    x: u64,
) -> EngineResult<bool> {
    let new_debt = debt.safe_sub(x)?;
    if new_debt == 0 {
        return Ok(true);
    }
    let paid_collateral = match_price.base_to_quote(x).unwrap_or(u64::MAX);
    let new_collateral = collateral.saturating_sub(paid_collateral);

    let lhs = (new_collateral as u128)
        .safe_mul(feed.base_amount as u128)?
        .safe_mul(cr_denom as u128)?;
    let rhs = (new_debt as u128)
        .safe_mul(feed.quote_amount as u128)?
        .safe_mul(target_cr_bps as u128)?;
    Ok(lhs >= rhs)
}

/// Recorded when a debt symbol's backing collateral runs out: every
/// remaining call's collateral is pooled here, claimable pro-rata by debt
/// holders (§4.3 point 3), until a `CollateralBid` lifts the settlement.
#[derive(Clone, Debug)]
pub struct GlobalSettlement {
    pub price: Price,
    pub collateral_symbol: AssetSymbol,
    pub pooled_collateral: u64,
    pub claimed: u64,
}

#[derive(Clone)]
pub struct CallOrderBook {
    calls: BTreeMap<(AccountId, AssetSymbol), CallOrder>,
    globally_settled: BTreeMap<AssetSymbol, GlobalSettlement>,
}

impl CallOrderBook {
    pub fn new() -> Self {
        Self {
            calls: BTreeMap::new(),
            globally_settled: BTreeMap::new(),
        }
    }

    pub fn is_globally_settled(&self, debt_symbol: &str) -> bool {
        self.globally_settled.contains_key(debt_symbol)
    }

    pub fn global_settlement(&self, debt_symbol: &str) -> Option<&GlobalSettlement> {
        self.globally_settled.get(debt_symbol)
    }

    pub fn open_or_adjust(
        &mut self,
        borrower: &str,
        collateral_symbol: &str,
        collateral: u64,
        debt_symbol: &str,
        debt: u64,
        target_collateral_ratio_bps: Option<u32>,
    ) -> EngineResult<()> {
        crate::validate!(
            !self.globally_settled.contains_key(debt_symbol),
            EngineError::GlobalSettled(debt_symbol.to_string())
        )?;
        let key = (borrower.to_string(), debt_symbol.to_string());
        if debt == 0 {
            self.calls.remove(&key);
            return Ok(());
        }
        self.calls.insert(
            key,
            CallOrder {
                borrower: borrower.to_string(),
                collateral_symbol: collateral_symbol.to_string(),
                collateral,
                debt_symbol: debt_symbol.to_string(),
                debt,
                target_collateral_ratio_bps,
            },
        );
        Ok(())
    }

    pub fn call(&self, borrower: &str, debt_symbol: &str) -> Option<&CallOrder> {
        self.calls.get(&(borrower.to_string(), debt_symbol.to_string()))
    }

    /// Calls currently carrying debt in `debt_symbol`, ascending by
    /// collateralization (worst first), as required by the margin-call
    /// cascade ordering in §4.3.
    pub fn calls_ascending_collateralization(&self, debt_symbol: &str) -> EngineResult<Vec<CallOrder>> {
        let mut calls: Vec<CallOrder> = self
            .calls
            .values()
            .filter(|c| c.debt_symbol == debt_symbol)
            .cloned()
            .collect();
        calls.sort_by(|a, b| {
            let a_cr = a.collateralization();
            let b_cr = b.collateralization();
            a_cr.cmp_cross(&b_cr).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(calls)
    }

    /// Settles `covered_debt` against `borrower`'s call, reducing both debt
    /// and collateral by the matched amounts.
    pub fn settle_cover(
        &mut self,
        borrower: &str,
        debt_symbol: &str,
        covered_debt: u64,
        paid_collateral: u64,
    ) -> EngineResult<()> {
        let key = (borrower.to_string(), debt_symbol.to_string());
        let call = self
            .calls
            .get_mut(&key)
            .ok_or_else(|| EngineError::not_found(format!("call order {borrower}/{debt_symbol}")))?;
        call.debt = call.debt.safe_sub(covered_debt)?;
        call.collateral = call.collateral.safe_sub(paid_collateral)?;
        if call.debt == 0 {
            self.calls.remove(&key);
        }
        Ok(())
    }

    /// Declares global settlement for `debt_symbol` at `settlement_price`:
    /// every remaining call of that debt symbol is closed, their pooled
    /// collateral becomes claimable pro-rata by holders of the debt asset.
    pub fn declare_global_settlement(&mut self, debt_symbol: &str, settlement_price: Price) -> EngineResult<u64> {
        let mut pooled_collateral = 0u64;
        let mut collateral_symbol = String::new();
        let matching: Vec<(AccountId, AssetSymbol)> = self
            .calls
            .iter()
            .filter(|(_, c)| c.debt_symbol == debt_symbol)
            .map(|(k, _)| k.clone())
            .collect();
        for key in matching {
            if let Some(call) = self.calls.remove(&key) {
                if collateral_symbol.is_empty() {
                    collateral_symbol = call.collateral_symbol.clone();
                }
                pooled_collateral = pooled_collateral.safe_add(call.collateral)?;
            }
        }
        self.globally_settled.insert(
            debt_symbol.to_string(),
            GlobalSettlement {
                price: settlement_price,
                collateral_symbol,
                pooled_collateral,
                claimed: 0,
            },
        );
        Ok(pooled_collateral)
    }

    /// Pro-rata share of the pooled settlement fund owed to a debt-asset
    /// holder redeeming `claim_debt` units out of `total_outstanding_debt`
    /// total supply (§4.3 point 3). Returns the collateral symbol and amount;
    /// the caller is responsible for burning the redeemed debt.
    pub fn claim_global_settlement(
        &mut self,
        debt_symbol: &str,
        claim_debt: u64,
        total_outstanding_debt: u64,
    ) -> EngineResult<(AssetSymbol, u64)> {
        let settlement = self
            .globally_settled
            .get_mut(debt_symbol)
            .ok_or_else(|| EngineError::not_found(format!("global settlement {debt_symbol}")))?;
        let remaining_pool = settlement.pooled_collateral.safe_sub(settlement.claimed)?;
        let owed = if total_outstanding_debt == 0 {
            0
        } else {
            (settlement.pooled_collateral as u128)
                .safe_mul(claim_debt as u128)?
                .safe_div(total_outstanding_debt as u128)?
                .cast::<u64>()?
                .min(remaining_pool)
        };
        settlement.claimed = settlement.claimed.safe_add(owed)?;
        Ok((settlement.collateral_symbol.clone(), owed))
    }

    /// Lifts global settlement for `debt_symbol`, reopening a single call for
    /// `borrower` backed by `collateral` and carrying the entire outstanding
    /// `debt`, per a resolved `CollateralBid` (§3: bids are destroyed on
    /// resolution). Any collateral still pooled from the original settlement
    /// is folded into the reopened call rather than tracked separately.
    pub fn resolve_via_bid(
        &mut self,
        debt_symbol: &str,
        borrower: &str,
        collateral_symbol: &str,
        collateral: u64,
        debt: u64,
    ) -> EngineResult<()> {
        self.globally_settled.remove(debt_symbol);
        self.calls.insert(
            (borrower.to_string(), debt_symbol.to_string()),
            CallOrder {
                borrower: borrower.to_string(),
                collateral_symbol: collateral_symbol.to_string(),
                collateral,
                debt_symbol: debt_symbol.to_string(),
                debt,
                target_collateral_ratio_bps: None,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(price_base: u64, mcr_bps: u32, mssr_bps: u32) -> FeedAggregate {
        FeedAggregate {
            settlement_price_base: price_base,
            settlement_price_quote: 1,
            maintenance_collateralization_bps: mcr_bps,
            max_short_squeeze_ratio_bps: mssr_bps,
            core_exchange_rate_base: price_base,
            core_exchange_rate_quote: 1,
            staleness_time: 0,
        }
    }

    #[test]
    fn call_margin_called_by_feed_drop() {
        // Alice posts 1000 COIN collateral, borrows 500 USD (200% CR @ feed=1).
        let call = CallOrder {
            borrower: "alice".into(),
            collateral_symbol: "COIN".into(),
            collateral: 1000,
            debt_symbol: "USD".into(),
            debt: 500,
            target_collateral_ratio_bps: None,
        };
        // feed falls to 0.75 USD/COIN => collateral value = 1000*0.75=750 < MCR*debt (175%*500=875)
        let f = FeedAggregate {
            settlement_price_base: 3,
            settlement_price_quote: 4,
            ..feed(1, 17_500, 15_000)
        };
        assert!(call.is_undercollateralized(&f).unwrap());
    }

    #[test]
    fn max_debt_to_cover_returns_value_within_debt_bound() {
        let feed = Price::new(1, 1).unwrap();
        let match_price = Price::new(1, 1).unwrap();
        let cover = max_debt_to_cover(feed, match_price, 15_000, 10_000, 500, 1000).unwrap();
        assert!(cover <= 500);
    }

    #[test]
    fn global_settlement_pools_all_remaining_collateral() {
        let mut book = CallOrderBook::new();
        book.open_or_adjust("alice", "COIN", 1000, "USD", 500, None).unwrap();
        book.open_or_adjust("bob", "COIN", 2000, "USD", 900, None).unwrap();
        let pooled = book
            .declare_global_settlement("USD", Price::new(1, 1).unwrap())
            .unwrap();
        assert_eq!(pooled, 3000);
        assert!(book.is_globally_settled("USD"));
        assert!(book.call("alice", "USD").is_none());
    }
}
