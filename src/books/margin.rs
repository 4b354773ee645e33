//! Margin-order book: leveraged positions that borrow from the credit pool
//! and enter the spot book, per §4.4.

use std::collections::BTreeMap;

use crate::{
    error::{EngineError, EngineResult},
    ledger::{AccountId, AssetSymbol},
    math::safe_math::SafeMath,
    oracle::FeedAggregate,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarginOrderState {
    Opened,
    Filling,
    Filled,
    Liquidating,
    Closed,
}

#[derive(Clone, Debug)]
pub struct MarginOrder {
    pub owner: AccountId,
    pub order_id: String,
    pub collateral_symbol: AssetSymbol,
    pub collateral: u64,
    pub debt_symbol: AssetSymbol,
    pub debt: u64,
    pub debt_balance: u64,
    pub position_symbol: AssetSymbol,
    pub position_balance: u64,
    pub sell_price_base: u64,
    pub sell_price_quote: u64,
    pub state: MarginOrderState,
    pub accrued_interest: u64,
    pub stop_loss_price: Option<u64>,
    pub take_profit_price: Option<u64>,
    pub limit_stop_price: Option<u64>,
    pub limit_take_price: Option<u64>,
}

impl MarginOrder {
    /// `(collateral + position_balance*feed + debt_balance - debt - interest) / debt`,
    /// as a ratio in basis points.
    pub fn collateralization_bps(&self, feed: &FeedAggregate) -> EngineResult<i128> {
        if self.debt == 0 {
            return Ok(i128::MAX);
        }
        let position_value = (self.position_balance as u128)
            .safe_mul(feed.settlement_price_base as u128)?
            .safe_div(feed.settlement_price_quote.max(1) as u128)?;

        let numerator = (self.collateral as i128)
            .safe_add(position_value as i128)?
            .safe_add(self.debt_balance as i128)?
            .safe_sub(self.debt as i128)?
            .safe_sub(self.accrued_interest as i128)?;

        numerator.safe_mul(10_000)?.safe_div(self.debt as i128)
    }

    pub fn is_below_liquidation_ratio(&self, feed: &FeedAggregate, liquidation_ratio_bps: i128) -> EngineResult<bool> {
        Ok(self.collateralization_bps(feed)? < liquidation_ratio_bps)
    }

    /// Whether the mark price has crossed a stored trigger, moving the order
    /// to `Liquidating`. `mark_price` is expressed in the same units as the
    /// stored trigger prices (quote-per-position-unit, scaled by precision).
    pub fn trigger_crossed(&self, mark_price: u64) -> bool {
        if let Some(stop) = self.stop_loss_price {
            if mark_price <= stop {
                return true;
            }
        }
        if let Some(take) = self.take_profit_price {
            if mark_price >= take {
                return true;
            }
        }
        if let Some(stop) = self.limit_stop_price {
            if mark_price <= stop {
                return true;
            }
        }
        if let Some(take) = self.limit_take_price {
            if mark_price >= take {
                return true;
            }
        }
        false
    }
}

#[derive(Clone)]
pub struct MarginOrderBook {
    orders: BTreeMap<(AccountId, String), MarginOrder>,
}

impl MarginOrderBook {
    pub fn new() -> Self {
        Self { orders: BTreeMap::new() }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        owner: &str,
        order_id: &str,
        collateral_symbol: &str,
        collateral: u64,
        debt_symbol: &str,
        debt: u64,
        position_symbol: &str,
        sell_price_base: u64,
        sell_price_quote: u64,
    ) -> EngineResult<()> {
        let key = (owner.to_string(), order_id.to_string());
        crate::validate!(
            !self.orders.contains_key(&key),
            EngineError::DuplicateId {
                owner: owner.to_string(),
                order_id: order_id.to_string(),
            }
        )?;
        self.orders.insert(
            key,
            MarginOrder {
                owner: owner.to_string(),
                order_id: order_id.to_string(),
                collateral_symbol: collateral_symbol.to_string(),
                collateral,
                debt_symbol: debt_symbol.to_string(),
                debt,
                debt_balance: debt,
                position_symbol: position_symbol.to_string(),
                position_balance: 0,
                sell_price_base,
                sell_price_quote,
                state: MarginOrderState::Opened,
                accrued_interest: 0,
                stop_loss_price: None,
                take_profit_price: None,
                limit_stop_price: None,
                limit_take_price: None,
            },
        );
        Ok(())
    }

    pub fn order(&self, owner: &str, order_id: &str) -> Option<&MarginOrder> {
        self.orders.get(&(owner.to_string(), order_id.to_string()))
    }

    /// Moves `debt_filled` from `debt_balance` into `position_balance` at
    /// the order's sell price, as the resting limit-book fill delivers.
    pub fn apply_fill(&mut self, owner: &str, order_id: &str, debt_filled: u64, position_received: u64) -> EngineResult<()> {
        let order = self
            .orders
            .get_mut(&(owner.to_string(), order_id.to_string()))
            .ok_or_else(|| EngineError::not_found(format!("margin order {owner}/{order_id}")))?;
        order.debt_balance = order.debt_balance.safe_sub(debt_filled)?;
        order.position_balance = order.position_balance.safe_add(position_received)?;
        order.state = if order.debt_balance == 0 {
            MarginOrderState::Filled
        } else {
            MarginOrderState::Filling
        };
        Ok(())
    }

    pub fn begin_liquidation(&mut self, owner: &str, order_id: &str) -> EngineResult<()> {
        let order = self
            .orders
            .get_mut(&(owner.to_string(), order_id.to_string()))
            .ok_or_else(|| EngineError::not_found(format!("margin order {owner}/{order_id}")))?;
        order.state = MarginOrderState::Liquidating;
        Ok(())
    }

    pub fn close(&mut self, owner: &str, order_id: &str) -> EngineResult<MarginOrder> {
        let key = (owner.to_string(), order_id.to_string());
        let mut order = self
            .orders
            .remove(&key)
            .ok_or_else(|| EngineError::not_found(format!("margin order {owner}/{order_id}")))?;
        order.state = MarginOrderState::Closed;
        Ok(order)
    }

    /// Scans orders whose position is denominated in `position_symbol` for
    /// collateralization below `liquidation_ratio_bps` against `feed`
    /// (that symbol's own settlement price) and flips them into
    /// `Liquidating`. Filtered by `position_symbol` since one feed update
    /// only ever reprices the positions held in that asset.
    pub fn sweep_liquidations(
        &mut self,
        position_symbol: &str,
        feed: &FeedAggregate,
        liquidation_ratio_bps: i128,
    ) -> EngineResult<Vec<(AccountId, String)>> {
        let mut flagged = Vec::new();
        for ((owner, id), order) in self.orders.iter_mut() {
            if order.position_symbol != position_symbol {
                continue;
            }
            if order.state == MarginOrderState::Liquidating || order.state == MarginOrderState::Closed {
                continue;
            }
            if order.is_below_liquidation_ratio(feed, liquidation_ratio_bps)? {
                order.state = MarginOrderState::Liquidating;
                flagged.push((owner.clone(), id.clone()));
            }
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(price_base: u64, price_quote: u64) -> FeedAggregate {
        FeedAggregate {
            settlement_price_base: price_base,
            settlement_price_quote: price_quote,
            maintenance_collateralization_bps: 17_500,
            max_short_squeeze_ratio_bps: 15_000,
            core_exchange_rate_base: price_base,
            core_exchange_rate_quote: price_quote,
            staleness_time: 0,
        }
    }

    #[test]
    fn margin_open_and_partial_fill_moves_debt_to_position() {
        let mut book = MarginOrderBook::new();
        book.open("alice", "m1", "COIN", 1_000, "USD", 100, "COIN", 1, 1).unwrap();
        book.apply_fill("alice", "m1", 100, 100).unwrap();
        let order = book.order("alice", "m1").unwrap();
        assert_eq!(order.debt_balance, 0);
        assert_eq!(order.position_balance, 100);
        assert_eq!(order.state, MarginOrderState::Filled);
    }

    #[test]
    fn collateralization_reflects_position_value_at_feed_price() {
        let mut book = MarginOrderBook::new();
        book.open("alice", "m1", "COIN", 1_000, "USD", 100, "COIN", 1, 1).unwrap();
        book.apply_fill("alice", "m1", 100, 100).unwrap();
        let order = book.order("alice", "m1").unwrap();
        let cr = order.collateralization_bps(&feed(1, 1)).unwrap();
        // (1000 + 100 + 0 - 100 - 0) / 100 * 10_000 = 100_000 bps (1000%)
        assert_eq!(cr, 100_000);
    }
}
