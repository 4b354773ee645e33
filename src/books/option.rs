//! Option order book: covered European-style option writers whose
//! underlying is escrowed until exercise or expiry, per §4.7.

use std::collections::BTreeMap;

use crate::{
    error::{EngineError, EngineResult},
    ledger::{AccountId, AssetSymbol},
    math::safe_math::SafeMath,
};

/// Units of underlying escrowed per option unit issued.
pub const UNDERLYING_PER_OPTION: u64 = 100;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OptionStrike {
    pub underlying_symbol: AssetSymbol,
    pub counter_symbol: AssetSymbol,
    pub strike_price_base: u64,
    pub strike_price_quote: u64,
    pub expiration: i64,
}

#[derive(Clone, Debug)]
pub struct OptionOrder {
    pub owner: AccountId,
    pub order_id: String,
    pub strike: OptionStrike,
    /// underlying units escrowed.
    pub amount_to_issue: u64,
    /// outstanding option units owed by this writer; `amount_to_issue ==
    /// option_position * UNDERLYING_PER_OPTION`.
    pub option_position: u64,
    pub created_at: i64,
}

impl OptionOrder {
    pub fn check_invariant(&self) -> EngineResult<()> {
        crate::validate!(
            self.amount_to_issue == self.option_position.safe_mul(UNDERLYING_PER_OPTION)?,
            EngineError::constraint("amount_to_issue must equal option_position * 100")
        )
    }
}

#[derive(Default, Clone)]
pub struct OptionOrderBook {
    orders: BTreeMap<(AccountId, String), OptionOrder>,
    by_strike: BTreeMap<OptionStrike, Vec<(AccountId, String)>>,
}

impl OptionOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes (or tops up) a covered option order. `options_issued` is the
    /// target `option_position`; zero means close and release all escrow.
    pub fn write(
        &mut self,
        owner: &str,
        order_id: &str,
        strike: OptionStrike,
        options_issued: u64,
    ) -> EngineResult<u64> {
        crate::validate!(
            strike.expiration > 0,
            EngineError::validation("option strike must have a positive expiration")
        )?;
        let key = (owner.to_string(), order_id.to_string());

        if options_issued == 0 {
            if let Some(order) = self.orders.remove(&key) {
                self.remove_from_strike_index(&order.strike, &key);
                return Ok(order.amount_to_issue);
            }
            return Ok(0);
        }

        let amount_to_issue = options_issued.safe_mul(UNDERLYING_PER_OPTION)?;
        let order = OptionOrder {
            owner: owner.to_string(),
            order_id: order_id.to_string(),
            strike: strike.clone(),
            amount_to_issue,
            option_position: options_issued,
            created_at: 0,
        };
        order.check_invariant()?;

        self.by_strike.entry(strike.clone()).or_default().push(key.clone());
        self.orders.insert(key, order);
        Ok(amount_to_issue)
    }

    fn remove_from_strike_index(&mut self, strike: &OptionStrike, key: &(AccountId, String)) {
        if let Some(list) = self.by_strike.get_mut(strike) {
            list.retain(|k| k != key);
        }
    }

    pub fn order(&self, owner: &str, order_id: &str) -> Option<&OptionOrder> {
        self.orders.get(&(owner.to_string(), order_id.to_string()))
    }

    /// Exercises `n` option units of `strike`, deducting from the oldest
    /// writers first, proportionally to each writer's share of outstanding
    /// positions at that strike.
    pub fn exercise(&mut self, strike: &OptionStrike, mut n: u64) -> EngineResult<Vec<(AccountId, u64)>> {
        let mut writers: Vec<(AccountId, String)> = self.by_strike.get(strike).cloned().unwrap_or_default();
        writers.sort_by_key(|(owner, id)| {
            self.orders
                .get(&(owner.clone(), id.clone()))
                .map(|o| o.created_at)
                .unwrap_or(i64::MAX)
        });

        let mut deductions = Vec::new();
        for key in writers {
            if n == 0 {
                break;
            }
            let Some(order) = self.orders.get_mut(&key) else { continue };
            let take = order.option_position.min(n);
            if take == 0 {
                continue;
            }
            order.option_position = order.option_position.safe_sub(take)?;
            order.amount_to_issue = order.amount_to_issue.safe_sub(take.safe_mul(UNDERLYING_PER_OPTION)?)?;
            n = n.safe_sub(take)?;
            deductions.push((key.0.clone(), take));

            if order.option_position == 0 {
                self.orders.remove(&key);
                self.remove_from_strike_index(strike, &key);
            }
        }

        crate::validate!(
            n == 0,
            EngineError::constraint("not enough outstanding writers to cover exercise amount")
        )?;
        Ok(deductions)
    }

    /// Releases escrow for every writer of an expired strike; options of an
    /// expired strike become worthless.
    pub fn expire_strike(&mut self, strike: &OptionStrike) -> Vec<(AccountId, u64)> {
        let keys = self.by_strike.remove(strike).unwrap_or_default();
        let mut released = Vec::new();
        for key in keys {
            if let Some(order) = self.orders.remove(&key) {
                released.push((order.owner, order.amount_to_issue));
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strike() -> OptionStrike {
        OptionStrike {
            underlying_symbol: "COIN".into(),
            counter_symbol: "USD".into(),
            strike_price_base: 1,
            strike_price_quote: 1,
            expiration: 1_000,
        }
    }

    #[test]
    fn writing_then_transferring_then_exercising() {
        let mut book = OptionOrderBook::new();
        book.write("alice", "o1", strike(), 10).unwrap();
        assert_eq!(book.order("alice", "o1").unwrap().amount_to_issue, 1_000);

        let deductions = book.exercise(&strike(), 5).unwrap();
        assert_eq!(deductions, vec![("alice".to_string(), 5)]);
        let order = book.order("alice", "o1").unwrap();
        assert_eq!(order.amount_to_issue, 500);
        assert_eq!(order.option_position, 5);
    }

    #[test]
    fn exercising_more_than_outstanding_fails() {
        let mut book = OptionOrderBook::new();
        book.write("alice", "o1", strike(), 10).unwrap();
        let err = book.exercise(&strike(), 11).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }
}
