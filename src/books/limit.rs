//! Limit-order book: per-market priority queue keyed on price then order id,
//! the core matching primitive every other book's forced sells flow through.

use std::collections::BTreeMap;

use crate::{
    error::{EngineError, EngineResult},
    ledger::{AccountId, AssetSymbol, Ledger, Partition, Side},
    math::price::Price,
};

#[derive(Clone, Debug)]
pub struct LimitOrder {
    pub seller: AccountId,
    pub order_id: String,
    pub base_symbol: AssetSymbol,
    pub quote_symbol: AssetSymbol,
    pub for_sale: u64,
    pub sell_price: Price,
    pub expiration: i64,
    pub fill_or_kill: bool,
    pub opened: bool,
    pub created_at: i64,
    pub interface: Option<AccountId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceOutcome {
    Placed,
    FilledPartial,
    FilledFull,
    Killed,
}

/// Ranking key for the resting book: best price first, then insertion order
/// (lower id first) to break ties — the maker that arrived first is matched
/// first.
#[derive(Clone, Debug)]
struct RankedOrder {
    price_num: u64,
    price_den: u64,
    seq: u64,
    order_id: String,
}

impl RankedOrder {
    fn key(&self) -> (u64, u64, u64) {
        (self.price_num, self.price_den, self.seq)
    }
}

#[derive(Default, Clone)]
pub struct LimitOrderBook {
    orders: BTreeMap<(AccountId, String), LimitOrder>,
    // Resting orders per market (canonical symbol pair), split by side,
    // ranked so the best price for a taker sorts first.
    side_index: BTreeMap<(AssetSymbol, AssetSymbol, Side), Vec<RankedOrder>>,
    next_seq: u64,
}

pub struct Fill {
    pub maker_order_id: String,
    pub maker_seller: AccountId,
    pub base_filled: u64,
    pub quote_filled: u64,
    pub match_price: Price,
}

/// One forced-sale match against a resting maker, per `force_sell`. Unlike
/// `Fill`, there is no real taker-side ledger account to credit: the debt
/// proceeds are reported back for the caller to retire directly.
pub struct ForcedFill {
    pub maker_order_id: String,
    pub maker_seller: AccountId,
    pub collateral_given: u64,
    pub debt_obtained: u64,
    pub match_price: Price,
}

impl LimitOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn market_key(base: &str, quote: &str, side: Side) -> (AssetSymbol, AssetSymbol, Side) {
        (base.to_string(), quote.to_string(), side)
    }

    fn insert_ranked(&mut self, order: &LimitOrder, side: Side) {
        let key = Self::market_key(&order.base_symbol, &order.quote_symbol, side);
        let ranked = RankedOrder {
            price_num: order.sell_price.quote_amount,
            price_den: order.sell_price.base_amount,
            seq: self.next_seq,
            order_id: order.order_id.clone(),
        };
        self.next_seq += 1;
        let bucket = self.side_index.entry(key).or_default();
        bucket.push(ranked);
        // Best for a taker buying this side is highest quote-per-base for
        // asks (the seller wants more), lowest for bids; store descending by
        // quote/base so `.iter()` already yields best-maker-first for asks,
        // and we read it reversed for bids at consumption time.
        bucket.sort_by(|a, b| b.key().cmp(&a.key()));
    }

    fn remove_ranked(&mut self, base: &str, quote: &str, side: Side, order_id: &str) {
        if let Some(bucket) = self.side_index.get_mut(&Self::market_key(base, quote, side)) {
            bucket.retain(|r| r.order_id != order_id);
        }
    }

    /// Places a new sell order of `for_sale` base-asset units at `sell_price`
    /// (quote per base), matching against resting asks on the opposite side
    /// of the book, per §4.2.
    #[allow(clippy::too_many_arguments)]
    pub fn place_limit(
        &mut self,
        ledger: &mut Ledger,
        seller: &str,
        order_id: &str,
        base_symbol: &str,
        quote_symbol: &str,
        for_sale: u64,
        sell_price: Price,
        expiration: i64,
        fill_or_kill: bool,
        opened: bool,
        block_time: i64,
    ) -> EngineResult<(PlaceOutcome, Vec<Fill>)> {
        crate::validate!(for_sale > 0, EngineError::validation("for_sale must be positive"))?;
        crate::validate!(
            expiration > block_time,
            EngineError::validation("expiration must be in the future")
        )?;
        crate::validate!(
            !self.orders.contains_key(&(seller.to_string(), order_id.to_string())),
            EngineError::DuplicateId {
                owner: seller.to_string(),
                order_id: order_id.to_string(),
            }
        )?;

        ledger.debit(seller, base_symbol, Partition::Liquid, for_sale)?;

        let mut order = LimitOrder {
            seller: seller.to_string(),
            order_id: order_id.to_string(),
            base_symbol: base_symbol.to_string(),
            quote_symbol: quote_symbol.to_string(),
            for_sale,
            sell_price,
            expiration,
            fill_or_kill,
            opened,
            created_at: block_time,
            interface: None,
        };

        let fills = self.match_against_opposite(ledger, &mut order)?;

        if order.for_sale == 0 {
            return Ok((PlaceOutcome::FilledFull, fills));
        }

        if fill_or_kill {
            // revert: refund whatever remains unfilled back to liquid balance.
            ledger.credit(seller, base_symbol, Partition::Liquid, order.for_sale)?;
            return Err(EngineError::FillOrKillUnfilled {
                residual: order.for_sale as i64,
            });
        }

        if opened {
            self.orders
                .insert((seller.to_string(), order_id.to_string()), order.clone());
            self.insert_ranked(&order, Side::Ask);
            let outcome = if fills.is_empty() {
                PlaceOutcome::Placed
            } else {
                PlaceOutcome::FilledPartial
            };
            Ok((outcome, fills))
        } else {
            ledger.credit(seller, base_symbol, Partition::Liquid, order.for_sale)?;
            Ok((PlaceOutcome::Killed, fills))
        }
    }

    /// Matches `taker` (always modeled as a seller of `base_symbol`) against
    /// resting sellers of `quote_symbol` (i.e. buyers of `base_symbol`) whose
    /// price crosses, at the maker's price, oldest-price-then-id first.
    fn match_against_opposite(&mut self, ledger: &mut Ledger, taker: &mut LimitOrder) -> EngineResult<Vec<Fill>> {
        let mut fills = Vec::new();
        let key = Self::market_key(&taker.quote_symbol, &taker.base_symbol, Side::Ask);

        loop {
            if taker.for_sale == 0 {
                break;
            }
            let Some(bucket) = self.side_index.get(&key) else {
                break;
            };
            let Some(best) = bucket.last().cloned() else {
                break;
            };

            let maker_key = self.find_maker_owner(&taker.quote_symbol, &taker.base_symbol, &best.order_id);
            let Some(maker_owner) = maker_key else { break };
            let maker = self
                .orders
                .get(&(maker_owner.clone(), best.order_id.clone()))
                .cloned()
                .expect("ranked order must have a backing order");

            // taker sells base for quote at maker.sell_price (maker sells
            // quote for base); crossing requires taker's price <= maker's
            // reciprocal price.
            if !maker.sell_price.reciprocal().ge(&taker.sell_price)? {
                break;
            }

            let match_price = maker.sell_price; // maker's (older) price wins.

            // pays = min(taker.for_sale, quote-equivalent of maker.for_sale at match_price)
            let maker_quote_equivalent = match_price.base_to_quote(maker.for_sale)?;
            let pays = taker.for_sale.min(maker_quote_equivalent);
            if pays == 0 {
                break;
            }
            let base_for_maker = match_price.reciprocal().base_to_quote(pays)?.max(1);
            let base_for_maker = base_for_maker.min(maker.for_sale);

            ledger.credit(&taker.seller, &taker.quote_symbol, Partition::Liquid, base_for_maker)?;
            ledger.credit(&maker_owner, &maker.quote_symbol, Partition::Liquid, pays)?;

            taker.for_sale = taker.for_sale.saturating_sub(pays);

            let remaining_maker = maker.for_sale.saturating_sub(base_for_maker);
            if remaining_maker == 0 {
                self.orders.remove(&(maker_owner.clone(), best.order_id.clone()));
                self.remove_ranked(&taker.quote_symbol, &taker.base_symbol, Side::Ask, &best.order_id);
            } else if let Some(m) = self.orders.get_mut(&(maker_owner.clone(), best.order_id.clone())) {
                m.for_sale = remaining_maker;
            }

            fills.push(Fill {
                maker_order_id: best.order_id.clone(),
                maker_seller: maker_owner,
                base_filled: base_for_maker,
                quote_filled: pays,
                match_price,
            });
        }

        Ok(fills)
    }

    /// Forced sale of up to `max_collateral` units of `collateral_symbol`
    /// against resting makers selling `debt_symbol` for `collateral_symbol`,
    /// used by the call-order cascade (§4.3) to cover a call's debt from the
    /// limit book. There is no real seller-side ledger account for a call's
    /// collateral, so only the matched maker is credited here; the debt
    /// obtained is reported back for the caller to burn, and the collateral
    /// given up for the caller to debit from the call itself. `worst_price`
    /// is the minimum debt-per-collateral the call will accept, in the same
    /// (collateral=base, debt=quote) convention as a synthetic taker's
    /// `sell_price`.
    pub fn force_sell(
        &mut self,
        ledger: &mut Ledger,
        collateral_symbol: &str,
        debt_symbol: &str,
        max_collateral: u64,
        worst_price: Price,
    ) -> EngineResult<(Vec<ForcedFill>, u64)> {
        let mut fills = Vec::new();
        let mut remaining = max_collateral;
        let key = Self::market_key(debt_symbol, collateral_symbol, Side::Ask);

        loop {
            if remaining == 0 {
                break;
            }
            let Some(bucket) = self.side_index.get(&key) else { break };
            let Some(best) = bucket.last().cloned() else { break };
            let Some(maker_owner) = self.find_maker_owner(debt_symbol, collateral_symbol, &best.order_id) else { break };
            let maker = self
                .orders
                .get(&(maker_owner.clone(), best.order_id.clone()))
                .cloned()
                .expect("ranked order must have a backing order");

            if !maker.sell_price.reciprocal().ge(&worst_price)? {
                break;
            }

            let match_price = maker.sell_price;
            let maker_quote_equivalent = match_price.base_to_quote(maker.for_sale)?;
            let collateral_taken = remaining.min(maker_quote_equivalent);
            if collateral_taken == 0 {
                break;
            }
            let debt_obtained = match_price
                .reciprocal()
                .base_to_quote(collateral_taken)?
                .max(1)
                .min(maker.for_sale);

            ledger.credit(&maker_owner, &maker.quote_symbol, Partition::Liquid, collateral_taken)?;

            remaining = remaining.saturating_sub(collateral_taken);
            let remaining_maker = maker.for_sale.saturating_sub(debt_obtained);
            if remaining_maker == 0 {
                self.orders.remove(&(maker_owner.clone(), best.order_id.clone()));
                self.remove_ranked(debt_symbol, collateral_symbol, Side::Ask, &best.order_id);
            } else if let Some(m) = self.orders.get_mut(&(maker_owner.clone(), best.order_id.clone())) {
                m.for_sale = remaining_maker;
            }

            fills.push(ForcedFill {
                maker_order_id: best.order_id.clone(),
                maker_seller: maker_owner,
                collateral_given: collateral_taken,
                debt_obtained,
                match_price,
            });
        }

        Ok((fills, max_collateral - remaining))
    }

    fn find_maker_owner(&self, base: &str, quote: &str, order_id: &str) -> Option<AccountId> {
        self.orders
            .iter()
            .find(|((_, oid), order)| oid == order_id && order.base_symbol == base && order.quote_symbol == quote)
            .map(|((owner, _), _)| owner.clone())
    }

    pub fn cancel(&mut self, ledger: &mut Ledger, seller: &str, order_id: &str) -> EngineResult<()> {
        let order = self
            .orders
            .remove(&(seller.to_string(), order_id.to_string()))
            .ok_or_else(|| EngineError::not_found(format!("limit order {seller}/{order_id}")))?;
        self.remove_ranked(&order.base_symbol, &order.quote_symbol, Side::Ask, order_id);
        ledger.credit(seller, &order.base_symbol, Partition::Liquid, order.for_sale)
    }

    /// Cancels every order whose expiration has passed, refunding the seller.
    /// Run by the scheduler before transactions apply in a block.
    pub fn expire_due(&mut self, ledger: &mut Ledger, block_time: i64) -> EngineResult<Vec<(AccountId, String)>> {
        let due: Vec<(AccountId, String)> = self
            .orders
            .iter()
            .filter(|(_, o)| o.expiration <= block_time)
            .map(|((owner, id), _)| (owner.clone(), id.clone()))
            .collect();
        for (owner, id) in &due {
            self.cancel(ledger, owner, id)?;
        }
        Ok(due)
    }

    pub fn best_price(&self, base: &str, quote: &str) -> Option<Price> {
        self.side_index
            .get(&Self::market_key(base, quote, Side::Ask))
            .and_then(|b| b.last())
            .map(|r| Price {
                base_amount: r.price_den,
                quote_amount: r.price_num,
            })
    }

    pub fn order(&self, seller: &str, order_id: &str) -> Option<&LimitOrder> {
        self.orders.get(&(seller.to_string(), order_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(owner: &str, symbol: &str, amount: u64) -> Ledger {
        let mut ledger = Ledger::new();
        ledger
            .register_asset(crate::ledger::Asset::new(symbol.into(), 6, crate::ledger::AssetType::Standard, "issuer".into()).unwrap())
            .unwrap();
        ledger.credit(owner, symbol, Partition::Liquid, amount).unwrap();
        ledger
    }

    #[test]
    fn full_plus_partial_match_scenario() {
        // Alice SELL 1000 COIN @ 1 COIN/USD (i.e. sell_price base=1 COIN, quote=1 USD)
        // Bob BUY 2000 USD @ 1 USD/COIN, modeled as Bob selling 2000 USD for COIN.
        let mut ledger = Ledger::new();
        for sym in ["COIN", "USD"] {
            ledger
                .register_asset(crate::ledger::Asset::new(sym.into(), 6, crate::ledger::AssetType::Standard, "issuer".into()).unwrap())
                .unwrap();
        }
        ledger.credit("alice", "COIN", Partition::Liquid, 1_000).unwrap();
        ledger.credit("bob", "USD", Partition::Liquid, 2_000).unwrap();

        let mut book = LimitOrderBook::new();
        let price = Price::new(1, 1).unwrap();
        book.place_limit(
            &mut ledger, "alice", "a1", "COIN", "USD", 1_000, price, 1_000, false, true, 0,
        )
        .unwrap();

        let (_, fills) = book
            .place_limit(&mut ledger, "bob", "b1", "USD", "COIN", 2_000, price, 1_000, false, true, 0)
            .unwrap();

        assert!(!fills.is_empty());
        assert!(book.order("alice", "a1").is_none());
        assert_eq!(ledger.balance("alice", "USD").liquid, 1_000);
        assert_eq!(ledger.balance("bob", "COIN").liquid, 1_000);
    }

    #[test]
    fn cancel_refunds_full_for_sale_amount() {
        let mut ledger = ledger_with("alice", "COIN", 500);
        ledger
            .register_asset(crate::ledger::Asset::new("USD".into(), 6, crate::ledger::AssetType::Standard, "issuer".into()).unwrap())
            .unwrap();
        let mut book = LimitOrderBook::new();
        let price = Price::new(1, 1).unwrap();
        book.place_limit(&mut ledger, "alice", "a1", "COIN", "USD", 500, price, 1_000, false, true, 0)
            .unwrap();
        book.cancel(&mut ledger, "alice", "a1").unwrap();
        assert_eq!(ledger.balance("alice", "COIN").liquid, 500);
    }
}
