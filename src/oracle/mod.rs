//! Price & feed oracle: the aggregate settlement price per market-issued
//! asset, derived from the median of fresh publisher feeds.
//!
//! Generalizes the teacher's Pyth aggregate-price handling (`state::oracle`)
//! away from an on-chain account layout and toward a plain publisher-keyed
//! table the engine owns directly.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    error::{EngineError, EngineResult},
    ledger::AssetSymbol,
    math::{casting::Cast, safe_math::SafeMath},
};

/// A single publisher's quote for a market-issued asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Feed {
    pub settlement_price_base: u64,
    pub settlement_price_quote: u64,
    pub maintenance_collateralization_bps: u32,
    pub max_short_squeeze_ratio_bps: u32,
    pub core_exchange_rate_base: u64,
    pub core_exchange_rate_quote: u64,
    pub published_at: i64,
}

/// The per-asset aggregate derived from every publisher's current feed: the
/// median settlement price plus the parameters carried alongside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeedAggregate {
    pub settlement_price_base: u64,
    pub settlement_price_quote: u64,
    pub maintenance_collateralization_bps: u32,
    pub max_short_squeeze_ratio_bps: u32,
    pub core_exchange_rate_base: u64,
    pub core_exchange_rate_quote: u64,
    pub staleness_time: i64,
}

#[derive(Clone)]
pub struct PriceOracle {
    publishers: BTreeMap<AssetSymbol, BTreeMap<String, Feed>>,
    max_publishers: u8,
    max_feed_age: i64,
    min_feeds: u8,
}

impl PriceOracle {
    pub fn new(max_publishers: u8, max_feed_age: i64, min_feeds: u8) -> Self {
        Self {
            publishers: BTreeMap::new(),
            max_publishers,
            max_feed_age,
            min_feeds,
        }
    }

    pub fn publish(
        &mut self,
        publisher: &str,
        symbol: &str,
        feed: Feed,
        block_time: i64,
    ) -> EngineResult<()> {
        crate::validate!(
            feed.settlement_price_base > 0 && feed.settlement_price_quote > 0,
            EngineError::validation("feed price must be positive")
        )?;
        crate::validate!(
            feed.published_at <= block_time,
            EngineError::validation("feed cannot be published in the future")
        )?;

        let table = self.publishers.entry(symbol.to_string()).or_default();
        if !table.contains_key(publisher) {
            crate::validate!(
                (table.len() as u8) < self.max_publishers,
                EngineError::constraint("asset has reached its maximum number of feed publishers")
            )?;
        }
        table.insert(publisher.to_string(), feed);
        Ok(())
    }

    /// Evicts publisher feeds older than `max_feed_age`. Called by the
    /// scheduler's feed-freshness-decay pass at the start of every block.
    pub fn evict_stale(&mut self, block_time: i64) {
        for table in self.publishers.values_mut() {
            table.retain(|_, feed| block_time.saturating_sub(feed.published_at) <= self.max_feed_age);
        }
    }

    /// Computes the aggregate (median) feed for `symbol`. Returns
    /// `FeedStale` if fewer than `min_feeds` fresh publishers remain.
    pub fn current_feed(&self, symbol: &str, block_time: i64) -> EngineResult<FeedAggregate> {
        let table = self
            .publishers
            .get(symbol)
            .ok_or_else(|| EngineError::not_found(format!("no feed publishers for {symbol}")))?;

        let mut fresh: Vec<&Feed> = table
            .values()
            .filter(|feed| block_time.saturating_sub(feed.published_at) <= self.max_feed_age)
            .collect();

        crate::validate!(
            fresh.len() >= self.min_feeds as usize,
            EngineError::FeedStale(symbol.to_string())
        )?;

        // Cross-multiplied price ratio sort; ties broken by publish order is
        // irrelevant once sorted, so a stable sort on the ratio is enough.
        fresh.sort_by(|a, b| {
            let lhs = (a.settlement_price_base as u128) * (b.settlement_price_quote as u128);
            let rhs = (b.settlement_price_base as u128) * (a.settlement_price_quote as u128);
            lhs.cmp(&rhs)
        });
        let median = fresh[fresh.len() / 2];

        let staleness_time = fresh
            .iter()
            .map(|f| block_time.saturating_sub(f.published_at))
            .max()
            .unwrap_or(0);

        Ok(FeedAggregate {
            settlement_price_base: median.settlement_price_base,
            settlement_price_quote: median.settlement_price_quote,
            maintenance_collateralization_bps: median.maintenance_collateralization_bps,
            max_short_squeeze_ratio_bps: median.max_short_squeeze_ratio_bps,
            core_exchange_rate_base: median.core_exchange_rate_base,
            core_exchange_rate_quote: median.core_exchange_rate_quote,
            staleness_time,
        })
    }
}

impl FeedAggregate {
    /// Converts an amount denominated in the debt asset into collateral at
    /// this feed's settlement price, flooring per §4.1.
    pub fn debt_to_collateral(&self, debt_amount: u64) -> EngineResult<u64> {
        (debt_amount as u128)
            .safe_mul(self.settlement_price_base as u128)?
            .safe_div(self.settlement_price_quote as u128)?
            .cast::<u64>()
    }

    pub fn maintenance_collateralization(&self) -> (u64, u64) {
        // collateral/debt ratio threshold, as a (base, quote) ratio scaled
        // off the feed's own price and its MCR in basis points.
        let base = (self.settlement_price_base as u128)
            * self.maintenance_collateralization_bps as u128
            / 10_000;
        (base as u64, self.settlement_price_quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(price_base: u64, published_at: i64) -> Feed {
        Feed {
            settlement_price_base: price_base,
            settlement_price_quote: 1,
            maintenance_collateralization_bps: 17_500,
            max_short_squeeze_ratio_bps: 15_000,
            core_exchange_rate_base: price_base,
            core_exchange_rate_quote: 1,
            published_at,
        }
    }

    #[test]
    fn median_of_three_publishers_is_middle_price() {
        let mut oracle = PriceOracle::new(10, 60, 1);
        oracle.publish("p1", "USD", feed(100, 0), 10).unwrap();
        oracle.publish("p2", "USD", feed(110, 0), 10).unwrap();
        oracle.publish("p3", "USD", feed(90, 0), 10).unwrap();
        let agg = oracle.current_feed("USD", 10).unwrap();
        assert_eq!(agg.settlement_price_base, 100);
    }

    #[test]
    fn fewer_than_min_feeds_is_stale() {
        let mut oracle = PriceOracle::new(10, 60, 2);
        oracle.publish("p1", "USD", feed(100, 0), 10).unwrap();
        let err = oracle.current_feed("USD", 10).unwrap_err();
        assert!(matches!(err, EngineError::FeedStale(_)));
    }

    #[test]
    fn eviction_drops_publishers_past_max_age() {
        let mut oracle = PriceOracle::new(10, 60, 1);
        oracle.publish("p1", "USD", feed(100, 0), 0).unwrap();
        oracle.evict_stale(1_000);
        let err = oracle.current_feed("USD", 1_000).unwrap_err();
        assert!(matches!(err, EngineError::FeedStale(_)) || matches!(err, EngineError::NotFound(_)));
    }
}
