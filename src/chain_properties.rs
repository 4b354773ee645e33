//! Chain properties: the median-across-producers parameter set snapshotted
//! at block start and held constant for the block, per §3.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainProperties {
    pub escrow_bond_percent_bps: u32,
    pub credit_min_interest_bps: u32,
    pub credit_variable_interest_bps: u32,
    pub credit_open_ratio_bps: u32,
    pub credit_liquidation_ratio_bps: u32,
    pub margin_open_ratio_bps: u32,
    pub margin_liquidation_ratio_bps: u32,
    pub market_max_credit_ratio_bps: u32,
    pub maximum_asset_feed_publishers: u8,
    pub max_stake_intervals: u16,
    pub max_unstake_intervals: u16,
    pub auction_interval_seconds: i64,
    pub max_feed_age_seconds: i64,
    pub min_feeds: u8,
    /// matched-object quota enforced per block during match cascades; once
    /// exceeded the remainder is deferred to the following block.
    pub match_quota_per_block: u32,
}

impl Default for ChainProperties {
    fn default() -> Self {
        Self {
            escrow_bond_percent_bps: 500,
            credit_min_interest_bps: 200,
            credit_variable_interest_bps: 1_800,
            credit_open_ratio_bps: 20_000,
            credit_liquidation_ratio_bps: 15_000,
            margin_open_ratio_bps: 20_000,
            margin_liquidation_ratio_bps: 11_000,
            market_max_credit_ratio_bps: 5_000,
            maximum_asset_feed_publishers: 10,
            max_stake_intervals: 28,
            max_unstake_intervals: 13,
            auction_interval_seconds: 24 * 3_600,
            max_feed_age_seconds: 60,
            min_feeds: 1,
            match_quota_per_block: 1_000,
        }
    }
}
