//! Fixed-point precisions and other constants shared across the engine.
//!
//! Every quantity that isn't a raw share count carries an explicit precision
//! constant so conversions between quote/base/percentage domains are always
//! spelled out at the call site rather than inferred.

// base asset precision: number of decimal places supported for a base asset balance
pub const BASE_PRECISION: u128 = 1_000_000_000; // exponent = -9
pub const BASE_PRECISION_I128: i128 = BASE_PRECISION as i128;
pub const BASE_PRECISION_U64: u64 = BASE_PRECISION as u64;
pub const BASE_PRECISION_I64: i64 = BASE_PRECISION_I128 as i64;

// price precision: number of decimal places supported for a price
pub const PRICE_PRECISION: u128 = 1_000_000; // exponent = -6
pub const PRICE_PRECISION_I128: i128 = PRICE_PRECISION as i128;
pub const PRICE_PRECISION_U64: u64 = PRICE_PRECISION as u64;
pub const PRICE_PRECISION_I64: i64 = PRICE_PRECISION_I128 as i64;

// quote asset precision: number of decimal places supported for a quote asset balance
pub const QUOTE_PRECISION: u128 = 1_000_000; // exponent = -6
pub const QUOTE_PRECISION_I128: i128 = QUOTE_PRECISION as i128;
pub const QUOTE_PRECISION_U64: u64 = QUOTE_PRECISION as u64;
pub const QUOTE_PRECISION_I64: i64 = QUOTE_PRECISION_I128 as i64;

// margin precision: number of decimal places for collateral and margin ratios
pub const MARGIN_PRECISION: u32 = 10_000;
pub const MARGIN_PRECISION_U128: u128 = MARGIN_PRECISION as u128;

// collateral weight: fraction of a deposited asset usable as borrow/margin collateral
pub const WEIGHT_PRECISION: u32 = MARGIN_PRECISION;
pub const WEIGHT_PRECISION_U128: u128 = WEIGHT_PRECISION as u128;

// liquidation reward precision
pub const LIQUIDATION_PCT: u128 = 10_000;

// credit pool balance precision (shares of the lending/borrowing pool)
pub const POOL_BALANCE_PRECISION: u128 = 1_000_000_000; // exponent = -9
pub const POOL_BALANCE_PRECISION_U64: u64 = POOL_BALANCE_PRECISION as u64;

// cumulative interest index precision (borrow/lend accrual)
pub const CUMULATIVE_INTEREST_PRECISION: u128 = 10_000_000_000; // exponent = -10

// percentage and basis point precisions
pub const PERCENTAGE_PRECISION: u128 = 1_000_000; // expo -6, represents 100%
pub const PERCENTAGE_PRECISION_I128: i128 = PERCENTAGE_PRECISION as i128;
pub const PERCENTAGE_PRECISION_U64: u64 = PERCENTAGE_PRECISION as u64;
pub const TEN_BPS: i128 = PERCENTAGE_PRECISION_I128 / 1000;
pub const TEN_BPS_I64: i64 = TEN_BPS as i64;

// bid/ask spread precision used by the feed oracle's confidence interval
pub const BID_ASK_SPREAD_PRECISION: u64 = PERCENTAGE_PRECISION as u64; // expo -6
pub const BID_ASK_SPREAD_PRECISION_I64: i64 = BID_ASK_SPREAD_PRECISION as i64;
pub const BID_ASK_SPREAD_PRECISION_U128: u128 = BID_ASK_SPREAD_PRECISION as u128;
pub const BID_ASK_SPREAD_PRECISION_I128: i128 = BID_ASK_SPREAD_PRECISION as i128;

// utilization precision: fraction of a credit pool's deposits currently lent out
pub const UTILIZATION_PRECISION: u128 = PERCENTAGE_PRECISION; // expo -6
pub const UTILIZATION_PRECISION_U32: u32 = PERCENTAGE_PRECISION as u32;

// interest rate precision for the credit pool's borrow/lend curve
pub const RATE_PRECISION: u128 = PERCENTAGE_PRECISION;
pub const RATE_PRECISION_U32: u32 = PERCENTAGE_PRECISION as u32;

// liquidation fee precision
pub const LIQUIDATION_FEE_PRECISION_U32: u32 = PERCENTAGE_PRECISION as u32;
pub const LIQUIDATION_FEE_PRECISION_U128: u128 = LIQUIDATION_FEE_PRECISION_U32 as u128;

// initial margin factor precision: discounts initial margin for concentrated positions
pub const IMF_PRECISION: u32 = PERCENTAGE_PRECISION as u32;
pub const IMF_PRECISION_U128: u128 = IMF_PRECISION as u128;

// cross-domain precision conversions
pub const PRICE_TO_QUOTE_PRECISION_RATIO: u128 = PRICE_PRECISION / QUOTE_PRECISION;
pub const LIQUIDATION_FEE_TO_MARGIN_PRECISION_RATIO: u32 = LIQUIDATION_FEE_PRECISION_U32 / MARGIN_PRECISION;
pub const LIQUIDATION_FEE_TO_MARGIN_PRECISION_RATIO_U128: u128 =
    LIQUIDATION_FEE_TO_MARGIN_PRECISION_RATIO as u128;

// fee precision
pub const ONE_BPS_DENOMINATOR: u32 = 10_000;
pub const FEE_DENOMINATOR: u32 = 10 * ONE_BPS_DENOMINATOR;
pub const FEE_PERCENTAGE_DENOMINATOR: u32 = 100;

pub const HUNDREDTH_OF_CENT: u128 = PRICE_PRECISION / 10_000;

// margin-order liquidation slippage allowance
pub const MAX_LIQUIDATION_SLIPPAGE: i128 = 10_000; // exponent = -2
pub const MAX_LIQUIDATION_SLIPPAGE_U128: u128 = 10_000;

// feed oracle: maximum divergence between spot mark and TWAP before a market is paused
pub const MAX_MARK_TWAP_DIVERGENCE: u128 = 500_000; // exponent = -3

// margin ratio bounds
pub const MAX_MARGIN_RATIO: u32 = MARGIN_PRECISION; // 1x, no leverage
pub const MIN_MARGIN_RATIO: u32 = MARGIN_PRECISION / 50; // 50x leverage ceiling

// maximum unrealized profit counted toward initial margin for a margin order
pub const MAX_POSITIVE_UPNL_FOR_INITIAL_MARGIN: i128 = 100 * QUOTE_PRECISION_I128;

// defaults

// maximum divergence of a TWAP update from the running TWAP, expressed as 1/denominator
pub const DEFAULT_MAX_TWAP_UPDATE_PRICE_BAND_DENOMINATOR: i64 = 3;

pub const DEFAULT_LARGE_BID_ASK_FACTOR: u64 = 10 * BID_ASK_SPREAD_PRECISION;

// liquidation margin buffer ratio added on top of maintenance margin before a
// call order or margin order is eligible for liquidation
pub const DEFAULT_LIQUIDATION_MARGIN_BUFFER_RATIO: u32 = MARGIN_PRECISION / 50; // 2%

// smallest representable base asset increment
pub const DEFAULT_BASE_ASSET_AMOUNT_STEP_SIZE: u64 = BASE_PRECISION_U64 / 10_000; // 1e-4

// smallest representable price increment
pub const DEFAULT_QUOTE_ASSET_AMOUNT_TICK_SIZE: u64 =
    PRICE_PRECISION_U64 / DEFAULT_BASE_ASSET_AMOUNT_STEP_SIZE; // 1e-2

// time constants, all in seconds
pub const ONE_MINUTE: i128 = 60_i128;
pub const FIVE_MINUTES: i128 = (60 * 5) as i128;
pub const ONE_HOUR: i64 = 3600;
pub const ONE_HOUR_I128: i128 = ONE_HOUR as i128;
pub const TWENTY_FOUR_HOURS: i64 = 3600 * 24;
pub const THIRTY_DAYS: i64 = TWENTY_FOUR_HOURS * 30;
pub const THIRTY_DAYS_I128: i128 = THIRTY_DAYS as i128;
pub const ONE_YEAR_SECONDS: u128 = 31_536_000;

// feed oracle staleness: a feed older than this many seconds is rejected
pub const DEFAULT_MAX_FEED_STALENESS: i64 = 60;

// scheduler: how far in advance a recurring transfer or interest-compounding
// event re-arms itself once drained
pub const DEFAULT_RECURRING_TRANSFER_PERIOD: i64 = ONE_HOUR;
