//! Operation variants the engine exposes at its boundary, per §6. A tagged
//! enum with exhaustive matching replaces the source's virtual-dispatch
//! `operation` sum type, per the "Variant operations" design note in §9.

use crate::{books::option::OptionStrike, ledger::AccountId, math::price::Price};

pub type OrderId = String;

#[derive(Clone, Debug)]
pub enum Operation {
    Transfer {
        from: AccountId,
        to: AccountId,
        symbol: String,
        amount: u64,
        memo: String,
    },
    LimitOrder {
        owner: AccountId,
        order_id: OrderId,
        base_symbol: String,
        quote_symbol: String,
        amount_to_sell: u64,
        exchange_rate: Price,
        expiration: i64,
        fill_or_kill: bool,
        opened: bool,
        interface: Option<AccountId>,
    },
    CancelLimitOrder {
        owner: AccountId,
        order_id: OrderId,
    },
    MarginOrder {
        owner: AccountId,
        order_id: OrderId,
        collateral_symbol: String,
        collateral: u64,
        debt_symbol: String,
        amount_to_borrow: u64,
        position_symbol: String,
        exchange_rate: Price,
        force_close: bool,
    },
    AuctionOrder {
        owner: AccountId,
        order_id: OrderId,
        sell_symbol: String,
        buy_symbol: String,
        amount_to_sell: u64,
        limit_close_price: Price,
        expiration: i64,
        interface: Option<AccountId>,
    },
    CallOrder {
        borrower: AccountId,
        collateral_symbol: String,
        collateral: u64,
        debt_symbol: String,
        debt: u64,
        target_collateral_ratio_bps: Option<u32>,
    },
    OptionOrder {
        owner: AccountId,
        order_id: OrderId,
        strike: OptionStrike,
        options_issued: u64,
    },
    OptionExercise {
        account: AccountId,
        strike: OptionStrike,
        amount: u64,
    },
    CollateralBid {
        bidder: AccountId,
        collateral_symbol: String,
        collateral: u64,
        debt_symbol: String,
        debt: u64,
    },
    ForceSettle {
        owner: AccountId,
        symbol: String,
        amount: u64,
    },
    CreditPoolLend {
        account: AccountId,
        symbol: String,
        amount: u64,
    },
    CreditPoolWithdraw {
        account: AccountId,
        symbol: String,
        amount: u64,
    },
    CreditPoolCollateral {
        account: AccountId,
        symbol: String,
        amount: u64,
    },
    AssetPublishFeed {
        publisher: AccountId,
        symbol: String,
        feed: crate::oracle::Feed,
    },
    TransferRecurring {
        id: OrderId,
        from: AccountId,
        to: AccountId,
        symbol: String,
        /// `None` means "whatever is in the liquid balance at payment time".
        amount: Option<u64>,
        interval: i64,
        payments_remaining: u32,
        extensible: bool,
        fill_or_kill: bool,
    },
    /// Escrows `amount` out of `from`'s liquid balance pending `to`'s accept,
    /// per spec.md §6's `transfer_request`/`transfer_accept` handshake.
    TransferRequest {
        id: OrderId,
        from: AccountId,
        to: AccountId,
        symbol: String,
        amount: u64,
        memo: String,
    },
    /// Cancels a pending transfer request, refunding the escrow to `from`.
    TransferRequestCancel {
        id: OrderId,
    },
    /// Accepts a pending transfer request, releasing the escrow to `to`.
    TransferAccept {
        id: OrderId,
    },
    /// Proposes a recurring transfer schedule pending `to`'s accept.
    TransferRecurringRequest {
        id: OrderId,
        from: AccountId,
        to: AccountId,
        symbol: String,
        amount: Option<u64>,
        interval: i64,
        payments_remaining: u32,
        extensible: bool,
        fill_or_kill: bool,
    },
    /// Accepts a pending recurring-transfer proposal, starting the schedule.
    TransferRecurringAccept {
        id: OrderId,
    },
    /// Opens a collateralized loan against `src/pool/credit.rs`'s borrow
    /// lifecycle (§4.5).
    CreditLoanOpen {
        account: AccountId,
        loan_id: OrderId,
        debt_symbol: String,
        debt: u64,
        collateral_symbol: String,
        collateral: u64,
    },
    /// Repays (in full or in part) an open `CreditLoan`, releasing its
    /// collateral once the debt and accrued interest reach zero.
    CreditLoanRepay {
        account: AccountId,
        loan_id: OrderId,
        amount: u64,
    },
    /// Deposits into (creating if absent) a constant-product liquidity pool.
    LiquidityPoolDeposit {
        account: AccountId,
        base_symbol: String,
        quote_symbol: String,
        base_amount: u64,
        quote_amount: u64,
        swap_fee_bps: u32,
    },
    /// Redeems `amount` of a globally settled debt asset for its pro-rata
    /// share of the pooled settlement collateral (§4.3 point 3).
    GlobalSettlementClaim {
        account: AccountId,
        debt_symbol: String,
        amount: u64,
    },
}

impl Operation {
    /// A human-readable tag, used in trace logging and test assertions.
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::Transfer { .. } => "transfer",
            Operation::LimitOrder { .. } => "limit_order",
            Operation::CancelLimitOrder { .. } => "cancel_limit_order",
            Operation::MarginOrder { .. } => "margin_order",
            Operation::AuctionOrder { .. } => "auction_order",
            Operation::CallOrder { .. } => "call_order",
            Operation::OptionOrder { .. } => "option_order",
            Operation::OptionExercise { .. } => "option_exercise",
            Operation::CollateralBid { .. } => "collateral_bid",
            Operation::ForceSettle { .. } => "force_settle",
            Operation::CreditPoolLend { .. } => "credit_pool_lend",
            Operation::CreditPoolWithdraw { .. } => "credit_pool_withdraw",
            Operation::CreditPoolCollateral { .. } => "credit_pool_collateral",
            Operation::AssetPublishFeed { .. } => "asset_publish_feed",
            Operation::TransferRecurring { .. } => "transfer_recurring",
            Operation::TransferRequest { .. } => "transfer_request",
            Operation::TransferRequestCancel { .. } => "transfer_request_cancel",
            Operation::TransferAccept { .. } => "transfer_accept",
            Operation::TransferRecurringRequest { .. } => "transfer_recurring_request",
            Operation::TransferRecurringAccept { .. } => "transfer_recurring_accept",
            Operation::CreditLoanOpen { .. } => "credit_loan_open",
            Operation::CreditLoanRepay { .. } => "credit_loan_repay",
            Operation::LiquidityPoolDeposit { .. } => "liquidity_pool_deposit",
            Operation::GlobalSettlementClaim { .. } => "global_settlement_claim",
        }
    }
}
