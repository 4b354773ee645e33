//! Engine orchestrator: owns every book and the chain properties, applies
//! operations in the fixed order §4.9 describes, and runs the scheduler at
//! block start. Replaces the source's shared mutable chain-state singleton
//! with an explicit value passed by exclusive reference, per the "Shared
//! mutable chain-state singleton" design note in §9.

use std::collections::BTreeMap;

use crate::{
    books::{
        auction::{AuctionBook, AuctionOrder},
        call::{max_debt_to_cover, CallOrderBook},
        limit::LimitOrderBook,
        margin::MarginOrderBook,
        option::{OptionOrderBook, OptionStrike},
    },
    chain_properties::ChainProperties,
    error::{EngineError, EngineResult},
    ledger::{AccountId, AssetSymbol, Ledger, Partition},
    math::{price::Price, safe_math::SafeMath},
    ops::Operation,
    oracle::PriceOracle,
    pool::{credit::CreditPool, liquidity::LiquidityPoolRegistry},
    scheduler::{EventKind, Scheduler},
    store::SnapshotStack,
};

/// The default swap fee a liquidity pool is created with when a deposit
/// doesn't request one explicitly. Mirrors the teacher's market fee genesis
/// default; not exposed via `ChainProperties` since per-pool fees are set at
/// creation time by the depositor, not a chain-wide parameter.
const DEFAULT_POOL_SWAP_FEE_BPS: u32 = 30;

/// A stable-asset balance escrowed pending payout at `settlement_date`,
/// created by `force_settle` and drained by the scheduler, per §3.
#[derive(Clone, Debug)]
pub struct ForceSettlement {
    pub owner: AccountId,
    pub symbol: AssetSymbol,
    pub balance: u64,
    pub settlement_date: i64,
}

/// A standing offer to re-collateralize a globally settled debt asset,
/// resolved once new collateral bids exceed the pooled settlement fund.
#[derive(Clone, Debug)]
pub struct CollateralBid {
    pub bidder: AccountId,
    pub collateral_symbol: AssetSymbol,
    pub collateral: u64,
    pub debt_symbol: AssetSymbol,
    pub debt: u64,
}

#[derive(Clone, Debug)]
struct RecurringTransfer {
    id: String,
    from: AccountId,
    to: AccountId,
    symbol: AssetSymbol,
    amount: Option<u64>,
    interval: i64,
    next_transfer: i64,
    end: i64,
    payments_remaining: u32,
    extensible: bool,
    fill_or_kill: bool,
}

/// An escrow created by `transfer_request`, released to `to` on
/// `transfer_accept` or refunded to `from` on `transfer_request_cancel`.
#[derive(Clone, Debug)]
struct PendingTransfer {
    from: AccountId,
    to: AccountId,
    symbol: AssetSymbol,
    amount: u64,
}

/// A recurring-transfer schedule proposed by `from`, pending `to`'s accept
/// before it starts paying out.
#[derive(Clone, Debug)]
struct PendingRecurringTransfer {
    from: AccountId,
    to: AccountId,
    symbol: AssetSymbol,
    amount: Option<u64>,
    interval: i64,
    payments_remaining: u32,
    extensible: bool,
    fill_or_kill: bool,
}

/// The full mutable state the core operates on. Every field derives `Clone`
/// so a block-apply loop can snapshot and roll back a whole transaction by
/// cloning and restoring `Engine` itself, per §4.9 and §5 — correctness over
/// cleverness, the same trade-off `store::SnapshotStack` documents.
#[derive(Clone)]
pub struct Engine {
    pub chain_properties: ChainProperties,
    pub ledger: Ledger,
    pub oracle: PriceOracle,
    pub credit_pool: CreditPool,
    pub liquidity_pools: LiquidityPoolRegistry,
    pub limit_book: LimitOrderBook,
    pub call_book: CallOrderBook,
    pub margin_book: MarginOrderBook,
    pub auction_book: AuctionBook,
    pub option_book: OptionOrderBook,
    pub scheduler: Scheduler,
    force_settlements: BTreeMap<(AccountId, String), ForceSettlement>,
    collateral_bids: BTreeMap<(AccountId, AssetSymbol), CollateralBid>,
    recurring_transfers: BTreeMap<String, RecurringTransfer>,
    pending_transfers: BTreeMap<String, PendingTransfer>,
    pending_recurring_transfers: BTreeMap<String, PendingRecurringTransfer>,
}

/// Outcome of applying one transaction (a list of operations) within a
/// block: either every operation committed, or the whole transaction rolled
/// back to the snapshot taken before it started.
pub enum TransactionOutcome {
    Committed,
    RolledBack(EngineError),
}

impl Engine {
    pub fn new(chain_properties: ChainProperties) -> Self {
        Self {
            oracle: PriceOracle::new(
                chain_properties.maximum_asset_feed_publishers,
                chain_properties.max_feed_age_seconds,
                chain_properties.min_feeds,
            ),
            credit_pool: CreditPool::new(
                chain_properties.credit_open_ratio_bps,
                chain_properties.credit_liquidation_ratio_bps,
                chain_properties.credit_min_interest_bps,
                chain_properties.credit_variable_interest_bps,
            ),
            chain_properties,
            ledger: Ledger::new(),
            liquidity_pools: LiquidityPoolRegistry::new(),
            limit_book: LimitOrderBook::new(),
            call_book: CallOrderBook::new(),
            margin_book: MarginOrderBook::new(),
            auction_book: AuctionBook::new(),
            option_book: OptionOrderBook::new(),
            scheduler: Scheduler::new(),
            force_settlements: BTreeMap::new(),
            collateral_bids: BTreeMap::new(),
            recurring_transfers: BTreeMap::new(),
            pending_transfers: BTreeMap::new(),
            pending_recurring_transfers: BTreeMap::new(),
        }
    }

    /// Runs the full block pipeline: snapshot chain properties (the caller
    /// is expected to have already refreshed `self.chain_properties` to the
    /// producers' median for this block), drain the scheduler, then apply
    /// every transaction in order with nested snapshot/rollback.
    pub fn apply_block(
        &mut self,
        block_time: i64,
        transactions: Vec<Vec<Operation>>,
    ) -> Vec<TransactionOutcome> {
        self.run_scheduled(block_time);

        let mut outcomes = Vec::with_capacity(transactions.len());
        let mut snapshots: SnapshotStack<Engine> = SnapshotStack::new();
        for tx in transactions {
            snapshots.begin_snapshot(self);
            let result = self.apply_transaction(block_time, &tx);
            match result {
                Ok(()) => {
                    snapshots.commit().expect("snapshot just pushed");
                    outcomes.push(TransactionOutcome::Committed);
                }
                Err(err) if err.commits_partial_effects() => {
                    snapshots.commit().expect("snapshot just pushed");
                    outcomes.push(TransactionOutcome::Committed);
                }
                Err(err) => {
                    *self = snapshots.rollback().expect("snapshot just pushed");
                    outcomes.push(TransactionOutcome::RolledBack(err));
                }
            }
        }
        outcomes
    }

    fn apply_transaction(&mut self, block_time: i64, ops: &[Operation]) -> EngineResult<()> {
        for op in ops {
            self.apply_operation(block_time, op)?;
        }
        Ok(())
    }

    /// Validates and mutates the primary object for one operation, then runs
    /// the affected books' match loop, per §4.9 step 4.
    pub fn apply_operation(&mut self, block_time: i64, op: &Operation) -> EngineResult<()> {
        match op {
            Operation::Transfer { from, to, symbol, amount, .. } => {
                self.ledger.transfer(from, to, symbol, Partition::Liquid, *amount)
            }

            Operation::LimitOrder {
                owner,
                order_id,
                base_symbol,
                quote_symbol,
                amount_to_sell,
                exchange_rate,
                expiration,
                fill_or_kill,
                opened,
                ..
            } => {
                self.limit_book.place_limit(
                    &mut self.ledger,
                    owner,
                    order_id,
                    base_symbol,
                    quote_symbol,
                    *amount_to_sell,
                    *exchange_rate,
                    *expiration,
                    *fill_or_kill,
                    *opened,
                    block_time,
                )?;
                self.run_call_cascade(base_symbol, block_time)?;
                self.run_call_cascade(quote_symbol, block_time)
            }

            Operation::CancelLimitOrder { owner, order_id } => {
                self.limit_book.cancel(&mut self.ledger, owner, order_id)
            }

            Operation::MarginOrder {
                owner,
                order_id,
                collateral_symbol,
                collateral,
                debt_symbol,
                amount_to_borrow,
                position_symbol,
                exchange_rate,
                force_close,
            } => {
                if *force_close {
                    self.close_margin_order(owner, order_id, block_time)
                } else {
                    self.open_margin_order(
                        owner,
                        order_id,
                        collateral_symbol,
                        *collateral,
                        debt_symbol,
                        *amount_to_borrow,
                        position_symbol,
                        *exchange_rate,
                        block_time,
                    )
                }
            }

            Operation::AuctionOrder {
                owner,
                order_id,
                sell_symbol,
                buy_symbol,
                amount_to_sell,
                limit_close_price,
                expiration,
                ..
            } => {
                self.ledger.debit(owner, sell_symbol, Partition::Liquid, *amount_to_sell)?;
                self.auction_book.place(AuctionOrder {
                    owner: owner.clone(),
                    order_id: order_id.clone(),
                    sell_symbol: sell_symbol.clone(),
                    buy_symbol: buy_symbol.clone(),
                    amount_to_sell: *amount_to_sell,
                    min_exchange_rate: *limit_close_price,
                    expiration: *expiration,
                    created_at: block_time,
                })?;
                let due_time = block_time.safe_add(self.chain_properties.auction_interval_seconds)?;
                self.scheduler
                    .schedule(EventKind::AuctionClearing, due_time, format!("{sell_symbol}|{buy_symbol}"));
                Ok(())
            }

            Operation::CallOrder {
                borrower,
                collateral_symbol,
                collateral,
                debt_symbol,
                debt,
                target_collateral_ratio_bps,
            } => {
                let (prior_collateral, prior_debt) = self
                    .call_book
                    .call(borrower, debt_symbol)
                    .map(|c| (c.collateral, c.debt))
                    .unwrap_or((0, 0));

                if *collateral > prior_collateral {
                    self.ledger.debit(
                        borrower,
                        collateral_symbol,
                        Partition::Liquid,
                        collateral.safe_sub(prior_collateral)?,
                    )?;
                } else if *collateral < prior_collateral {
                    self.ledger.credit(
                        borrower,
                        collateral_symbol,
                        Partition::Liquid,
                        prior_collateral.safe_sub(*collateral)?,
                    )?;
                }

                if *debt > prior_debt {
                    let delta = debt.safe_sub(prior_debt)?;
                    self.ledger.mint(debt_symbol, delta)?;
                    self.ledger.credit(borrower, debt_symbol, Partition::Liquid, delta)?;
                } else if *debt < prior_debt {
                    let delta = prior_debt.safe_sub(*debt)?;
                    self.ledger.debit(borrower, debt_symbol, Partition::Liquid, delta)?;
                    self.ledger.burn(debt_symbol, delta)?;
                }

                self.call_book.open_or_adjust(
                    borrower,
                    collateral_symbol,
                    *collateral,
                    debt_symbol,
                    *debt,
                    *target_collateral_ratio_bps,
                )?;
                self.run_call_cascade(debt_symbol, block_time)
            }

            Operation::OptionOrder { owner, order_id, strike, options_issued } => {
                let amount_to_issue = self.option_book.write(owner, order_id, strike.clone(), *options_issued)?;
                if *options_issued == 0 {
                    self.ledger.credit(owner, &strike.underlying_symbol, Partition::Liquid, amount_to_issue)
                } else {
                    self.ledger.debit(owner, &strike.underlying_symbol, Partition::Liquid, amount_to_issue)?;
                    self.scheduler.schedule(EventKind::Expiration, strike.expiration, encode_strike_id(strike));
                    Ok(())
                }
            }

            Operation::OptionExercise { account, strike, amount } => self.exercise_option(account, strike, *amount),

            Operation::CollateralBid {
                bidder,
                collateral_symbol,
                collateral,
                debt_symbol,
                debt,
            } => {
                crate::validate!(
                    self.call_book.is_globally_settled(debt_symbol),
                    EngineError::constraint("collateral bids only apply to a globally settled asset")
                )?;
                self.ledger.debit(bidder, collateral_symbol, Partition::Liquid, *collateral)?;
                self.collateral_bids.insert(
                    (bidder.clone(), debt_symbol.clone()),
                    CollateralBid {
                        bidder: bidder.clone(),
                        collateral_symbol: collateral_symbol.clone(),
                        collateral: *collateral,
                        debt_symbol: debt_symbol.clone(),
                        debt: *debt,
                    },
                );

                // A bid that alone covers the whole outstanding debt supply
                // lifts the settlement immediately, folding it into a single
                // reopened call for the bidder (§3: resolved bids are
                // consumed). Bids that don't yet cover it stand until a
                // larger or combined bid does.
                let total_outstanding = self.ledger.total_outstanding(debt_symbol)?;
                if total_outstanding > 0 && *debt >= total_outstanding {
                    self.call_book
                        .resolve_via_bid(debt_symbol, bidder, collateral_symbol, *collateral, total_outstanding)?;
                    self.collateral_bids.remove(&(bidder.clone(), debt_symbol.clone()));
                }
                Ok(())
            }

            Operation::ForceSettle { owner, symbol, amount } => {
                self.ledger.debit(owner, symbol, Partition::Liquid, *amount)?;
                let settlement_date = block_time.safe_add(self.chain_properties.max_feed_age_seconds)?;
                let id = format!("{owner}:{symbol}:{block_time}");
                self.force_settlements.insert(
                    (owner.clone(), id.clone()),
                    ForceSettlement {
                        owner: owner.clone(),
                        symbol: symbol.clone(),
                        balance: *amount,
                        settlement_date,
                    },
                );
                self.scheduler.schedule(EventKind::ForceSettlementMaturity, settlement_date, format!("{owner}|{id}"));
                Ok(())
            }

            Operation::CreditPoolLend { account, symbol, amount } => {
                self.ledger.debit(account, symbol, Partition::Liquid, *amount)?;
                let minted = self.credit_pool.lend(symbol, *amount)?;
                self.ledger.credit(account, &credit_receipt_symbol(symbol), Partition::Liquid, minted)
            }

            Operation::CreditPoolWithdraw { account, symbol, amount } => {
                let base_out = self.credit_pool.withdraw_lend(symbol, *amount, self.chain_properties.market_max_credit_ratio_bps)?;
                self.ledger.debit(account, &credit_receipt_symbol(symbol), Partition::Liquid, *amount)?;
                self.ledger.credit(account, symbol, Partition::Liquid, base_out)
            }

            Operation::CreditPoolCollateral { account, symbol, amount } => {
                self.ledger.debit(account, symbol, Partition::Liquid, *amount)?;
                self.credit_pool.deposit_collateral(account, symbol, *amount)
            }

            Operation::AssetPublishFeed { publisher, symbol, feed } => {
                self.oracle.publish(publisher, symbol, *feed, block_time)?;
                self.run_call_cascade(symbol, block_time)?;
                self.run_credit_liquidation(symbol, block_time)?;
                self.run_margin_liquidation(symbol, block_time)
            }

            Operation::TransferRecurring {
                id,
                from,
                to,
                symbol,
                amount,
                interval,
                payments_remaining,
                extensible,
                fill_or_kill,
            } => {
                let next_transfer = block_time.safe_add(*interval)?;
                let end = next_transfer.safe_add((*interval).safe_mul(*payments_remaining as i64)?)?;
                self.recurring_transfers.insert(
                    id.clone(),
                    RecurringTransfer {
                        id: id.clone(),
                        from: from.clone(),
                        to: to.clone(),
                        symbol: symbol.clone(),
                        amount: *amount,
                        interval: *interval,
                        next_transfer,
                        end,
                        payments_remaining: *payments_remaining,
                        extensible: *extensible,
                        fill_or_kill: *fill_or_kill,
                    },
                );
                self.scheduler.schedule(EventKind::RecurringTransfer, next_transfer, id.clone());
                Ok(())
            }

            Operation::TransferRequest { id, from, to, symbol, amount, .. } => {
                self.ledger.debit(from, symbol, Partition::Liquid, *amount)?;
                self.pending_transfers.insert(
                    id.clone(),
                    PendingTransfer { from: from.clone(), to: to.clone(), symbol: symbol.clone(), amount: *amount },
                );
                Ok(())
            }

            Operation::TransferRequestCancel { id } => {
                let pending = self
                    .pending_transfers
                    .remove(id)
                    .ok_or_else(|| EngineError::not_found(format!("transfer request {id}")))?;
                self.ledger.credit(&pending.from, &pending.symbol, Partition::Liquid, pending.amount)
            }

            Operation::TransferAccept { id } => {
                let pending = self
                    .pending_transfers
                    .remove(id)
                    .ok_or_else(|| EngineError::not_found(format!("transfer request {id}")))?;
                self.ledger.credit(&pending.to, &pending.symbol, Partition::Liquid, pending.amount)
            }

            Operation::TransferRecurringRequest {
                id,
                from,
                to,
                symbol,
                amount,
                interval,
                payments_remaining,
                extensible,
                fill_or_kill,
            } => {
                self.pending_recurring_transfers.insert(
                    id.clone(),
                    PendingRecurringTransfer {
                        from: from.clone(),
                        to: to.clone(),
                        symbol: symbol.clone(),
                        amount: *amount,
                        interval: *interval,
                        payments_remaining: *payments_remaining,
                        extensible: *extensible,
                        fill_or_kill: *fill_or_kill,
                    },
                );
                Ok(())
            }

            Operation::TransferRecurringAccept { id } => {
                let proposal = self
                    .pending_recurring_transfers
                    .remove(id)
                    .ok_or_else(|| EngineError::not_found(format!("recurring transfer proposal {id}")))?;
                let next_transfer = block_time.safe_add(proposal.interval)?;
                let end = next_transfer.safe_add(proposal.interval.safe_mul(proposal.payments_remaining as i64)?)?;
                self.recurring_transfers.insert(
                    id.clone(),
                    RecurringTransfer {
                        id: id.clone(),
                        from: proposal.from,
                        to: proposal.to,
                        symbol: proposal.symbol,
                        amount: proposal.amount,
                        interval: proposal.interval,
                        next_transfer,
                        end,
                        payments_remaining: proposal.payments_remaining,
                        extensible: proposal.extensible,
                        fill_or_kill: proposal.fill_or_kill,
                    },
                );
                self.scheduler.schedule(EventKind::RecurringTransfer, next_transfer, id.clone());
                Ok(())
            }

            Operation::CreditLoanOpen { account, loan_id, debt_symbol, debt, collateral_symbol, collateral } => {
                let feed = self.oracle.current_feed(debt_symbol, block_time)?;
                self.ledger.debit(account, collateral_symbol, Partition::Liquid, *collateral)?;
                self.credit_pool.open_loan(
                    account,
                    loan_id,
                    debt_symbol,
                    *debt,
                    collateral_symbol,
                    *collateral,
                    feed.settlement_price_quote,
                    feed.settlement_price_base,
                )?;
                self.ledger.credit(account, debt_symbol, Partition::Liquid, *debt)
            }

            Operation::CreditLoanRepay { account, loan_id, amount } => {
                let loan = self.credit_pool.loan(account, loan_id)?.clone();
                self.ledger.debit(account, &loan.debt_symbol, Partition::Liquid, *amount)?;
                let (applied, released) = self.credit_pool.repay_loan(account, loan_id, *amount)?;
                if applied < *amount {
                    self.ledger.credit(account, &loan.debt_symbol, Partition::Liquid, amount.safe_sub(applied)?)?;
                }
                if let Some((symbol, freed)) = released {
                    self.ledger.credit(account, &symbol, Partition::Liquid, freed)?;
                }
                Ok(())
            }

            Operation::LiquidityPoolDeposit { account, base_symbol, quote_symbol, base_amount, quote_amount, swap_fee_bps } => {
                self.ledger.debit(account, base_symbol, Partition::Liquid, *base_amount)?;
                self.ledger.debit(account, quote_symbol, Partition::Liquid, *quote_amount)?;
                let pool = self.liquidity_pools.get_or_create(base_symbol, quote_symbol, *swap_fee_bps);
                let (deposit_base, deposit_quote) = if pool.base_symbol == *base_symbol {
                    (*base_amount, *quote_amount)
                } else {
                    (*quote_amount, *base_amount)
                };
                pool.deposit(deposit_base, deposit_quote)?;
                Ok(())
            }

            Operation::GlobalSettlementClaim { account, debt_symbol, amount } => {
                let total_outstanding = self.ledger.total_outstanding(debt_symbol)?;
                self.ledger.debit(account, debt_symbol, Partition::Liquid, *amount)?;
                let (collateral_symbol, owed) = self.call_book.claim_global_settlement(debt_symbol, *amount, total_outstanding)?;
                self.ledger.burn(debt_symbol, *amount)?;
                self.ledger.credit(account, &collateral_symbol, Partition::Liquid, owed)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn open_margin_order(
        &mut self,
        owner: &str,
        order_id: &str,
        collateral_symbol: &str,
        collateral: u64,
        debt_symbol: &str,
        amount_to_borrow: u64,
        position_symbol: &str,
        exchange_rate: Price,
        block_time: i64,
    ) -> EngineResult<()> {
        crate::validate!(
            self.credit_pool.collateral_of(owner, collateral_symbol) >= collateral,
            EngineError::InsufficientFunds {
                needed: collateral as i128,
                have: self.credit_pool.collateral_of(owner, collateral_symbol) as i128,
            }
        )?;
        let available = self.credit_pool.pool_state(debt_symbol);
        let available = available.base_balance.safe_sub(available.borrowed_balance)?;
        crate::validate!(
            amount_to_borrow <= available,
            EngineError::InsufficientFunds { needed: amount_to_borrow as i128, have: available as i128 }
        )?;

        self.margin_book.open(
            owner,
            order_id,
            collateral_symbol,
            collateral,
            debt_symbol,
            amount_to_borrow,
            position_symbol,
            exchange_rate.base_amount,
            exchange_rate.quote_amount,
        )?;

        self.ledger.credit(owner, debt_symbol, Partition::Liquid, amount_to_borrow)?;
        let sell_order_id = format!("margin:{order_id}");
        let (_, fills) = self.limit_book.place_limit(
            &mut self.ledger,
            owner,
            &sell_order_id,
            debt_symbol,
            position_symbol,
            amount_to_borrow,
            exchange_rate,
            block_time.safe_add(crate::math::constants::THIRTY_DAYS)?,
            false,
            true,
            block_time,
        )?;

        let mut debt_filled = 0u64;
        let mut position_received = 0u64;
        for fill in &fills {
            debt_filled = debt_filled.safe_add(fill.quote_filled)?;
            position_received = position_received.safe_add(fill.base_filled)?;
        }
        if debt_filled > 0 {
            self.margin_book.apply_fill(owner, order_id, debt_filled, position_received)?;
        }
        Ok(())
    }

    fn exercise_option(&mut self, account: &str, strike: &crate::books::option::OptionStrike, amount: u64) -> EngineResult<()> {
        let strike_price = Price::new(strike.strike_price_base, strike.strike_price_quote)?;
        let underlying_owed = amount.safe_mul(crate::books::option::UNDERLYING_PER_OPTION)?;
        let counter_owed = strike_price.base_to_quote(underlying_owed)?;

        self.ledger.debit(account, &strike.counter_symbol, Partition::Liquid, counter_owed)?;
        let deductions = self.option_book.exercise(strike, amount)?;
        self.ledger.credit(account, &strike.underlying_symbol, Partition::Liquid, underlying_owed)?;
        for (writer, units) in deductions {
            let owed = strike_price.base_to_quote(units.safe_mul(crate::books::option::UNDERLYING_PER_OPTION)?)?;
            self.ledger.credit(&writer, &strike.counter_symbol, Partition::Liquid, owed)?;
        }
        Ok(())
    }

    /// Drains the scheduler, dispatching every due event in the fixed kind
    /// order `Scheduler::drain_due` already enforces.
    fn run_scheduled(&mut self, block_time: i64) {
        let _ = self.limit_book.expire_due(&mut self.ledger, block_time);

        for event in self.scheduler.drain_due(block_time) {
            match event.kind {
                EventKind::Expiration => {
                    if let Some(strike) = decode_strike_id(&event.id) {
                        for (owner, amount) in self.option_book.expire_strike(&strike) {
                            let _ = self.ledger.credit(&owner, &strike.underlying_symbol, Partition::Liquid, amount);
                        }
                    }
                }
                EventKind::AuctionClearing => {
                    if let Some((sell, buy)) = event.id.split_once('|') {
                        if self.auction_book.is_due(sell, buy, block_time, self.chain_properties.auction_interval_seconds) {
                            let _ = self.auction_book.clear(&mut self.ledger, sell, buy, block_time);
                        }
                    }
                }
                EventKind::ForceSettlementMaturity => {
                    self.settle_force_settlement(&event.id);
                }
                EventKind::RecurringTransfer => {
                    self.run_recurring_transfer(&event.id, block_time);
                }
                EventKind::InterestCompounding => {
                    let _ = self.credit_pool.accrue_hourly_interest();
                }
                EventKind::FeedFreshnessDecay => {
                    self.oracle.evict_stale(block_time);
                }
            }
        }
    }

    fn settle_force_settlement(&mut self, event_id: &str) {
        let Some((owner, id)) = event_id.split_once('|') else { return };
        if let Some(settlement) = self.force_settlements.remove(&(owner.to_string(), id.to_string())) {
            let _ = self.ledger.credit(&settlement.owner, &settlement.symbol, Partition::Liquid, settlement.balance);
        }
    }

    /// Processes one due payment of a recurring transfer, per §4.8 point 4 /
    /// scenario 6: on insufficient funds, `fill_or_kill` cancels the whole
    /// schedule; otherwise the payment is skipped and, if `extensible`, the
    /// schedule's end shifts by one interval instead of shrinking.
    fn run_recurring_transfer(&mut self, id: &str, block_time: i64) {
        let Some(mut transfer) = self.recurring_transfers.get(id).cloned() else { return };

        let amount = transfer.amount.unwrap_or_else(|| self.ledger.balance(&transfer.from, &transfer.symbol).liquid);
        let paid = amount > 0 && self.ledger.transfer(&transfer.from, &transfer.to, &transfer.symbol, Partition::Liquid, amount).is_ok();

        if !paid && transfer.fill_or_kill {
            self.recurring_transfers.remove(id);
            return;
        }

        if paid {
            transfer.payments_remaining = transfer.payments_remaining.saturating_sub(1);
        } else if transfer.extensible {
            transfer.end = transfer.end.saturating_add(transfer.interval);
        } else {
            transfer.payments_remaining = transfer.payments_remaining.saturating_sub(1);
        }

        if transfer.payments_remaining == 0 {
            self.recurring_transfers.remove(id);
            return;
        }

        transfer.next_transfer = block_time.saturating_add(transfer.interval);
        self.scheduler.schedule(EventKind::RecurringTransfer, transfer.next_transfer, id.to_string());
        self.recurring_transfers.insert(id.to_string(), transfer);
    }

    /// Margin-call cascade for `debt_symbol`, per §4.3: gather calls in
    /// ascending collateralization, and for each undercollateralized call,
    /// force-sell as much collateral as the limit book will absorb, then the
    /// liquidity pool, declaring a global settlement if neither can cover an
    /// open call (force-settlement cover is handled by
    /// `settle_force_settlement` paying into the same debt symbol).
    fn run_call_cascade(&mut self, debt_symbol: &str, block_time: i64) -> EngineResult<()> {
        if self.call_book.is_globally_settled(debt_symbol) {
            return Ok(());
        }
        let Ok(feed) = self.oracle.current_feed(debt_symbol, block_time) else {
            return Ok(());
        };
        let feed_price = Price::new(feed.settlement_price_quote, feed.settlement_price_base)?;

        let mut quota = self.chain_properties.match_quota_per_block;
        for call in self.call_book.calls_ascending_collateralization(debt_symbol)? {
            if quota == 0 {
                break;
            }
            if !call.is_undercollateralized(&feed)? {
                break;
            }

            let margin_call_price = call.margin_call_price(&feed)?;
            let target_cr_bps = call.target_collateral_ratio_bps.unwrap_or(feed.maintenance_collateralization_bps) as u64;

            let match_price = self
                .limit_book
                .best_price(debt_symbol, &call.collateral_symbol)
                .unwrap_or(margin_call_price);

            let cover = max_debt_to_cover(
                feed_price,
                match_price,
                target_cr_bps,
                crate::math::constants::MARGIN_PRECISION as u64,
                call.debt,
                call.collateral,
            )?;
            if cover == 0 {
                continue;
            }

            let worst_price = match_price.reciprocal();
            let collateral_budget = match_price.base_to_quote(cover).unwrap_or(call.collateral).min(call.collateral);

            let (fills, collateral_given) =
                self.limit_book
                    .force_sell(&mut self.ledger, &call.collateral_symbol, debt_symbol, collateral_budget, worst_price)?;

            let mut debt_covered = 0u64;
            for fill in &fills {
                debt_covered = debt_covered.safe_add(fill.debt_obtained)?;
            }

            if debt_covered > 0 {
                self.ledger.burn(debt_symbol, debt_covered)?;
                self.call_book.settle_cover(&call.borrower, debt_symbol, debt_covered, collateral_given)?;
                quota = quota.saturating_sub(1);
            }

            let mut remaining_cover = cover.saturating_sub(debt_covered);
            let mut remaining_collateral_budget = collateral_budget.saturating_sub(collateral_given);

            if remaining_cover > 0 && remaining_collateral_budget > 0 {
                if let Some(pool) = self.liquidity_pools.get(&call.collateral_symbol, debt_symbol) {
                    let sell_collateral_as_base = pool.base_symbol == call.collateral_symbol;
                    let pool = self.liquidity_pools.get_or_create(&call.collateral_symbol, debt_symbol, DEFAULT_POOL_SWAP_FEE_BPS);
                    let debt_out = if sell_collateral_as_base {
                        pool.swap_base_for_quote(remaining_collateral_budget)
                    } else {
                        pool.swap_quote_for_base(remaining_collateral_budget)
                    };
                    if let Ok(debt_out) = debt_out {
                        let debt_out = debt_out.min(remaining_cover);
                        if debt_out > 0 {
                            self.ledger.burn(debt_symbol, debt_out)?;
                            self.call_book.settle_cover(&call.borrower, debt_symbol, debt_out, remaining_collateral_budget)?;
                            remaining_cover = remaining_cover.saturating_sub(debt_out);
                            remaining_collateral_budget = 0;
                        }
                    }
                }
            }
            let _ = remaining_collateral_budget;

            let still_open = self.call_book.call(&call.borrower, debt_symbol).is_some();
            let has_counterparty = self.limit_book.best_price(debt_symbol, &call.collateral_symbol).is_some()
                || self.liquidity_pools.get(&call.collateral_symbol, debt_symbol).is_some();
            if still_open && remaining_cover > 0 && !has_counterparty {
                // No limit order and no liquidity pool exist to keep absorbing
                // this call's collateral: black swan per §4.3 point 3.
                self.call_book.declare_global_settlement(debt_symbol, feed_price)?;
                break;
            }
        }
        Ok(())
    }

    /// Unwinds a margin order's real position balance back onto the limit
    /// book at a permissive price and removes the book entry. The order's
    /// `collateral` was never actually debited from the owner at open time,
    /// so it isn't credited back here either — only `position_balance`,
    /// which is a real ledger balance, is unwound.
    fn close_margin_order(&mut self, owner: &str, order_id: &str, block_time: i64) -> EngineResult<()> {
        let order = self
            .margin_book
            .order(owner, order_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("margin order {owner}/{order_id}")))?;

        if order.position_balance > 0 {
            let close_order_id = format!("close:{order_id}");
            self.limit_book.place_limit(
                &mut self.ledger,
                owner,
                &close_order_id,
                &order.position_symbol,
                &order.debt_symbol,
                order.position_balance,
                permissive_floor_price()?,
                block_time.safe_add(crate::math::constants::THIRTY_DAYS)?,
                false,
                false,
                block_time,
            )?;
        }

        self.margin_book.close(owner, order_id)?;
        Ok(())
    }

    /// Forces the sale of collateral backing any `CreditLoan` denominated in
    /// `debt_symbol` that has fallen below its liquidation ratio, repaying
    /// the pool's lendable balance from the proceeds and returning any
    /// leftover collateral to the borrower.
    fn run_credit_liquidation(&mut self, debt_symbol: &str, block_time: i64) -> EngineResult<()> {
        let Ok(feed) = self.oracle.current_feed(debt_symbol, block_time) else {
            return Ok(());
        };
        let liquidatable: Vec<_> = self
            .credit_pool
            .loans_by_debt_symbol(debt_symbol)
            .into_iter()
            .filter(|loan| loan.is_liquidatable(feed.settlement_price_quote, feed.settlement_price_base).unwrap_or(false))
            .map(|loan| (loan.owner.clone(), loan.loan_id.clone()))
            .collect();

        for (owner, loan_id) in liquidatable {
            let loan = self.credit_pool.remove_loan_for_liquidation(&owner, &loan_id)?;
            let (fills, collateral_given) = self.limit_book.force_sell(
                &mut self.ledger,
                &loan.collateral_symbol,
                &loan.debt_symbol,
                loan.collateral,
                permissive_floor_price()?,
            )?;
            let mut debt_recovered = 0u64;
            for fill in &fills {
                debt_recovered = debt_recovered.safe_add(fill.debt_obtained)?;
            }
            if debt_recovered > 0 {
                let owed = loan.debt.safe_add(loan.interest_accrued)?;
                self.credit_pool.repay_pool_balance(&loan.debt_symbol, debt_recovered.min(owed))?;
            }
            let leftover_collateral = loan.collateral.saturating_sub(collateral_given);
            if leftover_collateral > 0 {
                self.ledger.credit(&loan.owner, &loan.collateral_symbol, Partition::Liquid, leftover_collateral)?;
            }
        }
        Ok(())
    }

    /// Flags margin orders whose position is denominated in `position_symbol`
    /// below the liquidation ratio and closes each one.
    fn run_margin_liquidation(&mut self, position_symbol: &str, block_time: i64) -> EngineResult<()> {
        let Ok(feed) = self.oracle.current_feed(position_symbol, block_time) else {
            return Ok(());
        };
        let flagged = self.margin_book.sweep_liquidations(
            position_symbol,
            &feed,
            self.chain_properties.margin_liquidation_ratio_bps as i128,
        )?;
        for (owner, order_id) in flagged {
            self.close_margin_order(&owner, &order_id, block_time)?;
        }
        Ok(())
    }
}

fn credit_receipt_symbol(symbol: &str) -> String {
    format!("c{symbol}")
}

/// An extremely permissive floor price used for forced/liquidation sales, so
/// the sale crosses almost any resting maker on the book.
fn permissive_floor_price() -> EngineResult<Price> {
    Price::new(1_000_000_000, 1)
}

fn encode_strike_id(strike: &OptionStrike) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        strike.underlying_symbol, strike.counter_symbol, strike.strike_price_base, strike.strike_price_quote, strike.expiration,
    )
}

fn decode_strike_id(id: &str) -> Option<OptionStrike> {
    let mut parts = id.split('|');
    let underlying_symbol = parts.next()?.to_string();
    let counter_symbol = parts.next()?.to_string();
    let strike_price_base = parts.next()?.parse().ok()?;
    let strike_price_quote = parts.next()?.parse().ok()?;
    let expiration = parts.next()?.parse().ok()?;
    Some(OptionStrike {
        underlying_symbol,
        counter_symbol,
        strike_price_base,
        strike_price_quote,
        expiration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Asset, AssetType};

    fn engine_with_assets(symbols: &[&str]) -> Engine {
        let mut engine = Engine::new(ChainProperties::default());
        for sym in symbols {
            engine
                .ledger
                .register_asset(Asset::new((*sym).into(), 6, AssetType::Standard, "issuer".into()).unwrap())
                .unwrap();
        }
        engine
    }

    #[test]
    fn transfer_moves_liquid_balance() {
        let mut engine = engine_with_assets(&["USD"]);
        engine.ledger.credit("alice", "USD", Partition::Liquid, 1_000).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::Transfer {
                    from: "alice".into(),
                    to: "bob".into(),
                    symbol: "USD".into(),
                    amount: 300,
                    memo: String::new(),
                },
            )
            .unwrap();
        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 700);
        assert_eq!(engine.ledger.balance("bob", "USD").liquid, 300);
    }

    #[test]
    fn limit_order_cascade_matches_across_apply_operation() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        engine.ledger.credit("alice", "COIN", Partition::Liquid, 1_000).unwrap();
        engine.ledger.credit("bob", "USD", Partition::Liquid, 2_000).unwrap();
        let price = Price::new(1, 1).unwrap();

        engine
            .apply_operation(
                0,
                &Operation::LimitOrder {
                    owner: "alice".into(),
                    order_id: "a1".into(),
                    base_symbol: "COIN".into(),
                    quote_symbol: "USD".into(),
                    amount_to_sell: 1_000,
                    exchange_rate: price,
                    expiration: 1_000,
                    fill_or_kill: false,
                    opened: true,
                    interface: None,
                },
            )
            .unwrap();
        engine
            .apply_operation(
                0,
                &Operation::LimitOrder {
                    owner: "bob".into(),
                    order_id: "b1".into(),
                    base_symbol: "USD".into(),
                    quote_symbol: "COIN".into(),
                    amount_to_sell: 2_000,
                    exchange_rate: price,
                    expiration: 1_000,
                    fill_or_kill: false,
                    opened: true,
                    interface: None,
                },
            )
            .unwrap();

        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 1_000);
        assert_eq!(engine.ledger.balance("bob", "COIN").liquid, 1_000);
    }

    #[test]
    fn failed_transaction_rolls_back_whole_block_entry() {
        let mut engine = engine_with_assets(&["USD"]);
        engine.ledger.credit("alice", "USD", Partition::Liquid, 100).unwrap();

        let outcomes = engine.apply_block(
            0,
            vec![vec![
                Operation::Transfer { from: "alice".into(), to: "bob".into(), symbol: "USD".into(), amount: 50, memo: String::new() },
                Operation::Transfer { from: "alice".into(), to: "bob".into(), symbol: "USD".into(), amount: 1_000, memo: String::new() },
            ]],
        );
        assert!(matches!(outcomes[0], TransactionOutcome::RolledBack(_)));
        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 100);
        assert_eq!(engine.ledger.balance("bob", "USD").liquid, 0);
    }

    #[test]
    fn recurring_transfer_skips_payment_when_underfunded_and_decrements_remaining() {
        let mut engine = engine_with_assets(&["USD"]);
        engine.ledger.credit("candice", "USD", Partition::Liquid, 100).unwrap();

        engine
            .apply_operation(
                0,
                &Operation::TransferRecurring {
                    id: "sched-1".into(),
                    from: "candice".into(),
                    to: "bob".into(),
                    symbol: "USD".into(),
                    amount: None,
                    interval: crate::math::constants::ONE_HOUR,
                    payments_remaining: 10,
                    extensible: false,
                    fill_or_kill: false,
                },
            )
            .unwrap();

        engine.run_scheduled(crate::math::constants::ONE_HOUR);
        assert_eq!(engine.ledger.balance("candice", "USD").liquid, 0);
        assert_eq!(engine.ledger.balance("bob", "USD").liquid, 100);

        engine.run_scheduled(crate::math::constants::ONE_HOUR * 2);
        let remaining = engine.recurring_transfers.get("sched-1").unwrap();
        assert_eq!(remaining.payments_remaining, 8);
    }

    fn publish_feed(engine: &mut Engine, symbol: &str, base: u64, quote: u64, mcr_bps: u32, mssr_bps: u32, block_time: i64) {
        engine
            .apply_operation(
                block_time,
                &Operation::AssetPublishFeed {
                    publisher: "oracle1".into(),
                    symbol: symbol.into(),
                    feed: crate::oracle::Feed {
                        settlement_price_base: base,
                        settlement_price_quote: quote,
                        maintenance_collateralization_bps: mcr_bps,
                        max_short_squeeze_ratio_bps: mssr_bps,
                        core_exchange_rate_base: base,
                        core_exchange_rate_quote: quote,
                        published_at: block_time,
                    },
                },
            )
            .unwrap();
    }

    #[test]
    fn call_cascade_force_sells_against_resting_limit_order() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        engine.ledger.credit("alice", "COIN", Partition::Liquid, 1_000).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::CallOrder {
                    borrower: "alice".into(),
                    collateral_symbol: "COIN".into(),
                    collateral: 1_000,
                    debt_symbol: "USD".into(),
                    debt: 2_000,
                    target_collateral_ratio_bps: None,
                },
            )
            .unwrap();

        engine.ledger.credit("bob", "USD", Partition::Liquid, 2_000).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::LimitOrder {
                    owner: "bob".into(),
                    order_id: "b1".into(),
                    base_symbol: "USD".into(),
                    quote_symbol: "COIN".into(),
                    amount_to_sell: 2_000,
                    exchange_rate: Price::new(1, 1).unwrap(),
                    expiration: 10_000,
                    fill_or_kill: false,
                    opened: true,
                    interface: None,
                },
            )
            .unwrap();

        publish_feed(&mut engine, "USD", 10_000, 10_000, 17_500, 15_000, 0);

        let call = engine.call_book.call("alice", "USD").unwrap();
        assert_eq!(call.debt, 1_000);
        assert_eq!(call.collateral, 0);
        assert_eq!(engine.ledger.balance("bob", "COIN").liquid, 1_000);
        assert_eq!(engine.ledger.asset("USD").unwrap().burned, 1_000);
    }

    #[test]
    fn margin_order_fills_then_force_close_unwinds_position() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        engine.ledger.credit("alice", "COIN", Partition::Liquid, 1_000).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::CreditPoolCollateral { account: "alice".into(), symbol: "COIN".into(), amount: 1_000 },
            )
            .unwrap();

        engine.ledger.credit("lender", "USD", Partition::Liquid, 5_000).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::CreditPoolLend { account: "lender".into(), symbol: "USD".into(), amount: 5_000 },
            )
            .unwrap();

        engine.ledger.credit("bob", "COIN", Partition::Liquid, 1_000).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::LimitOrder {
                    owner: "bob".into(),
                    order_id: "bob-ask".into(),
                    base_symbol: "COIN".into(),
                    quote_symbol: "USD".into(),
                    amount_to_sell: 1_000,
                    exchange_rate: Price::new(1, 1).unwrap(),
                    expiration: 10_000,
                    fill_or_kill: false,
                    opened: true,
                    interface: None,
                },
            )
            .unwrap();

        engine
            .apply_operation(
                0,
                &Operation::MarginOrder {
                    owner: "alice".into(),
                    order_id: "m1".into(),
                    collateral_symbol: "COIN".into(),
                    collateral: 1_000,
                    debt_symbol: "USD".into(),
                    amount_to_borrow: 1_000,
                    position_symbol: "COIN".into(),
                    exchange_rate: Price::new(1, 1).unwrap(),
                    force_close: false,
                },
            )
            .unwrap();

        let order = engine.margin_book.order("alice", "m1").unwrap();
        assert_eq!(order.position_balance, 1_000);
        assert_eq!(order.debt_balance, 0);
        assert_eq!(engine.ledger.balance("alice", "COIN").liquid, 1_000);

        engine
            .apply_operation(
                0,
                &Operation::MarginOrder {
                    owner: "alice".into(),
                    order_id: "m1".into(),
                    collateral_symbol: "COIN".into(),
                    collateral: 0,
                    debt_symbol: "USD".into(),
                    amount_to_borrow: 0,
                    position_symbol: "COIN".into(),
                    exchange_rate: Price::new(1, 1).unwrap(),
                    force_close: true,
                },
            )
            .unwrap();

        assert!(engine.margin_book.order("alice", "m1").is_none());
        // No resting counterparty for the close order, so it's returned whole.
        assert_eq!(engine.ledger.balance("alice", "COIN").liquid, 1_000);
    }

    #[test]
    fn credit_loan_open_then_full_repay_releases_collateral() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        engine.ledger.credit("lender", "USD", Partition::Liquid, 10_000).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::CreditPoolLend { account: "lender".into(), symbol: "USD".into(), amount: 10_000 },
            )
            .unwrap();

        engine.ledger.credit("alice", "COIN", Partition::Liquid, 2_500).unwrap();
        publish_feed(&mut engine, "USD", 1, 1, 17_500, 15_000, 0);

        engine
            .apply_operation(
                0,
                &Operation::CreditLoanOpen {
                    account: "alice".into(),
                    loan_id: "loan1".into(),
                    debt_symbol: "USD".into(),
                    debt: 1_000,
                    collateral_symbol: "COIN".into(),
                    collateral: 2_500,
                },
            )
            .unwrap();
        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 1_000);
        assert_eq!(engine.ledger.balance("alice", "COIN").liquid, 0);

        engine
            .apply_operation(
                0,
                &Operation::CreditLoanRepay { account: "alice".into(), loan_id: "loan1".into(), amount: 1_000 },
            )
            .unwrap();

        assert!(engine.credit_pool.loan("alice", "loan1").is_err());
        assert_eq!(engine.ledger.balance("alice", "COIN").liquid, 2_500);
        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 0);
    }

    #[test]
    fn global_settlement_then_collateral_bid_resolves_it() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        publish_feed(&mut engine, "USD", 1, 1, 20_000, 15_000, 0);

        engine.ledger.credit("alice", "COIN", Partition::Liquid, 100).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::CallOrder {
                    borrower: "alice".into(),
                    collateral_symbol: "COIN".into(),
                    collateral: 100,
                    debt_symbol: "USD".into(),
                    debt: 1_000,
                    target_collateral_ratio_bps: None,
                },
            )
            .unwrap();

        assert!(engine.call_book.is_globally_settled("USD"));
        assert_eq!(engine.call_book.global_settlement("USD").unwrap().pooled_collateral, 100);
        // The cascade must not have fabricated a free debt reduction against
        // an empty market: alice still holds the full minted debt.
        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 1_000);

        engine.ledger.credit("carol", "COIN", Partition::Liquid, 500).unwrap();
        engine
            .apply_operation(
                0,
                &Operation::CollateralBid {
                    bidder: "carol".into(),
                    collateral_symbol: "COIN".into(),
                    collateral: 500,
                    debt_symbol: "USD".into(),
                    debt: 1_000,
                },
            )
            .unwrap();

        assert!(!engine.call_book.is_globally_settled("USD"));
        let reopened = engine.call_book.call("carol", "USD").unwrap();
        assert_eq!(reopened.debt, 1_000);
        assert_eq!(reopened.collateral, 500);
    }

    #[test]
    fn global_settlement_claim_pays_pro_rata_collateral() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        engine.call_book.open_or_adjust("alice", "COIN", 1_000, "USD", 500, None).unwrap();
        engine.call_book.declare_global_settlement("USD", Price::new(1, 1).unwrap()).unwrap();

        engine.ledger.mint("USD", 500).unwrap();
        engine.ledger.credit("bob", "USD", Partition::Liquid, 500).unwrap();

        engine
            .apply_operation(
                0,
                &Operation::GlobalSettlementClaim { account: "bob".into(), debt_symbol: "USD".into(), amount: 500 },
            )
            .unwrap();

        assert_eq!(engine.ledger.balance("bob", "COIN").liquid, 1_000);
        assert_eq!(engine.ledger.asset("USD").unwrap().burned, 500);
    }

    #[test]
    fn transfer_request_then_accept_releases_escrow() {
        let mut engine = engine_with_assets(&["USD"]);
        engine.ledger.credit("alice", "USD", Partition::Liquid, 500).unwrap();

        engine
            .apply_operation(
                0,
                &Operation::TransferRequest {
                    id: "t1".into(),
                    from: "alice".into(),
                    to: "bob".into(),
                    symbol: "USD".into(),
                    amount: 200,
                    memo: String::new(),
                },
            )
            .unwrap();
        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 300);

        engine.apply_operation(0, &Operation::TransferAccept { id: "t1".into() }).unwrap();
        assert_eq!(engine.ledger.balance("bob", "USD").liquid, 200);
        assert!(engine.pending_transfers.is_empty());
    }

    #[test]
    fn transfer_request_cancel_refunds_escrow() {
        let mut engine = engine_with_assets(&["USD"]);
        engine.ledger.credit("alice", "USD", Partition::Liquid, 500).unwrap();

        engine
            .apply_operation(
                0,
                &Operation::TransferRequest {
                    id: "t1".into(),
                    from: "alice".into(),
                    to: "bob".into(),
                    symbol: "USD".into(),
                    amount: 200,
                    memo: String::new(),
                },
            )
            .unwrap();
        engine.apply_operation(0, &Operation::TransferRequestCancel { id: "t1".into() }).unwrap();

        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 500);
        assert_eq!(engine.ledger.balance("bob", "USD").liquid, 0);
    }

    #[test]
    fn transfer_recurring_request_then_accept_schedules_and_pays() {
        let mut engine = engine_with_assets(&["USD"]);
        engine
            .apply_operation(
                0,
                &Operation::TransferRecurringRequest {
                    id: "r1".into(),
                    from: "alice".into(),
                    to: "bob".into(),
                    symbol: "USD".into(),
                    amount: Some(50),
                    interval: crate::math::constants::ONE_HOUR,
                    payments_remaining: 3,
                    extensible: false,
                    fill_or_kill: false,
                },
            )
            .unwrap();
        assert!(engine.recurring_transfers.is_empty());

        engine.apply_operation(0, &Operation::TransferRecurringAccept { id: "r1".into() }).unwrap();
        assert!(engine.pending_recurring_transfers.is_empty());

        engine.ledger.credit("alice", "USD", Partition::Liquid, 50).unwrap();
        engine.run_scheduled(crate::math::constants::ONE_HOUR);

        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 0);
        assert_eq!(engine.ledger.balance("bob", "USD").liquid, 50);
        assert_eq!(engine.recurring_transfers.get("r1").unwrap().payments_remaining, 2);
    }

    #[test]
    fn recurring_transfer_underfunded_and_extensible_does_not_fabricate_payment() {
        let mut engine = engine_with_assets(&["USD"]);
        engine
            .apply_operation(
                0,
                &Operation::TransferRecurring {
                    id: "s1".into(),
                    from: "alice".into(),
                    to: "bob".into(),
                    symbol: "USD".into(),
                    amount: None,
                    interval: crate::math::constants::ONE_HOUR,
                    payments_remaining: 2,
                    extensible: true,
                    fill_or_kill: false,
                },
            )
            .unwrap();

        engine.run_scheduled(crate::math::constants::ONE_HOUR);
        let transfer = engine.recurring_transfers.get("s1").unwrap();
        assert_eq!(transfer.payments_remaining, 2, "an unfunded, extensible payment must not consume a payment slot");
        assert_eq!(transfer.end, crate::math::constants::ONE_HOUR * 2 + crate::math::constants::ONE_HOUR);
        assert_eq!(engine.ledger.balance("bob", "USD").liquid, 0);
    }

    #[test]
    fn option_expiration_credits_back_escrowed_underlying() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        engine.ledger.credit("alice", "COIN", Partition::Liquid, 1_000).unwrap();

        let strike = OptionStrike {
            underlying_symbol: "COIN".into(),
            counter_symbol: "USD".into(),
            strike_price_base: 1,
            strike_price_quote: 1,
            expiration: 1_000,
        };
        engine
            .apply_operation(
                0,
                &Operation::OptionOrder { owner: "alice".into(), order_id: "o1".into(), strike: strike.clone(), options_issued: 10 },
            )
            .unwrap();
        assert_eq!(engine.ledger.balance("alice", "COIN").liquid, 0);

        engine.run_scheduled(1_000);

        assert_eq!(engine.ledger.balance("alice", "COIN").liquid, 1_000);
        assert!(engine.option_book.order("alice", "o1").is_none());
    }

    #[test]
    fn liquidity_pool_deposit_debits_both_sides_and_creates_pool() {
        let mut engine = engine_with_assets(&["COIN", "USD"]);
        engine.ledger.credit("alice", "COIN", Partition::Liquid, 1_000).unwrap();
        engine.ledger.credit("alice", "USD", Partition::Liquid, 1_000).unwrap();

        engine
            .apply_operation(
                0,
                &Operation::LiquidityPoolDeposit {
                    account: "alice".into(),
                    base_symbol: "COIN".into(),
                    quote_symbol: "USD".into(),
                    base_amount: 1_000,
                    quote_amount: 1_000,
                    swap_fee_bps: 30,
                },
            )
            .unwrap();

        assert_eq!(engine.ledger.balance("alice", "COIN").liquid, 0);
        assert_eq!(engine.ledger.balance("alice", "USD").liquid, 0);
        let pool = engine.liquidity_pools.get("COIN", "USD").unwrap();
        assert_eq!(pool.base_reserve, 1_000);
        assert_eq!(pool.quote_reserve, 1_000);
    }
}
