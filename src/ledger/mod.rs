//! The asset ledger: per-account balances per asset symbol, partitioned into
//! liquid / staked / savings / reward buckets, with credit/debit primitives
//! that enforce non-negativity and overflow checking at every mutation.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    error::{EngineError, EngineResult},
    math::safe_math::SafeMath,
};

pub type AssetSymbol = String;
pub type AccountId = String;

/// Side of a two-asset market. Bids buy the base asset; asks sell it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AssetType {
    Core,
    Stable,
    Equity,
    Credit,
    Liquidity,
    Option,
    Standard,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Asset {
    pub symbol: AssetSymbol,
    pub precision: u8,
    pub asset_type: AssetType,
    pub issuer: AccountId,
    pub supply: u64,
    pub burned: u64,
}

impl Asset {
    pub fn new(symbol: AssetSymbol, precision: u8, asset_type: AssetType, issuer: AccountId) -> EngineResult<Self> {
        crate::validate!(
            precision <= 12,
            EngineError::validation("asset precision must be in [0, 12]"),
            "precision={precision}"
        )?;
        Ok(Self {
            symbol,
            precision,
            asset_type,
            issuer,
            supply: 0,
            burned: 0,
        })
    }
}

/// An amount tagged with the asset symbol it is denominated in. Carrying the
/// symbol alongside the quantity lets every arithmetic helper assert that two
/// amounts being combined actually share a denomination before touching the
/// numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Amount {
    pub amount: u64,
    pub symbol_id: u32,
}

impl Amount {
    pub fn new(amount: u64, symbol_id: u32) -> Self {
        Self { amount, symbol_id }
    }
}

/// Per-(account, asset) balance, split into the four partitions the ledger
/// exposes. Every partition is independently non-negative; the sum across
/// accounts for a given asset equals `supply - burned`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Balance {
    pub liquid: u64,
    pub staked: u64,
    pub savings: u64,
    pub reward: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Partition {
    Liquid,
    Staked,
    Savings,
    Reward,
}

impl Balance {
    pub fn get(&self, partition: Partition) -> u64 {
        match partition {
            Partition::Liquid => self.liquid,
            Partition::Staked => self.staked,
            Partition::Savings => self.savings,
            Partition::Reward => self.reward,
        }
    }

    fn set(&mut self, partition: Partition, value: u64) {
        match partition {
            Partition::Liquid => self.liquid = value,
            Partition::Staked => self.staked = value,
            Partition::Savings => self.savings = value,
            Partition::Reward => self.reward = value,
        }
    }

    pub fn total(&self) -> EngineResult<u64> {
        self.liquid
            .safe_add(self.staked)?
            .safe_add(self.savings)?
            .safe_add(self.reward)
    }
}

/// Per-asset balances across every account holding it, keyed by account id so
/// iteration order (and therefore any derived hash or fold) is deterministic.
#[derive(Default, Clone)]
pub struct Ledger {
    assets: BTreeMap<AssetSymbol, Asset>,
    balances: BTreeMap<(AccountId, AssetSymbol), Balance>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_asset(&mut self, asset: Asset) -> EngineResult<()> {
        crate::validate!(
            !self.assets.contains_key(&asset.symbol),
            EngineError::DuplicateId {
                owner: asset.issuer.clone(),
                order_id: asset.symbol.clone(),
            }
        )?;
        self.assets.insert(asset.symbol.clone(), asset);
        Ok(())
    }

    pub fn asset(&self, symbol: &str) -> EngineResult<&Asset> {
        self.assets
            .get(symbol)
            .ok_or_else(|| EngineError::not_found(format!("asset {symbol}")))
    }

    pub fn balance(&self, account: &str, symbol: &str) -> Balance {
        self.balances
            .get(&(account.to_string(), symbol.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Credits `amount` into `partition` for `account`, minting into supply
    /// when `mint` is set (used only by issuance and interest-accrual paths).
    pub fn credit(&mut self, account: &str, symbol: &str, partition: Partition, amount: u64) -> EngineResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let key = (account.to_string(), symbol.to_string());
        let mut balance = self.balances.get(&key).copied().unwrap_or_default();
        let updated = balance.get(partition).safe_add(amount)?;
        balance.set(partition, updated);
        self.balances.insert(key, balance);
        Ok(())
    }

    pub fn debit(&mut self, account: &str, symbol: &str, partition: Partition, amount: u64) -> EngineResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let key = (account.to_string(), symbol.to_string());
        let mut balance = self.balances.get(&key).copied().unwrap_or_default();
        let have = balance.get(partition);
        crate::validate!(
            have >= amount,
            EngineError::InsufficientFunds {
                needed: amount as i128,
                have: have as i128,
            }
        )?;
        balance.set(partition, have - amount);
        self.balances.insert(key, balance);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: &str,
        to: &str,
        symbol: &str,
        partition: Partition,
        amount: u64,
    ) -> EngineResult<()> {
        self.debit(from, symbol, partition, amount)?;
        self.credit(to, symbol, partition, amount)
    }

    pub fn mint(&mut self, symbol: &str, amount: u64) -> EngineResult<()> {
        let asset = self
            .assets
            .get_mut(symbol)
            .ok_or_else(|| EngineError::not_found(format!("asset {symbol}")))?;
        asset.supply = asset.supply.safe_add(amount)?;
        Ok(())
    }

    pub fn burn(&mut self, symbol: &str, amount: u64) -> EngineResult<()> {
        let asset = self
            .assets
            .get_mut(symbol)
            .ok_or_else(|| EngineError::not_found(format!("asset {symbol}")))?;
        asset.burned = asset.burned.safe_add(amount)?;
        Ok(())
    }

    /// Sums every account's balance of `symbol` across all four partitions;
    /// used by the supply invariant check.
    pub fn total_outstanding(&self, symbol: &str) -> EngineResult<u64> {
        let mut total: u64 = 0;
        for ((_, sym), balance) in self.balances.iter() {
            if sym == symbol {
                total = total.safe_add(balance.total()?)?;
            }
        }
        Ok(total)
    }

    pub fn check_supply_invariant(&self, symbol: &str) -> EngineResult<()> {
        let asset = self.asset(symbol)?;
        let outstanding = self.total_outstanding(symbol)?;
        let expected = asset.supply.safe_sub(asset.burned)?;
        crate::validate!(
            outstanding == expected,
            EngineError::constraint(format!(
                "ledger supply invariant violated for {symbol}: outstanding={outstanding} expected={expected}"
            ))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Ledger {
        let mut ledger = Ledger::new();
        ledger
            .register_asset(Asset::new("USD".into(), 6, AssetType::Stable, "issuer".into()).unwrap())
            .unwrap();
        ledger
    }

    #[test]
    fn credit_then_debit_round_trips() {
        let mut ledger = setup();
        ledger.credit("alice", "USD", Partition::Liquid, 1_000).unwrap();
        assert_eq!(ledger.balance("alice", "USD").liquid, 1_000);
        ledger.debit("alice", "USD", Partition::Liquid, 400).unwrap();
        assert_eq!(ledger.balance("alice", "USD").liquid, 600);
    }

    #[test]
    fn debit_below_balance_is_rejected() {
        let mut ledger = setup();
        ledger.credit("alice", "USD", Partition::Liquid, 100).unwrap();
        let err = ledger.debit("alice", "USD", Partition::Liquid, 101).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[test]
    fn transfer_preserves_total_supply() {
        let mut ledger = setup();
        ledger.mint("USD", 1_000).unwrap();
        ledger.credit("alice", "USD", Partition::Liquid, 1_000).unwrap();
        ledger.transfer("alice", "bob", "USD", Partition::Liquid, 300).unwrap();
        assert_eq!(ledger.balance("alice", "USD").liquid, 700);
        assert_eq!(ledger.balance("bob", "USD").liquid, 300);
        ledger.check_supply_invariant("USD").unwrap();
    }
}
