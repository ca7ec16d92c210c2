//! Exchange pool abstraction.
//!
//! ## Variants
//!
//! [`ExchangePool`] is a closed enum over the three pricing models:
//!
//! - [`AmmPool`]: constant-product market maker (`x * y = k`)
//! - [`FixedRatePool`]: administrator-pegged exchange rate
//! - [`VillagePool`]: community pool with social fee splits and membership
//!
//! All three implement [`PoolModel`], so dispatch is an exhaustive `match`
//! instead of a string comparison on a pool "type".
//!
//! ## Quote, then commit
//!
//! Pricing never mutates. [`PoolModel::quote`] and
//! [`PoolModel::quote_exact_out`] return a [`Quote`]; the caller checks its
//! slippage bound and only then hands the quote to [`PoolModel::commit`].
//! `commit` refuses a quote whose recorded reserves no longer match the pool
//! (`StaleQuote`), so a rejected trade leaves reserves exactly as they were.
//!
//! ## Direction
//!
//! Every pool holds exactly two assets. [`Direction::Forward`] sells asset 0
//! for asset 1, [`Direction::Reverse`] sells asset 1 for asset 0.

mod amm;
mod fixed_rate;
mod village;

pub use amm::AmmPool;
pub use fixed_rate::FixedRatePool;
pub use village::{
    AchievementCategory, LocalValidator, MemberBenefits, MembershipType, VillageAchievement,
    VillageFeeSplit, VillageFunds, VillageMember, VillagePool, MAX_LOCAL_VALIDATORS,
    MAX_VILLAGE_MEMBERS, MIN_VILLAGE_LIQUIDITY,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};
use crate::types::amount::{mul_div, mul_div_ceil};
use crate::types::{Coin, PoolSnapshot};

pub type PoolId = u64;

// ============================================================================
// Shared value types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// asset 0 in, asset 1 out
    Forward,
    /// asset 1 in, asset 0 out
    Reverse,
}

impl Direction {
    #[inline]
    pub fn input_index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    #[inline]
    pub fn output_index(self) -> usize {
        1 - self.input_index()
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

/// One side of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAsset {
    pub denom: String,
    pub amount: u64,
    /// Liquidity that must stay in the pool
    pub reserved: u64,
    pub weight: Option<Decimal>,
}

impl PoolAsset {
    pub fn new(coin: Coin) -> Self {
        Self {
            denom: coin.denom,
            amount: coin.amount,
            reserved: 0,
            weight: None,
        }
    }

    /// Amount that may leave the pool.
    #[inline]
    pub fn available(&self) -> u64 {
        self.amount.saturating_sub(self.reserved)
    }
}

/// Priced but uncommitted trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub pool_id: PoolId,
    pub direction: Direction,
    pub amount_in: u64,
    pub amount_out: u64,
    /// Fee charged, in input denomination
    pub fee: u64,
    /// Reserves the quote was computed against
    pub reserves_before: [u64; 2],
}

/// Amounts moved and shares minted or burned by a liquidity operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityChange {
    pub amounts: [u64; 2],
    pub shares: u64,
}

/// Lifetime inflow and outflow per asset.
///
/// `amount == inflow - outflow` must hold for both assets at all times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLedger {
    pub inflow: [u128; 2],
    pub outflow: [u128; 2],
}

impl FlowLedger {
    pub fn seeded(amounts: [u64; 2]) -> Self {
        Self {
            inflow: [amounts[0] as u128, amounts[1] as u128],
            outflow: [0, 0],
        }
    }

    #[inline]
    pub fn record_in(&mut self, index: usize, amount: u64) {
        self.inflow[index] += amount as u128;
    }

    #[inline]
    pub fn record_out(&mut self, index: usize, amount: u64) {
        self.outflow[index] += amount as u128;
    }

    pub fn check(&self, pool_id: PoolId, assets: &[PoolAsset; 2]) -> Result<()> {
        for (i, asset) in assets.iter().enumerate() {
            let net = self.inflow[i].checked_sub(self.outflow[i]);
            if net != Some(asset.amount as u128) {
                return Err(EngineError::InvalidPool(format!(
                    "pool {pool_id} {} balance {} diverges from lifetime flows",
                    asset.denom, asset.amount
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// PoolKind
// ============================================================================

/// Variant tag, also the storage namespace of the pool record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    Amm,
    FixedRate,
    Village,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Amm => "amm",
            PoolKind::FixedRate => "fixed_rate",
            PoolKind::Village => "village",
        }
    }

    /// Storage key prefix
    pub fn prefix(&self) -> u8 {
        match self {
            PoolKind::Amm => 0x01,
            PoolKind::FixedRate => 0x02,
            PoolKind::Village => 0x03,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "amm" => Ok(PoolKind::Amm),
            "fixed_rate" | "fixed-rate" => Ok(PoolKind::FixedRate),
            "village" => Ok(PoolKind::Village),
            other => Err(EngineError::UnknownPoolType(other.to_string())),
        }
    }
}

// ============================================================================
// Capability trait
// ============================================================================

/// The capability contract every pool variant implements.
pub trait PoolModel {
    fn id(&self) -> PoolId;

    fn kind(&self) -> PoolKind;

    fn assets(&self) -> &[PoolAsset; 2];

    fn total_shares(&self) -> u64;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// Cumulative input volume
    fn volume(&self) -> u128;

    /// Check structural invariants, including balance conservation.
    fn validate(&self) -> Result<()>;

    /// Price an exact-in trade. `discount` reduces the pool's fee rate.
    fn quote(&self, amount_in: u64, direction: Direction, discount: Decimal) -> Result<Quote>;

    /// Price an exact-out trade; the input is rounded up.
    fn quote_exact_out(
        &self,
        amount_out: u64,
        direction: Direction,
        discount: Decimal,
    ) -> Result<Quote>;

    /// Apply a previously computed quote.
    fn commit(&mut self, quote: &Quote) -> Result<()>;

    /// Deposit up to `amounts`; returns what was taken and the shares minted.
    fn add_liquidity(&mut self, amounts: [u64; 2]) -> Result<LiquidityChange>;

    /// Burn `shares` and return the proportional reserves.
    fn remove_liquidity(&mut self, shares: u64) -> Result<LiquidityChange>;

    fn reserves(&self) -> [u64; 2] {
        let assets = self.assets();
        [assets[0].amount, assets[1].amount]
    }

    /// Direction that sells `denom_in`.
    fn direction_for(&self, denom_in: &str) -> Result<Direction> {
        let assets = self.assets();
        if assets[0].denom == denom_in {
            Ok(Direction::Forward)
        } else if assets[1].denom == denom_in {
            Ok(Direction::Reverse)
        } else {
            Err(EngineError::DenomNotInPool {
                pool_id: self.id(),
                denom: denom_in.to_string(),
            })
        }
    }
}

// ============================================================================
// Shared pool mechanics
// ============================================================================

pub(crate) fn ensure_active(pool_id: PoolId, active: bool) -> Result<()> {
    if active {
        Ok(())
    } else {
        Err(EngineError::PoolInactive(pool_id))
    }
}

/// Verify a quote still matches the pool before applying it.
pub(crate) fn ensure_fresh(pool_id: PoolId, quote: &Quote, reserves: [u64; 2]) -> Result<()> {
    if quote.pool_id != pool_id || quote.reserves_before != reserves {
        return Err(EngineError::StaleQuote(pool_id));
    }
    Ok(())
}

/// Proportional deposit against existing reserves.
///
/// Shares minted are the minimum over the funded assets of
/// `amount_i * total / reserve_i`; only the proportional amounts are taken,
/// rounded up so the pool never gives away value. Assets with an empty
/// reserve are neither required nor taken.
pub(crate) fn proportional_join(
    reserves: [u64; 2],
    total_shares: u64,
    amounts: [u64; 2],
) -> Result<LiquidityChange> {
    let mut shares: Option<u64> = None;
    for i in 0..2 {
        if reserves[i] == 0 {
            continue;
        }
        let candidate = mul_div(amounts[i], total_shares, reserves[i]).ok_or(EngineError::Overflow)?;
        shares = Some(shares.map_or(candidate, |s| s.min(candidate)));
    }

    let shares = shares.unwrap_or(0);
    if shares == 0 {
        return Err(EngineError::ZeroAmount);
    }

    let mut taken = [0u64; 2];
    for i in 0..2 {
        taken[i] = mul_div_ceil(shares, reserves[i], total_shares).ok_or(EngineError::Overflow)?;
    }
    Ok(LiquidityChange {
        amounts: taken,
        shares,
    })
}

/// Proportional withdrawal, rounded down.
pub(crate) fn proportional_exit(
    reserves: [u64; 2],
    total_shares: u64,
    shares: u64,
) -> Result<LiquidityChange> {
    if shares == 0 {
        return Err(EngineError::ZeroAmount);
    }
    if shares > total_shares {
        return Err(EngineError::InsufficientShares {
            available: total_shares,
            requested: shares,
        });
    }
    let mut amounts = [0u64; 2];
    for i in 0..2 {
        amounts[i] = mul_div(reserves[i], shares, total_shares).ok_or(EngineError::Overflow)?;
    }
    Ok(LiquidityChange { amounts, shares })
}

/// Move reserves for a committed trade and record the flows.
pub(crate) fn apply_trade(
    pool_id: PoolId,
    assets: &mut [PoolAsset; 2],
    flows: &mut FlowLedger,
    direction: Direction,
    reserve_in: u64,
    amount_out: u64,
) -> Result<()> {
    let (i, o) = (direction.input_index(), direction.output_index());
    let new_in = assets[i]
        .amount
        .checked_add(reserve_in)
        .ok_or(EngineError::Overflow)?;
    let new_out = assets[o]
        .amount
        .checked_sub(amount_out)
        .ok_or(EngineError::InsufficientLiquidity {
            pool_id,
            available: assets[o].amount,
            requested: amount_out,
        })?;
    assets[i].amount = new_in;
    assets[o].amount = new_out;
    flows.record_in(i, reserve_in);
    flows.record_out(o, amount_out);
    Ok(())
}

pub(crate) fn apply_deposit(
    assets: &mut [PoolAsset; 2],
    flows: &mut FlowLedger,
    amounts: [u64; 2],
) -> Result<()> {
    for i in 0..2 {
        assets[i].amount = assets[i]
            .amount
            .checked_add(amounts[i])
            .ok_or(EngineError::Overflow)?;
        flows.record_in(i, amounts[i]);
    }
    Ok(())
}

pub(crate) fn apply_withdrawal(
    assets: &mut [PoolAsset; 2],
    flows: &mut FlowLedger,
    amounts: [u64; 2],
) {
    for i in 0..2 {
        // amounts come from proportional_exit and never exceed the reserve
        assets[i].amount = assets[i].amount.saturating_sub(amounts[i]);
        flows.record_out(i, amounts[i]);
    }
}

pub(crate) fn validate_pair(assets: &[PoolAsset; 2]) -> Result<()> {
    if assets[0].denom == assets[1].denom {
        return Err(EngineError::InvalidPool(format!(
            "pool assets must be distinct, got {} twice",
            assets[0].denom
        )));
    }
    Ok(())
}

// ============================================================================
// ExchangePool
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExchangePool {
    Amm(AmmPool),
    FixedRate(FixedRatePool),
    Village(VillagePool),
}

macro_rules! dispatch {
    ($self:expr, $pool:ident => $body:expr) => {
        match $self {
            ExchangePool::Amm($pool) => $body,
            ExchangePool::FixedRate($pool) => $body,
            ExchangePool::Village($pool) => $body,
        }
    };
}

impl PoolModel for ExchangePool {
    fn id(&self) -> PoolId {
        dispatch!(self, p => p.id())
    }

    fn kind(&self) -> PoolKind {
        dispatch!(self, p => p.kind())
    }

    fn assets(&self) -> &[PoolAsset; 2] {
        dispatch!(self, p => p.assets())
    }

    fn total_shares(&self) -> u64 {
        dispatch!(self, p => p.total_shares())
    }

    fn is_active(&self) -> bool {
        dispatch!(self, p => p.is_active())
    }

    fn set_active(&mut self, active: bool) {
        dispatch!(self, p => p.set_active(active))
    }

    fn volume(&self) -> u128 {
        dispatch!(self, p => p.volume())
    }

    fn validate(&self) -> Result<()> {
        dispatch!(self, p => p.validate())
    }

    fn quote(&self, amount_in: u64, direction: Direction, discount: Decimal) -> Result<Quote> {
        dispatch!(self, p => p.quote(amount_in, direction, discount))
    }

    fn quote_exact_out(
        &self,
        amount_out: u64,
        direction: Direction,
        discount: Decimal,
    ) -> Result<Quote> {
        dispatch!(self, p => p.quote_exact_out(amount_out, direction, discount))
    }

    fn commit(&mut self, quote: &Quote) -> Result<()> {
        dispatch!(self, p => p.commit(quote))
    }

    fn add_liquidity(&mut self, amounts: [u64; 2]) -> Result<LiquidityChange> {
        dispatch!(self, p => p.add_liquidity(amounts))
    }

    fn remove_liquidity(&mut self, shares: u64) -> Result<LiquidityChange> {
        dispatch!(self, p => p.remove_liquidity(shares))
    }
}

impl ExchangePool {
    /// Module account holding this pool's funds.
    pub fn custody_account(&self) -> String {
        custody_account(self.id())
    }

    pub fn as_village(&self) -> Option<&VillagePool> {
        match self {
            ExchangePool::Village(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_village_mut(&mut self) -> Option<&mut VillagePool> {
        match self {
            ExchangePool::Village(v) => Some(v),
            _ => None,
        }
    }

    /// Fixed-size digest of the pool used as a state root leaf.
    pub fn snapshot(&self) -> Result<PoolSnapshot> {
        let detail = serde_json::to_vec(self)
            .map_err(|e| EngineError::InvalidPool(format!("pool {} encoding: {e}", self.id())))?;
        let mut detail_hash = [0u8; 32];
        detail_hash.copy_from_slice(&Sha256::digest(&detail));

        let reserves = self.reserves();
        Ok(PoolSnapshot {
            pool_id: self.id(),
            kind: self.kind().prefix(),
            reserve_0: reserves[0],
            reserve_1: reserves[1],
            total_shares: self.total_shares(),
            active: self.is_active(),
            detail_hash,
        })
    }
}

pub fn custody_account(pool_id: PoolId) -> String {
    format!("moneyorder_pool_{pool_id}")
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_indices() {
        assert_eq!(Direction::Forward.input_index(), 0);
        assert_eq!(Direction::Forward.output_index(), 1);
        assert_eq!(Direction::Reverse.input_index(), 1);
        assert_eq!(Direction::Reverse.opposite(), Direction::Forward);
    }

    #[test]
    fn test_pool_kind_parse() {
        assert_eq!(PoolKind::parse("amm").unwrap(), PoolKind::Amm);
        assert_eq!(PoolKind::parse("fixed-rate").unwrap(), PoolKind::FixedRate);
        assert_eq!(
            PoolKind::parse("weighted"),
            Err(EngineError::UnknownPoolType("weighted".to_string()))
        );
    }

    #[test]
    fn test_proportional_join_takes_only_ratio() {
        // pool 1000:2000 with 100 shares; offering 100:100 mints 5 shares
        let change = proportional_join([1_000, 2_000], 100, [100, 100]).unwrap();
        assert_eq!(change.shares, 5);
        assert_eq!(change.amounts, [50, 100]);
    }

    #[test]
    fn test_proportional_join_one_sided_reserve() {
        let change = proportional_join([0, 5_000], 50, [10, 1_000]).unwrap();
        assert_eq!(change.shares, 10);
        assert_eq!(change.amounts, [0, 1_000]);
    }

    #[test]
    fn test_proportional_join_too_small() {
        assert_eq!(
            proportional_join([1_000_000, 1_000_000], 10, [1, 1]),
            Err(EngineError::ZeroAmount)
        );
    }

    #[test]
    fn test_proportional_exit() {
        let change = proportional_exit([1_000, 3_001], 100, 50).unwrap();
        assert_eq!(change.amounts, [500, 1_500]);
        assert!(matches!(
            proportional_exit([1, 1], 10, 11),
            Err(EngineError::InsufficientShares { .. })
        ));
    }

    #[test]
    fn test_flow_ledger_check() {
        let mut assets = [
            PoolAsset::new(Coin::new("unamo", 100)),
            PoolAsset::new(Coin::new("uinr", 50)),
        ];
        let mut flows = FlowLedger::seeded([100, 50]);
        assert!(flows.check(1, &assets).is_ok());

        apply_trade(1, &mut assets, &mut flows, Direction::Forward, 10, 5).unwrap();
        assert_eq!(assets[0].amount, 110);
        assert_eq!(assets[1].amount, 45);
        assert!(flows.check(1, &assets).is_ok());

        assets[1].amount += 1;
        assert!(flows.check(1, &assets).is_err());
    }

    #[test]
    fn test_custody_account_name() {
        assert_eq!(custody_account(7), "moneyorder_pool_7");
    }
}
