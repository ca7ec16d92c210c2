//! Community-governed village pool.
//!
//! ## Pricing
//!
//! Trades are priced on the constant-product curve (see [`super::AmmPool`])
//! with a low base trading fee. Members trade at a discount.
//!
//! ## Fee split
//!
//! Each collected fee is split before any of it reaches the reserves:
//!
//! ```text
//! community       = trunc(fee * community_fee)
//! education       = trunc(fee * education_fee)
//! infrastructure  = trunc(fee * infrastructure_fee)
//! lp              = fee - community - education - infrastructure
//! member rewards  = trunc(lp * profit_sharing), pro-rata by contribution
//! reserves       += lp - member rewards
//! ```
//!
//! Funds and pending rewards sit in the pool's custody account but outside the
//! tradable reserves. Pro-rata rounding dust goes to the community fund.
//!
//! ## Trust
//!
//! A 0-100 trust score moves with recorded achievements. A verified pool with
//! trust >= 70 and at least 50 members qualifies for government support.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::amm::{constant_product_in, constant_product_out};
use super::{
    apply_deposit, apply_trade, apply_withdrawal, ensure_active, ensure_fresh, proportional_exit,
    proportional_join, validate_pair, Direction, FlowLedger, LiquidityChange, PoolAsset, PoolId,
    PoolKind, PoolModel, Quote,
};
use crate::error::{EngineError, Result};
use crate::types::amount::{is_fraction, isqrt, mul_div, mul_rate};
use crate::types::Coin;

/// Maximum local validators per village
pub const MAX_LOCAL_VALIDATORS: usize = 5;

pub const MAX_VILLAGE_MEMBERS: usize = 1_000;

/// Minimum primary-asset deposit to found a village pool
pub const MIN_VILLAGE_LIQUIDITY: u64 = 1_000_000_000;

const MAX_VILLAGE_BASE_FEE: Decimal = dec!(0.01);
const INITIAL_TRUST_SCORE: u8 = 50;
const MAX_TRUST_SCORE: u8 = 100;
const GOVERNMENT_MIN_TRUST: u8 = 70;
const GOVERNMENT_MIN_MEMBERS: usize = 50;
const POSTAL_CODE_LEN: usize = 6;

// ============================================================================
// Configuration records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillageFeeSplit {
    pub base_trading_fee: Decimal,
    /// Fractions of each collected fee
    pub community_fee: Decimal,
    pub education_fee: Decimal,
    pub infrastructure_fee: Decimal,
}

impl Default for VillageFeeSplit {
    fn default() -> Self {
        Self {
            base_trading_fee: dec!(0.002),
            community_fee: dec!(0.02),
            education_fee: dec!(0.01),
            infrastructure_fee: dec!(0.01),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBenefits {
    pub fee_discount: Decimal,
    /// Fraction of the LP fee remainder paid to members
    pub profit_sharing: Decimal,
}

impl Default for MemberBenefits {
    fn default() -> Self {
        Self {
            fee_discount: dec!(0.30),
            profit_sharing: dec!(0.50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalValidator {
    pub address: String,
    pub name: String,
    pub added_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipType {
    Founder,
    Regular,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillageMember {
    pub address: String,
    pub membership: MembershipType,
    pub joined_at: u64,
    /// LP shares held in this pool
    pub contribution: u64,
    pub pending_rewards: BTreeMap<String, u64>,
    pub total_earnings: u64,
    pub total_trades: u64,
}

impl VillageMember {
    fn new(address: &str, membership: MembershipType, joined_at: u64) -> Self {
        Self {
            address: address.to_string(),
            membership,
            joined_at,
            contribution: 0,
            pending_rewards: BTreeMap::new(),
            total_earnings: 0,
            total_trades: 0,
        }
    }

    pub fn has_pending_rewards(&self) -> bool {
        self.pending_rewards.values().any(|v| *v > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AchievementCategory {
    Trading,
    Education,
    Community,
}

impl AchievementCategory {
    pub fn trust_points(&self) -> u8 {
        match self {
            AchievementCategory::Trading => 5,
            AchievementCategory::Education => 3,
            AchievementCategory::Community => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementCategory::Trading => "trading",
            AchievementCategory::Education => "education",
            AchievementCategory::Community => "community",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillageAchievement {
    pub category: AchievementCategory,
    pub description: String,
    pub achieved_at: u64,
}

/// Per-denom community balances held outside the reserves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillageFunds {
    pub community: BTreeMap<String, u64>,
    pub education: BTreeMap<String, u64>,
    pub infrastructure: BTreeMap<String, u64>,
}

fn credit(map: &mut BTreeMap<String, u64>, denom: &str, amount: u64) {
    if amount > 0 {
        *map.entry(denom.to_string()).or_insert(0) += amount;
    }
}

// ============================================================================
// VillagePool
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VillagePool {
    pub id: PoolId,
    pub village_name: String,
    pub postal_code: String,
    pub panchayat_head: String,
    pub local_validators: Vec<LocalValidator>,
    pub required_signatures: u32,

    /// `[primary, local currency]`
    pub assets: [PoolAsset; 2],
    pub total_shares: u64,
    pub fee_split: VillageFeeSplit,
    pub benefits: MemberBenefits,
    pub members: BTreeMap<String, VillageMember>,
    pub funds: VillageFunds,

    pub trust_score: u8,
    pub verified: bool,
    pub achievements: Vec<VillageAchievement>,

    pub active: bool,
    pub volume: u128,
    pub flows: FlowLedger,
    pub created_at: u64,
}

impl VillagePool {
    /// Found a village pool. The founder becomes the first member and owns
    /// the initial shares.
    pub fn new(
        id: PoolId,
        village_name: &str,
        postal_code: &str,
        founder: &str,
        deposit: [Coin; 2],
        created_at: u64,
    ) -> Result<Self> {
        if deposit[0].amount < MIN_VILLAGE_LIQUIDITY {
            return Err(EngineError::InsufficientLiquidity {
                pool_id: id,
                available: deposit[0].amount,
                requested: MIN_VILLAGE_LIQUIDITY,
            });
        }
        if deposit[1].is_zero() {
            return Err(EngineError::ZeroAmount);
        }

        let [primary, local] = deposit;
        let amounts = [primary.amount, local.amount];
        let total_shares = isqrt(primary.amount as u128 * local.amount as u128);

        let mut founder_member = VillageMember::new(founder, MembershipType::Founder, created_at);
        founder_member.contribution = total_shares;
        let mut members = BTreeMap::new();
        members.insert(founder.to_string(), founder_member);

        let pool = Self {
            id,
            village_name: village_name.to_string(),
            postal_code: postal_code.to_string(),
            panchayat_head: founder.to_string(),
            local_validators: Vec::new(),
            required_signatures: 2,
            assets: [PoolAsset::new(primary), PoolAsset::new(local)],
            total_shares,
            fee_split: VillageFeeSplit::default(),
            benefits: MemberBenefits::default(),
            members,
            funds: VillageFunds::default(),
            trust_score: INITIAL_TRUST_SCORE,
            verified: false,
            achievements: Vec::new(),
            active: true,
            volume: 0,
            flows: FlowLedger::seeded(amounts),
            created_at,
        };
        pool.validate()?;
        Ok(pool)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    #[inline]
    pub fn is_member(&self, address: &str) -> bool {
        self.members.contains_key(address)
    }

    #[inline]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Fee discount for `address`: the member discount, or zero.
    pub fn member_discount(&self, address: &str) -> Decimal {
        if self.is_member(address) {
            self.benefits.fee_discount
        } else {
            Decimal::ZERO
        }
    }

    /// Admit a new member. Joining counts as community activity (+1 trust).
    pub fn join(&mut self, address: &str, joined_at: u64) -> Result<()> {
        ensure_active(self.id, self.active)?;
        if self.is_member(address) {
            return Err(EngineError::AlreadyVillageMember {
                pool_id: self.id,
                member: address.to_string(),
            });
        }
        if self.members.len() >= MAX_VILLAGE_MEMBERS {
            return Err(EngineError::MemberLimitReached(self.id));
        }
        self.members.insert(
            address.to_string(),
            VillageMember::new(address, MembershipType::Regular, joined_at),
        );
        self.adjust_trust(1);
        Ok(())
    }

    fn member_mut(&mut self, address: &str) -> Result<&mut VillageMember> {
        let pool_id = self.id;
        self.members
            .get_mut(address)
            .ok_or_else(|| EngineError::NotVillageMember {
                pool_id,
                member: address.to_string(),
            })
    }

    pub fn credit_member_shares(&mut self, address: &str, shares: u64) -> Result<()> {
        let member = self.member_mut(address)?;
        member.contribution += shares;
        Ok(())
    }

    pub fn debit_member_shares(&mut self, address: &str, shares: u64) -> Result<()> {
        let member = self.member_mut(address)?;
        if member.contribution < shares {
            return Err(EngineError::InsufficientShares {
                available: member.contribution,
                requested: shares,
            });
        }
        member.contribution -= shares;
        Ok(())
    }

    pub fn record_member_trade(&mut self, address: &str) {
        if let Some(member) = self.members.get_mut(address) {
            member.total_trades += 1;
        }
    }

    /// Take all pending rewards of `address`.
    ///
    /// # Errors
    ///
    /// * `PoolInactive`
    /// * `NotVillageMember`
    /// * `NoPendingRewards` - nothing accrued since the last claim
    pub fn claim_rewards(&mut self, address: &str) -> Result<Vec<Coin>> {
        ensure_active(self.id, self.active)?;
        let member = self.member_mut(address)?;
        if !member.has_pending_rewards() {
            return Err(EngineError::NoPendingRewards);
        }
        let rewards: Vec<Coin> = std::mem::take(&mut member.pending_rewards)
            .into_iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|(denom, amount)| Coin::new(&denom, amount))
            .collect();
        member.total_earnings += rewards.iter().map(|c| c.amount).sum::<u64>();
        Ok(rewards)
    }

    pub fn add_local_validator(&mut self, address: &str, name: &str, added_at: u64) -> Result<()> {
        if self.local_validators.len() >= MAX_LOCAL_VALIDATORS {
            return Err(EngineError::InvalidPool(format!(
                "village pool {} already has {MAX_LOCAL_VALIDATORS} local validators",
                self.id
            )));
        }
        if self.local_validators.iter().any(|v| v.address == address) {
            return Err(EngineError::InvalidPool(format!(
                "{address} is already a local validator"
            )));
        }
        self.local_validators.push(LocalValidator {
            address: address.to_string(),
            name: name.to_string(),
            added_at,
        });
        Ok(())
    }

    // ========================================================================
    // Trust
    // ========================================================================

    fn adjust_trust(&mut self, points: u8) {
        self.trust_score = self.trust_score.saturating_add(points).min(MAX_TRUST_SCORE);
    }

    pub fn record_achievement(
        &mut self,
        category: AchievementCategory,
        description: &str,
        achieved_at: u64,
    ) {
        self.adjust_trust(category.trust_points());
        self.achievements.push(VillageAchievement {
            category,
            description: description.to_string(),
            achieved_at,
        });
    }

    /// Government verification, also a community achievement.
    pub fn verify(&mut self, verified_at: u64) {
        self.verified = true;
        self.record_achievement(
            AchievementCategory::Community,
            "government verification",
            verified_at,
        );
    }

    pub fn is_eligible_for_government_support(&self) -> bool {
        self.active
            && self.verified
            && self.trust_score >= GOVERNMENT_MIN_TRUST
            && self.members.len() >= GOVERNMENT_MIN_MEMBERS
    }

    // ========================================================================
    // Fees
    // ========================================================================

    fn fee_rate(&self, discount: Decimal) -> Decimal {
        let discount = discount.clamp(Decimal::ZERO, Decimal::ONE);
        let base = self.fee_split.base_trading_fee;
        base - base * discount
    }

    /// Split `fee` (in `denom`) into funds and member rewards. Returns the part
    /// that stays in the reserves.
    fn split_fee(&mut self, denom: &str, fee: u64) -> u64 {
        let split = &self.fee_split;
        let community = mul_rate(fee, split.community_fee).unwrap_or(0);
        let education = mul_rate(fee, split.education_fee).unwrap_or(0);
        let infrastructure = mul_rate(fee, split.infrastructure_fee).unwrap_or(0);
        let lp = fee.saturating_sub(community + education + infrastructure);
        let member_part = mul_rate(lp, self.benefits.profit_sharing).unwrap_or(0);

        let total_contribution: u64 = self.members.values().map(|m| m.contribution).sum();
        let mut paid = 0u64;
        if total_contribution > 0 {
            for member in self.members.values_mut() {
                let reward =
                    mul_div(member_part, member.contribution, total_contribution).unwrap_or(0);
                credit(&mut member.pending_rewards, denom, reward);
                paid += reward;
            }
        }

        credit(&mut self.funds.community, denom, community + (member_part - paid));
        credit(&mut self.funds.education, denom, education);
        credit(&mut self.funds.infrastructure, denom, infrastructure);
        lp - member_part
    }
}

impl PoolModel for VillagePool {
    fn id(&self) -> PoolId {
        self.id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Village
    }

    fn assets(&self) -> &[PoolAsset; 2] {
        &self.assets
    }

    fn total_shares(&self) -> u64 {
        self.total_shares
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn volume(&self) -> u128 {
        self.volume
    }

    fn validate(&self) -> Result<()> {
        validate_pair(&self.assets)?;
        if self.village_name.trim().is_empty() {
            return Err(EngineError::InvalidPool("village name cannot be empty".to_string()));
        }
        if self.postal_code.len() != POSTAL_CODE_LEN
            || !self.postal_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(EngineError::InvalidPool(format!(
                "postal code must be {POSTAL_CODE_LEN} digits, got {:?}",
                self.postal_code
            )));
        }
        if self.panchayat_head.is_empty() {
            return Err(EngineError::InvalidPool("panchayat head required".to_string()));
        }
        if self.required_signatures == 0 {
            return Err(EngineError::InvalidPool(
                "required signatures must be positive".to_string(),
            ));
        }
        let split = &self.fee_split;
        if split.base_trading_fee.is_sign_negative() || split.base_trading_fee > MAX_VILLAGE_BASE_FEE {
            return Err(EngineError::InvalidPool(format!(
                "village base fee {} exceeds {MAX_VILLAGE_BASE_FEE}",
                split.base_trading_fee
            )));
        }
        let split_total = split.community_fee + split.education_fee + split.infrastructure_fee;
        if !is_fraction(split_total) || !is_fraction(self.benefits.profit_sharing) {
            return Err(EngineError::InvalidPool("fee split exceeds the whole fee".to_string()));
        }
        if self.local_validators.len() > MAX_LOCAL_VALIDATORS {
            return Err(EngineError::InvalidPool("too many local validators".to_string()));
        }
        if self.members.len() > MAX_VILLAGE_MEMBERS {
            return Err(EngineError::MemberLimitReached(self.id));
        }
        self.flows.check(self.id, &self.assets)
    }

    fn quote(&self, amount_in: u64, direction: Direction, discount: Decimal) -> Result<Quote> {
        ensure_active(self.id, self.active)?;
        let reserves = self.reserves();
        let (i, o) = (direction.input_index(), direction.output_index());
        let (amount_out, fee) =
            constant_product_out(reserves[i], reserves[o], amount_in, self.fee_rate(discount))?;
        Ok(Quote {
            pool_id: self.id,
            direction,
            amount_in,
            amount_out,
            fee,
            reserves_before: reserves,
        })
    }

    fn quote_exact_out(
        &self,
        amount_out: u64,
        direction: Direction,
        discount: Decimal,
    ) -> Result<Quote> {
        ensure_active(self.id, self.active)?;
        let reserves = self.reserves();
        let (i, o) = (direction.input_index(), direction.output_index());
        let (amount_in, fee) = constant_product_in(
            self.id,
            reserves[i],
            reserves[o],
            amount_out,
            self.fee_rate(discount),
        )?;
        Ok(Quote {
            pool_id: self.id,
            direction,
            amount_in,
            amount_out,
            fee,
            reserves_before: reserves,
        })
    }

    fn commit(&mut self, quote: &Quote) -> Result<()> {
        ensure_active(self.id, self.active)?;
        ensure_fresh(self.id, quote, self.reserves())?;

        let denom = self.assets[quote.direction.input_index()].denom.clone();
        let net_in = quote.amount_in - quote.fee;
        let retained = self.split_fee(&denom, quote.fee);
        apply_trade(
            self.id,
            &mut self.assets,
            &mut self.flows,
            quote.direction,
            net_in + retained,
            quote.amount_out,
        )?;
        self.volume += quote.amount_in as u128;
        Ok(())
    }

    fn add_liquidity(&mut self, amounts: [u64; 2]) -> Result<LiquidityChange> {
        ensure_active(self.id, self.active)?;
        let change = if self.total_shares == 0 {
            if amounts.contains(&0) {
                return Err(EngineError::ZeroAmount);
            }
            LiquidityChange {
                amounts,
                shares: isqrt(amounts[0] as u128 * amounts[1] as u128),
            }
        } else {
            proportional_join(self.reserves(), self.total_shares, amounts)?
        };
        apply_deposit(&mut self.assets, &mut self.flows, change.amounts)?;
        self.total_shares += change.shares;
        Ok(change)
    }

    fn remove_liquidity(&mut self, shares: u64) -> Result<LiquidityChange> {
        ensure_active(self.id, self.active)?;
        let change = proportional_exit(self.reserves(), self.total_shares, shares)?;
        apply_withdrawal(&mut self.assets, &mut self.flows, change.amounts);
        self.total_shares -= shares;
        Ok(change)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pool() -> VillagePool {
        VillagePool::new(
            1,
            "Rampur",
            "110001",
            "founder",
            [
                Coin::new("unamo", 4_000_000_000),
                Coin::new("uinr", 4_000_000_000),
            ],
            1_000,
        )
        .unwrap()
    }

    #[test]
    fn test_founder_is_first_member() {
        let pool = make_pool();
        assert_eq!(pool.member_count(), 1);
        let founder = &pool.members["founder"];
        assert_eq!(founder.membership, MembershipType::Founder);
        assert_eq!(founder.contribution, pool.total_shares);
        assert_eq!(pool.trust_score, 50);
    }

    #[test]
    fn test_min_liquidity_and_postal_code() {
        let low = VillagePool::new(
            1,
            "Rampur",
            "110001",
            "founder",
            [Coin::new("unamo", 999_999_999), Coin::new("uinr", 1)],
            0,
        );
        assert!(matches!(low, Err(EngineError::InsufficientLiquidity { .. })));

        let bad_code = VillagePool::new(
            1,
            "Rampur",
            "1100",
            "founder",
            [Coin::new("unamo", 1_000_000_000), Coin::new("uinr", 1)],
            0,
        );
        assert!(matches!(bad_code, Err(EngineError::InvalidPool(_))));
    }

    #[test]
    fn test_join_and_duplicate() {
        let mut pool = make_pool();
        pool.join("alice", 2_000).unwrap();
        assert_eq!(pool.trust_score, 51);
        assert_eq!(pool.member_discount("alice"), dec!(0.30));
        assert_eq!(pool.member_discount("bob"), Decimal::ZERO);
        assert!(matches!(
            pool.join("alice", 2_001),
            Err(EngineError::AlreadyVillageMember { .. })
        ));
    }

    #[test]
    fn test_trust_is_clamped() {
        let mut pool = make_pool();
        for _ in 0..20 {
            pool.record_achievement(AchievementCategory::Trading, "volume", 0);
        }
        assert_eq!(pool.trust_score, 100);
    }

    #[test]
    fn test_government_eligibility() {
        let mut pool = make_pool();
        for i in 0..49 {
            pool.join(&format!("member{i}"), 0).unwrap();
        }
        // 50 members, trust 99, but not verified
        assert!(!pool.is_eligible_for_government_support());
        pool.verify(10);
        assert!(pool.verified);
        assert_eq!(pool.trust_score, 100);
        assert!(pool.is_eligible_for_government_support());
    }

    #[test]
    fn test_fee_split_on_commit() {
        let mut pool = make_pool();
        pool.join("alice", 0).unwrap();
        let quote = pool.quote(1_000_000, Direction::Forward, Decimal::ZERO).unwrap();
        // 0.2% fee
        assert_eq!(quote.fee, 2_000);
        pool.commit(&quote).unwrap();

        // community 40, education 20, infra 20, lp 1_920, members 960
        assert_eq!(pool.funds.education["unamo"], 20);
        assert_eq!(pool.funds.infrastructure["unamo"], 20);
        // alice has no contribution, founder takes the whole member part
        assert_eq!(pool.members["founder"].pending_rewards["unamo"], 960);
        assert!(pool.members["alice"].pending_rewards.is_empty());
        assert_eq!(pool.funds.community["unamo"], 40);
        assert_eq!(pool.reserves()[0], 4_000_000_000 + 998_000 + 960);
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_member_discount_reduces_fee() {
        let pool = make_pool();
        let quote = pool
            .quote(1_000_000, Direction::Forward, pool.member_discount("founder"))
            .unwrap();
        assert_eq!(quote.fee, 1_400);
    }

    #[test]
    fn test_claim_rewards() {
        let mut pool = make_pool();
        assert_eq!(pool.claim_rewards("founder"), Err(EngineError::NoPendingRewards));

        let quote = pool.quote(1_000_000, Direction::Reverse, Decimal::ZERO).unwrap();
        pool.commit(&quote).unwrap();
        let rewards = pool.claim_rewards("founder").unwrap();
        assert_eq!(rewards, vec![Coin::new("uinr", 960)]);
        assert_eq!(pool.members["founder"].total_earnings, 960);
        assert_eq!(pool.claim_rewards("founder"), Err(EngineError::NoPendingRewards));
    }

    #[test]
    fn test_local_validator_limit() {
        let mut pool = make_pool();
        for i in 0..MAX_LOCAL_VALIDATORS {
            pool.add_local_validator(&format!("val{i}"), "postmaster", 0).unwrap();
        }
        assert!(pool.add_local_validator("val9", "schoolmaster", 0).is_err());
    }

    #[test]
    fn test_member_shares() {
        let mut pool = make_pool();
        pool.join("alice", 0).unwrap();
        let change = pool.add_liquidity([40_000_000, 40_000_000]).unwrap();
        pool.credit_member_shares("alice", change.shares).unwrap();
        assert_eq!(pool.members["alice"].contribution, change.shares);
        assert!(pool.debit_member_shares("alice", change.shares + 1).is_err());
        assert!(pool.credit_member_shares("bob", 1).is_err());
    }
}
