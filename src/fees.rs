//! Fee & distribution engine.
//!
//! ## Fee rate
//!
//! The base money order fee is adjusted for the order's [`FeeClass`]:
//!
//! | Class   | Rate                              |
//! |---------|-----------------------------------|
//! | Normal  | `base`                            |
//! | Express | `base + express_delivery_fee`     |
//! | Bulk    | `base * (1 - bulk_order_discount)`|
//!
//! Cultural discounts (festival, village, senior, cultural token) are summed,
//! capped at 50%, and applied once as a multiplicative reduction. They are
//! inert while `enable_cultural_features` is off.
//!
//! ## Distribution
//!
//! [`distribute_fees`] splits a collected fee into six [`FeeBucket`]s by the
//! configured shares. Each bucket is truncated; the remainder goes to the
//! validator bucket so the parts always sum to the whole.
//!
//! ```
//! use money_order_engine::fees::{distribute_fees, FeeBucket};
//! use money_order_engine::params::Params;
//!
//! let split = distribute_fees(&Params::default().fee_shares, 1_001);
//! assert_eq!(split.total(), 1_001);
//! assert_eq!(split.amount(FeeBucket::Platform), 250);
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::params::{FeeShares, Params, MAX_DISCOUNT};
use crate::types::amount::mul_rate;

// ============================================================================
// Fee classes
// ============================================================================

/// Pricing class of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeClass {
    #[default]
    Normal,
    Express,
    Bulk,
}

impl FeeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeClass::Normal => "normal",
            FeeClass::Express => "express",
            FeeClass::Bulk => "bulk",
        }
    }
}

/// Adjust a base fee rate for the order's class.
pub fn fee_for_order_type(params: &Params, base: Decimal, class: FeeClass) -> Decimal {
    match class {
        FeeClass::Normal => base,
        FeeClass::Express => base + params.express_delivery_fee,
        FeeClass::Bulk => base - base * params.bulk_order_discount,
    }
}

// ============================================================================
// Cultural discounts
// ============================================================================

/// Which cultural discounts an order qualifies for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscountContext {
    pub festival: bool,
    pub village_member: bool,
    pub senior_citizen: bool,
    pub cultural_token: bool,
}

/// Stacked cultural discount, capped at 50%.
///
/// Festival discounts also need `enable_festival_bonuses`, village discounts
/// need `enable_village_pools`.
pub fn cultural_discount(params: &Params, ctx: &DiscountContext) -> Decimal {
    let flags = &params.features;
    if !flags.enable_cultural_features {
        return Decimal::ZERO;
    }

    let rates = &params.discounts;
    let mut total = Decimal::ZERO;
    if ctx.festival && flags.enable_festival_bonuses {
        total += rates.festival;
    }
    if ctx.village_member && flags.enable_village_pools {
        total += rates.village;
    }
    if ctx.senior_citizen {
        total += rates.senior_citizen;
    }
    if ctx.cultural_token {
        total += rates.cultural_token;
    }
    total.min(MAX_DISCOUNT)
}

/// Effective money order fee rate after class adjustment and discounts.
pub fn effective_fee_rate(params: &Params, class: FeeClass, ctx: &DiscountContext) -> Decimal {
    let rate = fee_for_order_type(params, params.money_order_base_fee, class);
    let discounted = rate - rate * cultural_discount(params, ctx);
    discounted.max(Decimal::ZERO)
}

/// Money order fee for `amount`, truncated to base units.
pub fn money_order_fee(
    params: &Params,
    amount: u64,
    class: FeeClass,
    ctx: &DiscountContext,
) -> Result<u64> {
    mul_rate(amount, effective_fee_rate(params, class, ctx)).ok_or(EngineError::Overflow)
}

// ============================================================================
// Distribution
// ============================================================================

/// Stakeholder buckets receiving a share of every collected fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeeBucket {
    Validator,
    Platform,
    LiquidityProvider,
    Development,
    NgoDonation,
    FounderRoyalty,
}

impl FeeBucket {
    pub const ALL: [FeeBucket; 6] = [
        FeeBucket::Validator,
        FeeBucket::Platform,
        FeeBucket::LiquidityProvider,
        FeeBucket::Development,
        FeeBucket::NgoDonation,
        FeeBucket::FounderRoyalty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeBucket::Validator => "validator",
            FeeBucket::Platform => "platform",
            FeeBucket::LiquidityProvider => "liquidity_provider",
            FeeBucket::Development => "development",
            FeeBucket::NgoDonation => "ngo_donation",
            FeeBucket::FounderRoyalty => "founder_royalty",
        }
    }

    /// Module account holding this bucket's funds.
    pub fn module_account(&self) -> &'static str {
        match self {
            FeeBucket::Validator => "moneyorder_validator_pool",
            FeeBucket::Platform => "moneyorder_platform_pool",
            FeeBucket::LiquidityProvider => "moneyorder_lp_pool",
            FeeBucket::Development => "moneyorder_dev_pool",
            FeeBucket::NgoDonation => "moneyorder_ngo_pool",
            FeeBucket::FounderRoyalty => "moneyorder_founder_pool",
        }
    }

    fn index(&self) -> usize {
        match self {
            FeeBucket::Validator => 0,
            FeeBucket::Platform => 1,
            FeeBucket::LiquidityProvider => 2,
            FeeBucket::Development => 3,
            FeeBucket::NgoDonation => 4,
            FeeBucket::FounderRoyalty => 5,
        }
    }
}

/// Result of splitting one fee across the buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeDistribution {
    amounts: [u64; 6],
}

impl FeeDistribution {
    #[inline]
    pub fn amount(&self, bucket: FeeBucket) -> u64 {
        self.amounts[bucket.index()]
    }

    pub fn total(&self) -> u64 {
        self.amounts.iter().sum()
    }

    /// Non-zero `(bucket, amount)` pairs in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (FeeBucket, u64)> + '_ {
        FeeBucket::ALL
            .iter()
            .map(|b| (*b, self.amount(*b)))
            .filter(|(_, amount)| *amount > 0)
    }
}

/// Split `total_fee` by `shares`.
///
/// Shares were validated at load time; the truncation dust lands in the
/// validator bucket.
pub fn distribute_fees(shares: &FeeShares, total_fee: u64) -> FeeDistribution {
    let mut amounts = [0u64; 6];
    let mut distributed = 0u64;
    for (bucket, share) in shares.entries() {
        let part = mul_rate(total_fee, share).unwrap_or(0);
        amounts[bucket.index()] = part;
        distributed += part;
    }
    let dust = total_fee.saturating_sub(distributed);
    amounts[FeeBucket::Validator.index()] += dust;
    FeeDistribution { amounts }
}

// ============================================================================
// Unit Tests
// ============================================================================
