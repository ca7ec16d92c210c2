//! Module parameters.
//!
//! [`Params`] is loaded once (genesis or config file), validated, and then
//! treated as immutable. The only way to change it is
//! [`Engine::update_params`](crate::engine::Engine::update_params), which runs
//! [`Params::validate`] on the whole candidate record before it replaces the
//! current one. A record that fails validation never reaches state, and fee
//! shares that do not sum to exactly one are rejected rather than rescaled.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::fees::FeeBucket;
use crate::types::amount::is_fraction;

/// Upper bound for any fee rate (10%).
pub const MAX_FEE_RATE: Decimal = dec!(0.10);

/// Upper bound for any single or stacked discount (50%).
pub const MAX_DISCOUNT: Decimal = dec!(0.50);

// ============================================================================
// Params
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Default AMM swap fee
    pub trading_fee_rate: Decimal,
    /// Base fee rate charged on a money order
    pub money_order_base_fee: Decimal,
    /// Surcharge added for express delivery
    pub express_delivery_fee: Decimal,
    /// Fraction of the base fee waived for bulk items
    pub bulk_order_discount: Decimal,

    pub min_order_amount: u64,
    pub max_order_amount: u64,
    pub max_daily_user_limit: u64,
    /// Orders at or above this amount need a verified sender
    pub kyc_required_threshold: u64,

    pub fee_shares: FeeShares,
    pub discounts: CulturalDiscounts,
    pub features: FeatureFlags,
    pub cross_chain: CrossChainParams,
    pub bulk: BulkParams,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            trading_fee_rate: dec!(0.003),
            money_order_base_fee: dec!(0.001),
            express_delivery_fee: dec!(0.002),
            bulk_order_discount: dec!(0.20),
            min_order_amount: 10_000_000,
            max_order_amount: 50_000_000_000,
            max_daily_user_limit: 100_000_000_000,
            kyc_required_threshold: 10_000_000_000,
            fee_shares: FeeShares::default(),
            discounts: CulturalDiscounts::default(),
            features: FeatureFlags::default(),
            cross_chain: CrossChainParams::default(),
            bulk: BulkParams::default(),
        }
    }
}

impl Params {
    /// Check every invariant. Called at load time and on governance updates.
    pub fn validate(&self) -> Result<()> {
        check_fee_rate("trading_fee_rate", self.trading_fee_rate)?;
        check_fee_rate("money_order_base_fee", self.money_order_base_fee)?;
        check_fee_rate("express_delivery_fee", self.express_delivery_fee)?;
        if !is_fraction(self.bulk_order_discount) {
            return Err(invalid(format!(
                "bulk_order_discount must be within [0, 1], got {}",
                self.bulk_order_discount
            )));
        }

        if self.min_order_amount == 0 {
            return Err(invalid("min_order_amount must be positive".to_string()));
        }
        if self.min_order_amount > self.max_order_amount {
            return Err(invalid(format!(
                "min_order_amount {} exceeds max_order_amount {}",
                self.min_order_amount, self.max_order_amount
            )));
        }
        if self.max_daily_user_limit < self.min_order_amount {
            return Err(invalid(
                "max_daily_user_limit is below min_order_amount".to_string(),
            ));
        }

        self.fee_shares.validate()?;
        self.discounts.validate()?;
        self.cross_chain.validate()?;
        self.bulk.validate()
    }

    /// `true` when an order of `amount` must come from a KYC-verified sender.
    pub fn is_large_order(&self, amount: u64) -> bool {
        self.features.require_kyc_for_large_orders && amount >= self.kyc_required_threshold
    }

    /// Check `amount` against the global order bounds.
    pub fn check_order_bounds(&self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }
        if amount < self.min_order_amount {
            return Err(EngineError::OrderAmountTooLow {
                amount,
                min: self.min_order_amount,
            });
        }
        if amount > self.max_order_amount {
            return Err(EngineError::OrderAmountTooHigh {
                amount,
                max: self.max_order_amount,
            });
        }
        Ok(())
    }
}

fn invalid(msg: String) -> EngineError {
    EngineError::InvalidParams(msg)
}

fn check_fee_rate(name: &str, rate: Decimal) -> Result<()> {
    if rate.is_sign_negative() || rate > MAX_FEE_RATE {
        return Err(invalid(format!(
            "{name} must be within [0, {MAX_FEE_RATE}], got {rate}"
        )));
    }
    Ok(())
}

fn check_discount(name: &str, rate: Decimal) -> Result<()> {
    if rate.is_sign_negative() || rate > MAX_DISCOUNT {
        return Err(invalid(format!(
            "{name} must be within [0, {MAX_DISCOUNT}], got {rate}"
        )));
    }
    Ok(())
}

// ============================================================================
// Fee shares
// ============================================================================

/// How collected fees split across the six stakeholder buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeShares {
    pub validator: Decimal,
    pub platform: Decimal,
    pub liquidity_provider: Decimal,
    pub development: Decimal,
    pub ngo_donation: Decimal,
    pub founder_royalty: Decimal,
}

impl Default for FeeShares {
    fn default() -> Self {
        Self {
            validator: dec!(0.45),
            platform: dec!(0.25),
            liquidity_provider: dec!(0.20),
            development: dec!(0.05),
            ngo_donation: dec!(0.03),
            founder_royalty: dec!(0.02),
        }
    }
}

impl FeeShares {
    /// Shares in bucket order.
    pub fn entries(&self) -> [(FeeBucket, Decimal); 6] {
        [
            (FeeBucket::Validator, self.validator),
            (FeeBucket::Platform, self.platform),
            (FeeBucket::LiquidityProvider, self.liquidity_provider),
            (FeeBucket::Development, self.development),
            (FeeBucket::NgoDonation, self.ngo_donation),
            (FeeBucket::FounderRoyalty, self.founder_royalty),
        ]
    }

    pub fn total(&self) -> Decimal {
        self.entries().iter().map(|(_, share)| *share).sum()
    }

    /// Every share in `[0, 1]` and the sum exactly one.
    pub fn validate(&self) -> Result<()> {
        for (bucket, share) in self.entries() {
            if !is_fraction(share) {
                return Err(invalid(format!(
                    "{} share must be within [0, 1], got {share}",
                    bucket.as_str()
                )));
            }
        }
        let total = self.total();
        if total != Decimal::ONE {
            return Err(invalid(format!("fee shares must sum to 1, got {total}")));
        }
        Ok(())
    }
}

// ============================================================================
// Cultural discounts and feature flags
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CulturalDiscounts {
    pub festival: Decimal,
    pub village: Decimal,
    pub senior_citizen: Decimal,
    pub cultural_token: Decimal,
}

impl Default for CulturalDiscounts {
    fn default() -> Self {
        Self {
            festival: dec!(0.25),
            village: dec!(0.30),
            senior_citizen: dec!(0.15),
            cultural_token: dec!(0.10),
        }
    }
}

impl CulturalDiscounts {
    fn validate(&self) -> Result<()> {
        check_discount("festival discount", self.festival)?;
        check_discount("village discount", self.village)?;
        check_discount("senior citizen discount", self.senior_citizen)?;
        check_discount("cultural token discount", self.cultural_token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_cultural_features: bool,
    pub enable_festival_bonuses: bool,
    pub require_kyc_for_large_orders: bool,
    pub enable_village_pools: bool,
    pub enable_fixed_rate_pools: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_cultural_features: true,
            enable_festival_bonuses: true,
            require_kyc_for_large_orders: true,
            enable_village_pools: true,
            enable_fixed_rate_pools: true,
        }
    }
}

// ============================================================================
// Cross-chain and bulk
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossChainParams {
    /// Flat fee per transfer, in base units
    pub base_fee: u64,
    pub relayer_fee_rate: Decimal,
    pub protocol_fee_rate: Decimal,
    /// Applied when a transfer carries neither timeout height nor timestamp
    pub default_timeout_secs: u64,
    pub max_memo_len: usize,
}

impl Default for CrossChainParams {
    fn default() -> Self {
        Self {
            base_fee: 1_000,
            relayer_fee_rate: dec!(0.0005),
            protocol_fee_rate: dec!(0.0005),
            default_timeout_secs: 3_600,
            max_memo_len: 256,
        }
    }
}

impl CrossChainParams {
    fn validate(&self) -> Result<()> {
        check_fee_rate("relayer_fee_rate", self.relayer_fee_rate)?;
        check_fee_rate("protocol_fee_rate", self.protocol_fee_rate)?;
        if self.default_timeout_secs == 0 {
            return Err(invalid("default_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkParams {
    pub max_items: usize,
    pub default_batch_size: usize,
    pub default_max_retries: u32,
    pub default_retry_delay_secs: u64,
    pub max_memo_len: usize,
    /// Upper bounds on caller-supplied `BulkOrderSettings`
    pub max_batch_size: usize,
    pub max_retries: u32,
    pub max_retry_delay_secs: u64,
}

impl Default for BulkParams {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            default_batch_size: 100,
            default_max_retries: 3,
            default_retry_delay_secs: 60,
            max_memo_len: 256,
            max_batch_size: 1_000,
            max_retries: 10,
            max_retry_delay_secs: 86_400,
        }
    }
}

impl BulkParams {
    fn validate(&self) -> Result<()> {
        if self.max_items == 0 || self.default_batch_size == 0 {
            return Err(invalid(
                "bulk max_items and default_batch_size must be positive".to_string(),
            ));
        }
        if self.default_batch_size > self.max_batch_size
            || self.default_max_retries > self.max_retries
            || self.default_retry_delay_secs > self.max_retry_delay_secs
        {
            return Err(invalid(
                "bulk defaults must not exceed their configured maximums".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
