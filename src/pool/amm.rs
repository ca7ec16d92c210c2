//! Constant-product AMM pool.
//!
//! Pricing follows `x * y = k` over the two reserves:
//!
//! ```text
//! fee       = trunc(amount_in * fee_rate)
//! net_in    = amount_in - fee
//! amount_out = trunc(net_in * reserve_out / (reserve_in + net_in))
//! ```
//!
//! The whole `amount_in` (fee included) is added to the input reserve, so `k`
//! never decreases and the fee accrues to liquidity providers. Exact-out
//! quotes round the required input up; both roundings favor the pool.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    apply_deposit, apply_trade, apply_withdrawal, ensure_active, ensure_fresh, proportional_exit,
    proportional_join, validate_pair, Direction, FlowLedger, LiquidityChange, PoolAsset, PoolId,
    PoolKind, PoolModel, Quote,
};
use crate::error::{EngineError, Result};
use crate::params::MAX_FEE_RATE;
use crate::types::amount::{div_rate_ceil, isqrt, mul_div, mul_div_ceil, mul_rate};
use crate::types::{is_cultural_token, Coin};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmmPool {
    pub id: PoolId,
    pub assets: [PoolAsset; 2],
    pub swap_fee: Decimal,
    pub total_shares: u64,
    pub active: bool,
    pub volume: u128,
    pub flows: FlowLedger,
}

impl AmmPool {
    /// Create a pool seeded with `deposit`.
    ///
    /// The creator receives `isqrt(a0 * a1)` shares.
    ///
    /// # Errors
    ///
    /// * `InvalidPool` - identical denoms or a fee above `max_swap_fee`
    /// * `ZeroAmount` - either side empty
    pub fn new(id: PoolId, deposit: [Coin; 2], swap_fee: Decimal, max_swap_fee: Decimal) -> Result<Self> {
        if deposit.iter().any(Coin::is_zero) {
            return Err(EngineError::ZeroAmount);
        }
        if swap_fee.is_sign_negative() || swap_fee > max_swap_fee {
            return Err(EngineError::InvalidPool(format!(
                "swap fee {swap_fee} exceeds maximum {max_swap_fee}"
            )));
        }

        let [a, b] = deposit;
        let amounts = [a.amount, b.amount];
        let total_shares = isqrt(a.amount as u128 * b.amount as u128);
        let pool = Self {
            id,
            assets: [PoolAsset::new(a), PoolAsset::new(b)],
            swap_fee,
            total_shares,
            active: true,
            volume: 0,
            flows: FlowLedger::seeded(amounts),
        };
        pool.validate()?;
        Ok(pool)
    }

    /// `true` if either side is a cultural token (festival discount applies).
    pub fn is_cultural_pair(&self) -> bool {
        self.assets.iter().any(|a| is_cultural_token(&a.denom))
    }

    /// Constant-product invariant `k = r0 * r1`
    pub fn invariant(&self) -> u128 {
        self.assets[0].amount as u128 * self.assets[1].amount as u128
    }

    fn fee_rate(&self, discount: Decimal) -> Decimal {
        let discount = discount.clamp(Decimal::ZERO, Decimal::ONE);
        self.swap_fee - self.swap_fee * discount
    }
}

/// Exact-in constant-product pricing. Returns `(amount_out, fee)`.
pub(crate) fn constant_product_out(
    reserve_in: u64,
    reserve_out: u64,
    amount_in: u64,
    fee_rate: Decimal,
) -> Result<(u64, u64)> {
    if amount_in == 0 {
        return Err(EngineError::ZeroAmount);
    }
    let fee = mul_rate(amount_in, fee_rate).ok_or(EngineError::Overflow)?;
    let net_in = amount_in - fee.min(amount_in);
    let denominator = reserve_in.checked_add(net_in).ok_or(EngineError::Overflow)?;
    let amount_out = mul_div(net_in, reserve_out, denominator).ok_or(EngineError::Overflow)?;
    if amount_out == 0 {
        return Err(EngineError::ZeroAmount);
    }
    Ok((amount_out, fee))
}

/// Exact-out constant-product pricing. Returns `(amount_in, fee)`.
pub(crate) fn constant_product_in(
    pool_id: PoolId,
    reserve_in: u64,
    reserve_out: u64,
    amount_out: u64,
    fee_rate: Decimal,
) -> Result<(u64, u64)> {
    if amount_out == 0 {
        return Err(EngineError::ZeroAmount);
    }
    if amount_out >= reserve_out {
        return Err(EngineError::InsufficientLiquidity {
            pool_id,
            available: reserve_out,
            requested: amount_out,
        });
    }
    let net_in = mul_div_ceil(reserve_in, amount_out, reserve_out - amount_out)
        .ok_or(EngineError::Overflow)?;
    let amount_in = div_rate_ceil(net_in, Decimal::ONE - fee_rate).ok_or(EngineError::Overflow)?;
    Ok((amount_in, amount_in - net_in))
}

impl PoolModel for AmmPool {
    fn id(&self) -> PoolId {
        self.id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Amm
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
        if self.swap_fee.is_sign_negative() || self.swap_fee > MAX_FEE_RATE {
            return Err(EngineError::InvalidPool(format!(
                "swap fee {} out of range",
                self.swap_fee
            )));
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
        apply_trade(
            self.id,
            &mut self.assets,
            &mut self.flows,
            quote.direction,
            quote.amount_in,
            quote.amount_out,
        )?;
        self.volume += quote.amount_in as u128;
        Ok(())
    }

    fn add_liquidity(&mut self, amounts: [u64; 2]) -> Result<LiquidityChange> {
        ensure_active(self.id, self.active)?;
        let change = if self.total_shares == 0 {
            // drained pool: re-seed like a fresh pool
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
    use rust_decimal_macros::dec;

    fn make_pool() -> AmmPool {
        AmmPool::new(
            1,
            [Coin::new("unamo", 1_000_000), Coin::new("uinr", 4_000_000)],
            dec!(0.003),
            dec!(0.006),
        )
        .unwrap()
    }

    #[test]
    fn test_new_pool_initial_shares() {
        let pool = make_pool();
        assert_eq!(pool.total_shares, 2_000_000);
        assert!(pool.is_cultural_pair());
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_new_pool_rejects_high_fee_and_same_denom() {
        let err = AmmPool::new(
            1,
            [Coin::new("unamo", 1), Coin::new("uinr", 1)],
            dec!(0.01),
            dec!(0.006),
        );
        assert!(matches!(err, Err(EngineError::InvalidPool(_))));

        let err = AmmPool::new(
            1,
            [Coin::new("unamo", 1), Coin::new("unamo", 1)],
            dec!(0.003),
            dec!(0.006),
        );
        assert!(matches!(err, Err(EngineError::InvalidPool(_))));
    }

    #[test]
    fn test_quote_exact_in() {
        let pool = make_pool();
        let quote = pool.quote(10_000, Direction::Forward, Decimal::ZERO).unwrap();
        // fee 30, net 9_970, out = 9_970 * 4_000_000 / 1_009_970 = 39_486
        assert_eq!(quote.fee, 30);
        assert_eq!(quote.amount_out, 39_486);
        // quoting does not mutate
        assert_eq!(pool.reserves(), [1_000_000, 4_000_000]);
    }

    #[test]
    fn test_discount_lowers_fee() {
        let pool = make_pool();
        let quote = pool.quote(10_000, Direction::Forward, dec!(0.5)).unwrap();
        assert_eq!(quote.fee, 15);
    }

    #[test]
    fn test_commit_keeps_k_non_decreasing() {
        let mut pool = make_pool();
        let k_before = pool.invariant();
        let quote = pool.quote(50_000, Direction::Reverse, Decimal::ZERO).unwrap();
        pool.commit(&quote).unwrap();
        assert!(pool.invariant() >= k_before);
        assert_eq!(pool.volume, 50_000);
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_exact_out_covers_requested_output() {
        let mut pool = make_pool();
        let k_before = pool.invariant();
        let quote = pool.quote_exact_out(100_000, Direction::Forward, Decimal::ZERO).unwrap();
        assert_eq!(quote.amount_out, 100_000);

        // Selling the quoted input exact-in yields at least the requested output
        let check = pool.quote(quote.amount_in, Direction::Forward, Decimal::ZERO).unwrap();
        assert!(check.amount_out >= 100_000);

        pool.commit(&quote).unwrap();
        assert!(pool.invariant() >= k_before);
    }

    #[test]
    fn test_exact_out_cannot_drain_pool() {
        let pool = make_pool();
        assert!(matches!(
            pool.quote_exact_out(4_000_000, Direction::Forward, Decimal::ZERO),
            Err(EngineError::InsufficientLiquidity { .. })
        ));
    }

    #[test]
    fn test_stale_quote_rejected() {
        let mut pool = make_pool();
        let first = pool.quote(10_000, Direction::Forward, Decimal::ZERO).unwrap();
        let second = pool.quote(10_000, Direction::Forward, Decimal::ZERO).unwrap();
        pool.commit(&first).unwrap();
        assert_eq!(pool.commit(&second), Err(EngineError::StaleQuote(1)));
    }

    #[test]
    fn test_inactive_pool_blocks_everything() {
        let mut pool = make_pool();
        pool.set_active(false);
        assert_eq!(
            pool.quote(10_000, Direction::Forward, Decimal::ZERO),
            Err(EngineError::PoolInactive(1))
        );
        assert_eq!(pool.add_liquidity([10, 40]), Err(EngineError::PoolInactive(1)));
        assert_eq!(pool.remove_liquidity(1), Err(EngineError::PoolInactive(1)));
    }

    #[test]
    fn test_add_then_remove_liquidity_restores_reserves() {
        let mut pool = make_pool();
        let before = pool.reserves();
        let added = pool.add_liquidity([100_000, 400_000]).unwrap();
        assert_eq!(added.shares, 200_000);
        let removed = pool.remove_liquidity(added.shares).unwrap();
        assert_eq!(removed.amounts, added.amounts);
        assert_eq!(pool.reserves(), before);
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_remove_all_then_reseed() {
        let mut pool = make_pool();
        let total = pool.total_shares;
        pool.remove_liquidity(total).unwrap();
        assert_eq!(pool.reserves(), [0, 0]);

        let change = pool.add_liquidity([9, 16]).unwrap();
        assert_eq!(change.shares, 12);
        assert!(pool.validate().is_ok());
    }
}
