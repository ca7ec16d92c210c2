//! Fixed exchange rate pool.
//!
//! The pool quotes a constant `exchange_rate` (quote units per base unit):
//!
//! ```text
//! Forward (base -> quote):  out = (in - fee) * rate
//! Reverse (quote -> base):  out = (in - fee) / rate
//! fee = trunc(in * base_fee)
//! ```
//!
//! The reverse rate is always derived as `1 / rate` and never stored, so the
//! two directions cannot drift apart. Reverse quotes divide by `rate` directly
//! instead of multiplying by a rounded reciprocal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    apply_deposit, apply_trade, apply_withdrawal, ensure_active, ensure_fresh, proportional_exit,
    proportional_join, validate_pair, Direction, FlowLedger, LiquidityChange, PoolAsset, PoolId,
    PoolKind, PoolModel, Quote,
};
use crate::error::{EngineError, Result};
use crate::params::MAX_FEE_RATE;
use crate::types::amount::{div_rate, div_rate_ceil, mul_rate, mul_rate_ceil};
use crate::types::Coin;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedRatePool {
    pub id: PoolId,
    /// `[base, quote]`
    pub assets: [PoolAsset; 2],
    /// Quote units per base unit
    pub exchange_rate: Decimal,
    pub base_fee: Decimal,
    /// Input bounds, in the input denomination
    pub min_order_amount: u64,
    pub max_order_amount: u64,
    pub total_shares: u64,
    pub active: bool,
    pub volume: u128,
    pub flows: FlowLedger,
}

impl FixedRatePool {
    /// Create a pool.
    ///
    /// # Arguments
    ///
    /// * `base`, `quote` - initial deposits; one side may be empty
    /// * `exchange_rate` - quote units per base unit, strictly positive
    /// * `base_fee` - fee rate in `[0, 0.10]`
    /// * `min_order_amount`, `max_order_amount` - accepted input range
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PoolId,
        base: Coin,
        quote: Coin,
        exchange_rate: Decimal,
        base_fee: Decimal,
        min_order_amount: u64,
        max_order_amount: u64,
    ) -> Result<Self> {
        if exchange_rate <= Decimal::ZERO {
            return Err(EngineError::InvalidPool(format!(
                "exchange rate must be positive, got {exchange_rate}"
            )));
        }
        let amounts = [base.amount, quote.amount];
        let total_shares = share_value(amounts, exchange_rate)?;
        if total_shares == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let pool = Self {
            id,
            assets: [PoolAsset::new(base), PoolAsset::new(quote)],
            exchange_rate,
            base_fee,
            min_order_amount,
            max_order_amount,
            total_shares,
            active: true,
            volume: 0,
            flows: FlowLedger::seeded(amounts),
        };
        pool.validate()?;
        Ok(pool)
    }

    /// Base units per quote unit, `1 / exchange_rate`.
    pub fn reverse_rate(&self) -> Decimal {
        Decimal::ONE
            .checked_div(self.exchange_rate)
            .unwrap_or(Decimal::ZERO)
    }

    /// Hold back `amount` of one asset from trading and withdrawals.
    pub fn set_reserved(&mut self, direction_out: Direction, amount: u64) -> Result<()> {
        let asset = &mut self.assets[direction_out.output_index()];
        if amount > asset.amount {
            return Err(EngineError::InsufficientLiquidity {
                pool_id: self.id,
                available: asset.amount,
                requested: amount,
            });
        }
        asset.reserved = amount;
        Ok(())
    }

    fn fee_rate(&self, discount: Decimal) -> Decimal {
        let discount = discount.clamp(Decimal::ZERO, Decimal::ONE);
        self.base_fee - self.base_fee * discount
    }

    fn check_bounds(&self, amount_in: u64) -> Result<()> {
        if amount_in == 0 {
            return Err(EngineError::ZeroAmount);
        }
        if amount_in < self.min_order_amount {
            return Err(EngineError::OrderAmountTooLow {
                amount: amount_in,
                min: self.min_order_amount,
            });
        }
        if amount_in > self.max_order_amount {
            return Err(EngineError::OrderAmountTooHigh {
                amount: amount_in,
                max: self.max_order_amount,
            });
        }
        Ok(())
    }

    fn check_liquidity(&self, direction: Direction, amount_out: u64) -> Result<()> {
        let available = self.assets[direction.output_index()].available();
        if available < amount_out {
            return Err(EngineError::InsufficientLiquidity {
                pool_id: self.id,
                available,
                requested: amount_out,
            });
        }
        Ok(())
    }

    fn convert(&self, net_in: u64, direction: Direction) -> Result<u64> {
        let out = match direction {
            Direction::Forward => mul_rate(net_in, self.exchange_rate),
            Direction::Reverse => div_rate(net_in, self.exchange_rate),
        };
        out.ok_or(EngineError::Overflow)
    }
}

/// Pool value in base units: `base + quote / rate`.
fn share_value(amounts: [u64; 2], rate: Decimal) -> Result<u64> {
    let quote_in_base = div_rate(amounts[1], rate).ok_or(EngineError::Overflow)?;
    amounts[0]
        .checked_add(quote_in_base)
        .ok_or(EngineError::Overflow)
}

impl PoolModel for FixedRatePool {
    fn id(&self) -> PoolId {
        self.id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::FixedRate
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
        if self.exchange_rate <= Decimal::ZERO {
            return Err(EngineError::InvalidPool("exchange rate must be positive".to_string()));
        }
        if self.base_fee.is_sign_negative() || self.base_fee > MAX_FEE_RATE {
            return Err(EngineError::InvalidPool(format!(
                "base fee {} out of range",
                self.base_fee
            )));
        }
        if self.min_order_amount == 0 || self.min_order_amount > self.max_order_amount {
            return Err(EngineError::InvalidPool(format!(
                "invalid order bounds [{}, {}]",
                self.min_order_amount, self.max_order_amount
            )));
        }
        if self.assets.iter().any(|a| a.reserved > a.amount) {
            return Err(EngineError::InvalidPool("reserved exceeds balance".to_string()));
        }
        self.flows.check(self.id, &self.assets)
    }

    fn quote(&self, amount_in: u64, direction: Direction, discount: Decimal) -> Result<Quote> {
        ensure_active(self.id, self.active)?;
        self.check_bounds(amount_in)?;

        let fee = mul_rate(amount_in, self.fee_rate(discount)).ok_or(EngineError::Overflow)?;
        let amount_out = self.convert(amount_in - fee.min(amount_in), direction)?;
        if amount_out == 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.check_liquidity(direction, amount_out)?;

        Ok(Quote {
            pool_id: self.id,
            direction,
            amount_in,
            amount_out,
            fee,
            reserves_before: self.reserves(),
        })
    }

    fn quote_exact_out(
        &self,
        amount_out: u64,
        direction: Direction,
        discount: Decimal,
    ) -> Result<Quote> {
        ensure_active(self.id, self.active)?;
        if amount_out == 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.check_liquidity(direction, amount_out)?;

        let net_in = match direction {
            Direction::Forward => div_rate_ceil(amount_out, self.exchange_rate),
            Direction::Reverse => mul_rate_ceil(amount_out, self.exchange_rate),
        }
        .ok_or(EngineError::Overflow)?;
        let amount_in = div_rate_ceil(net_in, Decimal::ONE - self.fee_rate(discount))
            .ok_or(EngineError::Overflow)?;
        self.check_bounds(amount_in)?;

        Ok(Quote {
            pool_id: self.id,
            direction,
            amount_in,
            amount_out,
            fee: amount_in - net_in,
            reserves_before: self.reserves(),
        })
    }

    fn commit(&mut self, quote: &Quote) -> Result<()> {
        ensure_active(self.id, self.active)?;
        ensure_fresh(self.id, quote, self.reserves())?;
        self.check_liquidity(quote.direction, quote.amount_out)?;
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
            let shares = share_value(amounts, self.exchange_rate)?;
            if shares == 0 {
                return Err(EngineError::ZeroAmount);
            }
            LiquidityChange { amounts, shares }
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
        for (i, asset) in self.assets.iter().enumerate() {
            if asset.amount - change.amounts[i] < asset.reserved {
                return Err(EngineError::InsufficientLiquidity {
                    pool_id: self.id,
                    available: asset.available(),
                    requested: change.amounts[i],
                });
            }
        }
        apply_withdrawal(&mut self.assets, &mut self.flows, change.amounts);
        self.total_shares -= shares;
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_pool() -> FixedRatePool {
        FixedRatePool::new(
            1,
            Coin::new("uusd", 1_000_000),
            Coin::new("uinr", 100_000_000),
            dec!(100),
            dec!(0.003),
            1_000,
            10_000_000,
        )
        .unwrap()
    }

    #[test]
    fn test_forward_quote_rate_100() {
        let pool = make_pool();
        let quote = pool.quote(10_000, Direction::Forward, Decimal::ZERO).unwrap();
        assert_eq!(quote.fee, 30);
        assert_eq!(quote.amount_out, 997_000);
    }

    #[test]
    fn test_reverse_quote() {
        let pool = make_pool();
        let quote = pool.quote(1_000_000, Direction::Reverse, Decimal::ZERO).unwrap();
        // fee 3_000, (997_000) / 100
        assert_eq!(quote.fee, 3_000);
        assert_eq!(quote.amount_out, 9_970);
    }

    #[test]
    fn test_reverse_rate_is_exact_inverse() {
        let pool = make_pool();
        assert_eq!(pool.reverse_rate(), dec!(0.01));
        assert_eq!(pool.reverse_rate() * pool.exchange_rate, Decimal::ONE);

        let mut odd = make_pool();
        odd.exchange_rate = dec!(3);
        let product = odd.reverse_rate() * odd.exchange_rate;
        assert!((product - Decimal::ONE).abs() < dec!(0.0000000001));
    }

    #[test]
    fn test_bounds() {
        let pool = make_pool();
        assert!(matches!(
            pool.quote(999, Direction::Forward, Decimal::ZERO),
            Err(EngineError::OrderAmountTooLow { .. })
        ));
        assert!(matches!(
            pool.quote(10_000_001, Direction::Reverse, Decimal::ZERO),
            Err(EngineError::OrderAmountTooHigh { .. })
        ));
    }

    #[test]
    fn test_reserved_liquidity_is_not_tradable() {
        let mut pool = make_pool();
        pool.set_reserved(Direction::Forward, 99_500_000).unwrap();
        // 997_000 requested, only 500_000 available
        assert!(matches!(
            pool.quote(10_000, Direction::Forward, Decimal::ZERO),
            Err(EngineError::InsufficientLiquidity {
                available: 500_000,
                requested: 997_000,
                ..
            })
        ));
    }

    #[test]
    fn test_inactive() {
        let mut pool = make_pool();
        pool.set_active(false);
        assert_eq!(
            pool.quote(10_000, Direction::Forward, Decimal::ZERO),
            Err(EngineError::PoolInactive(1))
        );
    }

    #[test]
    fn test_exact_out_rounds_input_up() {
        let pool = make_pool();
        let quote = pool.quote_exact_out(997_000, Direction::Forward, Decimal::ZERO).unwrap();
        // net 9_970 grossed up by 0.997 = 10_000
        assert_eq!(quote.amount_in, 10_000);
        assert_eq!(quote.fee, 30);

        let quote = pool.quote_exact_out(997_001, Direction::Forward, Decimal::ZERO).unwrap();
        assert!(quote.amount_in > 10_000);
    }

    #[test]
    fn test_commit_and_conservation() {
        let mut pool = make_pool();
        let quote = pool.quote(10_000, Direction::Forward, Decimal::ZERO).unwrap();
        pool.commit(&quote).unwrap();
        assert_eq!(pool.reserves(), [1_010_000, 99_003_000]);
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_liquidity_round_trip() {
        let mut pool = make_pool();
        // 1_000_000 base + 100_000_000 / 100 = 2_000_000 shares
        assert_eq!(pool.total_shares, 2_000_000);
        let before = pool.reserves();
        let added = pool.add_liquidity([10_000, 1_000_000]).unwrap();
        assert_eq!(added.shares, 20_000);
        pool.remove_liquidity(added.shares).unwrap();
        assert_eq!(pool.reserves(), before);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let err = FixedRatePool::new(
            1,
            Coin::new("uusd", 1),
            Coin::new("uinr", 1),
            Decimal::ZERO,
            dec!(0.003),
            1,
            10,
        );
        assert!(matches!(err, Err(EngineError::InvalidPool(_))));
    }
}
