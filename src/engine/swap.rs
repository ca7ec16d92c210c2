//! Pool lifecycle, liquidity and swap execution.
//!
//! Every mutating operation works on a clone of the target pool. The clone is
//! committed and validated first, then the ledger moves value, and only after
//! both succeed does the clone replace the stored pool. A failure at any step
//! leaves reserves, shares and balances exactly as they were.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Engine;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventKind};
use crate::pool::{
    custody_account, AchievementCategory, AmmPool, ExchangePool, FixedRatePool,
    LiquidityChange, PoolId, PoolModel, Quote, VillagePool,
};
use crate::types::{validate_denom, Coin};

// ============================================================================
// Requests and results
// ============================================================================

/// Exact-in swap: sell all of `token_in`, receive at least `token_out_min`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub trader: String,
    pub pool_id: PoolId,
    pub token_in: Coin,
    pub token_out_min: u64,
}

/// Exact-out swap: receive exactly `token_out`, pay at most `token_in_max`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactOutRequest {
    pub trader: String,
    pub pool_id: PoolId,
    pub denom_in: String,
    pub token_out: Coin,
    pub token_in_max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResult {
    pub pool_id: PoolId,
    pub token_in: Coin,
    pub token_out: Coin,
    /// Charged in the input denomination
    pub fee: Coin,
    pub reserves_before: [u64; 2],
    pub reserves_after: [u64; 2],
}

/// Pricing terms of a fixed-rate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedRateTerms {
    /// Quote units per base unit
    pub exchange_rate: Decimal,
    pub base_fee: Decimal,
    pub min_order_amount: u64,
    pub max_order_amount: u64,
}

impl Engine {
    // ========================================================================
    // Pool creation
    // ========================================================================

    /// Create a constant-product pool. `swap_fee` defaults to
    /// `trading_fee_rate` and may not exceed twice that.
    pub fn create_amm_pool(
        &mut self,
        creator: &str,
        deposit: [Coin; 2],
        swap_fee: Option<Decimal>,
    ) -> Result<PoolId> {
        self.validate_account(creator)?;
        validate_coins(&deposit)?;
        let swap_fee = swap_fee.unwrap_or(self.params.trading_fee_rate);
        let max_fee = self.params.trading_fee_rate * Decimal::TWO;
        let pool = AmmPool::new(self.next_pool_id, deposit.clone(), swap_fee, max_fee)?;
        self.install_pool(creator, ExchangePool::Amm(pool), &deposit)
    }

    /// Create a pool pegged at `terms.exchange_rate`. One side may be empty.
    pub fn create_fixed_rate_pool(
        &mut self,
        creator: &str,
        base: Coin,
        quote: Coin,
        terms: FixedRateTerms,
    ) -> Result<PoolId> {
        if !self.params.features.enable_fixed_rate_pools {
            return Err(EngineError::FeatureDisabled("fixed rate pools"));
        }
        self.validate_account(creator)?;
        let deposit = [base, quote];
        validate_coins(&deposit)?;
        let [base, quote] = deposit.clone();
        let pool = FixedRatePool::new(
            self.next_pool_id,
            base,
            quote,
            terms.exchange_rate,
            terms.base_fee,
            terms.min_order_amount,
            terms.max_order_amount,
        )?;
        self.install_pool(creator, ExchangePool::FixedRate(pool), &deposit)
    }

    /// Found a village pool. One pool per postal code; the founder becomes
    /// panchayat head and first member.
    pub fn create_village_pool(
        &mut self,
        founder: &str,
        village_name: &str,
        postal_code: &str,
        deposit: [Coin; 2],
    ) -> Result<PoolId> {
        if !self.params.features.enable_village_pools {
            return Err(EngineError::FeatureDisabled("village pools"));
        }
        self.validate_account(founder)?;
        validate_coins(&deposit)?;
        if self.villages_by_postal_code.contains_key(postal_code) {
            return Err(EngineError::VillagePoolExists(postal_code.to_string()));
        }
        let pool = VillagePool::new(
            self.next_pool_id,
            village_name,
            postal_code,
            founder,
            deposit.clone(),
            self.block.time,
        )?;
        let pool_id = self.install_pool(founder, ExchangePool::Village(pool), &deposit)?;
        self.villages_by_postal_code
            .insert(postal_code.to_string(), pool_id);
        Ok(pool_id)
    }

    /// Fund custody, store the pool and credit the creator's shares.
    fn install_pool(&mut self, creator: &str, pool: ExchangePool, deposit: &[Coin; 2]) -> Result<PoolId> {
        for coin in deposit.iter().filter(|c| !c.is_zero()) {
            self.ensure_balance(creator, &coin.denom, coin.amount)?;
        }
        let pool_id = pool.id();
        let custody = custody_account(pool_id);
        self.move_in(creator, &custody, deposit)?;

        let shares = pool.total_shares();
        let kind = pool.kind();
        self.pools.insert(pool_id, pool);
        self.next_pool_id += 1;
        self.lp_shares.insert((pool_id, creator.to_string()), shares);

        self.emit(
            Event::new(EventKind::PoolCreated, self.block.height)
                .attr("pool_id", pool_id)
                .attr("kind", kind.as_str())
                .attr("creator", creator)
                .attr("asset_0", &deposit[0])
                .attr("asset_1", &deposit[1])
                .attr("shares", shares),
        );
        info!(pool_id, kind = kind.as_str(), shares, "pool created");
        Ok(pool_id)
    }

    // ========================================================================
    // Liquidity
    // ========================================================================

    /// Deposit up to `amounts`; only the proportional part is taken.
    pub fn add_liquidity(
        &mut self,
        provider: &str,
        pool_id: PoolId,
        amounts: [u64; 2],
        min_shares: u64,
    ) -> Result<LiquidityChange> {
        self.validate_account(provider)?;
        let mut next = self.pool_or_err(pool_id)?.clone();
        if let Some(village) = next.as_village() {
            if !village.is_member(provider) {
                return Err(EngineError::NotVillageMember {
                    pool_id,
                    member: provider.to_string(),
                });
            }
        }

        let change = next.add_liquidity(amounts)?;
        if change.shares < min_shares {
            return Err(EngineError::SlippageExceeded {
                bound: min_shares,
                quoted: change.shares,
            });
        }
        if let Some(village) = next.as_village_mut() {
            village.credit_member_shares(provider, change.shares)?;
        }
        next.validate()?;

        let coins = pool_coins(&next, change.amounts);
        for coin in coins.iter().filter(|c| !c.is_zero()) {
            self.ensure_balance(provider, &coin.denom, coin.amount)?;
        }
        self.move_in(provider, &custody_account(pool_id), &coins)?;

        self.pools.insert(pool_id, next);
        *self
            .lp_shares
            .entry((pool_id, provider.to_string()))
            .or_insert(0) += change.shares;

        self.emit(
            Event::new(EventKind::LiquidityAdded, self.block.height)
                .attr("pool_id", pool_id)
                .attr("provider", provider)
                .attr("amount_0", &coins[0])
                .attr("amount_1", &coins[1])
                .attr("shares", change.shares),
        );
        debug!(pool_id, provider, shares = change.shares, "liquidity added");
        Ok(change)
    }

    /// Burn `shares` for the proportional reserves.
    pub fn remove_liquidity(
        &mut self,
        provider: &str,
        pool_id: PoolId,
        shares: u64,
        min_amounts: [u64; 2],
    ) -> Result<LiquidityChange> {
        let held = self.lp_shares(pool_id, provider);
        if held < shares {
            return Err(EngineError::InsufficientShares {
                available: held,
                requested: shares,
            });
        }
        let mut next = self.pool_or_err(pool_id)?.clone();
        let change = next.remove_liquidity(shares)?;
        for i in 0..2 {
            if change.amounts[i] < min_amounts[i] {
                return Err(EngineError::SlippageExceeded {
                    bound: min_amounts[i],
                    quoted: change.amounts[i],
                });
            }
        }
        if let Some(village) = next.as_village_mut() {
            village.debit_member_shares(provider, shares)?;
        }
        next.validate()?;

        let coins = pool_coins(&next, change.amounts);
        self.move_out(&custody_account(pool_id), provider, &coins)?;

        self.pools.insert(pool_id, next);
        let key = (pool_id, provider.to_string());
        match held - shares {
            0 => {
                self.lp_shares.remove(&key);
            }
            rest => {
                self.lp_shares.insert(key, rest);
            }
        }

        self.emit(
            Event::new(EventKind::LiquidityRemoved, self.block.height)
                .attr("pool_id", pool_id)
                .attr("provider", provider)
                .attr("amount_0", &coins[0])
                .attr("amount_1", &coins[1])
                .attr("shares", shares),
        );
        debug!(pool_id, provider, shares, "liquidity removed");
        Ok(change)
    }

    // ========================================================================
    // Swaps
    // ========================================================================

    /// Sell `token_in` for at least `token_out_min` of the other asset.
    ///
    /// # Errors
    ///
    /// `SlippageExceeded` when the quote falls below the bound. Nothing moves.
    pub fn swap_exact_in(&mut self, request: SwapRequest) -> Result<SwapResult> {
        self.validate_account(&request.trader)?;
        if request.token_in.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        let pool = self.pool_or_err(request.pool_id)?;
        let direction = pool.direction_for(&request.token_in.denom)?;
        let discount = self.swap_discount(pool, &request.trader);
        let quote = pool.quote(request.token_in.amount, direction, discount)?;
        if quote.amount_out < request.token_out_min {
            debug!(
                pool_id = request.pool_id,
                bound = request.token_out_min,
                quoted = quote.amount_out,
                "swap rejected by slippage bound"
            );
            return Err(EngineError::SlippageExceeded {
                bound: request.token_out_min,
                quoted: quote.amount_out,
            });
        }
        self.execute_swap(&request.trader, quote)
    }

    /// Buy exactly `token_out`, paying at most `token_in_max` of `denom_in`.
    pub fn swap_exact_out(&mut self, request: ExactOutRequest) -> Result<SwapResult> {
        self.validate_account(&request.trader)?;
        if request.token_out.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        let pool = self.pool_or_err(request.pool_id)?;
        let direction = pool.direction_for(&request.denom_in)?;
        let out_denom = &pool.assets()[direction.output_index()].denom;
        if *out_denom != request.token_out.denom {
            return Err(EngineError::DenomNotInPool {
                pool_id: request.pool_id,
                denom: request.token_out.denom.clone(),
            });
        }
        let discount = self.swap_discount(pool, &request.trader);
        let quote = pool.quote_exact_out(request.token_out.amount, direction, discount)?;
        if quote.amount_in > request.token_in_max {
            return Err(EngineError::SlippageExceeded {
                bound: request.token_in_max,
                quoted: quote.amount_in,
            });
        }
        self.execute_swap(&request.trader, quote)
    }

    fn execute_swap(&mut self, trader: &str, quote: Quote) -> Result<SwapResult> {
        let pool_id = quote.pool_id;
        let mut next = self.pool_or_err(pool_id)?.clone();
        next.commit(&quote)?;
        if let Some(village) = next.as_village_mut() {
            village.record_member_trade(trader);
        }
        next.validate()?;

        let assets = next.assets();
        let token_in = Coin::new(
            assets[quote.direction.input_index()].denom.clone(),
            quote.amount_in,
        );
        let token_out = Coin::new(
            assets[quote.direction.output_index()].denom.clone(),
            quote.amount_out,
        );
        let fee = Coin::new(token_in.denom.clone(), quote.fee);

        self.ensure_balance(trader, &token_in.denom, token_in.amount)?;
        let custody = custody_account(pool_id);
        self.ledger.transfer_to_module(trader, &custody, &token_in)?;
        if let Err(err) = self.ledger.transfer_from_module(&custody, trader, &token_out) {
            self.undo_transfer_in(&custody, trader, &token_in);
            return Err(err);
        }

        let reserves_after = next.reserves();
        self.pools.insert(pool_id, next);
        self.stats.swaps_executed += 1;

        let result = SwapResult {
            pool_id,
            token_in,
            token_out,
            fee,
            reserves_before: quote.reserves_before,
            reserves_after,
        };
        self.emit(
            Event::new(EventKind::Swap, self.block.height)
                .attr("pool_id", pool_id)
                .attr("trader", trader)
                .attr("token_in", &result.token_in)
                .attr("token_out", &result.token_out)
                .attr("fee", &result.fee)
                .attr(
                    "reserves_before",
                    format!("{},{}", result.reserves_before[0], result.reserves_before[1]),
                )
                .attr(
                    "reserves_after",
                    format!("{},{}", reserves_after[0], reserves_after[1]),
                ),
        );
        debug!(
            pool_id,
            trader,
            token_in = %result.token_in,
            token_out = %result.token_out,
            "swap executed"
        );
        Ok(result)
    }

    /// Fee discount a trader gets on `pool`.
    fn swap_discount(&self, pool: &ExchangePool, trader: &str) -> Decimal {
        let flags = &self.params.features;
        match pool {
            ExchangePool::Amm(amm)
                if self.festival_active
                    && amm.is_cultural_pair()
                    && flags.enable_cultural_features
                    && flags.enable_festival_bonuses =>
            {
                self.params.discounts.festival
            }
            ExchangePool::Village(village) => village.member_discount(trader),
            _ => Decimal::ZERO,
        }
    }

    // ========================================================================
    // Village operations
    // ========================================================================

    pub fn join_village_pool(&mut self, member: &str, pool_id: PoolId) -> Result<()> {
        self.validate_account(member)?;
        let now = self.block.time;
        let village = self.village_mut(pool_id)?;
        village.join(member, now)?;
        let members = village.member_count();
        self.emit(
            Event::new(EventKind::VillageMemberJoined, self.block.height)
                .attr("pool_id", pool_id)
                .attr("member", member)
                .attr("members", members),
        );
        info!(pool_id, member, members, "village member joined");
        Ok(())
    }

    /// Pay out the member's pending rewards from pool custody.
    pub fn claim_village_rewards(&mut self, member: &str, pool_id: PoolId) -> Result<Vec<Coin>> {
        let mut next = self.pool_or_err(pool_id)?.clone();
        let rewards = match next.as_village_mut() {
            Some(village) => village.claim_rewards(member)?,
            None => return Err(not_a_village(pool_id)),
        };
        self.move_out(&custody_account(pool_id), member, &rewards)?;
        self.pools.insert(pool_id, next);

        let total: u64 = rewards.iter().map(|c| c.amount).sum();
        self.emit(
            Event::new(EventKind::RewardsClaimed, self.block.height)
                .attr("pool_id", pool_id)
                .attr("member", member)
                .attr("total", total),
        );
        Ok(rewards)
    }

    pub fn verify_village_pool(&mut self, authority: &str, pool_id: PoolId) -> Result<()> {
        self.require_governance(authority)?;
        let now = self.block.time;
        let village = self.village_mut(pool_id)?;
        village.verify(now);
        let trust = village.trust_score;
        self.emit(
            Event::new(EventKind::VillageVerified, self.block.height)
                .attr("pool_id", pool_id)
                .attr("trust_score", trust),
        );
        info!(pool_id, trust, "village pool verified");
        Ok(())
    }

    pub fn record_village_achievement(
        &mut self,
        authority: &str,
        pool_id: PoolId,
        category: AchievementCategory,
        description: &str,
    ) -> Result<u8> {
        self.require_governance(authority)?;
        let now = self.block.time;
        let village = self.village_mut(pool_id)?;
        village.record_achievement(category, description, now);
        let trust = village.trust_score;
        self.emit(
            Event::new(EventKind::VillageAchievement, self.block.height)
                .attr("pool_id", pool_id)
                .attr("category", category.as_str())
                .attr("trust_score", trust),
        );
        Ok(trust)
    }

    /// Only the panchayat head may appoint local validators.
    pub fn add_local_validator(
        &mut self,
        head: &str,
        pool_id: PoolId,
        validator: &str,
        name: &str,
    ) -> Result<()> {
        self.validate_account(validator)?;
        let now = self.block.time;
        let village = self.village_mut(pool_id)?;
        if village.panchayat_head != head {
            return Err(EngineError::Unauthorized(format!(
                "{head} is not the panchayat head of pool {pool_id}"
            )));
        }
        village.add_local_validator(validator, name, now)
    }

    // ========================================================================
    // Governance
    // ========================================================================

    pub fn set_pool_active(&mut self, authority: &str, pool_id: PoolId, active: bool) -> Result<()> {
        self.require_governance(authority)?;
        let pool = self
            .pools
            .get_mut(&pool_id)
            .ok_or(EngineError::PoolNotFound(pool_id))?;
        pool.set_active(active);
        self.emit(
            Event::new(EventKind::PoolStatusChanged, self.block.height)
                .attr("pool_id", pool_id)
                .attr("active", active),
        );
        info!(pool_id, active, "pool status changed");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn pool(&self, pool_id: PoolId) -> Option<&ExchangePool> {
        self.pools.get(&pool_id)
    }

    pub fn pools(&self) -> impl Iterator<Item = &ExchangePool> {
        self.pools.values()
    }

    pub fn lp_shares(&self, pool_id: PoolId, owner: &str) -> u64 {
        self.lp_shares
            .get(&(pool_id, owner.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn village_by_postal_code(&self, postal_code: &str) -> Option<&VillagePool> {
        self.villages_by_postal_code
            .get(postal_code)
            .and_then(|id| self.pools.get(id))
            .and_then(ExchangePool::as_village)
    }

    /// `true` if `address` belongs to any village pool.
    pub fn is_village_member(&self, address: &str) -> bool {
        self.pools
            .values()
            .filter_map(ExchangePool::as_village)
            .any(|v| v.is_member(address))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn pool_or_err(&self, pool_id: PoolId) -> Result<&ExchangePool> {
        self.pools
            .get(&pool_id)
            .ok_or(EngineError::PoolNotFound(pool_id))
    }

    fn village_mut(&mut self, pool_id: PoolId) -> Result<&mut VillagePool> {
        self.pools
            .get_mut(&pool_id)
            .ok_or(EngineError::PoolNotFound(pool_id))?
            .as_village_mut()
            .ok_or_else(|| not_a_village(pool_id))
    }

    /// Move `coins` from `owner` into `module`, reversing on partial failure.
    fn move_in(&self, owner: &str, module: &str, coins: &[Coin]) -> Result<()> {
        let mut moved: Vec<&Coin> = Vec::with_capacity(coins.len());
        for coin in coins.iter().filter(|c| !c.is_zero()) {
            if let Err(err) = self.ledger.transfer_to_module(owner, module, coin) {
                for done in moved {
                    self.undo_transfer_in(module, owner, done);
                }
                return Err(err);
            }
            moved.push(coin);
        }
        Ok(())
    }

    /// Move `coins` from `module` to `owner`, reversing on partial failure.
    fn move_out(&self, module: &str, owner: &str, coins: &[Coin]) -> Result<()> {
        let mut moved: Vec<&Coin> = Vec::with_capacity(coins.len());
        for coin in coins.iter().filter(|c| !c.is_zero()) {
            if let Err(err) = self.ledger.transfer_from_module(module, owner, coin) {
                for done in moved {
                    if let Err(undo) = self.ledger.transfer_to_module(owner, module, done) {
                        warn!(module, owner, coin = %done, error = %undo, "reversal failed");
                    }
                }
                return Err(err);
            }
            moved.push(coin);
        }
        Ok(())
    }

    fn undo_transfer_in(&self, module: &str, owner: &str, coin: &Coin) {
        if let Err(err) = self.ledger.transfer_from_module(module, owner, coin) {
            warn!(module, owner, %coin, error = %err, "reversal failed");
        }
    }
}

fn validate_coins(coins: &[Coin]) -> Result<()> {
    for coin in coins {
        validate_denom(&coin.denom)?;
    }
    Ok(())
}

fn pool_coins(pool: &ExchangePool, amounts: [u64; 2]) -> [Coin; 2] {
    let assets = pool.assets();
    [
        Coin::new(assets[0].denom.clone(), amounts[0]),
        Coin::new(assets[1].denom.clone(), amounts[1]),
    ]
}

fn not_a_village(pool_id: PoolId) -> EngineError {
    EngineError::InvalidPool(format!("pool {pool_id} is not a village pool"))
}

// ============================================================================
// Unit Tests
// ============================================================================
