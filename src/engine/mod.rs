//! The money order engine.
//!
//! ## Design Principles
//!
//! 1. **Determinism**: every iterated collection is ordered, no floating point
//!    reaches state, and block time comes from the host, never the clock
//! 2. **Synchronous Execution**: one transaction at a time, no async; a
//!    cross-chain "wait" is a persisted status advanced by a later handler
//! 3. **Validate, then mutate**: every operation checks all of its
//!    preconditions before the first balance moves
//!
//! ## Block lifecycle
//!
//! ```text
//! begin_block(height, time)
//!   -> any number of operations, applied in submission order
//! end_block()
//!   -> expired money orders swept, due scheduled ones delivered
//!   -> BlockReceipt { counters, state_root }
//! ```
//!
//! ## Example
//!
//! ```
//! use money_order_engine::config::EngineConfig;
//! use money_order_engine::engine::Engine;
//! use money_order_engine::ports::{Collaborators, MemoryLedger, MemoryTransport, MemoryVpa, StaticKyc};
//!
//! let ledger = MemoryLedger::new();
//! let ports = Collaborators::in_memory(&ledger, &StaticKyc::new(), &MemoryVpa::new(), &MemoryTransport::new());
//! let mut engine = Engine::new(EngineConfig::default(), ports).unwrap();
//!
//! engine.begin_block(1, 1_735_689_600);
//! let receipt = engine.end_block().unwrap();
//! assert_eq!(receipt.height, 1);
//! assert!(receipt.is_empty());
//! ```

mod orders;
mod swap;

pub use orders::{
    DeliveryType, MoneyOrder, MoneyOrderRequest, OrderStats, OrderStatus, ReceiptBook,
    ORDER_EXPIRY_SECS,
};
pub use swap::{ExactOutRequest, FixedRateTerms, SwapRequest, SwapResult};

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::bulk::BulkStore;
use crate::config::EngineConfig;
use crate::crosschain::CrossChainState;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventKind, EventLog};
use crate::fees::{distribute_fees, FeeDistribution};
use crate::params::Params;
use crate::pool::{ExchangePool, PoolId};
use crate::ports::{Collaborators, KycProvider, Ledger, PacketTransport, VpaResolver, FEE_COLLECTOR};
use crate::types::{validate_address, BlockReceipt, Coin};

/// Height and time of the block being executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    /// Seconds since the Unix epoch
    pub time: u64,
}

/// Per-block operation counters reported in the [`BlockReceipt`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BlockStats {
    pub orders_processed: u64,
    pub swaps_executed: u64,
    pub cross_chain_transitions: u64,
}

pub struct Engine {
    pub(crate) params: Params,
    pub(crate) chain_id: String,
    pub(crate) region_code: String,
    pub(crate) address_prefix: String,
    pub(crate) governance_authority: String,

    pub(crate) ledger: Box<dyn Ledger>,
    pub(crate) kyc: Box<dyn KycProvider>,
    pub(crate) vpa: Box<dyn VpaResolver>,
    pub(crate) transport: Box<dyn PacketTransport>,

    pub(crate) block: BlockContext,
    pub(crate) stats: BlockStats,
    pub(crate) events: EventLog,
    pub(crate) festival_active: bool,

    // pools
    pub(crate) pools: BTreeMap<PoolId, ExchangePool>,
    pub(crate) next_pool_id: PoolId,
    pub(crate) villages_by_postal_code: BTreeMap<String, PoolId>,
    /// (pool, owner) -> LP shares
    pub(crate) lp_shares: BTreeMap<(PoolId, String), u64>,

    pub(crate) orders: ReceiptBook,
    pub(crate) bulk: BulkStore,
    pub(crate) cross_chain: CrossChainState,
}

impl Engine {
    /// Build an engine from validated configuration.
    ///
    /// # Errors
    ///
    /// `InvalidParams` if `config.params` fails validation.
    pub fn new(config: EngineConfig, ports: Collaborators) -> Result<Self> {
        config.params.validate()?;
        info!(
            chain_id = %config.chain_id,
            region = %config.region_code,
            "money order engine initialised"
        );
        Ok(Self {
            params: config.params,
            chain_id: config.chain_id,
            region_code: config.region_code,
            address_prefix: config.address_prefix,
            governance_authority: config.governance_authority,
            ledger: ports.ledger,
            kyc: ports.kyc,
            vpa: ports.vpa,
            transport: ports.transport,
            block: BlockContext::default(),
            stats: BlockStats::default(),
            events: EventLog::new(),
            festival_active: false,
            pools: BTreeMap::new(),
            next_pool_id: 1,
            villages_by_postal_code: BTreeMap::new(),
            lp_shares: BTreeMap::new(),
            orders: ReceiptBook::new(),
            bulk: BulkStore::new(),
            cross_chain: CrossChainState::new(),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[inline]
    pub fn block(&self) -> BlockContext {
        self.block
    }

    #[inline]
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    #[inline]
    pub fn is_festival_period(&self) -> bool {
        self.festival_active
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Hand buffered events to the host.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    // ========================================================================
    // Block lifecycle
    // ========================================================================

    pub fn begin_block(&mut self, height: u64, time: u64) {
        self.block = BlockContext { height, time };
        self.stats = BlockStats::default();
    }

    /// Sweep expired orders, deliver due scheduled ones, then seal the block.
    pub fn end_block(&mut self) -> Result<BlockReceipt> {
        self.sweep_expired_orders();
        self.process_scheduled_orders();

        let state_root = self.state_root()?;
        let receipt = BlockReceipt::new(
            self.block.height,
            self.stats.orders_processed,
            self.stats.swaps_executed,
            self.stats.cross_chain_transitions,
            state_root,
            self.block.time,
        );
        info!(
            height = receipt.height,
            operations = receipt.total_operations(),
            state_root = %receipt.state_root_hex(),
            "block sealed"
        );
        Ok(receipt)
    }

    /// SHA-256 over every pool snapshot (SSZ), LP share, money order,
    /// business account, bulk order and cross-chain order, each visited in
    /// key order.
    pub fn state_root(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();

        for pool in self.pools.values() {
            let snapshot = pool.snapshot()?;
            let bytes =
                ssz_rs::serialize(&snapshot).map_err(|e| EngineError::Encoding(e.to_string()))?;
            hasher.update(&bytes);
        }
        for ((pool_id, owner), shares) in &self.lp_shares {
            hasher.update(pool_id.to_le_bytes());
            hasher.update(owner.as_bytes());
            hasher.update(shares.to_le_bytes());
        }
        for order in self.orders.iter() {
            hash_record(&mut hasher, order)?;
        }
        for account in self.bulk.accounts.values() {
            hash_record(&mut hasher, account)?;
        }
        for bulk in self.bulk.orders.values() {
            hash_record(&mut hasher, bulk)?;
        }
        for order in self.cross_chain.orders.values() {
            hash_record(&mut hasher, order)?;
        }

        let mut root = [0u8; 32];
        root.copy_from_slice(&hasher.finalize());
        Ok(root)
    }

    // ========================================================================
    // Governance
    // ========================================================================

    pub(crate) fn require_governance(&self, authority: &str) -> Result<()> {
        if authority != self.governance_authority {
            return Err(EngineError::Unauthorized(format!(
                "{authority} is not the governance authority"
            )));
        }
        Ok(())
    }

    /// Replace params after validating the whole candidate record.
    ///
    /// A rejected update leaves the current params untouched.
    pub fn update_params(&mut self, authority: &str, params: Params) -> Result<()> {
        self.require_governance(authority)?;
        if let Err(err) = params.validate() {
            warn!(error = %err, "params update rejected");
            return Err(err);
        }
        self.params = params;
        self.emit(Event::new(EventKind::ParamsUpdated, self.block.height).attr("authority", authority));
        info!("params updated");
        Ok(())
    }

    pub fn set_festival_period(&mut self, authority: &str, active: bool) -> Result<()> {
        self.require_governance(authority)?;
        self.festival_active = active;
        self.emit(
            Event::new(EventKind::FestivalPeriodChanged, self.block.height).attr("active", active),
        );
        Ok(())
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    pub(crate) fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }

    pub(crate) fn validate_account(&self, address: &str) -> Result<()> {
        validate_address(address, &self.address_prefix)
    }

    /// Fail with `InsufficientFunds` unless `account` holds `amount` of `denom`.
    pub(crate) fn ensure_balance(&self, account: &str, denom: &str, amount: u64) -> Result<()> {
        let available = self.ledger.balance_of(account, denom)?;
        if available < amount {
            return Err(EngineError::InsufficientFunds {
                account: account.to_string(),
                denom: denom.to_string(),
                available,
                required: amount,
            });
        }
        Ok(())
    }

    /// Split a fee already sitting in the fee collector across the buckets.
    ///
    /// A bucket transfer that fails leaves its part in the collector; the fee
    /// has already been paid, so the caller's operation still stands.
    pub(crate) fn distribute_collected(&mut self, denom: &str, total: u64) -> FeeDistribution {
        let split = distribute_fees(&self.params.fee_shares, total);
        for (bucket, amount) in split.iter() {
            let coin = Coin::new(denom, amount);
            if let Err(err) = self
                .ledger
                .transfer_from_module(FEE_COLLECTOR, bucket.module_account(), &coin)
            {
                warn!(bucket = bucket.as_str(), %coin, error = %err, "fee bucket transfer failed");
            }
        }
        if total > 0 {
            let mut event = Event::new(EventKind::FeesDistributed, self.block.height)
                .attr("denom", denom)
                .attr("total", total);
            for (bucket, amount) in split.iter() {
                event = event.attr(bucket.as_str(), amount);
            }
            self.emit(event);
        }
        split
    }
}

fn hash_record<T: Serialize>(hasher: &mut Sha256, record: &T) -> Result<()> {
    let bytes = serde_json::to_vec(record).map_err(|e| EngineError::Encoding(e.to_string()))?;
    hasher.update(&bytes);
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ports::{MemoryLedger, MemoryTransport, MemoryVpa, StaticKyc};
    use crate::types::derive_address;
    use rust_decimal_macros::dec;

    pub(crate) struct Harness {
        pub engine: Engine,
        pub ledger: MemoryLedger,
        pub kyc: StaticKyc,
        pub vpa: MemoryVpa,
        pub transport: MemoryTransport,
    }

    pub(crate) fn addr(label: &str) -> String {
        derive_address("desh", label)
    }

    pub(crate) fn harness() -> Harness {
        let ledger = MemoryLedger::new();
        let kyc = StaticKyc::new();
        let vpa = MemoryVpa::new();
        let transport = MemoryTransport::new();
        let ports = Collaborators::in_memory(&ledger, &kyc, &vpa, &transport);
        let mut engine = Engine::new(EngineConfig::default(), ports).unwrap();
        engine.begin_block(1, 1_735_689_600);
        Harness {
            engine,
            ledger,
            kyc,
            vpa,
            transport,
        }
    }

    #[test]
    fn test_empty_block_receipt() {
        let mut h = harness();
        let receipt = h.engine.end_block().unwrap();
        assert_eq!(receipt.height, 1);
        assert!(receipt.is_empty());
    }

    #[test]
    fn test_state_root_is_deterministic() {
        let a = harness();
        let b = harness();
        assert_eq!(a.engine.state_root().unwrap(), b.engine.state_root().unwrap());
    }

    #[test]
    fn test_update_params_requires_governance() {
        let mut h = harness();
        let mut params = Params::default();
        params.trading_fee_rate = dec!(0.002);

        assert!(matches!(
            h.engine.update_params("mallory", params.clone()),
            Err(EngineError::Unauthorized(_))
        ));
        h.engine.update_params("gov", params).unwrap();
        assert_eq!(h.engine.params().trading_fee_rate, dec!(0.002));
    }

    #[test]
    fn test_invalid_params_update_keeps_current() {
        let mut h = harness();
        let mut params = Params::default();
        params.fee_shares.validator = dec!(0.46);
        assert!(h.engine.update_params("gov", params).is_err());
        assert_eq!(h.engine.params(), &Params::default());
    }

    #[test]
    fn test_distribute_collected_moves_buckets() {
        let mut h = harness();
        h.ledger
            .mint(FEE_COLLECTOR, &Coin::new("unamo", 1_001))
            .unwrap();
        let split = h.engine.distribute_collected("unamo", 1_001);
        assert_eq!(split.total(), 1_001);
        assert_eq!(
            h.ledger
                .balance_of("moneyorder_validator_pool", "unamo")
                .unwrap(),
            451
        );
        assert_eq!(h.ledger.balance_of(FEE_COLLECTOR, "unamo").unwrap(), 0);
        assert_eq!(h.engine.events().count(EventKind::FeesDistributed), 1);
    }
}
