//! # Money Order Engine
//!
//! Deterministic state machine for a payments chain: money orders, exchange
//! pools, bulk business payouts and cross-chain settlement.
//!
//! ## Architecture
//!
//! - **Types**: core value types (Coin, BlockReceipt) and amount helpers
//! - **Params / Fees**: governance parameters, fee pricing and distribution
//! - **Pool**: AMM, fixed-rate and village pools behind one [`pool::PoolModel`] trait
//! - **Engine**: money orders, swaps and liquidity, driven block by block
//! - **Bulk**: batched payouts for registered business accounts
//! - **Crosschain**: channel registry and the persisted transfer state machine
//! - **Ports**: ledger, KYC, payment-address and packet transport interfaces
//!
//! ## Design Principles
//!
//! 1. **Determinism**: identical transactions produce an identical state root
//! 2. **No Floating Point**: `u64` amounts, `Decimal` rates, explicit rounding
//! 3. **Block Time Only**: the host supplies height and time; nothing reads a clock
//! 4. **Synchronous Execution**: cross-chain work is a state machine, never a wait
//!
//! ## Example
//!
//! ```
//! use money_order_engine::config::EngineConfig;
//! use money_order_engine::engine::{Engine, MoneyOrderRequest, OrderStatus};
//! use money_order_engine::ports::{Collaborators, MemoryLedger, MemoryTransport, MemoryVpa, StaticKyc};
//! use money_order_engine::types::{derive_address, Coin};
//!
//! let ledger = MemoryLedger::new();
//! let (kyc, vpa, transport) = (StaticKyc::new(), MemoryVpa::new(), MemoryTransport::new());
//! let ports = Collaborators::in_memory(&ledger, &kyc, &vpa, &transport);
//! let mut engine = Engine::new(EngineConfig::default(), ports).unwrap();
//!
//! let (alice, bob) = (derive_address("desh", "alice"), derive_address("desh", "bob"));
//! ledger.mint(&alice, &Coin::new("unamo", 500_000_000)).unwrap();
//!
//! engine.begin_block(1, 1_735_689_600);
//! let order = engine
//!     .create_money_order(MoneyOrderRequest::new(&alice, &bob, 100_000_000))
//!     .unwrap();
//! assert_eq!(order.status, OrderStatus::Completed);
//!
//! let receipt = engine.end_block().unwrap();
//! assert_eq!(receipt.orders_processed, 1);
//! ```

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: Coin, BlockReceipt, amount math
pub mod types;

/// Error taxonomy shared by every operation
pub mod error;

/// Governance parameters and their invariants
pub mod params;

/// Fee pricing and distribution
pub mod fees;

/// Exchange pools: AMM, fixed-rate, village
pub mod pool;

/// External collaborator interfaces and in-memory implementations
pub mod ports;

/// Structured events emitted per block
pub mod events;

/// YAML configuration
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// The engine: money orders, swaps, block lifecycle
pub mod engine;

/// Bulk business payouts
pub mod bulk;

/// Cross-chain settlement
pub mod crosschain;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use config::EngineConfig;
pub use engine::{BlockContext, Engine, MoneyOrder, MoneyOrderRequest, OrderStatus};
pub use error::{EngineError, Result};
pub use params::Params;
pub use pool::{ExchangePool, PoolModel};
pub use types::{BlockReceipt, Coin};
