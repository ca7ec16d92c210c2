//! Core data types shared by every component.
//!
//! ## Types
//!
//! - [`Coin`]: an amount of one denomination
//! - [`BlockReceipt`]: per-block summary with the state root
//! - [`PoolSnapshot`]: SSZ leaf summarizing one pool
//! - [`amount`]: integer/decimal helpers with explicit rounding
//!
//! ## Amounts
//!
//! All amounts are `u64` base units. Rates and shares are
//! `rust_decimal::Decimal`; no floating point value ever reaches state.

mod coin;
mod receipt;
mod snapshot;
pub mod amount;

pub use coin::{
    derive_address, is_cultural_token, validate_address, validate_denom, Coin, CULTURAL_TOKENS,
    DEFAULT_ADDRESS_PREFIX, DEFAULT_DENOM,
};
pub use receipt::BlockReceipt;
pub use snapshot::PoolSnapshot;
