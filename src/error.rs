//! Error types for the money order engine.
//!
//! Every engine operation returns [`EngineError`]. Errors are grouped the same
//! way callers react to them:
//!
//! - **Validation**: malformed input, rejected with zero side effects
//! - **Business rule**: well-formed input that the current state refuses
//! - **Pool / Order / Bulk / Cross-chain**: component specific failures
//! - **Collaborator**: the ledger or transport refused the request
//! - **Configuration**: a params record that must never reach state
//!
//! Bulk processing uses [`EngineError::is_retryable`] to decide whether a failed
//! item gets another attempt.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    // === Validation Errors ===
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("invalid denomination: {0}")]
    InvalidDenom(String),

    #[error("memo too long: {len} > {max}")]
    MemoTooLong { len: usize, max: usize },

    #[error("scheduled orders require a scheduled time")]
    MissingSchedule,

    #[error("scheduled time {scheduled} is not after block time {now}")]
    ScheduleNotInFuture { scheduled: u64, now: u64 },

    #[error("unknown pool type: {0}")]
    UnknownPoolType(String),

    #[error("duplicate recipient in batch: {0}")]
    DuplicateRecipient(String),

    #[error("virtual payment address not found: {0}")]
    VpaNotFound(String),

    #[error("arithmetic overflow")]
    Overflow,

    // === Business Rule Errors ===
    #[error("amount below minimum: {amount} < {min}")]
    OrderAmountTooLow { amount: u64, min: u64 },

    #[error("amount above maximum: {amount} > {max}")]
    OrderAmountTooHigh { amount: u64, max: u64 },

    #[error("daily limit exceeded for {account}: {used} used, {requested} requested, limit {limit}")]
    DailyLimitExceeded {
        account: String,
        used: u64,
        requested: u64,
        limit: u64,
    },

    #[error("KYC verification required for {0}")]
    KycRequired(String),

    #[error("insufficient funds: {account} holds {available}{denom}, needs {required}{denom}")]
    InsufficientFunds {
        account: String,
        denom: String,
        available: u64,
        required: u64,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("feature disabled: {0}")]
    FeatureDisabled(&'static str),

    // === Pool Errors ===
    #[error("pool {0} not found")]
    PoolNotFound(u64),

    #[error("pool {0} is inactive")]
    PoolInactive(u64),

    #[error("insufficient liquidity in pool {pool_id}: {available} available, {requested} requested")]
    InsufficientLiquidity {
        pool_id: u64,
        available: u64,
        requested: u64,
    },

    #[error("slippage exceeded: bound {bound}, quoted {quoted}")]
    SlippageExceeded { bound: u64, quoted: u64 },

    #[error("invalid pool: {0}")]
    InvalidPool(String),

    #[error("denom {denom} is not traded by pool {pool_id}")]
    DenomNotInPool { pool_id: u64, denom: String },

    #[error("quote for pool {0} no longer matches pool reserves")]
    StaleQuote(u64),

    #[error("insufficient shares: {available} held, {requested} requested")]
    InsufficientShares { available: u64, requested: u64 },

    #[error("village pool already exists for postal code {0}")]
    VillagePoolExists(String),

    #[error("{member} is not a member of village pool {pool_id}")]
    NotVillageMember { pool_id: u64, member: String },

    #[error("{member} is already a member of village pool {pool_id}")]
    AlreadyVillageMember { pool_id: u64, member: String },

    #[error("village pool {0} has reached its member limit")]
    MemberLimitReached(u64),

    #[error("no pending rewards")]
    NoPendingRewards,

    // === Order Errors ===
    #[error("money order {0} not found")]
    OrderNotFound(String),

    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidStatusTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    // === Bulk Errors ===
    #[error("business account {0} not found")]
    BusinessAccountNotFound(String),

    #[error("business account {0} is inactive or has bulk orders disabled")]
    BusinessAccountInactive(String),

    #[error("bulk order has no items")]
    EmptyBulkOrder,

    #[error("bulk order has {count} items, maximum is {max}")]
    TooManyItems { count: usize, max: usize },

    #[error("{period} bulk limit exceeded: {requested} requested, {remaining} remaining")]
    BulkLimitExceeded {
        period: &'static str,
        requested: u64,
        remaining: u64,
    },

    #[error("bulk order {0} not found")]
    BulkOrderNotFound(String),

    #[error("bulk order {0} cannot be cancelled")]
    BulkOrderNotCancellable(String),

    #[error("invalid bulk settings: {0}")]
    InvalidBulkSettings(String),

    // === Cross-Chain Errors ===
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    #[error("channel {0} is already open")]
    ChannelExists(String),

    #[error("no open channel to chain {0}")]
    NoChannelForChain(String),

    #[error("channel {0} is not open")]
    ChannelNotOpen(String),

    #[error("channel {channel} requested unsupported version {version}")]
    InvalidChannelVersion { channel: String, version: String },

    #[error("cross-chain order {0} not found")]
    CrossChainOrderNotFound(String),

    #[error("no order for packet {sequence} on channel {channel}")]
    PacketNotFound { channel: String, sequence: u64 },

    #[error("timeout not reached for cross-chain order {0}")]
    TimeoutNotReached(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("packet dispatch failed: {0}")]
    PacketDispatchFailed(String),

    // === Collaborator Errors ===
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    // === Configuration Errors ===
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("state encoding failed: {0}")]
    Encoding(String),
}

impl EngineError {
    /// Whether a failed bulk item may succeed on a later attempt.
    ///
    /// Transient conditions (funds not yet available, a ledger hiccup, today's
    /// limit already consumed) are retryable. Malformed input never is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientFunds { .. }
                | EngineError::LedgerUnavailable(_)
                | EngineError::DailyLimitExceeded { .. }
        )
    }

    /// Stable machine-readable code, used in events and failure records.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::InvalidAddress(_) => "INVALID_ADDRESS",
            EngineError::ZeroAmount => "ZERO_AMOUNT",
            EngineError::InvalidDenom(_) => "INVALID_DENOM",
            EngineError::MemoTooLong { .. } => "MEMO_TOO_LONG",
            EngineError::MissingSchedule | EngineError::ScheduleNotInFuture { .. } => {
                "INVALID_SCHEDULE"
            }
            EngineError::UnknownPoolType(_) => "UNKNOWN_POOL_TYPE",
            EngineError::DuplicateRecipient(_) => "DUPLICATE_RECIPIENT",
            EngineError::VpaNotFound(_) => "VPA_NOT_FOUND",
            EngineError::Overflow => "OVERFLOW",
            EngineError::OrderAmountTooLow { .. } => "AMOUNT_TOO_LOW",
            EngineError::OrderAmountTooHigh { .. } => "AMOUNT_TOO_HIGH",
            EngineError::DailyLimitExceeded { .. } => "DAILY_LIMIT",
            EngineError::KycRequired(_) => "KYC_REQUIRED",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::FeatureDisabled(_) => "FEATURE_DISABLED",
            EngineError::PoolNotFound(_) => "POOL_NOT_FOUND",
            EngineError::PoolInactive(_) => "POOL_INACTIVE",
            EngineError::InsufficientLiquidity { .. } => "INSUFFICIENT_LIQUIDITY",
            EngineError::SlippageExceeded { .. } => "SLIPPAGE_EXCEEDED",
            EngineError::InvalidPool(_) => "INVALID_POOL",
            EngineError::DenomNotInPool { .. } => "DENOM_NOT_IN_POOL",
            EngineError::StaleQuote(_) => "STALE_QUOTE",
            EngineError::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            EngineError::VillagePoolExists(_) => "VILLAGE_POOL_EXISTS",
            EngineError::NotVillageMember { .. } => "NOT_VILLAGE_MEMBER",
            EngineError::AlreadyVillageMember { .. } => "ALREADY_VILLAGE_MEMBER",
            EngineError::MemberLimitReached(_) => "MEMBER_LIMIT",
            EngineError::NoPendingRewards => "NO_PENDING_REWARDS",
            EngineError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            EngineError::InvalidStatusTransition { .. } => "INVALID_TRANSITION",
            EngineError::BusinessAccountNotFound(_) => "BUSINESS_NOT_FOUND",
            EngineError::BusinessAccountInactive(_) => "BUSINESS_INACTIVE",
            EngineError::EmptyBulkOrder => "EMPTY_BULK_ORDER",
            EngineError::TooManyItems { .. } => "TOO_MANY_ITEMS",
            EngineError::BulkLimitExceeded { .. } => "BULK_LIMIT",
            EngineError::BulkOrderNotFound(_) => "BULK_NOT_FOUND",
            EngineError::BulkOrderNotCancellable(_) => "BULK_NOT_CANCELLABLE",
            EngineError::InvalidBulkSettings(_) => "INVALID_BULK_SETTINGS",
            EngineError::ChannelNotFound(_) => "CHANNEL_NOT_FOUND",
            EngineError::ChannelExists(_) => "CHANNEL_EXISTS",
            EngineError::NoChannelForChain(_) => "NO_CHANNEL",
            EngineError::ChannelNotOpen(_) => "CHANNEL_NOT_OPEN",
            EngineError::InvalidChannelVersion { .. } => "INVALID_VERSION",
            EngineError::CrossChainOrderNotFound(_) => "XC_ORDER_NOT_FOUND",
            EngineError::PacketNotFound { .. } => "PACKET_NOT_FOUND",
            EngineError::TimeoutNotReached(_) => "TIMEOUT_NOT_REACHED",
            EngineError::InvalidPacket(_) => "INVALID_PACKET",
            EngineError::PacketDispatchFailed(_) => "DISPATCH_FAILED",
            EngineError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            EngineError::InvalidParams(_) => "INVALID_PARAMS",
            EngineError::Encoding(_) => "ENCODING",
        }
    }
}

/// Errors raised while loading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Invalid(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let transient = EngineError::InsufficientFunds {
            account: "namo1abc".into(),
            denom: "unamo".into(),
            available: 1,
            required: 2,
        };
        assert!(transient.is_retryable());
        assert!(EngineError::LedgerUnavailable("down".into()).is_retryable());

        assert!(!EngineError::InvalidAddress("bad".into()).is_retryable());
        assert!(!EngineError::OrderAmountTooLow { amount: 1, min: 2 }.is_retryable());
        assert!(!EngineError::DuplicateRecipient("x".into()).is_retryable());
    }

    #[test]
    fn test_amount_below_minimum_message() {
        let err = EngineError::OrderAmountTooLow {
            amount: 9_999_999,
            min: 10_000_000,
        };
        assert!(err.to_string().contains("amount below minimum"));
        assert_eq!(err.category(), "AMOUNT_TOO_LOW");
    }
}
