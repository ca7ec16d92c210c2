//! Typed events emitted on every state transition.
//!
//! Events are purely observational. The engine buffers them in an
//! [`EventLog`] and the host drains them once per block, typically to index
//! them off-chain as JSON.
//!
//! ```
//! use money_order_engine::events::{Event, EventKind};
//!
//! let event = Event::new(EventKind::Swap, 12)
//!     .attr("pool_id", 3)
//!     .attr("token_in", "1000unamo");
//! assert_eq!(event.get("pool_id"), Some("3"));
//! ```

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // money orders
    MoneyOrderCreated,
    MoneyOrderCompleted,
    MoneyOrderCancelled,
    MoneyOrderExpired,
    MoneyOrderRefunded,
    FeesDistributed,

    // pools
    PoolCreated,
    PoolStatusChanged,
    LiquidityAdded,
    LiquidityRemoved,
    Swap,
    VillageMemberJoined,
    VillageVerified,
    VillageAchievement,
    RewardsClaimed,

    // bulk
    BusinessAccountRegistered,
    BulkOrderCreated,
    BulkOrderProcessed,
    BulkOrderRetried,
    BulkOrderCancelled,

    // cross-chain
    ChannelOpened,
    ChannelClosed,
    CrossChainSent,
    CrossChainStatusChanged,
    CrossChainRefunded,
    InboundTransferReceived,

    // governance
    ParamsUpdated,
    FestivalPeriodChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MoneyOrderCreated => "money_order_created",
            EventKind::MoneyOrderCompleted => "money_order_completed",
            EventKind::MoneyOrderCancelled => "money_order_cancelled",
            EventKind::MoneyOrderExpired => "money_order_expired",
            EventKind::MoneyOrderRefunded => "money_order_refunded",
            EventKind::FeesDistributed => "fees_distributed",
            EventKind::PoolCreated => "pool_created",
            EventKind::PoolStatusChanged => "pool_status_changed",
            EventKind::LiquidityAdded => "liquidity_added",
            EventKind::LiquidityRemoved => "liquidity_removed",
            EventKind::Swap => "swap",
            EventKind::VillageMemberJoined => "village_member_joined",
            EventKind::VillageVerified => "village_verified",
            EventKind::VillageAchievement => "village_achievement",
            EventKind::RewardsClaimed => "rewards_claimed",
            EventKind::BusinessAccountRegistered => "business_account_registered",
            EventKind::BulkOrderCreated => "bulk_order_created",
            EventKind::BulkOrderProcessed => "bulk_order_processed",
            EventKind::BulkOrderRetried => "bulk_order_retried",
            EventKind::BulkOrderCancelled => "bulk_order_cancelled",
            EventKind::ChannelOpened => "channel_opened",
            EventKind::ChannelClosed => "channel_closed",
            EventKind::CrossChainSent => "cross_chain_sent",
            EventKind::CrossChainStatusChanged => "cross_chain_status_changed",
            EventKind::CrossChainRefunded => "cross_chain_refunded",
            EventKind::InboundTransferReceived => "inbound_transfer_received",
            EventKind::ParamsUpdated => "params_updated",
            EventKind::FestivalPeriodChanged => "festival_period_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub height: u64,
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    pub fn new(kind: EventKind, height: u64) -> Self {
        Self {
            kind,
            height,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn attr(mut self, key: &str, value: impl Display) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Per-block event buffer.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Take every buffered event, leaving the log empty.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
