//! Cross-chain money orders.
//!
//! A transfer is a persisted state machine keyed by order id. Nothing here
//! blocks: dispatching a packet returns at once, and the order waits in
//! `SENT` until a later block delivers the acknowledgement, the timeout or a
//! confirmation packet. Every handler checks the current status first, so
//! duplicate delivery is a no-op.

mod channel;
mod packet;
mod settlement;
mod state;

pub use channel::{
    ChannelInfo, ChannelMetadata, ChannelMetrics, ChannelRegistry, ChannelState, CHANNEL_VERSION,
};
pub use packet::{Acknowledgement, Packet, PacketData, PacketType};
pub use settlement::CrossChainTransfer;
pub use state::{
    CrossChainFees, CrossChainOrder, CrossChainStatus, TimelineEntry, TransferDirection,
};

use std::collections::BTreeMap;

/// Cross-chain records owned by the engine.
#[derive(Debug, Clone, Default)]
pub struct CrossChainState {
    pub(crate) orders: BTreeMap<String, CrossChainOrder>,
    /// (source channel, sequence) -> outbound order id
    pub(crate) by_packet: BTreeMap<(String, u64), String>,
    /// (receiving channel, sequence) -> inbound order id
    pub(crate) inbound_by_packet: BTreeMap<(String, u64), String>,
    pub(crate) channels: ChannelRegistry,
    pub(crate) next_sequence: u64,
}

impl CrossChainState {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            ..Default::default()
        }
    }

    pub fn order(&self, order_id: &str) -> Option<&CrossChainOrder> {
        self.orders.get(order_id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &CrossChainOrder> {
        self.orders.values()
    }
}
