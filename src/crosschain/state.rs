//! Cross-chain order record and its status machine.
//!
//! ```text
//! PENDING -> SENT -> RECEIVED -> CONFIRMED -> COMPLETED
//!             |         |
//!             +---------+--> FAILED | REFUNDED | TIMEOUT
//! ```
//!
//! Inbound orders (created on the destination chain) start at `RECEIVED`.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::Coin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrossChainStatus {
    Pending,
    Sent,
    Received,
    Confirmed,
    Completed,
    Failed,
    Refunded,
    Timeout,
}

impl CrossChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossChainStatus::Pending => "PENDING",
            CrossChainStatus::Sent => "SENT",
            CrossChainStatus::Received => "RECEIVED",
            CrossChainStatus::Confirmed => "CONFIRMED",
            CrossChainStatus::Completed => "COMPLETED",
            CrossChainStatus::Failed => "FAILED",
            CrossChainStatus::Refunded => "REFUNDED",
            CrossChainStatus::Timeout => "TIMEOUT",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrossChainStatus::Completed
                | CrossChainStatus::Failed
                | CrossChainStatus::Refunded
                | CrossChainStatus::Timeout
        )
    }

    /// `true` while the remote leg can still fail or time out.
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, CrossChainStatus::Sent | CrossChainStatus::Received)
    }

    /// One-step transitions. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: CrossChainStatus) -> bool {
        use CrossChainStatus::*;
        match (self, next) {
            (Pending, Sent) => true,
            (Sent, Received) => true,
            (Received, Confirmed) => true,
            (Confirmed, Completed) => true,
            (Sent | Received, Failed | Refunded | Timeout) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CrossChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Outbound,
    Inbound,
}

/// Fees taken from escrow when the transfer packet is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainFees {
    pub base: u64,
    pub relayer: u64,
    pub protocol: u64,
}

impl CrossChainFees {
    #[inline]
    pub fn total(&self) -> u64 {
        self.base + self.relayer + self.protocol
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: CrossChainStatus,
    pub height: u64,
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainOrder {
    pub order_id: String,
    pub direction: TransferDirection,
    pub sender: String,
    pub recipient: String,
    pub amount: Coin,
    pub source_chain: String,
    pub destination_chain: String,
    pub channel_id: String,
    pub status: CrossChainStatus,
    pub fees: CrossChainFees,
    /// Zero means no height deadline
    pub timeout_height: u64,
    /// Zero means no time deadline
    pub timeout_timestamp: u64,
    pub sequence: u64,
    pub memo: String,
    pub refunded: bool,
    pub created_at: u64,
    pub updated_at: u64,
    pub timeline: Vec<TimelineEntry>,
}

impl CrossChainOrder {
    /// Move to `next`, recording it on the timeline.
    pub fn transition(&mut self, next: CrossChainStatus, height: u64, time: u64) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidStatusTransition {
                id: self.order_id.clone(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        self.updated_at = time;
        self.timeline.push(TimelineEntry {
            status: next,
            height,
            time,
        });
        Ok(())
    }

    /// `true` once either deadline has elapsed.
    pub fn timeout_elapsed(&self, height: u64, time: u64) -> bool {
        (self.timeout_height > 0 && height >= self.timeout_height)
            || (self.timeout_timestamp > 0 && time >= self.timeout_timestamp)
    }
}
