//! Channel registry.
//!
//! Metrics are observational; no settlement decision reads them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Application version negotiated on every channel.
pub const CHANNEL_VERSION: &str = "moneyorder-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Init,
    TryOpen,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Zero disables the bound
    pub min_transfer: u64,
    pub max_transfer: u64,
    /// Overrides the global cross-chain base fee
    pub base_fee: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub acks_succeeded: u64,
    pub acks_failed: u64,
    pub timeouts: u64,
    pub refunds: u64,
    pub total_volume: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub counterparty_chain: String,
    pub version: String,
    pub state: ChannelState,
    pub metadata: ChannelMetadata,
    pub metrics: ChannelMetrics,
    pub opened_at: u64,
}

impl ChannelInfo {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::ChannelNotOpen(self.channel_id.clone()))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, ChannelInfo>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open channel.
    pub fn open(
        &mut self,
        channel_id: &str,
        counterparty_chain: &str,
        version: &str,
        metadata: ChannelMetadata,
        opened_at: u64,
    ) -> Result<&ChannelInfo> {
        if version != CHANNEL_VERSION {
            return Err(EngineError::InvalidChannelVersion {
                channel: channel_id.to_string(),
                version: version.to_string(),
            });
        }
        if let Some(existing) = self.channels.get(channel_id) {
            if existing.is_open() {
                return Err(EngineError::ChannelExists(channel_id.to_string()));
            }
        }
        let info = ChannelInfo {
            channel_id: channel_id.to_string(),
            counterparty_chain: counterparty_chain.to_string(),
            version: version.to_string(),
            state: ChannelState::Open,
            metadata,
            metrics: ChannelMetrics::default(),
            opened_at,
        };
        self.channels.insert(channel_id.to_string(), info);
        self.get(channel_id)
    }

    pub fn get(&self, channel_id: &str) -> Result<&ChannelInfo> {
        self.channels
            .get(channel_id)
            .ok_or_else(|| EngineError::ChannelNotFound(channel_id.to_string()))
    }

    pub fn get_mut(&mut self, channel_id: &str) -> Result<&mut ChannelInfo> {
        self.channels
            .get_mut(channel_id)
            .ok_or_else(|| EngineError::ChannelNotFound(channel_id.to_string()))
    }

    /// First open channel to `chain`, in channel id order.
    pub fn for_chain(&self, chain: &str) -> Result<&ChannelInfo> {
        self.channels
            .values()
            .find(|c| c.counterparty_chain == chain && c.is_open())
            .ok_or_else(|| EngineError::NoChannelForChain(chain.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelInfo> {
        self.channels.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_requires_version() {
        let mut registry = ChannelRegistry::new();
        let err = registry.open("channel-0", "osmosis", "ics20-1", ChannelMetadata::default(), 0);
        assert!(matches!(err, Err(EngineError::InvalidChannelVersion { .. })));

        registry
            .open("channel-0", "osmosis", CHANNEL_VERSION, ChannelMetadata::default(), 0)
            .unwrap();
        assert!(registry.get("channel-0").unwrap().is_open());
    }

    #[test]
    fn test_for_chain_skips_closed() {
        let mut registry = ChannelRegistry::new();
        registry
            .open("channel-0", "osmosis", CHANNEL_VERSION, ChannelMetadata::default(), 0)
            .unwrap();
        registry
            .open("channel-1", "osmosis", CHANNEL_VERSION, ChannelMetadata::default(), 0)
            .unwrap();
        registry.get_mut("channel-0").unwrap().state = ChannelState::Closed;

        assert_eq!(registry.for_chain("osmosis").unwrap().channel_id, "channel-1");
        assert!(matches!(
            registry.for_chain("juno"),
            Err(EngineError::NoChannelForChain(_))
        ));
    }
}
