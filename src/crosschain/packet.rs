//! Packet and acknowledgement wire formats.
//!
//! Packet payloads and acknowledgements are JSON (`serde_json`), matching what
//! relayers on the counterparty chain expect.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketType {
    Transfer,
    Confirmation,
    Refund,
    Query,
}

impl PacketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::Transfer => "TRANSFER",
            PacketType::Confirmation => "CONFIRMATION",
            PacketType::Refund => "REFUND",
            PacketType::Query => "QUERY",
        }
    }
}

/// Application payload carried by a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketData {
    pub packet_type: PacketType,
    /// Order id on the chain that created the order
    pub order_id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub denom: String,
    pub source_chain: String,
    pub destination_chain: String,
    #[serde(default)]
    pub memo: String,
    pub timestamp: u64,
}

impl PacketData {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EngineError::Encoding(e.to_string()))
    }

    /// Decode and sanity-check a payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data: PacketData =
            serde_json::from_slice(bytes).map_err(|e| EngineError::InvalidPacket(e.to_string()))?;
        if data.order_id.is_empty() {
            return Err(EngineError::InvalidPacket("missing order id".to_string()));
        }
        if data.packet_type == PacketType::Transfer {
            if data.amount == 0 {
                return Err(EngineError::InvalidPacket("zero transfer amount".to_string()));
            }
            if data.recipient.is_empty() || data.denom.is_empty() {
                return Err(EngineError::InvalidPacket(
                    "transfer needs recipient and denom".to_string(),
                ));
            }
        }
        Ok(data)
    }
}

/// A packet as handed to, or received from, the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Assigned by the transport on send
    pub sequence: u64,
    pub source_channel: String,
    pub destination_channel: String,
    pub data: Vec<u8>,
    pub timeout_height: u64,
    pub timeout_timestamp: u64,
}

/// Receiver's answer to a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Acknowledgement {
    pub fn success(order_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            error: None,
            order_id: Some(order_id.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
            order_id: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EngineError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| EngineError::InvalidPacket(e.to_string()))
    }
}
