//! Block receipt summarizing one unit of inclusion.
//!
//! The BlockReceipt is produced by `Engine::end_block` and carries the state
//! root every validating replica must agree on.

use sha2::{Digest, Sha256};
use ssz_rs::prelude::*;

/// Summary of the engine's work within one block.
///
/// ## State Root
///
/// The 32-byte state root is a SHA-256 hash over every pool snapshot, money
/// order, bulk order and cross-chain order, visited in key order. Two replicas
/// that applied the same transactions produce the same root.
///
/// ## Example
///
/// ```
/// use money_order_engine::types::BlockReceipt;
///
/// let receipt = BlockReceipt::new(
///     7,                      // height
///     12,                     // money orders processed
///     3,                      // swaps executed
///     1,                      // cross-chain transitions
///     [0u8; 32],              // state root (computed by the engine)
///     1_735_689_600,          // block time (seconds)
/// );
/// assert_eq!(receipt.total_operations(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct BlockReceipt {
    /// Block height
    pub height: u64,

    /// Money orders created, executed, cancelled or expired in this block
    pub orders_processed: u64,

    /// Pool swaps committed in this block
    pub swaps_executed: u64,

    /// Cross-chain order status transitions in this block
    pub cross_chain_transitions: u64,

    /// State root after the block (SHA-256, 32 bytes)
    pub state_root: [u8; 32],

    /// Block time in seconds
    pub timestamp: u64,
}

impl BlockReceipt {
    pub fn new(
        height: u64,
        orders_processed: u64,
        swaps_executed: u64,
        cross_chain_transitions: u64,
        state_root: [u8; 32],
        timestamp: u64,
    ) -> Self {
        Self {
            height,
            orders_processed,
            swaps_executed,
            cross_chain_transitions,
            state_root,
            timestamp,
        }
    }

    /// Compute SHA-256 hash of the given data
    pub fn compute_hash(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Get the state root as a hex string
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }

    pub fn total_operations(&self) -> u64 {
        self.orders_processed + self.swaps_executed + self.cross_chain_transitions
    }

    /// `true` if nothing happened in this block
    pub fn is_empty(&self) -> bool {
        self.total_operations() == 0
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_new() {
        let receipt = BlockReceipt::new(1, 10, 5, 2, [1u8; 32], 1_700_000_000);
        assert_eq!(receipt.height, 1);
        assert_eq!(receipt.total_operations(), 17);
        assert!(!receipt.is_empty());
        assert!(BlockReceipt::default().is_empty());
    }

    #[test]
    fn test_receipt_hash_determinism() {
        let hash1 = BlockReceipt::compute_hash(b"pool state");
        let hash2 = BlockReceipt::compute_hash(b"pool state");
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, BlockReceipt::compute_hash(b"other state"));
    }

    #[test]
    fn test_receipt_state_root_hex() {
        let receipt = BlockReceipt::new(1, 0, 0, 0, [0xAB; 32], 0);
        let hex = receipt.state_root_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("abab"));
    }

    #[test]
    fn test_receipt_deterministic_serialization() {
        let receipt = BlockReceipt::new(9, 100, 50, 3, [0xCD; 32], 1_700_000_000);

        let bytes1 = ssz_rs::serialize(&receipt).expect("Failed to serialize");
        let bytes2 = ssz_rs::serialize(&receipt).expect("Failed to serialize");
        assert_eq!(bytes1, bytes2, "SSZ serialization must be deterministic");

        // 8 + 8 + 8 + 8 + 32 + 8
        assert_eq!(bytes1.len(), 72);
    }
}
