//! SSZ pool summary hashed into the state root.

use ssz_rs::prelude::*;

/// Fixed-size view of one exchange pool.
///
/// Produced by `ExchangePool::snapshot`. The full pool record is folded into
/// `detail_hash`, so the SSZ encoding stays the same size for every pool kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct PoolSnapshot {
    pub pool_id: u64,
    pub kind: u8,
    pub reserve_0: u64,
    pub reserve_1: u64,
    pub total_shares: u64,
    pub active: bool,
    /// SHA-256 over the full pool record
    pub detail_hash: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_encoding_is_fixed_size() {
        let mut snapshot = PoolSnapshot {
            pool_id: 1,
            kind: 2,
            reserve_0: 1_000,
            reserve_1: 4_000,
            total_shares: 2_000,
            active: true,
            detail_hash: [7u8; 32],
        };
        let small = ssz_rs::serialize(&snapshot).unwrap();
        snapshot.reserve_0 = u64::MAX;
        let large = ssz_rs::serialize(&snapshot).unwrap();
        // 4 u64 + u8 kind + bool + 32-byte digest
        assert_eq!(small.len(), 8 * 4 + 1 + 1 + 32);
        assert_eq!(small.len(), large.len());
        assert_ne!(small, large);
    }
}
