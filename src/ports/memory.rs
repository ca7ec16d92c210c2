use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use super::{KycProvider, Ledger, PacketTransport, VpaResolver};
use crate::crosschain::Packet;
use crate::error::{EngineError, Result};
use crate::types::Coin;

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    /// (account, denom) -> balance
    balances: BTreeMap<(String, String), u64>,
    unavailable: bool,
}

/// A thread-safe in-memory bank.
///
/// Clones share the same balances, so a test can keep a handle after moving
/// one into the engine. Module accounts are plain accounts here.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| EngineError::LedgerUnavailable("ledger lock poisoned".to_string()))
    }

    /// Credit new funds to `account`.
    pub fn mint(&self, account: &str, coin: &Coin) -> Result<()> {
        let mut state = self.lock()?;
        let balance = state
            .balances
            .entry((account.to_string(), coin.denom.clone()))
            .or_insert(0);
        *balance = balance.checked_add(coin.amount).ok_or(EngineError::Overflow)?;
        Ok(())
    }

    /// Simulate an outage: every call fails with `LedgerUnavailable`.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = !available;
        }
    }

    /// Sum of all balances of `denom`.
    pub fn total_supply(&self, denom: &str) -> u128 {
        self.state
            .lock()
            .map(|state| {
                state
                    .balances
                    .iter()
                    .filter(|((_, d), _)| d == denom)
                    .map(|(_, amount)| *amount as u128)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn move_funds(&self, from: &str, to: &str, coin: &Coin) -> Result<()> {
        let mut state = self.lock()?;
        if state.unavailable {
            return Err(EngineError::LedgerUnavailable("ledger offline".to_string()));
        }
        if coin.amount == 0 {
            return Ok(());
        }

        let from_key = (from.to_string(), coin.denom.clone());
        let available = state.balances.get(&from_key).copied().unwrap_or(0);
        if available < coin.amount {
            return Err(EngineError::InsufficientFunds {
                account: from.to_string(),
                denom: coin.denom.clone(),
                available,
                required: coin.amount,
            });
        }
        let to_key = (to.to_string(), coin.denom.clone());
        let to_balance = state.balances.get(&to_key).copied().unwrap_or(0);
        let credited = to_balance.checked_add(coin.amount).ok_or(EngineError::Overflow)?;

        state.balances.insert(from_key, available - coin.amount);
        state.balances.insert(to_key, credited);
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn transfer(&self, from: &str, to: &str, coin: &Coin) -> Result<()> {
        self.move_funds(from, to, coin)
    }

    fn transfer_to_module(&self, from: &str, module: &str, coin: &Coin) -> Result<()> {
        self.move_funds(from, module, coin)
    }

    fn transfer_from_module(&self, module: &str, to: &str, coin: &Coin) -> Result<()> {
        self.move_funds(module, to, coin)
    }

    fn balance_of(&self, account: &str, denom: &str) -> Result<u64> {
        let state = self.lock()?;
        if state.unavailable {
            return Err(EngineError::LedgerUnavailable("ledger offline".to_string()));
        }
        Ok(state
            .balances
            .get(&(account.to_string(), denom.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

// ============================================================================
// KYC
// ============================================================================

/// KYC registry with fixed levels.
#[derive(Debug, Default, Clone)]
pub struct StaticKyc {
    levels: Arc<Mutex<BTreeMap<String, u8>>>,
    seniors: Arc<Mutex<BTreeSet<String>>>,
}

impl StaticKyc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `account` verified at `level` (zero revokes).
    pub fn verify(&self, account: &str, level: u8) {
        if let Ok(mut levels) = self.levels.lock() {
            levels.insert(account.to_string(), level);
        }
    }

    /// Record an attested age of 60 or more for `account`.
    pub fn attest_senior(&self, account: &str) {
        if let Ok(mut seniors) = self.seniors.lock() {
            seniors.insert(account.to_string());
        }
    }
}

impl KycProvider for StaticKyc {
    fn is_verified(&self, account: &str) -> bool {
        self.kyc_level(account) > 0
    }

    fn kyc_level(&self, account: &str) -> u8 {
        self.levels
            .lock()
            .ok()
            .and_then(|levels| levels.get(account).copied())
            .unwrap_or(0)
    }

    fn is_senior_citizen(&self, account: &str) -> bool {
        self.is_verified(account)
            && self
                .seniors
                .lock()
                .map(|seniors| seniors.contains(account))
                .unwrap_or(false)
    }
}

// ============================================================================
// VPA
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct MemoryVpa {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryVpa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, vpa: &str, account: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(vpa.to_lowercase(), account.to_string());
        }
    }
}

impl VpaResolver for MemoryVpa {
    fn resolve(&self, vpa: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&vpa.to_lowercase()).cloned())
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Default)]
struct TransportState {
    outbox: Vec<Packet>,
    next_sequence: BTreeMap<String, u64>,
    offline: bool,
}

/// Records dispatched packets in an outbox instead of relaying them.
#[derive(Debug, Default, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Packets sent so far, oldest first.
    pub fn sent(&self) -> Vec<Packet> {
        self.state
            .lock()
            .map(|state| state.outbox.clone())
            .unwrap_or_default()
    }

    pub fn last_sent(&self) -> Option<Packet> {
        self.sent().pop()
    }
}

impl PacketTransport for MemoryTransport {
    fn send_packet(&self, packet: &Packet) -> Result<u64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::PacketDispatchFailed("transport lock poisoned".to_string()))?;
        if state.offline {
            return Err(EngineError::PacketDispatchFailed(format!(
                "channel {} unreachable",
                packet.source_channel
            )));
        }
        let next = state
            .next_sequence
            .entry(packet.source_channel.clone())
            .or_insert(1);
        let sequence = *next;
        *next += 1;

        let mut sent = packet.clone();
        sent.sequence = sequence;
        state.outbox.push(sent);
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_transfer_and_insufficient_funds() {
        let ledger = MemoryLedger::new();
        ledger.mint("alice", &Coin::new("unamo", 100)).unwrap();

        ledger.transfer("alice", "bob", &Coin::new("unamo", 60)).unwrap();
        assert_eq!(ledger.balance_of("alice", "unamo").unwrap(), 40);
        assert_eq!(ledger.balance_of("bob", "unamo").unwrap(), 60);

        let err = ledger.transfer("alice", "bob", &Coin::new("unamo", 41));
        assert!(matches!(err, Err(EngineError::InsufficientFunds { available: 40, .. })));
        assert_eq!(ledger.total_supply("unamo"), 100);
    }

    #[test]
    fn test_ledger_outage() {
        let ledger = MemoryLedger::new();
        ledger.mint("alice", &Coin::new("unamo", 100)).unwrap();
        ledger.set_available(false);
        let err = ledger.transfer("alice", "bob", &Coin::new("unamo", 1)).unwrap_err();
        assert!(err.is_retryable());
        ledger.set_available(true);
        assert!(ledger.transfer("alice", "bob", &Coin::new("unamo", 1)).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let ledger = MemoryLedger::new();
        let handle = ledger.clone();
        ledger.mint("alice", &Coin::new("unamo", 5)).unwrap();
        assert_eq!(handle.balance_of("alice", "unamo").unwrap(), 5);
    }

    #[test]
    fn test_kyc_and_vpa() {
        let kyc = StaticKyc::new();
        assert!(!kyc.is_verified("alice"));
        kyc.verify("alice", 2);
        assert!(kyc.is_verified("alice"));
        assert_eq!(kyc.kyc_level("alice"), 2);

        kyc.attest_senior("dadi");
        assert!(!kyc.is_senior_citizen("dadi"));
        kyc.verify("dadi", 1);
        assert!(kyc.is_senior_citizen("dadi"));
        assert!(!kyc.is_senior_citizen("alice"));

        let vpa = MemoryVpa::new();
        vpa.register("Bob@DeshBank", "bob");
        assert_eq!(vpa.resolve("bob@deshbank"), Some("bob".to_string()));
        assert_eq!(vpa.resolve("carol@deshbank"), None);
    }

    #[test]
    fn test_transport_sequences_per_channel() {
        let transport = MemoryTransport::new();
        let packet = Packet {
            sequence: 0,
            source_channel: "channel-0".into(),
            destination_channel: "channel-9".into(),
            data: Vec::new(),
            timeout_height: 0,
            timeout_timestamp: 0,
        };
        assert_eq!(transport.send_packet(&packet).unwrap(), 1);
        assert_eq!(transport.send_packet(&packet).unwrap(), 2);
        assert_eq!(transport.last_sent().unwrap().sequence, 2);

        transport.set_offline(true);
        assert!(transport.send_packet(&packet).is_err());
        assert_eq!(transport.sent().len(), 2);
    }
}
