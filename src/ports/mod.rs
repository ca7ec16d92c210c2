//! Narrow interfaces to the engine's external collaborators.
//!
//! The engine never moves value itself: every balance change goes through a
//! [`Ledger`]. Identity checks, payment-address lookup and packet delivery are
//! likewise injected, so hosts can plug in their own bank and relayer.
//!
//! [`memory`] provides in-process implementations for tests, benches and the
//! demo binary.

pub mod memory;

pub use memory::{MemoryLedger, MemoryTransport, MemoryVpa, StaticKyc};

use crate::crosschain::Packet;
use crate::error::Result;
use crate::types::Coin;

/// Holds `amount + fee` of scheduled money orders and cross-chain transfers.
pub const ESCROW_ACCOUNT: &str = "moneyorder_escrow";

/// Receives fees before they are split across the buckets.
pub const FEE_COLLECTOR: &str = "moneyorder_fee_collector";

pub const RELAYER_POOL: &str = "moneyorder_relayer_pool";

/// Backs inbound transfers; receives escrow of completed outbound ones.
pub const BRIDGE_RESERVE: &str = "moneyorder_bridge_reserve";

/// Account-to-account value movement.
pub trait Ledger: Send + Sync {
    fn transfer(&self, from: &str, to: &str, coin: &Coin) -> Result<()>;

    fn transfer_to_module(&self, from: &str, module: &str, coin: &Coin) -> Result<()>;

    fn transfer_from_module(&self, module: &str, to: &str, coin: &Coin) -> Result<()>;

    fn balance_of(&self, account: &str, denom: &str) -> Result<u64>;
}

pub trait KycProvider: Send + Sync {
    fn is_verified(&self, account: &str) -> bool;

    fn kyc_level(&self, account: &str) -> u8;

    /// Age attested through KYC. Unverified accounts are never senior.
    fn is_senior_citizen(&self, account: &str) -> bool;
}

/// Virtual payment address (`name@bank`) lookup.
pub trait VpaResolver: Send + Sync {
    fn resolve(&self, vpa: &str) -> Option<String>;
}

/// Hands packets to the relayer network.
pub trait PacketTransport: Send + Sync {
    /// Dispatch `packet` and return the sequence assigned on its channel.
    /// Returning never waits for the counterparty.
    fn send_packet(&self, packet: &Packet) -> Result<u64>;
}

/// The full set of collaborators an [`Engine`](crate::engine::Engine) needs.
pub struct Collaborators {
    pub ledger: Box<dyn Ledger>,
    pub kyc: Box<dyn KycProvider>,
    pub vpa: Box<dyn VpaResolver>,
    pub transport: Box<dyn PacketTransport>,
}

impl Collaborators {
    /// In-memory collaborators sharing state with the returned handles.
    pub fn in_memory(
        ledger: &MemoryLedger,
        kyc: &StaticKyc,
        vpa: &MemoryVpa,
        transport: &MemoryTransport,
    ) -> Self {
        Self {
            ledger: Box::new(ledger.clone()),
            kyc: Box::new(kyc.clone()),
            vpa: Box::new(vpa.clone()),
            transport: Box::new(transport.clone()),
        }
    }
}
