//! Coins, denominations and account addresses.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

/// Native staking/fee denomination.
pub const DEFAULT_DENOM: &str = "unamo";

/// Denominations that qualify for cultural-token fee discounts.
pub const CULTURAL_TOKENS: [&str; 4] = ["unamo", "uheritage", "uwisdom", "ufestival"];

/// Default human-readable address prefix.
pub const DEFAULT_ADDRESS_PREFIX: &str = "desh";

/// Bech32 data charset.
const ADDRESS_CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const MIN_ADDRESS_DATA_LEN: usize = 38;
const MAX_ADDRESS_DATA_LEN: usize = 58;

/// An amount of a single denomination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u64,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl std::fmt::Display for Coin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// `true` for the four cultural denominations.
pub fn is_cultural_token(denom: &str) -> bool {
    CULTURAL_TOKENS.contains(&denom)
}

/// Denoms are 3-64 chars, start with a lowercase letter, and contain only
/// lowercase alphanumerics or `/`.
pub fn validate_denom(denom: &str) -> Result<()> {
    let valid_len = (3..=64).contains(&denom.len());
    let valid_start = denom.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = denom
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/');

    if valid_len && valid_start && valid_chars {
        Ok(())
    } else {
        Err(EngineError::InvalidDenom(denom.to_string()))
    }
}

/// Validate a user account address of the form `<prefix>1<data>`.
///
/// # Example
///
/// ```
/// use money_order_engine::types::{derive_address, validate_address};
///
/// let addr = derive_address("desh", "alice");
/// assert!(validate_address(&addr, "desh").is_ok());
/// assert!(validate_address("desh1short", "desh").is_err());
/// ```
pub fn validate_address(address: &str, prefix: &str) -> Result<()> {
    let invalid = || EngineError::InvalidAddress(address.to_string());

    let data = address
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('1'))
        .ok_or_else(invalid)?;

    if !(MIN_ADDRESS_DATA_LEN..=MAX_ADDRESS_DATA_LEN).contains(&data.len()) {
        return Err(invalid());
    }
    if !data.bytes().all(|b| ADDRESS_CHARSET.contains(&b)) {
        return Err(invalid());
    }
    Ok(())
}

/// Derive a well-formed address from a label.
///
/// Deterministic: the same label always yields the same address. Used by the
/// demo binary, benches and tests to build realistic accounts.
pub fn derive_address(prefix: &str, label: &str) -> String {
    let digest = Sha256::digest(label.as_bytes());
    let data: String = digest
        .iter()
        .chain(digest.iter().take(MIN_ADDRESS_DATA_LEN - digest.len()))
        .map(|b| ADDRESS_CHARSET[(*b & 0x1f) as usize] as char)
        .collect();
    format!("{prefix}1{data}")
}
