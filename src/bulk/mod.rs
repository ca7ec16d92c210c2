//! Bulk money orders submitted by registered business accounts.
//!
//! A bulk order is a batch of payouts from one business. Batch-level checks
//! (account, size, limits) reject the whole batch before anything moves.
//! Item-level failures are recorded per item and the batch carries on.
//!
//! ## Item lifecycle
//!
//! ```text
//! Pending -> Completed
//!         -> Failed                  (malformed input, or retries exhausted)
//!         -> Retrying -> Completed | Retrying | Failed
//!         -> Cancelled
//! ```

mod processor;

pub use processor::{BulkItemRequest, BulkOrderRequest, BulkOrderResult};

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventKind};
use crate::params::BulkParams;

/// Usage windows roll over on these boundaries of block time.
const SECONDS_PER_DAY: u64 = 86_400;
const SECONDS_PER_MONTH: u64 = 30 * SECONDS_PER_DAY;

// ============================================================================
// Business accounts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessLimits {
    pub daily_limit: u64,
    pub monthly_limit: u64,
    pub max_bulk_order_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessAccount {
    pub owner: String,
    pub name: String,
    pub active: bool,
    pub bulk_orders_enabled: bool,
    pub limits: BusinessLimits,
    pub daily_used: u64,
    pub monthly_used: u64,
    usage_day: u64,
    usage_month: u64,
    pub registered_at: u64,
    pub total_bulk_orders: u64,
}

impl BusinessAccount {
    fn new(owner: &str, name: &str, limits: BusinessLimits, now: u64) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            active: true,
            bulk_orders_enabled: true,
            limits,
            daily_used: 0,
            monthly_used: 0,
            usage_day: now / SECONDS_PER_DAY,
            usage_month: now / SECONDS_PER_MONTH,
            registered_at: now,
            total_bulk_orders: 0,
        }
    }

    fn roll_usage(&mut self, now: u64) {
        let (day, month) = (now / SECONDS_PER_DAY, now / SECONDS_PER_MONTH);
        if day != self.usage_day {
            self.usage_day = day;
            self.daily_used = 0;
        }
        if month != self.usage_month {
            self.usage_month = month;
            self.monthly_used = 0;
        }
    }

    /// Fail with `BulkLimitExceeded` unless `amount` fits both windows.
    fn check_limits(&mut self, amount: u64, now: u64) -> Result<()> {
        self.roll_usage(now);
        let windows = [
            ("daily", self.limits.daily_limit, self.daily_used),
            ("monthly", self.limits.monthly_limit, self.monthly_used),
        ];
        for (period, limit, used) in windows {
            let remaining = limit.saturating_sub(used);
            if amount > remaining {
                return Err(EngineError::BulkLimitExceeded {
                    period,
                    requested: amount,
                    remaining,
                });
            }
        }
        Ok(())
    }

    fn record_usage(&mut self, amount: u64, now: u64) {
        self.roll_usage(now);
        self.daily_used = self.daily_used.saturating_add(amount);
        self.monthly_used = self.monthly_used.saturating_add(amount);
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.active && self.bulk_orders_enabled {
            Ok(())
        } else {
            Err(EngineError::BusinessAccountInactive(self.owner.clone()))
        }
    }
}

// ============================================================================
// Bulk order records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOrderSettings {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub stop_on_first_failure: bool,
    pub validate_recipients: bool,
    pub allow_duplicates: bool,
}

impl BulkOrderSettings {
    pub fn from_params(params: &BulkParams) -> Self {
        Self {
            batch_size: params.default_batch_size,
            max_retries: params.default_max_retries,
            retry_delay_secs: params.default_retry_delay_secs,
            stop_on_first_failure: false,
            validate_recipients: true,
            allow_duplicates: false,
        }
    }
    /// Caller-supplied settings must stay within the `bulk` params bounds.
    pub fn validate(&self, params: &BulkParams) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > params.max_batch_size {
            return Err(EngineError::InvalidBulkSettings(format!(
                "batch_size {} outside 1..={}",
                self.batch_size, params.max_batch_size
            )));
        }
        if self.max_retries > params.max_retries {
            return Err(EngineError::InvalidBulkSettings(format!(
                "max_retries {} above {}",
                self.max_retries, params.max_retries
            )));
        }
        if self.retry_delay_secs > params.max_retry_delay_secs {
            return Err(EngineError::InvalidBulkSettings(format!(
                "retry_delay_secs {} above {}",
                self.retry_delay_secs, params.max_retry_delay_secs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkOrderStatus {
    Pending,
    Processing,
    Completed,
    PartiallyCompleted,
    Cancelled,
    Failed,
}

impl BulkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOrderStatus::Pending => "PENDING",
            BulkOrderStatus::Processing => "PROCESSING",
            BulkOrderStatus::Completed => "COMPLETED",
            BulkOrderStatus::PartiallyCompleted => "PARTIALLY_COMPLETED",
            BulkOrderStatus::Cancelled => "CANCELLED",
            BulkOrderStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkItemStatus {
    Pending,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOrderItem {
    pub index: usize,
    pub recipient: String,
    pub amount: u64,
    pub memo: String,
    pub status: BulkItemStatus,
    pub attempts: u32,
    pub next_retry_at: Option<u64>,
    /// Receipt of the money order that settled this item
    pub order_id: Option<String>,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
}

impl BulkOrderItem {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.status, BulkItemStatus::Pending | BulkItemStatus::Retrying)
    }
}

/// A failed item as reported to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFailure {
    pub index: usize,
    pub recipient: String,
    pub error: String,
    pub error_code: String,
    pub retryable: bool,
}

/// Aggregate processing statistics, recomputed from the items.
///
/// Durations come from block time. `elapsed_micros` is wall-clock and kept
/// out of the persisted record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_secs: u64,
    #[serde(skip)]
    pub elapsed_micros: u128,
    pub avg_secs_per_item: Decimal,
    pub error_rate: Decimal,
    /// Items processed per second of block time
    pub throughput: Decimal,
}

impl ProcessingStats {
    fn recompute(&mut self, items: &[BulkOrderItem], end_time: u64) {
        let count = |status: BulkItemStatus| items.iter().filter(|i| i.status == status).count();
        self.total = items.len();
        self.successful = count(BulkItemStatus::Completed);
        self.failed = count(BulkItemStatus::Failed) + count(BulkItemStatus::Retrying);
        self.processed = self.successful + self.failed;
        self.end_time = end_time;
        self.duration_secs = end_time.saturating_sub(self.start_time);

        let processed = Decimal::from(self.processed as u64);
        let duration = Decimal::from(self.duration_secs);
        if self.processed > 0 {
            self.error_rate = Decimal::from(self.failed as u64) / processed;
            self.avg_secs_per_item = duration / processed;
        } else {
            self.error_rate = Decimal::ZERO;
            self.avg_secs_per_item = Decimal::ZERO;
        }
        self.throughput = processed / duration.max(Decimal::ONE);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOrder {
    pub bulk_id: String,
    pub sender: String,
    pub denom: String,
    pub memo: String,
    pub priority: Priority,
    pub settings: BulkOrderSettings,
    pub status: BulkOrderStatus,
    pub items: Vec<BulkOrderItem>,
    pub stats: ProcessingStats,
    pub total_amount: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl BulkOrder {
    /// Status implied by the items.
    fn derive_status(&self) -> BulkOrderStatus {
        let count = |status: BulkItemStatus| self.items.iter().filter(|i| i.status == status).count();
        let completed = count(BulkItemStatus::Completed);
        let open = self.items.iter().filter(|i| i.is_open()).count();
        if completed == self.items.len() {
            BulkOrderStatus::Completed
        } else if open > 0 {
            BulkOrderStatus::Processing
        } else if completed > 0 {
            BulkOrderStatus::PartiallyCompleted
        } else if count(BulkItemStatus::Cancelled) == self.items.len() {
            BulkOrderStatus::Cancelled
        } else {
            BulkOrderStatus::Failed
        }
    }

    pub fn failures(&self) -> Vec<OrderFailure> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, BulkItemStatus::Failed | BulkItemStatus::Retrying))
            .map(|i| OrderFailure {
                index: i.index,
                recipient: i.recipient.clone(),
                error: i.last_error.clone().unwrap_or_default(),
                error_code: i.error_code.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
                retryable: i.status == BulkItemStatus::Retrying,
            })
            .collect()
    }
}

// ============================================================================
// BulkStore
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BulkStore {
    pub(crate) accounts: BTreeMap<String, BusinessAccount>,
    pub(crate) orders: BTreeMap<String, BulkOrder>,
    pub(crate) next_sequence: u64,
}

impl BulkStore {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            ..Default::default()
        }
    }
}

// ============================================================================
// Business account operations
// ============================================================================

impl Engine {
    /// Register (or re-register) a business account. Governance only.
    pub fn register_business_account(
        &mut self,
        authority: &str,
        owner: &str,
        name: &str,
        limits: BusinessLimits,
    ) -> Result<()> {
        self.require_governance(authority)?;
        self.validate_account(owner)?;
        if limits.max_bulk_order_size == 0 {
            return Err(EngineError::InvalidParams(
                "max_bulk_order_size must be positive".to_string(),
            ));
        }
        let account = BusinessAccount::new(owner, name, limits, self.block.time);
        self.bulk.accounts.insert(owner.to_string(), account);
        self.emit(
            Event::new(EventKind::BusinessAccountRegistered, self.block.height)
                .attr("owner", owner)
                .attr("name", name)
                .attr("daily_limit", limits.daily_limit),
        );
        info!(owner, name, "business account registered");
        Ok(())
    }

    pub fn set_business_account_active(
        &mut self,
        authority: &str,
        owner: &str,
        active: bool,
    ) -> Result<()> {
        self.require_governance(authority)?;
        let account = self
            .bulk
            .accounts
            .get_mut(owner)
            .ok_or_else(|| EngineError::BusinessAccountNotFound(owner.to_string()))?;
        account.active = active;
        Ok(())
    }

    pub fn business_account(&self, owner: &str) -> Option<&BusinessAccount> {
        self.bulk.accounts.get(owner)
    }

    pub fn bulk_order(&self, bulk_id: &str) -> Option<&BulkOrder> {
        self.bulk.orders.get(bulk_id)
    }

    pub fn bulk_orders_by_sender(&self, sender: &str) -> Vec<&BulkOrder> {
        self.bulk
            .orders
            .values()
            .filter(|o| o.sender == sender)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> BusinessLimits {
        BusinessLimits {
            daily_limit: 1_000,
            monthly_limit: 1_500,
            max_bulk_order_size: 10,
        }
    }

    #[test]
    fn test_limits_roll_over() {
        let mut account = BusinessAccount::new("desh1owner", "Acme", limits(), 0);
        account.check_limits(1_000, 10).unwrap();
        account.record_usage(1_000, 10);
        assert!(matches!(
            account.check_limits(1, 20),
            Err(EngineError::BulkLimitExceeded { period: "daily", .. })
        ));

        // next day: daily resets, monthly does not
        let tomorrow = SECONDS_PER_DAY + 10;
        let err = account.check_limits(600, tomorrow).unwrap_err();
        assert_eq!(
            err,
            EngineError::BulkLimitExceeded {
                period: "monthly",
                requested: 600,
                remaining: 500
            }
        );
        assert!(account.check_limits(500, tomorrow).is_ok());
    }

    #[test]
    fn test_stats_error_rate() {
        let item = |index, status| BulkOrderItem {
            index,
            recipient: String::new(),
            amount: 1,
            memo: String::new(),
            status,
            attempts: 1,
            next_retry_at: None,
            order_id: None,
            last_error: None,
            error_code: None,
        };
        let items = vec![
            item(0, BulkItemStatus::Completed),
            item(1, BulkItemStatus::Completed),
            item(2, BulkItemStatus::Failed),
            item(3, BulkItemStatus::Retrying),
            item(4, BulkItemStatus::Pending),
        ];
        let mut stats = ProcessingStats {
            start_time: 100,
            ..Default::default()
        };
        stats.recompute(&items, 102);
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.error_rate, Decimal::new(5, 1));
        assert_eq!(stats.throughput, Decimal::from(2));
    }
}
