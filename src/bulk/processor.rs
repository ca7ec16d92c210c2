//! Bulk order execution: validation pass, batched settlement, retry and cancel.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    BulkItemStatus, BulkOrder, BulkOrderItem, BulkOrderSettings, BulkOrderStatus, OrderFailure,
    Priority, ProcessingStats,
};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventKind};
use crate::types::{validate_denom, Coin};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemRequest {
    pub recipient: String,
    pub amount: u64,
    #[serde(default)]
    pub memo: String,
}

impl BulkItemRequest {
    pub fn new(recipient: &str, amount: u64) -> Self {
        Self {
            recipient: recipient.to_string(),
            amount,
            memo: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOrderRequest {
    pub sender: String,
    pub denom: String,
    pub items: Vec<BulkItemRequest>,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub priority: Priority,
    /// Falls back to the `bulk` params defaults
    #[serde(default)]
    pub settings: Option<BulkOrderSettings>,
}

/// Outcome of one processing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOrderResult {
    pub bulk_id: String,
    pub status: BulkOrderStatus,
    /// Money order ids of settled items
    pub successful: Vec<String>,
    pub failed: Vec<OrderFailure>,
    pub stats: ProcessingStats,
}

impl BulkOrderResult {
    fn from_order(order: &BulkOrder) -> Self {
        Self {
            bulk_id: order.bulk_id.clone(),
            status: order.status,
            successful: order
                .items
                .iter()
                .filter_map(|i| i.order_id.clone())
                .collect(),
            failed: order.failures(),
            stats: order.stats.clone(),
        }
    }
}

/// Which items a processing pass may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Initial,
    Retry { now: u64 },
}

impl Pass {
    fn selects(&self, item: &BulkOrderItem) -> bool {
        match self {
            Pass::Initial => item.status == BulkItemStatus::Pending,
            Pass::Retry { now } => {
                item.status == BulkItemStatus::Retrying
                    && item.next_retry_at.is_some_and(|at| at <= *now)
            }
        }
    }
}

impl Engine {
    /// Validate and execute a bulk order.
    ///
    /// Batch-level problems reject the whole request with nothing moved.
    /// Past that point the order is always recorded and per-item failures
    /// are reported in the result.
    pub fn create_bulk_order(&mut self, request: BulkOrderRequest) -> Result<BulkOrderResult> {
        let now = self.block.time;
        let bulk_params = self.params.bulk.clone();
        validate_denom(&request.denom)?;

        let account = self
            .bulk
            .accounts
            .get_mut(&request.sender)
            .ok_or_else(|| EngineError::BusinessAccountNotFound(request.sender.clone()))?;
        account.ensure_enabled()?;
        if request.items.is_empty() {
            return Err(EngineError::EmptyBulkOrder);
        }
        let max = account.limits.max_bulk_order_size.min(bulk_params.max_items);
        if request.items.len() > max {
            return Err(EngineError::TooManyItems {
                count: request.items.len(),
                max,
            });
        }
        if request.memo.chars().count() > bulk_params.max_memo_len {
            return Err(EngineError::MemoTooLong {
                len: request.memo.chars().count(),
                max: bulk_params.max_memo_len,
            });
        }
        let settings = request
            .settings
            .unwrap_or_else(|| BulkOrderSettings::from_params(&bulk_params));
        settings.validate(&bulk_params)?;
        let total_amount = request
            .items
            .iter()
            .try_fold(0u64, |acc, item| acc.checked_add(item.amount))
            .ok_or(EngineError::Overflow)?;
        account.check_limits(total_amount, now)?;
        account.total_bulk_orders += 1;

        let sequence = self.bulk.next_sequence;
        self.bulk.next_sequence += 1;
        let bulk_id = bulk_order_id(&request.sender, now, sequence);

        let items = request
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| BulkOrderItem {
                index,
                recipient: item.recipient,
                amount: item.amount,
                memo: item.memo,
                status: BulkItemStatus::Pending,
                attempts: 0,
                next_retry_at: None,
                order_id: None,
                last_error: None,
                error_code: None,
            })
            .collect();
        let mut order = BulkOrder {
            bulk_id: bulk_id.clone(),
            sender: request.sender,
            denom: request.denom,
            memo: request.memo,
            priority: request.priority,
            settings,
            status: BulkOrderStatus::Pending,
            items,
            stats: ProcessingStats {
                start_time: now,
                ..Default::default()
            },
            total_amount,
            created_at: now,
            updated_at: now,
        };

        self.validate_bulk_items(&mut order);
        self.emit(
            Event::new(EventKind::BulkOrderCreated, self.block.height)
                .attr("bulk_id", &bulk_id)
                .attr("sender", &order.sender)
                .attr("items", order.items.len())
                .attr("total_amount", total_amount),
        );
        info!(
            %bulk_id,
            sender = %order.sender,
            items = order.items.len(),
            total_amount,
            priority = ?order.priority,
            "bulk order created"
        );

        order.status = BulkOrderStatus::Processing;
        self.run_bulk_pass(&mut order, Pass::Initial);
        self.finish_bulk_pass(order, EventKind::BulkOrderProcessed)
    }

    /// Re-execute every retrying item whose delay has elapsed.
    ///
    /// Items that are not yet due are left alone, so calling this twice in
    /// the same block is harmless.
    pub fn retry_bulk_order(&mut self, bulk_id: &str) -> Result<BulkOrderResult> {
        let now = self.block.time;
        let order = self
            .bulk
            .orders
            .get(bulk_id)
            .ok_or_else(|| EngineError::BulkOrderNotFound(bulk_id.to_string()))?;
        let pass = Pass::Retry { now };
        if !order.items.iter().any(|i| pass.selects(i)) {
            debug!(bulk_id, "no items due for retry");
            return Ok(BulkOrderResult::from_order(order));
        }
        self.bulk
            .accounts
            .get(&order.sender)
            .ok_or_else(|| EngineError::BusinessAccountNotFound(order.sender.clone()))?
            .ensure_enabled()?;

        let Some(mut order) = self.bulk.orders.remove(bulk_id) else {
            return Err(EngineError::BulkOrderNotFound(bulk_id.to_string()));
        };
        self.run_bulk_pass(&mut order, pass);
        self.finish_bulk_pass(order, EventKind::BulkOrderRetried)
    }

    /// Cancel every item that has not settled yet. Only the sender may cancel.
    pub fn cancel_bulk_order(&mut self, sender: &str, bulk_id: &str) -> Result<BulkOrderResult> {
        let now = self.block.time;
        let order = self
            .bulk
            .orders
            .get_mut(bulk_id)
            .ok_or_else(|| EngineError::BulkOrderNotFound(bulk_id.to_string()))?;
        if order.sender != sender {
            return Err(EngineError::Unauthorized(format!(
                "{sender} does not own bulk order {bulk_id}"
            )));
        }
        if !order.items.iter().any(BulkOrderItem::is_open) {
            return Err(EngineError::BulkOrderNotCancellable(bulk_id.to_string()));
        }

        let mut cancelled = 0usize;
        for item in order.items.iter_mut().filter(|i| i.is_open()) {
            item.status = BulkItemStatus::Cancelled;
            item.next_retry_at = None;
            cancelled += 1;
        }
        order.stats.recompute(&order.items, now);
        order.status = order.derive_status();
        order.updated_at = now;
        let status = order.status;
        let result = BulkOrderResult::from_order(order);

        self.emit(
            Event::new(EventKind::BulkOrderCancelled, self.block.height)
                .attr("bulk_id", bulk_id)
                .attr("cancelled_items", cancelled)
                .attr("status", status.as_str()),
        );
        info!(bulk_id, cancelled, status = status.as_str(), "bulk order cancelled");
        Ok(result)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Mark items with permanent input problems as failed before anything moves.
    ///
    /// With `stop_on_first_failure` a rejected item halts the whole order
    /// here: every other item is cancelled and nothing settles.
    fn validate_bulk_items(&self, order: &mut BulkOrder) {
        let settings = order.settings;
        let mut seen = BTreeSet::new();
        let mut rejected = false;
        for item in order.items.iter_mut() {
            if let Err(err) = self.check_bulk_item(item, &settings, &mut seen) {
                debug!(index = item.index, error = %err, "bulk item rejected");
                item.status = BulkItemStatus::Failed;
                item.error_code = Some(err.category().to_string());
                item.last_error = Some(err.to_string());
                rejected = true;
            }
        }
        if rejected && settings.stop_on_first_failure {
            for item in order
                .items
                .iter_mut()
                .filter(|i| i.status == BulkItemStatus::Pending)
            {
                item.status = BulkItemStatus::Cancelled;
            }
        }
    }

    fn check_bulk_item(
        &self,
        item: &BulkOrderItem,
        settings: &BulkOrderSettings,
        seen: &mut BTreeSet<String>,
    ) -> Result<()> {
        if settings.validate_recipients {
            self.validate_account(&item.recipient)?;
        }
        self.params.check_order_bounds(item.amount)?;
        let max = self.params.bulk.max_memo_len;
        let len = item.memo.chars().count();
        if len > max {
            return Err(EngineError::MemoTooLong { len, max });
        }
        if !settings.allow_duplicates && !seen.insert(item.recipient.clone()) {
            return Err(EngineError::DuplicateRecipient(item.recipient.clone()));
        }
        Ok(())
    }

    fn run_bulk_pass(&mut self, order: &mut BulkOrder, pass: Pass) {
        let started = Instant::now();
        let now = self.block.time;
        let settings = order.settings;
        let batch_size = settings.batch_size.max(1);
        let mut halted = false;

        for (batch, chunk) in order.items.chunks_mut(batch_size).enumerate() {
            if halted {
                break;
            }
            debug!(bulk_id = %order.bulk_id, batch, size = chunk.len(), "processing bulk batch");
            for item in chunk.iter_mut() {
                if !pass.selects(item) {
                    continue;
                }
                // retries re-check the usage window, which may have filled up since creation
                if let Pass::Retry { .. } = pass {
                    if let Some(account) = self.bulk.accounts.get_mut(&order.sender) {
                        if let Err(err) = account.check_limits(item.amount, now) {
                            item.next_retry_at = Some(now.saturating_add(settings.retry_delay_secs));
                            item.last_error = Some(err.to_string());
                            item.error_code = Some(err.category().to_string());
                            continue;
                        }
                    }
                }

                item.attempts += 1;
                let coin = Coin::new(order.denom.as_str(), item.amount);
                match self.settle_bulk_item(&order.sender, &item.recipient, &coin, &item.memo) {
                    Ok(receipt) => {
                        item.status = BulkItemStatus::Completed;
                        item.order_id = Some(receipt.order_id);
                        item.next_retry_at = None;
                        item.last_error = None;
                        item.error_code = None;
                        if let Some(account) = self.bulk.accounts.get_mut(&order.sender) {
                            account.record_usage(item.amount, now);
                        }
                    }
                    Err(err) => {
                        let retry = err.is_retryable() && item.attempts <= settings.max_retries;
                        warn!(
                            bulk_id = %order.bulk_id,
                            index = item.index,
                            attempts = item.attempts,
                            retry,
                            error = %err,
                            "bulk item failed"
                        );
                        item.error_code = Some(err.category().to_string());
                        item.last_error = Some(err.to_string());
                        if retry {
                            item.status = BulkItemStatus::Retrying;
                            item.next_retry_at = Some(now.saturating_add(settings.retry_delay_secs));
                        } else {
                            item.status = BulkItemStatus::Failed;
                            item.next_retry_at = None;
                        }
                        if settings.stop_on_first_failure {
                            halted = true;
                            break;
                        }
                    }
                }
            }
        }

        if halted {
            for item in order
                .items
                .iter_mut()
                .filter(|i| i.status == BulkItemStatus::Pending)
            {
                item.status = BulkItemStatus::Cancelled;
            }
        }
        order.stats.elapsed_micros += started.elapsed().as_micros();
        order.stats.recompute(&order.items, now);
    }

    fn finish_bulk_pass(&mut self, mut order: BulkOrder, kind: EventKind) -> Result<BulkOrderResult> {
        order.status = order.derive_status();
        order.updated_at = self.block.time;
        let result = BulkOrderResult::from_order(&order);

        self.emit(
            Event::new(kind, self.block.height)
                .attr("bulk_id", &order.bulk_id)
                .attr("status", order.status.as_str())
                .attr("successful", order.stats.successful)
                .attr("failed", order.stats.failed)
                .attr("error_rate", order.stats.error_rate),
        );
        info!(
            bulk_id = %order.bulk_id,
            status = order.status.as_str(),
            successful = order.stats.successful,
            failed = order.stats.failed,
            elapsed_us = order.stats.elapsed_micros as u64,
            "bulk pass finished"
        );
        self.bulk.orders.insert(order.bulk_id.clone(), order);
        Ok(result)
    }
}

/// `BULK_<last six chars of sender, upper>_<block time>_<sequence>`
fn bulk_order_id(sender: &str, time: u64, sequence: u64) -> String {
    let tail: String = {
        let chars: Vec<char> = sender.chars().collect();
        let start = chars.len().saturating_sub(6);
        chars[start..].iter().collect::<String>().to_uppercase()
    };
    format!("BULK_{tail}_{time}_{sequence}")
}
