//! Money orders: creation, scheduled delivery, cancellation and expiry.
//!
//! ## Status machine
//!
//! ```text
//! PENDING -> PROCESSING -> COMPLETED | CANCELLED | REFUNDED | EXPIRED
//! ```
//!
//! Instant and normal orders pass straight through to `COMPLETED` inside the
//! creating transaction. Scheduled orders escrow `amount + fee` and wait in
//! `PENDING` until `end_block` reaches their scheduled time.
//!
//! ## Reference numbers
//!
//! `MO-<year>-<region>-<sequence>`, e.g. `MO-2025-DEL-000042`. The year comes
//! from block time, so every replica derives the same reference.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};
use slab::Slab;
use tracing::{debug, info, warn};

use super::Engine;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventKind};
use crate::fees::{money_order_fee, DiscountContext, FeeClass};
use crate::ports::{ESCROW_ACCOUNT, FEE_COLLECTOR};
use crate::types::{is_cultural_token, validate_denom, Coin, DEFAULT_DENOM};

/// Orders expire 24 hours after their creation (or scheduled) time.
pub const ORDER_EXPIRY_SECS: u64 = 24 * 60 * 60;

const SECONDS_PER_DAY: u64 = 86_400;
const MAX_NOTE_LEN: usize = 256;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Refunded,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => next == OrderStatus::Processing,
            OrderStatus::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Instant,
    #[default]
    Normal,
    Scheduled,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::Instant => "instant",
            DeliveryType::Normal => "normal",
            DeliveryType::Scheduled => "scheduled",
        }
    }

    /// Instant delivery is priced as express.
    pub fn fee_class(&self) -> FeeClass {
        match self {
            DeliveryType::Instant => FeeClass::Express,
            DeliveryType::Normal | DeliveryType::Scheduled => FeeClass::Normal,
        }
    }
}

/// Input to [`Engine::create_money_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyOrderRequest {
    pub sender: String,
    /// Account address or virtual payment address (`name@bank`)
    pub receiver: String,
    pub amount: u64,
    pub denom: String,
    pub delivery: DeliveryType,
    pub scheduled_at: Option<u64>,
    pub note: String,
}

impl MoneyOrderRequest {
    pub fn new(sender: &str, receiver: &str, amount: u64) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            denom: DEFAULT_DENOM.to_string(),
            delivery: DeliveryType::Normal,
            scheduled_at: None,
            note: String::new(),
        }
    }

    pub fn instant(mut self) -> Self {
        self.delivery = DeliveryType::Instant;
        self
    }

    pub fn scheduled(mut self, at: u64) -> Self {
        self.delivery = DeliveryType::Scheduled;
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }

    pub fn with_denom(mut self, denom: &str) -> Self {
        self.denom = denom.to_string();
        self
    }
}

/// The receipt of a money order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyOrder {
    pub order_id: String,
    pub reference_number: String,
    pub sender: String,
    pub receiver: String,
    pub receiver_vpa: Option<String>,
    pub amount: Coin,
    pub fee: u64,
    pub fee_class: FeeClass,
    pub delivery: DeliveryType,
    pub status: OrderStatus,
    pub note: String,
    pub created_at: u64,
    pub created_height: u64,
    pub scheduled_at: Option<u64>,
    pub expires_at: u64,
    pub completed_at: Option<u64>,
    /// `amount + fee` currently held in escrow
    pub escrowed: bool,
}

impl MoneyOrder {
    fn transition(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidStatusTransition {
                id: self.order_id.clone(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// `PENDING -> PROCESSING -> terminal`
    fn finish(&mut self, terminal: OrderStatus, time: u64) -> Result<()> {
        self.transition(OrderStatus::Processing)?;
        self.transition(terminal)?;
        self.completed_at = Some(time);
        Ok(())
    }

    #[inline]
    pub fn total_debit(&self) -> u64 {
        self.amount.amount + self.fee
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderStats {
    pub total_orders: u64,
    pub by_status: BTreeMap<&'static str, u64>,
    pub total_volume: u128,
    pub total_fees: u128,
}

// ============================================================================
// ReceiptBook
// ============================================================================

/// Receipt storage with id, reference and sender indexes.
///
/// Receipts are never removed, so slab keys are allocated in insertion order.
#[derive(Debug, Default)]
pub struct ReceiptBook {
    receipts: Slab<MoneyOrder>,
    by_id: BTreeMap<String, usize>,
    by_reference: BTreeMap<String, usize>,
    by_sender: BTreeMap<String, Vec<usize>>,
    /// (sender, day) -> amount sent
    daily_usage: BTreeMap<(String, u64), u64>,
    next_sequence: u64,
}

impl ReceiptBook {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            ..Default::default()
        }
    }

    /// Sequence the next inserted receipt takes. Rejected orders never
    /// consume one.
    #[inline]
    fn peek_sequence(&self) -> u64 {
        self.next_sequence
    }

    fn insert(&mut self, order: MoneyOrder) -> usize {
        self.next_sequence += 1;
        let order_id = order.order_id.clone();
        let reference = order.reference_number.clone();
        let sender = order.sender.clone();
        let key = self.receipts.insert(order);
        self.by_id.insert(order_id, key);
        self.by_reference.insert(reference, key);
        self.by_sender.entry(sender).or_default().push(key);
        key
    }

    pub fn get(&self, order_id: &str) -> Option<&MoneyOrder> {
        self.by_id.get(order_id).and_then(|k| self.receipts.get(*k))
    }

    fn get_mut(&mut self, order_id: &str) -> Result<&mut MoneyOrder> {
        let key = *self
            .by_id
            .get(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        self.receipts
            .get_mut(key)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))
    }

    pub fn by_reference(&self, reference: &str) -> Option<&MoneyOrder> {
        self.by_reference
            .get(reference)
            .and_then(|k| self.receipts.get(*k))
    }

    pub fn by_sender(&self, sender: &str) -> Vec<&MoneyOrder> {
        self.by_sender
            .get(sender)
            .map(|keys| keys.iter().filter_map(|k| self.receipts.get(*k)).collect())
            .unwrap_or_default()
    }

    /// Receipts in order id order.
    pub fn iter(&self) -> impl Iterator<Item = &MoneyOrder> {
        self.by_id.values().filter_map(|k| self.receipts.get(*k))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    fn daily_used(&self, sender: &str, day: u64) -> u64 {
        self.daily_usage
            .get(&(sender.to_string(), day))
            .copied()
            .unwrap_or(0)
    }

    fn record_usage(&mut self, sender: &str, day: u64, amount: u64) {
        let used = self.daily_usage.entry((sender.to_string(), day)).or_insert(0);
        *used = used.saturating_add(amount);
    }

    /// Give back the daily allowance of an order whose funds never reached
    /// the receiver.
    fn release_usage(&mut self, order: &MoneyOrder) {
        let key = (order.sender.clone(), order.created_at / SECONDS_PER_DAY);
        if let Some(used) = self.daily_usage.get_mut(&key) {
            *used = used.saturating_sub(order.amount.amount);
        }
    }

    fn pending_ids(&self, due: impl Fn(&MoneyOrder) -> bool) -> Vec<String> {
        self.iter()
            .filter(|o| o.status == OrderStatus::Pending && due(o))
            .map(|o| o.order_id.clone())
            .collect()
    }
}

// ============================================================================
// Engine operations
// ============================================================================

impl Engine {
    /// Create a money order.
    ///
    /// Checks run in a fixed order: amount bounds, the sender's daily limit,
    /// KYC for large orders, receiver resolution, fee, and finally balance.
    /// Any failure leaves no trace.
    ///
    /// # Returns
    ///
    /// The receipt: `COMPLETED` for instant and normal delivery, `PENDING`
    /// with funds in escrow for scheduled delivery.
    pub fn create_money_order(&mut self, request: MoneyOrderRequest) -> Result<MoneyOrder> {
        let now = self.block.time;
        self.validate_account(&request.sender)?;
        validate_denom(&request.denom)?;
        let note_len = request.note.chars().count();
        if note_len > MAX_NOTE_LEN {
            return Err(EngineError::MemoTooLong {
                len: note_len,
                max: MAX_NOTE_LEN,
            });
        }
        let scheduled_at = match request.delivery {
            DeliveryType::Scheduled => {
                let at = request.scheduled_at.ok_or(EngineError::MissingSchedule)?;
                if at <= now {
                    return Err(EngineError::ScheduleNotInFuture { scheduled: at, now });
                }
                Some(at)
            }
            _ => None,
        };
        let expires_at = scheduled_at
            .unwrap_or(now)
            .checked_add(ORDER_EXPIRY_SECS)
            .ok_or(EngineError::Overflow)?;

        // 1. bounds
        self.params.check_order_bounds(request.amount)?;

        // 2. daily limit
        let day = now / SECONDS_PER_DAY;
        let used = self.orders.daily_used(&request.sender, day);
        let limit = self.params.max_daily_user_limit;
        if used.saturating_add(request.amount) > limit {
            return Err(EngineError::DailyLimitExceeded {
                account: request.sender.clone(),
                used,
                requested: request.amount,
                limit,
            });
        }

        // 3. KYC
        if self.params.is_large_order(request.amount) && !self.kyc.is_verified(&request.sender) {
            return Err(EngineError::KycRequired(request.sender.clone()));
        }

        // 4. receiver
        let (receiver, receiver_vpa) = self.resolve_receiver(&request.receiver)?;

        // 5. fee
        let fee_class = request.delivery.fee_class();
        let discounts = DiscountContext {
            festival: self.festival_active,
            village_member: self.is_village_member(&request.sender),
            senior_citizen: self.kyc.is_senior_citizen(&request.sender),
            cultural_token: is_cultural_token(&request.denom),
        };
        let fee = money_order_fee(&self.params, request.amount, fee_class, &discounts)?;

        // 6. balance
        let total = request.amount.checked_add(fee).ok_or(EngineError::Overflow)?;
        self.ensure_balance(&request.sender, &request.denom, total)?;

        let mut order = self.draft_receipt(
            &request.sender,
            (receiver, receiver_vpa),
            Coin::new(request.denom.clone(), request.amount),
            (fee, fee_class),
            request.delivery,
            request.note,
            (scheduled_at, expires_at),
        );

        match order.delivery {
            DeliveryType::Scheduled => {
                let escrow = Coin::new(request.denom.clone(), total);
                self.ledger
                    .transfer_to_module(&order.sender, ESCROW_ACCOUNT, &escrow)?;
                order.escrowed = true;
            }
            DeliveryType::Instant | DeliveryType::Normal => {
                self.pay_out_direct(&order)?;
                order.finish(OrderStatus::Completed, now)?;
            }
        }

        self.orders.record_usage(&order.sender, day, request.amount);
        self.orders.insert(order.clone());
        self.stats.orders_processed += 1;

        self.emit(
            Event::new(EventKind::MoneyOrderCreated, self.block.height)
                .attr("order_id", &order.order_id)
                .attr("reference", &order.reference_number)
                .attr("sender", &order.sender)
                .attr("receiver", &order.receiver)
                .attr("amount", &order.amount)
                .attr("fee", fee)
                .attr("delivery", order.delivery.as_str()),
        );
        if order.status == OrderStatus::Completed {
            self.distribute_collected(&order.amount.denom, fee);
            self.emit_order_event(EventKind::MoneyOrderCompleted, &order);
        }
        info!(
            order_id = %order.order_id,
            reference = %order.reference_number,
            status = order.status.as_str(),
            amount = request.amount,
            fee,
            "money order created"
        );
        Ok(order)
    }

    /// Cancel a pending order and return its escrow. Only the sender may cancel.
    pub fn cancel_money_order(&mut self, sender: &str, order_id: &str) -> Result<MoneyOrder> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        if order.sender != sender {
            return Err(EngineError::Unauthorized(format!(
                "{sender} did not send order {order_id}"
            )));
        }
        if order.status != OrderStatus::Pending {
            return Err(EngineError::InvalidStatusTransition {
                id: order_id.to_string(),
                from: order.status.as_str(),
                to: OrderStatus::Cancelled.as_str(),
            });
        }

        self.release_escrow(order_id)?;
        let now = self.block.time;
        let order = self.orders.get_mut(order_id)?;
        order.finish(OrderStatus::Cancelled, now)?;
        let order = order.clone();
        self.orders.release_usage(&order);

        self.stats.orders_processed += 1;
        self.emit_order_event(EventKind::MoneyOrderCancelled, &order);
        info!(order_id, "money order cancelled");
        Ok(order)
    }

    /// Settle one bulk item as an immediate order priced at the bulk fee
    /// class. The business account's limits stand in for the daily limit.
    pub(crate) fn settle_bulk_item(
        &mut self,
        sender: &str,
        receiver: &str,
        amount: &Coin,
        note: &str,
    ) -> Result<MoneyOrder> {
        self.validate_account(receiver)?;
        let discounts = DiscountContext {
            festival: self.festival_active,
            village_member: self.is_village_member(sender),
            senior_citizen: false,
            cultural_token: is_cultural_token(&amount.denom),
        };
        let fee = money_order_fee(&self.params, amount.amount, FeeClass::Bulk, &discounts)?;
        let total = amount.amount.checked_add(fee).ok_or(EngineError::Overflow)?;
        self.ensure_balance(sender, &amount.denom, total)?;

        let mut order = self.draft_receipt(
            sender,
            (receiver.to_string(), None),
            amount.clone(),
            (fee, FeeClass::Bulk),
            DeliveryType::Normal,
            note.to_string(),
            (None, self.block.time.saturating_add(ORDER_EXPIRY_SECS)),
        );
        self.pay_out_direct(&order)?;
        order.finish(OrderStatus::Completed, self.block.time)?;
        self.orders.insert(order.clone());
        self.stats.orders_processed += 1;
        self.distribute_collected(&amount.denom, fee);
        self.emit_order_event(EventKind::MoneyOrderCompleted, &order);
        Ok(order)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn money_order(&self, order_id: &str) -> Option<&MoneyOrder> {
        self.orders.get(order_id)
    }

    pub fn money_order_by_reference(&self, reference: &str) -> Option<&MoneyOrder> {
        self.orders.by_reference(reference)
    }

    pub fn orders_by_sender(&self, sender: &str) -> Vec<&MoneyOrder> {
        self.orders.by_sender(sender)
    }

    pub fn order_stats(&self) -> OrderStats {
        let mut stats = OrderStats::default();
        for order in self.orders.iter() {
            stats.total_orders += 1;
            *stats.by_status.entry(order.status.as_str()).or_insert(0) += 1;
            if order.status == OrderStatus::Completed {
                stats.total_volume += order.amount.amount as u128;
                stats.total_fees += order.fee as u128;
            }
        }
        stats
    }

    // ========================================================================
    // Block hooks
    // ========================================================================

    /// Expire pending orders whose `expires_at` has passed, refunding escrow.
    pub(crate) fn sweep_expired_orders(&mut self) {
        let now = self.block.time;
        for order_id in self.orders.pending_ids(|o| o.expires_at <= now) {
            if let Err(err) = self.release_escrow(&order_id) {
                warn!(%order_id, error = %err, "expiry refund failed, will retry");
                continue;
            }
            if let Ok(order) = self.orders.get_mut(&order_id) {
                if order.finish(OrderStatus::Expired, now).is_ok() {
                    let order = order.clone();
                    self.orders.release_usage(&order);
                    self.stats.orders_processed += 1;
                    self.emit_order_event(EventKind::MoneyOrderExpired, &order);
                    info!(%order_id, "money order expired");
                }
            }
        }
    }

    /// Deliver scheduled orders whose time has come.
    ///
    /// A failed delivery refunds the escrow (`REFUNDED`). If the refund fails
    /// too, the order stays `PENDING` and is retried next block.
    pub(crate) fn process_scheduled_orders(&mut self) {
        let now = self.block.time;
        let due = self
            .orders
            .pending_ids(|o| o.scheduled_at.is_some_and(|at| at <= now));

        for order_id in due {
            let Some(order) = self.orders.get(&order_id).cloned() else {
                continue;
            };
            let outcome = match self.pay_out_from_escrow(&order) {
                Ok(()) => OrderStatus::Completed,
                Err(err) => {
                    warn!(%order_id, error = %err, "scheduled delivery failed, refunding");
                    match self.release_escrow(&order_id) {
                        Ok(()) => OrderStatus::Refunded,
                        Err(err) => {
                            warn!(%order_id, error = %err, "refund failed, will retry");
                            continue;
                        }
                    }
                }
            };

            let Ok(stored) = self.orders.get_mut(&order_id) else {
                continue;
            };
            stored.escrowed = false;
            if stored.finish(outcome, now).is_err() {
                continue;
            }
            let stored = stored.clone();
            self.stats.orders_processed += 1;
            if outcome == OrderStatus::Completed {
                self.distribute_collected(&stored.amount.denom, stored.fee);
                self.emit_order_event(EventKind::MoneyOrderCompleted, &stored);
            } else {
                self.orders.release_usage(&stored);
                self.emit_order_event(EventKind::MoneyOrderRefunded, &stored);
            }
            debug!(%order_id, status = outcome.as_str(), "scheduled order processed");
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// A fresh `PENDING` receipt numbered with the next sequence.
    #[allow(clippy::too_many_arguments)]
    fn draft_receipt(
        &self,
        sender: &str,
        (receiver, receiver_vpa): (String, Option<String>),
        amount: Coin,
        (fee, fee_class): (u64, FeeClass),
        delivery: DeliveryType,
        note: String,
        (scheduled_at, expires_at): (Option<u64>, u64),
    ) -> MoneyOrder {
        let now = self.block.time;
        let sequence = self.orders.peek_sequence();
        MoneyOrder {
            order_id: format!("ORD{sequence:010}"),
            reference_number: self.reference_number(sequence),
            sender: sender.to_string(),
            receiver,
            receiver_vpa,
            amount,
            fee,
            fee_class,
            delivery,
            status: OrderStatus::Pending,
            note,
            created_at: now,
            created_height: self.block.height,
            scheduled_at,
            expires_at,
            completed_at: None,
            escrowed: false,
        }
    }

    fn reference_number(&self, sequence: u64) -> String {
        let year = DateTime::from_timestamp(self.block.time as i64, 0)
            .map(|t| t.year())
            .unwrap_or(1970);
        format!("MO-{year}-{}-{sequence:06}", self.region_code)
    }

    fn resolve_receiver(&self, receiver: &str) -> Result<(String, Option<String>)> {
        if self.validate_account(receiver).is_ok() {
            return Ok((receiver.to_string(), None));
        }
        if receiver.contains('@') {
            let account = self
                .vpa
                .resolve(receiver)
                .ok_or_else(|| EngineError::VpaNotFound(receiver.to_string()))?;
            self.validate_account(&account)?;
            return Ok((account, Some(receiver.to_string())));
        }
        Err(EngineError::InvalidAddress(receiver.to_string()))
    }

    /// Sender pays receiver and the fee collector directly.
    fn pay_out_direct(&self, order: &MoneyOrder) -> Result<()> {
        self.ledger.transfer(&order.sender, &order.receiver, &order.amount)?;
        let fee = Coin::new(order.amount.denom.clone(), order.fee);
        if let Err(err) = self
            .ledger
            .transfer_to_module(&order.sender, FEE_COLLECTOR, &fee)
        {
            // undo the principal so the order leaves no trace
            if let Err(undo) = self.ledger.transfer(&order.receiver, &order.sender, &order.amount) {
                warn!(order_id = %order.order_id, error = %undo, "principal reversal failed");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Escrow pays receiver and the fee collector. If the fee leg fails the
    /// principal goes back to escrow, so the order is still whole in escrow.
    fn pay_out_from_escrow(&self, order: &MoneyOrder) -> Result<()> {
        self.ledger
            .transfer_from_module(ESCROW_ACCOUNT, &order.receiver, &order.amount)?;
        let fee = Coin::new(order.amount.denom.clone(), order.fee);
        if let Err(err) = self
            .ledger
            .transfer_from_module(ESCROW_ACCOUNT, FEE_COLLECTOR, &fee)
        {
            if let Err(undo) =
                self.ledger
                    .transfer_to_module(&order.receiver, ESCROW_ACCOUNT, &order.amount)
            {
                warn!(order_id = %order.order_id, error = %undo, "principal reversal failed");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Return `amount + fee` from escrow to the sender.
    fn release_escrow(&mut self, order_id: &str) -> Result<()> {
        let order = self.orders.get_mut(order_id)?;
        if !order.escrowed {
            return Ok(());
        }
        let refund = Coin::new(order.amount.denom.clone(), order.total_debit());
        let sender = order.sender.clone();
        self.ledger
            .transfer_from_module(ESCROW_ACCOUNT, &sender, &refund)?;
        if let Ok(order) = self.orders.get_mut(order_id) {
            order.escrowed = false;
        }
        Ok(())
    }

    fn emit_order_event(&mut self, kind: EventKind, order: &MoneyOrder) {
        self.emit(
            Event::new(kind, self.block.height)
                .attr("order_id", &order.order_id)
                .attr("status", order.status.as_str()),
        );
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{addr, harness};
    use crate::ports::Ledger;

    const NAMO: u64 = 1_000_000;

    #[test]
    fn test_status_machine() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Processing));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Expired));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_normal_order_completes_and_pays_fee() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();

        let order = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 100 * NAMO))
            .unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        // 0.1% base fee, cultural token discount 10%
        assert_eq!(order.fee, 90_000);
        assert_eq!(h.ledger.balance_of(&bob, "unamo").unwrap(), 100 * NAMO);
        assert_eq!(
            h.ledger.balance_of(&alice, "unamo").unwrap(),
            900 * NAMO - 90_000
        );
        assert_eq!(h.ledger.total_supply("unamo"), 1_000 * NAMO as u128);
        assert!(order.reference_number.starts_with("MO-2025-"));
        assert!(order.reference_number.ends_with("-000001"));
    }

    #[test]
    fn test_below_minimum_rejected() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        let err = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 9_999_999))
            .unwrap_err();
        assert!(err.to_string().contains("amount below minimum"));
        assert!(h.engine.orders.is_empty());
    }

    #[test]
    fn test_kyc_required_for_large_orders() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 20_000 * NAMO)).unwrap();
        let request = MoneyOrderRequest::new(&alice, &bob, 10_000 * NAMO);

        assert!(matches!(
            h.engine.create_money_order(request.clone()),
            Err(EngineError::KycRequired(_))
        ));
        assert_eq!(h.ledger.balance_of(&bob, "unamo").unwrap(), 0);

        h.kyc.verify(&alice, 1);
        assert!(h.engine.create_money_order(request).is_ok());
    }

    #[test]
    fn test_daily_limit() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.kyc.verify(&alice, 2);
        h.ledger.mint(&alice, &Coin::new("unamo", 200_000 * NAMO)).unwrap();

        for _ in 0..2 {
            h.engine
                .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50_000 * NAMO))
                .unwrap();
        }
        let err = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 10 * NAMO))
            .unwrap_err();
        assert!(matches!(err, EngineError::DailyLimitExceeded { .. }));
        assert!(err.is_retryable());

        // next calendar day
        h.engine.begin_block(2, h.engine.block.time + SECONDS_PER_DAY);
        assert!(h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 10 * NAMO))
            .is_ok());
    }

    #[test]
    fn test_vpa_resolution() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        h.vpa.register("bob@deshbank", &bob);

        let order = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, "bob@deshbank", 20 * NAMO))
            .unwrap();
        assert_eq!(order.receiver, bob);
        assert_eq!(order.receiver_vpa.as_deref(), Some("bob@deshbank"));

        assert!(matches!(
            h.engine
                .create_money_order(MoneyOrderRequest::new(&alice, "carol@deshbank", 20 * NAMO)),
            Err(EngineError::VpaNotFound(_))
        ));
        assert!(matches!(
            h.engine
                .create_money_order(MoneyOrderRequest::new(&alice, "carol", 20 * NAMO)),
            Err(EngineError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_insufficient_funds() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 20 * NAMO)).unwrap();
        // 20 NAMO plus fee exceeds the balance
        let err = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 20 * NAMO))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_scheduled_order_lifecycle() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        let now = h.engine.block.time;

        assert!(matches!(
            h.engine
                .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO).scheduled(now)),
            Err(EngineError::ScheduleNotInFuture { .. })
        ));

        let order = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO).scheduled(now + 600))
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(
            h.ledger.balance_of(ESCROW_ACCOUNT, "unamo").unwrap(),
            order.total_debit()
        );

        // not yet due
        h.engine.end_block().unwrap();
        assert_eq!(h.engine.money_order(&order.order_id).unwrap().status, OrderStatus::Pending);

        h.engine.begin_block(2, now + 600);
        let receipt = h.engine.end_block().unwrap();
        assert_eq!(receipt.orders_processed, 1);
        let done = h.engine.money_order(&order.order_id).unwrap();
        assert_eq!(done.status, OrderStatus::Completed);
        assert_eq!(h.ledger.balance_of(&bob, "unamo").unwrap(), 50 * NAMO);
        assert_eq!(h.ledger.balance_of(ESCROW_ACCOUNT, "unamo").unwrap(), 0);
    }

    #[test]
    fn test_scheduled_delivery_failure_refunds_on_recovery() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        let now = h.engine.block.time;
        let order = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO).scheduled(now + 60))
            .unwrap();

        // outage: neither delivery nor refund possible, order stays pending
        h.ledger.set_available(false);
        h.engine.begin_block(2, now + 60);
        h.engine.end_block().unwrap();
        assert_eq!(h.engine.money_order(&order.order_id).unwrap().status, OrderStatus::Pending);

        h.ledger.set_available(true);
        h.engine.begin_block(3, now + 120);
        h.engine.end_block().unwrap();
        assert_eq!(h.engine.money_order(&order.order_id).unwrap().status, OrderStatus::Completed);
    }

    #[test]
    fn test_cancel_and_expiry() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        let now = h.engine.block.time;

        let first = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO).scheduled(now + 60))
            .unwrap();
        assert!(matches!(
            h.engine.cancel_money_order(&bob, &first.order_id),
            Err(EngineError::Unauthorized(_))
        ));
        let cancelled = h.engine.cancel_money_order(&alice, &first.order_id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(h.engine.cancel_money_order(&alice, &first.order_id).is_err());

        let second = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO).scheduled(now + 60))
            .unwrap();
        // the host skipped past the expiry window
        h.engine.begin_block(2, second.expires_at);
        h.engine.end_block().unwrap();
        assert_eq!(h.engine.money_order(&second.order_id).unwrap().status, OrderStatus::Expired);
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), 1_000 * NAMO);
        assert_eq!(h.ledger.balance_of(&bob, "unamo").unwrap(), 0);
    }

    #[test]
    fn test_far_future_schedule_rejected() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        let err = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO).scheduled(u64::MAX - 10))
            .unwrap_err();
        assert_eq!(err, EngineError::Overflow);
        assert!(h.engine.orders.is_empty());
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), 1_000 * NAMO);
    }

    #[test]
    fn test_senior_discount_follows_kyc() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();

        // an attested age without verification earns nothing
        h.kyc.attest_senior(&alice);
        let unverified = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO))
            .unwrap();
        assert_eq!(unverified.fee, 45_000);

        h.kyc.verify(&alice, 1);
        let senior = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO))
            .unwrap();
        // cultural token 10% + senior 15%
        assert_eq!(senior.fee, 37_500);
    }

    #[test]
    fn test_failed_fee_leg_keeps_escrow_whole() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        let now = h.engine.block.time;
        let order = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50 * NAMO).scheduled(now + 60))
            .unwrap();

        // escrow is short of the fee, so neither delivery nor refund can finish
        let fee = Coin::new("unamo", order.fee);
        h.ledger.transfer(ESCROW_ACCOUNT, "vault", &fee).unwrap();
        h.engine.begin_block(2, now + 60);
        h.engine.end_block().unwrap();
        let stuck = h.engine.money_order(&order.order_id).unwrap();
        assert_eq!(stuck.status, OrderStatus::Pending);
        assert!(stuck.escrowed);
        assert_eq!(h.ledger.balance_of(&bob, "unamo").unwrap(), 0);
        assert_eq!(h.ledger.balance_of(ESCROW_ACCOUNT, "unamo").unwrap(), 50 * NAMO);

        h.ledger.transfer("vault", ESCROW_ACCOUNT, &fee).unwrap();
        h.engine.begin_block(3, now + 120);
        h.engine.end_block().unwrap();
        assert_eq!(h.engine.money_order(&order.order_id).unwrap().status, OrderStatus::Completed);
        assert_eq!(h.ledger.balance_of(&bob, "unamo").unwrap(), 50 * NAMO);
        assert_eq!(h.ledger.balance_of(ESCROW_ACCOUNT, "unamo").unwrap(), 0);
    }

    #[test]
    fn test_cancel_releases_daily_limit() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.kyc.verify(&alice, 2);
        h.ledger.mint(&alice, &Coin::new("unamo", 200_000 * NAMO)).unwrap();
        let now = h.engine.block.time;

        let scheduled = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50_000 * NAMO).scheduled(now + 60))
            .unwrap();
        h.engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 50_000 * NAMO))
            .unwrap();
        let request = MoneyOrderRequest::new(&alice, &bob, 50_000 * NAMO);
        assert!(matches!(
            h.engine.create_money_order(request.clone()),
            Err(EngineError::DailyLimitExceeded { .. })
        ));

        h.engine.cancel_money_order(&alice, &scheduled.order_id).unwrap();
        assert!(h.engine.create_money_order(request).is_ok());
    }

    #[test]
    fn test_note_length_counts_characters() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();

        let note = "₹".repeat(MAX_NOTE_LEN);
        assert!(h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 10 * NAMO).with_note(&note))
            .is_ok());
        let err = h
            .engine
            .create_money_order(
                MoneyOrderRequest::new(&alice, &bob, 10 * NAMO).with_note(&format!("{note}₹")),
            )
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::MemoTooLong {
                len: MAX_NOTE_LEN + 1,
                max: MAX_NOTE_LEN
            }
        );
    }

    #[test]
    fn test_queries_and_stats() {
        let mut h = harness();
        let (alice, bob) = (addr("alice"), addr("bob"));
        h.ledger.mint(&alice, &Coin::new("unamo", 1_000 * NAMO)).unwrap();
        let order = h
            .engine
            .create_money_order(MoneyOrderRequest::new(&alice, &bob, 10 * NAMO).instant())
            .unwrap();

        assert_eq!(
            h.engine
                .money_order_by_reference(&order.reference_number)
                .unwrap()
                .order_id,
            order.order_id
        );
        assert_eq!(h.engine.orders_by_sender(&alice).len(), 1);
        let stats = h.engine.order_stats();
        assert_eq!(stats.total_orders, 1);
        assert_eq!(stats.by_status["COMPLETED"], 1);
        assert_eq!(stats.total_volume, 10 * NAMO as u128);
    }
}
