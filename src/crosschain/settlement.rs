//! Settlement handlers for outbound and inbound transfers.
//!
//! ## Escrow
//!
//! `amount + fees` move into `moneyorder_escrow` before the `TRANSFER` packet
//! is dispatched. Fees leave escrow at dispatch; the amount stays until the
//! transfer either completes (escrow -> bridge reserve) or fails, times out
//! or is refunded (escrow -> sender, exactly once).
//!
//! ## Idempotence
//!
//! Ledger movement happens before the status transition, and each handler
//! first checks whether the transition is still legal. A handler that runs
//! twice finds the order already advanced and returns without side effects.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::channel::{ChannelMetadata, ChannelState};
use super::packet::{Acknowledgement, Packet, PacketData, PacketType};
use super::state::{
    CrossChainFees, CrossChainOrder, CrossChainStatus, TimelineEntry, TransferDirection,
};
use super::ChannelInfo;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventKind};
use crate::ports::{BRIDGE_RESERVE, ESCROW_ACCOUNT, FEE_COLLECTOR, RELAYER_POOL};
use crate::types::amount::mul_rate;
use crate::types::{validate_denom, Coin};

/// Input to [`Engine::send_cross_chain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainTransfer {
    pub sender: String,
    /// Address on the destination chain, not validated locally
    pub recipient: String,
    pub amount: Coin,
    pub destination_chain: String,
    pub memo: String,
    /// Zero means no height deadline
    pub timeout_height: u64,
    /// Zero means `now + default_timeout_secs`
    pub timeout_timestamp: u64,
}

impl Engine {
    // ========================================================================
    // Channels
    // ========================================================================

    pub fn open_channel(
        &mut self,
        channel_id: &str,
        counterparty_chain: &str,
        version: &str,
        metadata: ChannelMetadata,
    ) -> Result<()> {
        let now = self.block.time;
        self.cross_chain
            .channels
            .open(channel_id, counterparty_chain, version, metadata, now)?;
        self.emit(
            Event::new(EventKind::ChannelOpened, self.block.height)
                .attr("channel_id", channel_id)
                .attr("counterparty_chain", counterparty_chain),
        );
        info!(channel_id, counterparty_chain, "channel opened");
        Ok(())
    }

    /// Close a channel and fail every in-flight outbound order on it, with a
    /// refund. Returns the number of orders failed.
    pub fn close_channel(&mut self, channel_id: &str) -> Result<usize> {
        self.cross_chain.channels.get_mut(channel_id)?.state = ChannelState::Closing;

        let in_flight: Vec<String> = self
            .cross_chain
            .orders
            .values()
            .filter(|o| {
                o.channel_id == channel_id
                    && o.direction == TransferDirection::Outbound
                    && o.status.is_in_flight()
            })
            .map(|o| o.order_id.clone())
            .collect();

        let mut failed = 0;
        for order_id in in_flight {
            match self.refund_and_close(&order_id, CrossChainStatus::Failed) {
                Ok(_) => failed += 1,
                Err(err) => warn!(%order_id, error = %err, "refund on channel close failed"),
            }
        }

        self.cross_chain.channels.get_mut(channel_id)?.state = ChannelState::Closed;
        self.emit(
            Event::new(EventKind::ChannelClosed, self.block.height)
                .attr("channel_id", channel_id)
                .attr("orders_failed", failed),
        );
        info!(channel_id, failed, "channel closed");
        Ok(failed)
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Escrow, dispatch and record an outbound transfer.
    ///
    /// # Returns
    ///
    /// The order in `SENT`, carrying the sequence assigned by the transport.
    ///
    /// # Errors
    ///
    /// A dispatch failure returns the escrow and persists nothing.
    pub fn send_cross_chain(&mut self, transfer: CrossChainTransfer) -> Result<CrossChainOrder> {
        let now = self.block.time;
        let height = self.block.height;
        self.validate_account(&transfer.sender)?;
        validate_denom(&transfer.amount.denom)?;
        if transfer.amount.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        if transfer.recipient.trim().is_empty() {
            return Err(EngineError::InvalidAddress(transfer.recipient.clone()));
        }
        let max_memo = self.params.cross_chain.max_memo_len;
        let memo_len = transfer.memo.chars().count();
        if memo_len > max_memo {
            return Err(EngineError::MemoTooLong {
                len: memo_len,
                max: max_memo,
            });
        }

        let channel = self
            .cross_chain
            .channels
            .for_chain(&transfer.destination_chain)?;
        check_channel_bounds(channel, transfer.amount.amount)?;
        let channel_id = channel.channel_id.clone();
        let fees = self.cross_chain_fees(channel, transfer.amount.amount)?;

        let escrow_total = transfer
            .amount
            .amount
            .checked_add(fees.total())
            .ok_or(EngineError::Overflow)?;
        let denom = transfer.amount.denom.clone();
        self.ensure_balance(&transfer.sender, &denom, escrow_total)?;

        let sequence_hint = self.cross_chain.next_sequence;
        let order_id = format!("XC-{}-{}", transfer.destination_chain, sequence_hint);
        let timeout_timestamp = match transfer.timeout_timestamp {
            0 => now
                .checked_add(self.params.cross_chain.default_timeout_secs)
                .ok_or(EngineError::Overflow)?,
            t => t,
        };

        let data = PacketData {
            packet_type: PacketType::Transfer,
            order_id: order_id.clone(),
            sender: transfer.sender.clone(),
            recipient: transfer.recipient.clone(),
            amount: transfer.amount.amount,
            denom: denom.clone(),
            source_chain: self.chain_id.clone(),
            destination_chain: transfer.destination_chain.clone(),
            memo: transfer.memo.clone(),
            timestamp: now,
        };
        let packet = Packet {
            sequence: 0,
            source_channel: channel_id.clone(),
            destination_channel: channel_id.clone(),
            data: data.to_bytes()?,
            timeout_height: transfer.timeout_height,
            timeout_timestamp,
        };

        // escrow before dispatch
        let escrow = Coin::new(denom.clone(), escrow_total);
        self.ledger
            .transfer_to_module(&transfer.sender, ESCROW_ACCOUNT, &escrow)?;

        let sequence = match self.transport.send_packet(&packet) {
            Ok(sequence) => sequence,
            Err(err) => {
                if let Err(undo) =
                    self.ledger
                        .transfer_from_module(ESCROW_ACCOUNT, &transfer.sender, &escrow)
                {
                    warn!(%order_id, error = %undo, "escrow return after failed dispatch failed");
                }
                warn!(%order_id, error = %err, "transfer packet dispatch failed");
                return Err(err);
            }
        };
        self.cross_chain.next_sequence += 1;

        let mut order = CrossChainOrder {
            order_id: order_id.clone(),
            direction: TransferDirection::Outbound,
            sender: transfer.sender,
            recipient: transfer.recipient,
            amount: transfer.amount,
            source_chain: self.chain_id.clone(),
            destination_chain: transfer.destination_chain,
            channel_id: channel_id.clone(),
            status: CrossChainStatus::Pending,
            fees,
            timeout_height: transfer.timeout_height,
            timeout_timestamp,
            sequence,
            memo: transfer.memo,
            refunded: false,
            created_at: now,
            updated_at: now,
            timeline: vec![TimelineEntry {
                status: CrossChainStatus::Pending,
                height,
                time: now,
            }],
        };
        order.transition(CrossChainStatus::Sent, height, now)?;

        self.collect_cross_chain_fees(&order);

        if let Ok(channel) = self.cross_chain.channels.get_mut(&channel_id) {
            channel.metrics.packets_sent += 1;
            channel.metrics.total_volume += order.amount.amount as u128;
        }
        self.cross_chain
            .by_packet
            .insert((channel_id.clone(), sequence), order_id.clone());
        self.cross_chain.orders.insert(order_id.clone(), order.clone());
        self.stats.cross_chain_transitions += 1;

        self.emit(
            Event::new(EventKind::CrossChainSent, height)
                .attr("order_id", &order_id)
                .attr("channel_id", &channel_id)
                .attr("sequence", sequence)
                .attr("amount", &order.amount)
                .attr("total_fee", order.fees.total()),
        );
        info!(
            %order_id,
            %channel_id,
            sequence,
            amount = %order.amount,
            "cross-chain transfer sent"
        );
        Ok(order)
    }

    /// Handle the counterparty's acknowledgement of a `TRANSFER` packet.
    pub fn on_acknowledgement(
        &mut self,
        channel_id: &str,
        sequence: u64,
        ack: &Acknowledgement,
    ) -> Result<CrossChainStatus> {
        let order_id = self.outbound_order_id(channel_id, sequence)?;
        let status = self.cross_chain_order_or_err(&order_id)?.status;

        if ack.success {
            if status != CrossChainStatus::Sent {
                debug!(%order_id, status = status.as_str(), "duplicate success ack ignored");
                return Ok(status);
            }
            self.bump_metrics(channel_id, |m| m.acks_succeeded += 1);
            self.advance(&order_id, CrossChainStatus::Received)?;
            return Ok(CrossChainStatus::Received);
        }

        if !status.is_in_flight() {
            debug!(%order_id, status = status.as_str(), "error ack on settled order ignored");
            return Ok(status);
        }
        warn!(
            %order_id,
            error = ack.error.as_deref().unwrap_or("unknown"),
            "transfer rejected by counterparty"
        );
        self.bump_metrics(channel_id, |m| m.acks_failed += 1);
        self.refund_and_close(&order_id, CrossChainStatus::Failed)
    }

    /// Handle a packet timeout. The deadline must actually have passed.
    pub fn on_timeout(&mut self, channel_id: &str, sequence: u64) -> Result<CrossChainStatus> {
        let order_id = self.outbound_order_id(channel_id, sequence)?;
        let order = self.cross_chain_order_or_err(&order_id)?;
        if !order.status.is_in_flight() {
            debug!(%order_id, status = order.status.as_str(), "timeout on settled order ignored");
            return Ok(order.status);
        }
        if !order.timeout_elapsed(self.block.height, self.block.time) {
            return Err(EngineError::TimeoutNotReached(order_id));
        }
        self.bump_metrics(channel_id, |m| m.timeouts += 1);
        self.refund_and_close(&order_id, CrossChainStatus::Timeout)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Handle a packet from the counterparty. Failures become error acks.
    pub fn on_recv_packet(&mut self, channel_id: &str, packet: &Packet) -> Acknowledgement {
        let open = self
            .cross_chain
            .channels
            .get(channel_id)
            .and_then(|c| c.ensure_open());
        if let Err(err) = open {
            return Acknowledgement::error(err.to_string());
        }
        let data = match PacketData::from_bytes(&packet.data) {
            Ok(data) => data,
            Err(err) => {
                warn!(channel_id, sequence = packet.sequence, error = %err, "malformed packet");
                return Acknowledgement::error(err.to_string());
            }
        };
        self.bump_metrics(channel_id, |m| m.packets_received += 1);

        let outcome = match data.packet_type {
            PacketType::Transfer => self.receive_transfer(channel_id, packet, &data),
            PacketType::Confirmation => self.receive_confirmation(channel_id, &data.order_id),
            PacketType::Refund => self.receive_refund(channel_id, &data.order_id),
            PacketType::Query => self
                .order_on_channel(channel_id, &data.order_id)
                .map(|o| o.status.as_str().to_string()),
        };
        match outcome {
            Ok(result) => Acknowledgement::success(data.order_id, result),
            Err(err) => {
                debug!(
                    channel_id,
                    packet_type = data.packet_type.as_str(),
                    error = %err,
                    "packet rejected"
                );
                Acknowledgement::error(err.to_string())
            }
        }
    }

    /// Recipient-side confirmation of an inbound transfer. Dispatches a
    /// `CONFIRMATION` packet and completes the inbound order.
    pub fn confirm_inbound(&mut self, recipient: &str, order_id: &str) -> Result<CrossChainOrder> {
        let order = self.cross_chain_order_or_err(order_id)?.clone();
        if order.direction != TransferDirection::Inbound {
            return Err(EngineError::InvalidPacket(format!(
                "{order_id} is not an inbound transfer"
            )));
        }
        if order.recipient != recipient {
            return Err(EngineError::Unauthorized(format!(
                "{recipient} is not the recipient of {order_id}"
            )));
        }
        if order.status == CrossChainStatus::Completed {
            return Ok(order);
        }
        if !order.status.can_transition_to(CrossChainStatus::Confirmed) {
            return Err(EngineError::InvalidStatusTransition {
                id: order_id.to_string(),
                from: order.status.as_str(),
                to: CrossChainStatus::Confirmed.as_str(),
            });
        }
        self.cross_chain
            .channels
            .get(&order.channel_id)?
            .ensure_open()?;

        let data = PacketData {
            packet_type: PacketType::Confirmation,
            order_id: order_id.to_string(),
            sender: order.sender.clone(),
            recipient: order.recipient.clone(),
            amount: order.amount.amount,
            denom: order.amount.denom.clone(),
            source_chain: self.chain_id.clone(),
            destination_chain: order.source_chain.clone(),
            memo: String::new(),
            timestamp: self.block.time,
        };
        let timeout_timestamp = self
            .block
            .time
            .checked_add(self.params.cross_chain.default_timeout_secs)
            .ok_or(EngineError::Overflow)?;
        let packet = Packet {
            sequence: 0,
            source_channel: order.channel_id.clone(),
            destination_channel: order.channel_id.clone(),
            data: data.to_bytes()?,
            timeout_height: 0,
            timeout_timestamp,
        };
        self.transport.send_packet(&packet)?;
        self.bump_metrics(&order.channel_id, |m| m.packets_sent += 1);

        self.advance(order_id, CrossChainStatus::Confirmed)?;
        self.advance(order_id, CrossChainStatus::Completed)?;
        info!(order_id, "inbound transfer confirmed");
        Ok(self.cross_chain_order_or_err(order_id)?.clone())
    }

    fn receive_transfer(
        &mut self,
        channel_id: &str,
        packet: &Packet,
        data: &PacketData,
    ) -> Result<String> {
        let key = (channel_id.to_string(), packet.sequence);
        if let Some(existing) = self.cross_chain.inbound_by_packet.get(&key) {
            debug!(order_id = %existing, "redelivered transfer acknowledged again");
            return Ok(CrossChainStatus::Received.as_str().to_string());
        }
        if self.cross_chain.orders.contains_key(&data.order_id) {
            return Err(EngineError::InvalidPacket(format!(
                "order id {} already in use",
                data.order_id
            )));
        }
        self.validate_account(&data.recipient)?;
        validate_denom(&data.denom)?;

        let amount = Coin::new(data.denom.clone(), data.amount);
        self.ledger
            .transfer_from_module(BRIDGE_RESERVE, &data.recipient, &amount)?;

        let (height, now) = (self.block.height, self.block.time);
        let order = CrossChainOrder {
            order_id: data.order_id.clone(),
            direction: TransferDirection::Inbound,
            sender: data.sender.clone(),
            recipient: data.recipient.clone(),
            amount,
            source_chain: data.source_chain.clone(),
            destination_chain: data.destination_chain.clone(),
            channel_id: channel_id.to_string(),
            status: CrossChainStatus::Received,
            fees: CrossChainFees::default(),
            timeout_height: packet.timeout_height,
            timeout_timestamp: packet.timeout_timestamp,
            sequence: packet.sequence,
            memo: data.memo.clone(),
            refunded: false,
            created_at: now,
            updated_at: now,
            timeline: vec![TimelineEntry {
                status: CrossChainStatus::Received,
                height,
                time: now,
            }],
        };
        self.cross_chain.inbound_by_packet.insert(key, order.order_id.clone());
        self.cross_chain.orders.insert(order.order_id.clone(), order.clone());
        self.stats.cross_chain_transitions += 1;
        self.emit(
            Event::new(EventKind::InboundTransferReceived, height)
                .attr("order_id", &order.order_id)
                .attr("channel_id", channel_id)
                .attr("recipient", &order.recipient)
                .attr("amount", &order.amount),
        );
        info!(order_id = %order.order_id, amount = %order.amount, "inbound transfer credited");
        Ok(CrossChainStatus::Received.as_str().to_string())
    }

    /// Complete an outbound order; the escrowed amount moves to the bridge
    /// reserve backing the counterparty's credit.
    fn receive_confirmation(&mut self, channel_id: &str, order_id: &str) -> Result<String> {
        let order = self.order_on_channel(channel_id, order_id)?;
        match order.status {
            CrossChainStatus::Completed => return Ok(order.status.as_str().to_string()),
            CrossChainStatus::Sent | CrossChainStatus::Received | CrossChainStatus::Confirmed => {}
            other => {
                return Err(EngineError::InvalidStatusTransition {
                    id: order_id.to_string(),
                    from: other.as_str(),
                    to: CrossChainStatus::Completed.as_str(),
                })
            }
        }
        if order.direction != TransferDirection::Outbound {
            return Err(EngineError::InvalidPacket(format!(
                "{order_id} is not an outbound transfer"
            )));
        }
        let amount = order.amount.clone();
        self.ledger
            .transfer_from_module(ESCROW_ACCOUNT, BRIDGE_RESERVE, &amount)?;

        for next in [
            CrossChainStatus::Received,
            CrossChainStatus::Confirmed,
            CrossChainStatus::Completed,
        ] {
            let current = self.cross_chain_order_or_err(order_id)?.status;
            if current.can_transition_to(next) {
                self.advance(order_id, next)?;
            }
        }
        info!(order_id, "cross-chain transfer completed");
        Ok(CrossChainStatus::Completed.as_str().to_string())
    }

    /// Counterparty-initiated refund. Only an order the counterparty has not
    /// yet acknowledged can be refunded; after a success ack the remote side
    /// holds the credit and the escrow backs it.
    fn receive_refund(&mut self, channel_id: &str, order_id: &str) -> Result<String> {
        let order = self.order_on_channel(channel_id, order_id)?;
        match order.status {
            CrossChainStatus::Refunded => return Ok(order.status.as_str().to_string()),
            CrossChainStatus::Sent => {}
            other => {
                return Err(EngineError::InvalidStatusTransition {
                    id: order_id.to_string(),
                    from: other.as_str(),
                    to: CrossChainStatus::Refunded.as_str(),
                })
            }
        }
        self.refund_and_close(order_id, CrossChainStatus::Refunded)
            .map(|s| s.as_str().to_string())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn cross_chain_order(&self, order_id: &str) -> Option<&CrossChainOrder> {
        self.cross_chain.order(order_id)
    }

    pub fn cross_chain_status(&self, order_id: &str) -> Result<(CrossChainStatus, CrossChainFees)> {
        let order = self.cross_chain_order_or_err(order_id)?;
        Ok((order.status, order.fees))
    }

    pub fn channel(&self, channel_id: &str) -> Result<&ChannelInfo> {
        self.cross_chain.channels.get(channel_id)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn cross_chain_fees(&self, channel: &ChannelInfo, amount: u64) -> Result<CrossChainFees> {
        let params = &self.params.cross_chain;
        Ok(CrossChainFees {
            base: channel.metadata.base_fee.unwrap_or(params.base_fee),
            relayer: mul_rate(amount, params.relayer_fee_rate).ok_or(EngineError::Overflow)?,
            protocol: mul_rate(amount, params.protocol_fee_rate).ok_or(EngineError::Overflow)?,
        })
    }

    /// Move dispatch fees out of escrow: relayer fee to the relayer pool,
    /// base and protocol fees through the fee buckets.
    fn collect_cross_chain_fees(&mut self, order: &CrossChainOrder) {
        let denom = &order.amount.denom;
        let relayer = Coin::new(denom.clone(), order.fees.relayer);
        if let Err(err) = self
            .ledger
            .transfer_from_module(ESCROW_ACCOUNT, RELAYER_POOL, &relayer)
        {
            warn!(order_id = %order.order_id, error = %err, "relayer fee left in escrow");
        }
        let protocol_total = order.fees.base + order.fees.protocol;
        let protocol = Coin::new(denom.clone(), protocol_total);
        match self
            .ledger
            .transfer_from_module(ESCROW_ACCOUNT, FEE_COLLECTOR, &protocol)
        {
            Ok(()) => {
                self.distribute_collected(denom, protocol_total);
            }
            Err(err) => {
                warn!(order_id = %order.order_id, error = %err, "protocol fee left in escrow")
            }
        }
    }

    fn outbound_order_id(&self, channel_id: &str, sequence: u64) -> Result<String> {
        self.cross_chain
            .by_packet
            .get(&(channel_id.to_string(), sequence))
            .cloned()
            .ok_or_else(|| EngineError::PacketNotFound {
                channel: channel_id.to_string(),
                sequence,
            })
    }

    fn cross_chain_order_or_err(&self, order_id: &str) -> Result<&CrossChainOrder> {
        self.cross_chain
            .orders
            .get(order_id)
            .ok_or_else(|| EngineError::CrossChainOrderNotFound(order_id.to_string()))
    }

    /// The order a counterparty packet refers to. Packets only address
    /// orders that travel over the channel they arrive on.
    fn order_on_channel(&self, channel_id: &str, order_id: &str) -> Result<&CrossChainOrder> {
        let order = self.cross_chain_order_or_err(order_id)?;
        if order.channel_id != channel_id {
            return Err(EngineError::InvalidPacket(format!(
                "{order_id} does not travel over {channel_id}"
            )));
        }
        Ok(order)
    }

    /// Transition one step, counting it and emitting the status event.
    fn advance(&mut self, order_id: &str, next: CrossChainStatus) -> Result<()> {
        let (height, now) = (self.block.height, self.block.time);
        let order = self
            .cross_chain
            .orders
            .get_mut(order_id)
            .ok_or_else(|| EngineError::CrossChainOrderNotFound(order_id.to_string()))?;
        let from = order.status;
        order.transition(next, height, now)?;
        self.stats.cross_chain_transitions += 1;
        self.emit(
            Event::new(EventKind::CrossChainStatusChanged, height)
                .attr("order_id", order_id)
                .attr("from", from)
                .attr("to", next),
        );
        debug!(order_id, from = from.as_str(), to = next.as_str(), "cross-chain status changed");
        Ok(())
    }

    /// Return the escrowed amount to the sender and move to `terminal`.
    ///
    /// A no-op returning the current status when the order can no longer
    /// take that exit. If the refund transfer fails the order is unchanged
    /// and the handler may be retried.
    fn refund_and_close(
        &mut self,
        order_id: &str,
        terminal: CrossChainStatus,
    ) -> Result<CrossChainStatus> {
        let order = self.cross_chain_order_or_err(order_id)?;
        if !order.status.can_transition_to(terminal) {
            return Ok(order.status);
        }
        if order.direction != TransferDirection::Outbound {
            return Err(EngineError::InvalidPacket(format!(
                "{order_id} holds no local escrow"
            )));
        }

        if !order.refunded {
            let (sender, amount, channel_id) =
                (order.sender.clone(), order.amount.clone(), order.channel_id.clone());
            self.ledger
                .transfer_from_module(ESCROW_ACCOUNT, &sender, &amount)?;
            if let Some(order) = self.cross_chain.orders.get_mut(order_id) {
                order.refunded = true;
            }
            self.bump_metrics(&channel_id, |m| m.refunds += 1);
            self.emit(
                Event::new(EventKind::CrossChainRefunded, self.block.height)
                    .attr("order_id", order_id)
                    .attr("sender", &sender)
                    .attr("amount", &amount),
            );
            info!(order_id, %amount, reason = terminal.as_str(), "cross-chain escrow refunded");
        }
        self.advance(order_id, terminal)?;
        Ok(terminal)
    }

    fn bump_metrics(&mut self, channel_id: &str, update: impl FnOnce(&mut super::ChannelMetrics)) {
        if let Ok(channel) = self.cross_chain.channels.get_mut(channel_id) {
            update(&mut channel.metrics);
        }
    }
}

fn check_channel_bounds(channel: &ChannelInfo, amount: u64) -> Result<()> {
    let meta = &channel.metadata;
    if meta.min_transfer > 0 && amount < meta.min_transfer {
        return Err(EngineError::OrderAmountTooLow {
            amount,
            min: meta.min_transfer,
        });
    }
    if meta.max_transfer > 0 && amount > meta.max_transfer {
        return Err(EngineError::OrderAmountTooHigh {
            amount,
            max: meta.max_transfer,
        });
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosschain::CHANNEL_VERSION;
    use crate::engine::tests::{addr, harness, Harness};
    use crate::ports::Ledger;

    const AMOUNT: u64 = 1_000_000;

    fn setup() -> (Harness, String) {
        let mut h = harness();
        let alice = addr("alice");
        h.ledger.mint(&alice, &Coin::new("unamo", 10 * AMOUNT)).unwrap();
        h.engine
            .open_channel("channel-0", "osmosis", CHANNEL_VERSION, ChannelMetadata::default())
            .unwrap();
        (h, alice)
    }

    fn transfer(sender: &str) -> CrossChainTransfer {
        CrossChainTransfer {
            sender: sender.to_string(),
            recipient: "osmo1recipient".to_string(),
            amount: Coin::new("unamo", AMOUNT),
            destination_chain: "osmosis".to_string(),
            memo: String::new(),
            timeout_height: 0,
            timeout_timestamp: 0,
        }
    }

    /// A counterparty-originated packet about one of our orders.
    fn counterparty_packet(packet_type: PacketType, order: &CrossChainOrder, channel: &str) -> Packet {
        let data = PacketData {
            packet_type,
            order_id: order.order_id.clone(),
            sender: order.sender.clone(),
            recipient: order.recipient.clone(),
            amount: order.amount.amount,
            denom: order.amount.denom.clone(),
            source_chain: order.destination_chain.clone(),
            destination_chain: "deshchain".into(),
            memo: String::new(),
            timestamp: 0,
        };
        Packet {
            sequence: 11,
            source_channel: channel.into(),
            destination_channel: channel.into(),
            data: data.to_bytes().unwrap(),
            timeout_height: 0,
            timeout_timestamp: 0,
        }
    }

    #[test]
    fn test_send_escrows_and_takes_fees() {
        let (mut h, alice) = setup();
        let order = h.engine.send_cross_chain(transfer(&alice)).unwrap();
        assert_eq!(order.order_id, "XC-osmosis-1");
        assert_eq!(order.status, CrossChainStatus::Sent);
        assert_eq!(order.sequence, 1);
        // base 1_000, relayer 500, protocol 500
        assert_eq!(order.fees.total(), 2_000);
        assert_eq!(h.ledger.balance_of(ESCROW_ACCOUNT, "unamo").unwrap(), AMOUNT);
        assert_eq!(h.ledger.balance_of(RELAYER_POOL, "unamo").unwrap(), 500);
        assert_eq!(
            h.ledger.balance_of(&alice, "unamo").unwrap(),
            9 * AMOUNT - 2_000
        );
        assert_eq!(order.timeout_timestamp, h.engine.block().time + 3_600);

        let packet = h.transport.last_sent().unwrap();
        let data = PacketData::from_bytes(&packet.data).unwrap();
        assert_eq!(data.packet_type, PacketType::Transfer);
        assert_eq!(data.order_id, order.order_id);
    }

    #[test]
    fn test_dispatch_failure_returns_escrow() {
        let (mut h, alice) = setup();
        h.transport.set_offline(true);
        let err = h.engine.send_cross_chain(transfer(&alice)).unwrap_err();
        assert!(matches!(err, EngineError::PacketDispatchFailed(_)));
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), 10 * AMOUNT);
        assert!(h.engine.cross_chain_order("XC-osmosis-1").is_none());
    }

    #[test]
    fn test_no_channel_for_chain() {
        let (mut h, alice) = setup();
        let mut request = transfer(&alice);
        request.destination_chain = "juno".to_string();
        assert!(matches!(
            h.engine.send_cross_chain(request),
            Err(EngineError::NoChannelForChain(_))
        ));
    }

    #[test]
    fn test_error_ack_refunds_once() {
        let (mut h, alice) = setup();
        let order = h.engine.send_cross_chain(transfer(&alice)).unwrap();
        let ack = Acknowledgement::error("recipient blocked");

        let status = h.engine.on_acknowledgement("channel-0", order.sequence, &ack).unwrap();
        assert_eq!(status, CrossChainStatus::Failed);
        let status = h.engine.on_acknowledgement("channel-0", order.sequence, &ack).unwrap();
        assert_eq!(status, CrossChainStatus::Failed);

        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), 10 * AMOUNT - 2_000);
        assert_eq!(h.engine.events().count(EventKind::CrossChainRefunded), 1);
        assert_eq!(h.engine.channel("channel-0").unwrap().metrics.refunds, 1);
    }

    #[test]
    fn test_timeout_must_elapse() {
        let (mut h, alice) = setup();
        let order = h.engine.send_cross_chain(transfer(&alice)).unwrap();
        assert!(matches!(
            h.engine.on_timeout("channel-0", order.sequence),
            Err(EngineError::TimeoutNotReached(_))
        ));

        h.engine.begin_block(2, order.timeout_timestamp);
        assert_eq!(
            h.engine.on_timeout("channel-0", order.sequence).unwrap(),
            CrossChainStatus::Timeout
        );
        assert_eq!(
            h.engine.on_timeout("channel-0", order.sequence).unwrap(),
            CrossChainStatus::Timeout
        );
        assert_eq!(h.ledger.balance_of(ESCROW_ACCOUNT, "unamo").unwrap(), 0);
    }

    #[test]
    fn test_confirmation_completes_and_blocks_timeout() {
        let (mut h, alice) = setup();
        let order = h.engine.send_cross_chain(transfer(&alice)).unwrap();
        h.engine
            .on_acknowledgement("channel-0", order.sequence, &Acknowledgement::success(&order.order_id, "RECEIVED"))
            .unwrap();

        let confirmation = PacketData {
            packet_type: PacketType::Confirmation,
            order_id: order.order_id.clone(),
            sender: alice.clone(),
            recipient: order.recipient.clone(),
            amount: AMOUNT,
            denom: "unamo".into(),
            source_chain: "osmosis".into(),
            destination_chain: "deshchain".into(),
            memo: String::new(),
            timestamp: 0,
        };
        let packet = Packet {
            sequence: 7,
            source_channel: "channel-0".into(),
            destination_channel: "channel-0".into(),
            data: confirmation.to_bytes().unwrap(),
            timeout_height: 0,
            timeout_timestamp: 0,
        };
        let ack = h.engine.on_recv_packet("channel-0", &packet);
        assert!(ack.success, "{ack:?}");

        let done = h.engine.cross_chain_order(&order.order_id).unwrap();
        assert_eq!(done.status, CrossChainStatus::Completed);
        let statuses: Vec<_> = done.timeline.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                CrossChainStatus::Pending,
                CrossChainStatus::Sent,
                CrossChainStatus::Received,
                CrossChainStatus::Confirmed,
                CrossChainStatus::Completed,
            ]
        );
        assert_eq!(h.ledger.balance_of(BRIDGE_RESERVE, "unamo").unwrap(), AMOUNT);

        // a late timeout is a no-op
        h.engine.begin_block(9, order.timeout_timestamp + 1);
        assert_eq!(
            h.engine.on_timeout("channel-0", order.sequence).unwrap(),
            CrossChainStatus::Completed
        );
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), 9 * AMOUNT - 2_000);
    }

    #[test]
    fn test_remote_refund_only_on_own_channel() {
        let (mut h, alice) = setup();
        h.engine
            .open_channel("channel-1", "juno", CHANNEL_VERSION, ChannelMetadata::default())
            .unwrap();
        let order = h.engine.send_cross_chain(transfer(&alice)).unwrap();
        let after_send = h.ledger.balance_of(&alice, "unamo").unwrap();

        let foreign = counterparty_packet(PacketType::Refund, &order, "channel-1");
        assert!(!h.engine.on_recv_packet("channel-1", &foreign).success);
        let confirm = counterparty_packet(PacketType::Confirmation, &order, "channel-1");
        assert!(!h.engine.on_recv_packet("channel-1", &confirm).success);
        assert_eq!(
            h.engine.cross_chain_status(&order.order_id).unwrap().0,
            CrossChainStatus::Sent
        );
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), after_send);

        let refund = counterparty_packet(PacketType::Refund, &order, "channel-0");
        for _ in 0..2 {
            let ack = h.engine.on_recv_packet("channel-0", &refund);
            assert!(ack.success, "{ack:?}");
        }
        assert_eq!(
            h.engine.cross_chain_status(&order.order_id).unwrap().0,
            CrossChainStatus::Refunded
        );
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), after_send + AMOUNT);
        assert_eq!(h.engine.events().count(EventKind::CrossChainRefunded), 1);
    }

    #[test]
    fn test_remote_refund_after_success_ack_rejected() {
        let (mut h, alice) = setup();
        let order = h.engine.send_cross_chain(transfer(&alice)).unwrap();
        h.engine
            .on_acknowledgement("channel-0", order.sequence, &Acknowledgement::success(&order.order_id, "RECEIVED"))
            .unwrap();
        let after_send = h.ledger.balance_of(&alice, "unamo").unwrap();

        let refund = counterparty_packet(PacketType::Refund, &order, "channel-0");
        assert!(!h.engine.on_recv_packet("channel-0", &refund).success);
        assert_eq!(
            h.engine.cross_chain_status(&order.order_id).unwrap().0,
            CrossChainStatus::Received
        );
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), after_send);
        assert_eq!(h.ledger.balance_of(ESCROW_ACCOUNT, "unamo").unwrap(), AMOUNT);
    }

    #[test]
    fn test_default_timeout_overflow_rejected() {
        let (mut h, alice) = setup();
        h.engine.begin_block(2, u64::MAX - 10);
        assert_eq!(
            h.engine.send_cross_chain(transfer(&alice)).unwrap_err(),
            EngineError::Overflow
        );
        assert_eq!(h.ledger.balance_of(&alice, "unamo").unwrap(), 10 * AMOUNT);
        assert!(h.transport.sent().is_empty());
    }

    #[test]
    fn test_inbound_transfer_credit_is_idempotent() {
        let (mut h, _) = setup();
        let bob = addr("bob");
        h.ledger.mint(BRIDGE_RESERVE, &Coin::new("unamo", 5 * AMOUNT)).unwrap();
        let data = PacketData {
            packet_type: PacketType::Transfer,
            order_id: "XC-deshchain-42".into(),
            sender: "osmo1sender".into(),
            recipient: bob.clone(),
            amount: AMOUNT,
            denom: "unamo".into(),
            source_chain: "osmosis".into(),
            destination_chain: "deshchain".into(),
            memo: String::new(),
            timestamp: 0,
        };
        let packet = Packet {
            sequence: 3,
            source_channel: "channel-0".into(),
            destination_channel: "channel-0".into(),
            data: data.to_bytes().unwrap(),
            timeout_height: 0,
            timeout_timestamp: 0,
        };

        assert!(h.engine.on_recv_packet("channel-0", &packet).success);
        assert!(h.engine.on_recv_packet("channel-0", &packet).success);
        assert_eq!(h.ledger.balance_of(&bob, "unamo").unwrap(), AMOUNT);

        let confirmed = h.engine.confirm_inbound(&bob, "XC-deshchain-42").unwrap();
        assert_eq!(confirmed.status, CrossChainStatus::Completed);
        let sent = h.transport.last_sent().unwrap();
        let data = PacketData::from_bytes(&sent.data).unwrap();
        assert_eq!(data.packet_type, PacketType::Confirmation);
    }

    #[test]
    fn test_malformed_packet_gets_error_ack() {
        let (mut h, _) = setup();
        let packet = Packet {
            sequence: 1,
            source_channel: "channel-0".into(),
            destination_channel: "channel-0".into(),
            data: b"{}".to_vec(),
            timeout_height: 0,
            timeout_timestamp: 0,
        };
        let ack = h.engine.on_recv_packet("channel-0", &packet);
        assert!(!ack.success);
        assert!(!h.engine.on_recv_packet("channel-9", &packet).success);
    }

    #[test]
    fn test_close_channel_fails_in_flight() {
        let (mut h, alice) = setup();
        let order = h.engine.send_cross_chain(transfer(&alice)).unwrap();
        assert_eq!(h.engine.close_channel("channel-0").unwrap(), 1);
        assert_eq!(
            h.engine.cross_chain_status(&order.order_id).unwrap().0,
            CrossChainStatus::Failed
        );
        assert!(!h.engine.channel("channel-0").unwrap().is_open());
        assert!(matches!(
            h.engine.send_cross_chain(transfer(&alice)),
            Err(EngineError::NoChannelForChain(_))
        ));
    }
}
