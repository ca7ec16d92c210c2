//! Money Order Engine - demo entry point
//!
//! Loads a config file, wires the in-memory collaborators and runs two blocks
//! covering a money order, a pool swap, a bulk payout and a cross-chain
//! transfer. Usage: `money-order-engine [config.yaml]`.

use std::error::Error;

use money_order_engine::bulk::{BulkItemRequest, BulkOrderRequest, BusinessLimits};
use money_order_engine::config::EngineConfig;
use money_order_engine::crosschain::{
    Acknowledgement, ChannelMetadata, CrossChainTransfer, CHANNEL_VERSION,
};
use money_order_engine::engine::{Engine, MoneyOrderRequest, SwapRequest};
use money_order_engine::logging::init_logging;
use money_order_engine::ports::{
    Collaborators, MemoryLedger, MemoryTransport, MemoryVpa, StaticKyc,
};
use money_order_engine::types::{derive_address, BlockReceipt, Coin};
use tracing::info;

const NAMO: u64 = 1_000_000;
const GENESIS_TIME: u64 = 1_735_689_600;

fn main() -> Result<(), Box<dyn Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.yaml".to_string());
    let config = EngineConfig::load(&path)?;
    init_logging(&config.logging);
    info!(%path, chain_id = %config.chain_id, "config loaded");

    let prefix = config.address_prefix.clone();
    let governance = config.governance_authority.clone();
    let account = |label: &str| derive_address(&prefix, label);

    let ledger = MemoryLedger::new();
    let (kyc, vpa, transport) = (StaticKyc::new(), MemoryVpa::new(), MemoryTransport::new());
    let ports = Collaborators::in_memory(&ledger, &kyc, &vpa, &transport);
    let mut engine = Engine::new(config, ports)?;

    let (alice, bob, payroll) = (account("alice"), account("bob"), account("payroll"));
    ledger.mint(&alice, &Coin::new("unamo", 10_000 * NAMO))?;
    ledger.mint(&alice, &Coin::new("uinr", 10_000 * NAMO))?;
    ledger.mint(&payroll, &Coin::new("unamo", 1_000 * NAMO))?;
    vpa.register("bob@desh", &bob);

    // block 1: money order, pool, swap, bulk payout, cross-chain send
    engine.begin_block(1, GENESIS_TIME);

    let order = engine.create_money_order(
        MoneyOrderRequest::new(&alice, "bob@desh", 250 * NAMO).with_note("rent"),
    )?;
    println!("money order {} -> {}", order.reference_number, order.status.as_str());

    let pool_id = engine.create_amm_pool(
        &alice,
        [Coin::new("unamo", 1_000 * NAMO), Coin::new("uinr", 4_000 * NAMO)],
        None,
    )?;
    let swap = engine.swap_exact_in(SwapRequest {
        trader: alice.clone(),
        pool_id,
        token_in: Coin::new("unamo", 10 * NAMO),
        token_out_min: 0,
    })?;
    println!("swap {} -> {} (fee {})", swap.token_in, swap.token_out, swap.fee);

    engine.register_business_account(
        &governance,
        &payroll,
        "Village Cooperative",
        BusinessLimits {
            daily_limit: 5_000 * NAMO,
            monthly_limit: 50_000 * NAMO,
            max_bulk_order_size: 100,
        },
    )?;
    let bulk = engine.create_bulk_order(BulkOrderRequest {
        sender: payroll.clone(),
        denom: "unamo".to_string(),
        items: (0..3)
            .map(|i| BulkItemRequest::new(&account(&format!("farmer-{i}")), 20 * NAMO))
            .collect(),
        memo: "harvest payout".to_string(),
        priority: Default::default(),
        settings: None,
    })?;
    println!(
        "bulk {} -> {} ({} settled)",
        bulk.bulk_id,
        bulk.status.as_str(),
        bulk.successful.len()
    );

    engine.open_channel("channel-0", "osmosis", CHANNEL_VERSION, ChannelMetadata::default())?;
    let transfer = engine.send_cross_chain(CrossChainTransfer {
        sender: alice.clone(),
        recipient: "osmo1recipient".to_string(),
        amount: Coin::new("unamo", 50 * NAMO),
        destination_chain: "osmosis".to_string(),
        memo: String::new(),
        timeout_height: 0,
        timeout_timestamp: 0,
    })?;
    print_receipt(&engine.end_block()?);

    // block 2: the counterparty acknowledges
    engine.begin_block(2, GENESIS_TIME + 6);
    let status = engine.on_acknowledgement(
        "channel-0",
        transfer.sequence,
        &Acknowledgement::success(&transfer.order_id, "RECEIVED"),
    )?;
    println!("cross-chain {} -> {}", transfer.order_id, status.as_str());
    print_receipt(&engine.end_block()?);

    Ok(())
}

fn print_receipt(receipt: &BlockReceipt) {
    println!(
        "block {}: orders={} swaps={} cross_chain={} root={}",
        receipt.height,
        receipt.orders_processed,
        receipt.swaps_executed,
        receipt.cross_chain_transitions,
        receipt.state_root_hex()
    );
}
