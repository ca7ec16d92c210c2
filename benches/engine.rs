//! Benchmarks for the money order engine.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark
//! cargo bench -- amm_swap
//! ```
//!
//! Results are saved to `target/criterion/` with HTML reports.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use std::time::Duration;

use money_order_engine::bulk::{BulkItemRequest, BulkOrderRequest, BusinessLimits};
use money_order_engine::config::EngineConfig;
use money_order_engine::engine::{Engine, MoneyOrderRequest, SwapRequest};
use money_order_engine::fees::distribute_fees;
use money_order_engine::params::FeeShares;
use money_order_engine::pool::PoolId;
use money_order_engine::ports::{
    Collaborators, MemoryLedger, MemoryTransport, MemoryVpa, StaticKyc,
};
use money_order_engine::types::{derive_address, Coin};

const NAMO: u64 = 1_000_000;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

struct Fixture {
    engine: Engine,
    ledger: MemoryLedger,
}

fn fixture() -> Fixture {
    let ledger = MemoryLedger::new();
    let ports = Collaborators::in_memory(
        &ledger,
        &StaticKyc::new(),
        &MemoryVpa::new(),
        &MemoryTransport::new(),
    );
    let mut engine = Engine::new(EngineConfig::default(), ports).expect("default config is valid");
    engine.begin_block(1, 1_735_689_600);
    Fixture { engine, ledger }
}

/// An engine with one funded AMM pool and a funded trader.
fn amm_fixture() -> (Fixture, PoolId, String) {
    let mut f = fixture();
    let lp = derive_address("desh", "lp");
    let trader = derive_address("desh", "trader");
    f.ledger.mint(&lp, &Coin::new("unamo", 1_000_000 * NAMO)).unwrap();
    f.ledger.mint(&lp, &Coin::new("uinr", 4_000_000 * NAMO)).unwrap();
    f.ledger.mint(&trader, &Coin::new("unamo", 1_000_000 * NAMO)).unwrap();
    let pool_id = f
        .engine
        .create_amm_pool(
            &lp,
            [Coin::new("unamo", 1_000_000 * NAMO), Coin::new("uinr", 4_000_000 * NAMO)],
            None,
        )
        .unwrap();
    (f, pool_id, trader)
}

// ============================================================================
// BENCHMARKS
// ============================================================================

fn bench_fee_distribution(c: &mut Criterion) {
    let shares = FeeShares::default();
    c.bench_function("fee_distribution", |b| {
        b.iter(|| distribute_fees(black_box(&shares), black_box(123_456_789)))
    });
}

fn bench_money_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("money_order");
    group.measurement_time(Duration::from_secs(5));

    for count in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("create", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let f = fixture();
                    let sender = derive_address("desh", "sender");
                    f.ledger
                        .mint(&sender, &Coin::new("unamo", count * 20 * NAMO))
                        .unwrap();
                    (f, sender)
                },
                |(mut f, sender)| {
                    for i in 0..count {
                        let receiver = derive_address("desh", &format!("r{i}"));
                        f.engine
                            .create_money_order(MoneyOrderRequest::new(&sender, &receiver, 10 * NAMO))
                            .unwrap();
                    }
                    f
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_amm_swap(c: &mut Criterion) {
    c.bench_function("amm_swap", |b| {
        b.iter_batched(
            amm_fixture,
            |(mut f, pool_id, trader)| {
                f.engine
                    .swap_exact_in(SwapRequest {
                        trader,
                        pool_id,
                        token_in: Coin::new("unamo", black_box(10 * NAMO)),
                        token_out_min: 0,
                    })
                    .unwrap();
                f
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_bulk_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_order");
    let items = 500u64;
    group.throughput(Throughput::Elements(items));
    group.bench_function("settle_500", |b| {
        b.iter_batched(
            || {
                let mut f = fixture();
                let owner = derive_address("desh", "business");
                f.ledger.mint(&owner, &Coin::new("unamo", items * 20 * NAMO)).unwrap();
                f.engine
                    .register_business_account(
                        "gov",
                        &owner,
                        "Bench Co",
                        BusinessLimits {
                            daily_limit: u64::MAX,
                            monthly_limit: u64::MAX,
                            max_bulk_order_size: items as usize,
                        },
                    )
                    .unwrap();
                let request = BulkOrderRequest {
                    sender: owner,
                    denom: "unamo".to_string(),
                    items: (0..items)
                        .map(|i| BulkItemRequest::new(&derive_address("desh", &format!("w{i}")), 10 * NAMO))
                        .collect(),
                    memo: String::new(),
                    priority: Default::default(),
                    settings: None,
                };
                (f, request)
            },
            |(mut f, request)| {
                f.engine.create_bulk_order(request).unwrap();
                f
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

fn bench_state_root(c: &mut Criterion) {
    let (mut f, _, trader) = amm_fixture();
    for i in 0..200 {
        let receiver = derive_address("desh", &format!("r{i}"));
        f.engine
            .create_money_order(MoneyOrderRequest::new(&trader, &receiver, 10 * NAMO))
            .unwrap();
    }
    c.bench_function("state_root_200_orders", |b| {
        b.iter(|| f.engine.state_root().unwrap())
    });
}

criterion_group!(
    benches,
    bench_fee_distribution,
    bench_money_orders,
    bench_amm_swap,
    bench_bulk_order,
    bench_state_root
);
criterion_main!(benches);
