use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::sync::{Arc, Barrier};
use std::thread;

use stockledger_core::{Aggregate, OrderId, OrderItemId, VariantId, WarehouseId};
use stockledger_infra::{
    InMemoryAllocationStore, InMemoryInventoryStore, OrderFulfillmentCoordinator, ReservationEngine,
};
use stockledger_inventory::{EntryContext, StockKey, StockRecord};
use stockledger_orders::{AddLine, CreateOrder, Order, OrderCommand};

fn stocked_engine(on_hand: i64) -> (ReservationEngine<Arc<InMemoryInventoryStore>>, StockKey) {
    let engine = ReservationEngine::new(Arc::new(InMemoryInventoryStore::new()));
    let key = StockKey::new(VariantId::new(), WarehouseId::new());
    engine.create_record(StockRecord::new(key, Utc::now())).unwrap();
    engine
        .receipt(key, on_hand, None, None, &EntryContext::new())
        .unwrap();
    (engine, key)
}

fn bench_reserve_release_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_release_latency");
    group.sample_size(1000);

    group.bench_function("reserve_then_release", |b| {
        let (engine, key) = stocked_engine(1_000_000);
        let ctx = EntryContext::new().with_reference("cart:bench");
        b.iter(|| {
            engine.reserve(black_box(key), 1, &ctx).unwrap();
            engine.release(black_box(key), 1, &ctx).unwrap();
        });
    });

    group.finish();
}

/// Threads hammer either one shared record or one record each.
fn bench_contended_reservations(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_reservations");
    const PER_THREAD: usize = 200;

    for threads in [1usize, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements((*threads * PER_THREAD) as u64));

        group.bench_with_input(BenchmarkId::new("same_key", threads), threads, |b, &threads| {
            b.iter(|| {
                let (engine, key) = stocked_engine((threads * PER_THREAD) as i64);
                let engine = Arc::new(engine);
                let barrier = Arc::new(Barrier::new(threads));
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let engine = Arc::clone(&engine);
                        let barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            let ctx = EntryContext::new();
                            barrier.wait();
                            for _ in 0..PER_THREAD {
                                engine.reserve(key, 1, &ctx).unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("distinct_keys", threads), threads, |b, &threads| {
            b.iter(|| {
                let engine = Arc::new(ReservationEngine::new(Arc::new(InMemoryInventoryStore::new())));
                let keys: Vec<StockKey> = (0..threads)
                    .map(|_| {
                        let key = StockKey::new(VariantId::new(), WarehouseId::new());
                        engine.create_record(StockRecord::new(key, Utc::now())).unwrap();
                        engine
                            .receipt(key, PER_THREAD as i64, None, None, &EntryContext::new())
                            .unwrap();
                        key
                    })
                    .collect();
                let barrier = Arc::new(Barrier::new(threads));
                let handles: Vec<_> = keys
                    .into_iter()
                    .map(|key| {
                        let engine = Arc::clone(&engine);
                        let barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            let ctx = EntryContext::new();
                            barrier.wait();
                            for _ in 0..PER_THREAD {
                                engine.reserve(key, 1, &ctx).unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_place_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("place_order");

    for lines in [1usize, 5, 20].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(lines), lines, |b, &lines| {
            let engine = ReservationEngine::new(Arc::new(InMemoryInventoryStore::new()));
            let variants: Vec<VariantId> = (0..lines).map(|_| VariantId::new()).collect();
            for variant in &variants {
                for _ in 0..3 {
                    let key = StockKey::new(*variant, WarehouseId::new());
                    engine.create_record(StockRecord::new(key, Utc::now())).unwrap();
                    engine
                        .receipt(key, 100_000_000, None, None, &EntryContext::new())
                        .unwrap();
                }
            }
            let coordinator =
                OrderFulfillmentCoordinator::new(engine, Arc::new(InMemoryAllocationStore::new()));

            b.iter(|| {
                let order_id = OrderId::new();
                let mut order = Order::empty(order_id);
                let mut commands = vec![OrderCommand::CreateOrder(CreateOrder {
                    order_id,
                    reference: "SO-BENCH".to_string(),
                    customer: None,
                    occurred_at: Utc::now(),
                })];
                commands.extend(variants.iter().map(|variant| {
                    OrderCommand::AddLine(AddLine {
                        order_id,
                        item_id: OrderItemId::new(),
                        variant_id: *variant,
                        quantity: 1,
                        unit_price: 100,
                        occurred_at: Utc::now(),
                    })
                }));
                for command in &commands {
                    for event in order.handle(command).unwrap() {
                        order.apply(&event);
                    }
                }
                black_box(coordinator.place_order(&order).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_release_latency,
    bench_contended_reservations,
    bench_place_order
);
criterion_main!(benches);
