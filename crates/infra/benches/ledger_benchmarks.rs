use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use depot_core::{ProductId, Quantity, UserId, WarehouseId};
use depot_infra::{
    AdjustmentDirection, InMemoryCatalog, InMemoryDepotStore, JsonEventBus, NewTransfer,
    StockAdjustment, TransferService,
};
use depot_inventory::{
    DocumentReference, MovementId, MovementKind, NewMovement, StockKey, StockMovement, fold_balance,
};
use depot_transfers::{NewTransferLine, TransferState, TransitionOverrides};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn movements(key: StockKey, count: usize) -> Vec<StockMovement> {
    let document = DocumentReference::adjustment(uuid::Uuid::now_v7());
    (0..count)
        .map(|i| {
            let kind = if i % 3 == 0 {
                MovementKind::Outbound
            } else {
                MovementKind::Inbound
            };
            NewMovement::new(key, kind, Quantity::from(1), document, "")
                .record(MovementId::new(), Utc::now())
        })
        .collect()
}

fn bench_balance_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_fold");
    let key = StockKey::new(ProductId::new(), WarehouseId::new(), None);

    for size in [100usize, 1_000, 10_000] {
        let log = movements(key, size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("fold", size), &log, |b, log| {
            b.iter(|| black_box(fold_balance(log, &key, None)));
        });
    }

    group.finish();
}

struct Fixture {
    service: TransferService,
    actor: UserId,
    origin: WarehouseId,
    destination: WarehouseId,
    product: ProductId,
}

fn fixture(rt: &Runtime) -> Fixture {
    let catalog = Arc::new(InMemoryCatalog::new());
    let origin = catalog.add_warehouse("Origin").id;
    let destination = catalog.add_warehouse("Destination").id;
    let product = catalog.add_product("Widget", "WDG-1", "pcs").id;
    let service = TransferService::new(
        Arc::new(InMemoryDepotStore::new()),
        catalog,
        Arc::new(JsonEventBus::new()),
    );
    let actor = UserId::new();

    rt.block_on(async {
        service
            .record_adjustment(
                actor,
                StockAdjustment {
                    product_id: product,
                    warehouse_id: origin,
                    lot_id: None,
                    direction: AdjustmentDirection::Increase,
                    quantity: Quantity::from(1_000_000),
                    notes: "bench stock".into(),
                },
            )
            .await
            .unwrap();
    });

    Fixture {
        service,
        actor,
        origin,
        destination,
        product,
    }
}

fn bench_ship_path(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let f = fixture(&rt);

    let mut group = c.benchmark_group("transfer_lifecycle");
    group.bench_function("create_approve_ship", |b| {
        b.iter(|| {
            rt.block_on(async {
                let t = f
                    .service
                    .create_transfer(
                        f.actor,
                        NewTransfer {
                            origin_warehouse_id: f.origin,
                            destination_warehouse_id: f.destination,
                            lines: vec![NewTransferLine::new(f.product, None, Quantity::from(1))],
                            notes: None,
                        },
                    )
                    .await
                    .unwrap();
                for target in [
                    TransferState::PendingApproval,
                    TransferState::Approved,
                    TransferState::InTransit,
                ] {
                    f.service
                        .transition(t.id_typed(), target, f.actor, TransitionOverrides::default())
                        .await
                        .unwrap();
                }
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_balance_fold, bench_ship_path);
criterion_main!(benches);
