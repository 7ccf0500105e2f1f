use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use rust_decimal::Decimal;
use stockledger_auth::GrantAuthorizer;
use stockledger_core::UserId;
use stockledger_events::NoopAuditSink;
use stockledger_infra::{AvailabilityProjection, InMemoryCatalog, StockConfig, StockEngine};
use stockledger_inventory::{
    Article, CostingMethod, Depot, DocumentRef, MovementRequest, MovementType,
};

struct Bench {
    engine: StockEngine,
    article: Article,
    depot: Depot,
    user: UserId,
}

fn setup(method: CostingMethod) -> Bench {
    let catalog = Arc::new(InMemoryCatalog::new());
    let (depot, location) = Depot::new("MAIN");
    catalog.put_depot(depot.clone(), location).unwrap();
    let article = Article::new("BENCH", method);
    catalog.put_article(article.clone()).unwrap();
    let engine = StockEngine::new(
        StockConfig::default(),
        catalog,
        Arc::new(GrantAuthorizer::new()),
        Arc::new(NoopAuditSink),
    )
    .unwrap();
    Bench {
        engine,
        article,
        depot,
        user: UserId::new(),
    }
}

impl Bench {
    fn request(&self, kind: MovementType, qty: i64) -> MovementRequest {
        MovementRequest::new(
            kind,
            self.article.id,
            self.depot.id,
            Decimal::from(qty),
            DocumentRef::new("bench", "B-1"),
            self.user,
        )
    }
}

fn bench_entry_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_entry_latency");
    group.throughput(Throughput::Elements(1));

    for method in [CostingMethod::WeightedAverage, CostingMethod::Fifo] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{method:?}")), &method, |b, &method| {
            let bench = setup(method);
            b.iter(|| {
                let req = bench
                    .request(MovementType::EntryPurchase, 10)
                    .with_unit_cost(Decimal::from(3));
                black_box(bench.engine.ledger().append(req).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_fifo_exit_across_layers(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_exit_across_layers");

    for layers in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(layers), &layers, |b, &layers| {
            b.iter_batched(
                || {
                    let bench = setup(CostingMethod::Fifo);
                    for i in 0..layers {
                        let req = bench
                            .request(MovementType::EntryPurchase, 1)
                            .with_unit_cost(Decimal::from(i as i64 + 1));
                        bench.engine.ledger().append(req).unwrap();
                    }
                    bench
                },
                |bench| {
                    let req = bench.request(MovementType::ExitSale, layers as i64);
                    black_box(bench.engine.ledger().append(req).unwrap());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_projection_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild");

    for count in [100usize, 1000, 10_000] {
        let bench = setup(CostingMethod::WeightedAverage);
        for _ in 0..count {
            let req = bench
                .request(MovementType::EntryPurchase, 2)
                .with_unit_cost(Decimal::from(5));
            bench.engine.ledger().append(req).unwrap();
        }
        let movements = bench.engine.ledger().all().unwrap();
        let reservations = bench.engine.reservations().all().unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(AvailabilityProjection::rebuild(&movements, &reservations).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_entry_latency,
    bench_fifo_exit_across_layers,
    bench_projection_rebuild
);
criterion_main!(benches);
