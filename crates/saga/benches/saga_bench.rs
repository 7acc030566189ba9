use std::sync::Arc;

use common::Money;
use criterion::{Criterion, criterion_group, criterion_main};
use futures_util::future::join_all;
use marketplace::{InMemoryMarketplace, Product, User};
use saga::{
    Fault, InMemoryPaymentGateway, PurchaseRequest, PurchaseSaga, RecordingNotifier, SagaConfig,
    ScriptedFaults,
};
use step_store::InMemoryIdempotencyStore;

type BenchSaga = PurchaseSaga<InMemoryMarketplace, InMemoryIdempotencyStore>;

async fn seeded_saga(stock: u32, payment: InMemoryPaymentGateway) -> BenchSaga {
    let marketplace = InMemoryMarketplace::new();
    marketplace
        .insert_product(Product::new("p1", "Widget", Money::from_cents(1000), stock))
        .await;
    for user in ["u1", "u2", "u3", "u4"] {
        marketplace.insert_user(User::new(user, "1 Bench Rd")).await;
    }
    PurchaseSaga::new(
        marketplace,
        InMemoryIdempotencyStore::new(),
        Arc::new(payment),
        Arc::new(RecordingNotifier::new()),
        SagaConfig::immediate(),
    )
}

fn bench_happy_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let saga = rt.block_on(seeded_saga(u32::MAX, InMemoryPaymentGateway::new()));

    c.bench_function("saga/purchase_completed", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = saga.purchase(PurchaseRequest::new("u1", "p1")).await.unwrap();
                assert!(result.is_completed());
            });
        });
    });
}

fn bench_compensated(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga/purchase_declined", |b| {
        b.iter(|| {
            rt.block_on(async {
                let payment = InMemoryPaymentGateway::with_faults(Arc::new(ScriptedFaults::new([
                    Fault::Decline,
                ])));
                let saga = seeded_saga(10, payment).await;
                let result = saga.purchase(PurchaseRequest::new("u1", "p1")).await.unwrap();
                assert!(!result.is_completed());
            });
        });
    });
}

fn bench_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let saga = rt.block_on(seeded_saga(10, InMemoryPaymentGateway::new()));
    let request = PurchaseRequest::new("u1", "p1").with_saga_id("saga-bench-replay");
    rt.block_on(async { saga.purchase(request.clone()).await.unwrap() });

    c.bench_function("saga/replay_completed", |b| {
        b.iter(|| {
            rt.block_on(async {
                saga.purchase(request.clone()).await.unwrap();
            });
        });
    });
}

fn bench_contended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga/contended_16", |b| {
        b.iter(|| {
            rt.block_on(async {
                let saga = seeded_saga(8, InMemoryPaymentGateway::new()).await;
                let purchases = (0..16).map(|i| {
                    let user = ["u1", "u2", "u3", "u4"][i % 4];
                    saga.purchase(PurchaseRequest::new(user, "p1"))
                });
                let completed = join_all(purchases)
                    .await
                    .into_iter()
                    .filter(|r| r.as_ref().is_ok_and(|r| r.is_completed()))
                    .count();
                assert!(completed <= 8);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_happy_path,
    bench_compensated,
    bench_replay,
    bench_contended
);
criterion_main!(benches);
