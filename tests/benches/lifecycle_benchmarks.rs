//! # Hold-Invoice Lifecycle Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Commitment | secret generation, constant-time hash check |
//! | Lifecycle | create + cancel against the simulated node |
//! | Lifecycle | create + pay + settle round trip |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use hold_invoice::{
    Commitment, CreateHold, HoldInvoiceApi, HoldInvoiceService, LifecycleConfig, SimulatedNode,
    WalletGateway,
};
use rand::rngs::OsRng;

// ============================================================================
// Commitment
// ============================================================================

fn bench_commitment(c: &mut Criterion) {
    let mut group = c.benchmark_group("commitment");

    group.bench_function("generate", |b| {
        b.iter(|| black_box(Commitment::generate(&mut OsRng).unwrap()))
    });

    let commitment = Commitment::generate(&mut OsRng).unwrap();
    group.bench_function("verify_secret", |b| {
        b.iter(|| black_box(commitment.hash.matches(black_box(&commitment.secret))))
    });

    group.finish();
}

// ============================================================================
// Lifecycle
// ============================================================================

fn setup() -> (Arc<SimulatedNode>, Arc<HoldInvoiceService>) {
    let node = Arc::new(SimulatedNode::new());
    let service = Arc::new(HoldInvoiceService::new(LifecycleConfig::default(), node.clone()).unwrap());
    (node, service)
}

fn bench_create_cancel(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("lifecycle");
    group.measurement_time(Duration::from_secs(10));

    let (_node, service) = setup();
    group.bench_function("create_then_cancel", |b| {
        b.to_async(&rt).iter(|| {
            let service = Arc::clone(&service);
            async move {
                let created = service.create_hold(CreateHold::new(1_000)).await.unwrap();
                black_box(service.cancel(&created.id).await.unwrap())
            }
        })
    });

    group.finish();
}

fn bench_settle_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("lifecycle");

    for size in [1usize, 10, 50] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("pay_and_settle", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let (node, service) = setup();
                let rounds = (0..size).map(|_| {
                    let node = Arc::clone(&node);
                    let service = Arc::clone(&service);
                    async move {
                        let created = service.create_hold(CreateHold::new(250)).await.unwrap();
                        node.pay(&created.payment_request).await.unwrap();
                        let secret = created.secret.unwrap();
                        service.await_and_settle(&created.id, secret).await.unwrap()
                    }
                });
                black_box(join_all(rounds).await)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_commitment,
    bench_create_cancel,
    bench_settle_round_trip
);
criterion_main!(benches);
