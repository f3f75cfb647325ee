use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use std::sync::Arc;

use tally_core::OwnerId;
use tally_engine::LedgerEngine;
use tally_store::{InMemoryLedgerStore, LedgerStore as _};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
}

fn bench_deposit(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(InMemoryLedgerStore::new());
    let account = rt
        .block_on(store.create_account(OwnerId::new(), 0))
        .unwrap();
    let engine = LedgerEngine::new(store);

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(1));
    group.bench_function("deposit", |b| {
        b.iter(|| {
            rt.block_on(engine.deposit(black_box(account.id), black_box(1)))
                .unwrap()
        })
    });
    group.finish();
}

fn bench_transfer(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(InMemoryLedgerStore::new());
    let a = rt
        .block_on(store.create_account(OwnerId::new(), 1_000_000))
        .unwrap();
    let b_acct = rt
        .block_on(store.create_account(OwnerId::new(), 1_000_000))
        .unwrap();
    let engine = LedgerEngine::new(store);

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(1));
    // Alternate directions so neither side drains.
    let mut flip = false;
    group.bench_function("transfer", |b| {
        b.iter(|| {
            flip = !flip;
            let (from, to) = if flip { (a.id, b_acct.id) } else { (b_acct.id, a.id) };
            rt.block_on(engine.transfer(black_box(from), black_box(to), black_box(1)))
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_deposit, bench_transfer);
criterion_main!(benches);
