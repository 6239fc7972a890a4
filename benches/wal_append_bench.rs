// Write-ahead log append throughput benchmarks. Tests group-commit
// behavior under varying payload sizes and batch widths, and the cost
// of a forced flush versus letting records ride the buffer threshold.

use confluxdb::config::WalConfig;
use confluxdb::wal::record::{OperationType, PendingRecord};
use confluxdb::wal::WalEngine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn wal_config(dir: &std::path::Path) -> WalConfig {
    WalConfig {
        wal_dir: dir.to_string_lossy().to_string(),
        ..Default::default()
    }
}

fn bench_single_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let engine = WalEngine::open(dir.path(), "bench", wal_config(dir.path())).unwrap();
    let mut tx = 0u64;

    c.bench_function("single_data_append", |b| {
        b.iter(|| {
            tx += 1;
            rt.block_on(async {
                engine
                    .write_entry(PendingRecord::data(
                        tx,
                        "bench_collection",
                        OperationType::Insert,
                        black_box(vec![0u8; 128]),
                    ))
                    .await
                    .unwrap()
            })
        });
    });
}

fn bench_append_by_payload_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_by_payload_size");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for size in [64usize, 256, 1024, 4096, 16384] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let dir = tempfile::tempdir().unwrap();
            let engine = WalEngine::open(dir.path(), "bench", wal_config(dir.path())).unwrap();
            let payload = vec![0u8; size];
            let mut tx = 0u64;

            b.iter(|| {
                tx += 1;
                rt.block_on(async {
                    engine
                        .write_entry(PendingRecord::data(
                            tx,
                            "bench_collection",
                            OperationType::Insert,
                            black_box(payload.clone()),
                        ))
                        .await
                        .unwrap()
                })
            });
        });
    }

    group.finish();
}

fn bench_transaction_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let engine = WalEngine::open(dir.path(), "bench", wal_config(dir.path())).unwrap();
    let mut tx = 0u64;

    c.bench_function("begin_data_commit", |b| {
        b.iter(|| {
            tx += 1;
            rt.block_on(async {
                engine.write_entry(PendingRecord::begin(tx)).await.unwrap();
                engine
                    .write_entry(PendingRecord::data(
                        tx,
                        "bench_collection",
                        OperationType::Insert,
                        black_box(vec![0u8; 128]),
                    ))
                    .await
                    .unwrap();
                engine.write_entry(PendingRecord::commit(tx)).await.unwrap();
            });
            black_box(tx);
        });
    });
}

fn bench_group_commit_batch_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_commit_batch_width");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for batch in [1usize, 8, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let dir = tempfile::tempdir().unwrap();
            let engine = WalEngine::open(dir.path(), "bench", wal_config(dir.path())).unwrap();
            let mut tx = 0u64;

            b.iter(|| {
                rt.block_on(async {
                    for _ in 0..batch {
                        tx += 1;
                        engine
                            .write_entry(PendingRecord::data(
                                tx,
                                "bench_collection",
                                OperationType::Insert,
                                black_box(vec![0u8; 128]),
                            ))
                            .await
                            .unwrap();
                    }
                    // COMMIT forces the flush, so the batch's durability
                    // cost is charged once per group rather than once
                    // per record.
                    engine.write_entry(PendingRecord::commit(tx)).await.unwrap();
                });
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_append,
    bench_append_by_payload_size,
    bench_transaction_lifecycle,
    bench_group_commit_batch_width
);
criterion_main!(benches);
