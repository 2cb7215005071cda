use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use scdb_core::{Operation, SyncMode};
use scdb_storage::wal::{WalHeader, WalMetrics, WalReader, WalWriter, WAL_HEADER_SIZE};

use parking_lot::Mutex as PLMutex;
use std::fs::OpenOptions;
use std::sync::Arc;
use tempfile::TempDir;

const ENTRY_SIZE: u32 = 4096;
const MAX_ENTRIES: u32 = 65536;

fn open_wal_file(dir: &TempDir) -> std::fs::File {
    let path = dir.path().join("bench.wal");
    let file = OpenOptions::new().create(true).read(true).write(true).open(&path).unwrap();
    file.set_len(WAL_HEADER_SIZE as u64 + ENTRY_SIZE as u64 * MAX_ENTRIES as u64)
        .unwrap();
    file
}

fn new_writer(dir: &TempDir, sync_mode: SyncMode) -> WalWriter {
    let header = WalHeader::new(1, ENTRY_SIZE, MAX_ENTRIES);
    WalWriter::new(Arc::new(PLMutex::new(open_wal_file(dir))), 0, header, sync_mode, Arc::new(WalMetrics::new()))
}

fn bench_sync_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_sync_modes");

    for sync_mode in [SyncMode::None, SyncMode::Normal, SyncMode::Full] {
        let temp_dir = TempDir::new().unwrap();
        let writer = new_writer(&temp_dir, sync_mode);

        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", sync_mode)), &sync_mode, |b, _| {
            b.iter(|| {
                writer
                    .append(Operation::Insert, 1, "bench-block", 0, black_box(b"benchmark_value"))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_payload_size_impact(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_payload_size");

    for size_kb in [1usize, 4, 16, 64] {
        let size = size_kb * 1024;
        let payload = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{size_kb}KB")), &payload, |b, payload| {
            let temp_dir = TempDir::new().unwrap();
            let writer = new_writer(&temp_dir, SyncMode::None);

            b.iter(|| {
                writer.append(Operation::Insert, 1, "bench-block", 0, black_box(payload)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_concurrent_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_concurrent_writes");

    for num_threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{num_threads}_threads")), &num_threads, |b, &num_threads| {
            let temp_dir = TempDir::new().unwrap();
            let writer = Arc::new(new_writer(&temp_dir, SyncMode::None));

            b.iter(|| {
                let handles: Vec<_> = (0..num_threads)
                    .map(|thread_id| {
                        let writer = Arc::clone(&writer);
                        std::thread::spawn(move || {
                            for i in 0..10u64 {
                                writer
                                    .append(Operation::Insert, thread_id as u64, "bench-block", i, b"value")
                                    .unwrap();
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

fn bench_recovery_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_recovery");

    for num_entries in [100u64, 1000, 10000] {
        let temp_dir = TempDir::new().unwrap();
        {
            let writer = new_writer(&temp_dir, SyncMode::None);
            for i in 0..num_entries {
                writer
                    .append(Operation::Insert, 1, "bench-block", i, format!("value_{i}").as_bytes())
                    .unwrap();
            }
        }
        let file = open_wal_file(&temp_dir);

        group.bench_with_input(BenchmarkId::from_parameter(format!("{num_entries}_entries")), &num_entries, |b, _| {
            b.iter(|| {
                let mut reader = WalReader::new(file.try_clone().unwrap(), 0, Arc::new(WalMetrics::new())).unwrap();
                let records = reader.read_entries_since_checkpoint().unwrap();
                black_box(records);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sync_modes, bench_payload_size_impact, bench_concurrent_writes, bench_recovery_speed);
criterion_main!(benches);
