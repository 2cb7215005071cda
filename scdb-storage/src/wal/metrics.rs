//! Atomic counters exposed by the WAL writer and reader.
//!
//! Every field uses atomic operations so the counters can be read from a
//! `get_statistics()`-style accessor without taking any lock the hot write
//! path holds.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WalMetrics {
    writes_total: AtomicU64,
    bytes_written: AtomicU64,
    checkpoints_total: AtomicU64,

    reads_total: AtomicU64,
    bytes_read: AtomicU64,
    corrupted_records: AtomicU64,

    max_entry_size: AtomicU64,
}

impl WalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, size: u64) {
        self.writes_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(size, Ordering::Relaxed);
        self.max_entry_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, size: u64) {
        self.reads_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_corruption(&self) {
        self.corrupted_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn writes_total(&self) -> u64 {
        self.writes_total.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn checkpoints_total(&self) -> u64 {
        self.checkpoints_total.load(Ordering::Relaxed)
    }

    pub fn reads_total(&self) -> u64 {
        self.reads_total.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn corrupted_records(&self) -> u64 {
        self.corrupted_records.load(Ordering::Relaxed)
    }

    pub fn max_entry_size(&self) -> u64 {
        self.max_entry_size.load(Ordering::Relaxed)
    }
}
