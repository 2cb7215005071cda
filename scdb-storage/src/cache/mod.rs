//! CLOCK-replacement page cache.
//!
//! A fixed-capacity cache of raw page bytes keyed by [`PageId`]. Eviction
//! rotates a clock hand over a ring of slots, clearing each slot's
//! reference bit until it finds one already clear — the classic
//! second-chance approximation of LRU. Dirty pages are never evicted: the
//! hand skips them and marks them referenced instead, so a cache that is
//! mostly dirty degrades to "can't evict anything" rather than busy-looping
//! forever looking for a victim.

use scdb_core::PageId;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct Slot {
    page_id: PageId,
    data: Vec<u8>,
    referenced: bool,
    dirty: bool,
}

struct CacheState {
    slots: Vec<Option<Slot>>,
    index: HashMap<PageId, usize>,
    hand: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Bounded CLOCK cache over raw page bytes.
pub struct BlockCache {
    state: Mutex<CacheState>,
    counters: Counters,
    capacity: usize,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BlockCache capacity must be nonzero");
        Self {
            state: Mutex::new(CacheState {
                slots: (0..capacity).map(|_| None).collect(),
                index: HashMap::with_capacity(capacity),
                hand: 0,
            }),
            counters: Counters::default(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a copy of the cached page, setting its reference bit.
    pub fn get(&self, page_id: PageId) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if let Some(&slot_idx) = state.index.get(&page_id) {
            let slot = state.slots[slot_idx].as_mut().expect("index points to a live slot");
            slot.referenced = true;
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            Some(slot.data.clone())
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Inserts or replaces a page's bytes. `dirty` pages are protected from
    /// eviction until [`Self::mark_clean`] is called for that page.
    pub fn put(&self, page_id: PageId, data: Vec<u8>, dirty: bool) {
        let mut state = self.state.lock();

        if let Some(&slot_idx) = state.index.get(&page_id) {
            let slot = state.slots[slot_idx].as_mut().unwrap();
            slot.data = data;
            slot.dirty = dirty;
            slot.referenced = true;
            return;
        }

        let Some(slot_idx) = self.find_victim(&mut state) else {
            // Every slot is dirty: nothing can be evicted without losing an
            // unflushed write, so the insert is dropped and the caller goes
            // on reading/writing through the page store directly.
            return;
        };
        if let Some(evicted) = state.slots[slot_idx].take() {
            state.index.remove(&evicted.page_id);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }

        state.slots[slot_idx] = Some(Slot {
            page_id,
            data,
            referenced: true,
            dirty,
        });
        state.index.insert(page_id, slot_idx);
    }

    pub fn remove(&self, page_id: PageId) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let slot_idx = state.index.remove(&page_id)?;
        state.slots[slot_idx].take().map(|s| s.data)
    }

    pub fn mark_clean(&self, page_id: PageId) {
        let mut state = self.state.lock();
        if let Some(&slot_idx) = state.index.get(&page_id) {
            if let Some(slot) = state.slots[slot_idx].as_mut() {
                slot.dirty = false;
            }
        }
    }

    /// Finds a free slot or rotates the clock hand until it finds a
    /// victim: a non-dirty slot whose reference bit is already clear.
    /// Dirty and referenced slots are passed over (their bit is cleared
    /// for referenced ones) so the hand always makes progress.
    ///
    /// The scan is bounded to two full rotations of the clock: if every
    /// slot is dirty, no amount of further spinning turns one up, so this
    /// returns `None` rather than looping forever.
    fn find_victim(&self, state: &mut CacheState) -> Option<usize> {
        if let Some(free) = state.slots.iter().position(|s| s.is_none()) {
            return Some(free);
        }

        for _ in 0..2 * self.capacity {
            let idx = state.hand;
            state.hand = (state.hand + 1) % self.capacity;

            let slot = state.slots[idx].as_mut().expect("capacity slots are always occupied once full");
            if slot.dirty {
                slot.referenced = true;
                continue;
            }
            if slot.referenced {
                slot.referenced = false;
                continue;
            }
            return Some(idx);
        }

        None
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let stats = self.statistics();
        let total = stats.hits + stats.misses;
        if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        }
    }
}
