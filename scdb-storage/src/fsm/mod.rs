//! Free-space map: tracks which pages in the file are available for
//! allocation.
//!
//! Two levels cooperate: an [`bitmap::PageBitmap`] gives an exact
//! free/occupied bit for every page, while an [`extent::ExtentList`] tracks
//! runs of at least [`extent::COALESCE_THRESHOLD`] contiguous free pages so
//! that large allocations don't need a bit-by-bit bitmap scan. The two
//! structures describe the same free pages from different angles; they are
//! kept consistent by always updating both on `free_pages`/`allocate_pages`.
//!
//! ## Region Layout
//!
//! ```text
//! +-------------------+
//! |   FSM header       |  64 bytes
//! +-------------------+
//! |   L1 bitmap        |  ceil(total_pages / 8) bytes
//! +-------------------+
//! |   extent_count: u32|
//! +-------------------+
//! |   L2 extents        |  16 bytes each
//! +-------------------+
//! ```

pub mod bitmap;
pub mod extent;

pub use bitmap::PageBitmap;
pub use extent::{Extent, ExtentList, COALESCE_THRESHOLD};

use crate::format::{ChecksummedHeader, RegionFormat, RegionHeader as RegionHeaderTrait, ValidateFile};
use scdb_core::{Error, Result};

use crc32fast::Hasher;
use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub const FSM_MAGIC: &[u8; 8] = b"SCDBFSM_";
pub const FSM_HEADER_SIZE: usize = 64;
const FSM_CURRENT_VERSION: u16 = 0x0100;

/// Pages added whenever the file must grow to satisfy an allocation, even
/// if the allocation itself needed fewer pages than this.
pub const MIN_EXTENSION_PAGES: u64 = 1024;
/// The file also grows by at least `current_pages / GROWTH_FACTOR`, so
/// larger files extend in proportionally larger increments.
pub const GROWTH_FACTOR: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsmHeader {
    pub magic: [u8; 8],
    pub version: u16,
    pub flags: u16,
    pub header_checksum: u32,
    pub total_pages: u64,
    pub free_pages: u64,
    pub modified_at: u64,
    pub reserved: [u8; 24],
}

impl FsmHeader {
    fn new(total_pages: u64, free_pages: u64) -> Self {
        let mut header = Self {
            magic: *FSM_MAGIC,
            version: FSM_CURRENT_VERSION,
            flags: 0,
            header_checksum: 0,
            total_pages,
            free_pages,
            modified_at: current_timestamp_micros(),
            reserved: [0; 24],
        };
        header.header_checksum = header.calculate_checksum();
        header
    }
}

impl RegionFormat for FsmHeader {
    const MAGIC: &'static [u8; 8] = FSM_MAGIC;
    const FORMAT_NAME: &'static str = "free-space map";
    const CURRENT_VERSION: u16 = FSM_CURRENT_VERSION;
    const MIN_SUPPORTED_VERSION: u16 = 0x0100;
}

impl RegionHeaderTrait for FsmHeader {
    const HEADER_SIZE: usize = FSM_HEADER_SIZE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.header_checksum.to_le_bytes());
        buf[16..24].copy_from_slice(&self.total_pages.to_le_bytes());
        buf[24..32].copy_from_slice(&self.free_pages.to_le_bytes());
        buf[32..40].copy_from_slice(&self.modified_at.to_le_bytes());
        buf[40..64].copy_from_slice(&self.reserved);
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "FSM header too small: {} bytes (expected {})",
                data.len(),
                Self::HEADER_SIZE
            )));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        let version = u16::from_le_bytes(data[8..10].try_into().unwrap());
        let flags = u16::from_le_bytes(data[10..12].try_into().unwrap());
        let header_checksum = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let total_pages = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let free_pages = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let modified_at = u64::from_le_bytes(data[32..40].try_into().unwrap());
        let mut reserved = [0u8; 24];
        reserved.copy_from_slice(&data[40..64]);

        let header = Self {
            magic,
            version,
            flags,
            header_checksum,
            total_pages,
            free_pages,
            modified_at,
            reserved,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != Self::MAGIC {
            return Err(Error::Corruption("invalid FSM magic".to_string()));
        }
        if !self.is_version_supported() {
            return Err(Error::VersionUnsupported {
                found: self.version,
                min: Self::MIN_SUPPORTED_VERSION,
                current: Self::CURRENT_VERSION,
            });
        }
        self.verify_checksum()?;
        Ok(())
    }

    fn magic(&self) -> &[u8; 8] {
        &self.magic
    }

    fn version(&self) -> u16 {
        self.version
    }
}

impl ValidateFile for FsmHeader {}

impl ChecksummedHeader for FsmHeader {
    fn calculate_checksum(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.flags.to_le_bytes());
        hasher.update(&self.total_pages.to_le_bytes());
        hasher.update(&self.free_pages.to_le_bytes());
        hasher.update(&self.modified_at.to_le_bytes());
        hasher.update(&self.reserved);
        hasher.finalize()
    }

    fn stored_checksum(&self) -> u32 {
        self.header_checksum
    }
}

/// Fragmentation as a percentage: how much smaller the largest contiguous
/// free extent is than the total free space, clamped to `[0, 100]`.
/// `0` means all free space is one extent; `100` means free space is
/// maximally scattered.
pub fn fragmentation_percent(free_pages: u64, largest_extent_pages: u64) -> u8 {
    if free_pages == 0 {
        return 0;
    }
    let ratio = 1.0 - (largest_extent_pages as f64 / free_pages as f64);
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// How many pages to add when the file must grow to satisfy an allocation
/// of `needed_pages` pages, given `current_pages` already allocated.
pub fn growth_increment(current_pages: u64, needed_pages: u64) -> u64 {
    MIN_EXTENSION_PAGES.max(needed_pages.max(current_pages / GROWTH_FACTOR))
}

struct FsmState {
    bitmap: PageBitmap,
    extents: ExtentList,
}

pub struct FreeSpaceMap {
    state: Mutex<FsmState>,
}

#[derive(Debug, Clone, Copy)]
pub struct FsmStatistics {
    pub total_pages: u64,
    pub free_pages: u64,
    pub largest_extent_pages: u64,
    pub fragmentation_percent: u8,
}

impl FreeSpaceMap {
    pub fn new(total_pages: u64) -> Self {
        let bitmap = PageBitmap::new(total_pages);
        Self {
            state: Mutex::new(FsmState {
                bitmap,
                extents: ExtentList::new(),
            }),
        }
    }

    /// Allocates `count` contiguous pages, growing the bitmap (per
    /// [`growth_increment`]) if the current range cannot satisfy the
    /// request. Overflow beyond a sane upper bound is `Error::FsmOverflow`.
    pub fn allocate_pages(&self, count: u64) -> Result<u64> {
        let mut state = self.state.lock();

        if let Some(extent) = state.extents.allocate_best_fit(count) {
            for p in extent.start_page..extent.end_page() {
                state.bitmap.set_free(p, false);
            }
            return Ok(extent.start_page);
        }

        if let Some(start) = state.bitmap.find_free_run(count) {
            for p in start..start + count {
                state.bitmap.set_free(p, false);
            }
            return Ok(start);
        }

        let current_pages = state.bitmap.page_count();
        let growth = growth_increment(current_pages, count);
        let new_total = current_pages.checked_add(growth).ok_or_else(|| {
            Error::FsmOverflow("page count would overflow u64 while growing the file".to_string())
        })?;

        state.bitmap.grow_to(new_total);
        let start = current_pages;
        for p in start..start + count {
            state.bitmap.set_free(p, false);
        }

        let surplus = growth - count;
        if surplus > 0 {
            let surplus_start = start + count;
            if surplus >= COALESCE_THRESHOLD {
                state.extents.insert(Extent {
                    start_page: surplus_start,
                    page_count: surplus,
                });
            }
        }

        Ok(start)
    }

    pub fn allocate_extent(&self, count: u64) -> Result<Extent> {
        let start = self.allocate_pages(count)?;
        Ok(Extent {
            start_page: start,
            page_count: count,
        })
    }

    pub fn free_pages(&self, start_page: u64, count: u64) {
        let mut state = self.state.lock();
        for p in start_page..start_page + count {
            state.bitmap.set_free(p, true);
        }
        if count >= COALESCE_THRESHOLD {
            state.extents.insert(Extent {
                start_page,
                page_count: count,
            });
        }
    }

    pub fn free_extent(&self, extent: Extent) {
        self.free_pages(extent.start_page, extent.page_count);
    }

    /// Marks a previously-free range occupied again without going through
    /// [`Self::allocate_pages`]. Used to undo a rolled-back transaction's
    /// `free_pages` call; the range must not have been handed out by an
    /// allocation in the meantime (true under the single-writer model this
    /// crate assumes). Any L2 extent overlapping the range is split or
    /// dropped so the extent list never again offers already-occupied pages.
    pub fn occupy_pages(&self, start_page: u64, count: u64) {
        let mut state = self.state.lock();
        let end = start_page + count;
        for p in start_page..end {
            state.bitmap.set_free(p, false);
        }

        let mut remaining = Vec::new();
        for extent in state.extents.as_slice() {
            let extent_end = extent.end_page();
            if extent_end <= start_page || extent.start_page >= end {
                remaining.push(*extent);
                continue;
            }
            if extent.start_page < start_page {
                remaining.push(Extent {
                    start_page: extent.start_page,
                    page_count: start_page - extent.start_page,
                });
            }
            if extent_end > end {
                remaining.push(Extent {
                    start_page: end,
                    page_count: extent_end - end,
                });
            }
        }
        remaining.retain(|e| e.page_count >= COALESCE_THRESHOLD);
        state.extents = ExtentList::from_extents(remaining);
    }

    /// Rescans the bitmap and rebuilds the L2 extent list from scratch.
    /// Defensive re-derivation: every `free_pages` call already keeps the
    /// extent list in sync incrementally, but a quick vacuum pass uses this
    /// to recover from any L2 gaps that incremental maintenance missed.
    pub fn rebuild_extents(&self) {
        let mut state = self.state.lock();
        let mut extents = Vec::new();
        let mut run_start: Option<u64> = None;
        let mut run_len = 0u64;
        for page in 0..state.bitmap.page_count() {
            if state.bitmap.is_free(page) {
                if run_start.is_none() {
                    run_start = Some(page);
                }
                run_len += 1;
            } else if let Some(start) = run_start.take() {
                if run_len >= COALESCE_THRESHOLD {
                    extents.push(Extent { start_page: start, page_count: run_len });
                }
                run_len = 0;
            }
        }
        if let Some(start) = run_start {
            if run_len >= COALESCE_THRESHOLD {
                extents.push(Extent { start_page: start, page_count: run_len });
            }
        }
        state.extents = ExtentList::from_extents(extents);
    }

    /// Wholesale state replacement. Used by a full vacuum, which plans a
    /// compacted allocation layout in a scratch `FreeSpaceMap` before
    /// committing it in place of this one's live state.
    pub fn replace_with(&self, other: FreeSpaceMap) {
        *self.state.lock() = other.state.into_inner();
    }

    pub fn statistics(&self) -> FsmStatistics {
        let state = self.state.lock();
        let total_pages = state.bitmap.page_count();
        let free_pages = state.bitmap.free_page_count();
        let largest_extent_pages = state.extents.largest_extent();
        FsmStatistics {
            total_pages,
            free_pages,
            largest_extent_pages,
            fragmentation_percent: fragmentation_percent(free_pages, largest_extent_pages),
        }
    }

    /// Encodes the region for writing to disk. Overflow beyond
    /// `region_capacity_bytes` is `Error::FsmOverflow`.
    pub fn encode_region(&self, region_capacity_bytes: u64) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let bitmap_bytes = state.bitmap.as_bytes();
        let extents = state.extents.as_slice();

        let total_len =
            FSM_HEADER_SIZE + bitmap_bytes.len() + 4 + extents.len() * 16;
        if total_len as u64 > region_capacity_bytes {
            return Err(Error::FsmOverflow(format!(
                "FSM region needs {total_len} bytes, region holds {region_capacity_bytes}"
            )));
        }

        let free_pages = state.bitmap.free_page_count();
        let header = FsmHeader::new(state.bitmap.page_count(), free_pages);

        let mut buf = header.encode();
        buf.extend_from_slice(bitmap_bytes);
        buf.extend_from_slice(&(extents.len() as u32).to_le_bytes());
        for extent in extents {
            buf.extend_from_slice(&extent.start_page.to_le_bytes());
            buf.extend_from_slice(&extent.page_count.to_le_bytes());
        }
        Ok(buf)
    }

    pub fn decode_region(data: &[u8]) -> Result<Self> {
        let header = FsmHeader::decode(&data[..FSM_HEADER_SIZE])?;
        let bitmap_byte_len = header.total_pages.div_ceil(8) as usize;
        let bitmap_start = FSM_HEADER_SIZE;
        let bitmap_end = bitmap_start + bitmap_byte_len;

        let bitmap = PageBitmap::from_bytes(data[bitmap_start..bitmap_end].to_vec(), header.total_pages);

        let extent_count = u32::from_le_bytes(data[bitmap_end..bitmap_end + 4].try_into().unwrap());
        let mut offset = bitmap_end + 4;
        let mut extents = Vec::with_capacity(extent_count as usize);
        for _ in 0..extent_count {
            let start_page = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap());
            let page_count = u64::from_le_bytes(data[offset + 8..offset + 16].try_into().unwrap());
            extents.push(Extent { start_page, page_count });
            offset += 16;
        }

        Ok(Self {
            state: Mutex::new(FsmState {
                bitmap,
                extents: ExtentList::from_extents(extents),
            }),
        })
    }
}

fn current_timestamp_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_free_returns_pages_to_the_pool() {
        let fsm = FreeSpaceMap::new(64);
        let start = fsm.allocate_pages(8).unwrap();
        fsm.free_pages(start, 8);
        assert_eq!(fsm.statistics().free_pages, 64);
    }

    #[test]
    fn allocate_grows_the_file_when_nothing_fits() {
        let fsm = FreeSpaceMap::new(4);
        let start = fsm.allocate_pages(8).unwrap();
        assert_eq!(start, 4);
        assert!(fsm.statistics().total_pages >= 12);
    }

    #[test]
    fn fragmentation_is_zero_for_one_contiguous_extent() {
        assert_eq!(fragmentation_percent(100, 100), 0);
    }

    #[test]
    fn fragmentation_is_high_when_free_space_is_scattered() {
        let pct = fragmentation_percent(100, 10);
        assert_eq!(pct, 90);
    }

    #[test]
    fn fragmentation_handles_zero_free_pages_without_dividing_by_zero() {
        assert_eq!(fragmentation_percent(0, 0), 0);
    }

    #[test]
    fn encode_decode_region_round_trips_bitmap_and_extents() {
        let fsm = FreeSpaceMap::new(256);
        fsm.allocate_pages(10).unwrap();
        let encoded = fsm.encode_region(1 << 20).unwrap();
        let decoded = FreeSpaceMap::decode_region(&encoded).unwrap();

        assert_eq!(decoded.statistics().total_pages, fsm.statistics().total_pages);
        assert_eq!(decoded.statistics().free_pages, fsm.statistics().free_pages);
    }

    #[test]
    fn encode_region_reports_overflow_when_region_too_small() {
        let fsm = FreeSpaceMap::new(256);
        let result = fsm.encode_region(4);
        assert!(matches!(result, Err(Error::FsmOverflow(_))));
    }

    #[test]
    fn growth_increment_respects_the_minimum_extension() {
        assert_eq!(growth_increment(10, 1), MIN_EXTENSION_PAGES);
    }

    #[test]
    fn growth_increment_scales_with_current_size() {
        let current = MIN_EXTENSION_PAGES * GROWTH_FACTOR * 10;
        assert_eq!(growth_increment(current, 1), current / GROWTH_FACTOR);
    }

    #[test]
    fn occupy_pages_undoes_a_free_pages_call() {
        let fsm = FreeSpaceMap::new(64);
        let start = fsm.allocate_pages(20).unwrap();
        fsm.free_pages(start, 20);
        assert_eq!(fsm.statistics().free_pages, 64);

        fsm.occupy_pages(start, 20);
        assert_eq!(fsm.statistics().free_pages, 44);
    }

    #[test]
    fn occupy_pages_splits_an_overlapping_extent() {
        let fsm = FreeSpaceMap::new(64);
        fsm.free_pages(0, 64);
        fsm.occupy_pages(20, 24);

        assert_eq!(fsm.statistics().free_pages, 40);
        // The occupied range must not be handed out by a later allocation.
        let allocated = fsm.allocate_extent(20).unwrap();
        assert!(allocated.start_page >= 44 || allocated.end_page() <= 20);
    }
}
