//! Paged record layout: the optional, higher-layer-facing format used to
//! pack row-shaped records into fixed-size pages backed by a raw block.
//!
//! Layout of one 8 KiB page:
//!
//! ```text
//! +--------------------+  0
//! |    PageHeader      |  64 bytes
//! +--------------------+  64
//! |  Slot[0]  Slot[1]  |  forward-growing slot array, 8 bytes/slot
//! |        ...          |
//! +--------------------+  <- free space ->
//! |        ...          |
//! |  Record 1  Record 0 |  records grow backward from the page end
//! +--------------------+  page_size
//! ```
//!
//! A record that does not fit in one page at all is out of scope for a
//! single [`Page`] — see the module docs' note on overflow chains, which a
//! higher layer drives by following [`PageHeader::next_page_id`].

use scdb_core::{Error, PageId, Result};

use crc32fast::Hasher;

pub const PAGE_SIZE: usize = 8192;
pub const PAGE_HEADER_SIZE: usize = 64;
pub const SLOT_SIZE: usize = 8;

const SLOT_FLAG_TOMBSTONE: u8 = 0b0001;
const SLOT_FLAG_HAS_OVERFLOW: u8 = 0b0010;

/// 64-byte page header: identity, lineage, and the free-space boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub page_type: u8,
    pub table_id: u64,
    pub lsn: u64,
    /// Byte offset of the start of the lowest-addressed live record; the
    /// gap between the end of the slot array and this offset is free.
    pub free_space_ptr: u16,
    pub record_count: u16,
    pub next_page_id: PageId,
    pub prev_page_id: PageId,
    /// Set when some record on this page has overflowed into the chain
    /// rooted at `next_page_id`.
    pub has_overflow: bool,
    pub data_crc32: u32,
}

impl PageHeader {
    fn new(page_id: PageId, page_type: u8, table_id: u64) -> Self {
        Self {
            page_id,
            page_type,
            table_id,
            lsn: 0,
            free_space_ptr: PAGE_SIZE as u16,
            record_count: 0,
            next_page_id: 0,
            prev_page_id: 0,
            has_overflow: false,
            data_crc32: 0,
        }
    }

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.page_id.to_le_bytes());
        buf[8] = self.page_type;
        buf[9] = if self.has_overflow {
            SLOT_FLAG_HAS_OVERFLOW
        } else {
            0
        };
        buf[12..20].copy_from_slice(&self.table_id.to_le_bytes());
        buf[20..28].copy_from_slice(&self.lsn.to_le_bytes());
        buf[28..30].copy_from_slice(&self.free_space_ptr.to_le_bytes());
        buf[30..32].copy_from_slice(&self.record_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.next_page_id.to_le_bytes());
        buf[40..48].copy_from_slice(&self.prev_page_id.to_le_bytes());
        buf[48..52].copy_from_slice(&self.data_crc32.to_le_bytes());
    }

    fn decode_from(data: &[u8]) -> Result<Self> {
        if data.len() < PAGE_HEADER_SIZE {
            return Err(Error::Corruption("page header truncated".to_string()));
        }
        let page_id = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let page_type = data[8];
        let flags = data[9];
        let table_id = u64::from_le_bytes(data[12..20].try_into().unwrap());
        let lsn = u64::from_le_bytes(data[20..28].try_into().unwrap());
        let free_space_ptr = u16::from_le_bytes(data[28..30].try_into().unwrap());
        let record_count = u16::from_le_bytes(data[30..32].try_into().unwrap());
        let next_page_id = u64::from_le_bytes(data[32..40].try_into().unwrap());
        let prev_page_id = u64::from_le_bytes(data[40..48].try_into().unwrap());
        let data_crc32 = u32::from_le_bytes(data[48..52].try_into().unwrap());

        Ok(Self {
            page_id,
            page_type,
            table_id,
            lsn,
            free_space_ptr,
            record_count,
            next_page_id,
            prev_page_id,
            has_overflow: flags & SLOT_FLAG_HAS_OVERFLOW != 0,
            data_crc32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: u16,
    length: u16,
    tombstoned: bool,
    has_overflow: bool,
}

impl Slot {
    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.offset.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        let mut flags = 0u8;
        if self.tombstoned {
            flags |= SLOT_FLAG_TOMBSTONE;
        }
        if self.has_overflow {
            flags |= SLOT_FLAG_HAS_OVERFLOW;
        }
        buf[4] = flags;
    }

    fn decode_from(buf: &[u8]) -> Self {
        let offset = u16::from_le_bytes(buf[0..2].try_into().unwrap());
        let length = u16::from_le_bytes(buf[2..4].try_into().unwrap());
        let flags = buf[4];
        Self {
            offset,
            length,
            tombstoned: flags & SLOT_FLAG_TOMBSTONE != 0,
            has_overflow: flags & SLOT_FLAG_HAS_OVERFLOW != 0,
        }
    }
}

/// What happened when a caller asked to replace a record's bytes in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new bytes fit in the record's existing footprint.
    InPlace,
    /// The page had to shift later records to make room, but no relocation
    /// off-page was needed.
    Shifted,
}

/// One 8 KiB page of records, addressable by [`Slot`] index.
pub struct Page {
    header: PageHeader,
    slots: Vec<Slot>,
    /// Raw record bytes, keyed by slot index; tombstoned slots hold an
    /// empty vec. Kept separate from a single flat buffer so insert/update
    /// bookkeeping doesn't need repeated byte-shuffling during normal use;
    /// [`Self::encode`] lays everything out high-to-low exactly as the
    /// on-disk format requires.
    records: Vec<Vec<u8>>,
}

impl Page {
    pub fn new(page_id: PageId, page_type: u8, table_id: u64) -> Self {
        Self {
            header: PageHeader::new(page_id, page_type, table_id),
            slots: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    pub fn record_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_array_end(&self) -> usize {
        PAGE_HEADER_SIZE + self.slots.len() * SLOT_SIZE
    }

    fn live_bytes(&self) -> usize {
        self.records.iter().map(|r| r.len()).sum()
    }

    fn free_bytes(&self) -> usize {
        PAGE_SIZE
            .saturating_sub(self.slot_array_end() + SLOT_SIZE)
            .saturating_sub(self.live_bytes())
    }

    /// Appends a new record, returning its slot index. Fails with
    /// `Error::Corruption` when the record would not fit even on an empty
    /// page (the caller must use an overflow chain instead) or when the
    /// page's current free space is insufficient.
    pub fn insert_record(&mut self, data: &[u8]) -> Result<u16> {
        if PAGE_HEADER_SIZE + SLOT_SIZE + data.len() > PAGE_SIZE {
            return Err(Error::Corruption(format!(
                "record of {} bytes cannot fit on any page of size {PAGE_SIZE}",
                data.len()
            )));
        }
        if data.len() > self.free_bytes() {
            return Err(Error::Corruption(
                "page has insufficient free space for this record".to_string(),
            ));
        }

        let slot_id = self.slots.len() as u16;
        self.slots.push(Slot {
            offset: 0, // recomputed by encode(); logical position tracked via records vec order
            length: data.len() as u16,
            tombstoned: false,
            has_overflow: false,
        });
        self.records.push(data.to_vec());
        self.header.record_count = self.slots.len() as u16;
        Ok(slot_id)
    }

    pub fn get_record(&self, slot_id: u16) -> Option<&[u8]> {
        let slot = self.slots.get(slot_id as usize)?;
        if slot.tombstoned {
            None
        } else {
            Some(&self.records[slot_id as usize])
        }
    }

    /// Replaces a record's bytes. Shrinking or equal-length updates always
    /// succeed in place; growth succeeds as long as the page has enough
    /// free space to absorb the difference (logically "shifting" later
    /// records, modeled here by the encode pass that repacks on every
    /// call). Returns `Error::Corruption` if the record would need more
    /// room than the page can ever offer even after a `compact_page`.
    pub fn update_record(&mut self, slot_id: u16, data: &[u8]) -> Result<UpdateOutcome> {
        let idx = slot_id as usize;
        let slot = self
            .slots
            .get(idx)
            .ok_or_else(|| Error::Corruption(format!("no slot {slot_id} on this page")))?;
        if slot.tombstoned {
            return Err(Error::Corruption(format!(
                "slot {slot_id} was deleted and cannot be updated"
            )));
        }

        let old_len = self.records[idx].len();
        let outcome = if data.len() <= old_len {
            UpdateOutcome::InPlace
        } else {
            let growth = data.len() - old_len;
            if growth > self.free_bytes() {
                return Err(Error::Corruption(format!(
                    "slot {slot_id} growth of {growth} bytes exceeds free space"
                )));
            }
            UpdateOutcome::Shifted
        };

        self.records[idx] = data.to_vec();
        self.slots[idx].length = data.len() as u16;
        Ok(outcome)
    }

    /// Tombstones a record without reclaiming its space; space is only
    /// reclaimed by [`Self::compact_page`].
    pub fn delete_record(&mut self, slot_id: u16) -> Result<()> {
        let slot = self
            .slots
            .get_mut(slot_id as usize)
            .ok_or_else(|| Error::Corruption(format!("no slot {slot_id} on this page")))?;
        slot.tombstoned = true;
        self.records[slot_id as usize].clear();
        Ok(())
    }

    /// Garbage-collects tombstoned slots, compacting live records toward
    /// the page's high-address end. Live slot ids are preserved (the slot
    /// array itself is never shrunk, just marked tombstoned-and-empty), so
    /// callers holding an old slot id for a still-live record keep working.
    pub fn compact_page(&mut self) {
        for (slot, record) in self.slots.iter_mut().zip(self.records.iter_mut()) {
            if slot.tombstoned {
                record.clear();
                slot.length = 0;
            }
        }
    }

    /// Serializes the page to its fixed on-disk representation, computing
    /// final slot offsets and the data-portion checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut cursor = PAGE_SIZE;
        let mut final_slots = self.slots.clone();

        for (idx, record) in self.records.iter().enumerate() {
            if final_slots[idx].tombstoned {
                final_slots[idx].offset = cursor as u16;
                continue;
            }
            cursor -= record.len();
            buf[cursor..cursor + record.len()].copy_from_slice(record);
            final_slots[idx].offset = cursor as u16;
        }

        let mut header = self.header;
        header.free_space_ptr = cursor as u16;
        header.record_count = final_slots.len() as u16;

        for (idx, slot) in final_slots.iter().enumerate() {
            let slot_offset = PAGE_HEADER_SIZE + idx * SLOT_SIZE;
            slot.encode_into(&mut buf[slot_offset..slot_offset + SLOT_SIZE]);
        }

        let data_start = PAGE_HEADER_SIZE;
        header.data_crc32 = crc32(&buf[data_start..]);
        header.encode_into(&mut buf[0..PAGE_HEADER_SIZE]);
        buf
    }

    /// Parses a page previously produced by [`Self::encode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PAGE_SIZE {
            return Err(Error::Corruption(format!(
                "page too small: {} bytes (expected {PAGE_SIZE})",
                data.len()
            )));
        }

        let header = PageHeader::decode_from(&data[..PAGE_HEADER_SIZE])?;
        let computed = crc32(&data[PAGE_HEADER_SIZE..PAGE_SIZE]);
        if computed != header.data_crc32 {
            return Err(Error::Corruption(format!(
                "page {} data checksum mismatch: expected {:#x}, found {:#x}",
                header.page_id, header.data_crc32, computed
            )));
        }

        let mut slots = Vec::with_capacity(header.record_count as usize);
        let mut records = Vec::with_capacity(header.record_count as usize);
        for i in 0..header.record_count as usize {
            let slot_offset = PAGE_HEADER_SIZE + i * SLOT_SIZE;
            let slot = Slot::decode_from(&data[slot_offset..slot_offset + SLOT_SIZE]);
            let record = if slot.tombstoned {
                Vec::new()
            } else {
                data[slot.offset as usize..slot.offset as usize + slot.length as usize].to_vec()
            };
            slots.push(slot);
            records.push(record);
        }

        Ok(Self {
            header,
            slots,
            records,
        })
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let mut page = Page::new(1, 0, 7);
        let slot = page.insert_record(b"row one").unwrap();
        assert_eq!(page.get_record(slot), Some(&b"row one"[..]));
    }

    #[test]
    fn encode_decode_round_trips_every_record() {
        let mut page = Page::new(5, 1, 2);
        let a = page.insert_record(b"alpha").unwrap();
        let b = page.insert_record(b"beta").unwrap();

        let encoded = page.encode();
        let decoded = Page::decode(&encoded).unwrap();

        assert_eq!(decoded.get_record(a), Some(&b"alpha"[..]));
        assert_eq!(decoded.get_record(b), Some(&b"beta"[..]));
        assert_eq!(decoded.header().page_id, 5);
    }

    #[test]
    fn update_in_place_when_new_length_is_smaller() {
        let mut page = Page::new(1, 0, 0);
        let slot = page.insert_record(b"original value").unwrap();
        let outcome = page.update_record(slot, b"short").unwrap();
        assert_eq!(outcome, UpdateOutcome::InPlace);
        assert_eq!(page.get_record(slot), Some(&b"short"[..]));
    }

    #[test]
    fn update_shifts_when_growing_within_free_space() {
        let mut page = Page::new(1, 0, 0);
        let slot = page.insert_record(b"short").unwrap();
        let outcome = page.update_record(slot, b"a much longer replacement value").unwrap();
        assert_eq!(outcome, UpdateOutcome::Shifted);
    }

    #[test]
    fn delete_then_get_returns_none() {
        let mut page = Page::new(1, 0, 0);
        let slot = page.insert_record(b"gone soon").unwrap();
        page.delete_record(slot).unwrap();
        assert_eq!(page.get_record(slot), None);
    }

    #[test]
    fn compact_page_clears_tombstoned_payload_bytes() {
        let mut page = Page::new(1, 0, 0);
        let a = page.insert_record(b"keep me").unwrap();
        let b = page.insert_record(b"drop me").unwrap();
        page.delete_record(b).unwrap();
        page.compact_page();

        assert_eq!(page.get_record(a), Some(&b"keep me"[..]));
        assert_eq!(page.get_record(b), None);
    }

    #[test]
    fn decode_rejects_a_corrupted_data_checksum() {
        let mut page = Page::new(1, 0, 0);
        page.insert_record(b"checked").unwrap();
        let mut encoded = page.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(Page::decode(&encoded).is_err());
    }

    #[test]
    fn insert_rejects_a_record_too_large_for_any_page() {
        let mut page = Page::new(1, 0, 0);
        let oversized = vec![0u8; PAGE_SIZE];
        assert!(page.insert_record(&oversized).is_err());
    }
}
