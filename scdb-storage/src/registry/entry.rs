//! On-disk block registry entry.
//!
//! Each entry is a fixed 96-byte record (one and a half cache lines) so the
//! registry region can be scanned as a flat array without a separate index.
//! The in-memory registry keys entries by name, and on reload that name is
//! rebuilt from this very inline field — so a name longer than
//! [`MAX_INLINE_NAME_LEN`] bytes would decode to something other than what
//! it was stored under. `StorageProvider::write_block` rejects names over
//! that length before an entry is ever built; `BlockEntry::new` itself
//! still truncates rather than panicking, since it has no way to reject on
//! behalf of a caller that bypasses the provider.
//!
//! ## Binary Layout
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  -----      -----------
//! 0       1     type_tag   Caller-defined block type discriminant
//! 1       1     flags      bit0 dirty, bit1 deleted, bit2 encrypted, bit3 continuation
//! 2       2     reserved   Zero
//! 4       8     offset     Byte offset of the block's first page
//! 12      8     length     Block length in bytes
//! 20      32    checksum   SHA-256 of the block's on-disk bytes
//! 52      1     name_len   Length of `name` actually in use (<= 32)
//! 53      3     reserved   Zero
//! 56      32    name       UTF-8 name, truncated and zero-padded to 32 bytes
//! 88      8     allocated_pages  Pages reserved for this block, >= ceil(length / page_size)
//! ```

use scdb_core::{Error, Result};

pub const BLOCK_ENTRY_SIZE: usize = 96;
pub const MAX_INLINE_NAME_LEN: usize = 32;

const FLAG_DIRTY: u8 = 0b0001;
const FLAG_DELETED: u8 = 0b0010;
const FLAG_ENCRYPTED: u8 = 0b0100;
const FLAG_CONTINUATION: u8 = 0b1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub type_tag: u8,
    pub dirty: bool,
    pub deleted: bool,
    pub encrypted: bool,
    pub continuation: bool,
    pub offset: u64,
    pub length: u64,
    pub checksum: [u8; 32],
    pub inline_name: [u8; MAX_INLINE_NAME_LEN],
    pub inline_name_len: u8,
    /// Pages currently reserved for this block. Always >= the page count
    /// `length` needs; a shrinking write reuses the existing allocation
    /// rather than reallocating, so this can exceed `length`'s own page
    /// requirement until the next grow or a vacuum relocates the block.
    pub allocated_pages: u64,
}

impl BlockEntry {
    pub fn new(
        type_tag: u8,
        name: &str,
        offset: u64,
        length: u64,
        allocated_pages: u64,
        checksum: [u8; 32],
    ) -> Self {
        let mut inline_name = [0u8; MAX_INLINE_NAME_LEN];
        let truncated = &name.as_bytes()[..name.len().min(MAX_INLINE_NAME_LEN)];
        inline_name[..truncated.len()].copy_from_slice(truncated);

        Self {
            type_tag,
            dirty: true,
            deleted: false,
            encrypted: false,
            continuation: false,
            offset,
            length,
            checksum,
            inline_name,
            inline_name_len: truncated.len() as u8,
            allocated_pages,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.dirty {
            flags |= FLAG_DIRTY;
        }
        if self.deleted {
            flags |= FLAG_DELETED;
        }
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if self.continuation {
            flags |= FLAG_CONTINUATION;
        }
        flags
    }

    pub fn encode(&self) -> [u8; BLOCK_ENTRY_SIZE] {
        let mut buf = [0u8; BLOCK_ENTRY_SIZE];
        buf[0] = self.type_tag;
        buf[1] = self.flags();
        buf[4..12].copy_from_slice(&self.offset.to_le_bytes());
        buf[12..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20..52].copy_from_slice(&self.checksum);
        buf[52] = self.inline_name_len;
        buf[56..88].copy_from_slice(&self.inline_name);
        buf[88..96].copy_from_slice(&self.allocated_pages.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < BLOCK_ENTRY_SIZE {
            return Err(Error::Corruption(format!(
                "block registry entry too small: {} bytes (expected {})",
                data.len(),
                BLOCK_ENTRY_SIZE
            )));
        }

        let type_tag = data[0];
        let flags = data[1];
        let offset = u64::from_le_bytes(data[4..12].try_into().unwrap());
        let length = u64::from_le_bytes(data[12..20].try_into().unwrap());

        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&data[20..52]);

        let inline_name_len = data[52];
        if inline_name_len as usize > MAX_INLINE_NAME_LEN {
            return Err(Error::Corruption(format!(
                "block registry entry name_len {inline_name_len} exceeds {MAX_INLINE_NAME_LEN}"
            )));
        }

        let mut inline_name = [0u8; MAX_INLINE_NAME_LEN];
        inline_name.copy_from_slice(&data[56..88]);
        let allocated_pages = u64::from_le_bytes(data[88..96].try_into().unwrap());

        Ok(Self {
            type_tag,
            dirty: flags & FLAG_DIRTY != 0,
            deleted: flags & FLAG_DELETED != 0,
            encrypted: flags & FLAG_ENCRYPTED != 0,
            continuation: flags & FLAG_CONTINUATION != 0,
            offset,
            length,
            checksum,
            inline_name,
            inline_name_len,
            allocated_pages,
        })
    }

    pub fn inline_name_str(&self) -> &str {
        std::str::from_utf8(&self.inline_name[..self.inline_name_len as usize]).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_a_short_name() {
        let entry = BlockEntry::new(1, "users", 4096, 8192, 2, [7u8; 32]);
        let decoded = BlockEntry::decode(&entry.encode()).unwrap();
        assert_eq!(entry, decoded);
        assert_eq!(decoded.inline_name_str(), "users");
        assert_eq!(decoded.allocated_pages, 2);
    }

    #[test]
    fn new_truncates_rather_than_rejects_an_oversized_name() {
        // BlockEntry::new has no way to reject on a caller's behalf; the
        // name-length cap is enforced one layer up, by the provider.
        let long_name = "a".repeat(64);
        let entry = BlockEntry::new(2, &long_name, 0, 0, 0, [0u8; 32]);
        assert_eq!(entry.inline_name_len as usize, MAX_INLINE_NAME_LEN);
        assert_eq!(entry.inline_name_str().len(), MAX_INLINE_NAME_LEN);
    }

    #[test]
    fn decode_rejects_corrupted_name_length() {
        let entry = BlockEntry::new(1, "x", 0, 0, 0, [0u8; 32]);
        let mut encoded = entry.encode();
        encoded[52] = 200;
        assert!(BlockEntry::decode(&encoded).is_err());
    }

    #[test]
    fn flags_round_trip_independently() {
        let mut entry = BlockEntry::new(1, "b", 0, 0, 0, [0u8; 32]);
        entry.dirty = false;
        entry.deleted = true;
        entry.encrypted = true;
        let decoded = BlockEntry::decode(&entry.encode()).unwrap();
        assert!(!decoded.dirty);
        assert!(decoded.deleted);
        assert!(decoded.encrypted);
        assert!(!decoded.continuation);
    }
}
