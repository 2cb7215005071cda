//! Write-ahead log region header.
//!
//! The WAL region begins with a 128-byte header (two cache lines) giving
//! the ring-buffer geometry needed to interpret the entry area that
//! follows it: the fixed entry size, the ring's capacity, the current and
//! last-checkpointed LSNs, and the head/tail byte offsets within the
//! entry area.
//!
//! ## Binary Layout
//!
//! ```text
//! struct WalHeader {
//!     magic: [u8; 8],              // offset 0:   "SCDBWAL_"
//!     version: u16,                // offset 8:   0x0100 (v1.0)
//!     flags: u16,                  // offset 10:  reserved, must be 0
//!     header_size: u32,            // offset 12:  128
//!     header_checksum: u32,        // offset 16:  CRC32 of bytes 0-15,20-127
//!     entry_start_offset: u32,     // offset 20:  128
//!     created_at: u64,             // offset 24:  microseconds since epoch
//!     file_sequence: u64,          // offset 32:  unique region instance id
//!     entry_size: u32,             // offset 40:  fixed size of one WAL record
//!     max_entries: u32,            // offset 44:  ring capacity
//!     current_lsn: u64,            // offset 48:  next LSN to assign
//!     last_checkpoint_lsn: u64,    // offset 56:  LSN of the last checkpoint
//!     head_offset: u64,            // offset 64:  byte offset of the oldest live record
//!     tail_offset: u64,            // offset 72:  byte offset of the next write
//!     reserved: [u8; 48],          // offset 80:  zeros (future use)
//! } // Total: 128 bytes
//! ```
//!
//! The checksum covers every field except itself, the same convention the
//! top-level file header uses.

use crate::format::{ChecksummedHeader, RegionFormat, RegionHeader, ValidateFile};
use scdb_core::{Error, Result, WAL_MAGIC as WAL_MAGIC_U64};

use crc32fast::Hasher;

use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes identifying the WAL region: "SCDBWAL_"
pub const WAL_MAGIC: &[u8; 8] = b"SCDBWAL_";

/// Current WAL region format version (1.0).
pub const WAL_CURRENT_VERSION: u16 = 0x0100;

/// Size of the WAL region header in bytes.
pub const WAL_HEADER_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: [u8; 8],
    pub version: u16,
    pub flags: u16,
    pub header_size: u32,
    pub header_checksum: u32,
    pub entry_start_offset: u32,
    pub created_at: u64,
    pub file_sequence: u64,
    /// Fixed size, in bytes, of one WAL record slot.
    pub entry_size: u32,
    /// Number of record slots the ring buffer holds.
    pub max_entries: u32,
    /// Next LSN that will be assigned to an appended record.
    pub current_lsn: u64,
    /// LSN of the most recent checkpoint; replay may start here.
    pub last_checkpoint_lsn: u64,
    /// Byte offset (from `entry_start_offset`) of the oldest live record.
    pub head_offset: u64,
    /// Byte offset (from `entry_start_offset`) of the next write position.
    pub tail_offset: u64,
    pub reserved: [u8; 48],
}

impl WalHeader {
    pub fn new(file_sequence: u64, entry_size: u32, max_entries: u32) -> Self {
        let mut header = Self {
            magic: *WAL_MAGIC,
            version: WAL_CURRENT_VERSION,
            flags: 0,
            header_size: WAL_HEADER_SIZE as u32,
            header_checksum: 0,
            entry_start_offset: WAL_HEADER_SIZE as u32,
            created_at: current_timestamp_micros(),
            file_sequence,
            entry_size,
            max_entries,
            current_lsn: 0,
            last_checkpoint_lsn: 0,
            head_offset: 0,
            tail_offset: 0,
            reserved: [0; 48],
        };
        header.header_checksum = header.calculate_checksum();
        header
    }

    /// Confirms the top-level file header's WAL magic constant and this
    /// region's own magic agree; the two are deliberately kept as separate
    /// constants (one `u64`, one `[u8; 8]`) because the region header is
    /// byte-oriented while the file header's region table is word-oriented.
    pub fn magic_matches_core(&self) -> bool {
        u64::from_le_bytes(self.magic) == WAL_MAGIC_U64
    }
}

impl RegionFormat for WalHeader {
    const MAGIC: &'static [u8; 8] = WAL_MAGIC;
    const FORMAT_NAME: &'static str = "WAL";
    const CURRENT_VERSION: u16 = WAL_CURRENT_VERSION;
    const MIN_SUPPORTED_VERSION: u16 = 0x0100;
}

impl RegionHeader for WalHeader {
    const HEADER_SIZE: usize = WAL_HEADER_SIZE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::HEADER_SIZE];

        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.header_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.header_checksum.to_le_bytes());
        buf[20..24].copy_from_slice(&self.entry_start_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.created_at.to_le_bytes());
        buf[32..40].copy_from_slice(&self.file_sequence.to_le_bytes());
        buf[40..44].copy_from_slice(&self.entry_size.to_le_bytes());
        buf[44..48].copy_from_slice(&self.max_entries.to_le_bytes());
        buf[48..56].copy_from_slice(&self.current_lsn.to_le_bytes());
        buf[56..64].copy_from_slice(&self.last_checkpoint_lsn.to_le_bytes());
        buf[64..72].copy_from_slice(&self.head_offset.to_le_bytes());
        buf[72..80].copy_from_slice(&self.tail_offset.to_le_bytes());
        buf[80..128].copy_from_slice(&self.reserved);

        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "WAL header too small: {} bytes (expected {})",
                data.len(),
                Self::HEADER_SIZE
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);

        let version = u16::from_le_bytes([data[8], data[9]]);
        let flags = u16::from_le_bytes([data[10], data[11]]);
        let header_size = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let header_checksum = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let entry_start_offset = u32::from_le_bytes(data[20..24].try_into().unwrap());
        let created_at = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let file_sequence = u64::from_le_bytes(data[32..40].try_into().unwrap());
        let entry_size = u32::from_le_bytes(data[40..44].try_into().unwrap());
        let max_entries = u32::from_le_bytes(data[44..48].try_into().unwrap());
        let current_lsn = u64::from_le_bytes(data[48..56].try_into().unwrap());
        let last_checkpoint_lsn = u64::from_le_bytes(data[56..64].try_into().unwrap());
        let head_offset = u64::from_le_bytes(data[64..72].try_into().unwrap());
        let tail_offset = u64::from_le_bytes(data[72..80].try_into().unwrap());

        let mut reserved = [0u8; 48];
        reserved.copy_from_slice(&data[80..128]);

        let header = Self {
            magic,
            version,
            flags,
            header_size,
            header_checksum,
            entry_start_offset,
            created_at,
            file_sequence,
            entry_size,
            max_entries,
            current_lsn,
            last_checkpoint_lsn,
            head_offset,
            tail_offset,
            reserved,
        };

        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != Self::MAGIC {
            return Err(Error::Corruption(format!(
                "invalid WAL magic: expected {:?}, found {:?}",
                Self::MAGIC,
                self.magic
            )));
        }

        if !self.is_version_supported() {
            return Err(Error::Corruption(format!(
                "unsupported WAL version: {}.{} (supported: {}.x)",
                self.version >> 8,
                self.version & 0xFF,
                Self::CURRENT_VERSION >> 8
            )));
        }

        if self.header_size != Self::HEADER_SIZE as u32 {
            return Err(Error::Corruption(format!(
                "invalid WAL header size: {} (expected {})",
                self.header_size,
                Self::HEADER_SIZE
            )));
        }

        if self.flags != 0 {
            return Err(Error::Corruption(format!(
                "invalid WAL flags: {:#x} (must be 0)",
                self.flags
            )));
        }

        if self.max_entries == 0 {
            return Err(Error::Corruption(
                "WAL max_entries must be nonzero".to_string(),
            ));
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

impl ValidateFile for WalHeader {}

impl ChecksummedHeader for WalHeader {
    fn calculate_checksum(&self) -> u32 {
        let mut hasher = Hasher::new();

        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.flags.to_le_bytes());
        hasher.update(&self.header_size.to_le_bytes());
        // header_checksum itself is excluded.
        hasher.update(&self.entry_start_offset.to_le_bytes());
        hasher.update(&self.created_at.to_le_bytes());
        hasher.update(&self.file_sequence.to_le_bytes());
        hasher.update(&self.entry_size.to_le_bytes());
        hasher.update(&self.max_entries.to_le_bytes());
        hasher.update(&self.current_lsn.to_le_bytes());
        hasher.update(&self.last_checkpoint_lsn.to_le_bytes());
        hasher.update(&self.head_offset.to_le_bytes());
        hasher.update(&self.tail_offset.to_le_bytes());
        hasher.update(&self.reserved);

        hasher.finalize()
    }

    fn stored_checksum(&self) -> u32 {
        self.header_checksum
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
    fn encode_decode_preserves_all_header_fields() {
        let header = WalHeader::new(1, 4096, 256);
        let encoded = header.encode();
        let decoded = WalHeader::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn validate_returns_error_for_incorrect_magic() {
        let mut header = WalHeader::new(1, 4096, 256);
        header.magic = *b"BADMAGIC";
        assert!(header.validate().is_err());
    }

    #[test]
    fn decode_returns_error_when_checksum_corrupted() {
        let header = WalHeader::new(1, 4096, 256);
        let mut corrupted = header.encode();
        corrupted[50] ^= 0xFF;

        let result = WalHeader::decode(&corrupted);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::Corruption(msg) if msg.contains("checksum")));
    }

    #[test]
    fn validate_rejects_zero_capacity_ring() {
        let mut header = WalHeader::new(1, 4096, 256);
        header.max_entries = 0;
        header.header_checksum = header.calculate_checksum();
        assert!(header.validate().is_err());
    }

    #[test]
    fn header_size_is_two_cache_lines() {
        assert_eq!(WAL_HEADER_SIZE, 128);
        assert_eq!(std::mem::size_of::<WalHeader>(), 128);
    }

    #[test]
    fn new_header_starts_with_lsn_and_offsets_at_zero() {
        let header = WalHeader::new(7, 4096, 64);
        assert_eq!(header.current_lsn, 0);
        assert_eq!(header.last_checkpoint_lsn, 0);
        assert_eq!(header.head_offset, 0);
        assert_eq!(header.tail_offset, 0);
        assert!(header.magic_matches_core());
    }
}
