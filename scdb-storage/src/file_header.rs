//! The top-level 4 KiB file header that opens every `.scdb` file.
//!
//! Everything else in the file — the block registry, free-space map, WAL
//! and table directory — is found by following this header's region
//! descriptors. Like the WAL region header, it is a fixed-size struct with
//! a CRC32 integrity checksum over every field but itself; see the WAL
//! module docs for why header-level checksums are CRC32 while block and
//! record *content* checksums are SHA-256.
//!
//! ## Binary Layout
//!
//! ```text
//! Offset  Size  Field                 Description
//! ------  ----  -----                 -----------
//! 0       8     magic                 "SCDBHDR_"
//! 8       2     version               Format version (major.minor)
//! 10      2     flags                 Reserved, must be 0
//! 12      4     page_size             Page size in bytes (e.g. 4096)
//! 16      4     header_checksum       CRC32 over every other field
//! 20      8     created_at            Microseconds since Unix epoch
//! 28      8     modified_at           Microseconds since Unix epoch
//! 36      8     last_txn_id           Highest transaction id committed
//! 44      8     last_checkpoint_lsn   WAL LSN of the last checkpoint
//! 52      8     allocated_pages       Pages currently allocated in the file
//! 60      1     fragmentation_pct     FSM fragmentation metric, 0-100
//! 61      1     encryption_mode       0 = none, 1 = AES-256-GCM
//! 62      2     reserved_align        Zero
//! 64      12    nonce_seed            AEAD nonce seed (unused if not encrypted)
//! 76      16    registry_region       {offset: u64, length: u64}
//! 92      16    fsm_region            {offset: u64, length: u64}
//! 108     16    wal_region            {offset: u64, length: u64}
//! 124     16    table_directory_region {offset: u64, length: u64}
//! 140     8     last_vacuum_at        Microseconds since Unix epoch, 0 if never
//! 148     3948  reserved              Zero, pads the header to 4096 bytes
//! ```

use crate::format::{ChecksummedHeader, FileMetadata, RegionFormat, RegionHeader, ValidateFile};
use scdb_core::{EncryptionMode, Error, Result, FILE_HEADER_MAGIC};

use crc32fast::Hasher;

use std::time::{SystemTime, UNIX_EPOCH};

pub const FILE_HEADER_SIZE: usize = 4096;
pub const FILE_HEADER_CURRENT_VERSION: u16 = 0x0100;
const MAGIC_BYTES: &[u8; 8] = b"SCDBHDR_";

/// One region's location within the file: a byte offset and a byte length,
/// both page-aligned per the invariant carried from the region's own spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionDescriptor {
    pub offset: u64,
    pub length: u64,
}

impl RegionDescriptor {
    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        Self {
            offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            length: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }

    fn end(&self) -> u64 {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 8],
    pub version: u16,
    pub flags: u16,
    pub page_size: u32,
    pub header_checksum: u32,
    pub created_at: u64,
    pub modified_at: u64,
    pub last_txn_id: u64,
    pub last_checkpoint_lsn: u64,
    pub allocated_pages: u64,
    pub fragmentation_pct: u8,
    pub encryption_mode: EncryptionMode,
    pub nonce_seed: [u8; 12],
    pub registry_region: RegionDescriptor,
    pub fsm_region: RegionDescriptor,
    pub wal_region: RegionDescriptor,
    pub table_directory_region: RegionDescriptor,
    pub last_vacuum_at: u64,
}

impl FileHeader {
    pub fn new(page_size: u32) -> Self {
        let now = current_timestamp_micros();
        let mut header = Self {
            magic: *MAGIC_BYTES,
            version: FILE_HEADER_CURRENT_VERSION,
            flags: 0,
            page_size,
            header_checksum: 0,
            created_at: now,
            modified_at: now,
            last_txn_id: 0,
            last_checkpoint_lsn: 0,
            allocated_pages: 0,
            fragmentation_pct: 0,
            encryption_mode: EncryptionMode::None,
            nonce_seed: [0; 12],
            registry_region: RegionDescriptor::default(),
            fsm_region: RegionDescriptor::default(),
            wal_region: RegionDescriptor::default(),
            table_directory_region: RegionDescriptor::default(),
            last_vacuum_at: 0,
        };
        header.header_checksum = header.calculate_checksum();
        header
    }

    /// Confirms every region sits within a non-overlapping, page-aligned span.
    pub fn validate_region_layout(&self) -> Result<()> {
        let regions = [
            ("registry", self.registry_region),
            ("fsm", self.fsm_region),
            ("wal", self.wal_region),
            ("table_directory", self.table_directory_region),
        ];

        for (name, region) in regions {
            if region.offset % self.page_size as u64 != 0 {
                return Err(Error::HeaderInvalid(format!(
                    "{name} region offset {} is not page-aligned to {}",
                    region.offset, self.page_size
                )));
            }
        }

        let mut sorted = regions;
        sorted.sort_by_key(|(_, r)| r.offset);
        for pair in sorted.windows(2) {
            let (_, a) = pair[0];
            let (name_b, b) = pair[1];
            if a.length > 0 && a.end() > b.offset {
                return Err(Error::HeaderInvalid(format!(
                    "region {name_b} at offset {} overlaps the preceding region ending at {}",
                    b.offset,
                    a.end()
                )));
            }
        }

        Ok(())
    }
}

impl RegionFormat for FileHeader {
    const MAGIC: &'static [u8; 8] = MAGIC_BYTES;
    const FORMAT_NAME: &'static str = "scdb file header";
    const CURRENT_VERSION: u16 = FILE_HEADER_CURRENT_VERSION;
    const MIN_SUPPORTED_VERSION: u16 = 0x0100;
}

impl RegionHeader for FileHeader {
    const HEADER_SIZE: usize = FILE_HEADER_SIZE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::HEADER_SIZE];

        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.page_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.header_checksum.to_le_bytes());
        buf[20..28].copy_from_slice(&self.created_at.to_le_bytes());
        buf[28..36].copy_from_slice(&self.modified_at.to_le_bytes());
        buf[36..44].copy_from_slice(&self.last_txn_id.to_le_bytes());
        buf[44..52].copy_from_slice(&self.last_checkpoint_lsn.to_le_bytes());
        buf[52..60].copy_from_slice(&self.allocated_pages.to_le_bytes());
        buf[60] = self.fragmentation_pct;
        buf[61] = match self.encryption_mode {
            EncryptionMode::None => 0,
            EncryptionMode::Aes256Gcm => 1,
        };
        buf[64..76].copy_from_slice(&self.nonce_seed);
        self.registry_region.encode_into(&mut buf[76..92]);
        self.fsm_region.encode_into(&mut buf[92..108]);
        self.wal_region.encode_into(&mut buf[108..124]);
        self.table_directory_region.encode_into(&mut buf[124..140]);
        buf[140..148].copy_from_slice(&self.last_vacuum_at.to_le_bytes());

        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::HeaderInvalid(format!(
                "file header too small: {} bytes (expected {})",
                data.len(),
                Self::HEADER_SIZE
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);

        let version = u16::from_le_bytes(data[8..10].try_into().unwrap());
        let flags = u16::from_le_bytes(data[10..12].try_into().unwrap());
        let page_size = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let header_checksum = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let created_at = u64::from_le_bytes(data[20..28].try_into().unwrap());
        let modified_at = u64::from_le_bytes(data[28..36].try_into().unwrap());
        let last_txn_id = u64::from_le_bytes(data[36..44].try_into().unwrap());
        let last_checkpoint_lsn = u64::from_le_bytes(data[44..52].try_into().unwrap());
        let allocated_pages = u64::from_le_bytes(data[52..60].try_into().unwrap());
        let fragmentation_pct = data[60];
        let encryption_mode = match data[61] {
            0 => EncryptionMode::None,
            1 => EncryptionMode::Aes256Gcm,
            other => {
                return Err(Error::HeaderInvalid(format!(
                    "unknown encryption mode byte {other}"
                )))
            }
        };

        let mut nonce_seed = [0u8; 12];
        nonce_seed.copy_from_slice(&data[64..76]);

        let registry_region = RegionDescriptor::decode_from(&data[76..92]);
        let fsm_region = RegionDescriptor::decode_from(&data[92..108]);
        let wal_region = RegionDescriptor::decode_from(&data[108..124]);
        let table_directory_region = RegionDescriptor::decode_from(&data[124..140]);
        let last_vacuum_at = u64::from_le_bytes(data[140..148].try_into().unwrap());

        let header = Self {
            magic,
            version,
            flags,
            page_size,
            header_checksum,
            created_at,
            modified_at,
            last_txn_id,
            last_checkpoint_lsn,
            allocated_pages,
            fragmentation_pct,
            encryption_mode,
            nonce_seed,
            registry_region,
            fsm_region,
            wal_region,
            table_directory_region,
            last_vacuum_at,
        };

        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != Self::MAGIC {
            return Err(Error::HeaderInvalid("wrong magic bytes".to_string()));
        }

        if !self.is_version_supported() {
            return Err(Error::VersionUnsupported {
                found: self.version,
                min: Self::MIN_SUPPORTED_VERSION,
                current: Self::CURRENT_VERSION,
            });
        }

        if self.flags != 0 {
            return Err(Error::HeaderInvalid(format!(
                "reserved flags must be 0, found {:#x}",
                self.flags
            )));
        }

        if self.fragmentation_pct > 100 {
            return Err(Error::HeaderInvalid(format!(
                "fragmentation_pct {} out of range 0-100",
                self.fragmentation_pct
            )));
        }

        self.verify_checksum()?;
        self.validate_region_layout()?;
        Ok(())
    }

    fn magic(&self) -> &[u8; 8] {
        &self.magic
    }

    fn version(&self) -> u16 {
        self.version
    }
}

impl ValidateFile for FileHeader {}

impl ChecksummedHeader for FileHeader {
    fn calculate_checksum(&self) -> u32 {
        let mut hasher = Hasher::new();
        let mut encoded = self.encode();
        // Zero the checksum field before hashing, mirroring decode/encode symmetry.
        encoded[16..20].copy_from_slice(&[0, 0, 0, 0]);
        hasher.update(&encoded);
        hasher.finalize()
    }

    fn stored_checksum(&self) -> u32 {
        self.header_checksum
    }
}

impl FileMetadata for FileHeader {
    fn created_at(&self) -> u64 {
        self.created_at
    }
}

fn current_timestamp_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
