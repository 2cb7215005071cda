//! Table directory: a dense array of table descriptors mapping a table id
//! to its name, its schema-block reference, and a handful of flags.
//!
//! Schema payloads are opaque bytes as far as this crate is concerned —
//! whatever sits above scdb is responsible for interpreting them. The
//! directory only needs to know where a table's schema block lives so it
//! can be fetched through the block registry.
//!
//! Flush discipline mirrors [`crate::registry::BlockRegistry`]: entries
//! accumulate in memory, a dirty counter tracks how much has changed since
//! the last flush, and `encode_region`/`decode_region` serialize the whole
//! directory as one flat array.
//!
//! ## Region Layout
//!
//! ```text
//! +-------------------+
//! |  directory header  |  64 bytes - magic/version/count/checksum
//! +-------------------+
//! |  descriptor 0       |  80 bytes
//! +-------------------+
//! |  descriptor 1       |
//! +-------------------+
//! |       ...           |
//! +-------------------+
//! ```

use crate::format::{ChecksummedHeader, EntryBasedFile, RegionFormat, RegionHeader as RegionHeaderTrait, ValidateFile};
use scdb_core::{BlockName, Error, Result};

use crc32fast::Hasher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const TABLE_DIRECTORY_MAGIC: &[u8; 8] = b"SCDBTBL_";
pub const DIRECTORY_HEADER_SIZE: usize = 64;
const DIRECTORY_CURRENT_VERSION: u16 = 0x0100;

pub const TABLE_DESCRIPTOR_SIZE: usize = 80;
const MAX_INLINE_NAME_LEN: usize = 48;

const FLAG_DROPPED: u8 = 0b0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub table_id: u64,
    pub name: String,
    pub schema_block_name: BlockName,
    pub dropped: bool,
}

impl TableDescriptor {
    pub fn new(table_id: u64, name: impl Into<String>, schema_block_name: impl Into<BlockName>) -> Self {
        Self {
            table_id,
            name: name.into(),
            schema_block_name: schema_block_name.into(),
            dropped: false,
        }
    }

    fn encode(&self) -> Result<[u8; TABLE_DESCRIPTOR_SIZE]> {
        let mut buf = [0u8; TABLE_DESCRIPTOR_SIZE];
        buf[0..8].copy_from_slice(&self.table_id.to_le_bytes());

        let flags = if self.dropped { FLAG_DROPPED } else { 0 };
        buf[8] = flags;

        let name_bytes = self.name.as_bytes();
        if name_bytes.len() > MAX_INLINE_NAME_LEN {
            return Err(Error::Corruption(format!(
                "table name {:?} exceeds {MAX_INLINE_NAME_LEN} bytes",
                self.name
            )));
        }
        buf[9] = name_bytes.len() as u8;
        buf[16..16 + name_bytes.len()].copy_from_slice(name_bytes);

        let schema_bytes = self.schema_block_name.as_bytes();
        if schema_bytes.len() > MAX_INLINE_NAME_LEN - 16 {
            return Err(Error::Corruption(format!(
                "schema block name {:?} exceeds {} bytes",
                self.schema_block_name,
                MAX_INLINE_NAME_LEN - 16
            )));
        }
        // name occupies 16..64, schema name occupies 64..80 (16 bytes) plus length at 10
        buf[10] = schema_bytes.len() as u8;
        buf[64..64 + schema_bytes.len()].copy_from_slice(schema_bytes);

        Ok(buf)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < TABLE_DESCRIPTOR_SIZE {
            return Err(Error::Corruption(format!(
                "table descriptor too small: {} bytes (expected {})",
                data.len(),
                TABLE_DESCRIPTOR_SIZE
            )));
        }

        let table_id = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let flags = data[8];
        let name_len = data[9] as usize;
        let schema_len = data[10] as usize;

        if name_len > 48 || schema_len > 16 {
            return Err(Error::Corruption(
                "table descriptor has out-of-range inline lengths".to_string(),
            ));
        }

        let name = std::str::from_utf8(&data[16..16 + name_len])
            .map_err(|e| Error::Corruption(format!("table name is not valid UTF-8: {e}")))?
            .to_string();
        let schema_block_name = std::str::from_utf8(&data[64..64 + schema_len])
            .map_err(|e| Error::Corruption(format!("schema block name is not valid UTF-8: {e}")))?
            .to_string();

        Ok(Self {
            table_id,
            name,
            schema_block_name,
            dropped: flags & FLAG_DROPPED != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryHeader {
    pub magic: [u8; 8],
    pub version: u16,
    pub flags: u16,
    pub header_checksum: u32,
    pub entry_count: u64,
    pub next_table_id: u64,
    pub modified_at: u64,
    pub reserved: [u8; 32],
}

impl DirectoryHeader {
    fn new(entry_count: u64, next_table_id: u64) -> Self {
        let mut header = Self {
            magic: *TABLE_DIRECTORY_MAGIC,
            version: DIRECTORY_CURRENT_VERSION,
            flags: 0,
            header_checksum: 0,
            entry_count,
            next_table_id,
            modified_at: current_timestamp_micros(),
            reserved: [0; 32],
        };
        header.header_checksum = header.calculate_checksum();
        header
    }
}

impl RegionFormat for DirectoryHeader {
    const MAGIC: &'static [u8; 8] = TABLE_DIRECTORY_MAGIC;
    const FORMAT_NAME: &'static str = "table directory";
    const CURRENT_VERSION: u16 = DIRECTORY_CURRENT_VERSION;
    const MIN_SUPPORTED_VERSION: u16 = 0x0100;
}

impl RegionHeaderTrait for DirectoryHeader {
    const HEADER_SIZE: usize = DIRECTORY_HEADER_SIZE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.header_checksum.to_le_bytes());
        buf[16..24].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.next_table_id.to_le_bytes());
        buf[32..40].copy_from_slice(&self.modified_at.to_le_bytes());
        buf[40..64].copy_from_slice(&self.reserved[..24]);
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "table directory header too small: {} bytes (expected {})",
                data.len(),
                Self::HEADER_SIZE
            )));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        let version = u16::from_le_bytes(data[8..10].try_into().unwrap());
        let flags = u16::from_le_bytes(data[10..12].try_into().unwrap());
        let header_checksum = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let entry_count = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let next_table_id = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let modified_at = u64::from_le_bytes(data[32..40].try_into().unwrap());
        let mut reserved = [0u8; 32];
        reserved[..24].copy_from_slice(&data[40..64]);

        let header = Self {
            magic,
            version,
            flags,
            header_checksum,
            entry_count,
            next_table_id,
            modified_at,
            reserved,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != Self::MAGIC {
            return Err(Error::Corruption("invalid table directory magic".to_string()));
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

impl ValidateFile for DirectoryHeader {}

impl ChecksummedHeader for DirectoryHeader {
    fn calculate_checksum(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.flags.to_le_bytes());
        hasher.update(&self.entry_count.to_le_bytes());
        hasher.update(&self.next_table_id.to_le_bytes());
        hasher.update(&self.modified_at.to_le_bytes());
        hasher.update(&self.reserved);
        hasher.finalize()
    }

    fn stored_checksum(&self) -> u32 {
        self.header_checksum
    }
}

impl EntryBasedFile for DirectoryHeader {
    type Entry = TableDescriptor;

    fn entry_count(&self) -> u64 {
        self.entry_count
    }

    fn avg_entry_size(&self) -> Option<u64> {
        Some(TABLE_DESCRIPTOR_SIZE as u64)
    }
}

struct DirectoryState {
    tables: HashMap<u64, TableDescriptor>,
    next_table_id: u64,
    dirty_count: u64,
}

/// In-memory table directory, flushed to its region as a flat array of
/// fixed-size descriptors.
pub struct TableDirectory {
    state: Mutex<DirectoryState>,
}

impl TableDirectory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DirectoryState {
                tables: HashMap::new(),
                next_table_id: 1,
                dirty_count: 0,
            }),
        }
    }

    /// Allocates a fresh table id and registers a new descriptor for it.
    pub fn create_table(&self, name: impl Into<String>, schema_block_name: impl Into<BlockName>) -> u64 {
        let mut state = self.state.lock();
        let table_id = state.next_table_id;
        state.next_table_id += 1;
        state
            .tables
            .insert(table_id, TableDescriptor::new(table_id, name, schema_block_name));
        state.dirty_count += 1;
        table_id
    }

    pub fn get(&self, table_id: u64) -> Option<TableDescriptor> {
        self.state.lock().tables.get(&table_id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<TableDescriptor> {
        self.state
            .lock()
            .tables
            .values()
            .find(|t| !t.dropped && t.name == name)
            .cloned()
    }

    /// Marks a table dropped without removing its descriptor slot, so the
    /// directory's dense array never needs to shift entries on deletion.
    pub fn drop_table(&self, table_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        let table = state
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| Error::Corruption(format!("no table with id {table_id}")))?;
        table.dropped = true;
        state.dirty_count += 1;
        Ok(())
    }

    pub fn enumerate(&self) -> Vec<TableDescriptor> {
        let state = self.state.lock();
        let mut tables: Vec<_> = state.tables.values().filter(|t| !t.dropped).cloned().collect();
        tables.sort_by_key(|t| t.table_id);
        tables
    }

    pub fn needs_flush(&self, threshold: u64) -> bool {
        self.state.lock().dirty_count >= threshold
    }

    pub fn mark_clean(&self) {
        self.state.lock().dirty_count = 0;
    }

    pub fn encode_region(&self, region_capacity_bytes: u64) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let mut descriptors: Vec<_> = state.tables.values().collect();
        descriptors.sort_by_key(|t| t.table_id);

        let total_len = DIRECTORY_HEADER_SIZE + descriptors.len() * TABLE_DESCRIPTOR_SIZE;
        if total_len as u64 > region_capacity_bytes {
            return Err(Error::Corruption(format!(
                "table directory region needs {total_len} bytes, region holds {region_capacity_bytes}"
            )));
        }

        let header = DirectoryHeader::new(descriptors.len() as u64, state.next_table_id);
        let mut buf = header.encode();
        for descriptor in descriptors {
            buf.extend_from_slice(&descriptor.encode()?);
        }
        Ok(buf)
    }

    pub fn decode_region(data: &[u8]) -> Result<Self> {
        let header = DirectoryHeader::decode(&data[..DIRECTORY_HEADER_SIZE])?;
        let mut tables = HashMap::with_capacity(header.entry_count as usize);

        let mut offset = DIRECTORY_HEADER_SIZE;
        for _ in 0..header.entry_count {
            let descriptor = TableDescriptor::decode(&data[offset..offset + TABLE_DESCRIPTOR_SIZE])?;
            tables.insert(descriptor.table_id, descriptor);
            offset += TABLE_DESCRIPTOR_SIZE;
        }

        Ok(Self {
            state: Mutex::new(DirectoryState {
                tables,
                next_table_id: header.next_table_id,
                dirty_count: 0,
            }),
        })
    }
}

impl Default for TableDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
