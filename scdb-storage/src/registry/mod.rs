//! Block registry: the name -> location map for every block in the file.
//!
//! The registry combines the lookup map and its own dirty counter into one
//! owned type rather than tracking "dirty" as an integer alongside a
//! separate map — the two are always read and mutated together, so keeping
//! them apart just invites them drifting out of sync under concurrent
//! access.
//!
//! ## Region Layout
//!
//! ```text
//! +-------------------+
//! |  Registry header  |  64 bytes - magic, version, count, byte total
//! +-------------------+
//! |  BlockEntry[0]     |  96 bytes
//! +-------------------+
//! |  BlockEntry[1]     |
//! +-------------------+
//! |       ...          |
//! +-------------------+
//! ```

mod entry;

pub use entry::{BlockEntry, BLOCK_ENTRY_SIZE, MAX_INLINE_NAME_LEN};

use crate::format::{ChecksummedHeader, RegionFormat, RegionHeader as RegionHeaderTrait, ValidateFile};
use scdb_core::{Error, Result};

use crc32fast::Hasher;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const REGISTRY_MAGIC: &[u8; 8] = b"SCDBREG_";
pub const REGISTRY_HEADER_SIZE: usize = 64;
const REGISTRY_CURRENT_VERSION: u16 = 0x0100;

/// Region header for the block registry: magic, version, entry count, and
/// the byte total the entries occupy, checksummed the same way as every
/// other region header in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryHeader {
    pub magic: [u8; 8],
    pub version: u16,
    pub flags: u16,
    pub header_checksum: u32,
    pub block_count: u32,
    pub total_bytes: u64,
    pub modified_at: u64,
    pub reserved: [u8; 28],
}

impl RegistryHeader {
    fn new(block_count: u32, total_bytes: u64) -> Self {
        let mut header = Self {
            magic: *REGISTRY_MAGIC,
            version: REGISTRY_CURRENT_VERSION,
            flags: 0,
            header_checksum: 0,
            block_count,
            total_bytes,
            modified_at: current_timestamp_micros(),
            reserved: [0; 28],
        };
        header.header_checksum = header.calculate_checksum();
        header
    }
}

impl RegionFormat for RegistryHeader {
    const MAGIC: &'static [u8; 8] = REGISTRY_MAGIC;
    const FORMAT_NAME: &'static str = "block registry";
    const CURRENT_VERSION: u16 = REGISTRY_CURRENT_VERSION;
    const MIN_SUPPORTED_VERSION: u16 = 0x0100;
}

impl RegionHeaderTrait for RegistryHeader {
    const HEADER_SIZE: usize = REGISTRY_HEADER_SIZE;

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.header_checksum.to_le_bytes());
        buf[16..20].copy_from_slice(&self.block_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.total_bytes.to_le_bytes());
        buf[28..36].copy_from_slice(&self.modified_at.to_le_bytes());
        buf[36..64].copy_from_slice(&self.reserved);
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "registry header too small: {} bytes (expected {})",
                data.len(),
                Self::HEADER_SIZE
            )));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        let version = u16::from_le_bytes(data[8..10].try_into().unwrap());
        let flags = u16::from_le_bytes(data[10..12].try_into().unwrap());
        let header_checksum = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let block_count = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let total_bytes = u64::from_le_bytes(data[20..28].try_into().unwrap());
        let modified_at = u64::from_le_bytes(data[28..36].try_into().unwrap());
        let mut reserved = [0u8; 28];
        reserved.copy_from_slice(&data[36..64]);

        let header = Self {
            magic,
            version,
            flags,
            header_checksum,
            block_count,
            total_bytes,
            modified_at,
            reserved,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if &self.magic != Self::MAGIC {
            return Err(Error::Corruption("invalid block registry magic".to_string()));
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

impl ValidateFile for RegistryHeader {}

impl ChecksummedHeader for RegistryHeader {
    fn calculate_checksum(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.flags.to_le_bytes());
        hasher.update(&self.block_count.to_le_bytes());
        hasher.update(&self.total_bytes.to_le_bytes());
        hasher.update(&self.modified_at.to_le_bytes());
        hasher.update(&self.reserved);
        hasher.finalize()
    }

    fn stored_checksum(&self) -> u32 {
        self.header_checksum
    }
}

struct RegistryState {
    entries: HashMap<String, BlockEntry>,
    dirty_count: u64,
    batch_depth: u32,
}

/// Name -> `BlockEntry` map with its own dirty counter and nestable batch
/// scope. A batch of `put`/`remove` calls made between `begin_batch` and a
/// matching `end_batch` only becomes flush-eligible once every nested batch
/// has closed.
pub struct BlockRegistry {
    state: Mutex<RegistryState>,
    flush_threshold: u64,
}

impl BlockRegistry {
    pub fn new(flush_threshold: u64) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                dirty_count: 0,
                batch_depth: 0,
            }),
            flush_threshold,
        }
    }

    pub fn get(&self, name: &str) -> Option<BlockEntry> {
        self.state.lock().entries.get(name).copied()
    }

    pub fn put(&self, name: impl Into<String>, entry: BlockEntry) {
        let mut state = self.state.lock();
        state.entries.insert(name.into(), entry);
        state.dirty_count += 1;
    }

    pub fn remove(&self, name: &str) -> Option<BlockEntry> {
        let mut state = self.state.lock();
        let removed = state.entries.remove(name);
        if removed.is_some() {
            state.dirty_count += 1;
        }
        removed
    }

    pub fn begin_batch(&self) {
        self.state.lock().batch_depth += 1;
    }

    /// Closes one level of batch nesting. Returns whether the registry is
    /// now flush-eligible (`batch_depth == 0` and past the dirty threshold).
    pub fn end_batch(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.batch_depth == 0 {
            return Err(Error::TransactionStateError(
                "end_batch called without a matching begin_batch".to_string(),
            ));
        }
        state.batch_depth -= 1;
        Ok(state.batch_depth == 0 && state.dirty_count >= self.flush_threshold)
    }

    pub fn needs_flush(&self) -> bool {
        let state = self.state.lock();
        state.batch_depth == 0 && state.dirty_count >= self.flush_threshold
    }

    pub fn dirty_count(&self) -> u64 {
        self.state.lock().dirty_count
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enumerate(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Encodes the full region (header + every entry) for writing to disk.
    /// Overflows `region_capacity_bytes` become `Error::RegistryOverflow`.
    pub fn encode_region(&self, region_capacity_bytes: u64) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let body_len = state.entries.len() * BLOCK_ENTRY_SIZE;
        let total_len = REGISTRY_HEADER_SIZE + body_len;

        if total_len as u64 > region_capacity_bytes {
            return Err(Error::RegistryOverflow(format!(
                "registry needs {total_len} bytes, region holds {region_capacity_bytes}"
            )));
        }

        let header = RegistryHeader::new(state.entries.len() as u32, body_len as u64);
        let mut buf = header.encode();
        for entry in state.entries.values() {
            buf.extend_from_slice(&entry.encode());
        }
        Ok(buf)
    }

    /// Rebuilds a registry from a region previously written by [`Self::encode_region`].
    pub fn decode_region(data: &[u8], flush_threshold: u64) -> Result<Self> {
        let header = RegistryHeader::decode(&data[..REGISTRY_HEADER_SIZE])?;
        let mut entries = HashMap::with_capacity(header.block_count as usize);

        let mut offset = REGISTRY_HEADER_SIZE;
        for _ in 0..header.block_count {
            let entry = BlockEntry::decode(&data[offset..offset + BLOCK_ENTRY_SIZE])?;
            entries.insert(entry.inline_name_str().to_string(), entry);
            offset += BLOCK_ENTRY_SIZE;
        }

        Ok(Self {
            state: Mutex::new(RegistryState {
                entries,
                dirty_count: 0,
                batch_depth: 0,
            }),
            flush_threshold,
        })
    }

    /// Resets the dirty counter after a successful flush to disk.
    pub fn mark_clean(&self) {
        self.state.lock().dirty_count = 0;
    }
}

fn current_timestamp_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// A cooperative background task that periodically flushes a registry.
/// Cancelled automatically when dropped, so a provider shutdown never
/// leaves an orphaned flush loop running against a closed file.
pub struct PeriodicFlushHandle {
    task: tokio::task::JoinHandle<()>,
}

impl PeriodicFlushHandle {
    pub fn spawn<F>(period: Duration, mut flush_once: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                flush_once();
            }
        });
        Self { task }
    }
}

impl Drop for PeriodicFlushHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
