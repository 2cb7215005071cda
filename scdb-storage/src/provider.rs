//! Storage provider: the façade that composes every region into the public
//! open/read/write/transaction/vacuum surface.
//!
//! ## Region Layout
//!
//! ```text
//! +-------------------+  offset 0
//! |   File header      |  4096 bytes, fixed
//! +-------------------+
//! |   Block registry    |
//! +-------------------+
//! |   Free-space map     |
//! +-------------------+
//! |   Write-ahead log    |
//! +-------------------+
//! |   Table directory    |
//! +-------------------+
//! |   Block data pages   |  grows as blocks are written
//! +-------------------+
//! ```
//!
//! Region offsets and lengths are fixed at file creation and recorded in the
//! file header; only the data area past the table directory grows. See
//! [`StorageProvider::create_new`] for how each region is sized.
//!
//! ## Concurrency
//!
//! `write_block` and `read_block` serialize through a single-permit
//! semaphore (the I/O gate): the storage core assumes one writer and
//! admits readers one at a time behind the same gate rather than building a
//! separate reader-writer protocol. Purely in-memory queries
//! (`block_exists`, `get_metadata`, `enumerate_blocks`, `get_statistics`)
//! never touch the gate. Internally every file operation is a blocking
//! `std::fs::File` call guarded by `parking_lot::Mutex` — the same shape
//! [`crate::wal::WalWriter`] uses — the gate's `.await` is what makes the
//! public surface `async fn`, not the I/O itself.
//!
//! ## Transactions
//!
//! A transaction records an undo action for every `write_block`/
//! `delete_block` made under it. `rollback_transaction` replays that log in
//! reverse, restoring the registry entry and (via [`FreeSpaceMap::occupy_pages`])
//! re-occupying any pages freed mid-transaction. This assumes the
//! single-writer model: nothing else allocates from the file between a
//! transactional free and a rollback that undoes it.

use crate::cache::BlockCache;
use crate::encryption;
use crate::file_header::{FileHeader, RegionDescriptor, FILE_HEADER_SIZE};
use crate::format::{ChecksummedHeader, RegionHeader as RegionHeaderTrait};
use crate::fsm::{FreeSpaceMap, FSM_HEADER_SIZE};
use crate::registry::{BlockEntry, BlockRegistry, PeriodicFlushHandle, BLOCK_ENTRY_SIZE, MAX_INLINE_NAME_LEN, REGISTRY_HEADER_SIZE};
use crate::table_directory::{TableDirectory, DIRECTORY_HEADER_SIZE, TABLE_DESCRIPTOR_SIZE};
use crate::utils::BytesMutExt;
use crate::vacuum::{VacuumMode, VacuumReport, INCREMENTAL_BATCH_SIZE};
use crate::wal::{WalHeader, WalMetrics, WalReader, WalRecord, WalWriter, WAL_HEADER_SIZE};
use crate::StorageOptions;

use scdb_core::{EncryptionMode, Error, Operation, Result, TxnId};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex as PLMutex;
use rand::RngCore;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;

type FileHandle = Arc<PLMutex<File>>;

const DEFAULT_REGISTRY_CAPACITY_ENTRIES: u64 = 16_384;
const DEFAULT_TABLE_DIRECTORY_CAPACITY: u64 = 4_096;
const WAL_ENTRY_SIZE: u32 = 4_096;
/// Pages of bitmap headroom reserved in a new file's FSM region. Bounds how
/// large the file can grow before `write_block` starts returning
/// `Error::FsmOverflow` (at the default 4 KiB page size, about 4 GiB).
const FSM_RESERVED_PAGE_CAPACITY: u64 = 1 << 20;
const FSM_RESERVED_EXTENT_CAPACITY: u64 = 4_096;
const DEFAULT_REGISTRY_FLUSH_THRESHOLD: u64 = 200;
const REGISTRY_FLUSH_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Metadata about one stored block, as seen by [`StorageProvider::get_metadata`].
#[derive(Debug, Clone)]
pub struct BlockMetadata {
    pub name: String,
    pub size: u64,
    pub offset: u64,
    pub checksum: [u8; 32],
    pub dirty: bool,
}

/// Point-in-time snapshot of the provider's internal state, for
/// `scdb-cli stats` and similar tooling.
#[derive(Debug, Clone)]
pub struct ProviderStatistics {
    pub block_count: u64,
    pub table_count: u64,
    pub total_pages: u64,
    pub free_pages: u64,
    pub used_pages: u64,
    pub largest_extent_pages: u64,
    pub fragmentation_percent: u8,
    pub cache_hit_rate: f64,
    pub wal_writes_total: u64,
    pub wal_checkpoints_total: u64,
    pub last_txn_id: u64,
    pub last_checkpoint_lsn: u64,
}

/// A view onto a block's bytes: either a zero-copy `memmap2` slice or an
/// owned copy, depending on what [`StorageProvider::read_span`] could give
/// without violating the caller's options.
pub enum Span {
    Mapped {
        mmap: Arc<memmap2::Mmap>,
        start: usize,
        end: usize,
    },
    Owned(Bytes),
}

impl Span {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Span::Mapped { mmap, start, end } => &mmap[*start..*end],
            Span::Owned(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct ActiveTransaction {
    txn_id: TxnId,
    undo_log: Vec<UndoAction>,
}

enum UndoAction {
    Created { name: String, offset: u64, pages: u64 },
    Grown { name: String, previous: BlockEntry, new_offset: u64, new_pages: u64 },
    Rewritten { name: String, previous: BlockEntry },
    Deleted { name: String, previous: BlockEntry },
}

/// The façade composing every on-disk region into one `.scdb` file's worth
/// of block storage.
pub struct StorageProvider {
    path: PathBuf,
    file: FileHandle,
    options: StorageOptions,
    header: PLMutex<FileHeader>,
    registry: Arc<BlockRegistry>,
    fsm: FreeSpaceMap,
    table_directory: TableDirectory,
    wal_writer: WalWriter,
    wal_metrics: Arc<WalMetrics>,
    cache: BlockCache,
    io_gate: Semaphore,
    txn: PLMutex<Option<ActiveTransaction>>,
    next_txn_id: AtomicU64,
    closed: AtomicBool,
    // Held only to keep the background flush loop alive; never read directly.
    _registry_flush_handle: Option<PeriodicFlushHandle>,
}

impl StorageProvider {
    /// Opens an existing `.scdb` file, or creates one if `path` does not
    /// exist yet (or exists but is empty).
    pub async fn open(path: impl AsRef<Path>, options: StorageOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        let already_has_content = path.exists() && std::fs::metadata(&path)?.len() > 0;

        let mut open_options = OpenOptions::new();
        open_options.read(true).write(true);
        if !already_has_content {
            open_options.create(true).truncate(true);
        }
        let file = open_options.open(&path)?;

        if already_has_content {
            Self::open_existing(path, file, options)
        } else {
            Self::create_new(path, file, options)
        }
    }

    fn create_new(path: PathBuf, file: File, options: StorageOptions) -> Result<Self> {
        let page_size = options.page_size;
        let mut header = FileHeader::new(page_size);

        let mut cursor = FILE_HEADER_SIZE as u64;

        let registry_len = round_up_to_page(
            REGISTRY_HEADER_SIZE as u64 + DEFAULT_REGISTRY_CAPACITY_ENTRIES * BLOCK_ENTRY_SIZE as u64,
            page_size,
        );
        header.registry_region = RegionDescriptor { offset: cursor, length: registry_len };
        cursor += registry_len;

        let fsm_len = round_up_to_page(
            FSM_HEADER_SIZE as u64
                + FSM_RESERVED_PAGE_CAPACITY.div_ceil(8)
                + 4
                + FSM_RESERVED_EXTENT_CAPACITY * 16,
            page_size,
        );
        header.fsm_region = RegionDescriptor { offset: cursor, length: fsm_len };
        cursor += fsm_len;

        let wal_entries = options.wal_buffer_size_pages.max(1);
        let wal_len = round_up_to_page(
            WAL_HEADER_SIZE as u64 + wal_entries as u64 * WAL_ENTRY_SIZE as u64,
            page_size,
        );
        header.wal_region = RegionDescriptor { offset: cursor, length: wal_len };
        cursor += wal_len;

        let tdir_len = round_up_to_page(
            DIRECTORY_HEADER_SIZE as u64 + DEFAULT_TABLE_DIRECTORY_CAPACITY * TABLE_DESCRIPTOR_SIZE as u64,
            page_size,
        );
        header.table_directory_region = RegionDescriptor { offset: cursor, length: tdir_len };
        cursor += tdir_len;

        if options.enable_encryption {
            header.encryption_mode = EncryptionMode::Aes256Gcm;
            let mut seed = [0u8; 12];
            rand::rng().fill_bytes(&mut seed);
            header.nonce_seed = seed;
        }

        header.allocated_pages = cursor / page_size as u64;
        header.header_checksum = header.calculate_checksum();

        file.set_len(cursor)?;
        let file = Arc::new(PLMutex::new(file));

        let total_fixed_pages = cursor / page_size as u64;
        let fsm = FreeSpaceMap::new(total_fixed_pages);
        fsm.occupy_pages(0, total_fixed_pages);

        let registry = Arc::new(BlockRegistry::new(DEFAULT_REGISTRY_FLUSH_THRESHOLD));
        let table_directory = TableDirectory::new();

        write_region_now(&file, 0, &header.encode())?;
        write_region_now(&file, header.registry_region.offset, &registry.encode_region(header.registry_region.length)?)?;
        write_region_now(&file, header.fsm_region.offset, &fsm.encode_region(header.fsm_region.length)?)?;
        write_region_now(&file, header.table_directory_region.offset, &table_directory.encode_region(header.table_directory_region.length)?)?;

        let mut file_sequence = [0u8; 8];
        rand::rng().fill_bytes(&mut file_sequence);
        let wal_header = WalHeader::new(u64::from_le_bytes(file_sequence), WAL_ENTRY_SIZE, wal_entries);
        write_region_now(&file, header.wal_region.offset, &wal_header.encode())?;

        file.lock().sync_all()?;

        let wal_metrics = Arc::new(WalMetrics::new());
        let wal_writer = WalWriter::new(file.clone(), header.wal_region.offset, wal_header, options.sync_mode, wal_metrics.clone());

        Self::finish_open(path, file, options, header, registry, fsm, table_directory, wal_writer, wal_metrics)
    }

    fn open_existing(path: PathBuf, file: File, options: StorageOptions) -> Result<Self> {
        let file = Arc::new(PLMutex::new(file));

        let header_bytes = read_region_now(&file, 0, FILE_HEADER_SIZE)?;
        let header = FileHeader::decode(&header_bytes)?;

        if header.page_size != options.page_size {
            return Err(Error::PageSizeMismatch { on_disk: header.page_size, requested: options.page_size });
        }
        if header.encryption_mode == EncryptionMode::Aes256Gcm && options.encryption_key.is_none() {
            return Err(Error::EncryptionKeyMissing);
        }

        let registry_bytes = read_region_now(&file, header.registry_region.offset, header.registry_region.length as usize)?;
        let registry = Arc::new(BlockRegistry::decode_region(&registry_bytes, DEFAULT_REGISTRY_FLUSH_THRESHOLD)?);

        let fsm_bytes = read_region_now(&file, header.fsm_region.offset, header.fsm_region.length as usize)?;
        let fsm = FreeSpaceMap::decode_region(&fsm_bytes)?;

        let tdir_bytes = read_region_now(&file, header.table_directory_region.offset, header.table_directory_region.length as usize)?;
        let table_directory = TableDirectory::decode_region(&tdir_bytes)?;

        let wal_metrics = Arc::new(WalMetrics::new());
        let reader_file = file.lock().try_clone()?;
        let mut wal_reader = WalReader::new(reader_file, header.wal_region.offset, wal_metrics.clone())?;
        let wal_header = *wal_reader.header();
        let records = wal_reader.read_entries_since_checkpoint()?;

        recover(&registry, &fsm, header.page_size, &records, header.encryption_mode == EncryptionMode::Aes256Gcm);

        let wal_writer = WalWriter::new(file.clone(), header.wal_region.offset, wal_header, options.sync_mode, wal_metrics.clone());

        Self::finish_open(path, file, options, header, registry, fsm, table_directory, wal_writer, wal_metrics)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_open(
        path: PathBuf,
        file: FileHandle,
        options: StorageOptions,
        header: FileHeader,
        registry: Arc<BlockRegistry>,
        fsm: FreeSpaceMap,
        table_directory: TableDirectory,
        wal_writer: WalWriter,
        wal_metrics: Arc<WalMetrics>,
    ) -> Result<Self> {
        let next_txn_id = AtomicU64::new(header.last_txn_id + 1);
        let cache = BlockCache::new(DEFAULT_CACHE_CAPACITY);

        let flush_handle = {
            let registry = registry.clone();
            let file = file.clone();
            let region = header.registry_region;
            Some(PeriodicFlushHandle::spawn(REGISTRY_FLUSH_INTERVAL, move || {
                if !registry.needs_flush() {
                    return;
                }
                match registry.encode_region(region.length) {
                    Ok(buf) => match write_region_now(&file, region.offset, &buf) {
                        Ok(()) => registry.mark_clean(),
                        Err(err) => log::warn!("periodic registry flush failed: {err}"),
                    },
                    Err(err) => log::warn!("periodic registry flush failed to encode: {err}"),
                }
            }))
        };

        Ok(Self {
            path,
            file,
            options,
            header: PLMutex::new(header),
            registry,
            fsm,
            table_directory,
            wal_writer,
            wal_metrics,
            cache,
            io_gate: Semaphore::new(1),
            txn: PLMutex::new(None),
            next_txn_id,
            closed: AtomicBool::new(false),
            _registry_flush_handle: flush_handle,
        })
    }

    fn page_size(&self) -> u32 {
        self.header.lock().page_size
    }

    fn nonce_seed(&self) -> [u8; 12] {
        self.header.lock().nonce_seed
    }

    // ---- queries (no I/O gate) ----------------------------------------

    pub fn block_exists(&self, name: &str) -> bool {
        self.registry.get(name).is_some()
    }

    pub fn get_metadata(&self, name: &str) -> Option<BlockMetadata> {
        let entry = self.registry.get(name)?;
        Some(BlockMetadata {
            name: name.to_string(),
            size: entry.length,
            offset: entry.offset,
            checksum: entry.checksum,
            dirty: entry.dirty,
        })
    }

    pub fn enumerate_blocks(&self) -> Vec<String> {
        self.registry.enumerate()
    }

    pub fn get_statistics(&self) -> ProviderStatistics {
        let fsm_stats = self.fsm.statistics();
        let header = self.header.lock();
        ProviderStatistics {
            block_count: self.registry.len() as u64,
            table_count: self.table_directory.enumerate().len() as u64,
            total_pages: fsm_stats.total_pages,
            free_pages: fsm_stats.free_pages,
            used_pages: fsm_stats.total_pages.saturating_sub(fsm_stats.free_pages),
            largest_extent_pages: fsm_stats.largest_extent_pages,
            fragmentation_percent: fsm_stats.fragmentation_percent,
            cache_hit_rate: self.cache.hit_rate(),
            wal_writes_total: self.wal_metrics.writes_total(),
            wal_checkpoints_total: self.wal_metrics.checkpoints_total(),
            last_txn_id: header.last_txn_id,
            last_checkpoint_lsn: self.wal_writer.last_checkpoint_lsn(),
        }
    }

    pub fn table_directory(&self) -> &TableDirectory {
        &self.table_directory
    }

    // ---- reads (I/O gate) ----------------------------------------------

    pub async fn read_block(&self, name: &str) -> Result<Option<Bytes>> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");
        self.read_block_locked(name)
    }

    fn read_block_locked(&self, name: &str) -> Result<Option<Bytes>> {
        let entry = match self.registry.get(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if let Some(page_id) = cache_key(&entry, self.page_size()) {
            if let Some(cached) = self.cache.get(page_id) {
                return Ok(Some(Bytes::from(cached)));
            }
        }

        let raw = self.read_bytes_at(entry.offset, entry.length as usize)?;
        let plaintext = if entry.encrypted {
            let key = self.options.encryption_key.ok_or(Error::EncryptionKeyMissing)?;
            encryption::decrypt_block(&key, &self.nonce_seed(), entry.offset, self.page_size(), &raw, name)?
        } else {
            raw
        };

        let checksum = sha256(&plaintext);
        if checksum != entry.checksum {
            return Err(Error::ChecksumMismatch {
                name: name.to_string(),
                expected: hex_encode(&entry.checksum),
                found: hex_encode(&checksum),
            });
        }

        if let Some(page_id) = cache_key(&entry, self.page_size()) {
            self.cache.put(page_id, plaintext.clone(), false);
        }

        Ok(Some(Bytes::from(plaintext)))
    }

    /// Zero-copy view of a block's bytes when `enable_memory_mapping` is set
    /// and the block is unencrypted; falls back to [`Self::read_block`]
    /// (an owned, checksum-verified copy) otherwise. The mapped path skips
    /// checksum verification — callers that need a verified read should use
    /// `read_block`.
    pub async fn read_span(&self, name: &str) -> Result<Option<Span>> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");

        let entry = match self.registry.get(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if self.options.enable_memory_mapping && !entry.encrypted {
            if let Ok(span) = self.mmap_span(entry.offset, entry.length as usize) {
                return Ok(Some(span));
            }
        }

        Ok(self.read_block_locked(name)?.map(Span::Owned))
    }

    fn mmap_span(&self, offset: u64, len: usize) -> Result<Span> {
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| Error::Corruption("span offset overflows u64".to_string()))?;
        if end > usize::MAX as u64 {
            return Err(Error::Corruption("span exceeds addressable range".to_string()));
        }

        let file = File::open(&self.path)?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
        if end as usize > mmap.len() {
            return Err(Error::Corruption("span exceeds file length".to_string()));
        }

        Ok(Span::Mapped { mmap: Arc::new(mmap), start: offset as usize, end: end as usize })
    }

    // ---- writes (I/O gate) ---------------------------------------------

    pub async fn write_block(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");
        self.write_block_locked(name, bytes)
    }

    fn write_block_locked(&self, name: &str, bytes: &[u8]) -> Result<()> {
        if name.len() > MAX_INLINE_NAME_LEN {
            return Err(Error::NameTooLong { name: name.to_string(), len: name.len(), max: MAX_INLINE_NAME_LEN });
        }

        let page_size = self.page_size();
        let encrypted = self.options.enable_encryption;
        let stored_len = bytes.len() as u64 + if encrypted { 16 } else { 0 };
        let required_pages = pages_for_len(stored_len, page_size);

        let existing = self.registry.get(name);
        let (offset, allocated_pages, undo) = match existing {
            Some(entry) if required_pages <= entry.allocated_pages => {
                (entry.offset, entry.allocated_pages, UndoAction::Rewritten { name: name.to_string(), previous: entry })
            }
            Some(entry) => {
                self.fsm.free_pages(entry.offset / page_size as u64, entry.allocated_pages);
                let new_start = self.fsm.allocate_pages(required_pages)?;
                let new_offset = new_start * page_size as u64;
                (
                    new_offset,
                    required_pages,
                    UndoAction::Grown { name: name.to_string(), previous: entry, new_offset, new_pages: required_pages },
                )
            }
            None => {
                let start = self.fsm.allocate_pages(required_pages)?;
                let offset = start * page_size as u64;
                (offset, required_pages, UndoAction::Created { name: name.to_string(), offset, pages: required_pages })
            }
        };

        let txn_id = self.txn.lock().as_ref().map(|t| t.txn_id);
        if let Some(txn_id) = txn_id {
            let op = if existing.is_some() { Operation::Update } else { Operation::Insert };
            self.wal_writer.append(op, txn_id, name, offset / page_size as u64, bytes)?;
        }

        let to_store = if encrypted {
            let key = self.options.encryption_key.ok_or(Error::EncryptionKeyMissing)?;
            encryption::encrypt_block(&key, &self.nonce_seed(), offset, page_size, bytes)?
        } else {
            bytes.to_vec()
        };

        self.write_bytes_at(offset, &to_store)?;
        self.file.lock().sync_data()?;

        let checksum = sha256(bytes);
        let mut entry = BlockEntry::new(0, name, offset, to_store.len() as u64, allocated_pages, checksum);
        entry.encrypted = encrypted;
        self.registry.put(name, entry);

        if let Some(page_id) = cache_key(&entry, page_size) {
            self.cache.put(page_id, bytes.to_vec(), true);
        }

        if let Some(txn_id) = txn_id {
            if let Some(txn) = self.txn.lock().as_mut() {
                debug_assert_eq!(txn.txn_id, txn_id);
                txn.undo_log.push(undo);
            }
        }

        self.force_flush_registry()?;
        Ok(())
    }

    pub async fn delete_block(&self, name: &str) -> Result<bool> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");

        let entry = match self.registry.get(name) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let page_size = self.page_size() as u64;
        let start_page = entry.offset / page_size;

        let txn_id = self.txn.lock().as_ref().map(|t| t.txn_id);
        if let Some(txn_id) = txn_id {
            self.wal_writer.append(Operation::Delete, txn_id, name, start_page, &[])?;
        }

        self.fsm.free_pages(start_page, entry.allocated_pages);
        self.registry.remove(name);
        if let Some(page_id) = cache_key(&entry, self.page_size()) {
            self.cache.remove(page_id);
        }
        self.force_flush_registry()?;

        if let Some(txn_id) = txn_id {
            if let Some(txn) = self.txn.lock().as_mut() {
                debug_assert_eq!(txn.txn_id, txn_id);
                txn.undo_log.push(UndoAction::Deleted { name: name.to_string(), previous: entry });
            }
        }

        Ok(true)
    }

    // ---- transactions (I/O gate) ---------------------------------------

    pub async fn begin_transaction(&self) -> Result<TxnId> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");

        let mut guard = self.txn.lock();
        if guard.is_some() {
            return Err(Error::TransactionConflict);
        }
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        drop(guard);

        self.wal_writer.append_marker(Operation::Begin, txn_id)?;
        *self.txn.lock() = Some(ActiveTransaction { txn_id, undo_log: Vec::new() });
        Ok(txn_id)
    }

    pub async fn commit_transaction(&self) -> Result<()> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");

        let txn = self
            .txn
            .lock()
            .take()
            .ok_or_else(|| Error::TransactionStateError("no active transaction to commit".to_string()))?;

        self.wal_writer.append_marker(Operation::Commit, txn.txn_id)?;

        let mut header = self.header.lock();
        header.last_txn_id = txn.txn_id;
        drop(header);

        Ok(())
    }

    pub async fn rollback_transaction(&self) -> Result<()> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");

        let txn = self
            .txn
            .lock()
            .take()
            .ok_or_else(|| Error::TransactionStateError("no active transaction to roll back".to_string()))?;

        self.wal_writer.append_marker(Operation::Abort, txn.txn_id)?;

        let page_size = self.page_size() as u64;
        for action in txn.undo_log.into_iter().rev() {
            match action {
                UndoAction::Created { name, offset, pages } => {
                    self.registry.remove(&name);
                    self.fsm.free_pages(offset / page_size, pages);
                }
                UndoAction::Grown { name, previous, new_offset, new_pages } => {
                    self.fsm.free_pages(new_offset / page_size, new_pages);
                    self.fsm.occupy_pages(previous.offset / page_size, previous.allocated_pages);
                    self.registry.put(name, previous);
                }
                UndoAction::Rewritten { name, previous } => {
                    self.registry.put(name, previous);
                }
                UndoAction::Deleted { name, previous } => {
                    self.fsm.occupy_pages(previous.offset / page_size, previous.allocated_pages);
                    self.registry.put(name, previous);
                }
            }
        }

        self.force_flush_registry()?;
        self.force_flush_fsm()?;
        Ok(())
    }

    // ---- flush & close ---------------------------------------------------

    pub async fn flush(&self) -> Result<()> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");
        self.flush_all_regions()
    }

    fn flush_all_regions(&self) -> Result<()> {
        self.force_flush_registry()?;
        self.force_flush_fsm()?;
        self.force_flush_table_directory()?;
        let current_lsn = self.wal_writer.current_lsn();
        self.wal_writer.checkpoint(current_lsn.saturating_sub(1))?;
        self.persist_header()?;
        self.file.lock().sync_all()?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");
        self.closed.store(true, Ordering::SeqCst);
        self.flush_all_regions()
    }

    fn force_flush_registry(&self) -> Result<()> {
        let region = self.header.lock().registry_region;
        let buf = self.registry.encode_region(region.length)?;
        write_region_now(&self.file, region.offset, &buf)?;
        self.registry.mark_clean();
        Ok(())
    }

    fn force_flush_fsm(&self) -> Result<()> {
        let region = self.header.lock().fsm_region;
        let buf = self.fsm.encode_region(region.length)?;
        write_region_now(&self.file, region.offset, &buf)?;
        Ok(())
    }

    fn force_flush_table_directory(&self) -> Result<()> {
        let region = self.header.lock().table_directory_region;
        let buf = self.table_directory.encode_region(region.length)?;
        write_region_now(&self.file, region.offset, &buf)?;
        self.table_directory.mark_clean();
        Ok(())
    }

    fn persist_header(&self) -> Result<()> {
        let fsm_stats = self.fsm.statistics();
        let mut header = self.header.lock();
        header.modified_at = now_micros();
        header.allocated_pages = fsm_stats.total_pages;
        header.fragmentation_pct = fsm_stats.fragmentation_percent;
        header.last_checkpoint_lsn = self.wal_writer.last_checkpoint_lsn();
        header.header_checksum = header.calculate_checksum();
        write_region_now(&self.file, 0, &header.encode())
    }

    fn read_bytes_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = BytesMut::with_capacity(len);
        buf.read_exact_from(&mut *file, len)?;
        Ok(buf.to_vec())
    }

    fn write_bytes_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    // ---- vacuum (I/O gate) ----------------------------------------------

    pub async fn vacuum(&self, mode: VacuumMode) -> Result<VacuumReport> {
        let _permit = self.io_gate.acquire().await.expect("semaphore is never closed");

        let started = Instant::now();
        let fragmentation_before = self.fsm.statistics().fragmentation_percent;

        let outcome = match mode {
            VacuumMode::Quick => self.vacuum_quick(),
            VacuumMode::Incremental => self.vacuum_incremental(),
            VacuumMode::Full => self.vacuum_full(),
        };

        let duration = started.elapsed();
        match outcome {
            Ok((bytes_reclaimed, blocks_moved, blocks_deleted)) => {
                let fragmentation_after = self.fsm.statistics().fragmentation_percent;
                let mut header = self.header.lock();
                header.last_vacuum_at = now_micros();
                header.header_checksum = header.calculate_checksum();
                drop(header);
                self.persist_header()?;

                Ok(VacuumReport {
                    mode,
                    duration,
                    bytes_reclaimed,
                    fragmentation_before,
                    fragmentation_after,
                    blocks_moved,
                    blocks_deleted,
                    success: true,
                    error: None,
                })
            }
            Err(err) => Ok(VacuumReport::failed(mode, fragmentation_before, duration, err.to_string())),
        }
    }

    fn vacuum_quick(&self) -> Result<(u64, u64, u64)> {
        self.fsm.rebuild_extents();
        self.force_flush_fsm()?;
        let current_lsn = self.wal_writer.current_lsn();
        self.wal_writer.checkpoint(current_lsn.saturating_sub(1))?;
        Ok((0, 0, 0))
    }

    /// Relocates up to [`INCREMENTAL_BATCH_SIZE`] blocks whose current
    /// offset sits later in the file than a fresh allocation of the same
    /// size would land. Each relocation is only kept if it actually moves
    /// the block earlier, which bounds the pass to forward progress.
    fn vacuum_incremental(&self) -> Result<(u64, u64, u64)> {
        let page_size = self.page_size() as u64;
        let names = self.registry.enumerate();
        let mut moved = 0u64;
        let mut bytes_reclaimed = 0u64;

        for name in names {
            if moved as usize >= INCREMENTAL_BATCH_SIZE {
                break;
            }
            let entry = match self.registry.get(&name) {
                Some(entry) => entry,
                None => continue,
            };

            let new_start = self.fsm.allocate_pages(entry.allocated_pages)?;
            let old_start = entry.offset / page_size;
            if new_start >= old_start {
                self.fsm.free_pages(new_start, entry.allocated_pages);
                continue;
            }

            let bytes = self.read_bytes_at(entry.offset, entry.length as usize)?;
            let new_offset = new_start * page_size;
            self.write_bytes_at(new_offset, &bytes)?;
            self.file.lock().sync_data()?;
            self.fsm.free_pages(old_start, entry.allocated_pages);

            let mut updated = entry;
            updated.offset = new_offset;
            self.registry.put(name, updated);

            moved += 1;
            bytes_reclaimed += entry.length;
        }

        self.force_flush_registry()?;
        self.force_flush_fsm()?;
        Ok((bytes_reclaimed, moved, 0))
    }

    /// Rewrites the whole file: every live block is copied, in name order,
    /// into a temporary file immediately after the fixed regions, along with
    /// a registry/FSM/table-directory/header snapshot reflecting the new
    /// offsets, then the temporary file is renamed over the original. Any
    /// failure before the final rename leaves the original file untouched;
    /// the provider's own in-memory state only moves to the vacuumed layout
    /// after that rename succeeds, so a failed rename never leaves it
    /// pointing at offsets the live file doesn't have.
    fn vacuum_full(&self) -> Result<(u64, u64, u64)> {
        let page_size = self.page_size();
        let mut names = self.registry.enumerate();
        names.sort();

        let header = *self.header.lock();
        let data_start_page = (header.table_directory_region.offset + header.table_directory_region.length) / page_size as u64;

        let scratch_fsm = FreeSpaceMap::new(data_start_page);
        scratch_fsm.occupy_pages(0, data_start_page);

        let mut relocations: Vec<(String, BlockEntry, u64)> = Vec::with_capacity(names.len());
        let mut updated_entries: Vec<(String, BlockEntry)> = Vec::with_capacity(names.len());
        let mut end_cursor_bytes = data_start_page * page_size as u64;

        for name in &names {
            let entry = match self.registry.get(name) {
                Some(entry) => entry,
                None => continue,
            };
            let new_start = scratch_fsm.allocate_pages(entry.allocated_pages)?;
            let new_offset = new_start * page_size as u64;
            end_cursor_bytes = end_cursor_bytes.max(new_offset + entry.allocated_pages * page_size as u64);
            relocations.push((name.clone(), entry, new_offset));

            let mut updated = entry;
            updated.offset = new_offset;
            updated_entries.push((name.clone(), updated));
        }

        // Build the post-vacuum registry/FSM/table-directory/header up
        // front, against a scratch registry rather than the live one, so
        // nothing here is observable until the rename below succeeds.
        let vacuumed_registry = BlockRegistry::new(DEFAULT_REGISTRY_FLUSH_THRESHOLD);
        for (name, entry) in &updated_entries {
            vacuumed_registry.put(name.clone(), *entry);
        }
        let registry_bytes = vacuumed_registry.encode_region(header.registry_region.length)?;
        let fsm_bytes = scratch_fsm.encode_region(header.fsm_region.length)?;
        let tdir_bytes = self.table_directory.encode_region(header.table_directory_region.length)?;

        let mut vacuumed_header = header;
        vacuumed_header.allocated_pages = scratch_fsm.statistics().total_pages;
        vacuumed_header.header_checksum = vacuumed_header.calculate_checksum();

        let temp_path = self.path.with_extension("scdb.vacuum-tmp");
        let result = self.rewrite_into(
            &temp_path,
            &vacuumed_header,
            &registry_bytes,
            &fsm_bytes,
            &tdir_bytes,
            &relocations,
            end_cursor_bytes,
        );

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result.map(|_| (0, 0, 0));
        }

        let backup_path = self.path.with_extension("scdb.vacuum-bak");
        std::fs::rename(&self.path, &backup_path)?;
        if let Err(err) = std::fs::rename(&temp_path, &self.path) {
            std::fs::rename(&backup_path, &self.path)?;
            return Err(Error::Io(err));
        }

        let reopened = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *self.file.lock() = reopened;
        std::fs::remove_file(&backup_path)?;

        // Only now that the vacuumed file is durably live does the
        // in-memory state move to match it.
        for (name, entry) in updated_entries {
            self.registry.put(name, entry);
        }
        self.registry.mark_clean();
        self.fsm.replace_with(scratch_fsm);
        *self.header.lock() = vacuumed_header;

        let bytes_reclaimed: u64 = relocations
            .iter()
            .map(|(_, entry, new_offset)| entry.offset.saturating_sub(*new_offset))
            .sum();

        Ok((bytes_reclaimed, relocations.len() as u64, 0))
    }

    /// Writes a complete vacuumed file to `temp_path`: the given header,
    /// registry, FSM and table-directory bytes at their (unchanged) region
    /// offsets, the WAL region copied as-is, and every relocated block at
    /// its new offset.
    #[allow(clippy::too_many_arguments)]
    fn rewrite_into(
        &self,
        temp_path: &Path,
        header: &FileHeader,
        registry_bytes: &[u8],
        fsm_bytes: &[u8],
        table_directory_bytes: &[u8],
        relocations: &[(String, BlockEntry, u64)],
        final_len: u64,
    ) -> Result<()> {
        let mut temp_file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(temp_path)?;

        temp_file.seek(SeekFrom::Start(0))?;
        temp_file.write_all(&header.encode())?;

        temp_file.seek(SeekFrom::Start(header.registry_region.offset))?;
        temp_file.write_all(registry_bytes)?;

        temp_file.seek(SeekFrom::Start(header.fsm_region.offset))?;
        temp_file.write_all(fsm_bytes)?;

        let wal_bytes = {
            let mut src = self.file.lock();
            src.seek(SeekFrom::Start(header.wal_region.offset))?;
            let mut buf = vec![0u8; header.wal_region.length as usize];
            src.read_exact(&mut buf)?;
            buf
        };
        temp_file.seek(SeekFrom::Start(header.wal_region.offset))?;
        temp_file.write_all(&wal_bytes)?;

        temp_file.seek(SeekFrom::Start(header.table_directory_region.offset))?;
        temp_file.write_all(table_directory_bytes)?;

        for (_, entry, new_offset) in relocations {
            let bytes = self.read_bytes_at(entry.offset, entry.length as usize)?;
            temp_file.seek(SeekFrom::Start(*new_offset))?;
            temp_file.write_all(&bytes)?;
        }

        temp_file.set_len(final_len)?;
        temp_file.sync_all()?;
        Ok(())
    }
}

impl Drop for StorageProvider {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.flush_all_regions() {
            log::warn!("error flushing storage provider on drop: {err}");
        }
    }
}

/// Replays committed transactions' writes against the in-memory registry
/// and free-space map after an unclean shutdown. Only a transaction whose
/// last record is `Commit` is redone; an unterminated or `Abort`-ed
/// transaction's writes are discarded, since nothing durable ever promised
/// them. Redo is idempotent: it only reconstructs the registry entry and
/// marks the pages occupied, since the payload bytes were already fsynced
/// before the crash (recovery never rewrites block bytes).
///
/// `encrypted` mirrors the file's own encryption mode: the WAL always logs
/// plaintext (see `write_block_locked`), but the on-disk block is ciphertext
/// plus a 16-byte AEAD tag when encryption is on, so the reconstructed
/// entry's length/page count and `encrypted` flag must account for that gap
/// or a later `read_block` will try to checksum raw ciphertext as plaintext.
fn recover(registry: &BlockRegistry, fsm: &FreeSpaceMap, page_size: u32, records: &[WalRecord], encrypted: bool) {
    use std::collections::BTreeMap;

    let mut by_txn: BTreeMap<TxnId, Vec<&WalRecord>> = BTreeMap::new();
    for record in records {
        by_txn.entry(record.txn_id).or_default().push(record);
    }

    for (_, txn_records) in by_txn {
        let committed = txn_records
            .iter()
            .rev()
            .find(|r| matches!(r.operation, Operation::Commit | Operation::Abort))
            .is_some_and(|r| matches!(r.operation, Operation::Commit));
        if !committed {
            continue;
        }

        let mut by_group: BTreeMap<u64, Vec<&WalRecord>> = BTreeMap::new();
        for record in &txn_records {
            if matches!(record.operation, Operation::Insert | Operation::Update | Operation::Delete) {
                by_group.entry(record.operation_id).or_default().push(record);
            }
        }

        for (_, mut group) in by_group {
            group.sort_by_key(|r| r.lsn);
            let first = group[0];
            match first.operation {
                Operation::Delete => {
                    if let Some(entry) = registry.get(&first.block_name) {
                        fsm.free_pages(entry.offset / page_size as u64, entry.allocated_pages);
                        registry.remove(&first.block_name);
                    }
                }
                Operation::Insert | Operation::Update => {
                    let mut payload = Vec::new();
                    for record in &group {
                        payload.extend_from_slice(&record.data);
                    }
                    let offset = first.page_id * page_size as u64;
                    let stored_len = payload.len() as u64 + if encrypted { 16 } else { 0 };
                    let required_pages = pages_for_len(stored_len, page_size);
                    fsm.occupy_pages(offset / page_size as u64, required_pages);

                    let checksum = sha256(&payload);
                    let mut entry = BlockEntry::new(0, &first.block_name, offset, stored_len, required_pages, checksum);
                    entry.encrypted = encrypted;
                    registry.put(first.block_name.clone(), entry);
                }
                _ => {}
            }
        }
    }
}

fn pages_for_len(len: u64, page_size: u32) -> u64 {
    if len == 0 {
        1
    } else {
        len.div_ceil(page_size as u64)
    }
}

fn round_up_to_page(bytes: u64, page_size: u32) -> u64 {
    let page_size = page_size as u64;
    bytes.div_ceil(page_size) * page_size
}

fn cache_key(entry: &BlockEntry, page_size: u32) -> Option<u64> {
    if entry.length == 0 {
        return None;
    }
    Some(entry.offset / page_size as u64)
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

fn read_region_now(file: &FileHandle, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut f = file.lock();
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    f.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_region_now(file: &FileHandle, offset: u64, data: &[u8]) -> Result<()> {
    let mut f = file.lock();
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(data)?;
    Ok(())
}
