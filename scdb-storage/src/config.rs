//! Storage provider configuration.
//!
//! Every field has a conservative default so that `StorageOptions::default()`
//! opens a plain, unencrypted, copy-read-only file the way a caller that
//! supplies no options at all would expect.

use serde::{Deserialize, Serialize};

use crate::file_header::FILE_HEADER_SIZE;
use scdb_core::SyncMode;

/// How the file is expected to be shared with other processes while open.
///
/// The storage core itself never coordinates across processes (spec-level
/// non-goal); this only controls the advisory lock/sharing flags requested
/// from the OS when the file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileShareMode {
    /// No locking is requested; another process opening the same path is
    /// the caller's problem.
    External,
    /// Other processes may open the file for reading concurrently.
    AllowReaders,
    /// This process expects sole access to the file.
    Exclusive,
}

impl Default for FileShareMode {
    fn default() -> Self {
        FileShareMode::Exclusive
    }
}

/// Options recognized by [`crate::provider::StorageProvider::open`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Page size in bytes. Must be a power of two in `512..=65536`. Ignored
    /// (and compared against) the page size already recorded in an existing
    /// file's header.
    pub page_size: u32,

    /// Whether block payloads are sealed with AES-256-GCM at rest.
    pub enable_encryption: bool,

    /// Required when `enable_encryption` is `true`. Never serialized back
    /// out; callers are expected to source this from a keyring or secret
    /// store, not from a config file checked into source control.
    #[serde(skip_serializing, default)]
    pub encryption_key: Option<[u8; 32]>,

    /// Whether `read_span` may return a zero-copy view backed by `memmap2`.
    pub enable_memory_mapping: bool,

    /// Ring capacity for a newly created file's WAL region, in 4 KiB
    /// record slots.
    pub wal_buffer_size_pages: u32,

    /// If `true`, `open` creates the file immediately even if no write
    /// follows; if `false`, creation may be deferred until first use by a
    /// higher layer (the core itself always creates eagerly — this flag is
    /// surfaced for callers composing it with their own lazy-init policy).
    pub create_immediately: bool,

    pub file_share_mode: FileShareMode,

    /// Request uncached/direct I/O from the OS where supported. Best-effort:
    /// platforms without a reliable unbuffered path silently fall back to
    /// buffered I/O.
    pub use_unbuffered_io: bool,

    /// How aggressively the provider calls `sync_data`/`sync_all` after a
    /// write. Applies to the main file; the WAL makes its own durability
    /// decision the same way, record by record.
    pub sync_mode: SyncMode,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            enable_encryption: false,
            encryption_key: None,
            enable_memory_mapping: false,
            wal_buffer_size_pages: 1024,
            create_immediately: true,
            file_share_mode: FileShareMode::default(),
            use_unbuffered_io: false,
            sync_mode: SyncMode::default(),
        }
    }
}

impl StorageOptions {
    /// Validates option combinations that can't be expressed in the type
    /// system alone (page size range, encryption key presence).
    pub fn validate(&self) -> scdb_core::Result<()> {
        if !(512..=65536).contains(&self.page_size) || !self.page_size.is_power_of_two() {
            return Err(scdb_core::Error::HeaderInvalid(format!(
                "page_size {} must be a power of two in 512..=65536",
                self.page_size
            )));
        }
        if self.enable_encryption && self.encryption_key.is_none() {
            return Err(scdb_core::Error::EncryptionKeyMissing);
        }
        Ok(())
    }

    /// Total bytes occupied by the file header plus one page, the minimum
    /// any freshly created file needs before the first region can start.
    pub fn header_span(&self) -> u64 {
        FILE_HEADER_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let options = StorageOptions::default();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_a_non_power_of_two_page_size() {
        let mut options = StorageOptions::default();
        options.page_size = 4097;
        assert!(options.validate().is_err());
    }

    #[test]
    fn rejects_encryption_enabled_without_a_key() {
        let mut options = StorageOptions::default();
        options.enable_encryption = true;
        assert!(matches!(
            options.validate(),
            Err(scdb_core::Error::EncryptionKeyMissing)
        ));
    }
}
