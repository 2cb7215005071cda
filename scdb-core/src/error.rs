//! Error taxonomy shared by every on-disk region of the storage core.
//!
//! Each variant corresponds to one failure mode a caller needs to handle
//! differently: some are fatal misuse (`TransactionConflict`), some signal
//! that a region was sized too small for the workload (`RegistryOverflow`,
//! `FsmOverflow`, `WalFull`), and some signal on-disk corruption
//! (`ChecksumMismatch`, `Corruption`). "Not found" is deliberately not a
//! variant here — callers that can observe a missing entity use `Option`.

use std::io;

/// Result alias used throughout the storage core.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way an operation against the storage core can fail.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The file header failed structural validation (bad magic, bad size).
    #[error("invalid file header: {0}")]
    HeaderInvalid(String),

    /// The file was written by a format version this build does not support.
    #[error("unsupported format version: {found} (supported: {min}..={current})")]
    VersionUnsupported {
        found: u16,
        min: u16,
        current: u16,
    },

    /// `page_size` at open does not match the page size recorded in the header.
    #[error("page size mismatch: file has {on_disk}, opened with {requested}")]
    PageSizeMismatch { on_disk: u32, requested: u32 },

    /// A block's stored checksum does not match the checksum of its bytes on disk.
    #[error("checksum mismatch for block {name:?}: expected {expected}, found {found}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        found: String,
    },

    /// A second transaction was started while one was already active.
    #[error("a transaction is already active on this provider")]
    TransactionConflict,

    /// A transaction operation was attempted from an invalid state.
    #[error("invalid transaction state transition: {0}")]
    TransactionStateError(String),

    /// The block registry region is too small to hold another flush.
    #[error("block registry region overflow: {0}")]
    RegistryOverflow(String),

    /// The free-space map region is too small to hold another flush.
    #[error("free-space map region overflow: {0}")]
    FsmOverflow(String),

    /// The WAL ran out of room for an in-flight transaction.
    #[error("write-ahead log is full: {0}")]
    WalFull(String),

    /// The file was opened with encryption enabled but no key was supplied.
    #[error("encryption key required but not provided")]
    EncryptionKeyMissing,

    /// A block name is too long to survive a registry reload under its
    /// original name (the on-disk entry only carries an inline, truncated copy).
    #[error("block name {name:?} is {len} bytes, exceeding the {max}-byte limit")]
    NameTooLong { name: String, len: usize, max: usize },

    /// AEAD tag verification failed while decrypting a block.
    #[error("failed to decrypt block {0:?}: authentication tag mismatch")]
    DecryptionFailed(String),

    /// A structural decode failure not covered by a more specific variant
    /// (truncated record, bad enum discriminant, size-limit violation, ...).
    #[error("corrupted data: {0}")]
    Corruption(String),

    /// The underlying filesystem returned an error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
