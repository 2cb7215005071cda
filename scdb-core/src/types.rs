//! Scalar type aliases and small value types shared across storage regions.

use serde::{Deserialize, Serialize};

/// Identifies a block by its registered name.
pub type BlockName = String;

/// A write-ahead log sequence number. Monotonically increasing within a file.
pub type Lsn = u64;

/// Identifies a transaction for the lifetime of its `Begin..{Commit,Abort}` span.
pub type TxnId = u64;

/// Identifies a fixed-size page by its index from the start of the page area.
pub type PageId = u64;

/// Durability policy applied after a write touches the file.
///
/// Mirrors the three-way tradeoff every embedded store exposes: skip the
/// sync call entirely, sync data only, or sync data and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Never call `fsync`/`fdatasync`; rely on the OS page cache.
    None,
    /// `fdatasync` after commit: durable data, metadata may lag.
    Normal,
    /// `fsync` after commit: durable data and metadata.
    Full,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Normal
    }
}

/// Whether block payloads are encrypted at rest, and with what cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMode {
    /// Payloads are stored as plaintext.
    None,
    /// Payloads are sealed with AES-256-GCM using a per-file nonce seed.
    Aes256Gcm,
}

impl Default for EncryptionMode {
    fn default() -> Self {
        EncryptionMode::None
    }
}

/// Write-ahead log operation codes. One discriminant per WAL record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    Begin = 0,
    Commit = 1,
    Abort = 2,
    Insert = 3,
    Update = 4,
    Delete = 5,
    PageAllocate = 6,
    PageFree = 7,
    Checkpoint = 8,
}

impl Operation {
    /// Decodes a WAL op-code byte, rejecting anything not in the table.
    pub fn from_u8(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(Operation::Begin),
            1 => Ok(Operation::Commit),
            2 => Ok(Operation::Abort),
            3 => Ok(Operation::Insert),
            4 => Ok(Operation::Update),
            5 => Ok(Operation::Delete),
            6 => Ok(Operation::PageAllocate),
            7 => Ok(Operation::PageFree),
            8 => Ok(Operation::Checkpoint),
            other => Err(crate::Error::Corruption(format!(
                "unknown WAL operation code {other}"
            ))),
        }
    }
}
