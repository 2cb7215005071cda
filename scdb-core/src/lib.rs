//! Shared types, error taxonomy and on-disk magic numbers for scdb.
//!
//! `scdb-core` has no I/O of its own — it exists so that `scdb-storage` and
//! `scdb-cli` agree on error variants, scalar identifiers and magic numbers
//! without depending on each other.

mod error;
mod magic;
mod types;

pub use error::{Error, Result};
pub use magic::{
    magic_to_ascii, validate_magic, FILE_HEADER_MAGIC, FSM_MAGIC, REGISTRY_MAGIC,
    TABLE_DIRECTORY_MAGIC, WAL_MAGIC,
};
pub use types::{BlockName, EncryptionMode, Lsn, Operation, PageId, SyncMode, TxnId};
