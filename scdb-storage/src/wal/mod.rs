//! Write-ahead log: a fixed-capacity ring of checksummed records guarding
//! every mutation made against the block store.
//!
//! ## Region Layout
//!
//! ```text
//! +------------------+
//! |   WAL Header     |  128 bytes - ring geometry, LSNs, checksum
//! +------------------+
//! |   Record slot 0  |  entry_size bytes
//! +------------------+
//! |   Record slot 1  |  entry_size bytes
//! +------------------+
//! |       ...        |
//! +------------------+
//! |  Record slot N-1 |
//! +------------------+
//! ```
//!
//! Every slot is the same fixed size (`entry_size`, typically 4 KiB) so the
//! ring can be addressed by multiplying a slot index by that size; see
//! [`WalRecord`] for what is stored in a slot and [`WalHeader`] for the ring
//! geometry itself.
//!
//! ## Design Rationale
//!
//! - **Fixed-capacity ring, not append-only**: callers size the ring for
//!   their expected in-flight transaction volume; once full, the oldest
//!   *checkpointed* record is silently reclaimed. Overflow is only raised
//!   when a single transaction that has not yet committed would need more
//!   slots than the ring holds.
//! - **Continuation groups**: a payload larger than one slot is split
//!   across consecutive records sharing an `operation_id`; replay accepts
//!   the whole group only if it runs to completion without a gap.
//! - **Per-record SHA-256**: content checksums use SHA-256 (unlike the
//!   region header's CRC32) so the value matches the checksum stored
//!   against the same data once it lands in a block.
//!
//! ## Recovery
//!
//! [`WalReader::read_entries_since_checkpoint`] walks the ring from head to
//! tail, validating each record, and stops at the first invalid one — the
//! remainder of the ring is assumed to belong to a transaction that never
//! finished committing and is discarded.

mod header;
mod metrics;
mod reader;
mod record;
mod writer;

pub use header::{WalHeader, WAL_CURRENT_VERSION, WAL_HEADER_SIZE, WAL_MAGIC};
pub use metrics::WalMetrics;
pub use reader::WalReader;
pub use record::WalRecord;
pub use writer::WalWriter;
