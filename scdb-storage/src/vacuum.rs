//! Vacuum modes and the report produced by a vacuum run.
//!
//! The actual vacuum orchestration lives on [`crate::provider::StorageProvider`]
//! since it needs access to the registry, free-space map and file handle at
//! once; this module only carries the request/response shapes so callers
//! (including `scdb-cli`) don't need to reach into `provider` for them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How thorough a vacuum pass should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VacuumMode {
    /// Recomputes fragmentation and reclaims already-free extents into the
    /// L2 extent list; never moves a live block.
    Quick,
    /// Relocates a bounded number of blocks out of the most fragmented
    /// region in a single pass. Bounded deliberately: repeated calls make
    /// incremental progress rather than looping until the file is
    /// perfectly defragmented in one call.
    Incremental,
    /// Rewrites the entire file compactly: copy every live block to a
    /// temporary file in allocation order, fsync, rename over the
    /// original, delete the backup. Rolls back to the original on any
    /// failure before the rename completes.
    Full,
}

/// Upper bound on blocks relocated by one [`VacuumMode::Incremental`] pass.
pub const INCREMENTAL_BATCH_SIZE: usize = 64;

/// Outcome of one vacuum invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VacuumReport {
    pub mode: VacuumMode,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub bytes_reclaimed: u64,
    pub fragmentation_before: u8,
    pub fragmentation_after: u8,
    pub blocks_moved: u64,
    pub blocks_deleted: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl VacuumReport {
    pub(crate) fn failed(mode: VacuumMode, fragmentation_before: u8, duration: Duration, error: String) -> Self {
        Self {
            mode,
            duration,
            bytes_reclaimed: 0,
            fragmentation_before,
            fragmentation_after: fragmentation_before,
            blocks_moved: 0,
            blocks_deleted: 0,
            success: false,
            error: Some(error),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
