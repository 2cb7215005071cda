//! Common traits shared by every on-disk region in scdb.
//!
//! The file header, block registry, free-space map, WAL and table directory
//! each have their own layout, but all of them are a fixed-size header
//! followed by a payload, and all of them need the same validation and
//! checksum plumbing. These traits let that plumbing live in one place.

use scdb_core::{Error, Result};
use std::path::Path;

/// Identifies an on-disk region's format and supported version range.
pub trait RegionFormat: Sized {
    /// Magic bytes identifying this region.
    const MAGIC: &'static [u8; 8];

    /// Human-readable name for error messages.
    const FORMAT_NAME: &'static str;

    /// Current version written by this build.
    const CURRENT_VERSION: u16;

    /// Minimum version this build can still read.
    const MIN_SUPPORTED_VERSION: u16;
}

/// Header encode/decode/validate operations for a region.
pub trait RegionHeader: RegionFormat {
    /// Size of the header in bytes.
    const HEADER_SIZE: usize;

    fn encode(&self) -> Vec<u8>;

    fn decode(data: &[u8]) -> Result<Self>;

    /// Structural validation: magic, version range, internal consistency.
    fn validate(&self) -> Result<()>;

    fn magic(&self) -> &[u8; 8];

    fn version(&self) -> u16;

    /// Whether `version()` falls within this build's supported major-version range.
    fn is_version_supported(&self) -> bool {
        let major = self.version() >> 8;
        let min_major = Self::MIN_SUPPORTED_VERSION >> 8;
        let current_major = Self::CURRENT_VERSION >> 8;

        major >= min_major && major <= current_major
    }
}

/// Whole-file validation helpers, used before trusting anything else in the file.
pub trait ValidateFile: RegionHeader {
    /// Reads and validates just the header, without touching the rest of the file.
    fn validate_file_header(path: &Path) -> Result<()> {
        use std::fs::File;
        use std::io::Read;

        let mut file = File::open(path)?;
        let mut header_bytes = vec![0u8; Self::HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;

        let header = Self::decode(&header_bytes)?;
        header.validate()?;

        Ok(())
    }

    /// Confirms a path is this region's format by reading only its magic bytes.
    fn identify_file(path: &Path) -> Result<String> {
        use std::fs::File;
        use std::io::Read;

        let mut file = File::open(path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;

        if &magic == Self::MAGIC {
            Ok(Self::FORMAT_NAME.to_string())
        } else {
            Err(Error::Corruption(format!(
                "not a {} region (wrong magic bytes)",
                Self::FORMAT_NAME
            )))
        }
    }
}

/// Headers carrying their own quick-integrity checksum (CRC32; see the
/// module docs on `FileHeader` for why header checksums differ from the
/// SHA-256 content checksums used on block and WAL record payloads).
pub trait ChecksummedHeader: RegionHeader {
    fn calculate_checksum(&self) -> u32;

    fn stored_checksum(&self) -> u32;

    fn verify_checksum(&self) -> Result<()> {
        let calculated = self.calculate_checksum();
        let stored = self.stored_checksum();

        if calculated != stored {
            Err(Error::Corruption(format!(
                "{} header checksum mismatch: expected {:#x}, got {:#x}",
                Self::FORMAT_NAME,
                stored,
                calculated
            )))
        } else {
            Ok(())
        }
    }
}

/// Creation metadata common to every region header.
pub trait FileMetadata {
    /// Unix timestamp in microseconds.
    fn created_at(&self) -> u64;

    fn created_at_string(&self) -> String {
        use std::time::Duration;
        let duration = Duration::from_micros(self.created_at());
        let secs = duration.as_secs();
        let micros = duration.subsec_micros();
        format!("{}.{:06}Z", secs, micros)
    }
}

/// Regions made up of a sequence of fixed- or variable-length entries.
pub trait EntryBasedFile: RegionFormat {
    type Entry;

    fn entry_count(&self) -> u64;

    fn avg_entry_size(&self) -> Option<u64>;
}
