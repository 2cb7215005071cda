//! Magic numbers and region signatures for the scdb file format.
//!
//! Every on-disk region (file header, block registry, free-space map, WAL,
//! table directory) starts with its own 8-byte magic number so that a
//! reader can tell a truncated or misplaced region from a valid one before
//! trusting any other field in it.
//!
//! # Magic Number Format
//!
//! - Start with "SCDB" (format identifier)
//! - Followed by a region identifier
//! - Padded with underscores to reach 8 bytes
//! - Stored on disk as little-endian `u64`
//!
//! Note: the hex constants below are written as big-endian ASCII for
//! readability but are always serialized little-endian, consistent with
//! every other multi-byte field in the format.

/// File header magic: "SCDBHDR_"
pub const FILE_HEADER_MAGIC: u64 = 0x5343_4442_4844_525F;

/// Block registry region magic: "SCDBREG_"
pub const REGISTRY_MAGIC: u64 = 0x5343_4442_5245_475F;

/// Free-space map region magic: "SCDBFSM_"
pub const FSM_MAGIC: u64 = 0x5343_4442_4653_4D5F;

/// Write-ahead log region magic: "SCDBWAL_"
pub const WAL_MAGIC: u64 = 0x5343_4442_5741_4C5F;

/// Table directory region magic: "SCDBTBL_"
pub const TABLE_DIRECTORY_MAGIC: u64 = 0x5343_4442_5442_4C5F;

/// Converts a magic number to its ASCII representation for debugging.
pub fn magic_to_ascii(magic: u64) -> String {
    let bytes = magic.to_le_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Validates that `data` begins with the expected magic number.
pub fn validate_magic(data: &[u8], expected: u64) -> crate::Result<()> {
    if data.len() < 8 {
        return Err(crate::Error::HeaderInvalid(
            "region too small to contain a magic number".to_string(),
        ));
    }

    let magic = u64::from_le_bytes(data[0..8].try_into().unwrap());
    if magic != expected {
        return Err(crate::Error::HeaderInvalid(format!(
            "invalid magic number: expected {} ({}), found {} ({})",
            expected,
            magic_to_ascii(expected),
            magic,
            magic_to_ascii(magic),
        )));
    }

    Ok(())
}
