//! Write-ahead log record encoding.
//!
//! Each record represents one step of a transaction: a lifecycle marker
//! (`Begin`/`Commit`/`Abort`/`Checkpoint`) or a logged mutation
//! (`Insert`/`Update`/`Delete`/`PageAllocate`/`PageFree`). Records are
//! encoded into fixed-size ring slots; a payload that does not fit in one
//! slot is split across consecutive records that share an `operation_id`,
//! each but the last flagged `Continuation`.
//!
//! ## Binary Format
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -----          -----------
//! 0       4     length         Bytes used by this record (including this field)
//! 4       8     lsn            This record's log sequence number
//! 12      8     operation_id   Shared by every record in a split group
//! 20      8     txn_id         Owning transaction id (0 for non-transactional records)
//! 28      8     timestamp      Microseconds since Unix epoch
//! 36      1     operation      Operation discriminant
//! 37      1     flags          bit0: Continuation (more records follow in this group)
//! 38      2     reserved       Zero
//! 40      8     page_id        Page affected, if any (0 otherwise)
//! 48      2     block_name_len Length of the block name, if any
//! 50      4     data_len       Length of the payload
//! 54      32    checksum       SHA-256 over block_name || data
//! 86      var   block_name     UTF-8 block name (empty for page-only records)
//! 86+n    var   data           Payload bytes
//! ```
//!
//! `length` lets a reader skip a record without decoding its payload;
//! `checksum` is verified before a record's payload is trusted for replay.

use scdb_core::{Error, Lsn, Operation, Result, TxnId};

use bytes::{Buf, BufMut, BytesMut};
use sha2::{Digest, Sha256};

const HEADER_SIZE: usize = 86;
const CHECKSUM_SIZE: usize = 32;
const CONTINUATION_FLAG: u8 = 0b0000_0001;

/// One slot's worth of write-ahead log content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub operation_id: u64,
    pub txn_id: TxnId,
    pub timestamp: u64,
    pub operation: Operation,
    pub continuation: bool,
    pub page_id: u64,
    pub block_name: String,
    pub data: Vec<u8>,
}

impl WalRecord {
    pub fn new(
        lsn: Lsn,
        operation_id: u64,
        txn_id: TxnId,
        operation: Operation,
        block_name: impl Into<String>,
        page_id: u64,
        data: Vec<u8>,
    ) -> Self {
        Self {
            lsn,
            operation_id,
            txn_id,
            timestamp: current_timestamp_micros(),
            operation,
            continuation: false,
            page_id,
            block_name: block_name.into(),
            data,
        }
    }

    /// Size this record would occupy once encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.block_name.len() + self.data.len()
    }

    fn checksum(block_name: &str, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(block_name.as_bytes());
        hasher.update(data);
        hasher.finalize().into()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let block_name_len: u16 = self.block_name.len().try_into().map_err(|_| {
            Error::Corruption(format!(
                "WAL record block name length {} exceeds u16",
                self.block_name.len()
            ))
        })?;
        let data_len: u32 = self.data.len().try_into().map_err(|_| {
            Error::Corruption(format!(
                "WAL record data length {} exceeds u32",
                self.data.len()
            ))
        })?;

        let total_len = HEADER_SIZE + self.block_name.len() + self.data.len();
        let mut buf = BytesMut::with_capacity(total_len);

        buf.put_u32_le(total_len as u32);
        buf.put_u64_le(self.lsn);
        buf.put_u64_le(self.operation_id);
        buf.put_u64_le(self.txn_id);
        buf.put_u64_le(self.timestamp);
        buf.put_u8(self.operation as u8);
        buf.put_u8(if self.continuation {
            CONTINUATION_FLAG
        } else {
            0
        });
        buf.put_u16_le(0); // reserved
        buf.put_u64_le(self.page_id);
        buf.put_u16_le(block_name_len);
        buf.put_u32_le(data_len);
        buf.put_slice(&Self::checksum(&self.block_name, &self.data));
        buf.put_slice(self.block_name.as_bytes());
        buf.put_slice(&self.data);

        Ok(buf.to_vec())
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "WAL record too small: {} bytes (expected at least {})",
                data.len(),
                HEADER_SIZE
            )));
        }

        let total_len = data.get_u32_le() as usize;
        if data.len() + 4 < total_len {
            return Err(Error::Corruption(
                "WAL record truncated before its declared length".to_string(),
            ));
        }

        let lsn = data.get_u64_le();
        let operation_id = data.get_u64_le();
        let txn_id = data.get_u64_le();
        let timestamp = data.get_u64_le();
        let operation = Operation::from_u8(data.get_u8())?;
        let flags = data.get_u8();
        let continuation = flags & CONTINUATION_FLAG != 0;
        let _reserved = data.get_u16_le();
        let page_id = data.get_u64_le();
        let block_name_len = data.get_u16_le() as usize;
        let data_len = data.get_u32_le() as usize;

        let mut stored_checksum = [0u8; CHECKSUM_SIZE];
        data.copy_to_slice(&mut stored_checksum);

        if data.remaining() < block_name_len + data_len {
            return Err(Error::Corruption(
                "WAL record payload shorter than declared lengths".to_string(),
            ));
        }

        let mut name_bytes = vec![0u8; block_name_len];
        data.copy_to_slice(&mut name_bytes);
        let block_name = String::from_utf8(name_bytes)
            .map_err(|e| Error::Corruption(format!("WAL record block name not UTF-8: {e}")))?;

        let mut payload = vec![0u8; data_len];
        data.copy_to_slice(&mut payload);

        let computed = Self::checksum(&block_name, &payload);
        if computed != stored_checksum {
            return Err(Error::ChecksumMismatch {
                name: block_name,
                expected: hex_encode(&stored_checksum),
                found: hex_encode(&computed),
            });
        }

        Ok(Self {
            lsn,
            operation_id,
            txn_id,
            timestamp,
            operation,
            continuation,
            page_id,
            block_name,
            data: payload,
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn current_timestamp_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(data: Vec<u8>) -> WalRecord {
        WalRecord::new(1, 1, 42, Operation::Insert, "blockA", 7, data)
    }

    #[test]
    fn encode_decode_round_trips_a_small_record() {
        let record = sample(b"hello world".to_vec());
        let encoded = record.encode().unwrap();
        let decoded = WalRecord::decode(&encoded).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn encode_decode_round_trips_an_empty_payload() {
        let record = sample(Vec::new());
        let encoded = record.encode().unwrap();
        let decoded = WalRecord::decode(&encoded).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn decode_detects_a_single_bit_flip_in_the_payload() {
        let record = sample(b"durable bytes".to_vec());
        let mut encoded = record.encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        let result = WalRecord::decode(&encoded);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn decode_rejects_truncated_records() {
        let record = sample(b"full payload".to_vec());
        let encoded = record.encode().unwrap();
        let truncated = &encoded[..encoded.len() - 5];

        assert!(WalRecord::decode(truncated).is_err());
    }

    #[test]
    fn continuation_flag_round_trips() {
        let mut record = sample(b"split across records".to_vec());
        record.continuation = true;
        let encoded = record.encode().unwrap();
        let decoded = WalRecord::decode(&encoded).unwrap();
        assert!(decoded.continuation);
    }

    #[test]
    fn encoded_len_matches_actual_encoding_size() {
        let record = sample(b"size check".to_vec());
        assert_eq!(record.encoded_len(), record.encode().unwrap().len());
    }
}
