//! Reads and replays records from the write-ahead log ring buffer.

use super::header::WalHeader;
use super::metrics::WalMetrics;
use super::record::WalRecord;
use scdb_core::Result;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use log::warn;

/// Reads records out of a WAL region for recovery or inspection.
pub struct WalReader {
    file: File,
    base_offset: u64,
    header: WalHeader,
    metrics: Arc<WalMetrics>,
}

impl WalReader {
    pub fn new(mut file: File, base_offset: u64, metrics: Arc<WalMetrics>) -> Result<Self> {
        use crate::format::RegionHeader;

        file.seek(SeekFrom::Start(base_offset))?;
        let mut header_bytes = vec![0u8; WalHeader::HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = WalHeader::decode(&header_bytes)?;

        Ok(Self {
            file,
            base_offset,
            header,
            metrics,
        })
    }

    /// Walks every live slot from the ring's head to its tail, validating
    /// each record's checksum. Replay stops at the first slot that fails to
    /// decode or checksum — the rest of the ring, however much is left, is
    /// assumed to belong to a transaction that never finished committing.
    pub fn read_entries_since_checkpoint(&mut self) -> Result<Vec<WalRecord>> {
        let ring_bytes = self.header.max_entries as u64 * self.header.entry_size as u64;
        let mut offset = self.header.head_offset;
        let mut records = Vec::new();

        if ring_bytes == 0 || self.header.head_offset == self.header.tail_offset {
            return Ok(records);
        }

        loop {
            let abs_offset = self.base_offset + self.header.entry_start_offset as u64 + offset;
            self.file.seek(SeekFrom::Start(abs_offset))?;

            let mut slot = vec![0u8; self.header.entry_size as usize];
            self.file.read_exact(&mut slot)?;

            match WalRecord::decode(&slot) {
                Ok(record) => {
                    self.metrics.record_read(record.encoded_len() as u64);
                    records.push(record);
                }
                Err(err) => {
                    warn!("stopping WAL replay at offset {offset}: {err}");
                    self.metrics.record_corruption();
                    break;
                }
            }

            offset = (offset + self.header.entry_size as u64) % ring_bytes;
            if offset == self.header.tail_offset {
                break;
            }
        }

        Ok(records)
    }

    pub fn header(&self) -> &WalHeader {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::writer::WalWriter;
    use parking_lot::Mutex;
    use scdb_core::{Operation, SyncMode};

    fn new_file(max_entries: u32) -> File {
        let file = tempfile::tempfile().unwrap();
        file.set_len(WalHeader::HEADER_SIZE as u64 + max_entries as u64 * 256)
            .unwrap();
        file
    }

    #[test]
    fn reader_replays_every_record_written_in_lsn_order() {
        let file = new_file(16);
        let header = WalHeader::new(1, 256, 16);
        let shared = Arc::new(Mutex::new(file.try_clone().unwrap()));
        let metrics = Arc::new(WalMetrics::new());
        let writer = WalWriter::new(shared, 0, header, SyncMode::None, metrics.clone());

        writer.append(Operation::Insert, 1, "blockA", 0, b"first").unwrap();
        writer.append(Operation::Insert, 1, "blockA", 1, b"second").unwrap();

        let mut reader = WalReader::new(file.try_clone().unwrap(), 0, metrics).unwrap();
        let records = reader.read_entries_since_checkpoint().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, b"first");
        assert_eq!(records[1].data, b"second");
        assert!(records[0].lsn < records[1].lsn);
    }

    #[test]
    fn reader_returns_nothing_for_an_empty_ring() {
        use crate::format::RegionHeader;
        let file = new_file(16);
        let header = WalHeader::new(1, 256, 16);
        let mut f = file.try_clone().unwrap();
        use std::io::Write;
        f.seek(SeekFrom::Start(0)).unwrap();
        f.write_all(&header.encode()).unwrap();

        let metrics = Arc::new(WalMetrics::new());
        let mut reader = WalReader::new(file, 0, metrics).unwrap();
        let records = reader.read_entries_since_checkpoint().unwrap();
        assert!(records.is_empty());
    }
}
