//! Appends records to the write-ahead log ring buffer.
//!
//! Unlike an append-only log, the WAL region is a fixed-capacity ring: once
//! the tail catches up to the head, further appends silently reclaim the
//! oldest slot rather than growing the file. That is the "fixed capacity"
//! contract described in the WAL region's module docs, not a failure mode.
//! The only genuine overflow is a single unfinished transaction needing
//! more live slots than the ring holds (`Error::WalFull`).

use super::header::WalHeader;
use super::metrics::WalMetrics;
use super::record::WalRecord;
use scdb_core::{Error, Lsn, Operation, Result, SyncMode, TxnId};

use parking_lot::Mutex;

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

/// Durable, thread-safe writer over one WAL region.
pub struct WalWriter {
    file: Arc<Mutex<File>>,
    /// Absolute byte offset of the WAL region within the `.scdb` file.
    base_offset: u64,
    header: Mutex<WalHeader>,
    sync_mode: SyncMode,
    metrics: Arc<WalMetrics>,
}

impl WalWriter {
    /// Opens a writer over a WAL region that has already been formatted
    /// with [`WalHeader::new`] at `base_offset`.
    pub fn new(
        file: Arc<Mutex<File>>,
        base_offset: u64,
        header: WalHeader,
        sync_mode: SyncMode,
        metrics: Arc<WalMetrics>,
    ) -> Self {
        Self {
            file,
            base_offset,
            header: Mutex::new(header),
            sync_mode,
            metrics,
        }
    }

    /// Maximum payload bytes one record slot can carry before the caller's
    /// data must be split across a continuation group.
    fn max_payload_per_slot(&self, block_name_len: usize) -> usize {
        const RECORD_HEADER_SIZE: usize = 86;
        let header = self.header.lock();
        (header.entry_size as usize).saturating_sub(RECORD_HEADER_SIZE + block_name_len)
    }

    /// Appends one logical write, splitting it into a continuation group if
    /// it does not fit in a single slot. Returns the LSN of the group's
    /// first record.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        operation: Operation,
        txn_id: TxnId,
        block_name: &str,
        page_id: u64,
        data: &[u8],
    ) -> Result<Lsn> {
        let chunk_size = self.max_payload_per_slot(block_name.len()).max(1);
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&data[..]]
        } else {
            data.chunks(chunk_size).collect()
        };

        let mut header = self.header.lock();
        let operation_id = header.current_lsn;
        let mut first_lsn = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let lsn = header.current_lsn;
            header.current_lsn += 1;
            first_lsn.get_or_insert(lsn);

            let mut record = WalRecord::new(
                lsn,
                operation_id,
                txn_id,
                operation,
                block_name,
                page_id,
                chunk.to_vec(),
            );
            record.continuation = i + 1 < chunks.len();

            self.write_record_at_tail(&mut header, &record)?;
            self.metrics.record_write(record.encoded_len() as u64);
        }

        self.persist_header(&header)?;
        drop(header);
        self.sync_if_needed()?;

        Ok(first_lsn.expect("chunks is never empty"))
    }

    /// Appends a lifecycle marker (`Begin`/`Commit`/`Abort`/`Checkpoint`)
    /// carrying no payload.
    pub fn append_marker(&self, operation: Operation, txn_id: TxnId) -> Result<Lsn> {
        self.append(operation, txn_id, "", 0, &[])
    }

    /// Records that `lsn` has been durably checkpointed: slots up to and
    /// including it may be reclaimed even mid-ring. Enqueues an actual
    /// `Checkpoint` marker record before updating the header, so replay can
    /// see the boundary rather than inferring it from the header alone.
    pub fn checkpoint(&self, lsn: Lsn) -> Result<()> {
        self.append_marker(Operation::Checkpoint, 0)?;

        let mut header = self.header.lock();
        header.last_checkpoint_lsn = lsn;
        self.persist_header(&header)?;
        self.metrics.record_checkpoint();
        Ok(())
    }

    fn write_record_at_tail(&self, header: &mut WalHeader, record: &WalRecord) -> Result<()> {
        let encoded = record.encode()?;
        if encoded.len() > header.entry_size as usize {
            return Err(Error::Corruption(format!(
                "WAL record of {} bytes exceeds entry size {}",
                encoded.len(),
                header.entry_size
            )));
        }

        let ring_bytes = header.max_entries as u64 * header.entry_size as u64;
        let slot_offset = header.tail_offset;
        let next_tail = (slot_offset + header.entry_size as u64) % ring_bytes;

        let ring_is_full_of_live_records = next_tail == header.head_offset;
        let oldest_record_uncheckpointed = header.current_lsn.saturating_sub(1) > header.last_checkpoint_lsn;
        if ring_is_full_of_live_records && oldest_record_uncheckpointed && header.current_lsn > header.max_entries as u64 {
            return Err(Error::WalFull(
                "ring buffer exhausted by an unfinished transaction".to_string(),
            ));
        }

        let mut file = self.file.lock();
        let abs_offset = self.base_offset + header.entry_start_offset as u64 + slot_offset;
        file.seek(SeekFrom::Start(abs_offset))?;

        let mut slot = vec![0u8; header.entry_size as usize];
        slot[..encoded.len()].copy_from_slice(&encoded);
        file.write_all(&slot)?;

        if ring_is_full_of_live_records {
            header.head_offset = (header.head_offset + header.entry_size as u64) % ring_bytes;
        }
        header.tail_offset = next_tail;

        Ok(())
    }

    fn persist_header(&self, header: &WalHeader) -> Result<()> {
        let mut header = *header;
        header.header_checksum = {
            use crate::format::ChecksummedHeader;
            header.calculate_checksum()
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.base_offset))?;
        file.write_all(&header.encode())?;
        Ok(())
    }

    fn sync_if_needed(&self) -> Result<()> {
        match self.sync_mode {
            SyncMode::None => Ok(()),
            SyncMode::Normal => {
                let file = self.file.lock();
                file.sync_data()?;
                Ok(())
            }
            SyncMode::Full => {
                let file = self.file.lock();
                file.sync_all()?;
                Ok(())
            }
        }
    }

    pub fn current_lsn(&self) -> Lsn {
        self.header.lock().current_lsn
    }

    pub fn last_checkpoint_lsn(&self) -> Lsn {
        self.header.lock().last_checkpoint_lsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RegionHeader;
    fn new_writer(max_entries: u32) -> WalWriter {
        let file = tempfile::tempfile().unwrap();
        let header = WalHeader::new(1, 256, max_entries);
        file.set_len(WalHeader::HEADER_SIZE as u64 + max_entries as u64 * 256).unwrap();
        WalWriter::new(
            Arc::new(Mutex::new(file)),
            0,
            header,
            SyncMode::None,
            Arc::new(WalMetrics::default()),
        )
    }

    #[test]
    fn append_assigns_monotonically_increasing_lsns() {
        let writer = new_writer(16);
        let first = writer.append(Operation::Insert, 1, "blockA", 0, b"one").unwrap();
        let second = writer.append(Operation::Insert, 1, "blockA", 0, b"two").unwrap();
        assert!(second > first);
    }

    #[test]
    fn append_marker_carries_no_payload() {
        let writer = new_writer(16);
        let lsn = writer.append_marker(Operation::Begin, 5).unwrap();
        assert_eq!(lsn, 0);
    }

    #[test]
    fn checkpoint_advances_last_checkpoint_lsn() {
        let writer = new_writer(16);
        let lsn = writer.append(Operation::Insert, 1, "blockA", 0, b"data").unwrap();
        writer.checkpoint(lsn).unwrap();
        assert_eq!(writer.last_checkpoint_lsn(), lsn);
    }

    #[test]
    fn checkpoint_appends_a_marker_record_to_the_ring() {
        let writer = new_writer(16);
        let lsn = writer.append(Operation::Insert, 1, "blockA", 0, b"data").unwrap();
        let before = writer.current_lsn();
        writer.checkpoint(lsn).unwrap();
        assert_eq!(writer.current_lsn(), before + 1, "checkpoint should enqueue its own record");
    }

    #[test]
    fn large_payload_splits_into_a_continuation_group() {
        let writer = new_writer(16);
        let payload = vec![0xABu8; 1000];
        let first_lsn = writer.append(Operation::Insert, 1, "blockA", 0, &payload).unwrap();
        assert!(writer.current_lsn() > first_lsn + 1, "payload should span multiple records");
    }
}
