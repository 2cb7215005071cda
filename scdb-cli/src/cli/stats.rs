use std::io::Write;
use std::path::Path;

use scdb_core::Result;
use scdb_storage::{StorageOptions, StorageProvider};

pub struct StatsOptions {
    pub json: bool,
}

pub async fn execute(path: &Path, opts: &StatsOptions, writer: &mut dyn Write) -> Result<()> {
    let provider = StorageProvider::open(path, StorageOptions::default()).await?;
    let stats = provider.get_statistics();
    provider.close().await?;

    if opts.json {
        let value = serde_json::json!({
            "block_count": stats.block_count,
            "table_count": stats.table_count,
            "total_pages": stats.total_pages,
            "free_pages": stats.free_pages,
            "used_pages": stats.used_pages,
            "largest_extent_pages": stats.largest_extent_pages,
            "fragmentation_percent": stats.fragmentation_percent,
            "cache_hit_rate": stats.cache_hit_rate,
            "wal_writes_total": stats.wal_writes_total,
            "wal_checkpoints_total": stats.wal_checkpoints_total,
            "last_txn_id": stats.last_txn_id,
            "last_checkpoint_lsn": stats.last_checkpoint_lsn,
        });
        writeln!(writer, "{}", serde_json::to_string_pretty(&value).unwrap())?;
    } else {
        writeln!(writer, "blocks:              {}", stats.block_count)?;
        writeln!(writer, "tables:              {}", stats.table_count)?;
        writeln!(writer, "total pages:         {}", stats.total_pages)?;
        writeln!(writer, "free pages:          {}", stats.free_pages)?;
        writeln!(writer, "used pages:          {}", stats.used_pages)?;
        writeln!(writer, "largest free extent: {} pages", stats.largest_extent_pages)?;
        writeln!(writer, "fragmentation:       {}%", stats.fragmentation_percent)?;
        writeln!(writer, "cache hit rate:      {:.1}%", stats.cache_hit_rate * 100.0)?;
        writeln!(writer, "WAL writes:          {}", stats.wal_writes_total)?;
        writeln!(writer, "WAL checkpoints:     {}", stats.wal_checkpoints_total)?;
        writeln!(writer, "last txn id:         {}", stats.last_txn_id)?;
        writeln!(writer, "last checkpoint lsn: {}", stats.last_checkpoint_lsn)?;
    }
    Ok(())
}
