use std::io::Write;
use std::path::Path;

use scdb_core::Result;
use scdb_storage::{StorageOptions, StorageProvider};

pub struct OpenOptions {
    pub json: bool,
}

/// Opens (creating if necessary) the file at `path`, runs crash recovery if
/// needed, then closes it again. Exists so an operator can confirm a file is
/// readable and well-formed without writing a throwaway client.
pub async fn execute(path: &Path, opts: &OpenOptions, writer: &mut dyn Write) -> Result<()> {
    let provider = StorageProvider::open(path, StorageOptions::default()).await?;
    let stats = provider.get_statistics();
    provider.close().await?;

    if opts.json {
        let value = serde_json::json!({
            "path": path.display().to_string(),
            "opened": true,
            "block_count": stats.block_count,
            "table_count": stats.table_count,
        });
        writeln!(writer, "{}", serde_json::to_string_pretty(&value).unwrap())?;
    } else {
        writeln!(writer, "opened {} ({} blocks, {} tables)", path.display(), stats.block_count, stats.table_count)?;
    }
    Ok(())
}
