use std::io::Write;
use std::path::Path;

use scdb_core::Result;
use scdb_storage::{StorageOptions, StorageProvider};

pub struct LsOptions {
    pub json: bool,
}

pub async fn execute(path: &Path, opts: &LsOptions, writer: &mut dyn Write) -> Result<()> {
    let provider = StorageProvider::open(path, StorageOptions::default()).await?;
    let mut names = provider.enumerate_blocks();
    names.sort();

    let rows: Vec<_> = names
        .iter()
        .filter_map(|name| provider.get_metadata(name))
        .collect();
    provider.close().await?;

    if opts.json {
        let value: Vec<_> = rows
            .iter()
            .map(|m| {
                serde_json::json!({
                    "name": m.name,
                    "size": m.size,
                    "offset": m.offset,
                    "dirty": m.dirty,
                })
            })
            .collect();
        writeln!(writer, "{}", serde_json::to_string_pretty(&value).unwrap())?;
    } else {
        for m in &rows {
            writeln!(writer, "{:<32} {:>10} bytes  offset {}", m.name, m.size, m.offset)?;
        }
        writeln!(writer, "{} block(s)", rows.len())?;
    }
    Ok(())
}
