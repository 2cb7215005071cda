use std::io::Write;
use std::path::Path;

use scdb_core::{Error, Result};
use scdb_storage::{StorageOptions, StorageProvider, VacuumMode};

pub struct VacuumOptions {
    pub mode: VacuumMode,
    pub json: bool,
}

/// Parses the `--mode` flag's value. Kept here rather than as a `clap`
/// `ValueEnum` impl on `VacuumMode` itself, since the storage crate has no
/// reason to know about `clap`.
pub fn parse_mode(raw: &str) -> std::result::Result<VacuumMode, String> {
    match raw {
        "quick" => Ok(VacuumMode::Quick),
        "incremental" => Ok(VacuumMode::Incremental),
        "full" => Ok(VacuumMode::Full),
        other => Err(format!("unknown vacuum mode {other:?} (expected quick, incremental, or full)")),
    }
}

pub async fn execute(path: &Path, opts: &VacuumOptions, writer: &mut dyn Write) -> Result<()> {
    let provider = StorageProvider::open(path, StorageOptions::default()).await?;
    let report = provider.vacuum(opts.mode).await;
    provider.close().await?;
    let report = report?;

    if opts.json {
        let value = serde_json::json!({
            "mode": format!("{:?}", report.mode),
            "duration_ms": report.duration.as_millis() as u64,
            "bytes_reclaimed": report.bytes_reclaimed,
            "fragmentation_before": report.fragmentation_before,
            "fragmentation_after": report.fragmentation_after,
            "blocks_moved": report.blocks_moved,
            "blocks_deleted": report.blocks_deleted,
            "success": report.success,
            "error": report.error,
        });
        writeln!(writer, "{}", serde_json::to_string_pretty(&value).unwrap())?;
    } else {
        writeln!(writer, "mode:                {:?}", report.mode)?;
        writeln!(writer, "duration:            {}ms", report.duration.as_millis())?;
        writeln!(writer, "bytes reclaimed:     {}", report.bytes_reclaimed)?;
        writeln!(writer, "fragmentation:       {}% -> {}%", report.fragmentation_before, report.fragmentation_after)?;
        writeln!(writer, "blocks moved:        {}", report.blocks_moved)?;
        writeln!(writer, "blocks deleted:      {}", report.blocks_deleted)?;
        if !report.success {
            writeln!(writer, "FAILED: {}", report.error.as_deref().unwrap_or("unknown error"))?;
            return Err(Error::Corruption(report.error.unwrap_or_default()));
        }
    }
    Ok(())
}
