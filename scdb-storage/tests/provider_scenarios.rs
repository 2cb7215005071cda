//! End-to-end scenarios against [`StorageProvider`] that exercise more than
//! one region at once: growth, vacuum, and file-level corruption boundaries.
//! Single-region behavior (WAL replay, FSM bookkeeping, page layout) has its
//! own focused unit tests alongside the code it exercises.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use scdb_core::Error;
use scdb_storage::{StorageOptions, StorageProvider, VacuumMode};

fn temp_path() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.scdb");
    (dir, path)
}

#[tokio::test]
async fn create_empty_reopen_yields_zero_blocks() {
    let (_dir, path) = temp_path();
    {
        let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();
        provider.flush().await.unwrap();
        provider.close().await.unwrap();
    }

    let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();
    assert!(provider.enumerate_blocks().is_empty());
    assert_eq!(provider.get_statistics().block_count, 0);
}

#[tokio::test]
async fn grow_then_shrink_reports_the_current_size_at_each_step() {
    let (_dir, path) = temp_path();
    let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();

    provider.write_block("k", &vec![1u8; 100]).await.unwrap();
    assert_eq!(provider.get_metadata("k").unwrap().size, 100);

    provider.write_block("k", &vec![2u8; 9000]).await.unwrap();
    assert_eq!(provider.get_metadata("k").unwrap().size, 9000);

    provider.write_block("k", &vec![3u8; 50]).await.unwrap();
    let meta = provider.get_metadata("k").unwrap();
    assert_eq!(meta.size, 50);

    let bytes = provider.read_block("k").await.unwrap().unwrap();
    assert_eq!(bytes.len(), 50);
    assert!(bytes.iter().all(|&b| b == 3));
}

#[tokio::test]
async fn fsm_pages_are_conserved_across_writes_and_deletes() {
    let (_dir, path) = temp_path();
    let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();

    for i in 0..20 {
        provider.write_block(&format!("block-{i}"), &vec![0u8; 4096 * 3]).await.unwrap();
    }
    for i in 0..10 {
        provider.delete_block(&format!("block-{i}")).await.unwrap();
    }

    let stats = provider.get_statistics();
    assert_eq!(stats.total_pages, stats.used_pages + stats.free_pages);
}

#[tokio::test]
async fn writing_a_block_larger_than_free_space_extends_the_file() {
    let (_dir, path) = temp_path();
    let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();

    let before = provider.get_statistics().total_pages;
    let large = vec![9u8; 4096 * 64];
    provider.write_block("big", &large).await.unwrap();
    let after = provider.get_statistics().total_pages;

    assert!(after > before);
    assert_eq!(provider.read_block("big").await.unwrap().unwrap().len(), large.len());
}

#[tokio::test]
async fn opening_a_file_with_an_unsupported_version_fails() {
    let (_dir, path) = temp_path();
    {
        let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();
        provider.close().await.unwrap();
    }

    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(8)).unwrap();
        file.write_all(&0xFFFFu16.to_le_bytes()).unwrap();
    }

    let mut raw = Vec::new();
    OpenOptions::new().read(true).open(&path).unwrap().read_to_end(&mut raw).unwrap();
    assert_eq!(&raw[8..10], &0xFFFFu16.to_le_bytes());

    match StorageProvider::open(&path, StorageOptions::default()).await {
        Err(Error::VersionUnsupported { .. }) => {}
        Err(other) => panic!("expected VersionUnsupported, got {other:?}"),
        Ok(_) => panic!("expected VersionUnsupported, opened successfully"),
    }
}

#[tokio::test]
async fn vacuum_full_preserves_boundary_sized_blocks() {
    let (_dir, path) = temp_path();
    let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();

    let sizes = [0usize, 1, 4096, 4097, 4096 * 10];
    for (i, &size) in sizes.iter().enumerate() {
        provider.write_block(&format!("b{i}"), &vec![(i + 1) as u8; size]).await.unwrap();
    }

    provider.vacuum(VacuumMode::Full).await.unwrap();

    for (i, &size) in sizes.iter().enumerate() {
        let bytes = provider.read_block(&format!("b{i}")).await.unwrap().unwrap();
        assert_eq!(bytes.len(), size);
        assert!(bytes.iter().all(|&b| b == (i + 1) as u8));
    }
}

#[tokio::test]
async fn vacuum_full_survives_a_reopen() {
    let (_dir, path) = temp_path();
    {
        let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();
        for i in 0..50 {
            provider.write_block(&format!("b{i}"), &vec![(i + 1) as u8; 4096 * 2]).await.unwrap();
        }
        for i in 0..30 {
            provider.delete_block(&format!("b{i}")).await.unwrap();
        }
        provider.vacuum(VacuumMode::Full).await.unwrap();
        provider.close().await.unwrap();
    }

    // The registry/FSM written by vacuum_full must describe the file a
    // fresh process actually opens, not the pre-vacuum layout.
    let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();
    for i in 30..50 {
        let bytes = provider.read_block(&format!("b{i}")).await.unwrap().unwrap();
        assert_eq!(bytes.len(), 4096 * 2);
        assert!(bytes.iter().all(|&b| b == (i + 1) as u8));
    }
    for i in 0..30 {
        assert!(provider.read_block(&format!("b{i}")).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn vacuum_full_shrinks_the_file_after_a_mass_delete() {
    let (_dir, path) = temp_path();
    let provider = StorageProvider::open(&path, StorageOptions::default()).await.unwrap();

    for i in 0..1000 {
        provider.write_block(&format!("row-{i}"), &vec![7u8; 4096]).await.unwrap();
    }
    for i in 0..900 {
        provider.delete_block(&format!("row-{i}")).await.unwrap();
    }

    let before_len = std::fs::metadata(&path).unwrap().len();
    provider.vacuum(VacuumMode::Full).await.unwrap();
    let after_len = std::fs::metadata(&path).unwrap().len();

    assert!(after_len <= before_len);
    // metadata + 100 surviving 4 KiB blocks, with a generous allowance for
    // region headers and fixed-size registry/FSM/WAL/table-directory regions.
    assert!(after_len <= 100 * 4096 + 8 * 1024 * 1024);

    for i in 900..1000 {
        assert!(provider.read_block(&format!("row-{i}")).await.unwrap().is_some());
    }
}
