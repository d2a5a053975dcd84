//! Backup destination round trips over an in-memory object store

use async_trait::async_trait;
use chbackup_core::Config;
use chbackup_storage::{
    BackupDestination, ObjectStoreBackend, RemoteFile, RemoteReader, RemoteStorage, StorageError,
    WalkVisitor,
};
use object_store::memory::InMemory;
use std::fs;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

fn config(format: &str, max_file_size: u64) -> Config {
    let mut config = Config::default();
    config.general.remote_storage = "gcs".to_string();
    config.general.disable_progress_bar = true;
    config.general.max_file_size = max_file_size;
    config.gcs.compression_format = format.to_string();
    config
}

async fn destination(store: Arc<InMemory>, config: &Config) -> BackupDestination {
    let backend = ObjectStoreBackend::with_store("GCS", "backups", store).with_part_size(64);
    let mut dest = BackupDestination::from_backend(Box::new(backend), config).unwrap();
    dest.connect().await.unwrap();
    dest
}

fn create_shadow_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let part = dir.path().join("default").join("events").join("all_1_1_0");
    fs::create_dir_all(&part).unwrap();
    fs::write(part.join("columns.txt"), "columns format version: 1\n").unwrap();
    fs::write(part.join("data.bin"), vec![7u8; 300]).unwrap();
    fs::write(dir.path().join("default").join("schema.sql"), "CREATE TABLE events").unwrap();
    dir
}

fn assert_same_tree(source: &Path, restored: &Path) {
    for rel in [
        "default/events/all_1_1_0/columns.txt",
        "default/events/all_1_1_0/data.bin",
        "default/schema.sql",
    ] {
        assert_eq!(
            fs::read(source.join(rel)).unwrap(),
            fs::read(restored.join(rel)).unwrap(),
            "{} differs",
            rel
        );
    }
}

#[tokio::test]
async fn test_archive_round_trip() {
    let config = config("gzip", 1 << 40);
    let dest = destination(Arc::new(InMemory::new()), &config).await;
    let source = create_shadow_dir();

    let summary = dest
        .upload_archive(source.path(), &[], "daily")
        .await
        .unwrap();
    assert_eq!(summary.keys, vec!["daily.tar.gz"]);
    assert_eq!(summary.file_count, 3);

    let stat = dest.stat_file("daily.tar.gz").await.unwrap();
    assert!(stat.size() > 0);

    let backups = dest.list_backups().await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].name, "daily");

    let restored = TempDir::new().unwrap();
    let stats = dest.download_archive("daily", restored.path()).await.unwrap();
    assert_eq!(stats.total_size_bytes, summary.source_bytes);
    assert_same_tree(source.path(), restored.path());
}

#[tokio::test]
async fn test_split_archives_share_a_directory() {
    // Every file ends up in its own archive
    let config = config("tar", 100);
    let dest = destination(Arc::new(InMemory::new()), &config).await;
    let source = create_shadow_dir();

    let summary = dest
        .upload_archive(source.path(), &[], "weekly")
        .await
        .unwrap();
    assert_eq!(
        summary.keys,
        vec![
            "weekly/part_1.tar",
            "weekly/part_2.tar",
            "weekly/part_3.tar"
        ]
    );

    let backups = dest.list_backups().await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].name, "weekly");

    let restored = TempDir::new().unwrap();
    dest.download_archive("weekly", restored.path()).await.unwrap();
    assert_same_tree(source.path(), restored.path());

    assert_eq!(dest.remove_backup("weekly").await.unwrap(), 3);
    assert!(dest.list_backups().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_raw_format_uploads_files_individually() {
    let config = config("none", 1 << 40);
    let dest = destination(Arc::new(InMemory::new()), &config).await;
    let source = create_shadow_dir();

    let summary = dest.upload_archive(source.path(), &[], "raw").await.unwrap();
    assert!(summary
        .keys
        .contains(&"raw/default/events/all_1_1_0/data.bin".to_string()));

    let restored = TempDir::new().unwrap();
    dest.download_archive("raw", restored.path()).await.unwrap();
    assert_same_tree(source.path(), restored.path());
}

#[tokio::test]
async fn test_selected_files_only() {
    let config = config("lz4", 1 << 40);
    let dest = destination(Arc::new(InMemory::new()), &config).await;
    let source = create_shadow_dir();

    let summary = dest
        .upload_archive(
            source.path(),
            &["default/schema.sql".into()],
            "schema-only",
        )
        .await
        .unwrap();
    assert_eq!(summary.file_count, 1);

    let restored = TempDir::new().unwrap();
    dest.download_archive("schema-only.tar.lz4", restored.path())
        .await
        .unwrap();
    assert!(restored.path().join("default/schema.sql").exists());
    assert!(!restored.path().join("default/events").exists());
}

#[tokio::test]
async fn test_retention_keeps_newest() {
    let config = config("tar", 1 << 40);
    let dest = destination(Arc::new(InMemory::new()), &config).await;
    let source = create_shadow_dir();

    for name in ["a-first", "b-second", "c-third"] {
        dest.upload_archive(source.path(), &[], name).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert!(dest.remove_old_backups(0).await.unwrap().is_empty());

    let removed = dest.remove_old_backups(1).await.unwrap();
    assert_eq!(removed, vec!["a-first", "b-second"]);

    let left: Vec<String> = dest
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(left, vec!["c-third"]);
}

#[tokio::test]
async fn test_missing_backup_is_not_found() {
    let config = config("tar", 1 << 40);
    let dest = destination(Arc::new(InMemory::new()), &config).await;
    let restored = TempDir::new().unwrap();

    let err = dest
        .download_archive("never-uploaded", restored.path())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(dest.remove_backup("never-uploaded").await.unwrap(), 0);
}

#[tokio::test]
async fn test_metadata_blob_round_trip() {
    let config = config("tar", 1 << 40);
    let store = Arc::new(InMemory::new());
    let dest = destination(Arc::clone(&store), &config).await;

    let metadata = br#"{"table":"events","parts":["all_1_1_0"]}"#.to_vec();
    dest.put_metadata("daily/metadata.json", metadata.clone())
        .await
        .unwrap();
    assert_eq!(dest.get_metadata("daily/metadata.json").await.unwrap(), metadata);

    let err = dest.get_metadata("daily/missing.json").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[test]
fn test_unknown_selector_is_rejected() {
    let mut config = Config::default();
    config.general.remote_storage = "tape".to_string();

    let err = BackupDestination::new(&config).unwrap_err();
    assert!(matches!(err, StorageError::Config(_)));
}

/// Body that never yields a byte, like a connection that went quiet
struct StalledBody;

impl AsyncRead for StalledBody {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

/// Storage whose every object body stalls forever
struct StalledStorage;

#[async_trait]
impl RemoteStorage for StalledStorage {
    fn kind(&self) -> &'static str {
        "stalled"
    }

    async fn connect(&mut self) -> chbackup_storage::Result<()> {
        Ok(())
    }

    async fn stat_file(&self, key: &str) -> chbackup_storage::Result<RemoteFile> {
        Ok(RemoteFile::file(key, 1 << 30, None))
    }

    async fn delete_file(&self, _key: &str) -> chbackup_storage::Result<()> {
        Ok(())
    }

    async fn walk(
        &self,
        _prefix: &str,
        _recursive: bool,
        visit: &mut WalkVisitor<'_>,
    ) -> chbackup_storage::Result<()> {
        visit(RemoteFile::file("data.bin", 1 << 30, None))
    }

    async fn get_file_reader(&self, _key: &str) -> chbackup_storage::Result<RemoteReader> {
        Ok(Box::pin(StalledBody))
    }

    async fn put_file(&self, _key: &str, _reader: RemoteReader) -> chbackup_storage::Result<()> {
        Ok(())
    }
}

async fn download_until_cancelled(format: &str, name: &str) -> StorageError {
    let cancel = CancellationToken::new();
    let dest = BackupDestination::from_backend_with_cancellation(
        Box::new(StalledStorage),
        &config(format, 1 << 40),
        cancel.clone(),
    )
    .unwrap();
    let restored = TempDir::new().unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    tokio::time::timeout(
        Duration::from_secs(10),
        dest.download_archive(name, restored.path()),
    )
    .await
    .expect("download kept running after cancellation")
    .unwrap_err()
}

#[tokio::test]
async fn test_cancel_stops_running_archive_download() {
    let err = download_until_cancelled("tar", "stuck.tar").await;
    assert!(matches!(err, StorageError::Cancelled), "{:?}", err);
}

#[tokio::test]
async fn test_cancel_stops_running_raw_download() {
    let err = download_until_cancelled("none", "stuck").await;
    assert!(matches!(err, StorageError::Cancelled), "{:?}", err);
}
