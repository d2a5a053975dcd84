//! Backup destination facade.
//!
//! [`BackupDestination`] owns the backend selected by configuration and adds
//! the backup-level operations on top of the raw capability trait: packing a
//! local directory into archives on the way up, unpacking on the way down,
//! listing backups and applying remote retention.
//!
//! Remote layout for a backup named `daily`:
//!
//! - one archive: `daily.<ext>`
//! - split by `general.max_file_size`: `daily/part_1.<ext>`, `daily/part_2.<ext>`, ...
//! - format `none`: every file as-is below `daily/`

use crate::backends::create_backend;
use crate::cancel::CancellableReader;
use crate::error::{Result, StorageError};
use crate::file::RemoteFile;
use crate::path::join_path;
use crate::traits::{RemoteReader, RemoteStorage, WalkVisitor};
use bytes::Bytes;
use chbackup_archive::{
    collect_files, group_by_size, pack_files, pipe, unpack_archive, ArchiveFormat,
    ProgressReader, SourceFile, TransferProgress, UnpackStats,
};
use chbackup_core::{Config, ConfigError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A backup found on remote storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    /// Backup name without archive extension
    pub name: String,
    /// Stored bytes, summed over every object of the backup
    pub size: u64,
    /// Newest modification time among the backup's objects
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of an archive upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Remote keys written, in upload order
    pub keys: Vec<String>,
    /// Local files included
    pub file_count: usize,
    /// Uncompressed bytes read from disk
    pub source_bytes: u64,
}

/// Facade over the configured remote storage backend
pub struct BackupDestination {
    storage: Box<dyn RemoteStorage>,
    format: ArchiveFormat,
    level: u32,
    max_file_size: u64,
    show_progress: bool,
    cancel: CancellationToken,
}

impl BackupDestination {
    /// Creates the destination for `general.remote_storage`.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Like [`new`](Self::new), with an external cancellation signal that is
    /// passed down to the backend's upload loops.
    pub fn with_cancellation(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let storage = create_backend(config, cancel.clone())?;
        Self::from_parts(storage, config, cancel)
    }

    /// Wraps an already constructed backend.
    pub fn from_backend(storage: Box<dyn RemoteStorage>, config: &Config) -> Result<Self> {
        Self::from_parts(storage, config, CancellationToken::new())
    }

    /// Wraps an already constructed backend; transfers stop once `cancel`
    /// fires.
    pub fn from_backend_with_cancellation(
        storage: Box<dyn RemoteStorage>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Self::from_parts(storage, config, cancel)
    }

    fn from_parts(
        storage: Box<dyn RemoteStorage>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let format = config.archive_format().ok_or_else(|| {
            ConfigError::UnsupportedCompressionFormat {
                format: config.compression_format().to_string(),
            }
        })?;

        Ok(Self {
            storage,
            format,
            level: config.compression_level(),
            max_file_size: config.general.max_file_size,
            show_progress: !config.general.disable_progress_bar,
            cancel,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.storage.kind()
    }

    /// Archive format used for uploads
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.storage.connect().await
    }

    pub async fn stat_file(&self, key: &str) -> Result<RemoteFile> {
        self.storage.stat_file(key).await
    }

    pub async fn delete_file(&self, key: &str) -> Result<()> {
        self.storage.delete_file(key).await
    }

    pub async fn walk(
        &self,
        prefix: &str,
        recursive: bool,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<()> {
        self.storage.walk(prefix, recursive, visit).await
    }

    pub async fn get_file_reader(&self, key: &str) -> Result<RemoteReader> {
        self.storage.get_file_reader(key).await
    }

    pub async fn put_file(&self, key: &str, reader: RemoteReader) -> Result<()> {
        self.storage.put_file(key, reader).await
    }

    fn progress(&self, message: &str, total: Option<u64>) -> TransferProgress {
        if self.show_progress {
            TransferProgress::new(message, total)
        } else {
            TransferProgress::hidden()
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Reports a failure caused by cancellation as [`StorageError::Cancelled`].
    fn cancelled_or(&self, err: StorageError) -> StorageError {
        if self.cancel.is_cancelled() {
            StorageError::Cancelled
        } else {
            err
        }
    }

    /// Wraps a transfer stream so it fails as soon as cancellation fires.
    fn guard<R>(&self, reader: R) -> CancellableReader<R> {
        CancellableReader::new(reader, self.cancel.clone())
    }

    /// Collects the entries of a walk below `prefix`.
    async fn collect(&self, prefix: &str, recursive: bool) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        self.storage
            .walk(prefix, recursive, &mut |file| {
                files.push(file);
                Ok(())
            })
            .await?;
        Ok(files)
    }

    /// Packs `files` below `local_dir` and uploads them as backup `name`.
    ///
    /// An empty `files` uploads the whole directory. Files are grouped so
    /// that no archive holds more than `general.max_file_size` bytes of
    /// input.
    pub async fn upload_archive(
        &self,
        local_dir: &Path,
        files: &[PathBuf],
        name: &str,
    ) -> Result<UploadSummary> {
        let sources = select_sources(local_dir, files).await?;
        let mut summary = UploadSummary {
            file_count: sources.len(),
            source_bytes: sources.iter().map(|f| f.size).sum(),
            ..Default::default()
        };

        if !self.format.is_archive() {
            for source in &sources {
                self.check_cancelled()?;
                let key = join_path(&[name, &slash_path(&source.path)]);
                self.upload_file(&local_dir.join(&source.path), &key).await?;
                summary.keys.push(key);
            }
            info!("Uploaded {} files to {} as {}", sources.len(), self.kind(), name);
            return Ok(summary);
        }

        let mut groups = group_by_size(&sources, self.max_file_size);
        if groups.is_empty() {
            // An empty directory still becomes one (empty) archive
            groups.push(Vec::new());
        }
        let split = groups.len() > 1;
        for (index, group) in groups.into_iter().enumerate() {
            self.check_cancelled()?;
            let key = if split {
                let part = self.format.file_name(&format!("part_{}", index + 1));
                join_path(&[name, &part])
            } else {
                self.format.file_name(name)
            };
            let paths: Vec<PathBuf> = group.into_iter().map(|f| f.path).collect();
            self.upload_group(local_dir, paths, &key).await?;
            summary.keys.push(key);
        }

        info!(
            "Uploaded backup {} to {} in {} archive(s)",
            name,
            self.kind(),
            summary.keys.len()
        );
        Ok(summary)
    }

    async fn upload_group(&self, local_dir: &Path, files: Vec<PathBuf>, key: &str) -> Result<()> {
        let (writer, reader) = pipe::bounded(pipe::DEFAULT_CAPACITY);
        let format = self.format;
        let level = self.level;
        let dir = local_dir.to_path_buf();
        let count = files.len();

        let packer = tokio::task::spawn_blocking(move || {
            let (stats, writer) = pack_files(&dir, &files, format, level, writer)?;
            writer.finish()?;
            Ok::<_, chbackup_archive::ArchiveError>(stats)
        });

        let progress = self.progress(&format!("Uploading {}", key), None);
        let body: RemoteReader =
            Box::pin(self.guard(ProgressReader::new(reader, progress.clone())));
        let uploaded = self.storage.put_file(key, body).await;
        let packed = packer
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))?;

        match (packed, uploaded) {
            (Ok(stats), Ok(())) => {
                progress.finish_and_clear();
                debug!(
                    "Uploaded {} ({} files, {} source bytes, {} stored bytes)",
                    key,
                    stats.file_count,
                    stats.total_size_bytes,
                    progress.position()
                );
                Ok(())
            }
            // The upload side gave up first; its error is the cause
            (Err(pack_err), Err(upload_err)) if pack_err.is_broken_pipe() => {
                progress.finish_and_clear();
                Err(self.cancelled_or(upload_err))
            }
            (Err(pack_err), _) => {
                progress.finish_and_clear();
                warn!("Packing {} files for {} failed: {}", count, key, pack_err);
                Err(pack_err.into())
            }
            (Ok(_), Err(upload_err)) => {
                progress.finish_and_clear();
                Err(self.cancelled_or(upload_err))
            }
        }
    }

    /// Uploads one local file unchanged.
    pub async fn upload_file(&self, local_path: &Path, key: &str) -> Result<u64> {
        let file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();

        let progress = self.progress(&format!("Uploading {}", key), Some(size));
        let body: RemoteReader = Box::pin(self.guard(ProgressReader::new(file, progress.clone())));
        self.storage
            .put_file(key, body)
            .await
            .map_err(|e| self.cancelled_or(e))?;
        progress.finish_and_clear();

        debug!("Uploaded {:?} to {} ({} bytes)", local_path, key, size);
        Ok(size)
    }

    /// Downloads one object unchanged, creating parent directories.
    pub async fn download_file(&self, key: &str, local_path: &Path) -> Result<u64> {
        let reader = self.storage.get_file_reader(key).await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let progress = self.progress(&format!("Downloading {}", key), None);
        let mut reader = ProgressReader::new(reader, progress.clone());
        let mut file = tokio::fs::File::create(local_path).await?;
        let size = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                progress.finish_and_clear();
                return Err(StorageError::Cancelled);
            }
            copied = tokio::io::copy(&mut reader, &mut file) => copied?,
        };
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        progress.finish_and_clear();

        debug!("Downloaded {} to {:?} ({} bytes)", key, local_path, size);
        Ok(size)
    }

    /// Downloads backup `name` into `local_dir`, whichever layout it was
    /// stored with.
    pub async fn download_archive(&self, name: &str, local_dir: &Path) -> Result<UnpackStats> {
        if let Some(format) = ArchiveFormat::from_file_name(name) {
            return self.download_one(name, format, local_dir).await;
        }

        let single = self.format.file_name(name);
        if self.format.is_archive() {
            match self.storage.stat_file(&single).await {
                Ok(_) => return self.download_one(&single, self.format, local_dir).await,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let mut parts = self.collect(name, true).await?;
        if parts.is_empty() {
            return Err(StorageError::not_found(single));
        }
        parts.sort_by(|a, b| a.name().cmp(b.name()));

        let mut total = UnpackStats::default();
        for part in parts {
            self.check_cancelled()?;
            let key = join_path(&[name, part.name()]);
            match ArchiveFormat::from_file_name(part.name()) {
                Some(format) => {
                    let stats = self.download_one(&key, format, local_dir).await?;
                    total.entry_count += stats.entry_count;
                    total.total_size_bytes += stats.total_size_bytes;
                }
                None => {
                    let size = self.download_file(&key, &local_dir.join(part.name())).await?;
                    total.entry_count += 1;
                    total.total_size_bytes += size;
                }
            }
        }

        info!(
            "Downloaded backup {} ({} entries, {} bytes)",
            name, total.entry_count, total.total_size_bytes
        );
        Ok(total)
    }

    async fn download_one(
        &self,
        key: &str,
        format: ArchiveFormat,
        local_dir: &Path,
    ) -> Result<UnpackStats> {
        let reader = self.storage.get_file_reader(key).await?;
        let progress = self.progress(&format!("Downloading {}", key), None);
        let bridge = SyncIoBridge::new(self.guard(ProgressReader::new(reader, progress.clone())));
        let dest = local_dir.to_path_buf();

        // The guarded stream ends the blocking unpack once cancellation fires
        let mut unpack = tokio::task::spawn_blocking(move || unpack_archive(bridge, format, &dest));
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                // Wait for the unpack to observe the failed stream
                let _ = (&mut unpack).await;
                progress.finish_and_clear();
                return Err(StorageError::Cancelled);
            }
            joined = &mut unpack => joined,
        };
        progress.finish_and_clear();
        let stats = joined
            .map_err(|e| StorageError::Io(io::Error::other(e)))?
            .map_err(|e| self.cancelled_or(e.into()))?;

        debug!(
            "Extracted {} ({} entries) into {:?}",
            key, stats.entry_count, local_dir
        );
        Ok(stats)
    }

    /// Lists backups at the root of the remote path, oldest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        let mut backups = Vec::new();

        for entry in self.collect("", false).await? {
            if entry.is_dir() {
                let name = entry.name().trim_end_matches('/').to_string();
                let objects = self.collect(&name, true).await?;
                if objects.is_empty() {
                    continue;
                }
                backups.push(BackupEntry {
                    size: objects.iter().map(|o| o.size()).sum(),
                    last_modified: objects.iter().filter_map(|o| o.last_modified()).max(),
                    name,
                });
            } else if let Some(name) = backup_name(entry.name()) {
                backups.push(BackupEntry {
                    name: name.to_string(),
                    size: entry.size(),
                    last_modified: entry.last_modified(),
                });
            } else {
                debug!("Ignoring non-archive object {}", entry.name());
            }
        }

        backups.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(backups)
    }

    /// Deletes every object belonging to backup `name`.
    ///
    /// Returns the number of objects removed; a backup that does not exist
    /// removes nothing.
    pub async fn remove_backup(&self, name: &str) -> Result<usize> {
        let mut keys: Vec<String> = self
            .collect("", false)
            .await?
            .into_iter()
            .filter(|entry| !entry.is_dir() && backup_name(entry.name()) == Some(name))
            .map(|entry| entry.name().to_string())
            .collect();
        keys.extend(
            self.collect(name, true)
                .await?
                .into_iter()
                .map(|entry| join_path(&[name, entry.name()])),
        );

        let mut removed = 0;
        for key in keys {
            self.check_cancelled()?;
            match self.storage.delete_file(&key).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => debug!("{} already deleted", key),
                Err(e) => return Err(e),
            }
        }

        info!("Removed backup {} ({} objects)", name, removed);
        Ok(removed)
    }

    /// Removes all but the newest `keep` backups, returning the removed
    /// names. Zero keeps everything.
    pub async fn remove_old_backups(&self, keep: usize) -> Result<Vec<String>> {
        if keep == 0 {
            return Ok(Vec::new());
        }

        let backups = self.list_backups().await?;
        let excess = backups.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(excess);
        for backup in backups.into_iter().take(excess) {
            self.remove_backup(&backup.name).await?;
            removed.push(backup.name);
        }
        Ok(removed)
    }

    /// Stores an opaque metadata blob at `key`.
    pub async fn put_metadata(&self, key: &str, data: impl Into<Bytes>) -> Result<()> {
        let body: RemoteReader = Box::pin(io::Cursor::new(data.into()));
        self.storage.put_file(key, body).await
    }

    /// Reads the metadata blob at `key`.
    pub async fn get_metadata(&self, key: &str) -> Result<Vec<u8>> {
        let mut reader = self.storage.get_file_reader(key).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}

impl std::fmt::Debug for BackupDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupDestination")
            .field("kind", &self.storage.kind())
            .field("format", &self.format)
            .field("level", &self.level)
            .field("max_file_size", &self.max_file_size)
            .finish_non_exhaustive()
    }
}

/// Backup name of a root-level archive object, `None` for other objects.
fn backup_name(file_name: &str) -> Option<&str> {
    let format = ArchiveFormat::from_file_name(file_name)?;
    file_name
        .strip_suffix(format.extension())
        .and_then(|base| base.strip_suffix('.'))
        .filter(|base| !base.is_empty())
}

/// Forward-slash form of a relative local path
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn select_sources(local_dir: &Path, files: &[PathBuf]) -> Result<Vec<SourceFile>> {
    let dir = local_dir.to_path_buf();
    let all = tokio::task::spawn_blocking(move || collect_files(&dir))
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))??;
    if files.is_empty() {
        return Ok(all);
    }

    let mut selected = Vec::with_capacity(files.len());
    for path in files {
        match all.iter().find(|f| &f.path == path) {
            Some(file) => selected.push(file.clone()),
            None => {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} is not a file below {}", path.display(), local_dir.display()),
                )))
            }
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_name() {
        assert_eq!(backup_name("daily.tar"), Some("daily"));
        assert_eq!(backup_name("daily.tar.gz"), Some("daily"));
        assert_eq!(backup_name("2024-05-01T00-00-00.tar.lz4"), Some("2024-05-01T00-00-00"));
        assert_eq!(backup_name("metadata.json"), None);
        assert_eq!(backup_name(".tar"), None);
    }

    #[test]
    fn test_slash_path() {
        let path: PathBuf = ["store", "all_1_1_0", "data.bin"].iter().collect();
        assert_eq!(slash_path(&path), "store/all_1_1_0/data.bin");
    }
}
