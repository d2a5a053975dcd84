//! Backend over any [`ObjectStore`] implementation.
//!
//! GCS and Azure Blob share this adapter; they differ only in how the store
//! is built. Tests run it against `object_store::memory::InMemory`.

use crate::chunked::read_part;
use crate::error::{Result, StorageError};
use crate::file::RemoteFile;
use crate::path::{list_prefix, object_key, relative_name};
use crate::traits::{RemoteReader, RemoteStorage, WalkVisitor};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutPayload, WriteMultipart};
use std::io;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default multipart chunk size
pub const DEFAULT_PART_SIZE: usize = 16 * 1024 * 1024;

/// Default number of parts uploaded in parallel
pub const DEFAULT_CONCURRENCY: usize = 4;

type StoreFactory = Box<dyn Fn() -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync>;

/// Backend delegating to an [`ObjectStore`]
pub struct ObjectStoreBackend {
    kind: &'static str,
    factory: StoreFactory,
    store: Option<Arc<dyn ObjectStore>>,
    base_path: String,
    part_size: usize,
    concurrency: usize,
    cancel: CancellationToken,
}

impl ObjectStoreBackend {
    /// Creates a backend whose store is built by `factory` on connect.
    pub fn new<F>(kind: &'static str, base_path: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync + 'static,
    {
        Self {
            kind,
            factory: Box::new(factory),
            store: None,
            base_path: base_path.into(),
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a backend over an existing store.
    pub fn with_store(
        kind: &'static str,
        base_path: impl Into<String>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self::new(kind, base_path, move || Ok(Arc::clone(&store)))
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn store(&self) -> Result<&Arc<dyn ObjectStore>> {
        self.store.as_ref().ok_or(StorageError::NotConnected)
    }

    fn object_path(&self, key: &str) -> Result<ObjectPath> {
        let full = object_key(&self.base_path, key);
        ObjectPath::parse(&full).map_err(|_| StorageError::InvalidPath(full))
    }

    /// Listing root, `None` for the whole store
    fn list_root(&self, prefix: &str) -> Result<Option<ObjectPath>> {
        let full = object_key(&self.base_path, prefix);
        if full.is_empty() {
            return Ok(None);
        }
        ObjectPath::parse(&full)
            .map(Some)
            .map_err(|_| StorageError::InvalidPath(full))
    }

    fn map_error(&self, key: &str, err: object_store::Error) -> StorageError {
        match err {
            object_store::Error::NotFound { .. } => StorageError::not_found(key),
            other => StorageError::provider(self.kind, other),
        }
    }

    fn file_from_meta(name: &str, meta: &ObjectMeta) -> RemoteFile {
        RemoteFile::file(name, meta.size as u64, Some(meta.last_modified))
    }

    async fn put_multipart(
        &self,
        store: &Arc<dyn ObjectStore>,
        path: &ObjectPath,
        first: Bytes,
        reader: RemoteReader,
    ) -> Result<u64> {
        let upload = store
            .put_multipart(path)
            .await
            .map_err(|e| StorageError::provider(self.kind, e))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.part_size);

        match self.feed_parts(&mut writer, first, reader).await {
            Ok(total) => {
                writer
                    .finish()
                    .await
                    .map_err(|e| StorageError::provider(self.kind, e))?;
                Ok(total)
            }
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    warn!("Failed to abort multipart upload to {}: {}", path, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn feed_parts(
        &self,
        writer: &mut WriteMultipart,
        first: Bytes,
        mut reader: RemoteReader,
    ) -> Result<u64> {
        let mut total = 0u64;
        let mut part = first;

        while !part.is_empty() {
            total += part.len() as u64;
            writer.put(part);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StorageError::Cancelled),
                ready = writer.wait_for_capacity(self.concurrency) => {
                    ready.map_err(|e| StorageError::provider(self.kind, e))?
                }
            }

            part = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StorageError::Cancelled),
                next = read_part(&mut reader, self.part_size) => next?,
            };
        }
        Ok(total)
    }
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("kind", &self.kind)
            .field("base_path", &self.base_path)
            .field("connected", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteStorage for ObjectStoreBackend {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn connect(&mut self) -> Result<()> {
        if self.store.is_some() {
            debug!("{} backend already connected", self.kind);
            return Ok(());
        }

        let store = (self.factory)().map_err(|e| StorageError::connection(self.kind, e))?;
        let root = self.list_root("")?;
        store
            .list_with_delimiter(root.as_ref())
            .await
            .map_err(|e| StorageError::connection(self.kind, e))?;

        info!("Connected to {} at {}", self.kind, store);
        self.store = Some(store);
        Ok(())
    }

    async fn stat_file(&self, key: &str) -> Result<RemoteFile> {
        let store = self.store()?;
        let path = self.object_path(key)?;
        let meta = store.head(&path).await.map_err(|e| self.map_error(key, e))?;
        Ok(Self::file_from_meta(key, &meta))
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let store = self.store()?;
        let path = self.object_path(key)?;
        debug!("Deleting {} object {}", self.kind, path);
        store.delete(&path).await.map_err(|e| self.map_error(key, e))
    }

    async fn walk(
        &self,
        prefix: &str,
        recursive: bool,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<()> {
        let store = self.store()?;
        let root = self.list_root(prefix)?;
        let strip = list_prefix(root.as_ref().map_or("", |p| p.as_ref()));

        if recursive {
            let mut objects = store.list(root.as_ref());
            while let Some(meta) = objects
                .try_next()
                .await
                .map_err(|e| StorageError::provider(self.kind, e))?
            {
                let name = relative_name(meta.location.as_ref(), &strip);
                visit(Self::file_from_meta(name, &meta))?;
            }
            return Ok(());
        }

        let listing = store
            .list_with_delimiter(root.as_ref())
            .await
            .map_err(|e| StorageError::provider(self.kind, e))?;

        for dir in &listing.common_prefixes {
            visit(RemoteFile::dir(relative_name(dir.as_ref(), &strip)))?;
        }
        for meta in &listing.objects {
            let name = relative_name(meta.location.as_ref(), &strip);
            visit(Self::file_from_meta(name, meta))?;
        }
        Ok(())
    }

    async fn get_file_reader(&self, key: &str) -> Result<RemoteReader> {
        let store = self.store()?;
        let path = self.object_path(key)?;
        debug!("Downloading {} object {}", self.kind, path);

        let result = store.get(&path).await.map_err(|e| self.map_error(key, e))?;
        let body = result.into_stream().map_err(io::Error::other).boxed();
        Ok(Box::pin(StreamReader::new(body)))
    }

    async fn put_file(&self, key: &str, mut reader: RemoteReader) -> Result<()> {
        let store = self.store()?;
        let path = self.object_path(key)?;

        let first = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StorageError::Cancelled),
            part = read_part(&mut reader, self.part_size) => part?,
        };

        let size = if first.len() < self.part_size {
            let size = first.len() as u64;
            store
                .put(&path, PutPayload::from(first))
                .await
                .map_err(|e| StorageError::provider(self.kind, e))?;
            size
        } else {
            self.put_multipart(store, &path, first, reader).await?
        };

        info!("Uploaded {} bytes to {} object {}", size, self.kind, path);
        Ok(())
    }
}
