//! Remote storage capability trait

use crate::error::Result;
use crate::file::RemoteFile;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Single-pass byte stream of an object body.
///
/// Dropping the reader releases the underlying connection or request.
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Callback invoked for every entry of a walk. Returning an error stops
/// the walk and the error is returned from [`RemoteStorage::walk`].
pub type WalkVisitor<'a> = dyn FnMut(RemoteFile) -> Result<()> + Send + 'a;

/// Operations every remote storage backend implements.
///
/// Keys are resolved against the backend's configured path prefix. Every
/// operation other than [`kind`](RemoteStorage::kind) and
/// [`connect`](RemoteStorage::connect) fails with `NotConnected` until
/// `connect` has succeeded.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Stable provider identifier for logs
    fn kind(&self) -> &'static str;

    /// Creates the provider client and performs one liveness check.
    ///
    /// Calling it again on a connected backend does nothing.
    async fn connect(&mut self) -> Result<()>;

    /// Size and modification time of `key`, without reading its body.
    ///
    /// Returns the not-found error when the object does not exist.
    async fn stat_file(&self, key: &str) -> Result<RemoteFile>;

    /// Deletes `key`. A missing object is either success or not-found.
    async fn delete_file(&self, key: &str) -> Result<()>;

    /// Enumerates objects below `prefix`.
    ///
    /// Non-recursive walks stop at the next `/` and report each immediate
    /// sub-directory as a directory entry. Recursive walks report every
    /// object and no directories. A prefix with nothing under it is an
    /// empty, successful walk.
    async fn walk(
        &self,
        prefix: &str,
        recursive: bool,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<()>;

    /// Opens the body of `key` for streaming.
    async fn get_file_reader(&self, key: &str) -> Result<RemoteReader>;

    /// Uploads `reader` to `key`, chunking internally when the body is large.
    async fn put_file(&self, key: &str, reader: RemoteReader) -> Result<()>;
}
