//! Remote storage for chbackup
//!
//! This crate provides:
//! - The [`RemoteStorage`] capability trait and the [`RemoteFile`] descriptor
//! - Backends for S3, GCS, Azure Blob, Tencent COS and FTP
//! - A shared not-found error ([`StorageError::NotFound`]) every backend maps onto
//! - The [`BackupDestination`] facade that packs, uploads, lists and prunes backups

pub mod backends;
pub mod cancel;
pub mod chunked;
pub mod destination;
pub mod error;
pub mod file;
pub mod path;
pub mod traits;

pub use backends::{create_backend, CosBackend, FtpBackend, ObjectStoreBackend, S3Backend};
pub use destination::{BackupDestination, BackupEntry, UploadSummary};
pub use error::{Result, StorageError};
pub use file::RemoteFile;
pub use traits::{RemoteReader, RemoteStorage, WalkVisitor};
