//! Storage backend implementations and the factory selecting one.

pub mod azblob;
pub mod cos;
pub mod ftp;
pub mod gcs;
pub mod s3;
pub mod store;

pub use cos::CosBackend;
pub use ftp::FtpBackend;
pub use s3::S3Backend;
pub use store::ObjectStoreBackend;

use crate::error::Result;
use crate::traits::RemoteStorage;
use chbackup_core::{Config, ConfigError, RemoteStorageKind};
use tokio_util::sync::CancellationToken;

/// Builds the unconnected backend selected by `general.remote_storage`.
pub fn create_backend(
    config: &Config,
    cancel: CancellationToken,
) -> Result<Box<dyn RemoteStorage>> {
    let kind = config.remote_storage_kind().ok_or_else(|| {
        ConfigError::UnknownRemoteStorage(config.general.remote_storage.clone())
    })?;

    let backend: Box<dyn RemoteStorage> = match kind {
        RemoteStorageKind::S3 => Box::new(S3Backend::new(config.s3.clone(), cancel)),
        RemoteStorageKind::Gcs => Box::new(gcs::backend(&config.gcs, cancel)),
        RemoteStorageKind::Cos => Box::new(CosBackend::new(config.cos.clone(), cancel)),
        RemoteStorageKind::Ftp => Box::new(FtpBackend::new(config.ftp.clone(), cancel)),
        RemoteStorageKind::AzureBlob => Box::new(azblob::backend(&config.azblob, cancel)),
        RemoteStorageKind::None => {
            return Err(ConfigError::UnknownRemoteStorage(kind.as_str().to_string()).into())
        }
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;

    fn config(selector: &str) -> Config {
        let mut config = Config::default();
        config.general.remote_storage = selector.to_string();
        config
    }

    #[test]
    fn test_selects_backend_by_name() {
        for (selector, kind) in [
            ("s3", "S3"),
            ("gcs", "GCS"),
            ("cos", "COS"),
            ("ftp", "FTP"),
            ("azblob", "AzureBlob"),
        ] {
            let backend = create_backend(&config(selector), CancellationToken::new()).unwrap();
            assert_eq!(backend.kind(), kind, "selector {}", selector);
        }
    }

    #[test]
    fn test_none_and_unknown_are_rejected() {
        for selector in ["none", "dropbox"] {
            let err = create_backend(&config(selector), CancellationToken::new()).err().unwrap();
            assert!(
                matches!(
                    err,
                    StorageError::Config(ConfigError::UnknownRemoteStorage(_))
                ),
                "selector {}",
                selector
            );
        }
    }
}
