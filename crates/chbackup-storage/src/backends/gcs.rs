//! Google Cloud Storage backend

use super::store::ObjectStoreBackend;
use chbackup_core::GcsConfig;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::ObjectStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const KIND: &str = "GCS";

/// Builds the GCS backend; credentials come from the file or inline JSON,
/// falling back to the `GOOGLE_*` environment.
pub fn backend(config: &GcsConfig, cancel: CancellationToken) -> ObjectStoreBackend {
    let config = config.clone();
    let path = config.path.clone();

    ObjectStoreBackend::new(KIND, path, move || {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);
        if !config.credentials_file.is_empty() {
            builder = builder.with_service_account_path(&config.credentials_file);
        }
        if !config.credentials_json.is_empty() {
            builder = builder.with_service_account_key(&config.credentials_json);
        }
        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);
        Ok(store)
    })
    .with_cancellation(cancel)
}
