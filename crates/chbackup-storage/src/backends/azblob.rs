//! Azure Blob Storage backend

use super::store::ObjectStoreBackend;
use chbackup_core::AzureBlobConfig;
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::ObjectStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const KIND: &str = "AzureBlob";

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Builds the Azure Blob backend from an account key or SAS token.
pub fn backend(config: &AzureBlobConfig, cancel: CancellationToken) -> ObjectStoreBackend {
    if !config.sse_key.is_empty() {
        tracing::warn!("azblob.sse_key is set but customer-provided keys are not supported");
    }

    let config = config.clone();
    let path = config.path.clone();

    ObjectStoreBackend::new(KIND, path, move || {
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&config.account_name)
            .with_container_name(&config.container);

        if !config.account_key.is_empty() {
            builder = builder.with_access_key(&config.account_key);
        }
        if !config.sas.is_empty() {
            builder = builder.with_config(AzureConfigKey::SasKey, &config.sas);
        }
        if let Some(endpoint) = endpoint(&config) {
            builder = builder.with_endpoint(endpoint);
        }

        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);
        Ok(store)
    })
    .with_cancellation(cancel)
}

/// Explicit endpoint, only needed for non-public clouds
fn endpoint(config: &AzureBlobConfig) -> Option<String> {
    let suffix = config.endpoint_suffix.trim_matches('.');
    if suffix.is_empty() || suffix == DEFAULT_ENDPOINT_SUFFIX {
        return None;
    }
    Some(format!("https://{}.blob.{}", config.account_name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_for_sovereign_cloud() {
        let mut config = AzureBlobConfig {
            account_name: "backups".to_string(),
            ..Default::default()
        };
        assert_eq!(endpoint(&config), None);

        config.endpoint_suffix = "core.chinacloudapi.cn".to_string();
        assert_eq!(
            endpoint(&config).as_deref(),
            Some("https://backups.blob.core.chinacloudapi.cn")
        );
    }
}
