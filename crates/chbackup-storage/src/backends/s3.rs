//! S3 backend
//!
//! Supports AWS S3 and S3-compatible storage (MinIO, Wasabi, Ceph RGW).
//! Uploads larger than one part go through multipart upload.

use crate::chunked::{upload_chunked, CompletedPart, MultipartSink};
use crate::error::{Result, StorageError};
use crate::file::RemoteFile;
use crate::path::{list_prefix, object_key, relative_name};
use crate::traits::{RemoteReader, RemoteStorage, WalkVisitor};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as S3CompletedPart, ObjectCannedAcl,
    ServerSideEncryption, StorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chbackup_core::S3Config;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const KIND: &str = "S3";

/// S3 backend
pub struct S3Backend {
    config: S3Config,
    client: Option<Client>,
    cancel: CancellationToken,
}

impl S3Backend {
    pub fn new(config: S3Config, cancel: CancellationToken) -> Self {
        Self {
            config,
            client: None,
            cancel,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or(StorageError::NotConnected)
    }

    fn key(&self, key: &str) -> String {
        object_key(&self.config.path, key)
    }

    /// Endpoint URL with a scheme, chosen by `disable_ssl` when missing
    fn endpoint_url(&self) -> Option<String> {
        let endpoint = self.config.endpoint.trim();
        if endpoint.is_empty() {
            return None;
        }
        if endpoint.contains("://") {
            return Some(endpoint.to_string());
        }
        let scheme = if self.config.disable_ssl { "http" } else { "https" };
        Some(format!("{}://{}", scheme, endpoint))
    }

    async fn create_client(&self) -> Client {
        let region = Region::new(self.config.region.clone());
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

        if !self.config.access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                self.config.access_key.clone(),
                self.config.secret_key.clone(),
                None,
                None,
                "chbackup-config",
            ));
        }

        let sdk_config = loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.config.force_path_style);

        if let Some(endpoint_url) = self.endpoint_url() {
            debug!("Using custom S3 endpoint: {}", endpoint_url);
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        Client::from_conf(s3_config_builder.build())
    }

    fn sink(&self, client: &Client, key: String) -> S3Sink {
        let acl = (!self.config.acl.is_empty())
            .then(|| ObjectCannedAcl::from(self.config.acl.as_str()));
        let sse = (!self.config.sse.is_empty())
            .then(|| ServerSideEncryption::from(self.config.sse.as_str()));
        let storage_class = StorageClass::from(self.config.storage_class.to_uppercase().as_str());

        S3Sink {
            client: client.clone(),
            bucket: self.config.bucket.clone(),
            key,
            acl,
            sse,
            storage_class,
        }
    }
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.config.bucket)
            .field("path", &self.config.path)
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

fn to_utc(ts: Option<&S3DateTime>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

/// Providers differ in the error code they send with a 404
fn is_status_404<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response().is_some_and(|r| r.status().as_u16() == 404)
}

#[async_trait]
impl RemoteStorage for S3Backend {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            debug!("S3 backend already connected");
            return Ok(());
        }

        if self.config.disable_cert_verification {
            warn!("disable_cert_verification is set but not supported, certificates are verified");
        }

        let client = self.create_client().await;
        client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| StorageError::connection(KIND, e))?;

        info!("Connected to S3 bucket {}", self.config.bucket);
        self.client = Some(client);
        Ok(())
    }

    async fn stat_file(&self, key: &str) -> Result<RemoteFile> {
        let client = self.client()?;
        let full_key = self.key(key);
        debug!("Stat s3://{}/{}", self.config.bucket, full_key);

        let resp = client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_not_found()) || is_status_404(&e) {
                    StorageError::not_found(key)
                } else {
                    StorageError::provider(KIND, e)
                }
            })?;

        Ok(RemoteFile::file(
            key,
            resp.content_length().unwrap_or(0).max(0) as u64,
            to_utc(resp.last_modified()),
        ))
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let client = self.client()?;
        let full_key = self.key(key);
        debug!("Deleting s3://{}/{}", self.config.bucket, full_key);

        client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                if is_status_404(&e) {
                    StorageError::not_found(key)
                } else {
                    StorageError::provider(KIND, e)
                }
            })?;
        Ok(())
    }

    async fn walk(
        &self,
        prefix: &str,
        recursive: bool,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<()> {
        let client = self.client()?;
        let list_prefix = list_prefix(&self.key(prefix));
        let delimiter = (!recursive).then(|| "/".to_string());
        debug!(
            "Listing s3://{}/{} (recursive: {})",
            self.config.bucket, list_prefix, recursive
        );

        let mut continuation_token: Option<String> = None;
        loop {
            let resp = client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(&list_prefix)
                .set_delimiter(delimiter.clone())
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StorageError::provider(KIND, e))?;

            for common in resp.common_prefixes() {
                if let Some(dir) = common.prefix() {
                    visit(RemoteFile::dir(relative_name(dir, &list_prefix)))?;
                }
            }

            for object in resp.contents() {
                let Some(key) = object.key() else { continue };
                let name = relative_name(key, &list_prefix);
                // Skip the prefix itself and directory markers
                if name.is_empty() || name.ends_with('/') {
                    continue;
                }
                visit(RemoteFile::file(
                    name,
                    object.size().unwrap_or(0).max(0) as u64,
                    to_utc(object.last_modified()),
                ))?;
            }

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn get_file_reader(&self, key: &str) -> Result<RemoteReader> {
        let client = self.client()?;
        let full_key = self.key(key);
        debug!("Downloading s3://{}/{}", self.config.bucket, full_key);

        let resp = client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) || is_status_404(&e) {
                    StorageError::not_found(key)
                } else {
                    StorageError::provider(KIND, e)
                }
            })?;

        Ok(Box::pin(resp.body.into_async_read()))
    }

    async fn put_file(&self, key: &str, reader: RemoteReader) -> Result<()> {
        let client = self.client()?;
        let full_key = self.key(key);
        let sink = self.sink(client, full_key.clone());

        let size = upload_chunked(
            sink,
            reader,
            self.config.part_size as usize,
            self.config.concurrency,
            &self.cancel,
        )
        .await?;

        info!(
            "Uploaded {} bytes to s3://{}/{}",
            size, self.config.bucket, full_key
        );
        Ok(())
    }
}

/// Upload target for one S3 object
#[derive(Clone)]
struct S3Sink {
    client: Client,
    bucket: String,
    key: String,
    acl: Option<ObjectCannedAcl>,
    sse: Option<ServerSideEncryption>,
    storage_class: StorageClass,
}

#[async_trait]
impl MultipartSink for S3Sink {
    async fn put_single(&self, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .set_acl(self.acl.clone())
            .set_server_side_encryption(self.sse.clone())
            .storage_class(self.storage_class.clone())
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::provider(KIND, e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<String> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .set_acl(self.acl.clone())
            .set_server_side_encryption(self.sse.clone())
            .storage_class(self.storage_class.clone())
            .send()
            .await
            .map_err(|e| StorageError::provider(KIND, e))?;

        resp.upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::provider(KIND, "multipart upload started without an id"))
    }

    async fn upload_part(&self, upload_id: &str, number: i32, body: Bytes) -> Result<CompletedPart> {
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::provider(KIND, e))?;

        Ok(CompletedPart {
            number,
            etag: resp.e_tag().unwrap_or_default().to_string(),
        })
    }

    async fn complete(&self, upload_id: &str, parts: Vec<CompletedPart>) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::provider(KIND, e))?;
        Ok(())
    }

    async fn abort(&self, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StorageError::provider(KIND, e))?;
        Ok(())
    }
}
