//! Tencent Cloud Object Storage backend over the COS XML API.
//!
//! Requests are signed with [`Signer`] and sent with reqwest. Stat uses
//! `HEAD` and reads `Last-Modified`; listings follow `NextMarker` until the
//! bucket reports no more pages.

mod signer;
mod types;

pub use signer::{query_string, SignRequest, Signer};

use crate::chunked::{upload_chunked, CompletedPart, MultipartSink};
use crate::error::{Result, StorageError};
use crate::file::RemoteFile;
use crate::path::{list_prefix, object_key, relative_name};
use crate::traits::{RemoteReader, RemoteStorage, WalkVisitor};
use async_trait::async_trait;
use bytes::Bytes;
use chbackup_core::time::{parse_duration, parse_timestamp};
use chbackup_core::{ConfigError, CosConfig};
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, ETAG, HOST, LAST_MODIFIED};
use reqwest::{Method, Response, StatusCode};
use std::io;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use types::{
    CompleteMultipartUpload, CompletePart, CosApiError, ErrorBody, InitiateMultipartUploadResult,
    ListBucketResult,
};
use url::Url;

pub const KIND: &str = "COS";

/// Parts uploaded in parallel
const UPLOAD_CONCURRENCY: usize = 2;

/// Signature validity when no request timeout is configured
const DEFAULT_SIGN_EXPIRY: Duration = Duration::from_secs(3600);

const MAX_KEYS: &str = "1000";

/// Tencent COS backend
pub struct CosBackend {
    config: CosConfig,
    client: Option<CosClient>,
    cancel: CancellationToken,
}

impl CosBackend {
    pub fn new(config: CosConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            client: None,
            cancel,
        }
    }

    fn client(&self) -> Result<&CosClient> {
        self.client.as_ref().ok_or(StorageError::NotConnected)
    }

    fn key(&self, key: &str) -> String {
        object_key(&self.config.path, key)
    }

    fn create_client(&self) -> Result<CosClient> {
        let timeout = parse_duration(&self.config.timeout).map_err(|e| {
            StorageError::Config(ConfigError::InvalidTimeout {
                field: "cos.timeout".to_string(),
                value: self.config.timeout.clone(),
                message: e.to_string(),
            })
        })?;
        let base = Url::parse(&self.config.url)
            .map_err(|e| StorageError::connection(KIND, format!("invalid cos.url: {}", e)))?;

        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| StorageError::connection(KIND, e))?;

        Ok(CosClient {
            http,
            base,
            signer: Signer::new(&self.config.secret_id, &self.config.secret_key),
            sign_expiry: if timeout.is_zero() {
                DEFAULT_SIGN_EXPIRY
            } else {
                timeout.max(DEFAULT_SIGN_EXPIRY)
            },
            cancel: self.cancel.clone(),
        })
    }
}

impl std::fmt::Debug for CosBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosBackend")
            .field("url", &self.config.url)
            .field("path", &self.config.path)
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteStorage for CosBackend {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            debug!("COS backend already connected");
            return Ok(());
        }

        let client = self.create_client()?;
        let response = client
            .send(Method::HEAD, "", &[], None)
            .await
            .map_err(|e| StorageError::connection(KIND, e))?;
        if !response.status().is_success() {
            return Err(StorageError::connection(
                KIND,
                format!("bucket check returned HTTP {}", response.status()),
            ));
        }

        info!("Connected to COS bucket {}", client.base);
        self.client = Some(client);
        Ok(())
    }

    async fn stat_file(&self, key: &str) -> Result<RemoteFile> {
        let client = self.client()?;
        let full = self.key(key);
        let response = client.send(Method::HEAD, &full, &[], None).await?;
        let response = check(response, &full).await?;

        let headers = response.headers();
        let size = header_str(headers, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let modified = header_str(headers, LAST_MODIFIED.as_str()).and_then(parse_timestamp);
        Ok(RemoteFile::file(key, size, modified))
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let client = self.client()?;
        let full = self.key(key);
        let response = client.send(Method::DELETE, &full, &[], None).await?;
        check(response, &full).await?;
        debug!("Deleted {} from COS", full);
        Ok(())
    }

    async fn walk(
        &self,
        prefix: &str,
        recursive: bool,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<()> {
        let client = self.client()?;
        let root = list_prefix(&self.key(prefix));
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![
                ("prefix".to_string(), root.clone()),
                ("max-keys".to_string(), MAX_KEYS.to_string()),
            ];
            if !recursive {
                query.push(("delimiter".to_string(), "/".to_string()));
            }
            if let Some(marker) = &marker {
                query.push(("marker".to_string(), marker.clone()));
            }

            let response = client.send(Method::GET, "", &query, None).await?;
            let response = match check(response, &root).await {
                Ok(response) => response,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };
            let body = response
                .text()
                .await
                .map_err(|e| StorageError::provider(KIND, e))?;
            let page: ListBucketResult =
                quick_xml::de::from_str(&body).map_err(|e| StorageError::provider(KIND, e))?;

            for prefix in &page.common_prefixes {
                let name = relative_name(&prefix.prefix, &root);
                if !name.is_empty() {
                    visit(RemoteFile::dir(name))?;
                }
            }
            for object in &page.contents {
                let name = relative_name(&object.key, &root);
                if name.is_empty() || name.ends_with('/') {
                    continue;
                }
                visit(RemoteFile::file(
                    name,
                    object.size,
                    parse_timestamp(&object.last_modified),
                ))?;
            }

            if !page.is_truncated {
                return Ok(());
            }
            let next = page
                .next_marker
                .filter(|m| !m.is_empty())
                .or_else(|| page.contents.last().map(|o| o.key.clone()));
            match next {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                _ => {
                    return Err(StorageError::provider(
                        KIND,
                        "truncated listing without a usable marker",
                    ))
                }
            }
        }
    }

    async fn get_file_reader(&self, key: &str) -> Result<RemoteReader> {
        let client = self.client()?;
        let full = self.key(key);
        let response = client.send(Method::GET, &full, &[], None).await?;
        let response = check(response, &full).await?;

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn put_file(&self, key: &str, reader: RemoteReader) -> Result<()> {
        let client = self.client()?;
        let full = self.key(key);
        let sink = CosSink {
            client: client.clone(),
            key: full.clone(),
        };
        let part_size = usize::try_from(self.config.part_size).unwrap_or(usize::MAX);
        let size = upload_chunked(sink, reader, part_size, UPLOAD_CONCURRENCY, &self.cancel).await?;
        debug!("Uploaded {} bytes to COS {}", size, full);
        Ok(())
    }
}

/// Signed HTTP access to one bucket
#[derive(Clone)]
struct CosClient {
    http: reqwest::Client,
    base: Url,
    signer: Signer,
    sign_expiry: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for CosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl CosClient {
    /// Sends a signed request for object `key`; an empty key addresses the bucket.
    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<Response> {
        let path = format!("/{}", key);
        let mut url = self.base.clone();
        url.set_path(&path);
        if !query.is_empty() {
            url.set_query(Some(&query_string(query)));
        }

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(StorageError::InvalidPath(url.to_string())),
        };
        let start = chrono::Utc::now().timestamp();
        let expiry = i64::try_from(self.sign_expiry.as_secs()).unwrap_or(i64::MAX);
        let headers = [("host".to_string(), host)];
        let authorization = self
            .signer
            .authorization(&SignRequest {
                method: method.as_str(),
                path: &path,
                params: query,
                headers: &headers,
                start,
                end: start.saturating_add(expiry),
            })
            .map_err(|_| StorageError::provider(KIND, "COS secret key cannot be used for signing"))?;

        let mut builder = self
            .http
            .request(method, url)
            .header(HOST, &headers[0].1)
            .header(AUTHORIZATION, authorization);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let request = builder
            .build()
            .map_err(|e| StorageError::provider(KIND, e))?;
        debug!(
            "COS {} {} headers: {:?}",
            request.method(),
            request.url(),
            redacted_headers(request.headers())
        );

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StorageError::Cancelled),
            response = self.http.execute(request) => {
                response.map_err(|e| StorageError::provider(KIND, e))?
            }
        };
        debug!(
            "COS response {} headers: {:?}",
            response.status(),
            response.headers()
        );
        Ok(response)
    }
}

/// Passes successful responses through and maps failures, 404 to not-found.
async fn check(response: Response, key: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error = ErrorBody::parse(&body);
    let missing_key = status == StatusCode::NOT_FOUND && error.code != "NoSuchBucket";
    if missing_key || error.code == "NoSuchKey" {
        return Err(StorageError::not_found(key));
    }
    Err(StorageError::provider(
        KIND,
        CosApiError {
            status: status.as_u16(),
            code: error.code,
            message: error.message,
        },
    ))
}

/// Header list for logs with the signature masked
fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if *name == AUTHORIZATION {
                chbackup_core::REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.to_string(), value)
        })
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Multipart session on one object
#[derive(Clone)]
struct CosSink {
    client: CosClient,
    key: String,
}

impl CosSink {
    async fn request(
        &self,
        method: Method,
        query: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<Response> {
        let response = self.client.send(method, &self.key, query, body).await?;
        check(response, &self.key).await
    }
}

fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl MultipartSink for CosSink {
    async fn put_single(&self, body: Bytes) -> Result<()> {
        self.request(Method::PUT, &[], Some(body)).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<String> {
        let response = self
            .request(Method::POST, &query(&[("uploads", "")]), None)
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::provider(KIND, e))?;
        let result: InitiateMultipartUploadResult =
            quick_xml::de::from_str(&body).map_err(|e| StorageError::provider(KIND, e))?;
        Ok(result.upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        number: i32,
        body: Bytes,
    ) -> Result<CompletedPart> {
        let number_str = number.to_string();
        let params = query(&[("partNumber", &number_str), ("uploadId", upload_id)]);
        let response = self.request(Method::PUT, &params, Some(body)).await?;
        let etag = header_str(response.headers(), ETAG.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(CompletedPart { number, etag })
    }

    async fn complete(&self, upload_id: &str, parts: Vec<CompletedPart>) -> Result<()> {
        let body = CompleteMultipartUpload {
            parts: parts
                .into_iter()
                .map(|p| CompletePart {
                    part_number: p.number,
                    etag: p.etag,
                })
                .collect(),
        };
        let xml = quick_xml::se::to_string(&body).map_err(|e| StorageError::provider(KIND, e))?;
        self.request(
            Method::POST,
            &query(&[("uploadId", upload_id)]),
            Some(Bytes::from(xml)),
        )
        .await?;
        Ok(())
    }

    async fn abort(&self, upload_id: &str) -> Result<()> {
        self.request(Method::DELETE, &query(&[("uploadId", upload_id)]), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_redacted_headers_mask_signature() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("bucket.cos.example.com"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("q-sign-algorithm=sha1&q-signature=abcdef"),
        );

        let logged = redacted_headers(&headers);
        assert!(logged.contains(&("host".to_string(), "bucket.cos.example.com".to_string())));
        assert!(logged.contains(&("authorization".to_string(), "******".to_string())));
        assert!(!format!("{:?}", logged).contains("abcdef"));
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let backend = CosBackend::new(CosConfig::default(), CancellationToken::new());
        let err = backend.stat_file("daily.tar").await.unwrap_err();
        assert!(matches!(err, StorageError::NotConnected));
    }

    #[tokio::test]
    async fn test_invalid_timeout_is_config_error() {
        let config = CosConfig {
            url: "https://bucket-1250000000.cos.ap-guangzhou.myqcloud.com".to_string(),
            timeout: "soon".to_string(),
            ..Default::default()
        };
        let mut backend = CosBackend::new(config, CancellationToken::new());
        let err = backend.connect().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Config(ConfigError::InvalidTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_connect() {
        let config = CosConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        let mut backend = CosBackend::new(config, CancellationToken::new());
        let err = backend.connect().await.unwrap_err();
        assert!(matches!(err, StorageError::Connection { kind: "COS", .. }));
    }
}
