//! COS XML request and response bodies

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `GET Bucket` response page
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListBucketResult {
    pub is_truncated: bool,
    pub next_marker: Option<String>,
    pub contents: Vec<ListedObject>,
    pub common_prefixes: Vec<CommonPrefix>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommonPrefix {
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateMultipartUploadResult {
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    pub parts: Vec<CompletePart>,
}

#[derive(Debug, Serialize)]
pub struct CompletePart {
    #[serde(rename = "PartNumber")]
    pub part_number: i32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    /// Parses an error body; HEAD responses and proxies may send none.
    pub fn parse(body: &str) -> Self {
        quick_xml::de::from_str(body).unwrap_or_default()
    }
}

/// Non-success COS response
#[derive(Debug, Error)]
#[error("HTTP {status}: {code} {message}")]
pub struct CosApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}
