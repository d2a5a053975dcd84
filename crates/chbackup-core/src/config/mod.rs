//! Configuration types and defaults
//!
//! The configuration is built once at startup (defaults, then the YAML file,
//! then environment variables), validated, and read-only afterwards.

mod loader;
mod validate;

pub use loader::EnvOverlay;
pub use validate::S3_STORAGE_CLASSES;

use chbackup_archive::ArchiveFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/clickhouse-backup/config.yml";

const MIB: u64 = 1024 * 1024;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub clickhouse: ClickHouseConfig,
    pub s3: S3Config,
    pub gcs: GcsConfig,
    pub cos: CosConfig,
    pub api: ApiConfig,
    pub ftp: FtpConfig,
    pub azblob: AzureBlobConfig,
}

/// Remote storage backends selectable with `general.remote_storage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteStorageKind {
    S3,
    Gcs,
    Cos,
    Ftp,
    AzureBlob,
    /// Remote storage disabled
    None,
}

impl RemoteStorageKind {
    /// Resolves a selector string, `None` when it names nothing known.
    pub fn from_selector(selector: &str) -> Option<Self> {
        match selector {
            "s3" => Some(Self::S3),
            "gcs" => Some(Self::Gcs),
            "cos" => Some(Self::Cos),
            "ftp" => Some(Self::Ftp),
            "azblob" => Some(Self::AzureBlob),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Cos => "cos",
            Self::Ftp => "ftp",
            Self::AzureBlob => "azblob",
            Self::None => "none",
        }
    }
}

impl fmt::Display for RemoteStorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// General settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Active backend selector
    pub remote_storage: String,

    /// Upper bound on the content of a single archive, in bytes
    pub max_file_size: u64,

    pub disable_progress_bar: bool,
    pub backups_to_keep_local: u32,
    pub backups_to_keep_remote: u32,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            remote_storage: "s3".to_string(),
            max_file_size: 1024 * 1024 * MIB,
            disable_progress_bar: false,
            backups_to_keep_local: 0,
            backups_to_keep_remote: 0,
            log_level: "info".to_string(),
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub disk_mapping: BTreeMap<String, String>,
    pub skip_tables: Vec<String>,
    pub timeout: String,
    pub freeze_by_part: bool,
    pub secure: bool,
    pub skip_verify: bool,
    pub sync_replicated_tables: bool,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            username: "default".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 9000,
            disk_mapping: BTreeMap::new(),
            skip_tables: vec!["system.*".to_string()],
            timeout: "5m".to_string(),
            freeze_by_part: false,
            secure: false,
            skip_verify: false,
            sync_replicated_tables: true,
        }
    }
}

/// S3-compatible object storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub acl: String,
    pub force_path_style: bool,
    pub path: String,
    pub disable_ssl: bool,

    /// Multipart upload part size in bytes
    pub part_size: u64,

    /// Parts uploaded in parallel
    pub concurrency: usize,

    pub compression_level: u32,
    pub compression_format: String,
    pub sse: String,
    pub disable_cert_verification: bool,
    pub storage_class: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            endpoint: String::new(),
            region: "us-east-1".to_string(),
            acl: "private".to_string(),
            force_path_style: false,
            path: String::new(),
            disable_ssl: false,
            part_size: 512 * MIB,
            concurrency: 1,
            compression_level: 1,
            compression_format: "tar".to_string(),
            sse: String::new(),
            disable_cert_verification: false,
            storage_class: "STANDARD".to_string(),
        }
    }
}

/// Google Cloud Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    pub credentials_file: String,
    pub credentials_json: String,
    pub bucket: String,
    pub path: String,
    pub compression_level: u32,
    pub compression_format: String,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            credentials_file: String::new(),
            credentials_json: String::new(),
            bucket: String::new(),
            path: String::new(),
            compression_level: 1,
            compression_format: "tar".to_string(),
        }
    }
}

/// Tencent Cloud Object Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosConfig {
    /// Bucket URL, e.g. `https://bucket-1250000000.cos.ap-guangzhou.myqcloud.com`
    pub url: String,
    pub timeout: String,
    pub secret_id: String,
    pub secret_key: String,
    pub path: String,

    /// Multipart upload part size in bytes
    pub part_size: u64,

    pub compression_format: String,
    pub compression_level: u32,
}

impl Default for CosConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: "2m".to_string(),
            secret_id: String::new(),
            secret_key: String::new(),
            path: String::new(),
            part_size: 64 * MIB,
            compression_format: "tar".to_string(),
            compression_level: 1,
        }
    }
}

/// FTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    /// `host:port` of the server
    pub address: String,
    pub timeout: String,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub path: String,
    pub compression_format: String,
    pub compression_level: u32,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            timeout: "2m".to_string(),
            username: String::new(),
            password: String::new(),
            tls: false,
            path: String::new(),
            compression_format: "tar".to_string(),
            compression_level: 1,
        }
    }
}

/// Azure Blob Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureBlobConfig {
    pub endpoint_suffix: String,
    pub account_name: String,
    pub account_key: String,
    pub sas: String,
    pub container: String,
    pub path: String,
    pub compression_level: u32,
    pub compression_format: String,
    pub sse_key: String,
}

impl Default for AzureBlobConfig {
    fn default() -> Self {
        Self {
            endpoint_suffix: "core.windows.net".to_string(),
            account_name: String::new(),
            account_key: String::new(),
            sas: String::new(),
            container: String::new(),
            path: String::new(),
            compression_level: 1,
            compression_format: "tar".to_string(),
            sse_key: String::new(),
        }
    }
}

/// REST API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
    pub enable_metrics: bool,
    pub enable_pprof: bool,
    pub username: String,
    pub password: String,
    pub secure: bool,
    pub certificate_file: String,
    pub private_key_file: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "localhost:7171".to_string(),
            enable_metrics: true,
            enable_pprof: false,
            username: String::new(),
            password: String::new(),
            secure: false,
            certificate_file: String::new(),
            private_key_file: String::new(),
        }
    }
}

impl Config {
    /// Active backend, `None` when the selector is unrecognised.
    pub fn remote_storage_kind(&self) -> Option<RemoteStorageKind> {
        RemoteStorageKind::from_selector(&self.general.remote_storage)
    }

    /// Compression format configured for the active backend.
    ///
    /// Returns `"none"` when remote storage is disabled and `"unknown"` when
    /// the selector names no backend.
    pub fn compression_format(&self) -> &str {
        match self.remote_storage_kind() {
            Some(RemoteStorageKind::S3) => &self.s3.compression_format,
            Some(RemoteStorageKind::Gcs) => &self.gcs.compression_format,
            Some(RemoteStorageKind::Cos) => &self.cos.compression_format,
            Some(RemoteStorageKind::Ftp) => &self.ftp.compression_format,
            Some(RemoteStorageKind::AzureBlob) => &self.azblob.compression_format,
            Some(RemoteStorageKind::None) => chbackup_archive::RAW_FORMAT_NAME,
            None => "unknown",
        }
    }

    /// Compression level configured for the active backend.
    pub fn compression_level(&self) -> u32 {
        match self.remote_storage_kind() {
            Some(RemoteStorageKind::S3) => self.s3.compression_level,
            Some(RemoteStorageKind::Gcs) => self.gcs.compression_level,
            Some(RemoteStorageKind::Cos) => self.cos.compression_level,
            Some(RemoteStorageKind::Ftp) => self.ftp.compression_level,
            Some(RemoteStorageKind::AzureBlob) => self.azblob.compression_level,
            _ => 1,
        }
    }

    /// Archive format for the active backend, if the format name is registered.
    pub fn archive_format(&self) -> Option<ArchiveFormat> {
        ArchiveFormat::from_name(self.compression_format())
    }

    /// File extension of archives for the active backend, without the dot.
    ///
    /// Empty when the format is `none` or not registered.
    pub fn archive_extension(&self) -> &'static str {
        self.archive_format().map_or("", |f| f.extension())
    }

    /// Renders the built-in defaults as YAML.
    pub fn default_yaml() -> crate::Result<String> {
        Ok(serde_yaml_ng::to_string(&Config::default())?)
    }

    /// Renders this configuration as YAML.
    pub fn to_yaml(&self) -> crate::Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Copy with every password, access key, secret key and token masked.
    ///
    /// Unset secrets stay empty so the output still shows which are configured.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for secret in [
            &mut config.clickhouse.password,
            &mut config.s3.access_key,
            &mut config.s3.secret_key,
            &mut config.gcs.credentials_json,
            &mut config.cos.secret_id,
            &mut config.cos.secret_key,
            &mut config.ftp.password,
            &mut config.azblob.account_key,
            &mut config.azblob.sas,
            &mut config.azblob.sse_key,
            &mut config.api.password,
        ] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
        config
    }
}

/// Replacement for secret values in printed configuration
pub const REDACTED: &str = "******";
