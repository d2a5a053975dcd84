//! Core library for chbackup
//!
//! This crate provides:
//! - Configuration types with built-in defaults
//! - Loading from YAML with environment variable overrides
//! - Validation of compression formats, timeouts, storage classes and TLS material
//! - Duration and timestamp parsing helpers shared by the storage backends

pub mod config;
pub mod error;
pub mod time;
pub mod tls;

pub use config::{
    ApiConfig, AzureBlobConfig, ClickHouseConfig, Config, CosConfig, EnvOverlay, FtpConfig,
    GcsConfig, GeneralConfig, RemoteStorageKind, S3Config, DEFAULT_CONFIG_PATH, REDACTED,
    S3_STORAGE_CLASSES,
};
pub use error::{ConfigError, Result};
