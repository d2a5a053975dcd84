//! Configuration loading with precedence
//!
//! Loads configuration with the following precedence (low to high):
//! 1. Built-in defaults
//! 2. YAML configuration file (optional)
//! 3. Environment variables

use super::Config;
use crate::error::{ConfigError, Result};
use camino::Utf8Path;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::str::FromStr;

impl Config {
    /// Loads, overlays and validates the configuration.
    ///
    /// A missing file leaves the defaults in place; an unreadable or
    /// malformed one is an error. Nothing partially applied is returned.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the YAML file at `path`, if it exists.
    pub fn from_file(path: &Utf8Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Config file {} not found, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml_ng::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            source: e,
        })
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvOverlay::new(lookup);

        let general = &mut self.general;
        env.string("REMOTE_STORAGE", &mut general.remote_storage);
        env.parse("MAX_FILE_SIZE", &mut general.max_file_size)?;
        env.bool("DISABLE_PROGRESS_BAR", &mut general.disable_progress_bar)?;
        env.parse("BACKUPS_TO_KEEP_LOCAL", &mut general.backups_to_keep_local)?;
        env.parse("BACKUPS_TO_KEEP_REMOTE", &mut general.backups_to_keep_remote)?;
        env.string("LOG_LEVEL", &mut general.log_level);

        let ch = &mut self.clickhouse;
        env.string("CLICKHOUSE_USERNAME", &mut ch.username);
        env.string("CLICKHOUSE_PASSWORD", &mut ch.password);
        env.string("CLICKHOUSE_HOST", &mut ch.host);
        env.parse("CLICKHOUSE_PORT", &mut ch.port)?;
        env.map("CLICKHOUSE_DISKS", &mut ch.disk_mapping)?;
        env.list("CLICKHOUSE_SKIP_TABLES", &mut ch.skip_tables);
        env.string("CLICKHOUSE_TIMEOUT", &mut ch.timeout);
        env.bool("CLICKHOUSE_FREEZE_BY_PART", &mut ch.freeze_by_part)?;
        env.bool("CLICKHOUSE_SECURE", &mut ch.secure)?;
        env.bool("CLICKHOUSE_SKIP_VERIFY", &mut ch.skip_verify)?;
        env.bool(
            "CLICKHOUSE_SYNC_REPLICATED_TABLES",
            &mut ch.sync_replicated_tables,
        )?;

        let s3 = &mut self.s3;
        env.string("S3_ACCESS_KEY", &mut s3.access_key);
        env.string("S3_SECRET_KEY", &mut s3.secret_key);
        env.string("S3_BUCKET", &mut s3.bucket);
        env.string("S3_ENDPOINT", &mut s3.endpoint);
        env.string("S3_REGION", &mut s3.region);
        env.string("S3_ACL", &mut s3.acl);
        env.bool("S3_FORCE_PATH_STYLE", &mut s3.force_path_style)?;
        env.string("S3_PATH", &mut s3.path);
        env.bool("S3_DISABLE_SSL", &mut s3.disable_ssl)?;
        env.parse("S3_PART_SIZE", &mut s3.part_size)?;
        env.parse("S3_CONCURRENCY", &mut s3.concurrency)?;
        env.parse("S3_COMPRESSION_LEVEL", &mut s3.compression_level)?;
        env.string("S3_COMPRESSION_FORMAT", &mut s3.compression_format);
        env.string("S3_SSE", &mut s3.sse);
        env.bool(
            "S3_DISABLE_CERT_VERIFICATION",
            &mut s3.disable_cert_verification,
        )?;
        env.string("S3_STORAGE_CLASS", &mut s3.storage_class);

        let gcs = &mut self.gcs;
        env.string("GCS_CREDENTIALS_FILE", &mut gcs.credentials_file);
        env.string("GCS_CREDENTIALS_JSON", &mut gcs.credentials_json);
        env.string("GCS_BUCKET", &mut gcs.bucket);
        env.string("GCS_PATH", &mut gcs.path);
        env.parse("GCS_COMPRESSION_LEVEL", &mut gcs.compression_level)?;
        env.string("GCS_COMPRESSION_FORMAT", &mut gcs.compression_format);

        let cos = &mut self.cos;
        env.string("COS_URL", &mut cos.url);
        env.string("COS_TIMEOUT", &mut cos.timeout);
        env.string("COS_SECRET_ID", &mut cos.secret_id);
        env.string("COS_SECRET_KEY", &mut cos.secret_key);
        env.string("COS_PATH", &mut cos.path);
        env.parse("COS_PART_SIZE", &mut cos.part_size)?;
        env.string("COS_COMPRESSION_FORMAT", &mut cos.compression_format);
        env.parse("COS_COMPRESSION_LEVEL", &mut cos.compression_level)?;

        let api = &mut self.api;
        env.string("API_LISTEN", &mut api.listen);
        env.bool("API_ENABLE_METRICS", &mut api.enable_metrics)?;
        env.bool("API_ENABLE_PPROF", &mut api.enable_pprof)?;
        env.string("API_USERNAME", &mut api.username);
        env.string("API_PASSWORD", &mut api.password);
        env.bool("API_SECURE", &mut api.secure)?;
        env.string("API_CERTIFICATE_FILE", &mut api.certificate_file);
        env.string("API_PRIVATE_KEY_FILE", &mut api.private_key_file);

        let ftp = &mut self.ftp;
        env.string("FTP_ADDRESS", &mut ftp.address);
        env.string("FTP_TIMEOUT", &mut ftp.timeout);
        env.string("FTP_USERNAME", &mut ftp.username);
        env.string("FTP_PASSWORD", &mut ftp.password);
        env.bool("FTP_TLS", &mut ftp.tls)?;
        env.string("FTP_PATH", &mut ftp.path);
        env.string("FTP_COMPRESSION_FORMAT", &mut ftp.compression_format);
        env.parse("FTP_COMPRESSION_LEVEL", &mut ftp.compression_level)?;

        let az = &mut self.azblob;
        env.string("AZBLOB_ENDPOINT_SUFFIX", &mut az.endpoint_suffix);
        env.string("AZBLOB_ACCOUNT_NAME", &mut az.account_name);
        env.string("AZBLOB_ACCOUNT_KEY", &mut az.account_key);
        env.string("AZBLOB_SAS", &mut az.sas);
        env.string("AZBLOB_CONTAINER", &mut az.container);
        env.string("AZBLOB_PATH", &mut az.path);
        env.parse("AZBLOB_COMPRESSION_LEVEL", &mut az.compression_level)?;
        env.string("AZBLOB_COMPRESSION_FORMAT", &mut az.compression_format);
        env.string("AZBLOB_SSE_KEY", &mut az.sse_key);

        Ok(())
    }
}

/// Typed access to override variables.
///
/// A variable that is unset leaves the target untouched. Set variables
/// replace it, including with an empty string.
pub struct EnvOverlay<F> {
    lookup: F,
}

impl<F> EnvOverlay<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    pub fn string(&self, var: &str, target: &mut String) {
        if let Some(value) = (self.lookup)(var) {
            *target = value;
        }
    }

    pub fn parse<T>(&self, var: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = (self.lookup)(var) {
            *target = value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::env(var, format!("'{}': {}", value, e)))?;
        }
        Ok(())
    }

    pub fn bool(&self, var: &str, target: &mut bool) -> Result<()> {
        if let Some(value) = (self.lookup)(var) {
            *target = parse_bool(value.trim()).ok_or_else(|| {
                ConfigError::env(var, format!("'{}' is not a boolean", value))
            })?;
        }
        Ok(())
    }

    /// Comma separated list
    pub fn list(&self, var: &str, target: &mut Vec<String>) {
        if let Some(value) = (self.lookup)(var) {
            *target = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Comma separated `key:value` pairs
    pub fn map(&self, var: &str, target: &mut BTreeMap<String, String>) -> Result<()> {
        if let Some(value) = (self.lookup)(var) {
            let mut parsed = BTreeMap::new();
            for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, val) = pair.split_once(':').ok_or_else(|| {
                    ConfigError::env(var, format!("'{}' is not a key:value pair", pair))
                })?;
                parsed.insert(key.trim().to_string(), val.trim().to_string());
            }
            *target = parsed;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
