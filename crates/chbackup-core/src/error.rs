//! Error types for chbackup-core

use thiserror::Error;

/// Result type alias using the configuration error type
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration errors. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file exists but could not be read
    #[error("can't open config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the config schema
    #[error("can't parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// Environment variable holds a value of the wrong shape
    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },

    /// Compression format is not in the archive registry
    #[error("'{format}' is unsupported compression format")]
    UnsupportedCompressionFormat { format: String },

    /// Timeout string does not parse as a duration
    #[error("invalid {field} '{value}': {message}")]
    InvalidTimeout {
        field: String,
        value: String,
        message: String,
    },

    /// S3 storage class outside the known set
    #[error("'{value}' is bad S3_STORAGE_CLASS, select one of: {valid}")]
    InvalidStorageClass { value: String, valid: String },

    /// Certificate and private key do not load as a matching pair
    #[error("TLS key pair error: {0}")]
    Tls(String),

    /// Remote storage selector names no known backend
    #[error("unknown remote_storage '{0}'")]
    UnknownRemoteStorage(String),

    /// Rendering the configuration failed
    #[error("can't serialize config: {0}")]
    Serialize(#[from] serde_yaml_ng::Error),
}

impl ConfigError {
    /// Create an environment variable error
    pub fn env(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            message: message.into(),
        }
    }

    /// Create a TLS error
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }
}
