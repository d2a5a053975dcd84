//! Configuration validation

use super::Config;
use crate::error::{ConfigError, Result};
use crate::time::parse_duration;
use chbackup_archive::{ArchiveFormat, RAW_FORMAT_NAME};

/// S3 storage classes accepted by `s3.storage_class`
pub const S3_STORAGE_CLASSES: &[&str] = &[
    "STANDARD",
    "REDUCED_REDUNDANCY",
    "STANDARD_IA",
    "ONEZONE_IA",
    "INTELLIGENT_TIERING",
    "GLACIER",
    "DEEP_ARCHIVE",
    "OUTPOSTS",
    "GLACIER_IR",
    "SNOW",
    "EXPRESS_ONEZONE",
];

impl Config {
    /// Checks every cross-field invariant, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        self.validate_compression_formats()?;
        self.validate_timeouts()?;
        self.validate_storage_class()?;

        if self.api.secure {
            crate::tls::verify_key_pair(&self.api.certificate_file, &self.api.private_key_file)?;
        }

        Ok(())
    }

    fn validate_compression_formats(&self) -> Result<()> {
        check_format(self.compression_format())?;

        // Inactive sections are inert, but a populated one must still be usable
        for format in [
            &self.s3.compression_format,
            &self.gcs.compression_format,
            &self.cos.compression_format,
            &self.ftp.compression_format,
            &self.azblob.compression_format,
        ] {
            if !format.is_empty() {
                check_format(format)?;
            }
        }
        Ok(())
    }

    fn validate_timeouts(&self) -> Result<()> {
        for (field, value) in [
            ("clickhouse.timeout", &self.clickhouse.timeout),
            ("cos.timeout", &self.cos.timeout),
            ("ftp.timeout", &self.ftp.timeout),
        ] {
            parse_duration(value).map_err(|e| ConfigError::InvalidTimeout {
                field: field.to_string(),
                value: value.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn validate_storage_class(&self) -> Result<()> {
        let wanted = self.s3.storage_class.to_uppercase();
        if S3_STORAGE_CLASSES.contains(&wanted.as_str()) {
            return Ok(());
        }
        Err(ConfigError::InvalidStorageClass {
            value: self.s3.storage_class.clone(),
            valid: S3_STORAGE_CLASSES.join(", "),
        })
    }
}

fn check_format(format: &str) -> Result<()> {
    if format == RAW_FORMAT_NAME || ArchiveFormat::from_name(format).is_some() {
        return Ok(());
    }
    Err(ConfigError::UnsupportedCompressionFormat {
        format: format.to_string(),
    })
}
