//! TLS key pair validation for the API section

use crate::error::{ConfigError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Checks that `cert_file` and `key_file` load as a matching certificate and key.
pub fn verify_key_pair(cert_file: &str, key_file: &str) -> Result<()> {
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::tls(format!("Failed to select protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| {
            ConfigError::tls(format!(
                "{} and {} are not a usable key pair: {}",
                cert_file, key_file, e
            ))
        })?;

    tracing::debug!("TLS key pair {} / {} loaded", cert_file, key_file);
    Ok(())
}

/// Load certificates from a PEM file
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(Path::new(path))
        .map_err(|e| ConfigError::tls(format!("Failed to open {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::tls(format!("Failed to read certificates from {}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(ConfigError::tls(format!("No certificates found in {}", path)));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file
fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(Path::new(path))
        .map_err(|e| ConfigError::tls(format!("Failed to open {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ConfigError::tls(format!("Failed to read private key from {}: {}", path, e)))?
        .ok_or_else(|| ConfigError::tls(format!("No private key found in {}", path)))
}
