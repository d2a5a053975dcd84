//! CLI command implementations

pub mod config;
pub mod remote;
pub mod transfer;

use anyhow::{Context, Result};
use chbackup_core::Config;
use chbackup_storage::BackupDestination;
use tokio_util::sync::CancellationToken;

/// Creates and connects the destination configured in `general.remote_storage`.
pub async fn connect(config: &Config, cancel: CancellationToken) -> Result<BackupDestination> {
    let mut destination = BackupDestination::with_cancellation(config, cancel)
        .context("Failed to create remote storage")?;
    destination
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", destination.kind()))?;
    Ok(destination)
}
