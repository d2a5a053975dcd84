//! Upload and download commands

use anyhow::{Context, Result};
use chbackup_core::Config;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::cli::{DownloadArgs, UploadArgs};
use crate::output;

pub async fn upload(args: UploadArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    if !args.dir.is_dir() {
        anyhow::bail!("{} is not a directory", args.dir);
    }

    let destination = super::connect(config, cancel).await?;
    output::header(&format!("Uploading {} to {}", args.name, destination.kind()));
    output::kv("Source", args.dir.as_str());
    output::kv("Format", destination.format().name());

    let files: Vec<PathBuf> = args.files.iter().map(|f| f.as_std_path().to_path_buf()).collect();
    let summary = destination
        .upload_archive(args.dir.as_std_path(), &files, &args.name)
        .await
        .with_context(|| format!("Failed to upload {}", args.name))?;

    for key in &summary.keys {
        output::kv("Object", key);
    }
    output::success(&format!(
        "Uploaded {} files ({})",
        summary.file_count,
        output::format_bytes(summary.source_bytes)
    ));
    Ok(())
}

pub async fn download(args: DownloadArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let destination = super::connect(config, cancel).await?;
    output::header(&format!("Downloading {} from {}", args.name, destination.kind()));

    let stats = destination
        .download_archive(&args.name, args.dir.as_std_path())
        .await
        .with_context(|| format!("Failed to download {}", args.name))?;

    output::success(&format!(
        "Restored {} entries ({}) into {}",
        stats.entry_count,
        output::format_bytes(stats.total_size_bytes),
        args.dir
    ));
    Ok(())
}
