//! Remote listing, stat, delete and retention commands

use anyhow::{Context, Result};
use chbackup_core::Config;
use tokio_util::sync::CancellationToken;

use crate::cli::{CleanArgs, DeleteArgs, ListArgs, StatArgs};
use crate::output;

pub async fn list(args: ListArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let destination = super::connect(config, cancel).await?;
    let backups = destination
        .list_backups()
        .await
        .context("Failed to list remote backups")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        output::info(&format!("No backups on {}", destination.kind()));
        return Ok(());
    }

    output::header(&format!("Remote backups ({})", destination.kind()));
    for backup in &backups {
        println!(
            "  {:<40} {:>12}   {}",
            backup.name,
            output::format_bytes(backup.size),
            output::format_time(backup.last_modified)
        );
    }
    Ok(())
}

pub async fn stat(args: StatArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let destination = super::connect(config, cancel).await?;
    let file = match destination.stat_file(&args.key).await {
        Ok(file) => file,
        Err(e) if e.is_not_found() => {
            anyhow::bail!("{} does not exist on {}", args.key, destination.kind())
        }
        Err(e) => return Err(e).context(format!("Failed to stat {}", args.key)),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&file)?);
        return Ok(());
    }

    output::header(file.name());
    output::kv("Size", &output::format_bytes(file.size()));
    output::kv("Modified", &output::format_time(file.last_modified()));
    Ok(())
}

pub async fn delete(args: DeleteArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let destination = super::connect(config, cancel).await?;
    let removed = destination
        .remove_backup(&args.name)
        .await
        .with_context(|| format!("Failed to delete backup {}", args.name))?;

    if removed == 0 {
        output::warning(&format!("Backup {} not found", args.name));
    } else {
        output::success(&format!("Deleted backup {} ({} objects)", args.name, removed));
    }
    Ok(())
}

pub async fn clean(args: CleanArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let keep = args.keep.unwrap_or(config.general.backups_to_keep_remote);
    if keep == 0 {
        output::info("Remote retention is disabled (keep = 0)");
        return Ok(());
    }

    let destination = super::connect(config, cancel).await?;
    let removed = destination
        .remove_old_backups(keep as usize)
        .await
        .context("Failed to apply remote retention")?;

    if removed.is_empty() {
        output::info(&format!("Nothing to remove, keeping {} backups", keep));
    } else {
        for name in &removed {
            output::kv("Removed", name);
        }
        output::success(&format!("Removed {} old backups", removed.len()));
    }
    Ok(())
}
