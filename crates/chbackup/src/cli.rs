//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use chbackup_core::DEFAULT_CONFIG_PATH;
use clap::{Args, Parser, Subcommand};

/// chbackup - ClickHouse backups on S3, GCS, Azure Blob, COS and FTP
#[derive(Parser, Debug)]
#[command(name = "chbackup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "CLICKHOUSE_BACKUP_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: Utf8PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the default configuration
    DefaultConfig,

    /// Print the effective configuration (file and environment applied)
    PrintConfig,

    /// List backups on remote storage
    ListRemote(ListArgs),

    /// Show size and modification time of a remote object
    Stat(StatArgs),

    /// Delete a backup from remote storage
    Delete(DeleteArgs),

    /// Pack a local directory and upload it as a backup
    Upload(UploadArgs),

    /// Download a backup and unpack it into a local directory
    Download(DownloadArgs),

    /// Remove old remote backups according to retention
    CleanRemote(CleanArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object key relative to the configured path
    pub key: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Backup name
    pub name: String,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Local directory holding the backup
    pub dir: Utf8PathBuf,

    /// Backup name on remote storage
    pub name: String,

    /// Upload only these files (relative to the directory)
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<Utf8PathBuf>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Backup name on remote storage
    pub name: String,

    /// Directory to unpack into
    pub dir: Utf8PathBuf,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Backups to keep (defaults to general.backups_to_keep_remote)
    #[arg(long)]
    pub keep: Option<u32>,
}
