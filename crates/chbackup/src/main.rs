//! chbackup CLI - ClickHouse backups on remote storage
//!
//! This is the main entry point for the chbackup command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::{Context, Result};
use chbackup_core::Config;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for rustls 0.23+)
    // This must be done before any TLS operations
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    if let Commands::DefaultConfig = cli.command {
        init_tracing("info", cli.verbose, cli.quiet);
        return commands::config::default_config();
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    init_tracing(&config.general.log_level, cli.verbose, cli.quiet);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::DefaultConfig => commands::config::default_config(),
        Commands::PrintConfig => commands::config::print_config(&config),
        Commands::ListRemote(args) => commands::remote::list(args, &config, cancel).await,
        Commands::Stat(args) => commands::remote::stat(args, &config, cancel).await,
        Commands::Delete(args) => commands::remote::delete(args, &config, cancel).await,
        Commands::CleanRemote(args) => commands::remote::clean(args, &config, cancel).await,
        Commands::Upload(args) => commands::transfer::upload(args, &config, cancel).await,
        Commands::Download(args) => commands::transfer::download(args, &config, cancel).await,
    }
}

/// Cancels in-flight transfers on Ctrl+C so multipart uploads get aborted.
///
/// A second Ctrl+C exits immediately with the conventional SIGINT status.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupted, cancelling remote operations (Ctrl+C again to exit)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted again, exiting");
            std::process::exit(130);
        }
    });
}

/// Initialize tracing; `-v`/`-vv` raise and `--quiet` lowers the configured level
fn init_tracing(level: &str, verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
