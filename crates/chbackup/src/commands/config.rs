//! Configuration commands

use anyhow::{Context, Result};
use chbackup_core::Config;

pub fn default_config() -> Result<()> {
    let yaml = Config::default_yaml().context("Failed to render default configuration")?;
    print!("{}", yaml);
    Ok(())
}

/// Prints the effective configuration with secrets masked.
pub fn print_config(config: &Config) -> Result<()> {
    let yaml = config
        .redacted()
        .to_yaml()
        .context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}
