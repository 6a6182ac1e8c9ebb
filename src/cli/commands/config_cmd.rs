//! Configuration commands.

use console::style;

use crate::config::{Config, Settings};
use crate::repository::util::redact_url_password;

/// Print the effective configuration, where it came from and its hash.
pub fn cmd_config_show(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    match config.source_path {
        Some(ref path) => println!("{} {}", style("Config file:").bold(), path.display()),
        None => println!("{} none (defaults)", style("Config file:").bold()),
    }
    println!("{} {}", style("Data directory:").bold(), settings.data_dir.display());
    println!(
        "{} {}",
        style("Database:").bold(),
        redact_url_password(&settings.database_url)
    );
    println!("{} {}", style("Hash:").bold(), config.hash());
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
