//! Config subcommand implementations
//!
//! Provides `dockhost config` subcommands for viewing configuration.

mod show;

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use dockhost_core::Config;

pub use show::cmd_config_show;

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output as JSON instead of table format
        #[arg(long)]
        json: bool,
    },
    /// Print the config file location
    Path,
}

/// Handle config command
pub fn cmd_config(cmd: &ConfigCommands, config: &Config, config_path: &Path) -> Result<()> {
    match cmd {
        ConfigCommands::Show { json } => cmd_config_show(config, *json),
        ConfigCommands::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}
