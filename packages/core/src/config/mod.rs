//! Configuration management for dockhost
//!
//! Handles loading, saving, and validating the JSONC configuration file.
//! Creates default config if missing, validates against schema.

pub mod paths;
pub mod schema;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jsonc_parser::parse_to_serde_value;

pub use paths::{
    STORE_PATH_ENV, default_store_path, get_config_dir, get_config_path, resolve_store_path,
};
pub use schema::Config;

/// Ensure the config directory exists
///
/// Creates `~/.config/dockhost/` if it doesn't exist.
pub fn ensure_config_dir() -> Result<PathBuf> {
    let config_dir =
        get_config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;
        tracing::info!("Created config directory: {}", config_dir.display());
    }

    Ok(config_dir)
}

/// Load configuration from the config file
///
/// If the config file doesn't exist, creates a new one with default values.
pub fn load_config() -> Result<Config> {
    let config_path =
        get_config_path().ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
    load_config_from(&config_path)
}

/// Load configuration from `config_path`
///
/// Supports JSONC (JSON with comments). Rejects unknown fields.
pub fn load_config_from(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        tracing::info!(
            "Config file not found, creating default at: {}",
            config_path.display()
        );
        let config = Config::default();
        save_config_to(&config, config_path)?;
        return Ok(config);
    }

    let mut file = File::open(config_path)
        .with_context(|| format!("Failed to open config file: {}", config_path.display()))?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    let parsed_value = parse_to_serde_value(&contents, &Default::default())
        .map_err(|e| anyhow::anyhow!("Invalid JSONC in config file: {}", e))?
        .ok_or_else(|| anyhow::anyhow!("Config file is empty"))?;

    let config: Config = serde_json::from_value(parsed_value).with_context(|| {
        format!(
            "Invalid configuration in {}. Check for unknown fields or invalid values.",
            config_path.display()
        )
    })?;

    Ok(config)
}

/// Save configuration to the config file
pub fn save_config(config: &Config) -> Result<()> {
    ensure_config_dir()?;
    let config_path =
        get_config_path().ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
    save_config_to(config, &config_path)
}

/// Save configuration to `config_path`
///
/// Creates a backup of the existing config (config.json.bak) before overwriting.
pub fn save_config_to(config: &Config, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        fs::copy(config_path, &backup_path)
            .with_context(|| format!("Failed to create backup at: {}", backup_path.display()))?;
        tracing::debug!("Created config backup: {}", backup_path.display());
    }

    let json = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

    let mut file = File::create(config_path)
        .with_context(|| format!("Failed to create config file: {}", config_path.display()))?;

    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    tracing::debug!("Saved config to: {}", config_path.display());

    Ok(())
}

/// Host store root for `config`, honouring `DOCKHOST_STORE_PATH`
pub fn store_path(config: &Config) -> Result<PathBuf> {
    let env_value = std::env::var(STORE_PATH_ENV).ok();
    resolve_store_path(env_value.as_deref(), config.store_path.as_deref())
        .ok_or_else(|| anyhow::anyhow!("Could not determine host store directory"))
}
