//! Config show subcommand
//!
//! Displays current configuration in table or JSON format.

use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use dockhost_core::{Config, config};

/// Mask values of password-like create defaults
fn display_value(key: &str, value: &str) -> String {
    if key.contains("password") && !value.is_empty() {
        "********".to_string()
    } else {
        value.to_string()
    }
}

fn masked(config: &Config) -> Config {
    let mut masked = config.clone();
    for (key, value) in masked.create_defaults.iter_mut() {
        *value = display_value(key, value);
    }
    masked
}

/// Show current configuration
///
/// Passwords in `create_defaults` are masked.
pub fn cmd_config_show(config: &Config, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&masked(config))?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Key", "Value"]);

    table.add_row(vec![
        Cell::new("version"),
        Cell::new(config.version.to_string()),
    ]);

    let store = config::store_path(config)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let store_cell = if config.store_path.is_some() {
        Cell::new(store)
    } else {
        Cell::new(format!("{store} (default)")).fg(Color::DarkGrey)
    };
    table.add_row(vec![Cell::new("store_path"), store_cell]);

    table.add_row(vec![
        Cell::new("default_driver"),
        match &config.default_driver {
            Some(driver) => Cell::new(driver),
            None => Cell::new("(not set)").fg(Color::DarkGrey),
        },
    ]);

    for (key, value) in &config.create_defaults {
        table.add_row(vec![
            Cell::new(format!("create_defaults.{key}")),
            Cell::new(display_value(key, value)),
        ]);
    }

    println!("{table}");
    Ok(())
}
