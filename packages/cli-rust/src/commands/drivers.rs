//! dockhost drivers - Registered backends and their create flags

use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use dockhost_core::{FlagValue, create_flags, registered_drivers};

fn default_text(value: &FlagValue) -> String {
    match value {
        FlagValue::Str("") => "-".to_string(),
        other => other.to_string(),
    }
}

fn drivers_table() -> Result<Table> {
    let mut table = Table::new();
    table.set_header(vec!["Driver", "Flag", "Default", "Description"]);

    for driver in registered_drivers() {
        for (i, flag) in create_flags(&driver)?.iter().enumerate() {
            let driver_cell = if i == 0 {
                Cell::new(&driver).fg(Color::Cyan)
            } else {
                Cell::new("")
            };
            table.add_row(vec![
                driver_cell,
                Cell::new(format!("--{}", flag.name)),
                Cell::new(default_text(&flag.default)),
                Cell::new(flag.usage),
            ]);
        }
    }
    Ok(table)
}

pub fn cmd_drivers() -> Result<()> {
    println!("{}", drivers_table()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lists_every_backend() {
        let rendered = drivers_table().unwrap().to_string();
        for driver in ["azure", "fusion", "hyperv", "openstack", "vsphere"] {
            assert!(rendered.contains(driver), "{driver} missing");
        }
        assert!(rendered.contains("--vsphere-datacenter"));
    }

    #[test]
    fn empty_defaults_render_as_dash() {
        assert_eq!(default_text(&FlagValue::Str("")), "-");
        assert_eq!(default_text(&FlagValue::Int(2375)), "2375");
        assert_eq!(default_text(&FlagValue::Bool(false)), "false");
    }
}
