//! Configuration schema for dockhost
//!
//! Defines the structure and defaults for the config.json file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Main configuration structure for dockhost
///
/// Serialized to/from `~/.config/dockhost/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Config file version for migrations
    pub version: u32,

    /// Host store root (default: `~/.docker/hosts`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,

    /// Driver used by `create` when `--driver` is omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_driver: Option<String>,

    /// Driver option defaults applied beneath explicit flags
    /// Format: {"vsphere-datacenter": "dc1"}
    #[serde(default)]
    pub create_defaults: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            store_path: None,
            default_driver: None,
            create_defaults: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured defaults that belong to `driver` (keys prefixed `<driver>-`)
    pub fn create_defaults_for<'a>(&'a self, driver: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.create_defaults
            .iter()
            .filter(move |(key, _)| {
                key.strip_prefix(driver)
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
