//! Path resolution for dockhost
//!
//! - Linux/macOS: `~/.config/dockhost/`
//! - Windows: `%APPDATA%\dockhost\`
//!
//! The host store defaults to `~/.docker/hosts`.

use std::path::PathBuf;

/// Environment variable overriding the host store root
pub const STORE_PATH_ENV: &str = "DOCKHOST_STORE_PATH";

/// Get the configuration directory path
pub fn get_config_dir() -> Option<PathBuf> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join("dockhost"))
    }
    #[cfg(target_os = "windows")]
    {
        directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("dockhost"))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// `{config_dir}/config.json`
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join("config.json"))
}

/// `~/.docker/hosts`
pub fn default_store_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".docker").join("hosts"))
}

/// Host store root
///
/// Precedence: `DOCKHOST_STORE_PATH`, then `store_path` from the config
/// file, then [`default_store_path`].
pub fn resolve_store_path(env_value: Option<&str>, configured: Option<&str>) -> Option<PathBuf> {
    let non_empty = |v: &&str| !v.trim().is_empty();
    env_value
        .filter(non_empty)
        .or(configured.filter(non_empty))
        .map(expand_home)
        .or_else(default_store_path)
}

/// Expand a leading `~/`
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
