//! Version information for dockhost

/// Get the current version string
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Get the long version string with build information
///
/// Returns version plus build metadata when available (git commit, build date).
/// Falls back gracefully if build info is not available.
pub fn get_version_long() -> String {
    let version = get_version();

    // Set by CI when available
    let git_hash = option_env!("DOCKHOST_GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("DOCKHOST_BUILD_DATE").unwrap_or("unknown");
    let drivers = crate::drivers::registered_drivers().join(", ");

    format!("{version} (git: {git_hash}, built: {build_date}, drivers: {drivers})")
}
