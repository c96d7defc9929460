//! Process-wide driver registry
//!
//! Maps a backend name to its constructor and create-flag descriptors. The
//! built-in backends are inserted when the table is first touched, so every
//! lookup sees them without an explicit initialization step.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{LazyLock, PoisonError, RwLock};

use super::{Driver, azure, fusion, hyperv, openstack, options::CreateFlag, vsphere};
use crate::error::HostError;

/// Constructor and flag descriptors of one backend
#[derive(Clone, Copy)]
pub struct RegisteredDriver {
    /// Fresh, unconfigured driver bound to a host storage directory
    pub new: fn(&Path) -> Box<dyn Driver>,
    pub create_flags: fn() -> Vec<CreateFlag>,
}

static REGISTRY: LazyLock<RwLock<BTreeMap<String, RegisteredDriver>>> = LazyLock::new(|| {
    let mut table = BTreeMap::new();
    table.insert(azure::DRIVER_NAME.to_string(), azure::registered());
    table.insert(fusion::DRIVER_NAME.to_string(), fusion::registered());
    table.insert(hyperv::DRIVER_NAME.to_string(), hyperv::registered());
    table.insert(openstack::DRIVER_NAME.to_string(), openstack::registered());
    table.insert(vsphere::DRIVER_NAME.to_string(), vsphere::registered());
    #[cfg(test)]
    table.insert(super::fake::DRIVER_NAME.to_string(), super::fake::registered());
    RwLock::new(table)
});

/// Register a backend under `name`, replacing any previous entry
pub fn register(name: &str, driver: RegisteredDriver) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), driver);
}

/// Look up a backend entry
pub fn lookup(name: &str) -> Result<RegisteredDriver, HostError> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .copied()
        .ok_or_else(|| HostError::UnknownDriver(name.to_string()))
}

/// Construct a fresh driver bound to `store_path`
pub fn new_driver(name: &str, store_path: &Path) -> Result<Box<dyn Driver>, HostError> {
    let entry = lookup(name)?;
    Ok((entry.new)(store_path))
}

/// Create-flag descriptors of a backend
pub fn create_flags(name: &str) -> Result<Vec<CreateFlag>, HostError> {
    Ok((lookup(name)?.create_flags)())
}

/// Registered backend names in sorted order
pub fn registered_drivers() -> Vec<String> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}
