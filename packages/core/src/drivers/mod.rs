//! Backend drivers
//!
//! A [`Driver`] owns the configuration of one backend machine and implements
//! its lifecycle. Drivers are constructed by name through the
//! [`registry`]; nothing above this module matches on concrete driver types.

use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HostError;
use crate::state::MachineState;

pub mod azure;
pub mod default;
#[cfg(test)]
pub(crate) mod fake;
pub mod fusion;
pub mod hyperv;
pub mod openstack;
pub mod options;
pub mod registry;
pub mod vsphere;

pub use default::DefaultDriver;
pub use options::{CreateFlag, DriverOptions, FlagValue};
pub use registry::{RegisteredDriver, create_flags, new_driver, register, registered_drivers};

/// Lifecycle contract every backend implements
///
/// State is never cached: every operation that depends on it asks the
/// backend through [`Driver::get_state`]. Operations on one instance are
/// expected to be serialized by the caller.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry key of this backend
    fn driver_name(&self) -> &'static str;

    /// Validate and store backend configuration, applying defaults
    fn configure_from_options(&mut self, options: &DriverOptions) -> Result<(), HostError>;

    /// Provision the backend machine from scratch and wait until its engine
    /// port accepts connections
    async fn create(&mut self) -> Result<(), HostError>;

    async fn start(&self) -> Result<(), HostError>;

    async fn stop(&self) -> Result<(), HostError>;

    async fn restart(&self) -> Result<(), HostError>;

    /// Hard power-off
    async fn kill(&self) -> Result<(), HostError>;

    /// Delete the backend machine; succeeds when it is already gone
    async fn remove(&self) -> Result<(), HostError>;

    async fn upgrade(&self) -> Result<(), HostError>;

    async fn get_state(&self) -> Result<MachineState, HostError>;

    async fn get_ip(&self) -> Result<String, HostError>;

    /// Engine endpoint, `tcp://<ip>:<port>`
    async fn get_url(&self) -> Result<String, HostError>;

    /// `ssh` invocation into the machine, running `args` remotely if given
    async fn get_ssh_command(&self, args: &[String]) -> Result<Command, HostError>;

    /// Persisted driver fields
    fn save_config(&self) -> Result<Value, HostError>;

    /// Restore persisted driver fields, keeping runtime-only state
    fn load_config(&mut self, config: Value) -> Result<(), HostError>;
}

/// `tcp://<ip>:<port>`
pub fn tcp_url(ip: &str, port: u16) -> String {
    format!("tcp://{ip}:{port}")
}

/// `<ip>:<port>` dial target
pub fn dial_target(ip: &str, port: u16) -> String {
    format!("{ip}:{port}")
}

/// Store path of a driver as a displayable resource string
pub(crate) fn path_str(path: &Path) -> String {
    path.display().to_string()
}

/// Fail with `NotRunning` unless the machine is running
pub(crate) async fn ensure_running(driver: &dyn Driver, name: &str) -> Result<(), HostError> {
    if driver.get_state().await? != MachineState::Running {
        return Err(HostError::NotRunning(name.to_string()));
    }
    Ok(())
}

/// Fail with `NotRunning` when the machine is stopped
pub(crate) async fn ensure_not_stopped(driver: &dyn Driver, name: &str) -> Result<(), HostError> {
    if driver.get_state().await? == MachineState::Stopped {
        return Err(HostError::NotRunning(name.to_string()));
    }
    Ok(())
}
