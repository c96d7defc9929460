//! In-memory driver for host and store tests

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::RegisteredDriver;
use super::{CreateFlag, Driver, DriverOptions, tcp_url};
use crate::error::HostError;
use crate::provision::ssh;
use crate::state::MachineState;

pub const DRIVER_NAME: &str = "fake";

pub fn registered() -> RegisteredDriver {
    RegisteredDriver {
        new: build,
        create_flags,
    }
}

fn build(store_path: &Path) -> Box<dyn Driver> {
    Box::new(FakeDriver::new(store_path))
}

fn create_flags() -> Vec<CreateFlag> {
    vec![
        CreateFlag::string("fake-label", "Free-form label", "plain"),
        CreateFlag::int("fake-memory", "Memory in MB", 512),
        CreateFlag::bool("fake-fail-create", "Fail during create"),
        CreateFlag::bool("fake-gone", "Backend machine already deleted"),
    ]
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FakeDriver {
    pub machine_name: String,
    pub label: String,
    pub memory: u32,
    pub fail_create: bool,
    pub gone: bool,
    #[serde(skip)]
    store_path: PathBuf,
    #[serde(skip)]
    state: Mutex<MachineState>,
}

impl FakeDriver {
    pub fn new(store_path: &Path) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            ..Default::default()
        }
    }

    fn set_state(&self, state: MachineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn configure_from_options(&mut self, options: &DriverOptions) -> Result<(), HostError> {
        let options = &options.over_defaults(&create_flags());
        self.label = options.string("fake-label");
        self.memory = options.number("fake-memory")?;
        self.fail_create = options.bool("fake-fail-create")?;
        self.gone = options.bool("fake-gone")?;
        Ok(())
    }

    async fn create(&mut self) -> Result<(), HostError> {
        // Key material lands in the store directory like a real backend
        std::fs::write(ssh::private_key_path(&self.store_path), "PRIVATE")?;
        if self.fail_create {
            return Err(HostError::backend(DRIVER_NAME, "create", "fake-vm", "quota exceeded"));
        }
        self.machine_name = "fake-vm".to_string();
        self.set_state(MachineState::Running);
        Ok(())
    }

    async fn start(&self) -> Result<(), HostError> {
        self.set_state(MachineState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<(), HostError> {
        self.set_state(MachineState::Stopped);
        Ok(())
    }

    async fn restart(&self) -> Result<(), HostError> {
        self.set_state(MachineState::Running);
        Ok(())
    }

    async fn kill(&self) -> Result<(), HostError> {
        self.set_state(MachineState::Stopped);
        Ok(())
    }

    async fn remove(&self) -> Result<(), HostError> {
        if self.gone {
            return Err(HostError::NotFound(self.machine_name.clone()));
        }
        Ok(())
    }

    async fn upgrade(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "upgrade"))
    }

    async fn get_state(&self) -> Result<MachineState, HostError> {
        Ok(*self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn get_ip(&self) -> Result<String, HostError> {
        super::ensure_running(self, &self.machine_name).await?;
        Ok("127.0.0.1".to_string())
    }

    async fn get_url(&self) -> Result<String, HostError> {
        Ok(tcp_url(&self.get_ip().await?, 2375))
    }

    async fn get_ssh_command(&self, args: &[String]) -> Result<Command, HostError> {
        let ip = self.get_ip().await?;
        Ok(ssh::ssh_command(
            &ip,
            22,
            "docker",
            &ssh::private_key_path(&self.store_path),
            args,
        ))
    }

    fn save_config(&self) -> Result<Value, HostError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_config(&mut self, config: Value) -> Result<(), HostError> {
        let mut loaded: FakeDriver = serde_json::from_value(config)?;
        loaded.store_path = std::mem::take(&mut self.store_path);
        *self = loaded;
        Ok(())
    }
}
