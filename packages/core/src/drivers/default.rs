//! Stand-in driver for the pre-existing local engine
//!
//! Backs the `"default"` host. It is not registered and never persisted;
//! every operation that would change the machine is unsupported.

use std::process::Command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Driver, DriverOptions};
use crate::error::HostError;
use crate::state::MachineState;

pub const DRIVER_NAME: &str = "none";

/// Local engine endpoint used when `DOCKER_HOST` is unset
pub const DEFAULT_ENGINE_URL: &str = "unix:///var/run/docker.sock";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultDriver {
    #[serde(rename = "URL")]
    pub url: String,
}

impl DefaultDriver {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint from `DOCKER_HOST`, falling back to the local socket
    pub fn from_env() -> Self {
        let url = std::env::var("DOCKER_HOST")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string());
        Self::new(url)
    }

    fn url_or_default(&self) -> &str {
        if self.url.is_empty() {
            DEFAULT_ENGINE_URL
        } else {
            &self.url
        }
    }
}

#[async_trait]
impl Driver for DefaultDriver {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn configure_from_options(&mut self, _options: &DriverOptions) -> Result<(), HostError> {
        Ok(())
    }

    async fn create(&mut self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "create"))
    }

    async fn start(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "start"))
    }

    async fn stop(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "stop"))
    }

    async fn restart(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "restart"))
    }

    async fn kill(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "kill"))
    }

    async fn remove(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "remove"))
    }

    async fn upgrade(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "upgrade"))
    }

    async fn get_state(&self) -> Result<MachineState, HostError> {
        Ok(MachineState::Running)
    }

    async fn get_ip(&self) -> Result<String, HostError> {
        let url = self.url_or_default();
        let (proto, addr) = url.split_once("://").unwrap_or(("tcp", url));
        if proto == "unix" {
            return Ok("localhost".to_string());
        }
        let host = match addr.rsplit_once(':') {
            Some((host, _port)) => host,
            None => addr,
        };
        Ok(host.to_string())
    }

    async fn get_url(&self) -> Result<String, HostError> {
        Ok(self.url_or_default().to_string())
    }

    async fn get_ssh_command(&self, _args: &[String]) -> Result<Command, HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "ssh"))
    }

    fn save_config(&self) -> Result<Value, HostError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_config(&mut self, config: Value) -> Result<(), HostError> {
        *self = serde_json::from_value(config)?;
        Ok(())
    }
}
