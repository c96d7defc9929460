//! Hyper-V backend driven through PowerShell cmdlets

mod powershell;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::powershell::{PowerShell, cmd, quote};
use super::registry::RegisteredDriver;
use super::{CreateFlag, Driver, DriverOptions, dial_target, tcp_url};
use crate::error::HostError;
use crate::provision::process::SharedRunner;
use crate::provision::{self, ENGINE_READY, PollSpec, SSH_READY, ssh};
use crate::state::MachineState;

pub const DRIVER_NAME: &str = "hyperv";

const ENGINE_PORT: u16 = 2376;
const SSH_PORT: u16 = 22;
const SSH_USER: &str = "docker";
const ISO_NAME: &str = "boot2docker.iso";
const GUEST_AUTHORIZED_KEYS: &str = "/home/docker/.ssh/authorized_keys";

const IP_READY: PollSpec = PollSpec::new(90, Duration::from_secs(2));
const STOPPED: PollSpec = PollSpec::new(60, Duration::from_secs(1));

pub fn registered() -> RegisteredDriver {
    RegisteredDriver {
        new: build,
        create_flags,
    }
}

fn build(store_path: &Path) -> Box<dyn Driver> {
    Box::new(HypervDriver::new(store_path))
}

fn create_flags() -> Vec<CreateFlag> {
    vec![
        CreateFlag::string(
            "hyperv-boot2docker-url",
            "The URL of the boot2docker image. Defaults to the latest available version",
            "",
        ),
        CreateFlag::string("hyperv-boot2docker-location", "Local boot2docker iso", ""),
        CreateFlag::string(
            "hyperv-virtual-switch",
            "Name of virtual switch. Defaults to first found",
            "",
        ),
        CreateFlag::int("hyperv-memory", "Memory size for host VM (in MB)", 1024),
    ]
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HypervDriver {
    pub machine_name: String,
    #[serde(rename = "Boot2DockerURL")]
    pub boot2docker_url: String,
    #[serde(rename = "Boot2DockerLoc")]
    pub boot2docker_location: String,
    #[serde(rename = "VSwitch")]
    pub virtual_switch: String,
    pub memory: u32,

    #[serde(skip)]
    store_path: PathBuf,
    #[serde(skip)]
    runner: SharedRunner,
}

impl HypervDriver {
    pub fn new(store_path: &Path) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            ..Default::default()
        }
    }

    #[cfg(test)]
    fn with_runner(mut self, runner: SharedRunner) -> Self {
        self.runner = runner;
        self
    }

    fn ps(&self) -> PowerShell<'_> {
        PowerShell::new(&*self.runner, &self.machine_name)
    }

    fn quoted_name(&self) -> String {
        quote(&self.machine_name)
    }

    fn iso_path(&self) -> PathBuf {
        self.store_path.join(ISO_NAME)
    }

    fn set_machine_name_if_not_set(&mut self) {
        if self.machine_name.is_empty() {
            self.machine_name = provision::generate_machine_name();
        }
    }

    /// Fetch the boot image from the configured location or URL
    async fn fetch_iso(&self) -> Result<(), HostError> {
        if self.boot2docker_location.is_empty() {
            tracing::info!("Downloading boot2docker...");
            provision::ensure_iso(
                &self.boot2docker_url,
                provision::DEFAULT_BOOT2DOCKER_URL,
                &self.iso_path(),
            )
            .await
        } else {
            tracing::info!("Copying boot2docker from {}", self.boot2docker_location);
            provision::copy_atomically(Path::new(&self.boot2docker_location), &self.iso_path())
                .await
        }
    }

    async fn choose_virtual_switch(&self) -> Result<String, HostError> {
        if !self.virtual_switch.is_empty() {
            return Ok(self.virtual_switch.clone());
        }
        let switch = self.ps().first_switch().await?;
        tracing::info!("Using switch {}", switch);
        Ok(switch)
    }

    async fn create_vm(&self, switch: &str) -> Result<(), HostError> {
        let name = self.quoted_name();
        let ps = self.ps();

        tracing::info!("Creating a new virtual machine");
        ps.execute(
            "create",
            &cmd(&[
                "New-VM",
                "-Name",
                &name,
                "-Path",
                &quote(&self.store_path.display().to_string()),
                "-MemoryStartupBytes",
                &format!("{}MB", self.memory),
            ]),
        )
        .await?;

        tracing::info!("Attaching boot image");
        ps.execute(
            "attach ISO",
            &cmd(&[
                "Set-VMDvdDrive",
                "-VMName",
                &name,
                "-Path",
                &quote(&self.iso_path().display().to_string()),
            ]),
        )
        .await?;

        tracing::info!("Connecting network adapter to virtual switch");
        ps.execute(
            "connect network",
            &cmd(&[
                "Connect-VMNetworkAdapter",
                "-VMName",
                &name,
                "-SwitchName",
                &quote(switch),
            ]),
        )
        .await?;

        ps.execute(
            "enable guest services",
            &cmd(&[
                "Enable-VMIntegrationService",
                "-VMName",
                &name,
                "-Name",
                "'Guest Service Interface'",
            ]),
        )
        .await?;
        Ok(())
    }

    async fn start_vm(&self) -> Result<(), HostError> {
        self.ps()
            .execute("start", &cmd(&["Start-VM", "-Name", &self.quoted_name()]))
            .await?;
        Ok(())
    }

    /// Poll until the first adapter reports an address
    async fn wait_for_ip(&self) -> Result<String, HostError> {
        tracing::info!("Waiting for host to start...");
        provision::poll_until("IP address", IP_READY, |_| async move {
            match self.get_ip().await {
                Ok(ip) => Some(ip),
                Err(e) => {
                    tracing::debug!("No IP yet: {}", e);
                    None
                }
            }
        })
        .await
    }

    async fn install_key(&self) -> Result<(), HostError> {
        let public_key = ssh::public_key_path(&self.store_path).display().to_string();
        self.ps()
            .execute(
                "copy key to guest",
                &cmd(&[
                    "Copy-VMFile",
                    "-Name",
                    &self.quoted_name(),
                    "-SourcePath",
                    &quote(&public_key),
                    "-DestinationPath",
                    &quote(GUEST_AUTHORIZED_KEYS),
                    "-FileSource",
                    "Host",
                    "-CreateFullPath",
                    "-Force",
                ]),
            )
            .await?;
        Ok(())
    }

    /// Start and wait until SSH answers
    async fn boot(&self) -> Result<String, HostError> {
        self.start_vm().await?;
        let ip = self.wait_for_ip().await?;
        provision::wait_for_tcp(&dial_target(&ip, SSH_PORT), SSH_READY).await?;
        Ok(ip)
    }
}

#[async_trait]
impl Driver for HypervDriver {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn configure_from_options(&mut self, options: &DriverOptions) -> Result<(), HostError> {
        let options = &options.over_defaults(&create_flags());
        self.boot2docker_url = options.string("hyperv-boot2docker-url");
        self.boot2docker_location = options.string("hyperv-boot2docker-location");
        self.virtual_switch = options.string("hyperv-virtual-switch");
        self.memory = options.number("hyperv-memory")?;
        if self.memory == 0 {
            self.memory = 1024;
        }

        if !self.boot2docker_location.is_empty() && !Path::new(&self.boot2docker_location).is_file() {
            return Err(HostError::InvalidOption {
                option: "hyperv-boot2docker-location".to_string(),
                reason: format!("{} is not a file", self.boot2docker_location),
            });
        }
        Ok(())
    }

    async fn create(&mut self) -> Result<(), HostError> {
        self.set_machine_name_if_not_set();
        self.ps().ensure_available().await?;

        match self.get_state().await {
            Err(HostError::NotFound(_)) => {}
            Ok(_) => return Err(HostError::AlreadyExists(self.machine_name.clone())),
            Err(e) => return Err(e),
        }

        self.fetch_iso().await?;

        tracing::info!("Creating SSH key...");
        ssh::generate_ssh_key(&*self.runner, &ssh::private_key_path(&self.store_path)).await?;

        tracing::info!("Creating VM...");
        let switch = self.choose_virtual_switch().await?;
        self.create_vm(&switch).await?;

        tracing::info!("Starting VM...");
        self.start_vm().await?;
        let ip = self.wait_for_ip().await?;

        self.install_key().await?;

        provision::wait_for_tcp(&dial_target(&ip, SSH_PORT), SSH_READY).await?;
        provision::wait_for_tcp(&dial_target(&ip, ENGINE_PORT), ENGINE_READY).await?;
        Ok(())
    }

    async fn start(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Running {
            tracing::info!("VM {} is already running", self.machine_name);
            return Ok(());
        }
        self.boot().await.map(|_| ())
    }

    async fn stop(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("VM {} is already stopped", self.machine_name);
            return Ok(());
        }
        self.ps()
            .execute("stop", &cmd(&["Stop-VM", "-Name", &self.quoted_name()]))
            .await?;

        provision::poll_until(&format!("{} to stop", self.machine_name), STOPPED, |_| async move {
            match self.get_state().await {
                Ok(MachineState::Running) => None,
                Ok(state) => Some(Ok(state)),
                Err(e) => Some(Err(e)),
            }
        })
        .await??;
        Ok(())
    }

    async fn restart(&self) -> Result<(), HostError> {
        if self.get_state().await? != MachineState::Running {
            return self.start().await;
        }
        self.ps()
            .execute(
                "restart",
                &cmd(&["Restart-VM", "-Name", &self.quoted_name(), "-Force"]),
            )
            .await?;
        self.wait_for_ip().await.map(|_| ())
    }

    async fn kill(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("VM {} is already stopped", self.machine_name);
            return Ok(());
        }
        self.ps()
            .execute(
                "kill",
                &cmd(&["Stop-VM", "-Name", &self.quoted_name(), "-TurnOff"]),
            )
            .await?;
        Ok(())
    }

    async fn remove(&self) -> Result<(), HostError> {
        let state = self.get_state().await?;
        if state == MachineState::Running {
            self.kill().await?;
        }
        self.ps()
            .execute(
                "remove",
                &cmd(&["Remove-VM", "-Name", &self.quoted_name(), "-Force"]),
            )
            .await?;
        Ok(())
    }

    /// Refresh the boot image and boot into it
    async fn upgrade(&self) -> Result<(), HostError> {
        self.stop().await?;
        let iso = self.iso_path();
        if iso.exists() {
            std::fs::remove_file(&iso)?;
        }
        self.fetch_iso().await?;
        self.boot().await.map(|_| ())
    }

    async fn get_state(&self) -> Result<MachineState, HostError> {
        let lines = self
            .ps()
            .lines(
                "get state",
                &cmd(&["(", "Get-VM", "-Name", &self.quoted_name(), ").state"]),
            )
            .await?;
        Ok(lines
            .first()
            .map(|s| vm_state(s))
            .unwrap_or(MachineState::None))
    }

    async fn get_ip(&self) -> Result<String, HostError> {
        let lines = self
            .ps()
            .lines(
                "get IP",
                &cmd(&[
                    "((",
                    "Get-VM",
                    "-Name",
                    &self.quoted_name(),
                    ").networkadapters[0]).ipaddresses[0]",
                ]),
            )
            .await?;
        lines
            .into_iter()
            .next()
            .ok_or_else(|| HostError::backend("hyperv", "get IP", &self.machine_name, "IP not found"))
    }

    async fn get_url(&self) -> Result<String, HostError> {
        let ip = self.get_ip().await?;
        Ok(tcp_url(&ip, ENGINE_PORT))
    }

    async fn get_ssh_command(&self, args: &[String]) -> Result<Command, HostError> {
        super::ensure_not_stopped(self, &self.machine_name).await?;
        let ip = self.get_ip().await?;
        Ok(ssh::ssh_command(
            &ip,
            SSH_PORT,
            SSH_USER,
            &ssh::private_key_path(&self.store_path),
            args,
        ))
    }

    fn save_config(&self) -> Result<Value, HostError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_config(&mut self, config: Value) -> Result<(), HostError> {
        let mut loaded: HypervDriver = serde_json::from_value(config)?;
        loaded.store_path = std::mem::take(&mut self.store_path);
        loaded.runner = self.runner.clone();
        *self = loaded;
        Ok(())
    }
}

/// Reduce a Hyper-V `VMState` name onto a machine state
fn vm_state(state: &str) -> MachineState {
    match state.trim() {
        "Running" => MachineState::Running,
        "Starting" => MachineState::Starting,
        "Off" | "Saved" | "Paused" => MachineState::Stopped,
        _ => MachineState::None,
    }
}
