//! Azure backend driven through the `az` CLI

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::RegisteredDriver;
use super::{CreateFlag, Driver, DriverOptions, dial_target, tcp_url};
use crate::error::HostError;
use crate::provision::process::{SharedRunner, SuccessPolicy};
use crate::provision::{self, ENGINE_READY, SSH_READY, parse, ssh, userdata};
use crate::state::MachineState;

pub const DRIVER_NAME: &str = "azure";

const USER_DATA_FILE: &str = "user-data.yml";
const NOT_FOUND_MARKERS: &[&str] = &["ResourceNotFound", "ResourceGroupNotFound", "(NotFound)"];

pub fn registered() -> RegisteredDriver {
    RegisteredDriver {
        new: build,
        create_flags,
    }
}

fn build(store_path: &Path) -> Box<dyn Driver> {
    Box::new(AzureDriver::new(store_path))
}

fn create_flags() -> Vec<CreateFlag> {
    vec![
        CreateFlag::string("azure-subscription-id", "Azure subscription ID", ""),
        CreateFlag::string("azure-resource-group", "Azure resource group for the host", "docker-hosts"),
        CreateFlag::string("azure-name", "Azure VM name (generated when empty)", ""),
        CreateFlag::string("azure-location", "Azure location", "westus"),
        CreateFlag::string("azure-size", "Azure VM size", "Standard_B1s"),
        CreateFlag::string("azure-image", "Azure image name or URN", "Ubuntu2204"),
        CreateFlag::string("azure-username", "Azure admin username", "tcuser"),
        CreateFlag::int("azure-ssh-port", "Azure SSH port", 22),
        CreateFlag::int("azure-docker-port", "Azure docker port", 4243),
    ]
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AzureDriver {
    #[serde(rename = "Name")]
    pub machine_name: String,
    #[serde(rename = "SubscriptionID")]
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub size: String,
    pub image: String,
    pub user_name: String,
    #[serde(rename = "SSHPort")]
    pub ssh_port: u16,
    pub docker_port: u16,

    #[serde(skip)]
    store_path: PathBuf,
    #[serde(skip)]
    runner: SharedRunner,
}

impl AzureDriver {
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

    fn key_path(&self) -> PathBuf {
        ssh::private_key_path(&self.store_path)
    }

    fn scope(&self) -> Vec<String> {
        vec![
            "--subscription".to_string(),
            self.subscription_id.clone(),
            "--output".to_string(),
            "tsv".to_string(),
        ]
    }

    fn vm_args(&self, verb: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = ["vm"].iter().chain(verb).map(|s| s.to_string()).collect();
        args.extend([
            "--resource-group".to_string(),
            self.resource_group.clone(),
            "--name".to_string(),
            self.machine_name.clone(),
        ]);
        args.extend(self.scope());
        args
    }

    /// Run `az`, mapping "resource not found" diagnostics to `NotFound`
    async fn az(&self, operation: &str, args: Vec<String>) -> Result<String, HostError> {
        let output = self.runner.run("az", &args).await?;
        if !output.exit_ok() && NOT_FOUND_MARKERS.iter().any(|m| output.stderr.contains(m)) {
            return Err(HostError::NotFound(self.machine_name.clone()));
        }
        output.check(SuccessPolicy::ExitStatus, DRIVER_NAME, operation, &self.machine_name)
    }

    async fn wait_for_engine(&self) -> Result<(), HostError> {
        let ip = self.get_ip().await?;
        provision::wait_for_tcp(&dial_target(&ip, self.ssh_port), SSH_READY).await?;
        tracing::info!("Waiting for docker daemon on {} to be available", self.machine_name);
        provision::wait_for_tcp(&dial_target(&ip, self.docker_port), ENGINE_READY).await
    }

    fn set_machine_name_if_not_set(&mut self) {
        if self.machine_name.is_empty() {
            self.machine_name = provision::generate_machine_name();
        }
    }
}

#[async_trait]
impl Driver for AzureDriver {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn configure_from_options(&mut self, options: &DriverOptions) -> Result<(), HostError> {
        let options = &options.over_defaults(&create_flags());
        self.subscription_id = options.require(DRIVER_NAME, "azure-subscription-id")?;
        self.machine_name = options.string("azure-name");
        self.set_machine_name_if_not_set();
        self.resource_group = options.string("azure-resource-group");
        self.location = options.string("azure-location");
        self.size = options.string("azure-size");
        self.image = options.string("azure-image");
        self.user_name = options.string("azure-username");
        if self.user_name.eq_ignore_ascii_case("docker") {
            return Err(HostError::InvalidOption {
                option: "azure-username".to_string(),
                reason: "'docker' is reserved on docker hosts, choose another user name".to_string(),
            });
        }
        self.ssh_port = options.number("azure-ssh-port")?;
        self.docker_port = options.number("azure-docker-port")?;
        Ok(())
    }

    async fn create(&mut self) -> Result<(), HostError> {
        if self.subscription_id.is_empty() {
            return Err(HostError::missing_option(DRIVER_NAME, "azure-subscription-id"));
        }
        self.set_machine_name_if_not_set();

        tracing::info!("Creating resource group {}", self.resource_group);
        let mut args = provision::process::argv([
            "group",
            "create",
            "--name",
            self.resource_group.as_str(),
            "--location",
            self.location.as_str(),
        ]);
        args.extend(self.scope());
        self.az("create resource group", args).await?;

        tracing::info!("Generating SSH keypair...");
        ssh::generate_ssh_key(&*self.runner, &self.key_path()).await?;
        let public_key_path = ssh::public_key_path(&self.store_path);
        let public_key = ssh::read_public_key(&public_key_path)?;

        let user_data_path = self.store_path.join(USER_DATA_FILE);
        tokio::fs::write(
            &user_data_path,
            userdata::cloud_config(&public_key, &self.user_name, self.docker_port),
        )
        .await?;

        tracing::info!("Creating Azure VM {}", self.machine_name);
        let mut args = self.vm_args(&["create"]);
        args.extend(provision::process::argv([
            "--image",
            self.image.as_str(),
            "--size",
            self.size.as_str(),
            "--location",
            self.location.as_str(),
            "--admin-username",
            self.user_name.as_str(),
            "--ssh-key-values",
            super::path_str(&public_key_path).as_str(),
            "--custom-data",
            super::path_str(&user_data_path).as_str(),
            "--public-ip-sku",
            "Standard",
        ]));
        self.az("create vm", args).await?;

        let mut args = self.vm_args(&["open-port"]);
        args.extend(provision::process::argv([
            "--port".to_string(),
            self.docker_port.to_string(),
            "--priority".to_string(),
            "900".to_string(),
        ]));
        self.az("open port", args).await?;

        self.wait_for_engine().await
    }

    async fn start(&self) -> Result<(), HostError> {
        let state = self.get_state().await?;
        if matches!(state, MachineState::Running | MachineState::Starting) {
            tracing::info!("Azure host {} is already running or starting", self.machine_name);
            return Ok(());
        }
        self.az("start", self.vm_args(&["start"])).await?;
        self.wait_for_engine().await
    }

    async fn stop(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("Azure host {} is already stopped", self.machine_name);
            return Ok(());
        }
        self.az("stop", self.vm_args(&["stop"])).await?;
        Ok(())
    }

    async fn restart(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!(
                "Azure host {} is stopped, use start to run it",
                self.machine_name
            );
            return Ok(());
        }
        self.az("restart", self.vm_args(&["restart"])).await?;
        self.wait_for_engine().await
    }

    async fn kill(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("Azure host {} is already stopped", self.machine_name);
            return Ok(());
        }
        let mut args = self.vm_args(&["stop"]);
        args.push("--skip-shutdown".to_string());
        self.az("kill", args).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<(), HostError> {
        let mut args = self.vm_args(&["delete"]);
        args.push("--yes".to_string());
        match self.az("delete", args).await {
            Ok(_) => Ok(()),
            Err(HostError::NotFound(_)) => {
                tracing::info!("Azure host {} no longer exists", self.machine_name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn upgrade(&self) -> Result<(), HostError> {
        tracing::info!("Upgrade is not needed for Azure hosts, the engine is updated by the image");
        Ok(())
    }

    async fn get_state(&self) -> Result<MachineState, HostError> {
        let mut args = self.vm_args(&["get-instance-view"]);
        args.extend(provision::process::argv([
            "--query",
            "instanceView.statuses[?starts_with(code, 'PowerState/')].code",
        ]));
        let stdout = self.az("get state", args).await?;
        Ok(power_state(parse::first_line(&stdout).unwrap_or_default()))
    }

    async fn get_ip(&self) -> Result<String, HostError> {
        let mut args = self.vm_args(&["show"]);
        args.extend(provision::process::argv(["--show-details", "--query", "publicIps"]));
        let stdout = self.az("get ip", args).await?;
        parse::first_line(&stdout).map(str::to_string).ok_or_else(|| {
            HostError::backend(DRIVER_NAME, "get ip", &self.machine_name, "no public IP assigned")
        })
    }

    async fn get_url(&self) -> Result<String, HostError> {
        let ip = self.get_ip().await?;
        Ok(tcp_url(&ip, self.docker_port))
    }

    async fn get_ssh_command(&self, args: &[String]) -> Result<Command, HostError> {
        super::ensure_not_stopped(self, &self.machine_name).await?;
        let ip = self.get_ip().await?;
        Ok(ssh::ssh_command(
            &ip,
            self.ssh_port,
            self.user_name.as_str(),
            &self.key_path(),
            args,
        ))
    }

    fn save_config(&self) -> Result<Value, HostError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_config(&mut self, config: Value) -> Result<(), HostError> {
        let mut loaded: AzureDriver = serde_json::from_value(config)?;
        loaded.store_path = std::mem::take(&mut self.store_path);
        loaded.runner = self.runner.clone();
        *self = loaded;
        Ok(())
    }
}

/// Reduce a `PowerState/<x>` status code onto a machine state
fn power_state(code: &str) -> MachineState {
    match code.trim().strip_prefix("PowerState/").unwrap_or(code.trim()) {
        "running" => MachineState::Running,
        "starting" => MachineState::Starting,
        "stopped" | "deallocated" | "stopping" | "deallocating" => MachineState::Stopped,
        _ => MachineState::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::process::CommandOutput;
    use crate::provision::process::testing::scripted;
    use tempfile::TempDir;

    fn options() -> DriverOptions {
        DriverOptions::with_defaults(&create_flags())
            .with("azure-subscription-id", "sub-1")
            .with("azure-name", "docker-host-az")
    }

    fn configured(dir: &Path, runner: SharedRunner) -> AzureDriver {
        let mut driver = AzureDriver::new(dir).with_runner(runner);
        driver.configure_from_options(&options()).unwrap();
        driver
    }

    #[test]
    fn power_states_map_onto_machine_states() {
        assert_eq!(power_state("PowerState/running"), MachineState::Running);
        assert_eq!(power_state("PowerState/starting\n"), MachineState::Starting);
        assert_eq!(power_state("PowerState/stopped"), MachineState::Stopped);
        assert_eq!(power_state("PowerState/deallocated"), MachineState::Stopped);
        assert_eq!(power_state("PowerState/unknown"), MachineState::None);
        assert_eq!(power_state(""), MachineState::None);
    }

    #[test]
    fn configure_applies_defaults() {
        let driver = configured(Path::new("/tmp/h"), SharedRunner::default());
        assert_eq!(driver.resource_group, "docker-hosts");
        assert_eq!(driver.location, "westus");
        assert_eq!(driver.size, "Standard_B1s");
        assert_eq!(driver.user_name, "tcuser");
        assert_eq!(driver.ssh_port, 22);
        assert_eq!(driver.docker_port, 4243);
        assert_eq!(driver.machine_name, "docker-host-az");
    }

    #[test]
    fn configure_from_subscription_only_uses_flag_defaults() {
        let mut driver = AzureDriver::new(Path::new("/tmp/h"));
        driver
            .configure_from_options(&DriverOptions::new().with("azure-subscription-id", "sub-1"))
            .unwrap();
        assert_eq!(driver.resource_group, "docker-hosts");
        assert_eq!(driver.location, "westus");
        assert_eq!(driver.ssh_port, 22);
        assert_eq!(driver.docker_port, 4243);
    }

    #[test]
    fn configure_requires_subscription() {
        let options = DriverOptions::with_defaults(&create_flags());
        let err = AzureDriver::new(Path::new("/tmp/h"))
            .configure_from_options(&options)
            .unwrap_err();
        assert!(matches!(err, HostError::MissingRequiredOption { option, .. } if option == "azure-subscription-id"));
    }

    #[test]
    fn docker_user_name_is_rejected() {
        let options = options().with("azure-username", "Docker");
        let err = AzureDriver::new(Path::new("/tmp/h"))
            .configure_from_options(&options)
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidOption { option, .. } if option == "azure-username"));
    }

    #[tokio::test]
    async fn missing_vm_is_not_found_and_removal_succeeds() {
        let dir = TempDir::new().unwrap();
        let not_found = || {
            CommandOutput::failed(
                3,
                "ERROR: (ResourceNotFound) The Resource 'Microsoft.Compute/virtualMachines/docker-host-az' was not found.",
            )
        };
        let (runner, shared) = scripted(vec![not_found(), not_found()]);
        let driver = configured(dir.path(), shared);

        assert!(matches!(
            driver.get_state().await.unwrap_err(),
            HostError::NotFound(name) if name == "docker-host-az"
        ));
        driver.remove().await.unwrap();

        let lines = runner.command_lines();
        assert!(lines[1].starts_with("az vm delete --resource-group docker-hosts --name docker-host-az"));
        assert!(lines[1].ends_with("--yes"));
    }

    #[tokio::test]
    async fn kill_skips_guest_shutdown() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![
            CommandOutput::ok("PowerState/running\n"),
            CommandOutput::ok(""),
        ]);
        let driver = configured(dir.path(), shared);

        driver.kill().await.unwrap();

        let lines = runner.command_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("az vm stop "));
        assert!(lines[1].ends_with("--skip-shutdown"));
    }

    #[tokio::test]
    async fn restart_of_stopped_host_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![CommandOutput::ok("PowerState/deallocated\n")]);
        let driver = configured(dir.path(), shared);

        driver.restart().await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn stderr_warnings_do_not_fail_commands() {
        let dir = TempDir::new().unwrap();
        let (_runner, shared) = scripted(vec![CommandOutput {
            status: Some(0),
            stdout: "20.1.2.3\n".to_string(),
            stderr: "WARNING: preview command\n".to_string(),
        }]);
        let driver = configured(dir.path(), shared);

        assert_eq!(driver.get_url().await.unwrap(), "tcp://20.1.2.3:4243");
    }

    #[tokio::test]
    async fn ssh_refused_while_stopped() {
        let dir = TempDir::new().unwrap();
        let (_runner, shared) = scripted(vec![CommandOutput::ok("PowerState/stopped\n")]);
        let driver = configured(dir.path(), shared);

        assert!(driver.get_ssh_command(&[]).await.is_err());
    }

    #[test]
    fn config_round_trip_keeps_store_path() {
        let driver = configured(Path::new("/tmp/h1"), SharedRunner::default());
        let saved = driver.save_config().unwrap();
        assert_eq!(saved["Name"], "docker-host-az");
        assert_eq!(saved["SubscriptionID"], "sub-1");
        assert_eq!(saved["DockerPort"], 4243);

        let mut loaded = AzureDriver::new(Path::new("/tmp/h1"));
        loaded.load_config(saved).unwrap();
        assert_eq!(loaded.resource_group, "docker-hosts");
        assert_eq!(loaded.key_path(), Path::new("/tmp/h1/id_rsa"));
    }
}
