//! vSphere backend driven through `govc`

mod govc;

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::govc::VcConn;
use super::registry::RegisteredDriver;
use super::{CreateFlag, Driver, DriverOptions, dial_target, tcp_url};
use crate::error::HostError;
use crate::provision::process::SharedRunner;
use crate::provision::{self, ENGINE_READY, SSH_READY, ssh};
use crate::state::MachineState;

pub const DRIVER_NAME: &str = "vsphere";

const ENGINE_PORT: u16 = 2375;
const SSH_USER: &str = "docker";
const GUEST_LOGIN: &str = "docker:tcuser";
const GUEST_SSH_DIR: &str = "/home/docker/.ssh";

pub fn registered() -> RegisteredDriver {
    RegisteredDriver {
        new: build,
        create_flags,
    }
}

fn build(store_path: &Path) -> Box<dyn Driver> {
    Box::new(VsphereDriver::new(store_path))
}

fn create_flags() -> Vec<CreateFlag> {
    vec![
        CreateFlag::int("vsphere-cpu", "vSphere CPU number for docker VM", 2),
        CreateFlag::int("vsphere-memory", "vSphere size of memory for docker VM (in MB)", 2048),
        CreateFlag::int("vsphere-disk-size", "vSphere size of disk for docker VM (in MB)", 20000),
        CreateFlag::string("vsphere-boot2docker-url", "vSphere URL for boot2docker image", ""),
        CreateFlag::string("vsphere-vcenter", "vSphere IP/hostname for vCenter", ""),
        CreateFlag::string("vsphere-username", "vSphere username", ""),
        CreateFlag::string("vsphere-password", "vSphere password", ""),
        CreateFlag::string("vsphere-network", "vSphere network where the docker VM will be attached", ""),
        CreateFlag::string("vsphere-datastore", "vSphere datastore for docker VM", ""),
        CreateFlag::string("vsphere-datacenter", "vSphere datacenter for docker VM", ""),
        CreateFlag::string("vsphere-pool", "vSphere resource pool for docker VM", ""),
        CreateFlag::string("vsphere-compute-ip", "vSphere compute host IP where the docker VM will be instantiated", ""),
    ]
}

/// Required options, in the order they are checked
const REQUIRED: &[&str] = &[
    "vsphere-vcenter",
    "vsphere-username",
    "vsphere-password",
    "vsphere-network",
    "vsphere-datastore",
    "vsphere-datacenter",
];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct VsphereDriver {
    pub machine_name: String,
    #[serde(rename = "SSHPort")]
    pub ssh_port: u16,
    #[serde(rename = "CPU")]
    pub cpu: u32,
    pub memory: u32,
    pub disk_size: u32,
    #[serde(rename = "Boot2DockerURL")]
    pub boot2docker_url: String,
    #[serde(rename = "IP")]
    pub vcenter: String,
    pub username: String,
    pub password: String,
    pub network: String,
    pub datastore: String,
    pub datacenter: String,
    pub pool: String,
    #[serde(rename = "HostIP")]
    pub compute_ip: String,

    #[serde(skip)]
    store_path: PathBuf,
    #[serde(skip)]
    runner: SharedRunner,
}

impl VsphereDriver {
    pub fn new(store_path: &Path) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            ssh_port: 22,
            ..Default::default()
        }
    }

    #[cfg(test)]
    fn with_runner(mut self, runner: SharedRunner) -> Self {
        self.runner = runner;
        self
    }

    fn iso_path(&self) -> PathBuf {
        self.store_path.join(govc::ISO_NAME)
    }

    fn key_path(&self) -> PathBuf {
        ssh::private_key_path(&self.store_path)
    }

    /// Every required vCenter setting must be present before touching it
    fn check_config(&self) -> Result<(), HostError> {
        let values = [
            &self.vcenter,
            &self.username,
            &self.password,
            &self.network,
            &self.datastore,
            &self.datacenter,
        ];
        for (option, value) in REQUIRED.iter().zip(values) {
            if value.is_empty() {
                return Err(HostError::missing_option(DRIVER_NAME, option));
            }
        }
        Ok(())
    }

    fn set_machine_name_if_not_set(&mut self) {
        if self.machine_name.is_empty() {
            self.machine_name = provision::generate_machine_name();
        }
    }

    /// Power on, wait for guest tools, then install the public key
    async fn power_on_and_install_key(&self) -> Result<(), HostError> {
        let conn = VcConn::new(self);
        conn.vm_power_on().await?;

        // vm.ip returns once the guest tools are up, which guest operations need
        let ip = conn.vm_fetch_ip().await?;
        tracing::debug!("Virtual machine {} reported address {}", self.machine_name, ip);

        tracing::info!("Configuring virtual machine {}", self.machine_name);
        conn.guest_mkdir(GUEST_LOGIN, GUEST_SSH_DIR).await?;
        conn.guest_upload(
            GUEST_LOGIN,
            &ssh::public_key_path(&self.store_path),
            &format!("{GUEST_SSH_DIR}/authorized_keys"),
        )
        .await
    }
}

#[async_trait]
impl Driver for VsphereDriver {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn configure_from_options(&mut self, options: &DriverOptions) -> Result<(), HostError> {
        let options = &options.over_defaults(&create_flags());
        for option in REQUIRED {
            options.require(DRIVER_NAME, option)?;
        }

        self.set_machine_name_if_not_set();
        self.ssh_port = 22;
        self.cpu = options.number("vsphere-cpu")?;
        self.memory = options.number("vsphere-memory")?;
        self.disk_size = options.number("vsphere-disk-size")?;
        self.boot2docker_url = options.string("vsphere-boot2docker-url");
        self.vcenter = options.string("vsphere-vcenter");
        self.username = options.string("vsphere-username");
        self.password = options.string("vsphere-password");
        self.network = options.string("vsphere-network");
        self.datastore = options.string("vsphere-datastore");
        self.datacenter = options.string("vsphere-datacenter");
        self.pool = options.string("vsphere-pool");
        self.compute_ip = options.string("vsphere-compute-ip");

        if self.cpu == 0 {
            return Err(HostError::InvalidOption {
                option: "vsphere-cpu".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    async fn create(&mut self) -> Result<(), HostError> {
        self.set_machine_name_if_not_set();
        self.check_config()?;

        tracing::info!("Downloading boot2docker...");
        provision::ensure_iso(
            &self.boot2docker_url,
            provision::DEFAULT_BOOT2DOCKER_URL,
            &self.iso_path(),
        )
        .await?;

        tracing::info!("Generating SSH keypair...");
        ssh::generate_ssh_key(&*self.runner, &self.key_path()).await?;

        let conn = VcConn::new(self);
        tracing::info!("Uploading boot2docker ISO...");
        conn.datastore_mkdir(govc::DATASTORE_DIR).await?;
        conn.datastore_upload(&self.iso_path()).await?;

        conn.vm_create(&govc::iso_datastore_path()).await?;

        tracing::info!("Configuring the virtual machine {}", self.machine_name);
        conn.vm_disk_create().await?;
        conn.vm_attach_network().await?;

        self.start().await?;

        let ip = self.get_ip().await?;
        provision::wait_for_tcp(&dial_target(&ip, self.ssh_port), SSH_READY).await?;
        provision::wait_for_tcp(&dial_target(&ip, ENGINE_PORT), ENGINE_READY).await?;
        Ok(())
    }

    async fn start(&self) -> Result<(), HostError> {
        match self.get_state().await? {
            MachineState::Running => {
                tracing::info!("VM {} has already been started", self.machine_name);
                Ok(())
            }
            MachineState::Stopped => self.power_on_and_install_key().await,
            state => Err(HostError::InvalidState {
                name: self.machine_name.clone(),
                operation: "start".to_string(),
                state,
            }),
        }
    }

    async fn stop(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("VM {} is already stopped", self.machine_name);
            return Ok(());
        }
        VcConn::new(self).vm_power_off().await
    }

    async fn restart(&self) -> Result<(), HostError> {
        if self.get_state().await? != MachineState::Running {
            return self.start().await;
        }
        VcConn::new(self).vm_reset().await
    }

    async fn kill(&self) -> Result<(), HostError> {
        self.stop().await
    }

    async fn remove(&self) -> Result<(), HostError> {
        let state = self.get_state().await?;

        let conn = VcConn::new(self);
        if state == MachineState::Running {
            conn.vm_power_off().await?;
        }
        conn.vm_destroy().await
    }

    async fn upgrade(&self) -> Result<(), HostError> {
        Err(HostError::unsupported(DRIVER_NAME, "upgrade"))
    }

    async fn get_state(&self) -> Result<MachineState, HostError> {
        let info = VcConn::new(self)
            .vm_info()
            .await?
            .ok_or_else(|| HostError::NotFound(self.machine_name.clone()))?;
        Ok(power_state(&info))
    }

    async fn get_ip(&self) -> Result<String, HostError> {
        super::ensure_running(self, &self.machine_name).await?;
        VcConn::new(self).vm_fetch_ip().await
    }

    async fn get_url(&self) -> Result<String, HostError> {
        let ip = self.get_ip().await?;
        Ok(tcp_url(&ip, ENGINE_PORT))
    }

    async fn get_ssh_command(&self, args: &[String]) -> Result<Command, HostError> {
        let ip = self.get_ip().await?;
        Ok(ssh::ssh_command(
            &ip,
            self.ssh_port,
            SSH_USER,
            &self.key_path(),
            args,
        ))
    }

    fn save_config(&self) -> Result<Value, HostError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_config(&mut self, config: Value) -> Result<(), HostError> {
        let mut loaded: VsphereDriver = serde_json::from_value(config)?;
        loaded.store_path = std::mem::take(&mut self.store_path);
        loaded.runner = self.runner.clone();
        *self = loaded;
        Ok(())
    }
}

/// Reduce `vm.info` power state text onto a machine state
fn power_state(info: &str) -> MachineState {
    if info.contains("poweredOn") {
        MachineState::Running
    } else if info.contains("poweredOff") {
        MachineState::Stopped
    } else {
        MachineState::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::process::CommandOutput;
    use crate::host::Host;
    use crate::provision::process::testing::scripted;
    use tempfile::TempDir;

    fn info(power: &str) -> CommandOutput {
        CommandOutput::ok(format!(
            "Name:           docker-host-abc\n  Path:         /dc1/vm/docker-host-abc\n  Power state:  {power}\n"
        ))
    }

    fn configured(dir: &Path, runner: SharedRunner) -> VsphereDriver {
        let mut driver = VsphereDriver::new(dir).with_runner(runner);
        driver.machine_name = "docker-host-abc".to_string();
        driver.vcenter = "vc.local".to_string();
        driver.username = "admin".to_string();
        driver.password = "secret".to_string();
        driver.network = "VM Network".to_string();
        driver.datastore = "ds1".to_string();
        driver.datacenter = "dc1".to_string();
        driver
    }

    fn full_options() -> DriverOptions {
        let mut options = DriverOptions::with_defaults(&create_flags());
        for (key, value) in [
            ("vsphere-vcenter", "vc.local"),
            ("vsphere-username", "admin"),
            ("vsphere-password", "secret"),
            ("vsphere-network", "VM Network"),
            ("vsphere-datastore", "ds1"),
            ("vsphere-datacenter", "dc1"),
        ] {
            options.set(key, value);
        }
        options
    }

    #[test]
    fn power_states_map_onto_machine_states() {
        assert_eq!(power_state("Power state: poweredOn"), MachineState::Running);
        assert_eq!(power_state("Power state: poweredOff"), MachineState::Stopped);
        assert_eq!(power_state("Power state: suspended"), MachineState::None);
        assert_eq!(power_state(""), MachineState::None);
    }

    #[test]
    fn configure_applies_defaults() {
        let mut driver = VsphereDriver::new(Path::new("/tmp/h"));
        driver.configure_from_options(&full_options()).unwrap();
        assert_eq!(driver.cpu, 2);
        assert_eq!(driver.memory, 2048);
        assert_eq!(driver.disk_size, 20000);
        assert_eq!(driver.ssh_port, 22);
        assert!(driver.machine_name.starts_with("docker-host-"));
    }

    #[test]
    fn configure_from_required_options_uses_flag_defaults() {
        let mut options = DriverOptions::new();
        for key in REQUIRED {
            options.set(*key, "x");
        }
        let mut driver = VsphereDriver::new(Path::new("/tmp/h"));
        driver.configure_from_options(&options).unwrap();
        assert_eq!(driver.cpu, 2);
        assert_eq!(driver.memory, 2048);
        assert_eq!(driver.disk_size, 20000);
    }

    #[test]
    fn configure_names_each_missing_option() {
        for missing in REQUIRED {
            let mut options = full_options();
            options.set(*missing, "");
            let err = VsphereDriver::new(Path::new("/tmp/h"))
                .configure_from_options(&options)
                .unwrap_err();
            assert!(
                matches!(&err, HostError::MissingRequiredOption { option, .. } if option == missing),
                "{missing}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn create_with_incomplete_config_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![]);
        let mut driver = configured(dir.path(), shared);
        driver.datastore.clear();

        let err = driver.create().await.unwrap_err();

        assert!(matches!(err, HostError::MissingRequiredOption { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn ip_and_url_require_running_vm() {
        let dir = TempDir::new().unwrap();
        let (_runner, shared) = scripted(vec![info("poweredOff"), info("poweredOff")]);
        let driver = configured(dir.path(), shared);

        assert!(matches!(
            driver.get_ip().await.unwrap_err(),
            HostError::NotRunning(_)
        ));
        assert!(matches!(
            driver.get_url().await.unwrap_err(),
            HostError::NotRunning(_)
        ));
    }

    #[tokio::test]
    async fn url_uses_first_reported_address() {
        let dir = TempDir::new().unwrap();
        let (_runner, shared) = scripted(vec![
            info("poweredOn"),
            CommandOutput::ok("10.20.30.40\nfe80::1\n"),
        ]);
        let driver = configured(dir.path(), shared);

        assert_eq!(driver.get_url().await.unwrap(), "tcp://10.20.30.40:2375");
    }

    #[tokio::test]
    async fn stderr_output_is_a_vm_error() {
        let dir = TempDir::new().unwrap();
        let (_runner, shared) = scripted(vec![
            info("poweredOff"),
            CommandOutput {
                status: Some(0),
                stdout: String::new(),
                stderr: "govc: insufficient privileges\n".to_string(),
            },
        ]);
        let driver = configured(dir.path(), shared);

        let err = driver.start().await.unwrap_err();
        match err {
            HostError::BackendOperationFailed {
                backend,
                operation,
                resource,
                message,
            } => {
                assert_eq!(backend, "vm");
                assert_eq!(operation, "power on");
                assert_eq!(resource, "docker-host-abc");
                assert_eq!(message, "govc: insufficient privileges");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_powers_on_and_installs_key() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![
            info("poweredOff"),
            CommandOutput::ok(""),
            CommandOutput::ok("10.0.0.8\n"),
            CommandOutput::ok(""),
            CommandOutput::ok(""),
        ]);
        let driver = configured(dir.path(), shared);

        driver.start().await.unwrap();

        let commands: Vec<String> = runner.calls().into_iter().map(|(_, a)| a[0].clone()).collect();
        assert_eq!(
            commands,
            vec!["vm.info", "vm.power", "vm.ip", "guest.mkdir", "guest.upload"]
        );
        let upload = &runner.calls()[4].1;
        assert!(upload.contains(&"--l=docker:tcuser".to_string()));
        assert_eq!(upload.last().unwrap(), "/home/docker/.ssh/authorized_keys");
    }

    #[tokio::test]
    async fn start_when_running_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![info("poweredOn")]);
        let driver = configured(dir.path(), shared);

        driver.start().await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn start_in_unknown_state_is_invalid() {
        let dir = TempDir::new().unwrap();
        let (_runner, shared) = scripted(vec![info("suspended")]);
        let driver = configured(dir.path(), shared);

        let err = driver.start().await.unwrap_err();
        assert!(matches!(err, HostError::InvalidState { state: MachineState::None, .. }));
    }

    #[tokio::test]
    async fn remove_powers_off_running_vm_first() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![
            info("poweredOn"),
            CommandOutput::ok(""),
            CommandOutput::ok(""),
        ]);
        let driver = configured(dir.path(), shared);

        driver.remove().await.unwrap();

        let lines = runner.command_lines();
        assert!(lines[1].contains("vm.power") && lines[1].contains("-off"));
        assert!(lines[2].starts_with("govc vm.destroy"));
    }

    fn vm_gone() -> CommandOutput {
        CommandOutput::failed(1, "govc: vm 'docker-host-abc' not found")
    }

    #[tokio::test]
    async fn remove_of_missing_vm_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![vm_gone()]);
        let driver = configured(dir.path(), shared);

        assert!(driver.remove().await.unwrap_err().is_not_found());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn host_keeps_directory_of_vanished_vm_unless_forced() {
        let root = TempDir::new().unwrap();
        let store_path = root.path().join("web1");
        std::fs::create_dir(&store_path).unwrap();
        let (runner, shared) = scripted(vec![vm_gone(), vm_gone()]);
        let host = Host {
            name: "web1".to_string(),
            driver_name: DRIVER_NAME.to_string(),
            driver: Box::new(configured(&store_path, shared)),
            store_path: store_path.clone(),
        };

        assert!(host.remove(false).await.unwrap_err().is_not_found());
        assert!(store_path.exists());

        host.remove(true).await.unwrap();
        assert!(!store_path.exists());
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn upload_skipped_when_iso_present() {
        let dir = TempDir::new().unwrap();
        let (runner, shared) = scripted(vec![CommandOutput::ok("boot2docker.iso\n")]);
        let driver = configured(dir.path(), shared);

        VcConn::new(&driver)
            .datastore_upload(&driver.iso_path())
            .await
            .unwrap();

        assert_eq!(runner.calls().len(), 1);
        assert_eq!(runner.calls()[0].1[0], "datastore.ls");
    }

    #[test]
    fn config_round_trip_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let (_runner, shared) = scripted(vec![]);
        let mut original = configured(dir.path(), shared);
        original.pool = "pool1".to_string();
        original.compute_ip = "10.1.1.1".to_string();
        original.cpu = 4;

        let saved = original.save_config().unwrap();
        assert_eq!(saved["IP"], "vc.local");
        assert_eq!(saved["CPU"], 4);

        let mut restored = VsphereDriver::new(dir.path());
        restored.load_config(saved.clone()).unwrap();
        assert_eq!(restored.save_config().unwrap(), saved);
        assert_eq!(restored.store_path, dir.path());
    }
}
