//! VMware Fusion backend driven through `vmrun` and `vmware-vdiskmanager`

mod vmx;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::RegisteredDriver;
use super::{CreateFlag, Driver, DriverOptions, dial_target, tcp_url};
use crate::error::HostError;
use crate::provision::process::{SharedRunner, SuccessPolicy, resolve_program};
use crate::provision::{self, ENGINE_READY, PollSpec, SSH_READY, parse, ssh};
use crate::state::MachineState;

pub const DRIVER_NAME: &str = "fusion";

const ENGINE_PORT: u16 = 2375;
const SSH_PORT: u16 = 22;
const SSH_USER: &str = "docker";
const GUEST_USER: &str = "docker";
const GUEST_PASSWORD: &str = "tcuser";
const GUEST_SSH_DIR: &str = "/home/docker/.ssh";
const ISO_NAME: &str = "boot2docker.iso";

const FUSION_LIBRARY: &str = "/Applications/VMware Fusion.app/Contents/Library";

/// DHCP lease table of the NAT vmnet interface
pub const DEFAULT_LEASES_FILE: &str = "/var/db/vmware/vmnet-dhcpd-vmnet8.leases";

/// Fusion reports errors on stdout with a zero exit code
const POLICY: SuccessPolicy = SuccessPolicy::ExitStatusAndNoErrorLine;

const IP_READY: PollSpec = PollSpec::new(60, Duration::from_secs(2));

pub fn registered() -> RegisteredDriver {
    RegisteredDriver {
        new: build,
        create_flags,
    }
}

fn build(store_path: &Path) -> Box<dyn Driver> {
    Box::new(FusionDriver::new(store_path))
}

fn create_flags() -> Vec<CreateFlag> {
    vec![
        CreateFlag::string("fusion-boot2docker-url", "Fusion URL for boot2docker image", ""),
        CreateFlag::int("fusion-memory", "Fusion size of memory for host VM (in MB)", 1024),
        CreateFlag::int("fusion-cpu-count", "Fusion number of CPUs for host VM", 1),
        CreateFlag::int("fusion-disk-size", "Fusion size of disk for host VM (in MB)", 20000),
    ]
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FusionDriver {
    pub machine_name: String,
    pub memory: u32,
    #[serde(rename = "CPU")]
    pub cpu_count: u32,
    pub disk_size: u32,
    #[serde(rename = "Boot2DockerURL")]
    pub boot2docker_url: String,

    #[serde(skip)]
    store_path: PathBuf,
    #[serde(skip)]
    leases_file: PathBuf,
    #[serde(skip)]
    runner: SharedRunner,
}

impl FusionDriver {
    pub fn new(store_path: &Path) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            leases_file: PathBuf::from(DEFAULT_LEASES_FILE),
            ..Default::default()
        }
    }

    #[cfg(test)]
    fn with_runner(mut self, runner: SharedRunner) -> Self {
        self.runner = runner;
        self
    }

    fn vmx_path(&self) -> PathBuf {
        self.store_path.join(format!("{}.vmx", self.machine_name))
    }

    fn vmdk_path(&self) -> PathBuf {
        self.store_path.join(format!("{}.vmdk", self.machine_name))
    }

    fn iso_path(&self) -> PathBuf {
        self.store_path.join(ISO_NAME)
    }

    fn vmx_str(&self) -> String {
        self.vmx_path().display().to_string()
    }

    /// Run `vmrun -T fusion <args>` and apply the stdout error policy
    async fn vmrun(&self, operation: &str, args: &[&str]) -> Result<String, HostError> {
        let program = resolve_program("vmrun", &[&format!("{FUSION_LIBRARY}/vmrun")]);
        let mut argv = vec!["-T".to_string(), "fusion".to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        self.runner
            .run(&program, &argv)
            .await?
            .check(POLICY, "vmrun", operation, &self.machine_name)
    }

    async fn vmrun_guest(&self, operation: &str, args: &[&str]) -> Result<String, HostError> {
        let mut argv = vec!["-gu", GUEST_USER, "-gp", GUEST_PASSWORD];
        argv.extend_from_slice(args);
        self.vmrun(operation, &argv).await
    }

    async fn create_disk(&self) -> Result<(), HostError> {
        let program = resolve_program(
            "vmware-vdiskmanager",
            &[&format!("{FUSION_LIBRARY}/vmware-vdiskmanager")],
        );
        let args = vec![
            "-c".to_string(),
            "-t".to_string(),
            "0".to_string(),
            "-s".to_string(),
            format!("{}MB", self.disk_size),
            "-a".to_string(),
            "lsilogic".to_string(),
            self.vmdk_path().display().to_string(),
        ];
        self.runner
            .run(&program, &args)
            .await?
            .check(POLICY, "vdiskmanager", "create disk", &self.machine_name)?;
        Ok(())
    }

    /// Copy the public key into the guest through the VMware tools channel
    async fn install_key(&self) -> Result<(), HostError> {
        let vmx = self.vmx_str();
        let public_key = ssh::public_key_path(&self.store_path).display().to_string();
        let authorized_keys = format!("{GUEST_SSH_DIR}/authorized_keys");

        self.vmrun_guest("create guest directory", &["createDirectoryInGuest", &vmx, GUEST_SSH_DIR])
            .await?;
        self.vmrun_guest(
            "copy key to guest",
            &["CopyFileFromHostToGuest", &vmx, &public_key, &authorized_keys],
        )
        .await?;
        Ok(())
    }

    /// Address leased to the VM's generated MAC
    fn lease_ip(&self) -> Result<String, HostError> {
        let vmx = std::fs::read_to_string(self.vmx_path())?;
        let mac = parse::vmx_mac_address(&vmx).ok_or_else(|| {
            HostError::backend("fusion", "lookup IP", &self.machine_name, "no MAC address in VMX file")
        })?;
        let leases = std::fs::read_to_string(&self.leases_file)?;
        parse::lease_ip_for_mac(&leases, &mac).ok_or_else(|| {
            HostError::backend(
                "fusion",
                "lookup IP",
                &self.machine_name,
                format!("IP not found for MAC {mac} in DHCP leases"),
            )
        })
    }
}

#[async_trait]
impl Driver for FusionDriver {
    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn configure_from_options(&mut self, options: &DriverOptions) -> Result<(), HostError> {
        let options = &options.over_defaults(&create_flags());
        self.memory = options.number("fusion-memory")?;
        self.cpu_count = options.number("fusion-cpu-count")?;
        self.disk_size = options.number("fusion-disk-size")?;
        self.boot2docker_url = options.string("fusion-boot2docker-url");
        self.machine_name = provision::generate_machine_name();

        if self.cpu_count == 0 {
            self.cpu_count = 1;
        }
        Ok(())
    }

    async fn create(&mut self) -> Result<(), HostError> {
        tracing::info!("Downloading boot2docker...");
        provision::ensure_iso(
            &self.boot2docker_url,
            provision::DEFAULT_BOOT2DOCKER_URL,
            &self.iso_path(),
        )
        .await?;

        tracing::info!("Creating SSH key...");
        ssh::generate_ssh_key(&*self.runner, &ssh::private_key_path(&self.store_path)).await?;

        tracing::info!("Creating VM...");
        std::fs::create_dir_all(&self.store_path)?;
        if self.vmx_path().exists() {
            return Err(HostError::AlreadyExists(self.machine_name.clone()));
        }

        let descriptor = vmx::render(&vmx::VmxSpec {
            name: &self.machine_name,
            memory_mb: self.memory,
            cpu_count: self.cpu_count,
            iso: &self.iso_path(),
            disk: &self.vmdk_path(),
        });
        std::fs::write(self.vmx_path(), descriptor)?;

        if !self.vmdk_path().exists() {
            self.create_disk().await?;
        }

        self.start().await?;

        tracing::info!("Waiting for VM to come online...");
        let this = &*self;
        let ip = provision::poll_until("IP address", IP_READY, |_| async move {
            match this.lease_ip() {
                Ok(ip) => Some(ip),
                Err(e) => {
                    tracing::debug!("Not yet there: {}", e);
                    None
                }
            }
        })
        .await?;
        tracing::debug!("Got an IP: {}", ip);

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
        self.vmrun("start", &["start", &self.vmx_str(), "nogui"]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("VM {} is already stopped", self.machine_name);
            return Ok(());
        }
        self.vmrun("stop", &["stop", &self.vmx_str(), "soft"]).await?;
        Ok(())
    }

    async fn restart(&self) -> Result<(), HostError> {
        if self.get_state().await? != MachineState::Running {
            return self.start().await;
        }
        self.vmrun("restart", &["reset", &self.vmx_str(), "soft"]).await?;
        Ok(())
    }

    async fn kill(&self) -> Result<(), HostError> {
        if self.get_state().await? == MachineState::Stopped {
            tracing::info!("VM {} is already stopped", self.machine_name);
            return Ok(());
        }
        self.vmrun("kill", &["stop", &self.vmx_str(), "hard"]).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<(), HostError> {
        if !self.vmx_path().exists() {
            tracing::info!("VM {} no longer exists", self.machine_name);
            return Ok(());
        }
        if self.get_state().await? == MachineState::Running {
            self.kill().await?;
        }
        self.vmrun("delete", &["deleteVM", &self.vmx_str()]).await?;
        Ok(())
    }

    /// Replace the boot image with the latest release and reboot into it
    async fn upgrade(&self) -> Result<(), HostError> {
        self.stop().await?;
        let iso = self.iso_path();
        if iso.exists() {
            std::fs::remove_file(&iso)?;
        }
        provision::ensure_iso(&self.boot2docker_url, provision::DEFAULT_BOOT2DOCKER_URL, &iso)
            .await?;
        self.start().await
    }

    async fn get_state(&self) -> Result<MachineState, HostError> {
        let running = self.vmrun("list", &["list"]).await?;
        if running.contains(&self.vmx_str()) {
            Ok(MachineState::Running)
        } else {
            Ok(MachineState::Stopped)
        }
    }

    async fn get_ip(&self) -> Result<String, HostError> {
        self.lease_ip()
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
        let mut loaded: FusionDriver = serde_json::from_value(config)?;
        loaded.store_path = std::mem::take(&mut self.store_path);
        loaded.leases_file = std::mem::take(&mut self.leases_file);
        loaded.runner = self.runner.clone();
        *self = loaded;
        Ok(())
    }
}
