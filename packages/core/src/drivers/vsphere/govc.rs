//! vCenter operations through the `govc` CLI
//!
//! `govc` does not reliably set a non-zero exit code, so any stderr output
//! counts as failure.

use std::path::Path;

use super::VsphereDriver;
use crate::error::HostError;
use crate::provision::process::{CommandOutput, SuccessPolicy};

pub const GOVC: &str = "govc";

/// Datastore directory holding the boot image
pub const DATASTORE_DIR: &str = "boot2docker-iso";
pub const ISO_NAME: &str = "boot2docker.iso";

const POLICY: SuccessPolicy = SuccessPolicy::ExitStatusAndEmptyStderr;

/// Connection to the vCenter configured on a driver
pub struct VcConn<'a> {
    driver: &'a VsphereDriver,
}

impl<'a> VcConn<'a> {
    pub fn new(driver: &'a VsphereDriver) -> Self {
        Self { driver }
    }

    fn base_args(&self, command: &str) -> Vec<String> {
        let d = self.driver;
        vec![
            command.to_string(),
            format!("--u={}:{}@{}", d.username, d.password, d.vcenter),
            "--k=true".to_string(),
            format!("--dc={}", d.datacenter),
        ]
    }

    async fn govc(&self, args: Vec<String>) -> Result<CommandOutput, HostError> {
        self.driver.runner.run(GOVC, &args).await
    }

    async fn datastore(&self, operation: &str, args: Vec<String>) -> Result<String, HostError> {
        self.govc(args)
            .await?
            .check(POLICY, "datastore", operation, &self.driver.datastore)
    }

    async fn vm(&self, operation: &str, args: Vec<String>) -> Result<String, HostError> {
        self.govc(args)
            .await?
            .check(POLICY, "vm", operation, &self.driver.machine_name)
    }

    async fn guest(&self, operation: &str, args: Vec<String>) -> Result<String, HostError> {
        self.govc(args)
            .await?
            .check(POLICY, "guest", operation, &self.driver.machine_name)
    }

    pub async fn datastore_ls(&self, path: &str) -> Result<String, HostError> {
        let mut args = self.base_args("datastore.ls");
        args.push(format!("--ds={}", self.driver.datastore));
        args.push(path.to_string());
        self.datastore("ls", args).await
    }

    /// Create `dir` on the datastore unless it is already there
    pub async fn datastore_mkdir(&self, dir: &str) -> Result<(), HostError> {
        if self.datastore_ls(dir).await.is_ok() {
            tracing::debug!("Datastore directory {} already present", dir);
            return Ok(());
        }

        tracing::info!(
            "Creating directory {} on datastore {} of vCenter {}",
            dir,
            self.driver.datastore,
            self.driver.vcenter
        );
        let mut args = self.base_args("datastore.mkdir");
        args.push(format!("--ds={}", self.driver.datastore));
        args.push(dir.to_string());
        self.datastore("mkdir", args).await.map(|_| ())
    }

    /// Upload the boot image unless the datastore already has it
    pub async fn datastore_upload(&self, local: &Path) -> Result<(), HostError> {
        if let Ok(listing) = self.datastore_ls(DATASTORE_DIR).await {
            if listing.contains(ISO_NAME) {
                tracing::info!("Boot image already uploaded, skipping upload");
                return Ok(());
            }
        }

        tracing::info!(
            "Uploading {} to {} on datastore {}",
            local.display(),
            DATASTORE_DIR,
            self.driver.datastore
        );
        let mut args = self.base_args("datastore.upload");
        args.push(format!("--ds={}", self.driver.datastore));
        args.push(local.display().to_string());
        args.push(iso_datastore_path());
        self.datastore("upload", args).await.map(|_| ())
    }

    /// `vm.info` output, or `None` when vCenter does not know the VM
    pub async fn vm_info(&self) -> Result<Option<String>, HostError> {
        let mut args = self.base_args("vm.info");
        args.push(self.driver.machine_name.clone());
        let output = self.govc(args).await?;

        if output.stderr.to_lowercase().contains("not found") {
            return Ok(None);
        }
        let stdout = output.check(POLICY, "vm", "info", &self.driver.machine_name)?;
        if stdout.contains("Name") {
            Ok(Some(stdout))
        } else {
            Ok(None)
        }
    }

    pub async fn vm_create(&self, iso_path: &str) -> Result<(), HostError> {
        let d = self.driver;
        tracing::info!(
            "Creating virtual machine {} on vCenter {}",
            d.machine_name,
            d.vcenter
        );

        let mut args = self.base_args("vm.create");
        args.push(format!("--net={}", d.network));
        args.push(format!("--ds={}", d.datastore));
        args.push(format!("--iso={iso_path}"));
        args.push(format!("--m={}", d.memory));
        args.push(format!("--c={}", d.cpu));
        args.push("--disk.controller=scsi".to_string());
        args.push("--on=false".to_string());
        if !d.pool.is_empty() {
            args.push(format!("--pool={}", d.pool));
        }
        if !d.compute_ip.is_empty() {
            args.push(format!("--host.ip={}", d.compute_ip));
        }
        args.push(d.machine_name.clone());
        self.vm("create", args).await.map(|_| ())
    }

    pub async fn vm_power_on(&self) -> Result<(), HostError> {
        tracing::info!("Powering on virtual machine {}", self.driver.machine_name);
        let mut args = self.base_args("vm.power");
        args.push("-on".to_string());
        args.push(self.driver.machine_name.clone());
        self.vm("power on", args).await.map(|_| ())
    }

    pub async fn vm_power_off(&self) -> Result<(), HostError> {
        tracing::info!("Powering off virtual machine {}", self.driver.machine_name);
        let mut args = self.base_args("vm.power");
        args.push("-off".to_string());
        args.push(self.driver.machine_name.clone());
        self.vm("power off", args).await.map(|_| ())
    }

    pub async fn vm_reset(&self) -> Result<(), HostError> {
        let mut args = self.base_args("vm.power");
        args.push("-reset".to_string());
        args.push(self.driver.machine_name.clone());
        self.vm("reset", args).await.map(|_| ())
    }

    pub async fn vm_destroy(&self) -> Result<(), HostError> {
        tracing::info!("Deleting virtual machine {}", self.driver.machine_name);
        let mut args = self.base_args("vm.destroy");
        args.push(self.driver.machine_name.clone());
        self.vm("delete", args).await.map(|_| ())
    }

    pub async fn vm_disk_create(&self) -> Result<(), HostError> {
        let d = self.driver;
        let mut args = self.base_args("vm.disk.create");
        args.push(format!("--vm={}", d.machine_name));
        args.push(format!("--ds={}", d.datastore));
        args.push(format!("--name={}", d.machine_name));
        args.push(format!("--size={}MiB", d.disk_size));
        self.vm("add disk", args).await.map(|_| ())
    }

    pub async fn vm_attach_network(&self) -> Result<(), HostError> {
        let d = self.driver;
        let mut args = self.base_args("vm.network.add");
        args.push(format!("--vm={}", d.machine_name));
        args.push(format!("--net={}", d.network));
        self.vm("add network", args).await.map(|_| ())
    }

    /// First address reported by `vm.ip`, which blocks until the guest tools
    /// publish one
    pub async fn vm_fetch_ip(&self) -> Result<String, HostError> {
        let mut args = self.base_args("vm.ip");
        args.push(self.driver.machine_name.clone());
        let stdout = self.vm("fetching IP", args).await?;
        crate::provision::parse::first_line(&stdout)
            .map(str::to_string)
            .ok_or_else(|| {
                HostError::backend("vm", "fetching IP", &self.driver.machine_name, "no address reported")
            })
    }

    pub async fn guest_mkdir(&self, login: &str, dir: &str) -> Result<(), HostError> {
        let mut args = self.base_args("guest.mkdir");
        args.push(format!("--l={login}"));
        args.push(format!("--vm={}", self.driver.machine_name));
        args.push("-p".to_string());
        args.push(dir.to_string());
        self.guest("mkdir", args).await.map(|_| ())
    }

    pub async fn guest_upload(&self, login: &str, local: &Path, remote: &str) -> Result<(), HostError> {
        let mut args = self.base_args("guest.upload");
        args.push(format!("--l={login}"));
        args.push(format!("--vm={}", self.driver.machine_name));
        args.push("-f".to_string());
        args.push(local.display().to_string());
        args.push(remote.to_string());
        self.guest("upload", args).await.map(|_| ())
    }
}

/// Datastore-relative path of the uploaded boot image
pub fn iso_datastore_path() -> String {
    format!("{DATASTORE_DIR}/{ISO_NAME}")
}
