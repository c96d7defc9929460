//! Host management module
//!
//! A host is a named binding between a driver instance and its storage
//! directory. The directory holds the persisted `config.json` and the SSH
//! key material the driver generated:
//!
//! ```text
//! <store root>/<name>/config.json   {"DriverName": "...", ...driver fields}
//! <store root>/<name>/id_rsa
//! <store root>/<name>/id_rsa.pub
//! ```

mod store;

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::drivers::default::{self, DefaultDriver};
use crate::drivers::{self, Driver, DriverOptions};
use crate::error::HostError;
use crate::state::MachineState;

pub use store::{CreateError, Store};

/// Name of the pre-existing local engine host
pub const DEFAULT_HOST_NAME: &str = "default";

/// Persisted configuration file inside a host directory
pub const CONFIG_FILE: &str = "config.json";

const DRIVER_NAME_KEY: &str = "DriverName";

/// Whether `name` matches `[A-Za-z0-9_]+`
pub fn validate_host_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// First decoding pass: only the driver name
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "DriverName")]
    driver_name: String,
}

pub struct Host {
    pub name: String,
    pub driver_name: String,
    pub driver: Box<dyn Driver>,
    pub store_path: PathBuf,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("driver_name", &self.driver_name)
            .field("store_path", &self.store_path)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Bind a fresh driver to `store_path`
    ///
    /// Fails with `InvalidName` or `UnknownDriver` before anything touches disk.
    pub fn new(name: &str, driver_name: &str, store_path: &Path) -> Result<Self, HostError> {
        if !validate_host_name(name) {
            return Err(HostError::InvalidName(name.to_string()));
        }
        let driver = drivers::new_driver(driver_name, store_path)?;
        Ok(Self {
            name: name.to_string(),
            driver_name: driver_name.to_string(),
            driver,
            store_path: store_path.to_path_buf(),
        })
    }

    /// The local engine stand-in, resolved from `DOCKER_HOST`
    pub fn default_host() -> Self {
        Self {
            name: DEFAULT_HOST_NAME.to_string(),
            driver_name: default::DRIVER_NAME.to_string(),
            driver: Box::new(DefaultDriver::from_env()),
            store_path: PathBuf::new(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_HOST_NAME
    }

    pub fn config_path(&self) -> PathBuf {
        self.store_path.join(CONFIG_FILE)
    }

    pub fn configure(&mut self, options: &DriverOptions) -> Result<(), HostError> {
        self.driver.configure_from_options(options)
    }

    /// Provision the backend machine and persist the configuration
    ///
    /// On failure the storage directory is removed and the driver's error is
    /// returned unchanged.
    pub async fn create(&mut self) -> Result<(), HostError> {
        if self.is_default() {
            return Err(HostError::unsupported(&self.driver_name, "create"));
        }
        fs::create_dir_all(&self.store_path)?;

        tracing::info!("Creating host {} with the {} driver", self.name, self.driver_name);
        if let Err(e) = self.driver.create().await {
            self.discard_store_path();
            return Err(e);
        }
        if let Err(e) = self.save_config() {
            self.discard_store_path();
            return Err(e);
        }
        tracing::info!("Host {} created", self.name);
        Ok(())
    }

    fn discard_store_path(&self) {
        if let Err(e) = fs::remove_dir_all(&self.store_path) {
            let failure = HostError::PartialFailure(format!(
                "removing {} for host {}: {}",
                self.store_path.display(),
                self.name,
                e
            ));
            tracing::error!("{}", failure);
        }
    }

    pub async fn start(&self) -> Result<(), HostError> {
        self.driver.start().await
    }

    pub async fn stop(&self) -> Result<(), HostError> {
        self.driver.stop().await
    }

    pub async fn restart(&self) -> Result<(), HostError> {
        self.driver.restart().await
    }

    pub async fn kill(&self) -> Result<(), HostError> {
        self.driver.kill().await
    }

    pub async fn upgrade(&self) -> Result<(), HostError> {
        self.driver.upgrade().await
    }

    pub async fn get_state(&self) -> Result<MachineState, HostError> {
        self.driver.get_state().await
    }

    pub async fn get_ip(&self) -> Result<String, HostError> {
        self.driver.get_ip().await
    }

    pub async fn get_url(&self) -> Result<String, HostError> {
        self.driver.get_url().await
    }

    pub async fn get_ssh_command(&self, args: &[String]) -> Result<std::process::Command, HostError> {
        self.driver.get_ssh_command(args).await
    }

    /// Engine endpoint split into protocol and address, e.g. `("tcp", "10.0.0.5:2375")`
    pub async fn get_proto_addr(&self) -> Result<(String, String), HostError> {
        let url = self.get_url().await?;
        split_url(&url).ok_or_else(|| HostError::InvalidConfig {
            path: self.name.clone(),
            message: format!("engine URL {url:?} has no protocol"),
        })
    }

    /// Remove the backend machine, then the storage directory
    ///
    /// With `force` a driver failure is logged and the directory is removed
    /// anyway; without it the error is returned and the directory kept.
    pub async fn remove(&self, force: bool) -> Result<(), HostError> {
        if self.is_default() {
            return Err(HostError::unsupported(&self.driver_name, "remove"));
        }
        if let Err(e) = self.driver.remove().await {
            if !force {
                return Err(e);
            }
            tracing::warn!("Error removing machine for host {}, removing local state anyway: {}", self.name, e);
        }
        match fs::remove_dir_all(&self.store_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("Host {} removed", self.name);
        Ok(())
    }

    /// The persisted record: `DriverName` plus every driver field
    pub fn config_record(&self) -> Result<Value, HostError> {
        let mut record = self.driver.save_config()?;
        let object = record.as_object_mut().ok_or_else(|| HostError::InvalidConfig {
            path: self.config_path().display().to_string(),
            message: "driver configuration is not a JSON object".to_string(),
        })?;
        object.insert(DRIVER_NAME_KEY.to_string(), Value::String(self.driver_name.clone()));
        Ok(record)
    }

    /// Write `config.json`, replacing any previous file atomically
    pub fn save_config(&self) -> Result<(), HostError> {
        if self.is_default() {
            return Err(HostError::unsupported(&self.driver_name, "save configuration"));
        }
        let json = serde_json::to_string_pretty(&self.config_record()?)?;

        let mut file = tempfile::Builder::new()
            .prefix(".config-")
            .suffix(".tmp")
            .tempfile_in(&self.store_path)?;
        file.write_all(json.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(self.config_path()).map_err(|e| e.error)?;

        tracing::debug!("Saved host config to {}", self.config_path().display());
        Ok(())
    }

    /// Load a persisted host
    ///
    /// The driver name is decoded first to pick the driver type, then the
    /// whole record is decoded into that driver.
    pub fn load(name: &str, store_path: &Path) -> Result<Self, HostError> {
        let path = store_path.join(CONFIG_FILE);
        let invalid = |message: String| HostError::InvalidConfig {
            path: path.display().to_string(),
            message,
        };

        let contents = fs::read_to_string(&path)?;
        let record: Value = serde_json::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
        let envelope: Envelope =
            serde_json::from_value(record.clone()).map_err(|e| invalid(e.to_string()))?;

        let mut host = Self::new(name, &envelope.driver_name, store_path)?;
        host.driver
            .load_config(record)
            .map_err(|e| invalid(e.to_string()))?;
        Ok(host)
    }
}

/// Split `proto://addr`
pub fn split_url(url: &str) -> Option<(String, String)> {
    let (proto, addr) = url.split_once("://")?;
    if proto.is_empty() || addr.is_empty() {
        return None;
    }
    Some((proto.to_string(), addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fake::{self, FakeDriver};
    use tempfile::TempDir;

    fn fake_host(dir: &Path, options: DriverOptions) -> Host {
        let mut host = Host::new("h1", fake::DRIVER_NAME, dir).unwrap();
        let flags = drivers::create_flags(fake::DRIVER_NAME).unwrap();
        let mut all = DriverOptions::with_defaults(&flags);
        all.extend(options.iter());
        host.configure(&all).unwrap();
        host
    }

    #[test]
    fn host_names_are_validated() {
        for valid in ["a", "host_1", "ABC", "_", "0"] {
            assert!(validate_host_name(valid), "{valid}");
        }
        for invalid in ["", "my-host", "a b", "a.b", "h/1", "é"] {
            assert!(!validate_host_name(invalid), "{invalid}");
        }
    }

    #[test]
    fn new_rejects_bad_name_and_unknown_driver() {
        assert!(matches!(
            Host::new("bad-name", fake::DRIVER_NAME, Path::new("/tmp/x")).unwrap_err(),
            HostError::InvalidName(_)
        ));
        assert!(matches!(
            Host::new("ok", "nope", Path::new("/tmp/x")).unwrap_err(),
            HostError::UnknownDriver(name) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn successful_create_persists_config() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("h1");
        let mut host = fake_host(&dir, DriverOptions::new().with("fake-label", "blue"));

        host.create().await.unwrap();

        let record: Value =
            serde_json::from_str(&fs::read_to_string(dir.join(CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(record["DriverName"], "fake");
        assert_eq!(record["Label"], "blue");
        assert_eq!(record["MachineName"], "fake-vm");
    }

    #[tokio::test]
    async fn failed_create_removes_store_path() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("h1");
        let mut host = fake_host(&dir, DriverOptions::new().with("fake-fail-create", "true"));

        let err = host.create().await.unwrap_err();

        assert!(matches!(err, HostError::BackendOperationFailed { .. }));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn save_then_load_reconstructs_driver() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("h1");
        let mut host = fake_host(
            &dir,
            DriverOptions::new()
                .with("fake-label", "green")
                .with("fake-memory", "2048"),
        );
        host.create().await.unwrap();

        let loaded = Host::load("h1", &dir).unwrap();

        assert_eq!(loaded.name, "h1");
        assert_eq!(loaded.driver_name, "fake");
        assert_eq!(loaded.config_record().unwrap(), host.config_record().unwrap());
    }

    #[test]
    fn load_with_unregistered_driver_fails() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join(CONFIG_FILE), r#"{"DriverName": "virtualbox"}"#).unwrap();

        assert!(matches!(
            Host::load("h1", root.path()).unwrap_err(),
            HostError::UnknownDriver(name) if name == "virtualbox"
        ));
    }

    #[test]
    fn load_without_driver_name_is_invalid() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join(CONFIG_FILE), r#"{"MachineName": "x"}"#).unwrap();

        assert!(matches!(
            Host::load("h1", root.path()).unwrap_err(),
            HostError::InvalidConfig { .. }
        ));
    }

    #[tokio::test]
    async fn forced_remove_of_vanished_machine_clears_directory() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("h1");
        let mut host = fake_host(&dir, DriverOptions::new().with("fake-gone", "true"));
        host.create().await.unwrap();

        let err = host.remove(false).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(dir.exists());

        host.remove(true).await.unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn default_host_is_never_saved() {
        let host = Host::default_host();
        assert!(host.is_default());
        assert!(matches!(
            host.save_config().unwrap_err(),
            HostError::Unsupported { .. }
        ));
    }

    #[tokio::test]
    async fn proto_addr_splits_url() {
        let host = Host {
            name: "local".to_string(),
            driver_name: default::DRIVER_NAME.to_string(),
            driver: Box::new(DefaultDriver::new("tcp://10.0.0.5:2375")),
            store_path: PathBuf::new(),
        };
        assert_eq!(
            host.get_proto_addr().await.unwrap(),
            ("tcp".to_string(), "10.0.0.5:2375".to_string())
        );

        assert_eq!(split_url("unix:///var/run/docker.sock"), Some(("unix".to_string(), "/var/run/docker.sock".to_string())));
        assert_eq!(split_url("10.0.0.5:2375"), None);
    }

    #[test]
    fn debug_omits_driver_internals() {
        let host = Host {
            name: "h1".to_string(),
            driver_name: fake::DRIVER_NAME.to_string(),
            driver: Box::new(FakeDriver::new(Path::new("/tmp/h1"))),
            store_path: PathBuf::from("/tmp/h1"),
        };
        let debug = format!("{host:?}");
        assert!(debug.contains("h1"));
        assert!(debug.contains("fake"));
    }
}
