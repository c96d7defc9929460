//! Filesystem-backed collection of hosts
//!
//! Each immediate subdirectory of the root is one host, named exactly like
//! the directory.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{DEFAULT_HOST_NAME, Host, validate_host_name};
use crate::drivers::DriverOptions;
use crate::error::HostError;

/// Failed `Store::create`, carrying the half-created host when there is one
#[derive(Debug, Error)]
#[error("{source}")]
pub struct CreateError {
    pub host: Option<Host>,
    #[source]
    pub source: HostError,
}

impl CreateError {
    fn without_host(source: HostError) -> Self {
        Self { host: None, source }
    }
}

impl From<CreateError> for HostError {
    fn from(err: CreateError) -> Self {
        err.source
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn host_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Pure filesystem check, no load
    pub fn exists(&self, name: &str) -> bool {
        self.host_path(name).exists()
    }

    /// Configure and provision a new host
    ///
    /// Name and driver errors abort before any directory is created. Once a
    /// host has been built it is returned inside the error so the caller can
    /// inspect it.
    pub async fn create(
        &self,
        name: &str,
        driver_name: &str,
        options: &DriverOptions,
    ) -> Result<Host, CreateError> {
        if !validate_host_name(name) || name == DEFAULT_HOST_NAME {
            return Err(CreateError::without_host(HostError::InvalidName(name.to_string())));
        }
        if self.exists(name) {
            return Err(CreateError::without_host(HostError::AlreadyExists(name.to_string())));
        }

        let mut host =
            Host::new(name, driver_name, &self.host_path(name)).map_err(CreateError::without_host)?;

        let result = match host.configure(options) {
            Ok(()) => host.create().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(host),
            Err(source) => Err(CreateError {
                host: Some(host),
                source,
            }),
        }
    }

    /// Load a host; `"default"` is the local engine stand-in
    pub fn load(&self, name: &str) -> Result<Host, HostError> {
        if name == DEFAULT_HOST_NAME {
            return Ok(Host::default_host());
        }
        if !self.exists(name) {
            return Err(HostError::NotFound(name.to_string()));
        }
        Host::load(name, &self.host_path(name))
    }

    pub async fn remove(&self, name: &str, force: bool) -> Result<(), HostError> {
        let host = self.load(name)?;
        host.remove(force).await
    }

    /// Every host, sorted by name
    ///
    /// Any entry that fails to load aborts the listing.
    pub fn list(&self) -> Result<Vec<Host>, HostError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        names
            .iter()
            .map(|name| Host::load(name, &self.host_path(name)))
            .collect()
    }
}
