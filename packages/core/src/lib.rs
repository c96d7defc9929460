//! dockhost-core - host provisioning and driver orchestration
//!
//! A [`Store`] manages named [`Host`]s on disk. Each host owns one
//! [`Driver`] that provisions and controls a machine on some backend
//! (Azure, VMware Fusion, Hyper-V, OpenStack, vSphere) and exposes the
//! container engine endpoint running on it.

pub mod config;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod host;
pub mod provision;
pub mod state;
pub mod version;

pub use config::{Config, load_config, save_config};
pub use drivers::{CreateFlag, Driver, DriverOptions, FlagValue, create_flags, registered_drivers};
pub use engine::{EngineClient, EngineError};
pub use error::HostError;
pub use host::{CreateError, DEFAULT_HOST_NAME, Host, Store, validate_host_name};
pub use state::MachineState;
pub use version::{get_version, get_version_long};
