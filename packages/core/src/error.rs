//! Host provisioning error types
//!
//! Every failure surfaced by drivers, provisioning primitives, hosts and the
//! store maps onto one of these variants. Messages always carry the resource
//! or host name and the sub-operation that failed.

use thiserror::Error;

use crate::state::MachineState;

/// Errors that can occur during host and driver operations
#[derive(Error, Debug)]
pub enum HostError {
    /// A required driver option was not supplied
    #[error("{driver} driver requires the --{option} option")]
    MissingRequiredOption { driver: String, option: String },

    /// A driver option was supplied but could not be used
    #[error("Invalid value for --{option}: {reason}")]
    InvalidOption { option: String, reason: String },

    /// Host name does not match `[a-zA-Z0-9_]+`
    #[error("Invalid host name {0:?}, it must match [a-zA-Z0-9_]+")]
    InvalidName(String),

    /// Host (or backend machine) already exists
    #[error("Host {0:?} already exists")]
    AlreadyExists(String),

    /// Host (or backend machine) not found
    #[error("Host {0:?} does not exist")]
    NotFound(String),

    /// No driver registered under this name
    #[error("Unknown driver {0:?}")]
    UnknownDriver(String),

    /// Operation requires a running machine
    #[error("Machine {0:?} is not running")]
    NotRunning(String),

    /// Operation is not valid in the machine's current state
    #[error("Cannot {operation} machine {name:?} while it is in state {state}")]
    InvalidState {
        name: String,
        operation: String,
        state: MachineState,
    },

    /// Bounded polling was exhausted
    #[error("Timed out waiting for {target} after {attempts} attempts")]
    Timeout { target: String, attempts: u32 },

    /// A backend CLI or API call failed
    #[error("{backend} operation '{operation}' failed for {resource}: {message}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        resource: String,
        message: String,
    },

    /// Cleanup after a failed operation also failed
    #[error("Cleanup after failed operation also failed: {0}")]
    PartialFailure(String),

    /// Operation is not implemented by this backend
    #[error("{operation} is not supported by the {driver} driver")]
    Unsupported { driver: String, operation: String },

    /// Failed to spawn an external program
    #[error("Failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    /// Artifact download failed
    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// Persisted host configuration could not be used
    #[error("Invalid host configuration in {path}: {message}")]
    InvalidConfig { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// Build a `BackendOperationFailed` error
    pub fn backend(
        backend: impl Into<String>,
        operation: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        HostError::BackendOperationFailed {
            backend: backend.into(),
            operation: operation.into(),
            resource: resource.into(),
            message: message.into().trim().to_string(),
        }
    }

    /// Build a `MissingRequiredOption` error
    pub fn missing_option(driver: &str, option: &str) -> Self {
        HostError::MissingRequiredOption {
            driver: driver.to_string(),
            option: option.to_string(),
        }
    }

    /// Build an `Unsupported` error
    pub fn unsupported(driver: &str, operation: &str) -> Self {
        HostError::Unsupported {
            driver: driver.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Whether this error means the backend resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_carries_operation_resource_and_text() {
        let err = HostError::backend("datastore", "mkdir", "ds1", "  permission denied\n");
        let msg = err.to_string();
        assert!(msg.contains("datastore"));
        assert!(msg.contains("mkdir"));
        assert!(msg.contains("ds1"));
        assert!(msg.ends_with("permission denied"));
    }

    #[test]
    fn missing_option_names_the_flag() {
        let err = HostError::missing_option("vsphere", "vsphere-vcenter");
        assert_eq!(
            err.to_string(),
            "vsphere driver requires the --vsphere-vcenter option"
        );
    }

    #[test]
    fn timeout_displays_target_and_attempts() {
        let err = HostError::Timeout {
            target: "10.0.0.5:22".to_string(),
            attempts: 3,
        };
        assert!(err.to_string().contains("10.0.0.5:22"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn not_found_is_detected() {
        assert!(HostError::NotFound("vm".to_string()).is_not_found());
        assert!(!HostError::NotRunning("vm".to_string()).is_not_found());
    }
}
