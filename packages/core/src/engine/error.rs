//! Engine connectivity errors
//!
//! Classifies common bollard failures into actionable messages.

use thiserror::Error;

use crate::error::HostError;

/// Errors that can occur talking to a host's container engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to connect to the engine
    #[error("Engine connection failed: {0}")]
    Connection(String),

    /// Nothing is listening on the engine endpoint
    #[error("Engine at {0} refused the connection. Is the host running?")]
    Refused(String),

    /// Permission denied accessing the engine socket
    #[error(
        "Permission denied accessing the engine socket. You may need to add your user to the 'docker' group."
    )]
    PermissionDenied,

    /// Endpoint protocol is neither `tcp` nor `unix`
    #[error("Unsupported engine protocol {0:?}")]
    UnsupportedProtocol(String),

    /// The host could not report its endpoint
    #[error(transparent)]
    Host(#[from] HostError),
}

impl EngineError {
    /// Classify a bollard error for `endpoint`
    pub fn classify(endpoint: &str, err: &bollard::errors::Error) -> Self {
        classify_message(endpoint, &err.to_string())
    }
}

fn classify_message(endpoint: &str, msg: &str) -> EngineError {
    let lower = msg.to_lowercase();
    if lower.contains("connection refused")
        || lower.contains("cannot connect to the docker daemon")
        || lower.contains("no such file or directory")
    {
        EngineError::Refused(endpoint.to_string())
    } else if lower.contains("permission denied") {
        EngineError::PermissionDenied
    } else {
        EngineError::Connection(msg.to_string())
    }
}
