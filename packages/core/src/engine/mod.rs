//! Container engine access for provisioned hosts
//!
//! Thin bollard wrapper used to confirm that a host's engine answers once
//! provisioning finishes.

mod client;
mod error;

pub use client::{DEFAULT_TIMEOUT_SECS, EngineClient};
pub use error::EngineError;
