//! Output utilities for CLI commands
//!
//! Spinners with elapsed time for long-running backend operations and
//! color helpers for machine states.

pub mod colors;
pub mod spinner;

pub use colors::state_cell;
pub use spinner::HostSpinner;
