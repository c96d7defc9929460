//! Cross-backend machine state
//!
//! Every driver reduces its backend-specific status onto one of these four
//! values. Unmapped statuses reduce to `None`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine state as reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    /// Unknown, missing or unmapped backend status
    #[default]
    None,
    Starting,
    Running,
    Stopped,
}

impl MachineState {
    pub fn is_running(self) -> bool {
        self == MachineState::Running
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineState::None => "None",
            MachineState::Starting => "Starting",
            MachineState::Running => "Running",
            MachineState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_none() {
        assert_eq!(MachineState::default(), MachineState::None);
    }

    #[test]
    fn display_names() {
        assert_eq!(MachineState::Running.to_string(), "Running");
        assert_eq!(MachineState::None.to_string(), "None");
    }

    #[test]
    fn only_running_is_running() {
        assert!(MachineState::Running.is_running());
        assert!(!MachineState::Starting.is_running());
        assert!(!MachineState::Stopped.is_running());
    }
}
