//! Color utilities for CLI output
//!
//! Provides consistent color styling for machine states.

use comfy_table::{Cell, Color};
use dockhost_core::MachineState;

/// Table color for a machine state
///
/// - Running -> green
/// - Stopped -> red
/// - Starting -> yellow
/// - None -> grey
pub fn state_color(state: MachineState) -> Color {
    match state {
        MachineState::Running => Color::Green,
        MachineState::Stopped => Color::Red,
        MachineState::Starting => Color::Yellow,
        MachineState::None => Color::DarkGrey,
    }
}

/// Colored table cell for a machine state
pub fn state_cell(state: MachineState) -> Cell {
    Cell::new(state).fg(state_color(state))
}
