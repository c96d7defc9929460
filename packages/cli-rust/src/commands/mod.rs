//! Command implementations for the dockhost CLI

mod config;
pub mod create;
mod drivers;
mod inspect;
mod lifecycle;
mod ls;
mod rm;
mod ssh;

pub use config::{ConfigCommands, cmd_config};
pub use create::{CreateArgs, cmd_create};
pub use drivers::cmd_drivers;
pub use inspect::{cmd_inspect, cmd_ip, cmd_url};
pub use lifecycle::{HostArgs, Lifecycle, cmd_lifecycle};
pub use ls::{LsArgs, cmd_ls};
pub use rm::{RmArgs, cmd_rm};
pub use ssh::{SshArgs, cmd_ssh};
