//! Provisioning primitives shared by the backend drivers
//!
//! - `poll`: bounded readiness polling (SSH, engine port, IP discovery)
//! - `download`: atomic artifact download and copy
//! - `ssh`: key bootstrap and `ssh` command construction
//! - `process`: external tool invocation with per-backend success policies
//! - `parse`: line-table output parsing (descriptors, DHCP leases)
//! - `userdata`: cloud-init documents
//! - `names`: generated machine names

pub mod download;
pub mod names;
pub mod parse;
pub mod poll;
pub mod process;
pub mod ssh;
pub mod userdata;

pub use download::{DEFAULT_BOOT2DOCKER_URL, copy_atomically, download_file, ensure_iso};
pub use names::generate_machine_name;
pub use poll::{Dialer, ENGINE_READY, PollSpec, SSH_READY, TcpDialer, poll_until, wait_for_tcp};
pub use process::{CommandOutput, CommandRunner, SuccessPolicy, SystemRunner, find_in_path};
pub use ssh::{generate_ssh_key, read_public_key, ssh_command};
