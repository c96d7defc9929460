//! SSH key bootstrap and remote-shell command building

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::HostError;
use crate::provision::process::{CommandRunner, SuccessPolicy};

/// File name of the private key inside a host's storage directory
pub const KEY_FILE: &str = "id_rsa";

/// Private key path for a host storage directory
pub fn private_key_path(store_path: &Path) -> PathBuf {
    store_path.join(KEY_FILE)
}

/// Public key path for a host storage directory
pub fn public_key_path(store_path: &Path) -> PathBuf {
    store_path.join(format!("{KEY_FILE}.pub"))
}

/// Generate an RSA keypair at `path` unless one already exists
pub async fn generate_ssh_key(runner: &dyn CommandRunner, path: &Path) -> Result<(), HostError> {
    if path.exists() {
        tracing::debug!("SSH key already present at {}", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!("Generating SSH key at {}", path.display());

    let args = vec![
        "-t".to_string(),
        "rsa".to_string(),
        "-b".to_string(),
        "2048".to_string(),
        "-N".to_string(),
        String::new(),
        "-q".to_string(),
        "-f".to_string(),
        path.display().to_string(),
    ];
    runner
        .run("ssh-keygen", &args)
        .await?
        .check(
            SuccessPolicy::ExitStatus,
            "ssh-keygen",
            "generate key",
            &path.display().to_string(),
        )?;
    Ok(())
}

/// Read a public key, trimmed of its trailing newline
pub fn read_public_key(path: &Path) -> Result<String, HostError> {
    let key = std::fs::read_to_string(path)?;
    Ok(key.trim().to_string())
}

/// Argument vector for `ssh` to reach `user@host` with the given key
pub fn ssh_args(host: &str, port: u16, user: &str, key: &Path, args: &[String]) -> Vec<String> {
    let mut argv: Vec<String> = [
        "-o",
        "BatchMode=yes",
        "-o",
        "StrictHostKeyChecking=no",
        "-o",
        "UserKnownHostsFile=/dev/null",
        "-o",
        "IdentitiesOnly=yes",
        "-o",
        "LogLevel=quiet",
        "-o",
        "ConnectTimeout=10",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    argv.push("-p".to_string());
    argv.push(port.to_string());
    argv.push("-i".to_string());
    argv.push(key.display().to_string());
    argv.push(format!("{user}@{host}"));
    argv.extend(args.iter().cloned());
    argv
}

/// `ssh` invocation ready to be spawned by the caller
pub fn ssh_command(host: &str, port: u16, user: &str, key: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new("ssh");
    cmd.args(ssh_args(host, port, user, key, args));
    cmd
}
