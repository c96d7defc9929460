//! dockhost ssh - Interactive login or one-off remote command

use anyhow::{Context as _, Result};
use clap::Args;

use crate::Context;

/// Arguments for the ssh command
#[derive(Args)]
pub struct SshArgs {
    /// Host name
    pub name: String,

    /// Remote command; empty opens a login shell
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Run ssh with inherited stdio and exit with its status
pub async fn cmd_ssh(args: &SshArgs, ctx: &Context) -> Result<()> {
    let host = ctx.store.load(&args.name)?;
    let command = host.get_ssh_command(&args.args).await?;
    tracing::debug!("ssh: {command:?}");

    let status = tokio::process::Command::from(command)
        .status()
        .await
        .context("Failed to run ssh")?;

    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
