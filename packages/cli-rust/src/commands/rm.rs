//! dockhost rm - Remove hosts and their backend machines

use anyhow::{Result, bail};
use clap::Args;
use console::style;
use dialoguer::Confirm;

use crate::Context;
use crate::output::HostSpinner;

/// Arguments for the rm command
#[derive(Args)]
pub struct RmArgs {
    /// Hosts to remove
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Remove local state even when the backend machine cannot be removed
    #[arg(short, long)]
    pub force: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

pub async fn cmd_rm(args: &RmArgs, ctx: &Context) -> Result<()> {
    if !args.yes {
        let prompt = format!(
            "Remove {} and destroy the backing machine{}?",
            style(args.names.join(", ")).cyan(),
            if args.names.len() == 1 { "" } else { "s" }
        );
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut failed = Vec::new();
    for name in &args.names {
        let driver = ctx
            .store
            .load(name)
            .map(|host| host.driver_name)
            .unwrap_or_default();
        let spinner = HostSpinner::start("Removing", name, &driver, ctx.quiet);
        match ctx.store.remove(name, args.force).await {
            Ok(()) => spinner.success("removed"),
            Err(e) => {
                spinner.fail("could not be removed");
                eprintln!("{} {name}: {e}", style("Error:").red().bold());
                failed.push(name.as_str());
            }
        }
    }

    if !failed.is_empty() {
        if !args.force {
            eprintln!(
                "  {} Use {} to drop local state when the machine is already gone.",
                style("Tip:").cyan(),
                style("--force").yellow()
            );
        }
        bail!("Failed to remove: {}", failed.join(", "));
    }
    Ok(())
}
