//! start, stop, restart, kill and upgrade
//!
//! All five load one host and delegate to its driver behind a spinner.

use anyhow::Result;
use clap::Args;
use dockhost_core::Host;

use crate::Context;
use crate::output::HostSpinner;

/// A single host name argument
#[derive(Args)]
pub struct HostArgs {
    /// Host name ("default" is the local engine)
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Stop,
    Restart,
    Kill,
    Upgrade,
}

impl Lifecycle {
    fn progress(self) -> &'static str {
        match self {
            Lifecycle::Start => "Starting",
            Lifecycle::Stop => "Stopping",
            Lifecycle::Restart => "Restarting",
            Lifecycle::Kill => "Killing",
            Lifecycle::Upgrade => "Upgrading",
        }
    }

    fn done(self) -> &'static str {
        match self {
            Lifecycle::Start => "started",
            Lifecycle::Stop => "stopped",
            Lifecycle::Restart => "restarted",
            Lifecycle::Kill => "killed",
            Lifecycle::Upgrade => "upgraded",
        }
    }

    fn failed(self) -> &'static str {
        match self {
            Lifecycle::Start => "failed to start",
            Lifecycle::Stop => "failed to stop",
            Lifecycle::Restart => "failed to restart",
            Lifecycle::Kill => "could not be killed",
            Lifecycle::Upgrade => "failed to upgrade",
        }
    }

    async fn apply(self, host: &Host) -> Result<(), dockhost_core::HostError> {
        match self {
            Lifecycle::Start => host.start().await,
            Lifecycle::Stop => host.stop().await,
            Lifecycle::Restart => host.restart().await,
            Lifecycle::Kill => host.kill().await,
            Lifecycle::Upgrade => host.upgrade().await,
        }
    }
}

pub async fn cmd_lifecycle(action: Lifecycle, args: &HostArgs, ctx: &Context) -> Result<()> {
    let host = ctx.store.load(&args.name)?;
    let spinner = HostSpinner::start(action.progress(), &host.name, &host.driver_name, ctx.quiet);

    match action.apply(&host).await {
        Ok(()) => {
            spinner.success(action.done());
            Ok(())
        }
        Err(e) => {
            spinner.fail(action.failed());
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_action() {
        assert_eq!(Lifecycle::Kill.progress(), "Killing");
        assert_eq!(Lifecycle::Upgrade.done(), "upgraded");
        assert_eq!(Lifecycle::Stop.failed(), "failed to stop");
    }

    #[tokio::test]
    async fn default_host_refuses_power_actions() {
        let host = Host::default_host();
        for action in [Lifecycle::Start, Lifecycle::Stop, Lifecycle::Kill] {
            assert!(action.apply(&host).await.is_err());
        }
    }
}
