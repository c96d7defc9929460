//! dockhost CLI - Provision and manage Docker hosts
//!
//! This module contains the shared CLI implementation used by the binary.

mod commands;
mod output;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use console::style;
use dockhost_core::{Config, Store, config, get_version, load_config};
use tracing_subscriber::EnvFilter;

/// Provision and manage Docker hosts on hypervisors and clouds
#[derive(Parser)]
#[command(name = "dockhost")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision and manage Docker hosts on hypervisors and clouds", long_about = None)]
#[command(after_help = get_banner())]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Increase verbosity level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and provision a host
    Create(commands::CreateArgs),
    /// List hosts
    Ls(commands::LsArgs),
    /// Remove hosts
    Rm(commands::RmArgs),
    /// Start a host
    Start(commands::HostArgs),
    /// Stop a host gracefully
    Stop(commands::HostArgs),
    /// Restart a host
    Restart(commands::HostArgs),
    /// Power off a host immediately
    Kill(commands::HostArgs),
    /// Upgrade the Docker engine on a host
    Upgrade(commands::HostArgs),
    /// Show host details as JSON
    Inspect(commands::HostArgs),
    /// Print the IP address of a host
    Ip(commands::HostArgs),
    /// Print the Docker engine URL of a host
    Url(commands::HostArgs),
    /// Log into a host or run a command over SSH
    Ssh(commands::SshArgs),
    /// List available drivers and their create flags
    Drivers,
    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommands),
}

/// Shared state handed to every command
pub(crate) struct Context {
    pub config: Config,
    pub store: Store,
    pub quiet: bool,
}

/// Get the ASCII banner for help display
fn get_banner() -> &'static str {
    r#"
     _            _    _               _
  __| | ___   ___| | _| |__   ___  ___| |_
 / _` |/ _ \ / __| |/ / '_ \ / _ \/ __| __|
| (_| | (_) | (__|   <| | | | (_) \__ \ |_
 \__,_|\___/ \___|_|\_\_| |_|\___/|___/\__|
"#
}

/// Install the tracing subscriber; `RUST_LOG` wins over `-v`
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> Result<()> {
    let matches = commands::create::with_driver_flags(Cli::command()).get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    init_tracing(cli.verbose, cli.quiet);

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let config_path = config::get_config_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config path"))?;

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Configuration error", style("Error:").red().bold());
            eprintln!();
            eprintln!("  {e:#}");
            eprintln!();
            eprintln!("  Config file: {}", style(config_path.display()).yellow());
            eprintln!();
            eprintln!(
                "  {} Check the config file for syntax errors or unknown fields.",
                style("Tip:").cyan()
            );
            std::process::exit(1);
        }
    };

    let store = Store::new(config::store_path(&config)?);
    tracing::debug!("Config: {}", config_path.display());
    tracing::debug!("Host store: {}", store.root().display());

    let Some(command) = cli.command else {
        if !cli.quiet {
            println!(
                "{} {}",
                style("dockhost").cyan().bold(),
                style(get_version()).dim()
            );
            println!();
            println!("Run {} for available commands.", style("--help").green());
        }
        return Ok(());
    };

    let ctx = Context {
        config,
        store,
        quiet: cli.quiet,
    };

    match command {
        Commands::Drivers => commands::cmd_drivers(),
        Commands::Config(cmd) => commands::cmd_config(&cmd, &ctx.config, &config_path),
        command => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(dispatch(command, &matches, &ctx))
        }
    }
}

async fn dispatch(command: Commands, matches: &clap::ArgMatches, ctx: &Context) -> Result<()> {
    use commands::Lifecycle;

    match command {
        Commands::Create(args) => {
            let create_matches = matches
                .subcommand_matches("create")
                .ok_or_else(|| anyhow::anyhow!("create arguments missing"))?;
            commands::cmd_create(&args, create_matches, ctx).await
        }
        Commands::Ls(args) => commands::cmd_ls(&args, ctx).await,
        Commands::Rm(args) => commands::cmd_rm(&args, ctx).await,
        Commands::Start(args) => commands::cmd_lifecycle(Lifecycle::Start, &args, ctx).await,
        Commands::Stop(args) => commands::cmd_lifecycle(Lifecycle::Stop, &args, ctx).await,
        Commands::Restart(args) => commands::cmd_lifecycle(Lifecycle::Restart, &args, ctx).await,
        Commands::Kill(args) => commands::cmd_lifecycle(Lifecycle::Kill, &args, ctx).await,
        Commands::Upgrade(args) => commands::cmd_lifecycle(Lifecycle::Upgrade, &args, ctx).await,
        Commands::Inspect(args) => commands::cmd_inspect(&args, ctx).await,
        Commands::Ip(args) => commands::cmd_ip(&args, ctx).await,
        Commands::Url(args) => commands::cmd_url(&args, ctx).await,
        Commands::Ssh(args) => commands::cmd_ssh(&args, ctx).await,
        Commands::Drivers | Commands::Config(_) => Ok(()),
    }
}
