//! Create command implementation
//!
//! Every registered driver contributes its create flags to the `create`
//! subcommand at parse time. Option values are layered: flag defaults,
//! then `create_defaults` from the config file, then explicit flags.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Args, Command};
use console::style;
use dockhost_core::{Config, CreateFlag, DriverOptions, FlagValue, create_flags, registered_drivers};

use crate::Context;
use crate::output::HostSpinner;

/// Arguments for the create command
#[derive(Args)]
pub struct CreateArgs {
    /// Host name (letters, digits and underscores)
    pub name: String,

    /// Driver to provision with (falls back to `default_driver` from config)
    #[arg(short, long)]
    pub driver: Option<String>,
}

/// Add every registered driver's flags to the `create` subcommand
pub fn with_driver_flags(cli: Command) -> Command {
    cli.mut_subcommand("create", |mut create| {
        for driver in registered_drivers() {
            let Ok(flags) = create_flags(&driver) else {
                continue;
            };
            for flag in &flags {
                create = create.arg(flag_arg(flag));
            }
        }
        create
    })
}

fn flag_arg(flag: &CreateFlag) -> Arg {
    let arg = Arg::new(flag.name).long(flag.name);
    match flag.default {
        FlagValue::Bool(_) => arg
            .help(flag.usage)
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true")
            .action(ArgAction::Set),
        FlagValue::Str("") => arg.help(flag.usage).value_name("VALUE"),
        ref default => arg
            .help(format!("{} [default: {default}]", flag.usage))
            .value_name("VALUE"),
    }
}

/// Option bag for `driver` from config defaults and the parsed flags
///
/// Flags that belong to another driver are ignored with a warning.
pub fn driver_options(matches: &ArgMatches, driver: &str, config: &Config) -> Result<DriverOptions> {
    let flags = create_flags(driver)?;
    let mut options = DriverOptions::with_defaults(&flags);
    options.extend(config.create_defaults_for(driver));

    for other in registered_drivers() {
        for flag in create_flags(&other)? {
            let Some(value) = matches.try_get_one::<String>(flag.name).ok().flatten() else {
                continue;
            };
            if other == driver {
                options.set(flag.name, value.as_str());
            } else {
                tracing::warn!("--{} ignored: it belongs to the {other} driver", flag.name);
            }
        }
    }
    Ok(options)
}

fn resolve_driver<'a>(args: &'a CreateArgs, config: &'a Config) -> Result<&'a str> {
    args.driver
        .as_deref()
        .or(config.default_driver.as_deref())
        .ok_or_else(|| anyhow!("No driver given. Pass --driver or set default_driver in the config file."))
}

/// Create and provision a host
pub async fn cmd_create(args: &CreateArgs, matches: &ArgMatches, ctx: &Context) -> Result<()> {
    let driver = resolve_driver(args, &ctx.config)?;
    let options = driver_options(matches, driver, &ctx.config)?;

    let started = Instant::now();
    let spinner = HostSpinner::start("Creating", &args.name, driver, ctx.quiet);

    match ctx.store.create(&args.name, driver, &options).await {
        Ok(host) => {
            let elapsed = Duration::from_secs(started.elapsed().as_secs());
            spinner.success(&format!("created in {}", humantime::format_duration(elapsed)));
            if !ctx.quiet {
                match host.get_url().await {
                    Ok(url) => println!("Docker engine: {}", style(url).cyan()),
                    Err(e) => tracing::warn!("Host created but its URL is unavailable: {e}"),
                }
                println!(
                    "Log in with: {}",
                    style(format!("dockhost ssh {}", args.name)).green()
                );
            }
            Ok(())
        }
        Err(err) => {
            spinner.fail("could not be created");
            if err.host.is_some() {
                tracing::debug!("Host {} was built before the failure", args.name);
            }
            Err(err.source.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_command() -> Command {
        with_driver_flags(Command::new("dockhost").subcommand(CreateArgs::augment_args(
            Command::new("create"),
        )))
    }

    fn create_matches(args: &[&str]) -> ArgMatches {
        let mut argv = vec!["dockhost", "create"];
        argv.extend_from_slice(args);
        create_command()
            .try_get_matches_from(argv)
            .unwrap()
            .subcommand_matches("create")
            .unwrap()
            .clone()
    }

    #[test]
    fn flags_layer_over_config_defaults() {
        let matches = create_matches(&["--vsphere-network", "Prod", "web1"]);
        let mut config = Config::default();
        config
            .create_defaults
            .insert("vsphere-datacenter".to_string(), "dc1".to_string());
        config
            .create_defaults
            .insert("vsphere-network".to_string(), "Lab".to_string());

        let options = driver_options(&matches, "vsphere", &config).unwrap();

        assert_eq!(options.string("vsphere-datacenter"), "dc1");
        assert_eq!(options.string("vsphere-network"), "Prod");
        assert_eq!(options.string("vsphere-cpu"), "2");
    }

    #[test]
    fn foreign_driver_flags_are_ignored() {
        let matches = create_matches(&["--azure-location", "westus", "web1"]);
        let options = driver_options(&matches, "vsphere", &Config::default()).unwrap();
        assert!(options.iter().all(|(key, _)| key.starts_with("vsphere-")));
    }

    #[test]
    fn bool_flags_take_optional_value() {
        let matches = create_matches(&["--openstack-nova-net", "web1"]);
        let options = driver_options(&matches, "openstack", &Config::default()).unwrap();
        assert!(options.bool("openstack-nova-net").unwrap());

        let matches = create_matches(&["--openstack-nova-net=false", "web1"]);
        let options = driver_options(&matches, "openstack", &Config::default()).unwrap();
        assert!(!options.bool("openstack-nova-net").unwrap());
    }

    #[test]
    fn unknown_driver_is_reported() {
        let matches = create_matches(&["web1"]);
        assert!(driver_options(&matches, "virtualbox", &Config::default()).is_err());
    }

    #[test]
    fn driver_falls_back_to_config() {
        let args = CreateArgs {
            name: "web1".to_string(),
            driver: None,
        };
        assert!(resolve_driver(&args, &Config::default()).is_err());

        let mut config = Config::default();
        config.default_driver = Some("fusion".to_string());
        assert_eq!(resolve_driver(&args, &config).unwrap(), "fusion");

        let args = CreateArgs {
            driver: Some("hyperv".to_string()),
            ..args
        };
        assert_eq!(resolve_driver(&args, &config).unwrap(), "hyperv");
    }
}
