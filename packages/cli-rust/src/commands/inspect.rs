//! dockhost inspect, ip and url

use anyhow::Result;
use dockhost_core::{EngineClient, Host};
use serde::Serialize;
use serde_json::Value;

use super::HostArgs;
use crate::Context;

/// JSON document printed by `inspect`
#[derive(Debug, Serialize)]
struct Inspection {
    name: String,
    driver: String,
    state: Option<String>,
    url: Option<String>,
    config: Value,
    engine_version: Option<String>,
}

async fn inspect(host: &Host) -> Result<Inspection> {
    let state = match host.get_state().await {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!("{}: could not read state: {e}", host.name);
            None
        }
    };
    let running = state.is_some_and(|s| s.is_running());

    let url = if running { host.get_url().await.ok() } else { None };

    let engine_version = if running {
        match EngineClient::for_host(host).await {
            Ok(client) => client.version().await,
            Err(e) => Err(e),
        }
        .inspect_err(|e| tracing::warn!("{}: engine unreachable: {e}", host.name))
        .ok()
    } else {
        None
    };

    Ok(Inspection {
        name: host.name.clone(),
        driver: host.driver_name.clone(),
        state: state.map(|s| s.to_string()),
        url,
        config: host.config_record()?,
        engine_version,
    })
}

pub async fn cmd_inspect(args: &HostArgs, ctx: &Context) -> Result<()> {
    let host = ctx.store.load(&args.name)?;
    let inspection = inspect(&host).await?;
    println!("{}", serde_json::to_string_pretty(&inspection)?);
    Ok(())
}

pub async fn cmd_ip(args: &HostArgs, ctx: &Context) -> Result<()> {
    let host = ctx.store.load(&args.name)?;
    println!("{}", host.get_ip().await?);
    Ok(())
}

pub async fn cmd_url(args: &HostArgs, ctx: &Context) -> Result<()> {
    let host = ctx.store.load(&args.name)?;
    println!("{}", host.get_url().await?);
    Ok(())
}
