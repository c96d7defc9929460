//! dockhost ls - List hosts in the store

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table};
use console::style;
use dockhost_core::{EngineClient, Host, MachineState};
use futures_util::future::join_all;

use crate::Context;
use crate::output::state_cell;

/// Arguments for the ls command
#[derive(Args)]
pub struct LsArgs {
    /// Query each running host's Docker engine version
    #[arg(long)]
    pub engine: bool,
}

/// One table row, gathered without failing the whole listing
struct Row {
    name: String,
    driver: String,
    state: Option<MachineState>,
    url: Option<String>,
    engine: Option<String>,
}

async fn describe(host: &Host, engine: bool) -> Row {
    let state = host
        .get_state()
        .await
        .inspect_err(|e| tracing::debug!("{}: state unavailable: {e}", host.name))
        .ok();
    let running = state.is_some_and(MachineState::is_running);

    let url = if running {
        host.get_url().await.ok()
    } else {
        None
    };

    let engine = if engine && running {
        match EngineClient::for_host(host).await {
            Ok(client) => client.version().await.ok(),
            Err(e) => {
                tracing::debug!("{}: engine unavailable: {e}", host.name);
                None
            }
        }
    } else {
        None
    };

    Row {
        name: host.name.clone(),
        driver: host.driver_name.clone(),
        state,
        url,
        engine,
    }
}

pub async fn cmd_ls(args: &LsArgs, ctx: &Context) -> Result<()> {
    let hosts = ctx.store.list()?;

    // Global --quiet prints names only, for scripting
    if ctx.quiet {
        for host in &hosts {
            println!("{}", host.name);
        }
        return Ok(());
    }

    if hosts.is_empty() {
        println!("No hosts in {}.", ctx.store.root().display());
        println!();
        println!(
            "  {} {}",
            style("Create one with:").dim(),
            style("dockhost create --driver <driver> <name>").yellow()
        );
        return Ok(());
    }

    let rows = join_all(hosts.iter().map(|host| describe(host, args.engine))).await;

    let mut header = vec!["Name", "Driver", "State", "URL"];
    if args.engine {
        header.push("Engine");
    }
    let mut table = Table::new();
    table.set_header(header);

    for row in rows {
        let state = match row.state {
            Some(state) => state_cell(state),
            None => Cell::new("error").fg(Color::Red),
        };
        let mut cells = vec![
            Cell::new(&row.name),
            Cell::new(&row.driver),
            state,
            Cell::new(row.url.as_deref().unwrap_or("")),
        ];
        if args.engine {
            cells.push(Cell::new(row.engine.as_deref().unwrap_or("-")));
        }
        table.add_row(cells);
    }

    println!("{table}");
    Ok(())
}
