//! peersync CLI - Inspect and operate the local sync database
//!
//! Reads the sync state, offline queue and conflict tables directly; nothing
//! here talks to peers.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{resolve_config_path, resolve_db_path};
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::pending::run_pending;
use crate::commands::queue::{run_queue, run_requeue};
use crate::commands::stats::run_stats;
use crate::error::CliError;

fn main() {
    if let Err(error) = run() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("peersync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config)?;

    match cli.command {
        Commands::Stats { org, json } => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_stats(&org, json, &db_path)?;
        }
        Commands::Pending { org, limit, json } => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_pending(&org, limit, json, &db_path, &config_path)?;
        }
        Commands::Conflicts {
            org,
            all,
            limit,
            json,
        } => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_conflicts(&org, all, limit, json, &db_path)?;
        }
        Commands::Queue {
            org,
            failed,
            limit,
            json,
        } => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_queue(&org, failed, limit, json, &db_path)?;
        }
        Commands::Requeue { id } => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_requeue(&id, &db_path)?;
        }
        Commands::Config { command } => run_config(command, &config_path)?,
    }

    Ok(())
}
