use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "peersync")]
#[command(about = "Inspect peer-to-peer sync state from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local sync database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the sync config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show resource and queue counts for an organization
    Stats {
        /// Organization ID
        #[arg(long)]
        org: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List resources with unsent local changes
    Pending {
        /// Organization ID
        #[arg(long)]
        org: String,
        /// Number of resources to show (capped at the configured batch size)
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List conflict records
    Conflicts {
        /// Organization ID
        #[arg(long)]
        org: String,
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List offline queue items
    Queue {
        /// Organization ID
        #[arg(long)]
        org: String,
        /// Show items whose retries are exhausted instead of pending ones
        #[arg(long)]
        failed: bool,
        /// Number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a failed queue item back to pending
    Requeue {
        /// Queue item ID
        id: String,
    },
    /// Show or create the sync config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
