use std::path::Path;

use peersync_core::db::{SqliteSyncStateRepository, SyncStateRepository};
use peersync_core::SyncStats;

use crate::commands::common::{open_database, print_json, validate_org_id};
use crate::error::CliError;

pub fn run_stats(org_id: &str, json: bool, db_path: &Path) -> Result<(), CliError> {
    let org_id = validate_org_id(org_id)?;
    let db = open_database(db_path)?;
    let stats = SqliteSyncStateRepository::new(db.connection()).stats(org_id)?;

    if json {
        return print_json(&stats);
    }

    for line in format_stats_lines(org_id, &stats) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_stats_lines(org_id: &str, stats: &SyncStats) -> Vec<String> {
    vec![
        format!("Organization: {org_id}"),
        format!("Resources: {}", stats.total),
        format!("  synced:   {}", stats.synced),
        format!("  pending:  {}", stats.pending),
        format!("  conflict: {}", stats.conflict),
        format!("Queued changes: {}", stats.queue_size),
        format!("Failed deliveries: {}", stats.failed_queue_items),
        format!("Unresolved conflicts: {}", stats.unresolved_conflicts),
    ]
}
