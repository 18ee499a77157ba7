use std::path::Path;

use peersync_core::db::{ConflictRepository, SqliteConflictRepository};
use peersync_core::util::resource_label;
use peersync_core::{ConflictRecord, Side};

use crate::commands::common::{format_timestamp, open_database, print_json, validate_org_id};
use crate::error::CliError;

pub fn run_conflicts(
    org_id: &str,
    include_resolved: bool,
    limit: usize,
    json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let org_id = validate_org_id(org_id)?;
    let db = open_database(db_path)?;
    let records =
        SqliteConflictRepository::new(db.connection()).list(org_id, include_resolved, limit)?;

    if json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No conflicts");
        return Ok(());
    }

    for line in format_conflict_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_conflict_lines(records: &[ConflictRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let state = if record.resolved {
                let winner = record.winner.map_or("merged", Side::as_str);
                let by = record.resolved_by.as_deref().unwrap_or("unknown");
                format!("resolved ({winner}) by {by}")
            } else {
                "open".to_string()
            };
            format!(
                "{}  {}  {}  v{} vs v{}  {}  {}",
                record.id,
                format_timestamp(record.created_at),
                resource_label(&record.resource_type, &record.resource_id),
                record.local_version,
                record.remote_version,
                record.resolution_strategy,
                state,
            )
        })
        .collect()
}
