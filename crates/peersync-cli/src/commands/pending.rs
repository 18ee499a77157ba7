use std::path::Path;

use peersync_core::db::{SqliteSyncStateRepository, SyncStateRepository};
use peersync_core::util::resource_label;
use peersync_core::{SyncConfig, SyncState};

use crate::commands::common::{format_relative_time, open_database, print_json, validate_org_id};
use crate::error::CliError;

pub fn run_pending(
    org_id: &str,
    limit: usize,
    json: bool,
    db_path: &Path,
    config_path: &Path,
) -> Result<(), CliError> {
    let org_id = validate_org_id(org_id)?;
    let config = SyncConfig::load_from_path(config_path)?;
    let limit = limit.min(config.batch_size);

    let db = open_database(db_path)?;
    let states = SqliteSyncStateRepository::new(db.connection()).list_pending(org_id, limit)?;

    if json {
        return print_json(&states);
    }

    if states.is_empty() {
        println!("No pending changes");
        return Ok(());
    }

    for line in format_pending_lines(&states) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_pending_lines(states: &[SyncState]) -> Vec<String> {
    states
        .iter()
        .map(|state| {
            format!(
                "{}  v{} (remote v{})  clock={}  {}",
                resource_label(&state.resource_type, &state.resource_id),
                state.local_version,
                state.remote_version,
                state.vector_clock.to_json(),
                format_relative_time(state.updated_at),
            )
        })
        .collect()
}
