use std::path::Path;

use peersync_core::db::{QueueRepository, SqliteQueueRepository};
use peersync_core::util::resource_label;
use peersync_core::{QueueItem, QueueItemId, QueueStatus};

use crate::commands::common::{
    format_optional_timestamp, format_timestamp, open_database, print_json, validate_org_id,
};
use crate::error::CliError;

pub fn run_queue(
    org_id: &str,
    failed: bool,
    limit: usize,
    json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let org_id = validate_org_id(org_id)?;
    let db = open_database(db_path)?;
    let repo = SqliteQueueRepository::new(db.connection());
    let items = if failed {
        repo.list_by_status(org_id, QueueStatus::Failed, limit)?
    } else {
        repo.list_pending(org_id, limit)?
    };

    if json {
        return print_json(&items);
    }

    if items.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    for line in format_queue_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_requeue(id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_queue_item_id(id)?;
    let db = open_database(db_path)?;

    if !SqliteQueueRepository::new(db.connection()).requeue(&id)? {
        return Err(CliError::NotRequeueable(id.to_string()));
    }

    println!("Requeued {id}");
    Ok(())
}

pub fn parse_queue_item_id(raw: &str) -> Result<QueueItemId, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::InvalidQueueItemId(raw.to_string()))
}

pub fn format_queue_lines(items: &[QueueItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            format!(
                "{}  {}  {} {}  v{}  retries={}  last try {}",
                item.id,
                format_timestamp(item.created_at),
                item.action.as_str(),
                resource_label(&item.resource_type, &item.resource_id),
                item.version,
                item.retry_count,
                format_optional_timestamp(item.last_retry_at),
            )
        })
        .collect()
}
