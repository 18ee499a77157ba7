use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use peersync_core::db::Database;
use peersync_core::util::now_millis;

use crate::error::CliError;

pub const DB_PATH_ENV: &str = "PEERSYNC_DB_PATH";
pub const CONFIG_PATH_ENV: &str = "PEERSYNC_CONFIG";

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path {
        return Ok(path);
    }
    if let Some(path) = env::var_os(DB_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    default_db_path()
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_config {
        return Ok(path);
    }
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    default_config_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| CliError::Config("Could not determine the data directory".to_string()))?;
    Ok(data_dir.join("peersync").join("peersync.db"))
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| CliError::Config("Could not determine the config directory".to_string()))?;
    Ok(config_dir.join("peersync").join("config.json"))
}

/// Open the database, creating parent directories for a fresh install
pub fn open_database(db_path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(Database::open(db_path)?)
}

pub fn validate_org_id(org_id: &str) -> Result<&str, CliError> {
    let trimmed = org_id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyOrgId);
    }
    Ok(trimmed)
}

pub fn format_relative_time(timestamp_ms: i64) -> String {
    format_relative_time_at(timestamp_ms, now_millis())
}

pub fn format_relative_time_at(timestamp_ms: i64, now_ms: i64) -> String {
    let diff_secs = now_ms.saturating_sub(timestamp_ms) / 1000;

    if diff_secs < 60 {
        "just now".to_string()
    } else if diff_secs < 3600 {
        format!("{}m ago", diff_secs / 60)
    } else if diff_secs < 86_400 {
        format!("{}h ago", diff_secs / 3600)
    } else {
        format!("{}d ago", diff_secs / 86_400)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_optional_timestamp(timestamp_ms: Option<i64>) -> String {
    timestamp_ms.map_or_else(|| "never".to_string(), format_timestamp)
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
