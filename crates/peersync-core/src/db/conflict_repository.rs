//! Conflict record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use super::columns;
use crate::clock::VectorClock;
use crate::detector::Side;
use crate::error::{Error, Result};
use crate::models::{ConflictId, ConflictRecord, ResolutionStrategy};
use rusqlite::{params, Connection, OptionalExtension};

const CONFLICT_COLUMNS: &str = "id, org_id, resource_type, resource_id, local_version,
    remote_version, local_clock, remote_clock, local_data, remote_data, resolution_strategy,
    resolved, resolved_at, resolved_by, winner, created_at";

/// How a conflict was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub strategy: ResolutionStrategy,
    pub resolved_by: &'a str,
    pub winner: Option<Side>,
    pub resolved_at: i64,
}

/// Trait for conflict record storage operations
pub trait ConflictRepository {
    /// Persist a new record
    fn insert(&self, record: &ConflictRecord) -> Result<()>;

    /// Get a record by ID
    fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>>;

    /// Most recent unresolved record for a resource
    fn find_open(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ConflictRecord>>;

    /// Replace both side snapshots of an unresolved record
    fn refresh_sides(&self, record: &ConflictRecord) -> Result<()>;

    /// Mark one unresolved record resolved
    fn mark_resolved(&self, id: &ConflictId, resolution: &Resolution<'_>) -> Result<()>;

    /// Mark every unresolved record of a resource resolved; returns how many changed
    fn resolve_open(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        resolution: &Resolution<'_>,
    ) -> Result<usize>;

    /// Number of unresolved records for a resource
    fn count_open(&self, org_id: &str, resource_type: &str, resource_id: &str) -> Result<usize>;

    /// Records for the org, newest first
    fn list(&self, org_id: &str, include_resolved: bool, limit: usize)
        -> Result<Vec<ConflictRecord>>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a conflict record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRecord> {
        let local_clock: String = row.get(6)?;
        let remote_clock: String = row.get(7)?;
        let strategy: String = row.get(10)?;
        let winner: Option<String> = row.get(14)?;
        Ok(ConflictRecord {
            id: columns::parsed(row, 0)?,
            org_id: row.get(1)?,
            resource_type: row.get(2)?,
            resource_id: row.get(3)?,
            local_version: row.get(4)?,
            remote_version: row.get(5)?,
            local_clock: VectorClock::from_json_lossy(&local_clock),
            remote_clock: VectorClock::from_json_lossy(&remote_clock),
            local_data: columns::json_value(row, 8)?,
            remote_data: columns::json_value(row, 9)?,
            resolution_strategy: ResolutionStrategy::parse(&strategy).unwrap_or_default(),
            resolved: row.get::<_, i32>(11)? != 0,
            resolved_at: row.get(12)?,
            resolved_by: row.get(13)?,
            winner: winner.as_deref().and_then(Side::parse),
            created_at: row.get(15)?,
        })
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn insert(&self, record: &ConflictRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (id, org_id, resource_type, resource_id, local_version,
                remote_version, local_clock, remote_clock, local_data, remote_data,
                resolution_strategy, resolved, resolved_at, resolved_by, winner, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id.as_str(),
                record.org_id,
                record.resource_type,
                record.resource_id,
                record.local_version,
                record.remote_version,
                record.local_clock.to_json(),
                record.remote_clock.to_json(),
                serde_json::to_string(&record.local_data)?,
                serde_json::to_string(&record.remote_data)?,
                record.resolution_strategy.as_str(),
                i32::from(record.resolved),
                record.resolved_at,
                record.resolved_by,
                record.winner.map(Side::as_str),
                record.created_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?"),
                params![id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn find_open(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ConflictRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                     WHERE org_id = ? AND resource_type = ? AND resource_id = ? AND resolved = 0
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params![org_id, resource_type, resource_id],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn refresh_sides(&self, record: &ConflictRecord) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET
                local_version = ?, remote_version = ?, local_clock = ?, remote_clock = ?,
                local_data = ?, remote_data = ?, resolution_strategy = ?
             WHERE id = ? AND resolved = 0",
            params![
                record.local_version,
                record.remote_version,
                record.local_clock.to_json(),
                record.remote_clock.to_json(),
                serde_json::to_string(&record.local_data)?,
                serde_json::to_string(&record.remote_data)?,
                record.resolution_strategy.as_str(),
                record.id.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("open conflict {}", record.id)));
        }

        Ok(())
    }

    fn mark_resolved(&self, id: &ConflictId, resolution: &Resolution<'_>) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET
                resolved = 1, resolution_strategy = ?, resolved_by = ?, winner = ?, resolved_at = ?
             WHERE id = ? AND resolved = 0",
            params![
                resolution.strategy.as_str(),
                resolution.resolved_by,
                resolution.winner.map(Side::as_str),
                resolution.resolved_at,
                id.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("open conflict {id}")));
        }

        Ok(())
    }

    fn resolve_open(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        resolution: &Resolution<'_>,
    ) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET
                resolved = 1, resolution_strategy = ?, resolved_by = ?, winner = ?, resolved_at = ?
             WHERE org_id = ? AND resource_type = ? AND resource_id = ? AND resolved = 0",
            params![
                resolution.strategy.as_str(),
                resolution.resolved_by,
                resolution.winner.map(Side::as_str),
                resolution.resolved_at,
                org_id,
                resource_type,
                resource_id,
            ],
        )?;
        Ok(rows)
    }

    fn count_open(&self, org_id: &str, resource_type: &str, resource_id: &str) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts
             WHERE org_id = ? AND resource_type = ? AND resource_id = ? AND resolved = 0",
            params![org_id, resource_type, resource_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn list(
        &self,
        org_id: &str,
        include_resolved: bool,
        limit: usize,
    ) -> Result<Vec<ConflictRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE org_id = ? AND (? OR resolved = 0)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        ))?;

        let records = stmt
            .query_map(
                params![org_id, include_resolved, limit as i64],
                Self::parse_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }
}
