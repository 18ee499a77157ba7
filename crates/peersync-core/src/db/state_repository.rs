//! Sync state repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::clock::VectorClock;
use crate::error::Result;
use crate::models::{SyncState, SyncStatePatch, SyncStats, SyncStatus};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};

const STATE_COLUMNS: &str = "org_id, resource_type, resource_id, local_version, remote_version,
    vector_clock, cid, sync_status, last_synced_at, created_at, updated_at";

/// Trait for sync state storage operations
pub trait SyncStateRepository {
    /// Get the state row for a resource
    fn get(&self, org_id: &str, resource_type: &str, resource_id: &str)
        -> Result<Option<SyncState>>;

    /// Merge `patch` into the existing row, or create one with defaults
    fn upsert(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        patch: SyncStatePatch,
    ) -> Result<SyncState>;

    /// Pending rows, highest `local_version` first
    fn list_pending(&self, org_id: &str, limit: usize) -> Result<Vec<SyncState>>;

    /// Rows touched after `since`, optionally restricted to `resource_types`
    fn list_touched_since(
        &self,
        org_id: &str,
        since: i64,
        resource_types: &[String],
    ) -> Result<Vec<SyncState>>;

    /// Most recent `last_synced_at` across the org
    fn latest_synced_at(&self, org_id: &str) -> Result<Option<i64>>;

    /// Row counts per status plus offline queue depth
    fn stats(&self, org_id: &str) -> Result<SyncStats>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a sync state from a database row
    fn parse_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncState> {
        let clock: String = row.get(5)?;
        let status: String = row.get(7)?;
        Ok(SyncState {
            org_id: row.get(0)?,
            resource_type: row.get(1)?,
            resource_id: row.get(2)?,
            local_version: row.get(3)?,
            remote_version: row.get(4)?,
            vector_clock: VectorClock::from_json_lossy(&clock),
            cid: row.get(6)?,
            sync_status: SyncStatus::parse(&status).unwrap_or_default(),
            last_synced_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn get(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<SyncState>> {
        let state = self
            .conn
            .query_row(
                &format!(
                    "SELECT {STATE_COLUMNS} FROM sync_state
                     WHERE org_id = ? AND resource_type = ? AND resource_id = ?"
                ),
                params![org_id, resource_type, resource_id],
                Self::parse_state,
            )
            .optional()?;
        Ok(state)
    }

    fn upsert(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        patch: SyncStatePatch,
    ) -> Result<SyncState> {
        let mut state = self
            .get(org_id, resource_type, resource_id)?
            .unwrap_or_else(|| SyncState::new(org_id, resource_type, resource_id));
        state.apply(patch);

        self.conn.execute(
            "INSERT INTO sync_state (org_id, resource_type, resource_id, local_version,
                remote_version, vector_clock, cid, sync_status, last_synced_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (org_id, resource_type, resource_id) DO UPDATE SET
                local_version = MAX(sync_state.local_version, excluded.local_version),
                remote_version = MAX(sync_state.remote_version, excluded.remote_version),
                vector_clock = excluded.vector_clock,
                cid = excluded.cid,
                sync_status = excluded.sync_status,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at",
            params![
                state.org_id,
                state.resource_type,
                state.resource_id,
                state.local_version,
                state.remote_version,
                state.vector_clock.to_json(),
                state.cid,
                state.sync_status.as_str(),
                state.last_synced_at,
                state.created_at,
                state.updated_at,
            ],
        )?;

        Ok(state)
    }

    fn list_pending(&self, org_id: &str, limit: usize) -> Result<Vec<SyncState>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STATE_COLUMNS} FROM sync_state
             WHERE org_id = ? AND sync_status = 'pending'
             ORDER BY local_version DESC
             LIMIT ?"
        ))?;

        let states = stmt
            .query_map(params![org_id, limit as i64], Self::parse_state)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(states)
    }

    fn list_touched_since(
        &self,
        org_id: &str,
        since: i64,
        resource_types: &[String],
    ) -> Result<Vec<SyncState>> {
        let mut sql = format!(
            "SELECT {STATE_COLUMNS} FROM sync_state WHERE org_id = ?1 AND updated_at > ?2"
        );
        let mut values: Vec<SqlValue> = vec![org_id.to_string().into(), since.into()];

        if !resource_types.is_empty() {
            let placeholders = (0..resource_types.len())
                .map(|index| format!("?{}", index + 3))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND resource_type IN ({placeholders})"));
            values.extend(resource_types.iter().cloned().map(SqlValue::from));
        }
        sql.push_str(" ORDER BY updated_at ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let states = stmt
            .query_map(params_from_iter(values.iter()), Self::parse_state)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(states)
    }

    fn latest_synced_at(&self, org_id: &str) -> Result<Option<i64>> {
        let latest = self.conn.query_row(
            "SELECT MAX(last_synced_at) FROM sync_state WHERE org_id = ?",
            params![org_id],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    fn stats(&self, org_id: &str) -> Result<SyncStats> {
        let mut stats = self.conn.query_row(
            "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN sync_status = 'synced' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sync_status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sync_status = 'conflict' THEN 1 ELSE 0 END), 0)
             FROM sync_state WHERE org_id = ?",
            params![org_id],
            |row| {
                Ok(SyncStats {
                    total: row.get(0)?,
                    synced: row.get(1)?,
                    pending: row.get(2)?,
                    conflict: row.get(3)?,
                    ..SyncStats::default()
                })
            },
        )?;

        (stats.queue_size, stats.failed_queue_items) = self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
             FROM offline_queue WHERE org_id = ?",
            params![org_id],
            |row| Ok((row.get::<_, usize>(0)?, row.get::<_, usize>(1)?)),
        )?;

        stats.unresolved_conflicts = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE org_id = ? AND resolved = 0",
            params![org_id],
            |row| row.get(0),
        )?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|&(peer, count)| (peer, count)).collect()
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());
        assert!(repo.get("org", "knowledge", "kb_1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_creates_with_defaults() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());

        let created = repo
            .upsert("org", "knowledge", "kb_1", SyncStatePatch::default())
            .unwrap();
        assert_eq!(created.local_version, 1);
        assert_eq!(created.sync_status, SyncStatus::Synced);

        let fetched = repo.get("org", "knowledge", "kb_1").unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_upsert_merges_fields() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());

        repo.upsert(
            "org",
            "member",
            "m_1",
            SyncStatePatch {
                local_version: Some(3),
                vector_clock: Some(clock(&[("alice", 3)])),
                ..SyncStatePatch::default()
            },
        )
        .unwrap();
        let merged = repo
            .upsert("org", "member", "m_1", SyncStatePatch::status(SyncStatus::Pending))
            .unwrap();

        assert_eq!(merged.local_version, 3);
        assert_eq!(merged.vector_clock, clock(&[("alice", 3)]));
        assert_eq!(merged.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_upsert_keeps_versions_monotonic() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());

        repo.upsert(
            "org",
            "member",
            "m_1",
            SyncStatePatch {
                local_version: Some(7),
                remote_version: Some(4),
                ..SyncStatePatch::default()
            },
        )
        .unwrap();
        repo.upsert(
            "org",
            "member",
            "m_1",
            SyncStatePatch {
                local_version: Some(2),
                remote_version: Some(1),
                ..SyncStatePatch::default()
            },
        )
        .unwrap();

        let state = repo.get("org", "member", "m_1").unwrap().unwrap();
        assert_eq!(state.local_version, 7);
        assert_eq!(state.remote_version, 4);
    }

    #[test]
    fn test_list_pending_orders_and_limits() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());

        for (id, version) in [("a", 2), ("b", 9), ("c", 5), ("d", 7)] {
            repo.upsert(
                "org",
                "project",
                id,
                SyncStatePatch {
                    local_version: Some(version),
                    sync_status: Some(SyncStatus::Pending),
                    ..SyncStatePatch::default()
                },
            )
            .unwrap();
        }
        repo.upsert(
            "org",
            "project",
            "synced",
            SyncStatePatch {
                local_version: Some(100),
                ..SyncStatePatch::default()
            },
        )
        .unwrap();
        repo.upsert(
            "other-org",
            "project",
            "x",
            SyncStatePatch::status(SyncStatus::Pending),
        )
        .unwrap();

        let pending = repo.list_pending("org", 3).unwrap();
        let versions = pending.iter().map(|s| s.local_version).collect::<Vec<_>>();
        assert_eq!(versions, vec![9, 7, 5]);
        assert!(pending.iter().all(|s| s.sync_status == SyncStatus::Pending));
    }

    #[test]
    fn test_list_touched_since_filters_types() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());

        repo.upsert("org", "member", "m_1", SyncStatePatch::default())
            .unwrap();
        repo.upsert("org", "knowledge", "kb_1", SyncStatePatch::default())
            .unwrap();
        repo.upsert("org", "role", "r_1", SyncStatePatch::default())
            .unwrap();

        let all = repo.list_touched_since("org", 0, &[]).unwrap();
        assert_eq!(all.len(), 3);

        let filtered = repo
            .list_touched_since("org", 0, &["member".to_string(), "role".to_string()])
            .unwrap();
        let mut types = filtered
            .iter()
            .map(|s| s.resource_type.as_str())
            .collect::<Vec<_>>();
        types.sort_unstable();
        assert_eq!(types, vec!["member", "role"]);

        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        assert!(repo.list_touched_since("org", future, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_stats_totals_match_status_counts() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());

        repo.upsert("org", "member", "m_1", SyncStatePatch::default())
            .unwrap();
        repo.upsert("org", "member", "m_2", SyncStatePatch::status(SyncStatus::Pending))
            .unwrap();
        repo.upsert("org", "role", "r_1", SyncStatePatch::status(SyncStatus::Conflict))
            .unwrap();

        let stats = repo.stats("org").unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.total, stats.synced + stats.pending + stats.conflict);
        assert_eq!(stats.queue_size, 0);

        let empty = repo.stats("nobody").unwrap();
        assert_eq!(empty, SyncStats::default());
    }

    #[test]
    fn test_malformed_stored_clock_reads_as_empty() {
        let db = setup();
        let repo = SqliteSyncStateRepository::new(db.connection());
        repo.upsert("org", "member", "m_1", SyncStatePatch::default())
            .unwrap();
        db.connection()
            .execute("UPDATE sync_state SET vector_clock = 'oops'", [])
            .unwrap();

        let state = repo.get("org", "member", "m_1").unwrap().unwrap();
        assert!(state.vector_clock.is_empty());
    }
}
