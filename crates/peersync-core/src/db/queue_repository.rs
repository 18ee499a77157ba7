//! Offline queue repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use super::columns;
use crate::clock::VectorClock;
use crate::error::{Error, Result};
use crate::models::{QueueAction, QueueItem, QueueItemId, QueueStatus};
use rusqlite::{params, Connection, OptionalExtension};

const QUEUE_COLUMNS: &str = "id, org_id, action, resource_type, resource_id, data, version,
    vector_clock, created_at, retry_count, last_retry_at, status, completed_at";

/// Trait for offline queue storage operations
pub trait QueueRepository {
    /// Persist a new item
    fn insert(&self, item: &QueueItem) -> Result<()>;

    /// Get an item by ID
    fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>>;

    /// Pending items for the org in creation order
    fn list_pending(&self, org_id: &str, limit: usize) -> Result<Vec<QueueItem>>;

    /// Items with the given status, newest first
    fn list_by_status(
        &self,
        org_id: &str,
        status: QueueStatus,
        limit: usize,
    ) -> Result<Vec<QueueItem>>;

    /// Mark a pending item delivered
    fn mark_completed(&self, id: &QueueItemId, completed_at: i64) -> Result<()>;

    /// Count a failed attempt; the item fails once its retries exceed `max_retry_count`
    fn record_failure(
        &self,
        id: &QueueItemId,
        attempted_at: i64,
        max_retry_count: u32,
    ) -> Result<(QueueStatus, u32)>;

    /// Move a failed item back to pending with a fresh retry budget
    fn requeue(&self, id: &QueueItemId) -> Result<bool>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a queue item from a database row
    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
        let action: String = row.get(2)?;
        let clock: String = row.get(7)?;
        let status: String = row.get(11)?;
        Ok(QueueItem {
            id: columns::parsed(row, 0)?,
            org_id: row.get(1)?,
            action: QueueAction::parse(&action).unwrap_or(QueueAction::Update),
            resource_type: row.get(3)?,
            resource_id: row.get(4)?,
            data: columns::json_value(row, 5)?,
            version: row.get(6)?,
            vector_clock: VectorClock::from_json_lossy(&clock),
            created_at: row.get(8)?,
            retry_count: row.get(9)?,
            last_retry_at: row.get(10)?,
            status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Failed),
            completed_at: row.get(12)?,
        })
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn insert(&self, item: &QueueItem) -> Result<()> {
        self.conn.execute(
            "INSERT INTO offline_queue (id, org_id, action, resource_type, resource_id, data,
                version, vector_clock, created_at, retry_count, last_retry_at, status, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id.as_str(),
                item.org_id,
                item.action.as_str(),
                item.resource_type,
                item.resource_id,
                serde_json::to_string(&item.data)?,
                item.version,
                item.vector_clock.to_json(),
                item.created_at,
                item.retry_count,
                item.last_retry_at,
                item.status.as_str(),
                item.completed_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM offline_queue WHERE id = ?"),
                params![id.as_str()],
                Self::parse_item,
            )
            .optional()?;
        Ok(item)
    }

    fn list_pending(&self, org_id: &str, limit: usize) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM offline_queue
             WHERE org_id = ? AND status = 'pending'
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?"
        ))?;

        let items = stmt
            .query_map(params![org_id, limit as i64], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn list_by_status(
        &self,
        org_id: &str,
        status: QueueStatus,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM offline_queue
             WHERE org_id = ? AND status = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?"
        ))?;

        let items = stmt
            .query_map(
                params![org_id, status.as_str(), limit as i64],
                Self::parse_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn mark_completed(&self, id: &QueueItemId, completed_at: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE offline_queue SET status = 'completed', completed_at = ?
             WHERE id = ? AND status = 'pending'",
            params![completed_at, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("pending queue item {id}")));
        }

        Ok(())
    }

    fn record_failure(
        &self,
        id: &QueueItemId,
        attempted_at: i64,
        max_retry_count: u32,
    ) -> Result<(QueueStatus, u32)> {
        let outcome = self
            .conn
            .query_row(
                "UPDATE offline_queue SET
                    retry_count = retry_count + 1,
                    last_retry_at = ?1,
                    status = CASE WHEN retry_count + 1 > ?2 THEN 'failed' ELSE 'pending' END
                 WHERE id = ?3 AND status = 'pending'
                 RETURNING status, retry_count",
                params![attempted_at, max_retry_count, id.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;

        let Some((status, retry_count)) = outcome else {
            return Err(Error::NotFound(format!("pending queue item {id}")));
        };
        let status = QueueStatus::parse(&status).unwrap_or(QueueStatus::Failed);
        Ok((status, retry_count))
    }

    fn requeue(&self, id: &QueueItemId) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE offline_queue SET status = 'pending', retry_count = 0, last_retry_at = NULL
             WHERE id = ? AND status = 'failed'",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }
}
