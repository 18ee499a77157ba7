//! Offline queue item model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::clock::VectorClock;

/// A unique identifier for a queue item, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Uuid);

impl QueueItemId {
    /// Create a new unique queue item ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of local mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Create,
    Update,
    Delete,
}

impl QueueAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Delivery status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    /// Retries exhausted; only an explicit requeue brings it back
    Failed,
    Completed,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A locally originated change awaiting delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub org_id: String,
    pub action: QueueAction,
    pub resource_type: String,
    pub resource_id: String,
    /// Record snapshot at the time of the change
    pub data: Value,
    pub version: i64,
    pub vector_clock: VectorClock,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub retry_count: u32,
    pub last_retry_at: Option<i64>,
    pub status: QueueStatus,
    pub completed_at: Option<i64>,
}

impl QueueItem {
    /// Create a pending item that has never been attempted
    #[must_use]
    pub fn new(
        org_id: impl Into<String>,
        action: QueueAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        data: Value,
        version: i64,
        vector_clock: VectorClock,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            org_id: org_id.into(),
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            data,
            version,
            vector_clock,
            created_at: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
            last_retry_at: None,
            status: QueueStatus::Pending,
            completed_at: None,
        }
    }
}
