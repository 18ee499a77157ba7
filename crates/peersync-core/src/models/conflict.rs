//! Sync conflict model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::clock::VectorClock;
use crate::detector::Side;

/// A unique identifier for a conflict record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID
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

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How conflicts for a resource type are settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Wait for an explicit resolution call
    #[default]
    Manual,
    /// Later timestamp wins
    Lww,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Lww => "lww",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "lww" => Some(Self::Lww),
            _ => None,
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence of two concurrent histories for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub org_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub local_version: i64,
    pub remote_version: i64,
    pub local_clock: VectorClock,
    pub remote_clock: VectorClock,
    pub local_data: Value,
    pub remote_data: Value,
    pub resolution_strategy: ResolutionStrategy,
    pub resolved: bool,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
    /// Identity that settled the conflict
    pub resolved_by: Option<String>,
    /// Side whose data prevailed; `None` for merged data or while open
    pub winner: Option<Side>,
    /// Detection timestamp (Unix ms)
    pub created_at: i64,
}

impl ConflictRecord {
    /// Open (unresolved) conflict record
    #[must_use]
    pub fn open(
        org_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        local: (i64, VectorClock, Value),
        remote: (i64, VectorClock, Value),
        resolution_strategy: ResolutionStrategy,
    ) -> Self {
        let (local_version, local_clock, local_data) = local;
        let (remote_version, remote_clock, remote_data) = remote;
        Self {
            id: ConflictId::new(),
            org_id: org_id.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            local_version,
            remote_version,
            local_clock,
            remote_clock,
            local_data,
            remote_data,
            resolution_strategy,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            winner: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_record_is_unresolved() {
        let record = ConflictRecord::open(
            "org",
            "knowledge",
            "kb_1",
            (1, VectorClock::new(), json!({"title": "a"})),
            (1, VectorClock::new(), json!({"title": "b"})),
            ResolutionStrategy::Manual,
        );
        assert!(!record.resolved);
        assert!(record.resolved_at.is_none());
        assert!(record.winner.is_none());
    }

    #[test]
    fn strategy_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ResolutionStrategy::Lww).unwrap(),
            "\"lww\""
        );
        assert_eq!(ResolutionStrategy::parse("manual"), Some(ResolutionStrategy::Manual));
    }
}
