//! Per-resource synchronization state

use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;

/// Reconciliation status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local and known remote state agree
    #[default]
    Synced,
    /// Local changes not yet confirmed delivered
    Pending,
    /// At least one unresolved conflict record exists
    Conflict,
}

impl SyncStatus {
    /// Stable lowercase name used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
        }
    }

    /// Parse a stored status name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "synced" => Some(Self::Synced),
            "pending" => Some(Self::Pending),
            "conflict" => Some(Self::Conflict),
            _ => None,
        }
    }
}

/// Sync bookkeeping for one `(org, resource type, resource id)` triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub org_id: String,
    pub resource_type: String,
    pub resource_id: String,
    /// Never decreases
    pub local_version: i64,
    /// Never decreases
    pub remote_version: i64,
    pub vector_clock: VectorClock,
    /// Reserved for content addressing; not read by the engine
    pub cid: Option<String>,
    pub sync_status: SyncStatus,
    /// Last successful reconciliation (Unix ms)
    pub last_synced_at: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last touch timestamp (Unix ms)
    pub updated_at: i64,
}

impl SyncState {
    /// State for a resource touched for the first time
    #[must_use]
    pub fn new(
        org_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            org_id: org_id.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            local_version: 1,
            remote_version: 0,
            vector_clock: VectorClock::new(),
            cid: None,
            sync_status: SyncStatus::Synced,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge the supplied fields; versions only move forward
    pub fn apply(&mut self, patch: SyncStatePatch) {
        if let Some(version) = patch.local_version {
            self.local_version = self.local_version.max(version);
        }
        if let Some(version) = patch.remote_version {
            self.remote_version = self.remote_version.max(version);
        }
        if let Some(clock) = patch.vector_clock {
            self.vector_clock = clock;
        }
        if let Some(cid) = patch.cid {
            self.cid = Some(cid);
        }
        if let Some(status) = patch.sync_status {
            self.sync_status = status;
        }
        if let Some(at) = patch.last_synced_at {
            self.last_synced_at = Some(at);
        }
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Timestamp used by last-writer-wins, zero when never synced
    #[must_use]
    pub fn lww_timestamp(&self) -> i64 {
        self.last_synced_at.unwrap_or(0)
    }
}

/// Partial update for [`SyncState`]; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatePatch {
    pub local_version: Option<i64>,
    pub remote_version: Option<i64>,
    pub vector_clock: Option<VectorClock>,
    pub cid: Option<String>,
    pub sync_status: Option<SyncStatus>,
    pub last_synced_at: Option<i64>,
}

impl SyncStatePatch {
    /// Patch that only changes the status
    #[must_use]
    pub fn status(status: SyncStatus) -> Self {
        Self {
            sync_status: Some(status),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_uses_defaults() {
        let state = SyncState::new("org", "knowledge", "kb_1");
        assert_eq!(state.local_version, 1);
        assert_eq!(state.remote_version, 0);
        assert_eq!(state.sync_status, SyncStatus::Synced);
        assert!(state.vector_clock.is_empty());
        assert_eq!(state.lww_timestamp(), 0);
    }

    #[test]
    fn apply_never_moves_versions_backwards() {
        let mut state = SyncState::new("org", "member", "m_1");
        state.apply(SyncStatePatch {
            local_version: Some(5),
            remote_version: Some(3),
            ..SyncStatePatch::default()
        });
        state.apply(SyncStatePatch {
            local_version: Some(2),
            remote_version: Some(1),
            sync_status: Some(SyncStatus::Pending),
            ..SyncStatePatch::default()
        });
        assert_eq!(state.local_version, 5);
        assert_eq!(state.remote_version, 3);
        assert_eq!(state.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn status_names_roundtrip() {
        for status in [SyncStatus::Synced, SyncStatus::Pending, SyncStatus::Conflict] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncStatus::parse("deleted"), None);
    }
}
