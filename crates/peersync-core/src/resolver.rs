//! Conflict resolution.
//!
//! [`ConflictResolver`] handles a remote change whose clock is concurrent
//! with the local one. Resource types configured for last-writer-wins are
//! settled immediately; everything else is escalated to an open
//! [`ConflictRecord`] and the resource stays in `conflict` until
//! [`SyncEngine::resolve_conflict`](crate::engine::SyncEngine::resolve_conflict)
//! is called.
//!
//! Record store writes happen before the bookkeeping transaction is opened,
//! so a crash between the two leaves the data applied and the state untouched.

use rusqlite::Connection;
use serde_json::Value;

use crate::clock::VectorClock;
use crate::db::{
    ConflictRepository, Database, Resolution, SqliteConflictRepository,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::detector::Side;
use crate::engine::SyncContext;
use crate::error::Result;
use crate::models::{
    ConflictId, ConflictRecord, QueueAction, ResolutionStrategy, SyncState, SyncStatePatch,
    SyncStatus,
};
use crate::peer::RecordStore;
use crate::policy::ConflictPolicy;
use crate::protocol::{ResourceSnapshot, SyncChange};
use crate::queue::OfflineQueue;
use crate::util::{now_millis, resource_label};

/// A remote version of a resource, from a change or a response entry
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub org_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub action: QueueAction,
    pub data: Value,
    pub version: i64,
    pub vector_clock: VectorClock,
    /// Identity of the peer the change came from
    pub author: String,
    /// Unix ms used by last-writer-wins
    pub timestamp: i64,
}

impl From<SyncChange> for RemoteChange {
    fn from(change: SyncChange) -> Self {
        Self {
            org_id: change.org_id,
            resource_type: change.resource_type,
            resource_id: change.resource_id,
            action: change.action,
            data: change.data,
            version: change.version,
            vector_clock: change.vector_clock,
            author: change.author_did,
            timestamp: change.timestamp,
        }
    }
}

impl RemoteChange {
    /// Treat a response entry as a change stamped with its `updated_at`.
    ///
    /// A snapshot without data stands for a deleted record.
    #[must_use]
    pub fn from_snapshot(org_id: &str, author: &str, snapshot: ResourceSnapshot) -> Self {
        Self {
            org_id: org_id.to_string(),
            resource_type: snapshot.resource_type,
            resource_id: snapshot.resource_id,
            action: action_for(&snapshot.data),
            data: snapshot.data,
            version: snapshot.version,
            vector_clock: snapshot.vector_clock,
            author: author.to_string(),
            timestamp: snapshot.updated_at,
        }
    }

    fn label(&self) -> String {
        resource_label(&self.resource_type, &self.resource_id)
    }
}

/// What the resolver did with a concurrent change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// Left open for a manual decision
    Escalated { conflict_id: ConflictId },
    /// Settled automatically
    Settled {
        conflict_id: ConflictId,
        winner: Side,
    },
}

/// Per-resource-type policy dispatch for concurrent changes
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    #[must_use]
    pub fn strategy_for(&self, resource_type: &str) -> ResolutionStrategy {
        self.policy.strategy_for(resource_type)
    }

    /// Settle or escalate a change concurrent with `local`
    pub async fn resolve(
        &self,
        ctx: &SyncContext,
        local: &SyncState,
        remote: &RemoteChange,
    ) -> Result<Resolved> {
        let local_data = ctx
            .records
            .get(&remote.org_id, &remote.resource_type, &remote.resource_id)
            .await?
            .unwrap_or(Value::Null);

        match self.strategy_for(&remote.resource_type) {
            ResolutionStrategy::Manual => {
                let conflict_id = {
                    let mut db = ctx.db.lock().await;
                    escalate(&mut db, local, &local_data, remote)?
                };
                tracing::info!(
                    "Conflict on {} from {} awaits manual resolution",
                    remote.label(),
                    remote.author
                );
                Ok(Resolved::Escalated { conflict_id })
            }
            ResolutionStrategy::Lww => {
                let winner = if remote.timestamp > local.lww_timestamp() {
                    Side::Remote
                } else {
                    Side::Local
                };
                if winner == Side::Remote {
                    write_remote(ctx.records.as_ref(), remote).await?;
                }

                let conflict_id = {
                    let mut db = ctx.db.lock().await;
                    settle_lww(
                        &mut db,
                        local,
                        &local_data,
                        remote,
                        winner,
                        ctx.identity.peer_id(),
                    )?
                };
                tracing::debug!(
                    "Conflict on {} settled by timestamp, {} side kept",
                    remote.label(),
                    winner.as_str()
                );
                Ok(Resolved::Settled {
                    conflict_id,
                    winner,
                })
            }
        }
    }
}

fn escalate(
    db: &mut Database,
    local: &SyncState,
    local_data: &Value,
    remote: &RemoteChange,
) -> Result<ConflictId> {
    let tx = db.transaction()?;

    let record = record_divergence(&tx, local, local_data, remote, ResolutionStrategy::Manual)?;
    SqliteSyncStateRepository::new(&tx).upsert(
        &remote.org_id,
        &remote.resource_type,
        &remote.resource_id,
        SyncStatePatch {
            remote_version: Some(remote.version),
            sync_status: Some(SyncStatus::Conflict),
            ..SyncStatePatch::default()
        },
    )?;

    tx.commit()?;
    Ok(record.id)
}

fn settle_lww(
    db: &mut Database,
    local: &SyncState,
    local_data: &Value,
    remote: &RemoteChange,
    winner: Side,
    peer_id: &str,
) -> Result<ConflictId> {
    let now = now_millis();
    let tx = db.transaction()?;

    let record = record_divergence(&tx, local, local_data, remote, ResolutionStrategy::Lww)?;
    match winner {
        Side::Remote => {
            adopt_remote(
                &tx,
                &local.vector_clock,
                remote,
                ResolutionStrategy::Lww,
                peer_id,
                now,
            )?;
        }
        Side::Local => {
            SqliteConflictRepository::new(&tx).resolve_open(
                &remote.org_id,
                &remote.resource_type,
                &remote.resource_id,
                &Resolution {
                    strategy: ResolutionStrategy::Lww,
                    resolved_by: peer_id,
                    winner: Some(Side::Local),
                    resolved_at: now,
                },
            )?;
            SqliteSyncStateRepository::new(&tx).upsert(
                &remote.org_id,
                &remote.resource_type,
                &remote.resource_id,
                SyncStatePatch {
                    remote_version: Some(remote.version),
                    vector_clock: Some(local.vector_clock.merge(&remote.vector_clock)),
                    sync_status: Some(SyncStatus::Pending),
                    ..SyncStatePatch::default()
                },
            )?;
            // The losing peer converges once it receives the merged clock.
            OfflineQueue::enqueue_on(
                &tx,
                &remote.org_id,
                action_for(local_data),
                &remote.resource_type,
                &remote.resource_id,
                local_data.clone(),
            )?;
        }
    }

    tx.commit()?;
    Ok(record.id)
}

/// Insert a conflict record, or refresh the open one for the same resource
fn record_divergence(
    conn: &Connection,
    local: &SyncState,
    local_data: &Value,
    remote: &RemoteChange,
    strategy: ResolutionStrategy,
) -> Result<ConflictRecord> {
    let conflicts = SqliteConflictRepository::new(conn);
    let local_side = (
        local.local_version,
        local.vector_clock.clone(),
        local_data.clone(),
    );
    let remote_side = (
        remote.version,
        remote.vector_clock.clone(),
        remote.data.clone(),
    );

    if let Some(mut open) =
        conflicts.find_open(&remote.org_id, &remote.resource_type, &remote.resource_id)?
    {
        (open.local_version, open.local_clock, open.local_data) = local_side;
        (open.remote_version, open.remote_clock, open.remote_data) = remote_side;
        open.resolution_strategy = strategy;
        conflicts.refresh_sides(&open)?;
        return Ok(open);
    }

    let record = ConflictRecord::open(
        &remote.org_id,
        &remote.resource_type,
        &remote.resource_id,
        local_side,
        remote_side,
        strategy,
    );
    conflicts.insert(&record)?;
    Ok(record)
}

/// Take the remote side: merge clocks, advance versions, mark synced and
/// close any open conflict in the remote's favour.
///
/// Returns how many open conflict records were closed.
pub(crate) fn adopt_remote(
    conn: &Connection,
    local_clock: &VectorClock,
    remote: &RemoteChange,
    strategy: ResolutionStrategy,
    resolved_by: &str,
    now: i64,
) -> Result<usize> {
    let closed = SqliteConflictRepository::new(conn).resolve_open(
        &remote.org_id,
        &remote.resource_type,
        &remote.resource_id,
        &Resolution {
            strategy,
            resolved_by,
            winner: Some(Side::Remote),
            resolved_at: now,
        },
    )?;

    SqliteSyncStateRepository::new(conn).upsert(
        &remote.org_id,
        &remote.resource_type,
        &remote.resource_id,
        SyncStatePatch {
            local_version: Some(remote.version),
            remote_version: Some(remote.version),
            vector_clock: Some(local_clock.merge(&remote.vector_clock)),
            sync_status: Some(SyncStatus::Synced),
            last_synced_at: Some(now),
            ..SyncStatePatch::default()
        },
    )?;

    Ok(closed)
}

/// Apply a remote change to the record store
pub(crate) async fn write_remote(records: &dyn RecordStore, remote: &RemoteChange) -> Result<()> {
    match remote.action {
        QueueAction::Delete => {
            records
                .delete(&remote.org_id, &remote.resource_type, &remote.resource_id)
                .await
        }
        QueueAction::Create | QueueAction::Update => {
            put_record(
                records,
                &remote.org_id,
                &remote.resource_type,
                &remote.resource_id,
                &remote.data,
            )
            .await
        }
    }
}

/// Update the record, inserting it when it does not exist yet
pub(crate) async fn put_record(
    records: &dyn RecordStore,
    org_id: &str,
    resource_type: &str,
    resource_id: &str,
    data: &Value,
) -> Result<()> {
    if !records
        .update(org_id, resource_type, resource_id, data)
        .await?
    {
        records
            .insert(org_id, resource_type, resource_id, data)
            .await?;
    }
    Ok(())
}

/// Queue action that replays `data`: a missing record replays as a delete
pub(crate) fn action_for(data: &Value) -> QueueAction {
    if data.is_null() {
        QueueAction::Delete
    } else {
        QueueAction::Update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{QueueRepository, SqliteQueueRepository};
    use crate::models::QueueStatus;
    use crate::testing::TestPeer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|&(peer, count)| (peer, count)).collect()
    }

    fn remote(resource_type: &str, resource_id: &str, timestamp: i64) -> RemoteChange {
        RemoteChange {
            org_id: "org".into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action: QueueAction::Update,
            data: json!({"name": "from bob"}),
            version: 1,
            vector_clock: clock(&[("bob", 1)]),
            author: "bob".into(),
            timestamp,
        }
    }

    async fn seed_local(
        peer: &TestPeer,
        resource_type: &str,
        resource_id: &str,
        synced_at: i64,
    ) -> SyncState {
        peer.records.put(
            "org",
            resource_type,
            resource_id,
            json!({"name": "from alice"}),
        );
        let db = peer.context.db.lock().await;
        SqliteSyncStateRepository::new(db.connection())
            .upsert(
                "org",
                resource_type,
                resource_id,
                SyncStatePatch {
                    vector_clock: Some(clock(&[("alice", 1)])),
                    last_synced_at: Some(synced_at),
                    ..SyncStatePatch::default()
                },
            )
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_types_escalate_without_touching_data() {
        let peer = TestPeer::new("alice");
        let local = seed_local(&peer, "knowledge", "kb_1", 100).await;

        let resolver = ConflictResolver::default();
        let outcome = resolver
            .resolve(&peer.context, &local, &remote("knowledge", "kb_1", 200))
            .await
            .unwrap();
        let Resolved::Escalated { conflict_id } = outcome else {
            panic!("expected escalation, got {outcome:?}");
        };

        assert_eq!(
            peer.records.read("org", "knowledge", "kb_1"),
            Some(json!({"name": "from alice"}))
        );

        let db = peer.context.db.lock().await;
        let record = SqliteConflictRepository::new(db.connection())
            .get(&conflict_id)
            .unwrap()
            .unwrap();
        assert!(!record.resolved);
        assert_eq!(record.local_data, json!({"name": "from alice"}));
        assert_eq!(record.remote_data, json!({"name": "from bob"}));

        let state = SqliteSyncStateRepository::new(db.connection())
            .get("org", "knowledge", "kb_1")
            .unwrap()
            .unwrap();
        assert_eq!(state.sync_status, SyncStatus::Conflict);
        assert_eq!(state.vector_clock, clock(&[("alice", 1)]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_escalation_refreshes_the_open_record() {
        let peer = TestPeer::new("alice");
        let local = seed_local(&peer, "knowledge", "kb_1", 100).await;
        let resolver = ConflictResolver::default();

        let first = resolver
            .resolve(&peer.context, &local, &remote("knowledge", "kb_1", 200))
            .await
            .unwrap();
        let mut newer = remote("knowledge", "kb_1", 300);
        newer.vector_clock = clock(&[("bob", 2)]);
        newer.data = json!({"name": "bob again"});
        let second = resolver.resolve(&peer.context, &local, &newer).await.unwrap();
        assert_eq!(first, second);

        let db = peer.context.db.lock().await;
        let conflicts = SqliteConflictRepository::new(db.connection());
        assert_eq!(conflicts.count_open("org", "knowledge", "kb_1").unwrap(), 1);
        let open = conflicts.find_open("org", "knowledge", "kb_1").unwrap().unwrap();
        assert_eq!(open.remote_clock, clock(&[("bob", 2)]));
        assert_eq!(open.remote_data, json!({"name": "bob again"}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lww_later_remote_wins() {
        let peer = TestPeer::new("alice");
        let local = seed_local(&peer, "member", "m_1", 100).await;

        let outcome = ConflictResolver::default()
            .resolve(&peer.context, &local, &remote("member", "m_1", 200))
            .await
            .unwrap();
        let Resolved::Settled { conflict_id, winner } = outcome else {
            panic!("expected settlement, got {outcome:?}");
        };
        assert_eq!(winner, Side::Remote);
        assert_eq!(
            peer.records.read("org", "member", "m_1"),
            Some(json!({"name": "from bob"}))
        );

        let db = peer.context.db.lock().await;
        let record = SqliteConflictRepository::new(db.connection())
            .get(&conflict_id)
            .unwrap()
            .unwrap();
        assert!(record.resolved);
        assert_eq!(record.resolution_strategy, ResolutionStrategy::Lww);
        assert_eq!(record.winner, Some(Side::Remote));

        let state = SqliteSyncStateRepository::new(db.connection())
            .get("org", "member", "m_1")
            .unwrap()
            .unwrap();
        assert_eq!(state.sync_status, SyncStatus::Synced);
        assert_eq!(state.vector_clock, clock(&[("alice", 1), ("bob", 1)]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lww_tie_keeps_local_and_requeues_it() {
        let peer = TestPeer::new("alice");
        let local = seed_local(&peer, "member", "m_1", 200).await;

        let outcome = ConflictResolver::default()
            .resolve(&peer.context, &local, &remote("member", "m_1", 200))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Resolved::Settled {
                winner: Side::Local,
                ..
            }
        ));
        assert_eq!(
            peer.records.read("org", "member", "m_1"),
            Some(json!({"name": "from alice"}))
        );

        let db = peer.context.db.lock().await;
        let state = SqliteSyncStateRepository::new(db.connection())
            .get("org", "member", "m_1")
            .unwrap()
            .unwrap();
        assert_eq!(state.vector_clock, clock(&[("alice", 1), ("bob", 1)]));
        assert_eq!(state.sync_status, SyncStatus::Pending);

        let queued = SqliteQueueRepository::new(db.connection())
            .list_pending("org", 10)
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].status, QueueStatus::Pending);
        assert_eq!(queued[0].vector_clock, clock(&[("alice", 1), ("bob", 1)]));
        assert_eq!(queued[0].data, json!({"name": "from alice"}));

        let conflicts = SqliteConflictRepository::new(db.connection());
        assert_eq!(conflicts.count_open("org", "member", "m_1").unwrap(), 0);
    }

    #[test]
    fn missing_local_record_replays_as_delete() {
        assert_eq!(action_for(&Value::Null), QueueAction::Delete);
        assert_eq!(action_for(&json!({"a": 1})), QueueAction::Update);
    }
}
