//! Sync orchestration.
//!
//! [`SyncEngine`] owns the peer protocol. Inbound messages are routed through
//! [`detect`] and the [`ConflictResolver`]; local mutations go through
//! [`SyncEngine::record_local_change`] into the [`OfflineQueue`]. The timers
//! that drive periodic full syncs and queue drains live in [`scheduler`].

mod scheduler;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

pub use scheduler::AutoSyncHandle;

use crate::clock::VectorClock;
use crate::config::SyncConfig;
use crate::db::{
    ConflictRepository, Database, Resolution, SqliteConflictRepository,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::detector::{detect, Side};
use crate::error::{Error, Result};
use crate::models::{
    ConflictId, ConflictRecord, QueueAction, QueueItemId, ResolutionStrategy, SyncState,
    SyncStatePatch, SyncStats, SyncStatus,
};
use crate::peer::{Identity, RecordStore, Transport};
use crate::policy::ConflictPolicy;
use crate::protocol::{
    ResourceSnapshot, SyncChange, SyncConflictNotice, SyncMessage, SyncRequest, SyncResponse,
};
use crate::queue::OfflineQueue;
use crate::resolver::{
    action_for, adopt_remote, put_record, write_remote, ConflictResolver, RemoteChange, Resolved,
};
use crate::util::{now_millis, resource_label};

/// Database handle plus the three collaborators the engine is wired to
#[derive(Clone)]
pub struct SyncContext {
    pub(crate) db: Arc<Mutex<Database>>,
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) identity: Arc<dyn Identity>,
    pub(crate) transport: Arc<dyn Transport>,
}

impl SyncContext {
    pub fn new(
        db: Database,
        records: Arc<dyn RecordStore>,
        identity: Arc<dyn Identity>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::from_shared(Arc::new(Mutex::new(db)), records, identity, transport)
    }

    /// Build a context around a database handle that is also used elsewhere
    pub fn from_shared(
        db: Arc<Mutex<Database>>,
        records: Arc<dyn RecordStore>,
        identity: Arc<dyn Identity>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            db,
            records,
            identity,
            transport,
        }
    }

    #[must_use]
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    /// This peer's identity
    #[must_use]
    pub fn peer_id(&self) -> &str {
        self.identity.peer_id()
    }
}

/// What [`SyncEngine::handle_message`] did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Remote data was strictly newer and has been applied
    Applied,
    /// Local state already covers the remote change
    Stale,
    /// Concurrent edit escalated for manual resolution
    ConflictPending { conflict_id: ConflictId },
    /// Concurrent edit settled by last-writer-wins
    ConflictResolved {
        conflict_id: ConflictId,
        winner: Side,
    },
    /// Answered a `sync:request` with this many resources
    Responded { resources: usize },
    /// Recorded a peer's conflict announcement
    ConflictNoted { conflict_id: ConflictId },
    /// One outcome per entry of a `sync:response`
    Batch(Vec<MessageOutcome>),
}

/// Outcome chosen for a manually resolved conflict
#[derive(Debug, Clone, PartialEq)]
pub enum ManualResolution {
    /// Keep the local record as it is
    KeepLocal,
    /// Apply the remote snapshot stored on the conflict
    TakeRemote,
    /// Apply caller-supplied data combining both sides
    Merged(Value),
}

/// Top-level sync engine for one peer
#[derive(Clone)]
pub struct SyncEngine {
    ctx: SyncContext,
    config: Arc<SyncConfig>,
    resolver: Arc<ConflictResolver>,
    queue: OfflineQueue,
    auto_sync: Arc<Mutex<Option<scheduler::ActiveSync>>>,
}

impl SyncEngine {
    /// Create an engine; fails when `config` does not validate
    pub fn new(ctx: SyncContext, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let resolver = ConflictResolver::new(ConflictPolicy::from_config(&config));
        let queue = OfflineQueue::new(&ctx, &config);
        Ok(Self {
            ctx,
            config: Arc::new(config),
            resolver: Arc::new(resolver),
            queue,
            auto_sync: Arc::new(Mutex::new(None)),
        })
    }

    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    #[must_use]
    pub const fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Route one inbound peer message.
    ///
    /// Storage and record store errors propagate; a change whose signature
    /// does not verify returns [`Error::SignatureInvalid`] without any write.
    pub async fn handle_message(
        &self,
        from_peer: &str,
        message: SyncMessage,
    ) -> Result<MessageOutcome> {
        tracing::debug!(
            "Handling {} for {} from {from_peer}",
            message.kind(),
            message.org_id()
        );
        match message {
            SyncMessage::Request(request) => self.handle_request(from_peer, request).await,
            SyncMessage::Response(response) => self.handle_response(from_peer, response).await,
            SyncMessage::Change(change) => self.handle_change(change).await,
            SyncMessage::Conflict(notice) => self.handle_conflict_notice(notice).await,
        }
    }

    async fn handle_request(
        &self,
        from_peer: &str,
        request: SyncRequest,
    ) -> Result<MessageOutcome> {
        let states = {
            let db = self.ctx.db.lock().await;
            SqliteSyncStateRepository::new(db.connection()).list_touched_since(
                &request.org_id,
                request.last_sync_time,
                &request.resource_types,
            )?
        };

        let mut resources = Vec::with_capacity(states.len());
        for state in states {
            let data = self
                .ctx
                .records
                .get(&state.org_id, &state.resource_type, &state.resource_id)
                .await?
                .unwrap_or(Value::Null);
            resources.push(ResourceSnapshot {
                resource_type: state.resource_type,
                resource_id: state.resource_id,
                data,
                version: state.local_version,
                vector_clock: state.vector_clock,
                updated_at: state.updated_at,
            });
        }

        let total = resources.len();
        let mut pages = resources
            .chunks(self.config.batch_size)
            .map(<[ResourceSnapshot]>::to_vec)
            .collect::<Vec<_>>();
        if pages.is_empty() {
            pages.push(Vec::new());
        }

        for page in pages {
            let response = SyncMessage::Response(SyncResponse {
                org_id: request.org_id.clone(),
                resources: page,
            });
            if !self
                .ctx
                .transport
                .send_to_peer(&request.org_id, from_peer, &response)
                .await?
            {
                return Err(Error::Delivery(format!(
                    "sync response to {from_peer} was not accepted"
                )));
            }
        }

        tracing::debug!("Answered sync request from {from_peer} with {total} resources");
        Ok(MessageOutcome::Responded { resources: total })
    }

    async fn handle_response(
        &self,
        from_peer: &str,
        response: SyncResponse,
    ) -> Result<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(response.resources.len());
        for snapshot in response.resources {
            let remote = RemoteChange::from_snapshot(&response.org_id, from_peer, snapshot);
            outcomes.push(self.apply_remote(remote).await?);
        }
        Ok(MessageOutcome::Batch(outcomes))
    }

    async fn handle_change(&self, change: SyncChange) -> Result<MessageOutcome> {
        let payload = change.signing_payload()?;
        let verified = self
            .ctx
            .identity
            .verify(&change.signature, &payload, &change.author_did)
            .await?;
        if !verified {
            tracing::warn!(
                "Rejected change to {} with an invalid signature from {}",
                resource_label(&change.resource_type, &change.resource_id),
                change.author_did
            );
            return Err(Error::SignatureInvalid {
                resource_type: change.resource_type,
                resource_id: change.resource_id,
                author: change.author_did,
            });
        }

        self.apply_remote(RemoteChange::from(change)).await
    }

    async fn handle_conflict_notice(&self, notice: SyncConflictNotice) -> Result<MessageOutcome> {
        let open = {
            let db = self.ctx.db.lock().await;
            SqliteConflictRepository::new(db.connection()).find_open(
                &notice.org_id,
                &notice.resource_type,
                &notice.resource_id,
            )?
        };
        if let Some(record) = open {
            return Ok(MessageOutcome::ConflictNoted {
                conflict_id: record.id,
            });
        }

        let local_data = self
            .ctx
            .records
            .get(&notice.org_id, &notice.resource_type, &notice.resource_id)
            .await?
            .unwrap_or(Value::Null);
        let strategy = self.resolver.strategy_for(&notice.resource_type);

        let conflict_id = {
            let mut db = self.ctx.db.lock().await;
            note_conflict(&mut db, &notice, local_data, strategy)?
        };
        tracing::info!(
            "Peer reported a conflict on {}",
            resource_label(&notice.resource_type, &notice.resource_id)
        );
        Ok(MessageOutcome::ConflictNoted { conflict_id })
    }

    async fn apply_remote(&self, remote: RemoteChange) -> Result<MessageOutcome> {
        let local = {
            let db = self.ctx.db.lock().await;
            SqliteSyncStateRepository::new(db.connection()).get(
                &remote.org_id,
                &remote.resource_type,
                &remote.resource_id,
            )?
        }
        .unwrap_or_else(|| {
            SyncState::new(&remote.org_id, &remote.resource_type, &remote.resource_id)
        });

        let detection = detect(&local.vector_clock, &remote.vector_clock);
        if detection.is_conflict {
            return match self.resolver.resolve(&self.ctx, &local, &remote).await? {
                Resolved::Escalated { conflict_id } => {
                    self.announce_conflict(&remote).await;
                    Ok(MessageOutcome::ConflictPending { conflict_id })
                }
                Resolved::Settled {
                    conflict_id,
                    winner,
                } => Ok(MessageOutcome::ConflictResolved {
                    conflict_id,
                    winner,
                }),
            };
        }

        if detection.winner != Some(Side::Remote) {
            tracing::debug!(
                "Ignoring stale {} for {} from {}",
                remote.action.as_str(),
                resource_label(&remote.resource_type, &remote.resource_id),
                remote.author
            );
            return Ok(MessageOutcome::Stale);
        }

        write_remote(self.ctx.records.as_ref(), &remote).await?;
        let closed = {
            let mut db = self.ctx.db.lock().await;
            commit_remote(
                &mut db,
                &local.vector_clock,
                &remote,
                self.resolver.strategy_for(&remote.resource_type),
            )?
        };
        if closed > 0 {
            tracing::info!(
                "Newer change from {} closed {closed} open conflicts on {}",
                remote.author,
                resource_label(&remote.resource_type, &remote.resource_id)
            );
        }
        Ok(MessageOutcome::Applied)
    }

    async fn announce_conflict(&self, remote: &RemoteChange) {
        let notice = SyncMessage::Conflict(SyncConflictNotice {
            org_id: remote.org_id.clone(),
            resource_type: remote.resource_type.clone(),
            resource_id: remote.resource_id.clone(),
        });
        match self
            .ctx
            .transport
            .broadcast_to_org(&remote.org_id, &notice)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!("No peer accepted the conflict notice"),
            Err(error) => tracing::warn!("Failed to broadcast conflict notice: {error}"),
        }
    }

    /// Record a mutation this peer already wrote to its record store.
    ///
    /// Bumps this peer's clock entry and `local_version`, marks the resource
    /// pending (a resource in conflict stays in conflict) and queues the change.
    pub async fn record_local_change(
        &self,
        org_id: &str,
        action: QueueAction,
        resource_type: &str,
        resource_id: &str,
        data: Value,
    ) -> Result<QueueItemId> {
        let mut db = self.ctx.db.lock().await;
        record_local(
            &mut db,
            self.ctx.peer_id(),
            org_id,
            action,
            resource_type,
            resource_id,
            data,
        )
    }

    /// Ask every peer of the org for changes since this peer last synced
    pub async fn request_full_sync(&self, org_id: &str) -> Result<bool> {
        let last_sync_time = {
            let db = self.ctx.db.lock().await;
            SqliteSyncStateRepository::new(db.connection()).latest_synced_at(org_id)?
        }
        .unwrap_or(0);

        let request = SyncMessage::Request(SyncRequest {
            org_id: org_id.to_string(),
            last_sync_time,
            resource_types: Vec::new(),
        });
        self.ctx.transport.broadcast_to_org(org_id, &request).await
    }

    /// Deliver pending queue items; returns how many were delivered
    pub async fn drain_queue(&self, org_id: &str) -> Result<usize> {
        self.queue.drain(org_id).await
    }

    /// Settle an open conflict with an explicit decision.
    ///
    /// The outcome is written to the record store and queued as an update so
    /// peers converge; the resource leaves `conflict` once no open record
    /// remains for it.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &ConflictId,
        resolution: ManualResolution,
        resolved_by: &str,
    ) -> Result<QueueItemId> {
        let record = {
            let db = self.ctx.db.lock().await;
            SqliteConflictRepository::new(db.connection()).get(conflict_id)?
        }
        .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if record.resolved {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let records = self.ctx.records.as_ref();
        let (org_id, resource_type, resource_id) = (
            record.org_id.as_str(),
            record.resource_type.as_str(),
            record.resource_id.as_str(),
        );
        let (outcome, winner) = match resolution {
            ManualResolution::KeepLocal => {
                let data = records
                    .get(org_id, resource_type, resource_id)
                    .await?
                    .unwrap_or(Value::Null);
                (data, Some(Side::Local))
            }
            ManualResolution::TakeRemote => {
                if record.remote_clock.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "conflict {conflict_id} has no remote snapshot to take"
                    )));
                }
                let data = record.remote_data.clone();
                if data.is_null() {
                    records.delete(org_id, resource_type, resource_id).await?;
                } else {
                    put_record(records, org_id, resource_type, resource_id, &data).await?;
                }
                (data, Some(Side::Remote))
            }
            ManualResolution::Merged(data) => {
                put_record(records, org_id, resource_type, resource_id, &data).await?;
                (data, None)
            }
        };

        let queued = {
            let mut db = self.ctx.db.lock().await;
            settle_manual(
                &mut db,
                &record,
                outcome,
                winner,
                resolved_by,
                self.ctx.peer_id(),
            )?
        };
        tracing::info!(
            "Conflict {conflict_id} on {} resolved by {resolved_by}",
            resource_label(resource_type, resource_id)
        );
        Ok(queued)
    }

    /// State row for one resource
    pub async fn get_state(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<SyncState>> {
        let db = self.ctx.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).get(org_id, resource_type, resource_id)
    }

    /// Merge fields into a state row, creating it with defaults
    pub async fn upsert_state(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        patch: SyncStatePatch,
    ) -> Result<SyncState> {
        let db = self.ctx.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).upsert(
            org_id,
            resource_type,
            resource_id,
            patch,
        )
    }

    /// Pending resources, highest `local_version` first, at most `batch_size`
    pub async fn list_pending(&self, org_id: &str, limit: usize) -> Result<Vec<SyncState>> {
        let limit = limit.min(self.config.batch_size);
        let db = self.ctx.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).list_pending(org_id, limit)
    }

    pub async fn stats(&self, org_id: &str) -> Result<SyncStats> {
        let db = self.ctx.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).stats(org_id)
    }

    /// Conflict records for the org, newest first
    pub async fn conflicts(
        &self,
        org_id: &str,
        include_resolved: bool,
        limit: usize,
    ) -> Result<Vec<ConflictRecord>> {
        let db = self.ctx.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list(org_id, include_resolved, limit)
    }
}

fn commit_remote(
    db: &mut Database,
    local_clock: &VectorClock,
    remote: &RemoteChange,
    strategy: ResolutionStrategy,
) -> Result<usize> {
    let tx = db.transaction()?;
    let closed = adopt_remote(&tx, local_clock, remote, strategy, &remote.author, now_millis())?;
    tx.commit()?;
    Ok(closed)
}

fn note_conflict(
    db: &mut Database,
    notice: &SyncConflictNotice,
    local_data: Value,
    strategy: ResolutionStrategy,
) -> Result<ConflictId> {
    let tx = db.transaction()?;
    let conflicts = SqliteConflictRepository::new(&tx);
    if let Some(open) =
        conflicts.find_open(&notice.org_id, &notice.resource_type, &notice.resource_id)?
    {
        return Ok(open.id);
    }

    let states = SqliteSyncStateRepository::new(&tx);
    let local = states
        .get(&notice.org_id, &notice.resource_type, &notice.resource_id)?
        .unwrap_or_else(|| {
            SyncState::new(&notice.org_id, &notice.resource_type, &notice.resource_id)
        });

    // The notice carries no remote snapshot.
    let record = ConflictRecord::open(
        &notice.org_id,
        &notice.resource_type,
        &notice.resource_id,
        (local.local_version, local.vector_clock, local_data),
        (0, VectorClock::new(), Value::Null),
        strategy,
    );
    conflicts.insert(&record)?;
    states.upsert(
        &notice.org_id,
        &notice.resource_type,
        &notice.resource_id,
        SyncStatePatch::status(SyncStatus::Conflict),
    )?;

    tx.commit()?;
    Ok(record.id)
}

fn record_local(
    db: &mut Database,
    peer_id: &str,
    org_id: &str,
    action: QueueAction,
    resource_type: &str,
    resource_id: &str,
    data: Value,
) -> Result<QueueItemId> {
    let tx = db.transaction()?;
    let states = SqliteSyncStateRepository::new(&tx);

    let current = states.get(org_id, resource_type, resource_id)?;
    let (mut clock, local_version, status) = match current {
        Some(state) => {
            let status = if state.sync_status == SyncStatus::Conflict {
                SyncStatus::Conflict
            } else {
                SyncStatus::Pending
            };
            (state.vector_clock, state.local_version + 1, status)
        }
        None => (VectorClock::new(), 1, SyncStatus::Pending),
    };
    clock.increment(peer_id);

    states.upsert(
        org_id,
        resource_type,
        resource_id,
        SyncStatePatch {
            local_version: Some(local_version),
            vector_clock: Some(clock),
            sync_status: Some(status),
            ..SyncStatePatch::default()
        },
    )?;
    let queued = OfflineQueue::enqueue_on(&tx, org_id, action, resource_type, resource_id, data)?;

    tx.commit()?;
    Ok(queued)
}

fn settle_manual(
    db: &mut Database,
    record: &ConflictRecord,
    outcome: Value,
    winner: Option<Side>,
    resolved_by: &str,
    peer_id: &str,
) -> Result<QueueItemId> {
    let now = now_millis();
    let tx = db.transaction()?;

    let conflicts = SqliteConflictRepository::new(&tx);
    conflicts.mark_resolved(
        &record.id,
        &Resolution {
            strategy: ResolutionStrategy::Manual,
            resolved_by,
            winner,
            resolved_at: now,
        },
    )?;
    let remaining =
        conflicts.count_open(&record.org_id, &record.resource_type, &record.resource_id)?;

    let states = SqliteSyncStateRepository::new(&tx);
    let current = states
        .get(&record.org_id, &record.resource_type, &record.resource_id)?
        .unwrap_or_else(|| {
            SyncState::new(&record.org_id, &record.resource_type, &record.resource_id)
        });
    let mut clock = current.vector_clock.merge(&record.remote_clock);
    // Keeping or merging is a new local edit; taking the remote side is not.
    if winner != Some(Side::Remote) {
        clock.increment(peer_id);
    }

    states.upsert(
        &record.org_id,
        &record.resource_type,
        &record.resource_id,
        SyncStatePatch {
            local_version: Some(current.local_version + 1),
            remote_version: Some(record.remote_version),
            vector_clock: Some(clock),
            sync_status: Some(if remaining > 0 {
                SyncStatus::Conflict
            } else {
                SyncStatus::Pending
            }),
            ..SyncStatePatch::default()
        },
    )?;
    let queued = OfflineQueue::enqueue_on(
        &tx,
        &record.org_id,
        action_for(&outcome),
        &record.resource_type,
        &record.resource_id,
        outcome,
    )?;

    tx.commit()?;
    Ok(queued)
}
