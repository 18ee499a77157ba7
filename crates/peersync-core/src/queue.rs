//! Offline queue of locally originated changes.
//!
//! Items are written before any delivery attempt. [`OfflineQueue::drain`]
//! walks pending items oldest first and broadcasts each as a signed
//! `sync:change`; nothing but an explicit [`OfflineQueue::requeue`] brings a
//! failed item back.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::db::{
    Database, QueueRepository, SqliteQueueRepository, SqliteSyncStateRepository,
    SyncStateRepository,
};
use crate::engine::SyncContext;
use crate::error::{Error, Result};
use crate::models::{QueueAction, QueueItem, QueueItemId, QueueStatus, SyncStatePatch, SyncStatus};
use crate::peer::{Identity, Transport};
use crate::protocol::{SyncChange, SyncMessage};
use crate::util::{now_millis, resource_label};

/// Durable outbound queue with retry bookkeeping
#[derive(Clone)]
pub struct OfflineQueue {
    db: Arc<Mutex<Database>>,
    identity: Arc<dyn Identity>,
    transport: Arc<dyn Transport>,
    max_retry_count: u32,
    batch_size: usize,
    drain_lock: Arc<Mutex<()>>,
}

impl OfflineQueue {
    pub fn new(ctx: &SyncContext, config: &SyncConfig) -> Self {
        Self {
            db: ctx.db.clone(),
            identity: ctx.identity.clone(),
            transport: ctx.transport.clone(),
            max_retry_count: config.max_retry_count,
            batch_size: config.batch_size,
            drain_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Queue a change without attempting delivery.
    ///
    /// The item snapshots the resource's current version and vector clock.
    pub async fn enqueue(
        &self,
        org_id: &str,
        action: QueueAction,
        resource_type: &str,
        resource_id: &str,
        data: Value,
    ) -> Result<QueueItemId> {
        let db = self.db.lock().await;
        Self::enqueue_on(
            db.connection(),
            org_id,
            action,
            resource_type,
            resource_id,
            data,
        )
    }

    /// [`OfflineQueue::enqueue`] on an open connection or transaction
    pub(crate) fn enqueue_on(
        conn: &Connection,
        org_id: &str,
        action: QueueAction,
        resource_type: &str,
        resource_id: &str,
        data: Value,
    ) -> Result<QueueItemId> {
        let state = SqliteSyncStateRepository::new(conn).get(org_id, resource_type, resource_id)?;
        let (version, clock) = state
            .map(|state| (state.local_version, state.vector_clock))
            .unwrap_or_default();

        let item = QueueItem::new(
            org_id,
            action,
            resource_type,
            resource_id,
            data,
            version.max(1),
            clock,
        );
        SqliteQueueRepository::new(conn).insert(&item)?;
        tracing::debug!(
            "Queued {} of {} as {}",
            action.as_str(),
            resource_label(resource_type, resource_id),
            item.id
        );
        Ok(item.id)
    }

    /// Attempt delivery of up to `batch_size` pending items; returns how many
    /// were delivered.
    ///
    /// A delivery failure only affects its own item, plus any later items for
    /// the same resource, which wait for the next pass.
    pub async fn drain(&self, org_id: &str) -> Result<usize> {
        let _draining = self.drain_lock.lock().await;

        let items = {
            let db = self.db.lock().await;
            SqliteQueueRepository::new(db.connection()).list_pending(org_id, self.batch_size)?
        };

        let mut delivered = 0;
        let mut blocked = HashSet::new();
        for item in items {
            let resource = resource_label(&item.resource_type, &item.resource_id);
            if blocked.contains(&resource) {
                tracing::debug!("Holding {} behind an earlier failed change", item.id);
                continue;
            }

            match self.deliver(&item).await {
                Ok(()) => {
                    let mut db = self.db.lock().await;
                    Self::complete(&mut db, &item)?;
                    delivered += 1;
                }
                Err(error) => {
                    let (status, retries) = {
                        let db = self.db.lock().await;
                        SqliteQueueRepository::new(db.connection()).record_failure(
                            &item.id,
                            now_millis(),
                            self.max_retry_count,
                        )?
                    };
                    if status == QueueStatus::Failed {
                        tracing::warn!(
                            "Giving up on {} for {resource} after {retries} attempts: {error}",
                            item.id
                        );
                    } else {
                        tracing::warn!(
                            "Delivery of {} for {resource} failed (attempt {retries}): {error}",
                            item.id
                        );
                    }
                    blocked.insert(resource);
                }
            }
        }

        if delivered > 0 {
            tracing::debug!("Delivered {delivered} queued changes for {org_id}");
        }
        Ok(delivered)
    }

    /// Move a failed item back to pending; `false` when it was not failed
    pub async fn requeue(&self, id: &QueueItemId) -> Result<bool> {
        let db = self.db.lock().await;
        let moved = SqliteQueueRepository::new(db.connection()).requeue(id)?;
        if moved {
            tracing::info!("Requeued {id}");
        }
        Ok(moved)
    }

    /// Pending items in delivery order
    pub async fn pending(&self, org_id: &str, limit: usize) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list_pending(org_id, limit)
    }

    async fn deliver(&self, item: &QueueItem) -> Result<()> {
        let mut change = SyncChange {
            org_id: item.org_id.clone(),
            resource_type: item.resource_type.clone(),
            resource_id: item.resource_id.clone(),
            action: item.action,
            data: item.data.clone(),
            version: item.version,
            vector_clock: item.vector_clock.clone(),
            author_did: self.identity.peer_id().to_string(),
            timestamp: item.created_at,
            signature: String::new(),
        };
        change.signature = self.identity.sign(&change.signing_payload()?).await?;

        let message = SyncMessage::Change(change);
        if self.transport.broadcast_to_org(&item.org_id, &message).await? {
            Ok(())
        } else {
            Err(Error::Delivery(format!("no peer accepted {}", item.id)))
        }
    }

    fn complete(db: &mut Database, item: &QueueItem) -> Result<()> {
        let now = now_millis();
        let tx = db.transaction()?;

        SqliteQueueRepository::new(&tx).mark_completed(&item.id, now)?;

        let states = SqliteSyncStateRepository::new(&tx);
        let current = states.get(&item.org_id, &item.resource_type, &item.resource_id)?;
        if let Some(state) = current {
            if state.sync_status == SyncStatus::Pending && state.local_version == item.version {
                states.upsert(
                    &item.org_id,
                    &item.resource_type,
                    &item.resource_id,
                    SyncStatePatch {
                        sync_status: Some(SyncStatus::Synced),
                        last_synced_at: Some(now),
                        ..SyncStatePatch::default()
                    },
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}
