//! Auto-sync timers.
//!
//! One organization at a time: starting auto-sync for another organization
//! stops the running timers first and waits for them to finish, so no
//! further work happens for the previous organization once
//! [`SyncEngine::start_auto_sync`] returns.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::SyncEngine;

/// Handle to a running auto-sync, returned by [`SyncEngine::start_auto_sync`]
#[derive(Debug, Clone)]
pub struct AutoSyncHandle {
    org_id: String,
    token: CancellationToken,
}

impl AutoSyncHandle {
    #[must_use]
    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// True once the timers behind this handle have been told to stop
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub(super) struct ActiveSync {
    handle: AutoSyncHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveSync {
    async fn shutdown(self) {
        self.handle.token.cancel();
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::warn!(
                    "Auto-sync task for {} ended abnormally: {error}",
                    self.handle.org_id
                );
            }
        }
        tracing::info!("Auto-sync stopped for {}", self.handle.org_id);
    }
}

#[derive(Clone, Copy)]
enum Job {
    FullSync,
    DrainQueue,
}

impl SyncEngine {
    /// Start periodic full syncs and queue drains for `org_id`, replacing
    /// any organization that is currently auto-syncing
    pub async fn start_auto_sync(&self, org_id: &str) -> AutoSyncHandle {
        let mut active = self.auto_sync.lock().await;
        if let Some(previous) = active.take() {
            previous.shutdown().await;
        }

        let handle = AutoSyncHandle {
            org_id: org_id.to_string(),
            token: CancellationToken::new(),
        };
        let tasks = vec![
            self.spawn_job(Job::FullSync, self.config.sync_interval(), &handle),
            self.spawn_job(Job::DrainQueue, self.config.queue_drain_interval(), &handle),
        ];
        tracing::info!(
            "Auto-sync started for {org_id} (sync every {:?}, drain every {:?})",
            self.config.sync_interval(),
            self.config.queue_drain_interval()
        );

        *active = Some(ActiveSync {
            handle: handle.clone(),
            tasks,
        });
        handle
    }

    /// Stop the auto-sync behind `handle`; `false` when it was no longer active
    pub async fn stop_auto_sync(&self, handle: &AutoSyncHandle) -> bool {
        let mut active = self.auto_sync.lock().await;
        let is_current = active
            .as_ref()
            .is_some_and(|running| running.handle.org_id == handle.org_id);
        if handle.is_cancelled() || !is_current {
            return false;
        }

        if let Some(running) = active.take() {
            running.shutdown().await;
        }
        true
    }

    /// Organization currently auto-syncing
    pub async fn auto_sync_org(&self) -> Option<String> {
        self.auto_sync
            .lock()
            .await
            .as_ref()
            .map(|running| running.handle.org_id.clone())
    }

    fn spawn_job(&self, job: Job, period: Duration, handle: &AutoSyncHandle) -> JoinHandle<()> {
        let engine = self.clone();
        let org_id = handle.org_id.clone();
        let token = handle.token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => engine.run_job(job, &org_id).await,
                }
            }
        })
    }

    async fn run_job(&self, job: Job, org_id: &str) {
        match job {
            Job::FullSync => match self.request_full_sync(org_id).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!("No peer reachable for {org_id} full sync"),
                Err(error) => tracing::warn!("Full sync request for {org_id} failed: {error}"),
            },
            Job::DrainQueue => {
                if let Err(error) = self.drain_queue(org_id).await {
                    tracing::warn!("Queue drain for {org_id} failed: {error}");
                }
            }
        }
    }
}
