//! Sync Orchestrator
//!
//! Drains the write queue against the remote backend. One drain at a time:
//! requests that arrive while a drain is running are ignored. Each drain
//! works on a snapshot of the items pending when it started and leaves
//! every one of them either synced or failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use super::submit::{affected_cache_keys, Submitter};
use crate::cache::CacheStore;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::Result;
use crate::model::RecordKind;
use crate::queue::{QueueCounts, QueueItem, WriteQueue};

/// What started a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Reconnect,
    SessionStart,
    Manual,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTrigger::Reconnect => write!(f, "reconnect"),
            SyncTrigger::SessionStart => write!(f, "session start"),
            SyncTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome of one completed drain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    pub trigger: SyncTrigger,
    pub synced: usize,
    pub failed: usize,
    /// Items left pending, after a stop request or an unreadable local state
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Published sync state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub in_progress: bool,
    pub pending: usize,
    pub failed: usize,
    pub last_report: Option<DrainReport>,
}

/// Holds the single-flight flag until dropped
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum ItemOutcome {
    Synced,
    Failed,
    /// Removed or resolved since the snapshot was taken
    Vanished,
    /// Local state could not be read; left as it was
    Unchecked,
}

/// Queue drainer
pub struct SyncOrchestrator {
    queue: Arc<WriteQueue>,
    cache: Arc<CacheStore>,
    connectivity: Arc<ConnectivityMonitor>,
    submitter: Submitter,
    debounce: Duration,
    in_flight: AtomicBool,
    stop_requested: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<WriteQueue>,
        cache: Arc<CacheStore>,
        connectivity: Arc<ConnectivityMonitor>,
        submitter: Submitter,
        debounce: Duration,
    ) -> Self {
        let counts = *queue.subscribe().borrow();
        let (status, _) = watch::channel(SyncStatus {
            pending: counts.pending,
            failed: counts.failed,
            ..Default::default()
        });

        Self {
            queue,
            cache,
            connectivity,
            submitter,
            debounce,
            in_flight: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            status,
        }
    }

    /// Whether a drain is running right now
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Observe sync status
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Let the running drain finish its current item and stop there.
    /// Later drain requests are ignored.
    pub fn request_stop(&self) {
        if self.is_running() {
            tracing::info!("Stop requested for running drain");
        }
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Run one drain.
    ///
    /// Returns `None` when another drain is already running, a stop has
    /// been requested or the device is offline.
    pub async fn drain(&self, trigger: SyncTrigger) -> Result<Option<DrainReport>> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("Drain ({}) ignored: already running", trigger);
            return Ok(None);
        };
        if self.stop_requested.load(Ordering::Acquire) {
            tracing::debug!("Drain ({}) ignored: stopping", trigger);
            return Ok(None);
        }
        if !self.connectivity.is_online() {
            tracing::debug!("Drain ({}) ignored: offline", trigger);
            return Ok(None);
        }

        self.status.send_modify(|s| s.in_progress = true);

        let result = self.drain_snapshot(trigger).await;

        let counts = match self.queue.refresh_counts().await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!("Failed to refresh queue counts: {}", e);
                *self.queue.subscribe().borrow()
            }
        };
        self.status.send_modify(|s| {
            s.in_progress = false;
            s.pending = counts.pending;
            s.failed = counts.failed;
            if let Ok(report) = &result {
                s.last_report = Some(report.clone());
            }
        });

        result.map(Some)
    }

    async fn drain_snapshot(&self, trigger: SyncTrigger) -> Result<DrainReport> {
        let started_at = Utc::now();

        let mut snapshot: Vec<QueueItem> = Vec::new();
        for kind in RecordKind::DRAIN_ORDER {
            snapshot.extend(self.queue.list_pending(Some(kind)).await?);
        }
        tracing::info!("Sync ({}) started: {} pending", trigger, snapshot.len());

        let (mut synced, mut failed, mut skipped) = (0, 0, 0);
        for item in &snapshot {
            if self.stop_requested.load(Ordering::Acquire) {
                skipped += 1;
                continue;
            }
            match self.process_item(item).await {
                ItemOutcome::Synced => synced += 1,
                ItemOutcome::Failed => failed += 1,
                ItemOutcome::Unchecked => skipped += 1,
                ItemOutcome::Vanished => {}
            }
        }

        let report = DrainReport {
            trigger,
            synced,
            failed,
            skipped,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            "Sync ({}) finished: {} synced, {} failed, {} skipped",
            trigger, synced, failed, skipped
        );
        Ok(report)
    }

    /// Submit one item and record the result. Local store errors are
    /// logged and never end the drain.
    async fn process_item(&self, item: &QueueItem) -> ItemOutcome {
        match self.queue.get(&item.local_id).await {
            Ok(Some(current)) if current.is_pending() => {}
            Ok(_) => return ItemOutcome::Vanished,
            Err(e) => {
                tracing::error!("Failed to read queue item {}: {}", item.local_id, e);
                return ItemOutcome::Unchecked;
            }
        }

        match self.submitter.submit(&item.draft).await {
            Ok(remote_id) => {
                if let Err(e) = self.queue.mark_synced(&item.local_id, &remote_id).await {
                    tracing::error!(
                        "{} {} written as {} but not marked synced: {}",
                        item.kind(), item.local_id, remote_id, e
                    );
                }
                for key in affected_cache_keys(item.kind()) {
                    if let Err(e) = self.cache.invalidate(key).await {
                        tracing::warn!("Failed to invalidate cache '{}': {}", key, e);
                    }
                }
                tracing::debug!("Synced {} {} as {}", item.kind(), item.local_id, remote_id);
                ItemOutcome::Synced
            }
            Err(e) => {
                let message = e.item_message();
                if e.is_validation() {
                    tracing::info!("Rejected {} {}: {}", item.kind(), item.local_id, message);
                } else {
                    tracing::warn!("Failed to submit {} {}: {}", item.kind(), item.local_id, message);
                }
                if let Err(e) = self.queue.mark_failed(&item.local_id, &message).await {
                    tracing::error!("Failed to mark {} failed: {}", item.local_id, e);
                }
                ItemOutcome::Failed
            }
        }
    }

    /// Drain once per online transition, after the link has held for the
    /// debounce window. Keeps the published counts current in between.
    ///
    /// `events` must be taken from the connectivity monitor before any
    /// probe can report. A device already online with pending writes when
    /// this starts is treated as having just reconnected.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ConnectivityEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Sync orchestrator running (debounce {:?})", self.debounce);

        let missed = self.connectivity.is_online() && self.has_pending().await;
        if !missed || self.settle(&mut events, &mut shutdown).await {
            if missed && self.has_pending().await {
                self.reconnect().await;
            }
            self.listen(events, shutdown).await;
        }

        self.request_stop();
        tracing::debug!("Sync orchestrator stopped");
    }

    async fn has_pending(&self) -> bool {
        match self.queue.counts().await {
            Ok(counts) => counts.pending > 0,
            Err(e) => {
                tracing::warn!("Failed to read queue counts: {}", e);
                false
            }
        }
    }

    async fn reconnect(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        if let Err(e) = self.drain(SyncTrigger::Reconnect).await {
            tracing::error!("Reconnect sync failed: {}", e);
        }
    }

    async fn listen(
        &self,
        mut events: broadcast::Receiver<ConnectivityEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut counts = self.queue.subscribe();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(ConnectivityEvent::BecameOnline) => {
                        if !self.settle(&mut events, &mut shutdown).await {
                            break;
                        }
                        self.reconnect().await;
                    }
                    Ok(ConnectivityEvent::BecameOffline) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Missed {} connectivity events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = counts.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let QueueCounts { pending, failed, .. } = *counts.borrow_and_update();
                    self.status.send_if_modified(|s| {
                        let modified = s.pending != pending || s.failed != failed;
                        s.pending = pending;
                        s.failed = failed;
                        modified
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Wait out the debounce window and drop the transitions that arrived
    /// during it. Returns false on shutdown.
    async fn settle(
        &self,
        events: &mut broadcast::Receiver<ConnectivityEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.debounce) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return false;
                }
            }
        }
        while let Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) = events.try_recv() {}
        true
    }
}
