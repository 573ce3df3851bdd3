//! Sync Engine
//!
//! Builds the queue, cache, connectivity monitor, remote backend and
//! orchestrator from configuration, wires them together and owns the
//! background tasks.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::audit::{AuditEmitter, RemoteAuditSink};
use crate::cache::{CacheStats, CacheStore, ReferenceData};
use crate::config::FeeSyncConfig;
use crate::connectivity::{ConnectivityMonitor, HttpProbe, ReachabilityProbe};
use crate::error::{Error, Result};
use crate::model::Actor;
use crate::queue::{QueueCounts, WriteQueue};
use crate::records::RecordService;
use crate::remote::{HttpBackend, RemoteBackend};
use crate::sync::{Submitter, SyncOrchestrator, SyncStatus, SyncTrigger};

/// Runtime knobs taken from configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub device_id: String,
    pub session: Actor,
    pub probe_interval: Duration,
    pub debounce: Duration,
    pub sync_on_start: bool,
}

impl EngineOptions {
    pub fn from_config(config: &FeeSyncConfig) -> Self {
        Self {
            device_id: config.device.id.clone(),
            session: Actor {
                id: config.session.actor_id.clone(),
                role: config.session.role,
            },
            probe_interval: config.probe_interval(),
            debounce: config.debounce(),
            sync_on_start: config.sync.on_start,
        }
    }
}

/// Point-in-time view of the whole engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub device_id: String,
    pub online: bool,
    pub sync: SyncStatus,
    pub queue: QueueCounts,
    pub cache: CacheStats,
}

/// Composition root
pub struct SyncEngine {
    options: EngineOptions,
    queue: Arc<WriteQueue>,
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteBackend>,
    connectivity: Arc<ConnectivityMonitor>,
    probe: Arc<dyn ReachabilityProbe>,
    reference: Arc<ReferenceData>,
    records: Arc<RecordService>,
    orchestrator: Arc<SyncOrchestrator>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Open the local databases and connect the HTTP backend
    pub fn from_config(config: &FeeSyncConfig) -> Result<Self> {
        std::fs::create_dir_all(config.data_dir())?;

        let queue = Arc::new(WriteQueue::open(&config.queue_path(), &config.device.id)?);
        let cache = Arc::new(CacheStore::open(&config.cache_path(), config.cache_ttl())?);
        let remote: Arc<dyn RemoteBackend> = Arc::new(HttpBackend::new(&config.remote)?);
        let probe: Arc<dyn ReachabilityProbe> =
            Arc::new(HttpProbe::new(config.probe_url(), config.probe_timeout())?);

        tracing::info!(
            "Local stores opened in {} for device {}",
            config.data_dir().display(),
            config.device.id
        );

        Ok(Self::new(
            queue,
            cache,
            remote,
            probe,
            EngineOptions::from_config(config),
        ))
    }

    /// Wire prebuilt parts together. Starts offline until the first probe.
    pub fn new(
        queue: Arc<WriteQueue>,
        cache: Arc<CacheStore>,
        remote: Arc<dyn RemoteBackend>,
        probe: Arc<dyn ReachabilityProbe>,
        options: EngineOptions,
    ) -> Self {
        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let audit = AuditEmitter::new(Arc::new(RemoteAuditSink::new(Arc::clone(&remote))));

        let reference = Arc::new(ReferenceData::new(
            Arc::clone(&cache),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
        ));
        let records = Arc::new(RecordService::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&connectivity),
            Arc::clone(&remote),
            audit,
            options.session.clone(),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&connectivity),
            Submitter::new(Arc::clone(&remote), Arc::clone(&queue)),
            options.debounce,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            options,
            queue,
            cache,
            remote,
            connectivity,
            probe,
            reference,
            records,
            orchestrator,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Probe once, then start the probe loop, the reconnect listener and
    /// the session-start drain
    pub async fn start(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }

        let online = self.probe.probe().await;
        self.connectivity.report(online);
        tracing::info!(
            "Device {} starting {}",
            self.options.device_id,
            if online { "online" } else { "offline" }
        );

        // Subscribed before the probe loop exists so no transition is lost
        let events = self.connectivity.subscribe();
        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(
            Arc::clone(&self.orchestrator).run(events, self.shutdown.subscribe()),
        ));
        tasks.push(self.connectivity.spawn_probe(
            Arc::clone(&self.probe),
            self.options.probe_interval,
            self.shutdown.subscribe(),
        ));

        if self.options.sync_on_start {
            let orchestrator = Arc::clone(&self.orchestrator);
            tasks.push(tokio::spawn(async move {
                if let Err(e) = orchestrator.drain(SyncTrigger::SessionStart).await {
                    tracing::error!("Session start sync failed: {}", e);
                }
            }));
        }

        Ok(())
    }

    /// Stop background work. The running drain finishes its current item.
    pub async fn shutdown(&self) {
        self.orchestrator.request_stop();
        self.shutdown.send_replace(true);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
        tracing::info!("Sync engine stopped");
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        Ok(EngineStatus {
            device_id: self.options.device_id.clone(),
            online: self.connectivity.is_online(),
            sync: self.orchestrator.status(),
            queue: self.queue.counts().await?,
            cache: self.cache.stats().await?,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.options.device_id
    }

    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteBackend> {
        &self.remote
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn reference(&self) -> &Arc<ReferenceData> {
        &self.reference
    }

    pub fn records(&self) -> &Arc<RecordService> {
        &self.records
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::RemoteProbe;
    use crate::model::{ActorRole, Draft, EnrollmentDraft, Term};
    use crate::records::WriteOutcome;
    use crate::remote::MemoryBackend;

    fn options(sync_on_start: bool) -> EngineOptions {
        EngineOptions {
            device_id: "office".into(),
            session: Actor { id: "admin-1".into(), role: ActorRole::Admin },
            probe_interval: Duration::from_millis(10),
            debounce: Duration::from_millis(10),
            sync_on_start,
        }
    }

    fn engine(remote: Arc<MemoryBackend>, queue: Arc<WriteQueue>, sync_on_start: bool) -> SyncEngine {
        let cache = Arc::new(CacheStore::in_memory(Duration::from_secs(60)).unwrap());
        let probe = Arc::new(RemoteProbe::new(remote.clone()));
        SyncEngine::new(queue, cache, remote, probe, options(sync_on_start))
    }

    fn enrollment() -> Draft {
        Draft::Enrollment(EnrollmentDraft {
            applicant_name: "Faith Njoroge".into(),
            date_of_birth: None,
            grade: "PP1".into(),
            term: Term::Two,
            academic_year: 2026,
            guardian_name: Some("Paul Njoroge".into()),
            guardian_phone: None,
            notes: None,
        })
    }

    #[tokio::test]
    async fn test_queued_work_drains_on_session_start() {
        let remote = Arc::new(MemoryBackend::new());
        let queue = Arc::new(WriteQueue::in_memory("office").unwrap());
        queue.enqueue(enrollment()).await.unwrap();

        let engine = engine(remote.clone(), queue, true);
        let mut status = engine.orchestrator().subscribe();
        engine.start().await.unwrap();
        assert!(engine.connectivity().is_online());

        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.last_report.is_some()),
        )
        .await
        .unwrap()
        .unwrap();
        engine.shutdown().await;

        assert_eq!(remote.enrollments().await.len(), 1);
        let snapshot = engine.status().await.unwrap();
        assert_eq!(snapshot.queue.pending, 0);
        assert_eq!(snapshot.queue.synced, 1);
    }

    #[tokio::test]
    async fn test_offline_start_then_reconnect() {
        let remote = Arc::new(MemoryBackend::new());
        remote.set_offline(true).await;
        let queue = Arc::new(WriteQueue::in_memory("office").unwrap());

        let engine = engine(remote.clone(), queue, false);
        engine.start().await.unwrap();
        assert!(!engine.connectivity().is_online());

        let outcome = engine.records().submit(enrollment()).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued { .. }));

        let mut status = engine.orchestrator().subscribe();
        remote.set_offline(false).await;
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.last_report.is_some() && s.pending == 0),
        )
        .await
        .unwrap()
        .unwrap();

        engine.shutdown().await;
        assert_eq!(remote.enrollments().await.len(), 1);
        assert!(matches!(engine.start().await, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_online_at_start_drains_without_session_sync() {
        let remote = Arc::new(MemoryBackend::new());
        let queue = Arc::new(WriteQueue::in_memory("office").unwrap());
        queue.enqueue(enrollment()).await.unwrap();

        let engine = engine(remote.clone(), queue, false);
        let mut status = engine.orchestrator().subscribe();
        engine.start().await.unwrap();

        let done = tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.last_report.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        engine.shutdown().await;

        assert_eq!(done.last_report.unwrap().trigger, SyncTrigger::Reconnect);
        assert_eq!(remote.enrollments().await.len(), 1);
    }
}
