//! Connectivity Monitor
//!
//! Holds the current reachability flag and broadcasts an event on every
//! online/offline transition. Platforms with native network events call
//! [`ConnectivityMonitor::report`]; everything else runs a polling probe.

mod probe;

pub use probe::{HttpProbe, ReachabilityProbe, RemoteProbe};

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Reachability transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

/// Current reachability plus transition events
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        let (events, _) = broadcast::channel(16);
        Self { state, events }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Feed an observation. Emits an event only when the state flips.
    pub fn report(&self, online: bool) -> Option<ConnectivityEvent> {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return None;
        }

        let event = if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameOffline
        };
        tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        // No subscribers is fine
        let _ = self.events.send(event);
        Some(event)
    }

    /// Receive transition events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Observe the boolean state
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Poll `probe` every `interval` (plus up to 10% jitter) until shutdown
    pub fn spawn_probe(
        self: &Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!("Reachability probe every {:?}", interval);
            loop {
                let online = probe.probe().await;
                monitor.report(online);

                let jitter_ms = rand::thread_rng().gen_range(0..=interval.as_millis() as u64 / 10);
                let delay = interval + Duration::from_millis(jitter_ms);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Reachability probe stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_events_only_on_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let mut events = monitor.subscribe();

        assert_eq!(monitor.report(false), None);
        assert_eq!(monitor.report(true), Some(ConnectivityEvent::BecameOnline));
        assert_eq!(monitor.report(true), None);
        assert_eq!(monitor.report(false), Some(ConnectivityEvent::BecameOffline));
        assert!(!monitor.is_online());

        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOnline);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOffline);
        assert!(events.try_recv().is_err());
    }

    struct FlagProbe(AtomicBool);

    #[async_trait]
    impl ReachabilityProbe for FlagProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_probe_loop_reports_transitions() {
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let mut state = monitor.watch();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = monitor.spawn_probe(probe.clone(), Duration::from_millis(5), shutdown_rx);

        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|online| *online))
            .await
            .unwrap()
            .unwrap();

        probe.0.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), state.wait_for(|online| !*online))
            .await
            .unwrap()
            .unwrap();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
