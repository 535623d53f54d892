//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use pde_metrics::EngineMetrics;
use pde_model::{AlarmCause, LiveSystem};
use tracing::{debug, warn};

use crate::alarms::AlarmManager;
use crate::closure::closure_systems;
use crate::collaborators::{LivenessProbe, SystemRegistry};
use crate::entry_store::EntryStore;
use crate::system_tracker::SystemTracker;

/// Target of a single ping.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PingTarget {
    system_name: String,
    address: String,
    port: u16,
}

/// Pings every registered system and keeps `SystemInactive` alarms current.
pub struct LivenessMonitor {
    tracker: Arc<SystemTracker>,
    store: Arc<EntryStore>,
    registry: Arc<dyn SystemRegistry>,
    probe: Arc<dyn LivenessProbe>,
    alarms: Arc<AlarmManager>,
    monitor_service: String,
    ping_timeout: Duration,
    max_concurrent: usize,
    metrics: Option<EngineMetrics>,
}

impl std::fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("monitor_service", &self.monitor_service)
            .field("ping_timeout", &self.ping_timeout)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl LivenessMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: Arc<SystemTracker>,
        store: Arc<EntryStore>,
        registry: Arc<dyn SystemRegistry>,
        probe: Arc<dyn LivenessProbe>,
        alarms: Arc<AlarmManager>,
        monitor_service: impl Into<String>,
        ping_timeout: Duration,
        max_concurrent: usize,
        metrics: Option<EngineMetrics>,
    ) -> Self {
        Self {
            tracker,
            store,
            registry,
            probe,
            alarms,
            monitor_service: monitor_service.into(),
            ping_timeout,
            max_concurrent: max_concurrent.max(1),
            metrics,
        }
    }

    /// Ping every live system once, with bounded concurrency.
    pub async fn run_pass(&self) {
        let Ok(live) = self.tracker.systems() else {
            debug!("registry inventory not loaded yet; liveness pass skipped");
            return;
        };
        let targets = self.targets(&live).await;

        let results: Vec<(PingTarget, bool)> = stream::iter(targets)
            .map(|target| async move {
                let outcome = tokio::time::timeout(
                    self.ping_timeout,
                    self.probe.ping(&target.address, target.port),
                )
                .await;
                let alive = match outcome {
                    Ok(Ok(())) => true,
                    Ok(Err(err)) => {
                        debug!(system = %target.system_name, error = %err, "ping failed");
                        false
                    }
                    Err(_) => {
                        debug!(system = %target.system_name, timeout = ?self.ping_timeout, "ping timed out");
                        false
                    }
                };
                (target, alive)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let desired = match self.store.active_entry() {
            Some(active) => closure_systems(&self.store.snapshot(), &active),
            None => Vec::new(),
        };
        let mut inactive = 0usize;
        for (target, alive) in &results {
            if let Some(metrics) = &self.metrics {
                metrics.record_ping(*alive);
            }
            if *alive {
                self.alarms
                    .clear(None, Some(&target.system_name), AlarmCause::SystemInactive);
            } else {
                inactive += 1;
                let system_id = desired
                    .iter()
                    .find(|system| system.lookup_name() == target.system_name)
                    .map(|system| system.system_id.as_str());
                self.alarms.raise(
                    system_id,
                    Some(&target.system_name),
                    AlarmCause::SystemInactive,
                );
            }
        }
        debug!(pinged = results.len(), inactive, "liveness pass complete");
    }

    /// Monitor endpoints from the registry where available, otherwise the
    /// system's registered address.
    async fn targets(&self, live: &[LiveSystem]) -> Vec<PingTarget> {
        let endpoints: HashMap<String, (String, u16)> =
            match self.registry.services(&self.monitor_service).await {
                Ok(providers) => providers
                    .into_iter()
                    .map(|provider| (provider.system_name, (provider.address, provider.port)))
                    .collect(),
                Err(err) => {
                    warn!(
                        service = %self.monitor_service,
                        error = %err,
                        "monitor endpoint lookup failed; pinging registered addresses"
                    );
                    HashMap::new()
                }
            };

        live.iter()
            .map(|system| {
                let (address, port) = endpoints
                    .get(&system.system_name)
                    .cloned()
                    .unwrap_or_else(|| (system.address.clone(), system.port));
                PingTarget {
                    system_name: system.system_name.clone(),
                    address,
                    port,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pde_model::{ServiceEndpoint, Severity};
    use pde_persistence::MemoryEntryStore;
    use std::collections::HashSet;

    struct Inventory {
        systems: Vec<LiveSystem>,
        monitors: Vec<ServiceEndpoint>,
    }

    #[async_trait]
    impl SystemRegistry for Inventory {
        async fn systems(&self) -> Result<Vec<LiveSystem>, CollaboratorError> {
            Ok(self.systems.clone())
        }

        async fn services(&self, _: &str) -> Result<Vec<ServiceEndpoint>, CollaboratorError> {
            Ok(self.monitors.clone())
        }
    }

    /// Answers for addresses in `alive`; hangs for `hang`; fails otherwise.
    #[derive(Default)]
    struct Probe {
        alive: Mutex<HashSet<(String, u16)>>,
        hang: Mutex<HashSet<(String, u16)>>,
        seen: Mutex<Vec<(String, u16)>>,
    }

    #[async_trait]
    impl LivenessProbe for Probe {
        async fn ping(&self, address: &str, port: u16) -> Result<(), CollaboratorError> {
            let key = (address.to_owned(), port);
            self.seen.lock().push(key.clone());
            if self.hang.lock().contains(&key) {
                std::future::pending::<()>().await;
            }
            if self.alive.lock().contains(&key) {
                Ok(())
            } else {
                Err(CollaboratorError::Rejected("connection refused".into()))
            }
        }
    }

    async fn monitor(probe: Arc<Probe>) -> (LivenessMonitor, Arc<AlarmManager>) {
        let registry = Arc::new(Inventory {
            systems: vec![
                LiveSystem::new("a", "10.0.0.1", 1000),
                LiveSystem::new("b", "10.0.0.2", 2000),
                LiveSystem::new("c", "10.0.0.3", 3000),
            ],
            monitors: vec![ServiceEndpoint {
                system_name: "a".into(),
                address: "10.0.0.1".into(),
                port: 1001,
                service_uri: Some("/monitor".into()),
            }],
        });
        let tracker = Arc::new(SystemTracker::new(registry.clone(), None));
        tracker.poll().await.unwrap();
        let store = Arc::new(EntryStore::open(Arc::new(MemoryEntryStore::new())).unwrap());
        let alarms = Arc::new(AlarmManager::default());
        let monitor = LivenessMonitor::new(
            tracker,
            store,
            registry,
            probe,
            alarms.clone(),
            "monitorable",
            Duration::from_millis(50),
            2,
            None,
        );
        (monitor, alarms)
    }

    #[tokio::test]
    async fn pings_monitor_endpoint_or_registered_address() {
        let probe = Arc::new(Probe::default());
        probe.alive.lock().insert(("10.0.0.1".into(), 1001));
        probe.alive.lock().insert(("10.0.0.2".into(), 2000));
        probe.hang.lock().insert(("10.0.0.3".into(), 3000));
        let (monitor, alarms) = monitor(probe.clone()).await;

        monitor.run_pass().await;

        let mut seen = probe.seen.lock().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("10.0.0.1".to_owned(), 1001),
                ("10.0.0.2".to_owned(), 2000),
                ("10.0.0.3".to_owned(), 3000)
            ]
        );
        let active = alarms.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].system_name.as_deref(), Some("c"));
        assert_eq!(active[0].cause, AlarmCause::SystemInactive);
    }

    #[tokio::test]
    async fn recovery_clears_the_inactive_alarm() {
        let probe = Arc::new(Probe::default());
        let (monitor, alarms) = monitor(probe.clone()).await;
        monitor.run_pass().await;
        monitor.run_pass().await;
        assert_eq!(alarms.active().len(), 3);

        probe.alive.lock().insert(("10.0.0.2".into(), 2000));
        monitor.run_pass().await;
        let b = alarms
            .list(&Default::default())
            .into_iter()
            .find(|alarm| alarm.system_name.as_deref() == Some("b"))
            .unwrap();
        assert_eq!(b.severity(), Severity::Cleared);
        assert_eq!(alarms.active().len(), 2);
    }
}
