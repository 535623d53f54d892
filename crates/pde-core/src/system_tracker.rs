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

use parking_lot::RwLock;
use pde_metrics::EngineMetrics;
use pde_model::LiveSystem;
use pde_rt::Scheduler;
use tracing::{debug, info, warn};

use crate::collaborators::SystemRegistry;
use crate::error::{CollaboratorError, TrackerError};
use crate::events::SystemListener;

type Inventory = Arc<HashMap<String, LiveSystem>>;

/// Cached view of the systems known to the registry.
///
/// Each poll swaps in a whole new inventory; readers never observe a
/// partially applied poll. A failed poll keeps the previous inventory.
pub struct SystemTracker {
    registry: Arc<dyn SystemRegistry>,
    inventory: RwLock<Option<Inventory>>,
    listeners: RwLock<Vec<Arc<dyn SystemListener>>>,
    poll_lock: tokio::sync::Mutex<()>,
    metrics: Option<EngineMetrics>,
}

impl std::fmt::Debug for SystemTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemTracker")
            .field(
                "systems",
                &self.inventory.read().as_ref().map(|inventory| inventory.len()),
            )
            .finish_non_exhaustive()
    }
}

impl SystemTracker {
    pub fn new(registry: Arc<dyn SystemRegistry>, metrics: Option<EngineMetrics>) -> Self {
        Self {
            registry,
            inventory: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            poll_lock: tokio::sync::Mutex::new(()),
            metrics,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SystemListener>) {
        self.listeners.write().push(listener);
    }

    /// Poll once now, then every `interval` until the scheduler shuts down.
    ///
    /// Periodic polling is scheduled even when the first poll fails; the
    /// first poll's outcome is returned.
    pub async fn start(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        interval: Duration,
    ) -> Result<(), CollaboratorError> {
        let first = self.poll().await;
        let tracker = Arc::clone(self);
        scheduler.spawn_periodic("system-tracker", interval, move || {
            let tracker = tracker.clone();
            async move {
                let _ = tracker.poll().await;
            }
        });
        first
    }

    pub fn is_initialized(&self) -> bool {
        self.inventory.read().is_some()
    }

    /// Look up a live system by name.
    pub fn system_by_name(&self, name: &str) -> Result<Option<LiveSystem>, TrackerError> {
        let inventory = self.current()?;
        Ok(inventory.get(name).cloned())
    }

    /// Every live system, sorted by name.
    pub fn systems(&self) -> Result<Vec<LiveSystem>, TrackerError> {
        let inventory = self.current()?;
        let mut systems: Vec<_> = inventory.values().cloned().collect();
        systems.sort_by(|a, b| a.system_name.cmp(&b.system_name));
        Ok(systems)
    }

    fn current(&self) -> Result<Inventory, TrackerError> {
        self.inventory
            .read()
            .clone()
            .ok_or(TrackerError::NotInitialized)
    }

    /// Fetch the registry inventory, replace the cache and notify listeners
    /// once per added or removed system.
    pub async fn poll(&self) -> Result<(), CollaboratorError> {
        let _serial = self.poll_lock.lock().await;
        let fetched = match self.registry.systems().await {
            Ok(systems) => systems,
            Err(err) => {
                warn!(error = %err, "registry poll failed; keeping cached inventory");
                if let Some(metrics) = &self.metrics {
                    metrics.record_registry_poll(false);
                }
                return Err(err);
            }
        };

        let next: HashMap<String, LiveSystem> = fetched
            .into_iter()
            .map(|system| (system.system_name.clone(), system))
            .collect();
        let next = Arc::new(next);
        let previous = self.inventory.write().replace(next.clone());
        if let Some(metrics) = &self.metrics {
            metrics.record_registry_poll(true);
            metrics.set_live_systems(next.len());
        }

        let empty = HashMap::new();
        let previous_map = previous.as_deref().unwrap_or(&empty);
        let added: Vec<&LiveSystem> = next
            .values()
            .filter(|system| !previous_map.contains_key(&system.system_name))
            .collect();
        let removed: Vec<&LiveSystem> = previous_map
            .values()
            .filter(|system| !next.contains_key(&system.system_name))
            .collect();

        if previous.is_none() {
            info!(systems = next.len(), "initial registry inventory loaded");
        } else if !added.is_empty() || !removed.is_empty() {
            info!(added = added.len(), removed = removed.len(), "registry inventory changed");
        } else {
            debug!(systems = next.len(), "registry inventory unchanged");
        }

        let listeners = self.listeners.read().clone();
        for system in added {
            for listener in &listeners {
                listener.on_system_added(system);
            }
        }
        for system in removed {
            for listener in &listeners {
                listener.on_system_removed(system);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pde_model::ServiceEndpoint;

    #[derive(Default)]
    struct ScriptedRegistry {
        responses: Mutex<Vec<Result<Vec<LiveSystem>, CollaboratorError>>>,
    }

    impl ScriptedRegistry {
        fn push(&self, response: Result<Vec<LiveSystem>, CollaboratorError>) {
            self.responses.lock().insert(0, response);
        }
    }

    #[async_trait]
    impl SystemRegistry for ScriptedRegistry {
        async fn systems(&self) -> Result<Vec<LiveSystem>, CollaboratorError> {
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn services(&self, _: &str) -> Result<Vec<ServiceEndpoint>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Changes(Mutex<Vec<String>>);

    impl SystemListener for Changes {
        fn on_system_added(&self, system: &LiveSystem) {
            self.0.lock().push(format!("+{}", system.system_name));
        }
        fn on_system_removed(&self, system: &LiveSystem) {
            self.0.lock().push(format!("-{}", system.system_name));
        }
    }

    fn live(name: &str) -> LiveSystem {
        LiveSystem::new(name, "127.0.0.1", 9000)
    }

    #[tokio::test]
    async fn lookups_fail_before_first_poll() {
        let tracker = SystemTracker::new(Arc::new(ScriptedRegistry::default()), None);
        assert_eq!(
            tracker.system_by_name("a"),
            Err(TrackerError::NotInitialized)
        );
        tracker.poll().await.unwrap();
        assert_eq!(tracker.system_by_name("a"), Ok(None));
    }

    #[tokio::test]
    async fn polls_diff_by_name_and_keep_cache_on_failure() {
        let registry = Arc::new(ScriptedRegistry::default());
        registry.push(Ok(vec![live("a"), live("b")]));
        registry.push(Err(CollaboratorError::Timeout(Duration::from_secs(1))));
        registry.push(Ok(vec![live("b"), live("c")]));

        let tracker = SystemTracker::new(registry, None);
        let changes = Arc::new(Changes::default());
        tracker.add_listener(changes.clone());

        tracker.poll().await.unwrap();
        let mut first = changes.0.lock().drain(..).collect::<Vec<_>>();
        first.sort();
        assert_eq!(first, vec!["+a", "+b"]);

        assert!(tracker.poll().await.is_err());
        assert!(tracker.system_by_name("a").unwrap().is_some());
        assert!(changes.0.lock().is_empty());

        tracker.poll().await.unwrap();
        let mut second = changes.0.lock().drain(..).collect::<Vec<_>>();
        second.sort();
        assert_eq!(second, vec!["+c", "-a"]);
        let names: Vec<_> = tracker
            .systems()
            .unwrap()
            .into_iter()
            .map(|system| system.system_name)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn start_schedules_polling_after_failed_first_poll() {
        let registry = Arc::new(ScriptedRegistry::default());
        registry.push(Err(CollaboratorError::Rejected("down".into())));
        registry.push(Ok(vec![live("a")]));

        let tracker = Arc::new(SystemTracker::new(registry, None));
        let scheduler = Scheduler::new();
        assert!(tracker
            .start(&scheduler, Duration::from_millis(20))
            .await
            .is_err());
        assert!(!tracker.is_initialized());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tracker.system_by_name("a").unwrap().is_some());
        scheduler.shutdown().await;
    }
}
