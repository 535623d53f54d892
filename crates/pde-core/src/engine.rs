//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Process-level wiring: builds every component once, registers listeners
//! and owns the background tasks.

use std::sync::Arc;

use anyhow::{Context, Result};
use pde_common::config::{AppConfig, BackendKind, PersistenceConfig};
use pde_metrics::{EngineMetrics, SharedRegistry};
use pde_persistence::{
    EntryBackingStore, FileEntryStore, FileRuleStore, MemoryEntryStore, MemoryRuleStore,
    PersistenceMetrics, RuleBackingStore, SqliteEntryStore, SqliteRuleStore,
};
use pde_rt::Scheduler;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::admission::PlantDescriptions;
use crate::alarms::AlarmManager;
use crate::collaborators::{LivenessProbe, RuleOrchestrator, SystemRegistry};
use crate::entry_store::EntryStore;
use crate::http_clients::{HttpLivenessProbe, HttpRegistryClient, HttpRuleOrchestrator};
use crate::liveness::LivenessMonitor;
use crate::mismatch::MismatchDetector;
use crate::reconciler::{ReconcileTrigger, RuleReconciler, RuleSettings};
use crate::system_tracker::SystemTracker;

/// External services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn SystemRegistry>,
    pub orchestrator: Arc<dyn RuleOrchestrator>,
    pub probe: Arc<dyn LivenessProbe>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// HTTP clients for the configured registry and orchestrator.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let registry = HttpRegistryClient::new(
            &config.registry.base_url,
            config.registry.request_timeout,
        )
        .context("failed to build registry client")?;
        let orchestrator = HttpRuleOrchestrator::new(
            &config.orchestrator.base_url,
            config.orchestrator.request_timeout,
        )
        .context("failed to build orchestrator client")?;
        let probe = HttpLivenessProbe::new(config.monitor.ping_timeout)
            .context("failed to build liveness probe")?;
        Ok(Self {
            registry: Arc::new(registry),
            orchestrator: Arc::new(orchestrator),
            probe: Arc::new(probe),
        })
    }
}

/// Entry and rule backing stores for the configured backend.
pub fn open_backing_stores(
    config: &PersistenceConfig,
    metrics: Option<PersistenceMetrics>,
) -> Result<(Arc<dyn EntryBackingStore>, Arc<dyn RuleBackingStore>)> {
    let stores: (Arc<dyn EntryBackingStore>, Arc<dyn RuleBackingStore>) = match config.backend {
        BackendKind::File => {
            let entries_dir = config.directory.join("entries");
            let rules_dir = config.directory.join("rules");
            let mut entries = FileEntryStore::open(&entries_dir).with_context(|| {
                format!("failed to open entry store {}", entries_dir.display())
            })?;
            let mut rules = FileRuleStore::open(&rules_dir)
                .with_context(|| format!("failed to open rule store {}", rules_dir.display()))?;
            if let Some(metrics) = metrics {
                entries = entries.with_metrics(metrics.clone());
                rules = rules.with_metrics(metrics);
            }
            (Arc::new(entries), Arc::new(rules))
        }
        BackendKind::Memory => {
            warn!("memory backend selected; plant descriptions will not survive a restart");
            (
                Arc::new(MemoryEntryStore::new()),
                Arc::new(MemoryRuleStore::new()),
            )
        }
        BackendKind::Sqlite => {
            let path = &config.sqlite_path;
            let mut entries = SqliteEntryStore::open(path)
                .with_context(|| format!("failed to open sqlite database {}", path.display()))?;
            let mut rules = SqliteRuleStore::open(path)
                .with_context(|| format!("failed to open sqlite database {}", path.display()))?;
            if let Some(metrics) = metrics {
                entries = entries.with_metrics(metrics.clone());
                rules = rules.with_metrics(metrics);
            }
            (Arc::new(entries), Arc::new(rules))
        }
    };
    info!(backend = ?config.backend, "backing stores opened");
    Ok(stores)
}

/// Engine builder.
pub struct Engine {
    config: Arc<AppConfig>,
    collaborators: Collaborators,
    backing: Option<(Arc<dyn EntryBackingStore>, Arc<dyn RuleBackingStore>)>,
    metrics_registry: Option<SharedRegistry>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.config.persistence.backend)
            .field("metrics", &self.metrics_registry.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        config: AppConfig,
        collaborators: Collaborators,
        metrics: Option<SharedRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            collaborators,
            backing: None,
            metrics_registry: metrics,
        }
    }

    /// Use these stores instead of the configured backend.
    pub fn with_backing_stores(
        mut self,
        entries: Arc<dyn EntryBackingStore>,
        rules: Arc<dyn RuleBackingStore>,
    ) -> Self {
        self.backing = Some((entries, rules));
        self
    }

    /// Load state, run the first registry poll and start every background
    /// task.
    pub async fn start(self) -> Result<EngineHandle> {
        let engine_metrics = match &self.metrics_registry {
            Some(registry) => Some(EngineMetrics::new(registry.clone())?),
            None => None,
        };
        let (entry_backing, rule_backing) = match self.backing {
            Some(stores) => stores,
            None => {
                let persistence_metrics = match &self.metrics_registry {
                    Some(registry) => Some(PersistenceMetrics::new(registry.clone())?),
                    None => None,
                };
                open_backing_stores(&self.config.persistence, persistence_metrics)?
            }
        };

        let store = Arc::new(EntryStore::open(entry_backing).context("failed to load entries")?);
        let admission = Arc::new(PlantDescriptions::new(store.clone()));
        let alarms = Arc::new(AlarmManager::new(engine_metrics.clone()));
        let tracker = Arc::new(SystemTracker::new(
            self.collaborators.registry.clone(),
            engine_metrics.clone(),
        ));
        let scheduler = Scheduler::new();

        let reconciler = Arc::new(RuleReconciler::new(
            store.clone(),
            tracker.clone(),
            self.collaborators.orchestrator.clone(),
            rule_backing,
            RuleSettings {
                interface_name: self.config.orchestrator.default_interface.clone(),
                default_priority: self.config.orchestrator.default_priority,
            },
            engine_metrics.clone(),
        ));
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let trigger = Arc::new(ReconcileTrigger::new(trigger_tx, &store));
        store.add_listener(trigger.clone());
        tracker.add_listener(trigger.clone());
        scheduler.spawn("rule-reconciler", reconciler.clone().run(trigger_rx));

        let monitor = &self.config.monitor;
        let detector = Arc::new(MismatchDetector::new(
            store.clone(),
            tracker.clone(),
            alarms.clone(),
            monitor.ignored_systems.iter().cloned(),
        ));
        store.add_listener(detector.clone());
        tracker.add_listener(detector.clone());

        if let Err(err) = tracker
            .start(&scheduler, self.config.registry.poll_interval)
            .await
        {
            warn!(error = %err, "initial registry poll failed; continuing with periodic polling");
        }
        trigger.fire();

        let retry_reconciler = reconciler.clone();
        let retry_trigger = trigger.clone();
        scheduler.spawn_periodic(
            "rule-reconcile-retry",
            self.config.registry.poll_interval,
            move || {
                if retry_reconciler.needs_retry() {
                    retry_trigger.fire();
                }
                std::future::ready(())
            },
        );

        let periodic_detector = detector.clone();
        scheduler.spawn_periodic("mismatch-detector", monitor.mismatch_interval, move || {
            let detector = periodic_detector.clone();
            async move { detector.run_pass() }
        });

        let liveness = Arc::new(LivenessMonitor::new(
            tracker.clone(),
            store.clone(),
            self.collaborators.registry.clone(),
            self.collaborators.probe.clone(),
            alarms.clone(),
            monitor.monitor_service_definition.clone(),
            monitor.ping_timeout,
            monitor.max_concurrent_pings,
            engine_metrics,
        ));
        scheduler.spawn_periodic("liveness", monitor.ping_interval, move || {
            let liveness = liveness.clone();
            async move { liveness.run_pass().await }
        });

        detector.run_pass();
        info!(
            entries = store.list().len(),
            active = ?store.active_entry().map(|entry| entry.id),
            registry_ready = tracker.is_initialized(),
            tasks = scheduler.task_count(),
            "plant description engine started"
        );

        Ok(EngineHandle {
            config: self.config,
            store,
            admission,
            tracker,
            alarms,
            reconciler,
            scheduler,
        })
    }
}

/// Running engine.
#[derive(Debug)]
pub struct EngineHandle {
    config: Arc<AppConfig>,
    store: Arc<EntryStore>,
    admission: Arc<PlantDescriptions>,
    tracker: Arc<SystemTracker>,
    alarms: Arc<AlarmManager>,
    reconciler: Arc<RuleReconciler>,
    scheduler: Scheduler,
}

impl EngineHandle {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<EntryStore> {
        self.store.clone()
    }

    pub fn admission(&self) -> Arc<PlantDescriptions> {
        self.admission.clone()
    }

    pub fn tracker(&self) -> Arc<SystemTracker> {
        self.tracker.clone()
    }

    pub fn alarms(&self) -> Arc<AlarmManager> {
        self.alarms.clone()
    }

    pub fn reconciler(&self) -> Arc<RuleReconciler> {
        self.reconciler.clone()
    }

    /// Stop every background task. In-flight passes are abandoned at their
    /// next await point.
    pub async fn shutdown(self) {
        info!("stopping plant description engine");
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_backend_lays_out_entries_and_rules() {
        let dir = tempdir().unwrap();
        let config = PersistenceConfig {
            backend: BackendKind::File,
            directory: dir.path().join("data"),
            sqlite_path: dir.path().join("unused.sqlite3"),
        };
        let (entries, rules) = open_backing_stores(&config, None).unwrap();
        assert!(entries.read_all().unwrap().is_empty());
        assert!(rules.read_all().unwrap().is_empty());
        assert!(dir.path().join("data/entries").is_dir());
        assert!(dir.path().join("data/rules").is_dir());
    }

    #[test]
    fn sqlite_backend_shares_one_database_file() {
        let dir = tempdir().unwrap();
        let config = PersistenceConfig {
            backend: BackendKind::Sqlite,
            directory: dir.path().to_path_buf(),
            sqlite_path: dir.path().join("db/pde.sqlite3"),
        };
        let (_, rules) = open_backing_stores(&config, None).unwrap();
        rules
            .write(3, &std::collections::BTreeSet::from([10, 11]))
            .unwrap();
        assert!(dir.path().join("db/pde.sqlite3").is_file());
        assert_eq!(rules.read_all().unwrap().len(), 1);
    }
}
