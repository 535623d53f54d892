//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Replace-all reconciliation of orchestration rules against the active
//! entry.
//!
//! Every pass deletes every rule this engine created, clears the rule
//! backing store and then recreates one rule per connection of the active
//! entry's include closure. Passes are serialized through a single worker;
//! store events only enqueue a trigger.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use pde_metrics::EngineMetrics;
use pde_model::{
    Connection, EntryId, LiveSystem, PlantDescriptionEntry, RuleId, RuleSpec, RuleSystem, System,
};
use pde_persistence::RuleBackingStore;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::closure::{closure_connections, closure_systems, include_closure};
use crate::collaborators::RuleOrchestrator;
use crate::entry_store::EntryStore;
use crate::error::{ReconcileError, TrackerError};
use crate::events::{EntryListener, SystemListener};
use crate::system_tracker::SystemTracker;

/// Values stamped onto every rule the reconciler creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSettings {
    pub interface_name: String,
    /// Used for connections without an explicit priority.
    pub default_priority: u32,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            interface_name: "HTTP-INSECURE-JSON".to_owned(),
            default_priority: 1,
        }
    }
}

/// Outcome of one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub entry_id: Option<EntryId>,
    pub deleted: usize,
    pub delete_failures: usize,
    pub created: Vec<RuleId>,
    pub skipped: usize,
}

pub struct RuleReconciler {
    store: Arc<EntryStore>,
    tracker: Arc<SystemTracker>,
    orchestrator: Arc<dyn RuleOrchestrator>,
    rules: Arc<dyn RuleBackingStore>,
    settings: RuleSettings,
    metrics: Option<EngineMetrics>,
    pass_lock: tokio::sync::Mutex<()>,
    completed: AtomicU64,
    failed: AtomicBool,
}

impl std::fmt::Debug for RuleReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleReconciler")
            .field("settings", &self.settings)
            .field("completed", &self.completed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RuleReconciler {
    pub fn new(
        store: Arc<EntryStore>,
        tracker: Arc<SystemTracker>,
        orchestrator: Arc<dyn RuleOrchestrator>,
        rules: Arc<dyn RuleBackingStore>,
        settings: RuleSettings,
        metrics: Option<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            tracker,
            orchestrator,
            rules,
            settings,
            metrics,
            pass_lock: tokio::sync::Mutex::new(()),
            completed: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        }
    }

    /// Passes that ran to completion or were abandoned with an error.
    pub fn completed_passes(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Whether the most recent pass was abandoned with an error.
    pub fn needs_retry(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Run one pass. Passes never overlap.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let _pass = self.pass_lock.lock().await;
        let outcome = self.run_pass().await;
        self.failed.store(outcome.is_err(), Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.record_reconciliation(if outcome.is_ok() { "success" } else { "failure" });
        }
        outcome
    }

    async fn run_pass(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();

        let tracked = self.rules.read_all()?;
        for (entry_id, rule_ids) in &tracked {
            for &rule_id in rule_ids {
                let outcome = self.orchestrator.delete_rule(rule_id).await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_rule_delete(outcome.is_ok());
                }
                match outcome {
                    Ok(()) => {
                        report.deleted += 1;
                        debug!(entry_id, rule_id, "orchestration rule deleted");
                    }
                    Err(err) => {
                        report.delete_failures += 1;
                        warn!(entry_id, rule_id, error = %err, "failed to delete orchestration rule");
                    }
                }
            }
        }
        self.rules.remove_all()?;

        let Some(active) = self.store.active_entry() else {
            info!(deleted = report.deleted, "no active entry; rules torn down");
            return Ok(report);
        };
        report.entry_id = Some(active.id);

        let entries = self.store.snapshot();
        let connections = closure_connections(&entries, &active);
        if connections.is_empty() {
            info!(entry_id = active.id, deleted = report.deleted, "active entry has no connections");
            return Ok(report);
        }
        let systems = closure_systems(&entries, &active);
        debug!(
            entry_id = active.id,
            entries = include_closure(&entries, &active).len(),
            connections = connections.len(),
            "deriving orchestration rules"
        );

        let mut batch = Vec::with_capacity(connections.len());
        for connection in &connections {
            match self.rule_for(&systems, connection) {
                Ok(rule) => batch.push(rule),
                Err(reason) => {
                    report.skipped += 1;
                    error!(
                        entry_id = active.id,
                        consumer = %connection.consumer,
                        producer = %connection.producer,
                        reason = %reason,
                        "skipping connection"
                    );
                }
            }
        }
        if batch.is_empty() {
            warn!(entry_id = active.id, skipped = report.skipped, "no connection could be resolved");
            return Ok(report);
        }

        let created = self.orchestrator.create_rules(&batch).await?;
        report.created = created.iter().map(|rule| rule.id).collect();
        let ids: BTreeSet<RuleId> = report.created.iter().copied().collect();
        if let Err(err) = self.rules.write(active.id, &ids) {
            error!(entry_id = active.id, error = %err, "failed to record created rules; withdrawing them");
            self.withdraw(&ids).await;
            return Err(err.into());
        }
        if let Some(metrics) = &self.metrics {
            metrics.add_rules_created(report.created.len());
        }
        info!(
            entry_id = active.id,
            created = report.created.len(),
            deleted = report.deleted,
            skipped = report.skipped,
            "orchestration rules reconciled"
        );
        Ok(report)
    }

    /// Best-effort delete of rules that could not be recorded.
    async fn withdraw(&self, ids: &BTreeSet<RuleId>) {
        for &rule_id in ids {
            let outcome = self.orchestrator.delete_rule(rule_id).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_rule_delete(outcome.is_ok());
            }
            if let Err(err) = outcome {
                warn!(rule_id, error = %err, "failed to withdraw unrecorded orchestration rule");
            }
        }
    }

    fn rule_for(&self, systems: &[System], connection: &Connection) -> Result<RuleSpec, String> {
        let consumer = find_system(systems, &connection.consumer.system_id)?;
        let producer = find_system(systems, &connection.producer.system_id)?;
        let producer_port = producer.port(&connection.producer.port_name).ok_or_else(|| {
            format!(
                "system '{}' has no port named '{}'",
                producer.system_id, connection.producer.port_name
            )
        })?;

        let consumer_live = self.live(consumer)?;
        let producer_live = self.live(producer)?;
        Ok(RuleSpec {
            consumer_system: rule_system(&consumer_live),
            provider_system: rule_system(&producer_live),
            service_definition_name: producer_port.service_definition.clone(),
            interface_name: self.settings.interface_name.clone(),
            priority: connection.priority.unwrap_or(self.settings.default_priority),
            attribute: producer_port.distinguishing_metadata().cloned(),
        })
    }

    fn live(&self, system: &System) -> Result<LiveSystem, String> {
        let name = system.lookup_name();
        match self.tracker.system_by_name(name) {
            Ok(Some(live)) => Ok(live),
            Ok(None) => Err(format!("system '{name}' is not registered")),
            Err(TrackerError::NotInitialized) => Err(TrackerError::NotInitialized.to_string()),
        }
    }

    /// Worker loop: one pass per received trigger until the channel closes.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<()>) {
        while triggers.recv().await.is_some() {
            if let Err(err) = self.reconcile().await {
                error!(error = %err, "reconciliation pass abandoned");
            }
        }
        debug!("reconciler worker stopped");
    }
}

fn find_system<'a>(systems: &'a [System], system_id: &str) -> Result<&'a System, String> {
    systems
        .iter()
        .find(|system| system.system_id == system_id)
        .ok_or_else(|| format!("no system with ID '{system_id}'"))
}

fn rule_system(live: &LiveSystem) -> RuleSystem {
    RuleSystem {
        id: live.id,
        system_name: live.system_name.clone(),
        address: live.address.clone(),
        port: live.port,
    }
}

/// Entry and system listener that enqueues a reconciliation pass when the
/// active entry, or anything in its include closure, changes, or when the
/// registry inventory gains or loses a system while an entry is active.
///
/// The channel holds a single pending trigger; triggers arriving while one
/// is already queued coalesce into it.
#[derive(Debug)]
pub struct ReconcileTrigger {
    sender: mpsc::Sender<()>,
    store: Weak<EntryStore>,
    last_active: AtomicI64,
}

const NO_ENTRY: EntryId = EntryId::MIN;

impl ReconcileTrigger {
    pub fn new(sender: mpsc::Sender<()>, store: &Arc<EntryStore>) -> Self {
        let last_active = store.active_entry().map_or(NO_ENTRY, |entry| entry.id);
        Self {
            sender,
            store: Arc::downgrade(store),
            last_active: AtomicI64::new(last_active),
        }
    }

    /// Queue a pass unless one is already pending.
    pub fn fire(&self) {
        match self.sender.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("reconciler worker gone; trigger dropped");
            }
        }
    }

    fn affects_active(&self, entry: &PlantDescriptionEntry) -> bool {
        if entry.active || entry.id == self.last_active.load(Ordering::SeqCst) {
            return true;
        }
        let Some(store) = self.store.upgrade() else {
            return false;
        };
        let Some(active) = store.active_entry() else {
            return false;
        };
        let entries = store.snapshot();
        include_closure(&entries, &active)
            .iter()
            .any(|included| included.id == entry.id)
    }

    fn observe(&self, entry: &PlantDescriptionEntry) {
        if !self.affects_active(entry) {
            return;
        }
        if entry.active {
            self.last_active.store(entry.id, Ordering::SeqCst);
        }
        self.fire();
    }
}

impl EntryListener for ReconcileTrigger {
    fn on_added(&self, entry: &PlantDescriptionEntry) {
        self.observe(entry);
    }

    fn on_updated(&self, entry: &PlantDescriptionEntry) {
        self.observe(entry);
    }

    fn on_removed(&self, entry: &PlantDescriptionEntry) {
        if !self.affects_active(entry) {
            return;
        }
        let _ = self.last_active.compare_exchange(
            entry.id,
            NO_ENTRY,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.fire();
    }
}

impl ReconcileTrigger {
    fn observe_inventory(&self, system: &LiveSystem) {
        let has_active = self
            .store
            .upgrade()
            .is_some_and(|store| store.active_entry().is_some());
        if has_active {
            debug!(system = %system.system_name, "registry inventory changed; reconciling");
            self.fire();
        }
    }
}

impl SystemListener for ReconcileTrigger {
    fn on_system_added(&self, system: &LiveSystem) {
        self.observe_inventory(system);
    }

    fn on_system_removed(&self, system: &LiveSystem) {
        self.observe_inventory(system);
    }
}
