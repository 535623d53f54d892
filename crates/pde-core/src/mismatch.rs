//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use pde_model::{AlarmCause, LiveSystem, PlantDescriptionEntry, System};
use tracing::debug;

use crate::alarms::AlarmManager;
use crate::closure::closure_systems;
use crate::entry_store::EntryStore;
use crate::events::{EntryListener, SystemListener};
use crate::system_tracker::SystemTracker;

/// Compares the active entry's systems with the registry inventory and
/// keeps `SystemNotRegistered` and `SystemNotInDescription` alarms in line.
///
/// Runs periodically and synchronously on every store or tracker event.
#[derive(Debug)]
pub struct MismatchDetector {
    store: Arc<EntryStore>,
    tracker: Arc<SystemTracker>,
    alarms: Arc<AlarmManager>,
    ignored: HashSet<String>,
}

impl MismatchDetector {
    pub fn new(
        store: Arc<EntryStore>,
        tracker: Arc<SystemTracker>,
        alarms: Arc<AlarmManager>,
        ignored_systems: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            store,
            tracker,
            alarms,
            ignored: ignored_systems.into_iter().collect(),
        }
    }

    pub fn run_pass(&self) {
        let Ok(live) = self.tracker.systems() else {
            debug!("registry inventory not loaded yet; mismatch pass skipped");
            return;
        };
        let desired: Vec<System> = match self.store.active_entry() {
            Some(active) => closure_systems(&self.store.snapshot(), &active),
            None => Vec::new(),
        };

        let live_names: HashSet<&str> = live.iter().map(|system| system.system_name.as_str()).collect();
        let desired_ids: BTreeSet<&str> = desired.iter().map(|system| system.system_id.as_str()).collect();
        let desired_names: HashSet<&str> = desired.iter().map(System::lookup_name).collect();

        for system in &desired {
            let name = system.lookup_name();
            if live_names.contains(name) {
                self.alarms.clear(
                    Some(system.system_id.as_str()),
                    system.system_name.as_deref(),
                    AlarmCause::SystemNotRegistered,
                );
            } else {
                self.alarms.raise(
                    Some(system.system_id.as_str()),
                    system.system_name.as_deref(),
                    AlarmCause::SystemNotRegistered,
                );
            }
        }

        for system in &live {
            let name = system.system_name.as_str();
            if desired_names.contains(name) || self.ignored.contains(name) {
                continue;
            }
            self.alarms
                .raise(None, Some(name), AlarmCause::SystemNotInDescription);
        }

        let cleared = self.alarms.clear_where(|alarm| match alarm.cause {
            AlarmCause::SystemNotRegistered => {
                !alarm
                    .system_id
                    .as_deref()
                    .is_some_and(|id| desired_ids.contains(id))
            }
            AlarmCause::SystemNotInDescription => alarm.system_name.as_deref().map_or(true, |name| {
                !live_names.contains(name)
                    || desired_names.contains(name)
                    || self.ignored.contains(name)
            }),
            AlarmCause::SystemInactive => alarm
                .system_name
                .as_deref()
                .map_or(false, |name| !live_names.contains(name)),
        });
        debug!(
            desired = desired.len(),
            live = live.len(),
            stale_cleared = cleared,
            "mismatch pass complete"
        );
    }
}

impl EntryListener for MismatchDetector {
    fn on_added(&self, _entry: &PlantDescriptionEntry) {
        self.run_pass();
    }

    fn on_updated(&self, _entry: &PlantDescriptionEntry) {
        self.run_pass();
    }

    fn on_removed(&self, _entry: &PlantDescriptionEntry) {
        self.run_pass();
    }
}

impl SystemListener for MismatchDetector {
    fn on_system_added(&self, _system: &LiveSystem) {
        self.run_pass();
    }

    fn on_system_removed(&self, _system: &LiveSystem) {
        self.run_pass();
    }
}
