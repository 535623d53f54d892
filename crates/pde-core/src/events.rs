//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Change notifications fired by the entry store and the system tracker.
//!
//! Callbacks run on the mutating caller's path and must return quickly.
//! Entry listeners are invoked while the store serializes writers, so they
//! may read the store but must never mutate it.

use pde_model::{LiveSystem, PlantDescriptionEntry};

pub trait EntryListener: Send + Sync {
    fn on_added(&self, _entry: &PlantDescriptionEntry) {}
    fn on_updated(&self, _entry: &PlantDescriptionEntry) {}
    fn on_removed(&self, _entry: &PlantDescriptionEntry) {}
}

pub trait SystemListener: Send + Sync {
    fn on_system_added(&self, _system: &LiveSystem) {}
    fn on_system_removed(&self, _system: &LiveSystem) {}
}
