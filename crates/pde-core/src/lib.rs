//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Desired-state storage, topology validation, live inventory tracking, rule
//! reconciliation and drift alarms for the plant description engine.

pub mod admission;
pub mod alarms;
pub mod closure;
pub mod collaborators;
pub mod engine;
pub mod entry_store;
pub mod error;
pub mod events;
pub mod http_clients;
pub mod liveness;
pub mod mismatch;
pub mod reconciler;
pub mod system_tracker;
pub mod validator;

pub use admission::PlantDescriptions;
pub use alarms::{AlarmManager, AlarmQuery, AlarmSortField, SeverityFilter, SortDirection};
pub use collaborators::{LivenessProbe, RuleOrchestrator, SystemRegistry};
pub use engine::{open_backing_stores, Collaborators, Engine, EngineHandle};
pub use entry_store::EntryStore;
pub use error::{
    AdmissionError, AlarmError, CollaboratorError, EntryStoreError, ReconcileError, TrackerError,
    ValidationErrors,
};
pub use events::{EntryListener, SystemListener};
pub use http_clients::{HttpLivenessProbe, HttpRegistryClient, HttpRuleOrchestrator};
pub use liveness::LivenessMonitor;
pub use mismatch::MismatchDetector;
pub use reconciler::{ReconcileReport, RuleReconciler, RuleSettings};
pub use system_tracker::SystemTracker;
pub use validator::validate;
