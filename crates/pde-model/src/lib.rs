//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Data model shared by the engine, persistence and API layers."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Plain data structures describing desired plant topology, the live system
//! inventory, orchestration rules and drift alarms.

pub mod alarm;
pub mod entry;
pub mod live;
pub mod rule;

pub use alarm::{Alarm, AlarmCause, AlarmId, Severity};
pub use entry::{
    Connection, EntryId, Metadata, PlantDescription, PlantDescriptionEntry,
    PlantDescriptionUpdate, Port, System, SystemPort,
};
pub use live::{LiveSystem, ServiceEndpoint};
pub use rule::{OrchestrationRule, RuleId, RuleSet, RuleSpec, RuleSystem};
