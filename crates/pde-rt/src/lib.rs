//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Runtime helpers supporting the engine."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Scheduling helpers for the plant description engine runtime.

pub mod scheduling;

pub use scheduling::{Scheduler, ShutdownSignal};
