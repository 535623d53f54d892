//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Shared primitives and utilities for the core runtime."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Shared configuration and logging primitives for the plant description
//! engine workspace.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, BackendKind, LoadedAppConfig, LoggingConfig, MetricsConfig,
    MonitorConfig, OrchestratorConfig, PersistenceConfig, RegistryConfig,
};
pub use logging::{init_tracing, LogFormat};
