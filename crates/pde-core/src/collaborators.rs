//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! External services the engine drives or observes.

use async_trait::async_trait;
use pde_model::{LiveSystem, OrchestrationRule, RuleId, RuleSpec, ServiceEndpoint};

use crate::error::CollaboratorError;

/// Inventory of registered systems and service providers.
#[async_trait]
pub trait SystemRegistry: Send + Sync {
    async fn systems(&self) -> Result<Vec<LiveSystem>, CollaboratorError>;

    /// Providers of `service_definition`.
    async fn services(
        &self,
        service_definition: &str,
    ) -> Result<Vec<ServiceEndpoint>, CollaboratorError>;
}

/// Store of consumer to provider routing rules.
#[async_trait]
pub trait RuleOrchestrator: Send + Sync {
    /// Create `rules` in one batch, returning them with their assigned ids.
    async fn create_rules(
        &self,
        rules: &[RuleSpec],
    ) -> Result<Vec<OrchestrationRule>, CollaboratorError>;

    async fn delete_rule(&self, id: RuleId) -> Result<(), CollaboratorError>;
}

/// Reachability check against a monitored system.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn ping(&self, address: &str, port: u16) -> Result<(), CollaboratorError>;
}
