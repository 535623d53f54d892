//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Data model shared by the engine, persistence and API layers."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entry::{EntryId, Metadata};

/// Identifier assigned to a rule by the external orchestrator.
pub type RuleId = i64;

/// Rule ids created per entry id.
pub type RuleSet = BTreeMap<EntryId, BTreeSet<RuleId>>;

/// System reference carried inside an orchestration rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSystem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub system_name: String,
    pub address: String,
    pub port: u16,
}

/// Rule body as submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub consumer_system: RuleSystem,
    pub provider_system: RuleSystem,
    pub service_definition_name: String,
    pub interface_name: String,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<Metadata>,
}

/// Rule as stored by the orchestrator, carrying its assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRule {
    pub id: RuleId,
    #[serde(flatten)]
    pub spec: RuleSpec,
}
