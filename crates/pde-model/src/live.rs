//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Data model shared by the engine, persistence and API layers."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// A system as reported by the registry. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSystem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(alias = "name")]
    pub system_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, alias = "authInfo", skip_serializing_if = "Option::is_none")]
    pub authentication_info: Option<String>,
    // Registry timestamps are kept verbatim; their format is registry specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl LiveSystem {
    pub fn new(system_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: None,
            system_name: system_name.into(),
            address: address.into(),
            port,
            authentication_info: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// A provider of a named service, as resolved through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoint {
    #[serde(alias = "name")]
    pub system_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_uri: Option<String>,
}
