//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Data model shared by the engine, persistence and API layers."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to a plant description entry by the entry store.
pub type EntryId = i64;

/// String metadata attached to systems and ports.
pub type Metadata = BTreeMap<String, String>;

/// A named service port on a system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub port_name: String,
    pub service_definition: String,
    /// `true` for consumer ports, `false` for producer ports.
    #[serde(default)]
    pub consumer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Port {
    /// Metadata if present and non-empty.
    pub fn distinguishing_metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref().filter(|meta| !meta.is_empty())
    }
}

/// A system participating in a plant description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub ports: Vec<Port>,
}

impl System {
    /// Name used to find this system in the registry inventory.
    ///
    /// Falls back to the system id when no explicit name is declared.
    pub fn lookup_name(&self) -> &str {
        self.system_name.as_deref().unwrap_or(&self.system_id)
    }

    pub fn port(&self, port_name: &str) -> Option<&Port> {
        self.ports.iter().find(|port| port.port_name == port_name)
    }
}

/// One endpoint of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPort {
    pub system_id: String,
    pub port_name: String,
}

impl SystemPort {
    pub fn new(system_id: impl Into<String>, port_name: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            port_name: port_name.into(),
        }
    }
}

impl std::fmt::Display for SystemPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.system_id, self.port_name)
    }
}

/// A consumer to producer connection between two ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub consumer: SystemPort,
    pub producer: SystemPort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Operator-submitted plant description, before an id has been assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantDescription {
    pub plant_description: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub include: Vec<EntryId>,
    #[serde(default)]
    pub systems: Vec<System>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// The unit of desired state owned by the entry store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantDescriptionEntry {
    pub id: EntryId,
    pub plant_description: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub include: Vec<EntryId>,
    #[serde(default)]
    pub systems: Vec<System>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlantDescriptionEntry {
    /// Build a new entry from a submitted description.
    pub fn from_description(id: EntryId, description: PlantDescription, now: DateTime<Utc>) -> Self {
        Self {
            id,
            plant_description: description.plant_description,
            active: description.active,
            include: description.include,
            systems: description.systems,
            connections: description.connections,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the contents of this entry, keeping its id and creation time.
    pub fn replaced_by(&self, description: PlantDescription, now: DateTime<Utc>) -> Self {
        Self {
            created_at: self.created_at,
            ..Self::from_description(self.id, description, now)
        }
    }

    /// Copy of this entry with the active flag cleared.
    pub fn deactivated(&self, now: DateTime<Utc>) -> Self {
        Self {
            active: false,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn system(&self, system_id: &str) -> Option<&System> {
        self.systems
            .iter()
            .find(|system| system.system_id == system_id)
    }
}

/// Partial update; fields left as `None` retain their previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantDescriptionUpdate {
    #[serde(default)]
    pub plant_description: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub include: Option<Vec<EntryId>>,
    #[serde(default)]
    pub systems: Option<Vec<System>>,
    #[serde(default)]
    pub connections: Option<Vec<Connection>>,
}

impl PlantDescriptionUpdate {
    /// Merge this update onto `entry`.
    pub fn apply(&self, entry: &PlantDescriptionEntry, now: DateTime<Utc>) -> PlantDescriptionEntry {
        PlantDescriptionEntry {
            id: entry.id,
            plant_description: self
                .plant_description
                .clone()
                .unwrap_or_else(|| entry.plant_description.clone()),
            active: self.active.unwrap_or(entry.active),
            include: self.include.clone().unwrap_or_else(|| entry.include.clone()),
            systems: self.systems.clone().unwrap_or_else(|| entry.systems.clone()),
            connections: self
                .connections
                .clone()
                .unwrap_or_else(|| entry.connections.clone()),
            created_at: entry.created_at,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_entry() -> PlantDescriptionEntry {
        let description: PlantDescription = serde_json::from_value(json!({
            "plantDescription": "line-1",
            "active": true,
            "systems": [
                {"systemId": "a", "ports": [{"portName": "p", "serviceDefinition": "svc"}]},
                {"systemId": "b", "systemName": "sys-b", "ports": [{"portName": "q", "serviceDefinition": "svc", "consumer": true}]}
            ],
            "connections": [
                {"consumer": {"systemId": "b", "portName": "q"}, "producer": {"systemId": "a", "portName": "p"}}
            ]
        }))
        .unwrap();
        PlantDescriptionEntry::from_description(1, description, Utc::now())
    }

    #[test]
    fn description_json_uses_camel_case_defaults() {
        let entry = sample_entry();
        assert!(entry.include.is_empty());
        assert!(!entry.systems[0].ports[0].consumer);
        assert!(entry.systems[1].ports[0].consumer);
        assert_eq!(entry.connections[0].producer, SystemPort::new("a", "p"));
    }

    #[test]
    fn lookup_name_prefers_declared_name() {
        let entry = sample_entry();
        assert_eq!(entry.systems[0].lookup_name(), "a");
        assert_eq!(entry.systems[1].lookup_name(), "sys-b");
    }

    #[test]
    fn update_retains_unspecified_fields() {
        let entry = sample_entry();
        let later = entry.updated_at + Duration::seconds(5);
        let update = PlantDescriptionUpdate {
            plant_description: Some("renamed".into()),
            ..PlantDescriptionUpdate::default()
        };
        let merged = update.apply(&entry, later);
        assert_eq!(merged.plant_description, "renamed");
        assert!(merged.active);
        assert_eq!(merged.systems, entry.systems);
        assert_eq!(merged.connections, entry.connections);
        assert_eq!(merged.created_at, entry.created_at);
        assert_eq!(merged.updated_at, later);
    }

    #[test]
    fn deactivated_copy_only_touches_flag_and_timestamp() {
        let entry = sample_entry();
        let copy = entry.deactivated(entry.updated_at);
        assert!(!copy.active);
        assert_eq!(copy.systems, entry.systems);
        assert_eq!(copy.id, entry.id);
    }
}
