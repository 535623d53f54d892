//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Referential-integrity checks applied to a candidate entry before it is
//! admitted into the entry store.

use std::collections::{BTreeMap, HashMap, HashSet};

use pde_model::{EntryId, Metadata, PlantDescriptionEntry, Port, System, SystemPort};

use crate::closure::{include_closure, EntryMap};
use crate::error::ValidationErrors;

/// Validate `candidate` against `entries`, a store snapshot.
///
/// Any stored entry with the candidate's id is ignored in favour of the
/// candidate. Violations are reported in a stable order: includes, ports,
/// systems, connections.
pub fn validate(entries: &EntryMap, candidate: &PlantDescriptionEntry) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    check_includes(entries, candidate, &mut errors);

    let closure = include_closure(entries, candidate);
    let systems: Vec<&System> = closure
        .iter()
        .flat_map(|entry| entry.systems.iter())
        .collect();

    for system in &systems {
        check_ports(system, &mut errors);
    }
    check_unique_system_ids(&systems, &mut errors);
    check_connections(candidate, &systems, &mut errors);
    errors
}

fn check_includes(entries: &EntryMap, candidate: &PlantDescriptionEntry, errors: &mut ValidationErrors) {
    let mut seen = HashSet::new();
    for &included in &candidate.include {
        if included == candidate.id {
            errors.push(format!("Entry with ID '{}' includes itself.", candidate.id));
        } else if !seen.insert(included) {
            errors.push(format!(
                "Entry with ID '{included}' is included more than once."
            ));
        } else if !entries.contains_key(&included) {
            errors.push(format!("Included entry '{included}' does not exist."));
        }
    }

    if reaches(entries, candidate, candidate.id) {
        errors.push(format!(
            "Entry with ID '{}' is part of an include cycle.",
            candidate.id
        ));
    }
}

/// Whether `target` is reachable through the includes of `root`, not
/// counting a direct self-include (reported separately).
fn reaches(entries: &EntryMap, root: &PlantDescriptionEntry, target: EntryId) -> bool {
    let mut visited = HashSet::new();
    let mut stack: Vec<EntryId> = root
        .include
        .iter()
        .copied()
        .filter(|&id| id != target)
        .collect();
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        if let Some(entry) = entries.get(&id) {
            stack.extend(entry.include.iter().copied());
        }
    }
    false
}

fn check_ports(system: &System, errors: &mut ValidationErrors) {
    let mut names = HashSet::new();
    for port in &system.ports {
        if !names.insert(port.port_name.as_str()) {
            errors.push(format!(
                "Duplicate port name '{}' in system '{}'.",
                port.port_name, system.system_id
            ));
        }
    }

    let mut by_service: BTreeMap<&str, Vec<&Port>> = BTreeMap::new();
    for port in &system.ports {
        by_service
            .entry(port.service_definition.as_str())
            .or_default()
            .push(port);
    }

    for (service, ports) in by_service {
        if ports.len() < 2 {
            continue;
        }
        let tagged: Vec<&Metadata> = ports
            .iter()
            .filter_map(|port| port.distinguishing_metadata())
            .collect();
        if tagged.len() + 1 < ports.len() {
            errors.push(format!(
                "{} ports in system '{}' share service definition '{service}'; at least {} of them must carry metadata.",
                ports.len(),
                system.system_id,
                ports.len() - 1
            ));
        }
        let distinct: HashSet<&Metadata> = tagged.iter().copied().collect();
        if distinct.len() < tagged.len() {
            errors.push(format!(
                "Ports in system '{}' with service definition '{service}' must have unique metadata.",
                system.system_id
            ));
        }
    }
}

fn check_unique_system_ids(systems: &[&System], errors: &mut ValidationErrors) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for system in systems {
        let id = system.system_id.as_str();
        if !seen.insert(id) && reported.insert(id) {
            errors.push(format!("Duplicate system ID '{id}'."));
        }
    }
}

fn resolve_port<'a>(
    lookup: &HashMap<&str, &'a System>,
    endpoint: &SystemPort,
    errors: &mut ValidationErrors,
) -> Option<&'a Port> {
    let Some(&system) = lookup.get(endpoint.system_id.as_str()) else {
        errors.push(format!(
            "Invalid connection, no system with ID '{}'.",
            endpoint.system_id
        ));
        return None;
    };
    let port = system.port(&endpoint.port_name);
    if port.is_none() {
        errors.push(format!(
            "Invalid connection, system '{}' has no port named '{}'.",
            endpoint.system_id, endpoint.port_name
        ));
    }
    port
}

fn check_connections(
    candidate: &PlantDescriptionEntry,
    systems: &[&System],
    errors: &mut ValidationErrors,
) {
    let mut lookup: HashMap<&str, &System> = HashMap::new();
    for &system in systems {
        lookup.entry(system.system_id.as_str()).or_insert(system);
    }

    for connection in &candidate.connections {
        let consumer = resolve_port(&lookup, &connection.consumer, errors);
        let producer = resolve_port(&lookup, &connection.producer, errors);
        let (Some(consumer), Some(producer)) = (consumer, producer) else {
            continue;
        };
        if !consumer.consumer {
            errors.push(format!(
                "Invalid connection, '{}' is not a consumer port.",
                connection.consumer
            ));
        }
        if producer.consumer {
            errors.push(format!(
                "Invalid connection, '{}' is not a producer port.",
                connection.producer
            ));
        }
        if consumer.service_definition != producer.service_definition {
            errors.push(format!(
                "Invalid connection, '{}' and '{}' have different service definitions.",
                connection.consumer, connection.producer
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pde_model::PlantDescription;
    use serde_json::json;
    use std::sync::Arc;

    fn entry(id: EntryId, value: serde_json::Value) -> PlantDescriptionEntry {
        let description: PlantDescription = serde_json::from_value(value).unwrap();
        PlantDescriptionEntry::from_description(id, description, Utc::now())
    }

    fn store(entries: Vec<PlantDescriptionEntry>) -> EntryMap {
        entries
            .into_iter()
            .map(|entry| (entry.id, Arc::new(entry)))
            .collect()
    }

    fn producer_consumer() -> serde_json::Value {
        json!({
            "plantDescription": "pd",
            "systems": [
                {"systemId": "a", "ports": [{"portName": "p", "serviceDefinition": "svc"}]},
                {"systemId": "b", "ports": [{"portName": "q", "serviceDefinition": "svc", "consumer": true}]}
            ],
            "connections": [
                {"consumer": {"systemId": "b", "portName": "q"}, "producer": {"systemId": "a", "portName": "p"}}
            ]
        })
    }

    #[test]
    fn well_formed_entry_passes() {
        let errors = validate(&EntryMap::new(), &entry(1, producer_consumer()));
        assert!(!errors.has_errors(), "{errors}");
    }

    #[test]
    fn include_violations_are_reported_in_order() {
        let entries = store(vec![entry(2, json!({"plantDescription": "base"}))]);
        let candidate = entry(
            1,
            json!({"plantDescription": "pd", "include": [1, 2, 2, 9]}),
        );
        let errors = validate(&entries, &candidate);
        assert_eq!(
            errors.violations(),
            [
                "Entry with ID '1' includes itself.",
                "Entry with ID '2' is included more than once.",
                "Included entry '9' does not exist.",
            ]
        );
    }

    #[test]
    fn include_cycles_are_rejected() {
        let entries = store(vec![
            entry(2, json!({"plantDescription": "two", "include": [3]})),
            entry(3, json!({"plantDescription": "three", "include": [1]})),
        ]);
        let candidate = entry(1, json!({"plantDescription": "one", "include": [2]}));
        let errors = validate(&entries, &candidate);
        assert_eq!(
            errors.violations(),
            ["Entry with ID '1' is part of an include cycle."]
        );
    }

    #[test]
    fn dangling_connection_endpoint_is_rejected() {
        let mut value = producer_consumer();
        value["connections"][0]["producer"]["systemId"] = json!("ghost");
        let errors = validate(&EntryMap::new(), &entry(1, value));
        assert_eq!(
            errors.violations(),
            ["Invalid connection, no system with ID 'ghost'."]
        );
    }

    #[test]
    fn connections_resolve_through_includes() {
        let base = entry(
            2,
            json!({
                "plantDescription": "base",
                "systems": [{"systemId": "a", "ports": [{"portName": "p", "serviceDefinition": "svc"}]}]
            }),
        );
        let mut value = producer_consumer();
        value["include"] = json!([2]);
        value["systems"] = json!([
            {"systemId": "b", "ports": [{"portName": "q", "serviceDefinition": "svc", "consumer": true}]}
        ]);
        let errors = validate(&store(vec![base]), &entry(1, value));
        assert!(!errors.has_errors(), "{errors}");
    }

    #[test]
    fn port_direction_and_service_must_match() {
        let mut value = producer_consumer();
        value["systems"][1]["ports"][0]["consumer"] = json!(false);
        value["systems"][1]["ports"][0]["serviceDefinition"] = json!("other");
        let errors = validate(&EntryMap::new(), &entry(1, value));
        assert_eq!(
            errors.violations(),
            [
                "Invalid connection, 'b:q' is not a consumer port.",
                "Invalid connection, 'b:q' and 'a:p' have different service definitions.",
            ]
        );
    }

    #[test]
    fn shared_service_definitions_need_distinct_metadata() {
        let value = json!({
            "plantDescription": "pd",
            "systems": [{
                "systemId": "a",
                "ports": [
                    {"portName": "p1", "serviceDefinition": "svc"},
                    {"portName": "p2", "serviceDefinition": "svc"},
                    {"portName": "p3", "serviceDefinition": "svc", "metadata": {"x": "1"}}
                ]
            }]
        });
        let errors = validate(&EntryMap::new(), &entry(1, value));
        assert_eq!(errors.violations().len(), 1);
        assert!(errors.violations()[0].contains("at least 2 of them must carry metadata"));

        let value = json!({
            "plantDescription": "pd",
            "systems": [{
                "systemId": "a",
                "ports": [
                    {"portName": "p1", "serviceDefinition": "svc"},
                    {"portName": "p2", "serviceDefinition": "svc", "metadata": {"x": "1"}},
                    {"portName": "p3", "serviceDefinition": "svc", "metadata": {"x": "1"}}
                ]
            }]
        });
        let errors = validate(&EntryMap::new(), &entry(1, value));
        assert_eq!(
            errors.violations(),
            ["Ports in system 'a' with service definition 'svc' must have unique metadata."]
        );
    }

    #[test]
    fn duplicate_names_and_ids_are_rejected() {
        let base = entry(
            2,
            json!({"plantDescription": "base", "systems": [{"systemId": "a"}]}),
        );
        let value = json!({
            "plantDescription": "pd",
            "include": [2],
            "systems": [{
                "systemId": "a",
                "ports": [
                    {"portName": "p", "serviceDefinition": "one"},
                    {"portName": "p", "serviceDefinition": "two"}
                ]
            }]
        });
        let errors = validate(&store(vec![base]), &entry(1, value));
        assert_eq!(
            errors.violations(),
            [
                "Duplicate port name 'p' in system 'a'.",
                "Duplicate system ID 'a'.",
            ]
        );
    }
}
