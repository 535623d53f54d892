//! ---
//! pde_section: "09-testing-qa"
//! pde_subsection: "tests"
//! pde_type: "source"
//! pde_scope: "test"
//! pde_description: "Store, admission and alarm guarantees exercised through the public API."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::Utc;
use pde_core::{
    AdmissionError, AlarmManager, AlarmQuery, EntryStore, PlantDescriptions, SeverityFilter,
};
use pde_model::{AlarmCause, PlantDescription, PlantDescriptionEntry, Severity};
use pde_persistence::{EntryBackingStore, FileEntryStore, MemoryEntryStore};
use serde_json::json;
use tempfile::tempdir;

fn description(value: serde_json::Value) -> PlantDescription {
    serde_json::from_value(value).unwrap()
}

#[test]
fn raising_the_same_alarm_twice_keeps_one() {
    let alarms = AlarmManager::default();
    alarms.raise(Some("s1"), None, AlarmCause::SystemInactive);
    alarms.raise(Some("s1"), None, AlarmCause::SystemInactive);

    let listed = alarms.list(&AlarmQuery::default());
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].acknowledged);
}

#[test]
fn cleared_alarm_remains_in_history() {
    let alarms = AlarmManager::default();
    alarms.raise(None, Some("pump"), AlarmCause::SystemNotRegistered);
    alarms.clear(None, Some("pump"), AlarmCause::SystemNotRegistered);

    let cleared = alarms.list(&AlarmQuery {
        severity: Some(SeverityFilter::Cleared),
        ..AlarmQuery::default()
    });
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].severity(), Severity::Cleared);
    assert!(cleared[0].cleared_at.is_some());
}

#[test]
fn second_active_submission_deactivates_the_first() {
    let store = Arc::new(EntryStore::open(Arc::new(MemoryEntryStore::new())).unwrap());
    let admission = PlantDescriptions::new(store.clone());

    let a = admission
        .create(description(json!({"plantDescription": "A", "active": true})))
        .unwrap();
    let b = admission
        .create(description(json!({"plantDescription": "B", "active": true})))
        .unwrap();

    assert_eq!(store.active_entry().map(|entry| entry.id), Some(b.id));
    assert!(!store.get(a.id).unwrap().active);
}

#[test]
fn dangling_connection_is_rejected_before_storage() {
    let backing = Arc::new(MemoryEntryStore::new());
    let store = Arc::new(EntryStore::open(backing.clone()).unwrap());
    let admission = PlantDescriptions::new(store);

    let err = admission
        .create(description(json!({
            "plantDescription": "dangling",
            "systems": [{"systemId": "b", "ports": [{"portName": "q", "serviceDefinition": "svc", "consumer": true}]}],
            "connections": [{
                "consumer": {"systemId": "b", "portName": "q"},
                "producer": {"systemId": "ghost", "portName": "p"}
            }]
        })))
        .unwrap_err();
    let AdmissionError::Validation(errors) = err else {
        panic!("expected a validation error");
    };
    assert!(!errors.violations().is_empty());
    assert!(errors
        .violations()
        .iter()
        .any(|violation| violation.contains("ghost")));
    assert!(backing.read_all().unwrap().is_empty());
}

#[test]
fn reopened_file_store_continues_after_highest_id() {
    let dir = tempdir().unwrap();
    {
        let backing = FileEntryStore::open(dir.path()).unwrap();
        for id in [5, 9, 12] {
            let entry = PlantDescriptionEntry::from_description(
                id,
                description(json!({"plantDescription": format!("plant-{id}")})),
                Utc::now(),
            );
            backing.write(&entry).unwrap();
        }
    }

    let store = EntryStore::open(Arc::new(FileEntryStore::open(dir.path()).unwrap())).unwrap();
    assert_eq!(store.get_unique_id(), 13);
    assert_eq!(store.list().len(), 3);
}
