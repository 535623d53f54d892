//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use pde_model::{EntryId, PlantDescription, PlantDescriptionEntry, PlantDescriptionUpdate};
use tracing::{info, warn};

use crate::closure::{include_closure, EntryMap};
use crate::entry_store::EntryStore;
use crate::error::{AdmissionError, ValidationErrors};
use crate::validator::validate;

pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Submission path: every candidate is validated against the current store
/// contents before it is committed.
#[derive(Debug)]
pub struct PlantDescriptions {
    store: Arc<EntryStore>,
    // Held across validate-then-put.
    admission: Mutex<()>,
}

impl PlantDescriptions {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self {
            store,
            admission: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    pub fn create(&self, description: PlantDescription) -> Result<Arc<PlantDescriptionEntry>> {
        let _guard = self.admission.lock();
        let id = self.store.get_unique_id();
        let entry = PlantDescriptionEntry::from_description(id, description, Utc::now());
        self.admit(entry)
    }

    /// Replace the contents of entry `id`, keeping its creation time.
    pub fn replace(
        &self,
        id: EntryId,
        description: PlantDescription,
    ) -> Result<Arc<PlantDescriptionEntry>> {
        let _guard = self.admission.lock();
        let existing = self.store.get(id)?;
        self.admit(existing.replaced_by(description, Utc::now()))
    }

    /// Merge `update` onto entry `id`.
    pub fn update(
        &self,
        id: EntryId,
        update: &PlantDescriptionUpdate,
    ) -> Result<Arc<PlantDescriptionEntry>> {
        let _guard = self.admission.lock();
        let existing = self.store.get(id)?;
        self.admit(update.apply(&existing, Utc::now()))
    }

    /// Remove entry `id` unless another entry still includes it.
    pub fn remove(&self, id: EntryId) -> Result<Arc<PlantDescriptionEntry>> {
        let _guard = self.admission.lock();
        self.store.get(id)?;
        let mut errors = ValidationErrors::new();
        for entry in self.store.list() {
            if entry.id != id && entry.include.contains(&id) {
                errors.push(format!(
                    "Entry with ID '{id}' is included by entry with ID '{}'.",
                    entry.id
                ));
            }
        }
        if errors.has_errors() {
            warn!(entry_id = id, %errors, "entry removal rejected");
            return Err(errors.into());
        }
        Ok(self.store.remove(id)?)
    }

    fn admit(&self, entry: PlantDescriptionEntry) -> Result<Arc<PlantDescriptionEntry>> {
        let mut snapshot = self.store.snapshot();
        let mut errors = validate(&snapshot, &entry);
        if !errors.has_errors() {
            snapshot.insert(entry.id, Arc::new(entry.clone()));
            check_includers(&snapshot, entry.id, &mut errors);
        }
        if errors.has_errors() {
            warn!(entry_id = entry.id, %errors, "plant description rejected");
            return Err(errors.into());
        }
        let id = entry.id;
        self.store.put(entry)?;
        info!(entry_id = id, "plant description admitted");
        Ok(self.store.get(id)?)
    }
}

/// Re-validate every entry whose include closure reaches `changed`, with the
/// candidate already substituted into `snapshot`.
fn check_includers(snapshot: &EntryMap, changed: EntryId, errors: &mut ValidationErrors) {
    for includer in snapshot.values() {
        if includer.id == changed {
            continue;
        }
        let reaches_changed = include_closure(snapshot, includer)
            .iter()
            .any(|entry| entry.id == changed);
        if !reaches_changed {
            continue;
        }
        for violation in validate(snapshot, includer).violations() {
            errors.push(format!(
                "Entry with ID '{}' includes entry '{changed}' and would become invalid: {violation}",
                includer.id
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pde_persistence::MemoryEntryStore;
    use serde_json::json;

    fn admission() -> PlantDescriptions {
        let store = EntryStore::open(Arc::new(MemoryEntryStore::new())).unwrap();
        PlantDescriptions::new(Arc::new(store))
    }

    fn description(value: serde_json::Value) -> PlantDescription {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn invalid_description_never_reaches_the_store() {
        let admission = admission();
        let err = admission
            .create(description(json!({
                "plantDescription": "broken",
                "systems": [{"systemId": "b", "ports": [{"portName": "q", "serviceDefinition": "svc", "consumer": true}]}],
                "connections": [{"consumer": {"systemId": "b", "portName": "q"}, "producer": {"systemId": "missing", "portName": "p"}}]
            })))
            .unwrap_err();
        match err {
            AdmissionError::Validation(errors) => assert!(errors.has_errors()),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(admission.store().list().is_empty());
    }

    #[test]
    fn update_merges_and_revalidates() {
        let admission = admission();
        let base = admission
            .create(description(json!({"plantDescription": "base"})))
            .unwrap();
        let top = admission
            .create(description(json!({"plantDescription": "top", "include": [base.id]})))
            .unwrap();

        let renamed = admission
            .update(
                top.id,
                &PlantDescriptionUpdate {
                    plant_description: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.include, vec![base.id]);
        assert_eq!(renamed.created_at, top.created_at);

        let cyclic = PlantDescriptionUpdate {
            include: Some(vec![top.id]),
            ..Default::default()
        };
        assert!(matches!(
            admission.update(base.id, &cyclic),
            Err(AdmissionError::Validation(_))
        ));
        assert!(matches!(
            admission.update(99, &cyclic),
            Err(AdmissionError::NotFound(99))
        ));
    }

    #[test]
    fn edits_that_break_an_includer_are_rejected() {
        let admission = admission();
        let base = admission
            .create(description(json!({
                "plantDescription": "base",
                "systems": [{"systemId": "a", "ports": [{"portName": "p", "serviceDefinition": "svc", "consumer": false}]}]
            })))
            .unwrap();
        let top = admission
            .create(description(json!({
                "plantDescription": "top",
                "include": [base.id],
                "systems": [{"systemId": "b", "ports": [{"portName": "q", "serviceDefinition": "svc", "consumer": true}]}],
                "connections": [{"consumer": {"systemId": "b", "portName": "q"}, "producer": {"systemId": "a", "portName": "p"}}]
            })))
            .unwrap();

        let emptied = PlantDescriptionUpdate {
            systems: Some(Vec::new()),
            ..Default::default()
        };
        match admission.update(base.id, &emptied).unwrap_err() {
            AdmissionError::Validation(errors) => {
                assert!(errors
                    .violations()
                    .iter()
                    .any(|violation| violation.contains(&format!("'{}'", top.id))));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(admission.store().get(base.id).unwrap().systems.len(), 1);

        let duplicate = PlantDescriptionUpdate {
            systems: Some(vec![
                serde_json::from_value(json!({"systemId": "a", "ports": [{"portName": "p", "serviceDefinition": "svc", "consumer": false}]})).unwrap(),
                serde_json::from_value(json!({"systemId": "b", "ports": []})).unwrap(),
            ]),
            ..Default::default()
        };
        assert!(matches!(
            admission.update(base.id, &duplicate),
            Err(AdmissionError::Validation(_))
        ));

        let renamed = PlantDescriptionUpdate {
            plant_description: Some("still fine".into()),
            ..Default::default()
        };
        admission.update(base.id, &renamed).unwrap();
    }

    #[test]
    fn included_entries_cannot_be_removed() {
        let admission = admission();
        let base = admission
            .create(description(json!({"plantDescription": "base"})))
            .unwrap();
        let top = admission
            .create(description(json!({"plantDescription": "top", "include": [base.id]})))
            .unwrap();

        assert!(matches!(
            admission.remove(base.id),
            Err(AdmissionError::Validation(_))
        ));
        admission.remove(top.id).unwrap();
        admission.remove(base.id).unwrap();
        assert!(admission.store().list().is_empty());
    }
}
