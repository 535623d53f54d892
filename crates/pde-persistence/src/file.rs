//! ---
//! pde_section: "03-persistence-logging"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Persistence abstractions and storage bindings."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Directory-backed stores: one enveloped JSON file per record, named after
//! the record key.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use pde_model::{EntryId, PlantDescriptionEntry, RuleId, RuleSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::envelope::{read_record, write_record};
use crate::metrics::PersistenceMetrics;
use crate::{EntryBackingStore, Result, RuleBackingStore};

fn record_path(root: &Path, key: EntryId) -> PathBuf {
    root.join(format!("{key}.json"))
}

fn record_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for item in fs::read_dir(root)? {
        let path = item?.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn remove_records(root: &Path) -> Result<()> {
    for path in record_files(root)? {
        remove_file(&path)?;
    }
    Ok(())
}

/// Entry store keeping one file per entry under a directory.
#[derive(Debug, Clone)]
pub struct FileEntryStore {
    root: PathBuf,
    metrics: Option<PersistenceMetrics>,
}

impl FileEntryStore {
    const STORE: &'static str = "entries";

    /// Open (creating if needed) the entry directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            metrics: None,
        })
    }

    /// Attach persistence metrics.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Directory holding the entry records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Some(metrics) = &self.metrics {
            metrics.record_write(Self::STORE, &result);
        }
        result
    }
}

impl EntryBackingStore for FileEntryStore {
    fn read_all(&self) -> Result<Vec<PlantDescriptionEntry>> {
        let mut entries = Vec::new();
        for path in record_files(&self.root)? {
            let entry: PlantDescriptionEntry = read_record(&path)?;
            entries.push(entry);
        }
        entries.sort_by_key(|entry| entry.id);
        debug!(dir = %self.root.display(), count = entries.len(), "loaded entry records");
        if let Some(metrics) = &self.metrics {
            metrics.record_loaded(Self::STORE, entries.len());
        }
        Ok(entries)
    }

    fn write(&self, entry: &PlantDescriptionEntry) -> Result<()> {
        self.observe(write_record(entry, &record_path(&self.root, entry.id)))
    }

    fn remove(&self, id: EntryId) -> Result<()> {
        self.observe(remove_file(&record_path(&self.root, id)))
    }

    fn remove_all(&self) -> Result<()> {
        self.observe(remove_records(&self.root))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleRecord {
    entry_id: EntryId,
    rules: BTreeSet<RuleId>,
}

/// Rule store keeping one file per entry id under a directory.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    root: PathBuf,
    metrics: Option<PersistenceMetrics>,
}

impl FileRuleStore {
    const STORE: &'static str = "rules";

    /// Open (creating if needed) the rule directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            metrics: None,
        })
    }

    /// Attach persistence metrics.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Some(metrics) = &self.metrics {
            metrics.record_write(Self::STORE, &result);
        }
        result
    }
}

impl RuleBackingStore for FileRuleStore {
    fn read_all(&self) -> Result<RuleSet> {
        let mut set = RuleSet::new();
        for path in record_files(&self.root)? {
            let record: RuleRecord = read_record(&path)?;
            set.insert(record.entry_id, record.rules);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_loaded(Self::STORE, set.len());
        }
        Ok(set)
    }

    fn write(&self, entry_id: EntryId, rules: &BTreeSet<RuleId>) -> Result<()> {
        let record = RuleRecord {
            entry_id,
            rules: rules.clone(),
        };
        self.observe(write_record(&record, &record_path(&self.root, entry_id)))
    }

    fn remove(&self, entry_id: EntryId) -> Result<()> {
        self.observe(remove_file(&record_path(&self.root, entry_id)))
    }

    fn remove_all(&self) -> Result<()> {
        self.observe(remove_records(&self.root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pde_model::PlantDescription;
    use tempfile::tempdir;

    fn entry(id: EntryId) -> PlantDescriptionEntry {
        let description = PlantDescription {
            plant_description: format!("plant-{id}"),
            active: false,
            include: Vec::new(),
            systems: Vec::new(),
            connections: Vec::new(),
        };
        PlantDescriptionEntry::from_description(id, description, Utc::now())
    }

    #[test]
    fn entries_are_read_back_in_id_order() {
        let dir = tempdir().unwrap();
        let store = FileEntryStore::open(dir.path().join("entries")).unwrap();
        store.write(&entry(12)).unwrap();
        store.write(&entry(3)).unwrap();

        let ids: Vec<_> = store.read_all().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 12]);

        store.remove(3).unwrap();
        store.remove(3).unwrap();
        assert_eq!(store.read_all().unwrap().len(), 1);
    }

    #[test]
    fn rule_sets_are_keyed_by_entry() {
        let dir = tempdir().unwrap();
        let store = FileRuleStore::open(dir.path()).unwrap();
        store.write(1, &BTreeSet::from([10, 11])).unwrap();
        store.write(2, &BTreeSet::from([20])).unwrap();

        let set = store.read_all().unwrap();
        assert_eq!(set.get(&1), Some(&BTreeSet::from([10, 11])));

        store.remove_all().unwrap();
        assert!(store.read_all().unwrap().is_empty());
    }
}
