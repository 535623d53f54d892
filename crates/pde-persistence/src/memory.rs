//! ---
//! pde_section: "03-persistence-logging"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Persistence abstractions and storage bindings."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pde_model::{EntryId, PlantDescriptionEntry, RuleId, RuleSet};

use crate::{EntryBackingStore, Result, RuleBackingStore};

fn injected_failure() -> crate::BackingStoreError {
    io::Error::new(io::ErrorKind::Other, "backing store unavailable").into()
}

/// Volatile entry store. Mutations can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: Mutex<BTreeMap<EntryId, PlantDescriptionEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryEntryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = PlantDescriptionEntry>) -> Self {
        let store = Self::new();
        store
            .entries
            .lock()
            .extend(entries.into_iter().map(|entry| (entry.id, entry)));
        store
    }

    /// When set, every mutation fails with an IO error and leaves contents untouched.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the stored record for `id`.
    pub fn stored(&self, id: EntryId) -> Option<PlantDescriptionEntry> {
        self.entries.lock().get(&id).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

impl EntryBackingStore for MemoryEntryStore {
    fn read_all(&self) -> Result<Vec<PlantDescriptionEntry>> {
        Ok(self.entries.lock().values().cloned().collect())
    }

    fn write(&self, entry: &PlantDescriptionEntry) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().insert(entry.id, entry.clone());
        Ok(())
    }

    fn remove(&self, id: EntryId) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().remove(&id);
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().clear();
        Ok(())
    }
}

/// Volatile rule store. Mutations can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: Mutex<RuleSet>,
    fail_writes: AtomicBool,
}

impl MemoryRuleStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every mutation fails with an IO error and leaves contents untouched.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

impl RuleBackingStore for MemoryRuleStore {
    fn read_all(&self) -> Result<RuleSet> {
        Ok(self.rules.lock().clone())
    }

    fn write(&self, entry_id: EntryId, rules: &BTreeSet<RuleId>) -> Result<()> {
        self.check_writable()?;
        self.rules.lock().insert(entry_id, rules.clone());
        Ok(())
    }

    fn remove(&self, entry_id: EntryId) -> Result<()> {
        self.check_writable()?;
        self.rules.lock().remove(&entry_id);
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        self.check_writable()?;
        self.rules.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_writes_leave_contents_untouched() {
        let store = MemoryRuleStore::new();
        store.write(1, &BTreeSet::from([4])).unwrap();

        store.set_fail_writes(true);
        assert!(store.remove_all().is_err());
        assert_eq!(store.read_all().unwrap().len(), 1);

        store.set_fail_writes(false);
        store.remove(1).unwrap();
        assert!(store.read_all().unwrap().is_empty());
    }
}
