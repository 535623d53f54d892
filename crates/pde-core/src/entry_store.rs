//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use pde_model::{Connection, EntryId, PlantDescriptionEntry, System};
use pde_persistence::EntryBackingStore;
use tracing::{debug, error, info, warn};

use crate::closure::{closure_connections, closure_systems, EntryMap};
use crate::error::EntryStoreError;
use crate::events::EntryListener;

pub type Result<T> = std::result::Result<T, EntryStoreError>;

/// Owner of the desired-state entries.
///
/// Every mutation is written through to the backing store before memory is
/// touched or listeners run; a failed write leaves both unchanged. At most
/// one entry is active at any time.
pub struct EntryStore {
    backing: Arc<dyn EntryBackingStore>,
    entries: RwLock<EntryMap>,
    writer: Mutex<()>,
    next_id: AtomicI64,
    listeners: RwLock<Vec<Arc<dyn EntryListener>>>,
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("entries", &self.entries.read().len())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EntryStore {
    /// Load every entry from `backing`.
    ///
    /// If more than one stored entry claims to be active, the most recently
    /// updated one keeps the flag and the others are deactivated and
    /// persisted again.
    pub fn open(backing: Arc<dyn EntryBackingStore>) -> Result<Self> {
        let loaded = backing.read_all()?;
        let mut entries = EntryMap::new();
        for entry in loaded {
            entries.insert(entry.id, Arc::new(entry));
        }

        let survivor = entries
            .values()
            .filter(|entry| entry.active)
            .max_by_key(|entry| (entry.updated_at, entry.id))
            .map(|entry| entry.id);
        if let Some(survivor) = survivor {
            let stale: Vec<_> = entries
                .values()
                .filter(|entry| entry.active && entry.id != survivor)
                .cloned()
                .collect();
            for entry in stale {
                warn!(entry_id = entry.id, active_id = survivor, "deactivating surplus active entry");
                let repaired = entry.deactivated(Utc::now());
                backing.write(&repaired)?;
                entries.insert(repaired.id, Arc::new(repaired));
            }
        }

        let next_id = entries.keys().next_back().map_or(1, |max| max + 1);
        info!(entries = entries.len(), next_id, "entry store loaded");
        Ok(Self {
            backing,
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
            next_id: AtomicI64::new(next_id),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Next entry id: one past the largest id ever seen by this store.
    ///
    /// Ids are never reused by this store, including across restarts, but two
    /// stores sharing one backing store concurrently can hand out the same id.
    pub fn get_unique_id(&self) -> EntryId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn EntryListener>) {
        self.listeners.write().push(listener);
    }

    pub fn get(&self, id: EntryId) -> Result<Arc<PlantDescriptionEntry>> {
        self.entries
            .read()
            .get(&id)
            .cloned()
            .ok_or(EntryStoreError::NotFound(id))
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// All entries in id order.
    pub fn list(&self) -> Vec<Arc<PlantDescriptionEntry>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn active_entry(&self) -> Option<Arc<PlantDescriptionEntry>> {
        self.entries
            .read()
            .values()
            .find(|entry| entry.active)
            .cloned()
    }

    /// Point-in-time copy of the id to entry map.
    pub fn snapshot(&self) -> EntryMap {
        self.entries.read().clone()
    }

    /// Systems in the include closure of entry `id`.
    pub fn all_systems(&self, id: EntryId) -> Result<Vec<System>> {
        let entries = self.snapshot();
        let root = entries.get(&id).ok_or(EntryStoreError::NotFound(id))?;
        Ok(closure_systems(&entries, root))
    }

    /// Connections in the include closure of entry `id`.
    pub fn all_connections(&self, id: EntryId) -> Result<Vec<Connection>> {
        let entries = self.snapshot();
        let root = entries.get(&id).ok_or(EntryStoreError::NotFound(id))?;
        Ok(closure_connections(&entries, root))
    }

    /// Insert or replace an entry.
    ///
    /// Activating an entry first deactivates the currently active one. Both
    /// records are persisted before memory changes; if the second write
    /// fails the first is rolled back.
    pub fn put(&self, entry: PlantDescriptionEntry) -> Result<()> {
        let _writer = self.writer.lock();
        let entry = Arc::new(entry);

        let displaced = if entry.active {
            self.active_entry()
                .filter(|current| current.id != entry.id)
                .map(|current| (current.clone(), Arc::new(current.deactivated(Utc::now()))))
        } else {
            None
        };

        if let Some((_, deactivated)) = &displaced {
            self.backing.write(deactivated)?;
        }
        if let Err(err) = self.backing.write(&entry) {
            if let Some((previous, _)) = &displaced {
                if let Err(rollback) = self.backing.write(previous) {
                    error!(entry_id = previous.id, error = %rollback, "failed to restore previously active entry");
                }
            }
            return Err(err.into());
        }

        let existed = {
            let mut entries = self.entries.write();
            if let Some((_, deactivated)) = &displaced {
                entries.insert(deactivated.id, deactivated.clone());
            }
            entries.insert(entry.id, entry.clone()).is_some()
        };
        self.next_id.fetch_max(entry.id + 1, Ordering::SeqCst);
        debug!(entry_id = entry.id, active = entry.active, existed, "entry committed");

        let listeners = self.listeners.read().clone();
        if let Some((_, deactivated)) = &displaced {
            info!(entry_id = deactivated.id, active_id = entry.id, "entry deactivated");
            for listener in &listeners {
                listener.on_updated(deactivated);
            }
        }
        for listener in &listeners {
            if existed {
                listener.on_updated(&entry);
            } else {
                listener.on_added(&entry);
            }
        }
        Ok(())
    }

    /// Remove an entry, returning it as it was before removal.
    pub fn remove(&self, id: EntryId) -> Result<Arc<PlantDescriptionEntry>> {
        let _writer = self.writer.lock();
        let existing = self.get(id)?;
        self.backing.remove(id)?;
        self.entries.write().remove(&id);
        info!(entry_id = id, "entry removed");

        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_removed(&existing);
        }
        Ok(existing)
    }
}
