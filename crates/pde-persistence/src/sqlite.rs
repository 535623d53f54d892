//! ---
//! pde_section: "03-persistence-logging"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Persistence abstractions and storage bindings."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! SQLite-backed stores. Entries are stored as JSON documents keyed by id;
//! rule ids are stored one row per `(entry_id, rule_id)` pair.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use pde_model::{EntryId, PlantDescriptionEntry, RuleId, RuleSet};
use rusqlite::{params, Connection};

use crate::metrics::PersistenceMetrics;
use crate::{BackingStoreError, EntryBackingStore, Result, RuleBackingStore};

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(Connection::open(path)?)
}

/// Entry store backed by a SQLite table.
pub struct SqliteEntryStore {
    conn: Mutex<Connection>,
    metrics: Option<PersistenceMetrics>,
}

impl SqliteEntryStore {
    const STORE: &'static str = "entries";

    /// Open the database at `path`, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(open_connection(path.as_ref())?)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS plant_description_entries (
                id INTEGER PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
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

    fn upsert(&self, entry: &PlantDescriptionEntry) -> Result<()> {
        let body = serde_json::to_string(entry)?;
        self.conn.lock().execute(
            "INSERT INTO plant_description_entries (id, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![entry.id, body, entry.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }
}

impl EntryBackingStore for SqliteEntryStore {
    fn read_all(&self) -> Result<Vec<PlantDescriptionEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, body FROM plant_description_entries ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, body) = row?;
            let entry: PlantDescriptionEntry = serde_json::from_str(&body)?;
            if entry.id != id {
                return Err(BackingStoreError::Corrupt(format!(
                    "row {id} holds entry {}",
                    entry.id
                )));
            }
            entries.push(entry);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_loaded(Self::STORE, entries.len());
        }
        Ok(entries)
    }

    fn write(&self, entry: &PlantDescriptionEntry) -> Result<()> {
        self.observe(self.upsert(entry))
    }

    fn remove(&self, id: EntryId) -> Result<()> {
        let result = self
            .conn
            .lock()
            .execute("DELETE FROM plant_description_entries WHERE id = ?1", params![id])
            .map(|_| ())
            .map_err(BackingStoreError::from);
        self.observe(result)
    }

    fn remove_all(&self) -> Result<()> {
        let result = self
            .conn
            .lock()
            .execute("DELETE FROM plant_description_entries", [])
            .map(|_| ())
            .map_err(BackingStoreError::from);
        self.observe(result)
    }
}

/// Rule id store backed by a SQLite table.
pub struct SqliteRuleStore {
    conn: Mutex<Connection>,
    metrics: Option<PersistenceMetrics>,
}

impl SqliteRuleStore {
    const STORE: &'static str = "rules";

    /// Open the database at `path`, creating the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(open_connection(path.as_ref())?)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS created_rules (
                entry_id INTEGER NOT NULL,
                rule_id INTEGER NOT NULL,
                PRIMARY KEY (entry_id, rule_id)
            );
            "#,
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
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

    fn replace_rows(&self, entry_id: EntryId, rules: &BTreeSet<RuleId>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM created_rules WHERE entry_id = ?1", params![entry_id])?;
        for rule_id in rules {
            tx.execute(
                "INSERT INTO created_rules (entry_id, rule_id) VALUES (?1, ?2)",
                params![entry_id, rule_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl RuleBackingStore for SqliteRuleStore {
    fn read_all(&self) -> Result<RuleSet> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT entry_id, rule_id FROM created_rules")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

        let mut set = RuleSet::new();
        for row in rows {
            let (entry_id, rule_id) = row?;
            set.entry(entry_id).or_default().insert(rule_id);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_loaded(Self::STORE, set.len());
        }
        Ok(set)
    }

    fn write(&self, entry_id: EntryId, rules: &BTreeSet<RuleId>) -> Result<()> {
        self.observe(self.replace_rows(entry_id, rules))
    }

    fn remove(&self, entry_id: EntryId) -> Result<()> {
        let result = self
            .conn
            .lock()
            .execute("DELETE FROM created_rules WHERE entry_id = ?1", params![entry_id])
            .map(|_| ())
            .map_err(BackingStoreError::from);
        self.observe(result)
    }

    fn remove_all(&self) -> Result<()> {
        let result = self
            .conn
            .lock()
            .execute("DELETE FROM created_rules", [])
            .map(|_| ())
            .map_err(BackingStoreError::from);
        self.observe(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pde_model::PlantDescription;
    use tempfile::tempdir;

    #[test]
    fn entry_rows_are_upserted() {
        let store = SqliteEntryStore::open_in_memory().unwrap();
        let description = PlantDescription {
            plant_description: "line".into(),
            active: true,
            include: Vec::new(),
            systems: Vec::new(),
            connections: Vec::new(),
        };
        let entry = PlantDescriptionEntry::from_description(4, description, Utc::now());
        store.write(&entry).unwrap();
        store.write(&entry.deactivated(Utc::now())).unwrap();

        let entries = store.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].active);
    }

    #[test]
    fn rule_rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pde.sqlite3");
        {
            let store = SqliteRuleStore::open(&path).unwrap();
            store.write(1, &BTreeSet::from([7, 8])).unwrap();
            store.write(1, &BTreeSet::from([9])).unwrap();
        }
        let store = SqliteRuleStore::open(&path).unwrap();
        assert_eq!(store.read_all().unwrap().get(&1), Some(&BTreeSet::from([9])));
    }
}
