//! ---
//! pde_section: "03-persistence-logging"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Persistence abstractions and storage bindings."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Pluggable backing stores for the engine's persisted state: plant
//! description entries keyed by id, and the orchestration rule ids created
//! for each entry.

use std::collections::BTreeSet;
use std::path::PathBuf;

use pde_model::{EntryId, PlantDescriptionEntry, RuleId, RuleSet};

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, BackingStoreError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum BackingStoreError {
    /// Wrapper for IO errors encountered while reading/writing records.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for SQLite failures.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Reported when a record fails integrity verification.
    #[error("record hash mismatch in {path}")]
    HashMismatch {
        /// File holding the damaged record.
        path: PathBuf,
    },
    /// Record is structurally unusable.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Persistence for plant description entries, one record per entry id.
pub trait EntryBackingStore: Send + Sync {
    /// Read every stored entry.
    fn read_all(&self) -> Result<Vec<PlantDescriptionEntry>>;
    /// Insert or overwrite the record for `entry.id`.
    fn write(&self, entry: &PlantDescriptionEntry) -> Result<()>;
    /// Delete the record for `id`. Deleting a missing record is not an error.
    fn remove(&self, id: EntryId) -> Result<()>;
    /// Delete every record.
    fn remove_all(&self) -> Result<()>;
}

/// Persistence for the rule ids the engine created, keyed by entry id.
pub trait RuleBackingStore: Send + Sync {
    /// Read every stored rule id set.
    fn read_all(&self) -> Result<RuleSet>;
    /// Insert or overwrite the rule ids recorded for `entry_id`.
    fn write(&self, entry_id: EntryId, rules: &BTreeSet<RuleId>) -> Result<()>;
    /// Delete the rule ids recorded for `entry_id`.
    fn remove(&self, entry_id: EntryId) -> Result<()>;
    /// Delete every record.
    fn remove_all(&self) -> Result<()>;
}

pub mod envelope;
pub mod file;
pub mod memory;
pub mod metrics;
pub mod sqlite;

pub use envelope::{read_record, write_record, ENVELOPE_VERSION};
pub use file::{FileEntryStore, FileRuleStore};
pub use memory::{MemoryEntryStore, MemoryRuleStore};
pub use metrics::PersistenceMetrics;
pub use sqlite::{SqliteEntryStore, SqliteRuleStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_mismatch_names_the_file() {
        let err = BackingStoreError::HashMismatch {
            path: PathBuf::from("entries/4.json"),
        };
        assert_eq!(format!("{err}"), "record hash mismatch in entries/4.json");
    }
}
