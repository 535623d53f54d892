//! ---
//! pde_section: "03-persistence-logging"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Persistence abstractions and storage bindings."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BackingStoreError, Result};

/// Current record envelope version.
pub const ENVELOPE_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordEnvelope {
    version: u16,
    written_at: DateTime<Utc>,
    hash: String,
    record: serde_json::Value,
}

/// Persist `record` to `path` inside a hash-verified JSON envelope.
///
/// The envelope is written to a sibling temporary file and renamed into
/// place so a crash mid-write never leaves a truncated record behind.
pub fn write_record<T: Serialize>(record: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let record = serde_json::to_value(record)?;
    let envelope = RecordEnvelope {
        version: ENVELOPE_VERSION,
        written_at: Utc::now(),
        hash: compute_hash(&record)?,
        record,
    };

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(&serde_json::to_vec_pretty(&envelope)?)?;
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load and verify the record stored at `path`.
pub fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let envelope: RecordEnvelope = serde_json::from_slice(&bytes)?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(BackingStoreError::Corrupt(format!(
            "{} has unsupported envelope version {}",
            path.display(),
            envelope.version
        )));
    }
    if compute_hash(&envelope.record)? != envelope.hash {
        return Err(BackingStoreError::HashMismatch {
            path: path.to_path_buf(),
        });
    }
    Ok(serde_json::from_value(envelope.record)?)
}

fn compute_hash(record: &serde_json::Value) -> Result<String> {
    let serialized = serde_json::to_vec(record)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn record_survives_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("7.json");
        write_record(&json!({"id": 7, "name": "line-7"}), &path).unwrap();

        let loaded: serde_json::Value = read_record(&path).unwrap();
        assert_eq!(loaded["name"], json!("line-7"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn tampered_record_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("3.json");
        write_record(&json!({"id": 3, "active": false}), &path).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["record"]["active"] = json!(true);
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        let err = read_record::<serde_json::Value>(&path).unwrap_err();
        assert!(matches!(err, BackingStoreError::HashMismatch { .. }));
    }
}
