//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::time::Duration;

use pde_model::{AlarmId, EntryId};
use pde_persistence::BackingStoreError;

/// Ordered, human-readable topology violations.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("plant description rejected: {}", .violations.join(" "))]
pub struct ValidationErrors {
    violations: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }

    pub fn push(&mut self, violation: impl Into<String>) {
        self.violations.push(violation.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EntryStoreError {
    #[error("no plant description entry with id {0}")]
    NotFound(EntryId),
    #[error(transparent)]
    BackingStore(#[from] BackingStoreError),
}

/// Failures of the submission path.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("no plant description entry with id {0}")]
    NotFound(EntryId),
    #[error(transparent)]
    Store(EntryStoreError),
}

impl From<EntryStoreError> for AdmissionError {
    fn from(err: EntryStoreError) -> Self {
        match err {
            EntryStoreError::NotFound(id) => AdmissionError::NotFound(id),
            other => AdmissionError::Store(other),
        }
    }
}

/// Failures talking to the registry, the orchestrator or a monitored system.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid collaborator url: {0}")]
    InvalidUrl(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("system tracker has not completed its first registry poll")]
    NotInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AlarmError {
    #[error("no alarm with id {0}")]
    UnknownAlarm(AlarmId),
}

/// Reasons a reconciliation pass was abandoned before completing.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("rule backing store failure: {0}")]
    BackingStore(#[from] BackingStoreError),
    #[error("orchestrator failure: {0}")]
    Collaborator(#[from] CollaboratorError),
}
