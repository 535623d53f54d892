//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Data model shared by the engine, persistence and API layers."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic alarm identifier.
pub type AlarmId = u64;

/// Drift condition an alarm reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmCause {
    SystemInactive,
    SystemNotRegistered,
    SystemNotInDescription,
}

impl AlarmCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmCause::SystemInactive => "systemInactive",
            AlarmCause::SystemNotRegistered => "systemNotRegistered",
            AlarmCause::SystemNotInDescription => "systemNotInDescription",
        }
    }
}

/// Severity derived from clear state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: AlarmId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,
    pub cause: AlarmCause,
    pub acknowledged: bool,
    pub raised_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Alarm {
    pub fn severity(&self) -> Severity {
        if self.cleared_at.is_some() {
            Severity::Cleared
        } else {
            Severity::Warning
        }
    }

    /// Whether this alarm has the identity `(system_id, system_name, cause)`.
    ///
    /// Identifiers are compared only where both sides carry them, and at
    /// least one of them must be comparable.
    pub fn matches(&self, system_id: Option<&str>, system_name: Option<&str>, cause: AlarmCause) -> bool {
        if self.cause != cause {
            return false;
        }
        let id_cmp = match (self.system_id.as_deref(), system_id) {
            (Some(own), Some(other)) => Some(own == other),
            _ => None,
        };
        let name_cmp = match (self.system_name.as_deref(), system_name) {
            (Some(own), Some(other)) => Some(own == other),
            _ => None,
        };
        match (id_cmp, name_cmp) {
            (None, None) => false,
            (id, name) => id.unwrap_or(true) && name.unwrap_or(true),
        }
    }

    /// Human readable description of the drift condition.
    pub fn description(&self) -> String {
        let subject = match (&self.system_name, &self.system_id) {
            (Some(name), _) => format!("System named '{name}'"),
            (None, Some(id)) => format!("System with ID '{id}'"),
            (None, None) => "Unknown system".to_owned(),
        };
        match self.cause {
            AlarmCause::SystemInactive => format!("{subject} appears to be inactive."),
            AlarmCause::SystemNotRegistered => {
                format!("{subject} cannot be found in the Service Registry.")
            }
            AlarmCause::SystemNotInDescription => {
                format!("{subject} is not present in the active Plant Description.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(system_id: Option<&str>, system_name: Option<&str>) -> Alarm {
        let now = Utc::now();
        Alarm {
            id: 1,
            system_id: system_id.map(str::to_owned),
            system_name: system_name.map(str::to_owned),
            cause: AlarmCause::SystemNotRegistered,
            acknowledged: false,
            raised_at: now,
            updated_at: now,
            cleared_at: None,
            acknowledged_at: None,
        }
    }

    #[test]
    fn matches_on_whichever_identifier_both_sides_carry() {
        let by_id = alarm(Some("s1"), None);
        assert!(by_id.matches(Some("s1"), Some("anything"), AlarmCause::SystemNotRegistered));
        assert!(!by_id.matches(Some("s2"), None, AlarmCause::SystemNotRegistered));
        assert!(!by_id.matches(None, Some("s1"), AlarmCause::SystemNotRegistered));

        let both = alarm(Some("s1"), Some("name-1"));
        assert!(both.matches(None, Some("name-1"), AlarmCause::SystemNotRegistered));
        assert!(!both.matches(Some("s1"), Some("name-2"), AlarmCause::SystemNotRegistered));
        assert!(!both.matches(Some("s1"), None, AlarmCause::SystemInactive));
    }

    #[test]
    fn severity_follows_clear_state() {
        let mut raised = alarm(Some("s1"), None);
        assert_eq!(raised.severity(), Severity::Warning);
        raised.cleared_at = Some(Utc::now());
        assert_eq!(raised.severity(), Severity::Cleared);
    }

    #[test]
    fn description_names_the_system() {
        let named = alarm(None, Some("pump"));
        assert_eq!(
            named.description(),
            "System named 'pump' cannot be found in the Service Registry."
        );
    }
}
