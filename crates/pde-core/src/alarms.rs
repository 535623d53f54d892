//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::cmp::Ordering;

use chrono::Utc;
use parking_lot::RwLock;
use pde_metrics::EngineMetrics;
use pde_model::{Alarm, AlarmCause, AlarmId, Severity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AlarmError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmSortField {
    #[default]
    Id,
    RaisedAt,
    UpdatedAt,
    ClearedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityFilter {
    Warning,
    Cleared,
    /// Any severity except cleared.
    NotCleared,
}

impl SeverityFilter {
    fn accepts(self, severity: Severity) -> bool {
        match self {
            SeverityFilter::Warning => severity == Severity::Warning,
            SeverityFilter::Cleared => severity == Severity::Cleared,
            SeverityFilter::NotCleared => severity != Severity::Cleared,
        }
    }
}

/// Filtering, sorting and paging applied by [`AlarmManager::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlarmQuery {
    pub sort_field: AlarmSortField,
    pub direction: SortDirection,
    pub system_name: Option<String>,
    pub severity: Option<SeverityFilter>,
    pub acknowledged: Option<bool>,
    /// Zero-based page index; requires `item_per_page`.
    pub page: Option<usize>,
    pub item_per_page: Option<usize>,
}

impl AlarmQuery {
    pub fn apply(&self, alarms: Vec<Alarm>) -> Vec<Alarm> {
        let mut selected: Vec<Alarm> = alarms
            .into_iter()
            .filter(|alarm| {
                self.system_name
                    .as_deref()
                    .map_or(true, |name| alarm.system_name.as_deref() == Some(name))
            })
            .filter(|alarm| {
                self.severity
                    .map_or(true, |filter| filter.accepts(alarm.severity()))
            })
            .filter(|alarm| {
                self.acknowledged
                    .map_or(true, |acknowledged| alarm.acknowledged == acknowledged)
            })
            .collect();

        selected.sort_by(|a, b| {
            let ordering = compare(self.sort_field, a, b);
            match self.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        match (self.page, self.item_per_page) {
            (Some(page), Some(per_page)) if per_page > 0 => selected
                .into_iter()
                .skip(page.saturating_mul(per_page))
                .take(per_page)
                .collect(),
            _ => selected,
        }
    }
}

fn compare(field: AlarmSortField, a: &Alarm, b: &Alarm) -> Ordering {
    match field {
        AlarmSortField::Id => a.id.cmp(&b.id),
        AlarmSortField::RaisedAt => a.raised_at.cmp(&b.raised_at),
        AlarmSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        // Missing clearedAt sorts after any set value.
        AlarmSortField::ClearedAt => match (a.cleared_at, b.cleared_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

#[derive(Debug, Default)]
struct AlarmBook {
    next_id: AlarmId,
    active: Vec<Alarm>,
    cleared: Vec<Alarm>,
}

/// Lifecycle owner for drift alarms.
///
/// Raising is idempotent over active alarms; clearing moves alarms to a
/// cleared set that is kept for history.
#[derive(Debug)]
pub struct AlarmManager {
    book: RwLock<AlarmBook>,
    metrics: Option<EngineMetrics>,
}

impl Default for AlarmManager {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AlarmManager {
    pub fn new(metrics: Option<EngineMetrics>) -> Self {
        Self {
            book: RwLock::new(AlarmBook {
                next_id: 1,
                ..AlarmBook::default()
            }),
            metrics,
        }
    }

    /// Raise an alarm unless an active one with the same identity exists.
    ///
    /// Returns the id of the new or existing alarm, or `None` when neither
    /// identifier is given.
    pub fn raise(
        &self,
        system_id: Option<&str>,
        system_name: Option<&str>,
        cause: AlarmCause,
    ) -> Option<AlarmId> {
        if system_id.is_none() && system_name.is_none() {
            warn!(cause = cause.as_str(), "ignoring alarm without a system identifier");
            return None;
        }
        let mut book = self.book.write();
        if let Some(existing) = book
            .active
            .iter()
            .find(|alarm| alarm.matches(system_id, system_name, cause))
        {
            return Some(existing.id);
        }

        let now = Utc::now();
        let id = book.next_id;
        book.next_id += 1;
        let alarm = Alarm {
            id,
            system_id: system_id.map(str::to_owned),
            system_name: system_name.map(str::to_owned),
            cause,
            acknowledged: false,
            raised_at: now,
            updated_at: now,
            cleared_at: None,
            acknowledged_at: None,
        };
        info!(alarm_id = id, cause = cause.as_str(), description = %alarm.description(), "alarm raised");
        book.active.push(alarm);
        self.publish(&book);
        Some(id)
    }

    /// Clear every active alarm with the given identity. Returns how many
    /// alarms were cleared.
    pub fn clear(
        &self,
        system_id: Option<&str>,
        system_name: Option<&str>,
        cause: AlarmCause,
    ) -> usize {
        self.clear_where(|alarm| alarm.matches(system_id, system_name, cause))
    }

    /// Clear every active alarm accepted by `predicate`.
    pub fn clear_where(&self, predicate: impl Fn(&Alarm) -> bool) -> usize {
        let mut book = self.book.write();
        let (matching, remaining): (Vec<Alarm>, Vec<Alarm>) =
            std::mem::take(&mut book.active).into_iter().partition(|alarm| predicate(alarm));
        book.active = remaining;
        if matching.is_empty() {
            return 0;
        }

        let now = Utc::now();
        let count = matching.len();
        for mut alarm in matching {
            alarm.cleared_at = Some(now);
            alarm.updated_at = now;
            info!(alarm_id = alarm.id, cause = alarm.cause.as_str(), "alarm cleared");
            book.cleared.push(alarm);
        }
        self.publish(&book);
        count
    }

    /// Set the acknowledged flag on alarm `id`, active or cleared.
    pub fn acknowledge(&self, id: AlarmId, acknowledged: bool) -> Result<Alarm, AlarmError> {
        let mut book = self.book.write();
        let AlarmBook { active, cleared, .. } = &mut *book;
        let alarm = active
            .iter_mut()
            .chain(cleared.iter_mut())
            .find(|alarm| alarm.id == id)
            .ok_or(AlarmError::UnknownAlarm(id))?;

        alarm.acknowledged = acknowledged;
        alarm.acknowledged_at = acknowledged.then(Utc::now);
        debug!(alarm_id = id, acknowledged, "alarm acknowledgement changed");
        Ok(alarm.clone())
    }

    pub fn get(&self, id: AlarmId) -> Option<Alarm> {
        let book = self.book.read();
        book.active
            .iter()
            .chain(book.cleared.iter())
            .find(|alarm| alarm.id == id)
            .cloned()
    }

    /// Active and cleared alarms, filtered, sorted and paged by `query`.
    pub fn list(&self, query: &AlarmQuery) -> Vec<Alarm> {
        let all = {
            let book = self.book.read();
            book.active
                .iter()
                .chain(book.cleared.iter())
                .cloned()
                .collect()
        };
        query.apply(all)
    }

    pub fn active(&self) -> Vec<Alarm> {
        self.book.read().active.clone()
    }

    fn publish(&self, book: &AlarmBook) {
        if let Some(metrics) = &self.metrics {
            metrics.set_active_alarms(book.active.len());
        }
    }
}
