//! ---
//! pde_section: "03-persistence-logging"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Persistence abstractions and storage bindings."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the backing stores.
#[derive(Clone)]
pub struct PersistenceMetrics {
    writes: IntCounterVec,
    records_loaded: IntCounterVec,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let writes = IntCounterVec::new(
            Opts::new(
                "pde_backing_store_writes_total",
                "Backing store mutations grouped by store and outcome",
            ),
            &["store", "outcome"],
        )?;
        registry.register(Box::new(writes.clone()))?;

        let records_loaded = IntCounterVec::new(
            Opts::new(
                "pde_backing_store_records_loaded_total",
                "Records read back from a backing store at startup",
            ),
            &["store"],
        )?;
        registry.register(Box::new(records_loaded.clone()))?;

        Ok(Self {
            writes,
            records_loaded,
        })
    }

    /// Record the outcome of a write, remove or remove-all call.
    pub fn record_write<T, E>(&self, store: &str, result: &std::result::Result<T, E>) {
        let outcome = if result.is_ok() { "success" } else { "failure" };
        self.writes.with_label_values(&[store, outcome]).inc();
    }

    /// Record how many records a full read returned.
    pub fn record_loaded(&self, store: &str, count: usize) {
        self.records_loaded
            .with_label_values(&[store])
            .inc_by(count as u64);
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_outcomes_are_labelled() {
        let registry = Arc::new(Registry::new());
        let metrics = PersistenceMetrics::new(registry.clone()).unwrap();
        metrics.record_write::<(), ()>("entries", &Ok(()));
        metrics.record_write::<(), ()>("entries", &Err(()));
        metrics.record_write::<(), ()>("entries", &Ok(()));

        let families = registry.gather();
        let writes = families
            .iter()
            .find(|family| family.get_name() == "pde_backing_store_writes_total")
            .unwrap();
        let success = writes
            .get_metric()
            .iter()
            .find(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|label| label.get_name() == "outcome" && label.get_value() == "success")
            })
            .unwrap();
        assert_eq!(success.get_counter().get_value() as u64, 2);
    }
}
