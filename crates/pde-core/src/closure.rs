//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use pde_model::{Connection, EntryId, PlantDescriptionEntry, System};

/// Snapshot of the entry store keyed by id.
pub type EntryMap = BTreeMap<EntryId, Arc<PlantDescriptionEntry>>;

/// `root` followed by every entry it transitively includes, depth-first in
/// declaration order. Each entry appears once; unknown ids are skipped, so
/// the walk terminates on cyclic includes.
pub fn include_closure<'a>(
    entries: &'a EntryMap,
    root: &'a PlantDescriptionEntry,
) -> Vec<&'a PlantDescriptionEntry> {
    let mut visited = HashSet::from([root.id]);
    let mut ordered = vec![root];
    let mut stack: Vec<EntryId> = root.include.iter().rev().copied().collect();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        if let Some(entry) = entries.get(&id) {
            ordered.push(entry.as_ref());
            stack.extend(entry.include.iter().rev().copied());
        }
    }
    ordered
}

/// Systems declared anywhere in the include closure of `root`.
pub fn closure_systems(entries: &EntryMap, root: &PlantDescriptionEntry) -> Vec<System> {
    include_closure(entries, root)
        .into_iter()
        .flat_map(|entry| entry.systems.iter().cloned())
        .collect()
}

/// Connections declared anywhere in the include closure of `root`.
pub fn closure_connections(entries: &EntryMap, root: &PlantDescriptionEntry) -> Vec<Connection> {
    include_closure(entries, root)
        .into_iter()
        .flat_map(|entry| entry.connections.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pde_model::PlantDescription;

    fn entry(id: EntryId, include: Vec<EntryId>, system: &str) -> Arc<PlantDescriptionEntry> {
        let description = PlantDescription {
            plant_description: format!("entry-{id}"),
            active: false,
            include,
            systems: vec![System {
                system_id: system.to_owned(),
                system_name: None,
                metadata: None,
                ports: Vec::new(),
            }],
            connections: Vec::new(),
        };
        Arc::new(PlantDescriptionEntry::from_description(id, description, Utc::now()))
    }

    #[test]
    fn closure_is_depth_first_and_deduplicated() {
        let mut entries = EntryMap::new();
        entries.insert(2, entry(2, vec![4], "b"));
        entries.insert(3, entry(3, vec![4], "c"));
        entries.insert(4, entry(4, vec![], "d"));
        let root = entry(1, vec![2, 3], "a");

        let ids: Vec<_> = include_closure(&entries, &root).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);

        let systems: Vec<_> = closure_systems(&entries, &root)
            .into_iter()
            .map(|system| system.system_id)
            .collect();
        assert_eq!(systems, vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn cyclic_includes_terminate() {
        let mut entries = EntryMap::new();
        entries.insert(1, entry(1, vec![2], "a"));
        entries.insert(2, entry(2, vec![1], "b"));
        let root = entries[&1].clone();
        assert_eq!(include_closure(&entries, &root).len(), 2);
    }
}
