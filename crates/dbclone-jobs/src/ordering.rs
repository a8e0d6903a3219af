//! Table planning: which tables a clone copies, and in what order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use dbclone_core::{CloneOptions, Error, Result, TableInfo};

/// Resolve the tables to copy from the source's table list.
///
/// An explicit `options.tables` list is both the allow-list and the order,
/// and every listed table must exist. Otherwise all source tables are copied
/// in dependency order. `exclude_tables` applies in both cases.
pub fn plan_tables(available: &[TableInfo], options: &CloneOptions) -> Result<Vec<TableInfo>> {
    match &options.tables {
        Some(requested) => {
            let by_name: HashMap<&str, &TableInfo> =
                available.iter().map(|t| (t.name.as_str(), t)).collect();

            let missing: Vec<&str> = requested
                .iter()
                .map(String::as_str)
                .filter(|name| !by_name.contains_key(name))
                .collect();
            if !missing.is_empty() {
                return Err(Error::NotFound(format!(
                    "tables not found in source: {}",
                    missing.join(", ")
                )));
            }

            Ok(requested
                .iter()
                .filter(|name| !options.is_excluded(name))
                .filter_map(|name| by_name.get(name.as_str()).map(|t| (*t).clone()))
                .collect())
        }
        None => Ok(dependency_order(
            available
                .iter()
                .filter(|t| !options.is_excluded(&t.name))
                .cloned()
                .collect(),
        )),
    }
}

/// Topologically sort tables so referenced tables come first.
///
/// Ties are broken by name. Self-references and references to tables outside
/// the set are ignored. Tables caught in a cycle are appended in name order.
pub fn dependency_order(tables: Vec<TableInfo>) -> Vec<TableInfo> {
    let mut by_name: BTreeMap<String, TableInfo> =
        tables.into_iter().map(|t| (t.name.clone(), t)).collect();

    let mut pending: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for (name, info) in &by_name {
        let deps: BTreeSet<String> = info
            .references
            .iter()
            .filter(|r| *r != name && by_name.contains_key(*r))
            .cloned()
            .collect();
        for dep in &deps {
            dependents.entry(dep.clone()).or_default().push(name.clone());
        }
        pending.insert(name.clone(), deps);
    }

    let mut ready: BTreeSet<String> = pending
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(name, _)| name.clone())
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(by_name.len());

    while let Some(name) = ready.pop_first() {
        pending.remove(&name);
        if let Some(children) = dependents.get(&name) {
            for child in children {
                if let Some(deps) = pending.get_mut(child) {
                    deps.remove(&name);
                    if deps.is_empty() {
                        ready.insert(child.clone());
                    }
                }
            }
        }
        order.push(name);
    }

    if !pending.is_empty() {
        let cyclic: Vec<String> = pending.into_keys().collect();
        warn!(
            subsystem = "jobs",
            component = "ordering",
            tables = %cyclic.join(", "),
            "Foreign-key cycle detected, copying remaining tables in name order"
        );
        order.extend(cyclic);
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}
