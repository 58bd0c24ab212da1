use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use tablesmith_model::{Dependency, RecipeSummary};

use crate::model::{LoadPlan, LoadStep, Lookup};

/// Order tables so dependencies load first, tolerating cycles.
///
/// Repeatedly place every table whose recorded dependency targets are all
/// already placed; when none is free (a cycle, including self-references),
/// place the first remaining table anyway and surface a warning.
pub fn build_load_plan(summary: &RecipeSummary, dependencies: &BTreeSet<Dependency>) -> LoadPlan {
    // edges restricted to tables that actually get emitted; a reference to
    // a scratch table cannot become a lookup
    let mut reference_fields: BTreeMap<(String, String), String> = BTreeMap::new();
    let mut deps_by_table: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for dependency in dependencies {
        if !summary.contains_table(&dependency.table_name_from)
            || !summary.contains_table(&dependency.table_name_to)
        {
            continue;
        }
        reference_fields.insert(
            (
                dependency.table_name_from.clone(),
                dependency.field_name.clone(),
            ),
            dependency.table_name_to.clone(),
        );
        deps_by_table
            .entry(dependency.table_name_from.clone())
            .or_default()
            .insert(dependency.table_name_to.clone());
    }

    let mut remaining: Vec<String> = summary.tables.keys().cloned().collect();
    let mut placed: Vec<String> = Vec::new();
    let mut placed_set: BTreeSet<String> = BTreeSet::new();
    let mut warnings = Vec::new();

    while !remaining.is_empty() {
        let free: Vec<String> = remaining
            .iter()
            .filter(|table| {
                deps_by_table
                    .get(*table)
                    .map(|targets| targets.iter().all(|target| placed_set.contains(target)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if free.is_empty() {
            let message = format!(
                "circular references among tables: {}; load order is best-effort",
                remaining.join(", ")
            );
            warn!(tables = ?remaining, "circular table references");
            warnings.push(message);
            let table = remaining.remove(0);
            placed_set.insert(table.clone());
            placed.push(table);
        } else {
            for table in free {
                remaining.retain(|candidate| candidate != &table);
                placed_set.insert(table.clone());
                placed.push(table);
            }
        }
    }

    let steps = placed
        .into_iter()
        .map(|table| {
            let info = &summary.tables[&table];
            let lookups: BTreeMap<String, Lookup> = info
                .fields
                .iter()
                .filter_map(|field| {
                    reference_fields
                        .get(&(table.clone(), field.clone()))
                        .map(|target| {
                            (
                                field.clone(),
                                Lookup {
                                    table: target.clone(),
                                    key_field: field.clone(),
                                },
                            )
                        })
                })
                .collect();
            let fields = info
                .fields
                .iter()
                .filter(|field| !lookups.contains_key(*field))
                .cloned()
                .collect();
            LoadStep {
                table,
                fields,
                lookups,
            }
        })
        .collect();

    LoadPlan { steps, warnings }
}
