use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A foreign-key field: which table it points at and which field carries
/// the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Lookup {
    pub table: String,
    pub key_field: String,
}

/// One table's slice of the load plan, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LoadStep {
    pub table: String,
    /// Plain fields, loaded as-is.
    pub fields: Vec<String>,
    /// Reference fields, resolved against previously loaded tables.
    pub lookups: BTreeMap<String, Lookup>,
}

/// Ordered load instructions for a downstream consumer.
///
/// Steps are arranged so that, as much as possible, a table's dependencies
/// come before it; `warnings` records where cycles made that impossible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LoadPlan {
    pub steps: Vec<LoadStep>,
    pub warnings: Vec<String>,
}

impl LoadPlan {
    pub fn step(&self, table: &str) -> Option<&LoadStep> {
        self.steps.iter().find(|step| step.table == table)
    }

    pub fn table_order(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.table.as_str()).collect()
    }
}
