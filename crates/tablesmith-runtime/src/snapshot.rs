use std::collections::BTreeMap;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use tablesmith_model::Dependency;

use crate::errors::GenerateError;
use crate::value::ObjectReference;

/// Current contract version for continuation snapshots.
pub const SNAPSHOT_VERSION: &str = "1";

/// Serializable identity state enabling a later run to behave as a seamless
/// continuation of an earlier one.
///
/// Bindings are lightweight references (table name + id), never full row
/// payloads; the interpreter only guarantees `id` access on a rehydrated
/// binding. Opaque to everything except the identity manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContinuationState {
    pub version: String,
    pub today: NaiveDate,
    /// Per-table high-water marks; `next_id` continues from here.
    pub last_used_ids: BTreeMap<String, u64>,
    /// Per-table id at the start of the invocation that wrote the snapshot,
    /// kept so stopping criteria can be evaluated across resumptions.
    pub start_ids: BTreeMap<String, u64>,
    /// Declared nickname/tablename slots.
    pub nicknames_and_tables: BTreeMap<String, String>,
    /// Most recent row per nickname.
    pub nicknamed_objects: BTreeMap<String, ObjectReference>,
    /// Most recent row per tablename.
    pub table_bindings: BTreeMap<String, ObjectReference>,
    pub intertable_dependencies: Vec<Dependency>,
    /// Plugin-declared persistent state, opaque to the interpreter.
    pub plugin_state: BTreeMap<String, serde_json::Value>,
}

impl ContinuationState {
    /// Start ids for the invocation that resumes from this snapshot:
    /// one past each table's high-water mark.
    pub fn resume_start_ids(&self) -> BTreeMap<String, u64> {
        self.last_used_ids
            .iter()
            .map(|(table, last)| (table.clone(), last + 1))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, GenerateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, GenerateError> {
        Ok(serde_json::from_str(raw)?)
    }
}
