use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::statements::{ObjectTemplate, Statement};
use crate::values::FieldExpr;
use crate::INTERNAL_PREFIX;

/// A recorded "table A has a field that points at table B" edge.
///
/// Deduplicated by its full (from, to, field) triple; the mapping builder
/// collapses further to (from, to) pairs for ordering.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct Dependency {
    pub table_name_from: String,
    pub table_name_to: String,
    pub field_name: String,
}

/// What we can infer about a table's shape from the templates that feed it.
///
/// A table can be referred to in more than one place, so this unifies every
/// template targeting the same tablename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableInfo {
    pub name: String,
    /// Field names in first-seen order, internal fields excluded.
    pub fields: Vec<String>,
    /// Friend tablenames in first-seen order.
    pub friends: Vec<String>,
}

impl TableInfo {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            friends: Vec::new(),
        }
    }

    fn register(&mut self, template: &ObjectTemplate) {
        for field in &template.fields {
            if field.name.starts_with(INTERNAL_PREFIX) {
                continue;
            }
            if !self.fields.contains(&field.name) {
                self.fields.push(field.name.clone());
            }
        }
        for friend in &template.friends {
            if let Some(friend_template) = friend.as_template() {
                if friend_template.tablename.starts_with(INTERNAL_PREFIX) {
                    continue;
                }
                if !self.friends.contains(&friend_template.tablename) {
                    self.friends.push(friend_template.tablename.clone());
                }
            }
        }
    }
}

/// Per-table schema summary for a whole recipe, used to pre-declare columns
/// to sinks before any row is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RecipeSummary {
    pub tables: BTreeMap<String, TableInfo>,
}

impl RecipeSummary {
    /// Walk the statement tree, including friends and inline field
    /// templates, and unify what each template says about its table.
    pub fn from_statements(statements: &[Statement]) -> Self {
        let mut summary = RecipeSummary::default();
        summary.visit_statements(statements);
        summary
    }

    pub fn contains_table(&self, tablename: &str) -> bool {
        self.tables.contains_key(tablename)
    }

    fn visit_statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            if let Statement::Template(template) = statement {
                self.visit_template(template);
            }
        }
    }

    fn visit_template(&mut self, template: &ObjectTemplate) {
        if !template.tablename.starts_with(INTERNAL_PREFIX) {
            self.tables
                .entry(template.tablename.clone())
                .or_insert_with(|| TableInfo::new(&template.tablename))
                .register(template);
        }
        for field in &template.fields {
            self.visit_expr(&field.definition);
        }
        self.visit_statements(&template.friends);
    }

    fn visit_expr(&mut self, expr: &FieldExpr) {
        match expr {
            FieldExpr::Nested(template) => self.visit_template(template),
            FieldExpr::Structured(value) => {
                for arg in &value.args {
                    self.visit_expr(arg);
                }
                for (_, arg) in &value.kwargs {
                    self.visit_expr(arg);
                }
            }
            FieldExpr::Simple(_) => {}
        }
    }
}
