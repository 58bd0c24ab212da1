use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::ModelError;
use crate::statements::{ObjectTemplate, SourceLocation};

/// Identity of a value-expression node, stable for the lifetime of the model.
///
/// The runtime keys per-call-site state (template caches, `unique` reference
/// bookkeeping) on this rather than on node addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A parsed scalar as it appears in the recipe document.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarLiteral {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// Anything that can fulfill the role of a field's value.
#[derive(Debug, Clone)]
pub enum FieldExpr {
    /// A literal, possibly a template string with `${{ }}` markers.
    Simple(SimpleValue),
    /// A named function call with positional and/or named arguments.
    Structured(StructuredValue),
    /// An inline child template; rendering it generates the child rows and
    /// yields a reference to the last one.
    Nested(Box<ObjectTemplate>),
}

impl FieldExpr {
    pub fn location(&self) -> &SourceLocation {
        match self {
            FieldExpr::Simple(value) => &value.location,
            FieldExpr::Structured(value) => &value.location,
            FieldExpr::Nested(template) => &template.location,
        }
    }
}

/// A value with no sub-structure, although it may hold a template formula.
#[derive(Debug, Clone)]
pub struct SimpleValue {
    pub definition: ScalarLiteral,
    pub location: SourceLocation,
    node_id: NodeId,
}

impl SimpleValue {
    pub fn new(definition: ScalarLiteral, location: SourceLocation) -> Self {
        Self {
            definition,
            location,
            node_id: NodeId::next(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

/// A value with substructure which will call a handler function.
///
/// Arguments stay unevaluated in the model; whether they are rendered before
/// the call is the callee's decision (eager vs lazy functions).
#[derive(Debug, Clone)]
pub struct StructuredValue {
    pub function_name: String,
    pub args: Vec<FieldExpr>,
    pub kwargs: Vec<(String, FieldExpr)>,
    pub location: SourceLocation,
    node_id: NodeId,
}

impl StructuredValue {
    pub fn new(
        function_name: impl Into<String>,
        args: Vec<FieldExpr>,
        kwargs: Vec<(String, FieldExpr)>,
        location: SourceLocation,
    ) -> Result<Self, ModelError> {
        let function_name = function_name.into();
        if function_name.matches('.').count() > 1 {
            return Err(ModelError::BadFunctionName {
                function_name,
                location,
            });
        }
        Ok(Self {
            function_name,
            args,
            kwargs,
            location,
            node_id: NodeId::next(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Named argument lookup.
    pub fn kwarg(&self, name: &str) -> Option<&FieldExpr> {
        self.kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::new("recipe.yml", 1)
    }

    #[test]
    fn node_ids_are_distinct() {
        let a = SimpleValue::new(ScalarLiteral::Int(1), loc());
        let b = SimpleValue::new(ScalarLiteral::Int(1), loc());
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn doubly_dotted_function_names_rejected() {
        let result = StructuredValue::new("a.b.c", Vec::new(), Vec::new(), loc());
        assert!(matches!(result, Err(ModelError::BadFunctionName { .. })));
    }
}
