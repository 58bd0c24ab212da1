use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use tablesmith_model::ScalarLiteral;

/// Stable handle for a row in the interpreter's arena.
///
/// Handles stay valid for the whole run, so a field can hold a "reference"
/// to a row that is still being built without ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle(pub(crate) usize);

/// Lightweight pointer to a generated row: table name plus id.
///
/// This is what crosses continuation boundaries and what sinks receive in
/// place of full rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectReference {
    pub tablename: String,
    pub id: u64,
}

/// A value produced by evaluating a field expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    /// A row generated during this run, addressable by arena handle.
    Row(RowHandle),
    /// A deferred or cross-run row pointer.
    Reference(ObjectReference),
}

impl Value {
    pub fn from_literal(literal: &ScalarLiteral) -> Value {
        match literal {
            ScalarLiteral::Null => Value::Null,
            ScalarLiteral::Bool(value) => Value::Bool(*value),
            ScalarLiteral::Int(value) => Value::Int(*value),
            ScalarLiteral::Float(value) => Value::Float(*value),
            ScalarLiteral::Text(value) => Value::Text(value.clone()),
            ScalarLiteral::Date(value) => Value::Date(*value),
            ScalarLiteral::DateTime(value) => Value::DateTime(*value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Row(_) => "row",
            Value::Reference(_) => "reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Truthiness for `when`-clauses and conditions.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Text(value) => match value.as_str() {
                "true" | "True" => true,
                "false" | "False" | "" => false,
                other => other.parse::<f64>().map(|n| n != 0.0).unwrap_or(true),
            },
            Value::List(items) => !items.is_empty(),
            Value::Date(_) | Value::DateTime(_) | Value::Row(_) | Value::Reference(_) => true,
        }
    }
}

static INT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static FLOAT_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Coerce a numeric-looking string to a number: all digits becomes an
/// integer, digits with a single dot becomes a float, anything else
/// (including shapes like `1.2.3`) stays text.
pub fn coerce_numeric_text(text: &str) -> Option<Value> {
    let int_re = INT_RE.get_or_init(|| Regex::new(r"^[0-9]+$").ok()).as_ref()?;
    let float_re = FLOAT_RE
        .get_or_init(|| Regex::new(r"^[0-9]*\.[0-9]*$").ok())
        .as_ref()?;
    if text.is_empty() || text == "." {
        return None;
    }
    if int_re.is_match(text) {
        return text.parse::<i64>().ok().map(Value::Int);
    }
    if float_re.is_match(text) {
        return text.parse::<f64>().ok().map(Value::Float);
    }
    None
}
