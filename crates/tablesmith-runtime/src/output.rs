use std::collections::BTreeMap;
use std::io::Write;

use tablesmith_model::RecipeSummary;

use crate::errors::GenerateError;
use crate::value::Value;

/// Where finished rows go.
///
/// The interpreter flattens `Value::Row` to `Value::Reference` before
/// calling `write_row`, so sinks only ever see scalars, lists, and
/// lightweight references; a sink decides how to represent a reference
/// (a bare id, a foreign-key string, and so on).
pub trait OutputSink {
    /// Called once before any row is written, with the per-table schema
    /// summary inferred from the recipe.
    fn declare_tables(&mut self, summary: &RecipeSummary) -> Result<(), GenerateError> {
        let _ = summary;
        Ok(())
    }

    fn write_row(
        &mut self,
        tablename: &str,
        fields: &[(String, Value)],
    ) -> Result<(), GenerateError>;
}

/// In-memory sink, mostly for tests and for callers that post-process rows.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub declared: Option<RecipeSummary>,
    rows: BTreeMap<String, Vec<Vec<(String, Value)>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, tablename: &str) -> &[Vec<(String, Value)>] {
        self.rows.get(tablename).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_count(&self, tablename: &str) -> usize {
        self.rows(tablename).len()
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    /// Convenience for tests: the value of `field` in row `index`.
    pub fn field(&self, tablename: &str, index: usize, field: &str) -> Option<&Value> {
        self.rows(tablename)
            .get(index)?
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

impl OutputSink for CollectingSink {
    fn declare_tables(&mut self, summary: &RecipeSummary) -> Result<(), GenerateError> {
        self.declared = Some(summary.clone());
        Ok(())
    }

    fn write_row(
        &mut self,
        tablename: &str,
        fields: &[(String, Value)],
    ) -> Result<(), GenerateError> {
        self.rows
            .entry(tablename.to_string())
            .or_default()
            .push(fields.to_vec());
        Ok(())
    }
}

/// Streams each row as one JSON object per line, references flattened to
/// their ids.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for JsonLinesSink<W> {
    fn write_row(
        &mut self,
        tablename: &str,
        fields: &[(String, Value)],
    ) -> Result<(), GenerateError> {
        let mut object = serde_json::Map::new();
        object.insert(
            "_table".to_string(),
            serde_json::Value::String(tablename.to_string()),
        );
        for (name, value) in fields {
            object.insert(name.clone(), value_to_json(value)?);
        }
        serde_json::to_writer(&mut self.writer, &serde_json::Value::Object(object))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

fn value_to_json(value: &Value) -> Result<serde_json::Value, GenerateError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(value) => serde_json::Value::Bool(*value),
        Value::Int(value) => serde_json::Value::from(*value),
        Value::Float(value) => serde_json::Value::from(*value),
        Value::Text(value) => serde_json::Value::String(value.clone()),
        Value::Date(value) => serde_json::Value::String(value.format("%Y-%m-%d").to_string()),
        Value::DateTime(value) => {
            serde_json::Value::String(value.format("%Y-%m-%dT%H:%M:%S").to_string())
        }
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Reference(reference) => serde_json::Value::from(reference.id),
        Value::Row(_) => {
            return Err(GenerateError::value(
                "unflattened row reached the output sink",
                None,
            ));
        }
    })
}
