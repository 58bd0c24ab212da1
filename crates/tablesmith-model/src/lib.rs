//! Object model for Tablesmith recipes.
//!
//! This crate defines the immutable statement tree produced by a recipe
//! parser, the per-table schema summary inferred from it, and the shared
//! error type. The runtime crate walks these structures; nothing here is
//! mutated after construction.

pub mod error;
pub mod statements;
pub mod summary;
pub mod values;

pub use error::ModelError;
pub use statements::{
    FieldFactory, ForEachVariableDefinition, ObjectTemplate, SourceLocation, Statement,
    VariableDefinition,
};
pub use summary::{Dependency, RecipeSummary, TableInfo};
pub use values::{FieldExpr, NodeId, ScalarLiteral, SimpleValue, StructuredValue};

/// Prefix marking scratch tables and internal fields: usable in expressions,
/// never emitted to a sink.
pub const INTERNAL_PREFIX: &str = "__";
