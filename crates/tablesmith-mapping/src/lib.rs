//! Load-order planning for generated datasets.
//!
//! Consumes the dependency edges recorded during generation plus the recipe
//! summary and produces a `LoadPlan`: a best-effort topological table order
//! with per-table lookup descriptions for a downstream loader. Cycles are
//! tolerated with a warning, since the consumer can usually repair circular
//! links with a second pass.

pub mod model;
pub mod order;

pub use model::{LoadPlan, LoadStep, Lookup};
pub use order::build_load_plan;
