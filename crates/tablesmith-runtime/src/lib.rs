//! Recipe execution runtime for Tablesmith.
//!
//! Consumes the statement tree from `tablesmith-model` and drives row
//! generation: scoped interpretation, lazy cycle-detected field evaluation,
//! persistent identity for restartable runs, and dependency recording for
//! the downstream load-order builder.

pub mod engine;
pub mod errors;
pub mod funcs;
pub mod globals;
pub mod history;
pub mod output;
pub mod rows;
pub mod scope;
pub mod snapshot;
pub mod template;
pub mod value;

pub use engine::{EvalContext, ExecuteOptions, Interpreter, RunReport, StoppingCriteria};
pub use errors::GenerateError;
pub use funcs::{Callable, CallArgs, FunctionRegistry, LazyArgs};
pub use globals::{Globals, IdManager, SlotState};
pub use output::{CollectingSink, JsonLinesSink, OutputSink};
pub use snapshot::{ContinuationState, SNAPSHOT_VERSION};
pub use value::{ObjectReference, RowHandle, Value};
