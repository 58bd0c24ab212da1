use thiserror::Error;

use crate::statements::SourceLocation;

/// Errors raised while assembling a recipe tree.
///
/// These cover malformed statement shape only; everything that can go wrong
/// while *executing* a recipe lives in the runtime crate.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A template declares both a count expression and a for-each binding.
    #[error(
        "cannot specify both a count expression and a for_each binding for '{tablename}' near {location}"
    )]
    CountConflict {
        tablename: String,
        location: SourceLocation,
    },
    /// A function name contains more than one namespace separator.
    #[error("function names may contain at most one '.': '{function_name}' near {location}")]
    BadFunctionName {
        function_name: String,
        location: SourceLocation,
    },
}
