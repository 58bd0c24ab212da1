use thiserror::Error;

use tablesmith_model::{ModelError, SourceLocation};

pub(crate) fn fmt_location(location: &Option<SourceLocation>) -> String {
    match location {
        Some(location) => format!(" near {location}"),
        None => String::new(),
    }
}

/// Errors raised while executing a recipe.
///
/// Every variant that originates inside a field expression carries the recipe
/// location of the expression; the interpreter fills in the owning field's
/// location as the error unwinds if the expression did not provide one.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Malformed statement or expression shape.
    #[error("syntax error: {message}{}", fmt_location(.location))]
    Syntax {
        message: String,
        location: Option<SourceLocation>,
    },
    /// Unknown variable, function, or reference target.
    #[error("name error: {message}{}", fmt_location(.location))]
    Name {
        message: String,
        location: Option<SourceLocation>,
    },
    /// Wrong argument type or count, or an unsupported field value.
    #[error("value error: {message}{}", fmt_location(.location))]
    Value {
        message: String,
        location: Option<SourceLocation>,
    },
    /// A field's evaluation reached itself again, directly or transitively.
    #[error("field cycle detected: {}{}", .chain.join(" -> "), fmt_location(.location))]
    FieldCycle {
        chain: Vec<String>,
        location: Option<SourceLocation>,
    },
    /// Forward references that were never satisfied by end of pass,
    /// reported together.
    #[error("reference{} not fulfilled: {}", if .names.len() > 1 { "s" } else { "" }, .names.join(", "))]
    UnresolvedReferences { names: Vec<String> },
    /// The stopping-criteria loop made no headway during a full pass.
    #[error("no progress toward stopping criteria: {message}")]
    NoProgress { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl GenerateError {
    pub fn syntax(message: impl Into<String>, location: Option<&SourceLocation>) -> Self {
        GenerateError::Syntax {
            message: message.into(),
            location: location.cloned(),
        }
    }

    pub fn name(message: impl Into<String>, location: Option<&SourceLocation>) -> Self {
        GenerateError::Name {
            message: message.into(),
            location: location.cloned(),
        }
    }

    pub fn value(message: impl Into<String>, location: Option<&SourceLocation>) -> Self {
        GenerateError::Value {
            message: message.into(),
            location: location.cloned(),
        }
    }

    /// Fill in a location if the error does not already carry one.
    pub fn with_location(self, location: &SourceLocation) -> Self {
        match self {
            GenerateError::Syntax {
                message,
                location: None,
            } => GenerateError::Syntax {
                message,
                location: Some(location.clone()),
            },
            GenerateError::Name {
                message,
                location: None,
            } => GenerateError::Name {
                message,
                location: Some(location.clone()),
            },
            GenerateError::Value {
                message,
                location: None,
            } => GenerateError::Value {
                message,
                location: Some(location.clone()),
            },
            GenerateError::FieldCycle {
                chain,
                location: None,
            } => GenerateError::FieldCycle {
                chain,
                location: Some(location.clone()),
            },
            other => other,
        }
    }

    /// Enrich an error with the owning field's name and location as it
    /// unwinds out of a field-evaluation pass.
    pub fn for_field(self, field_name: &str, location: &SourceLocation) -> Self {
        let wrapped = match self {
            GenerateError::Syntax { message, location } => GenerateError::Syntax {
                message: format!("problem rendering field '{field_name}': {message}"),
                location,
            },
            GenerateError::Name { message, location } => GenerateError::Name {
                message: format!("problem rendering field '{field_name}': {message}"),
                location,
            },
            GenerateError::Value { message, location } => GenerateError::Value {
                message: format!("problem rendering field '{field_name}': {message}"),
                location,
            },
            other => other,
        };
        wrapped.with_location(location)
    }
}
