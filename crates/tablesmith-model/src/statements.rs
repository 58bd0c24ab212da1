use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::values::FieldExpr;

/// Position of a statement in the source recipe, kept for error reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub filename: String,
    pub line_num: u32,
}

impl SourceLocation {
    pub fn new(filename: impl Into<String>, line_num: u32) -> Self {
        Self {
            filename: filename.into(),
            line_num,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line_num)
    }
}

/// One top-level or nested recipe statement.
#[derive(Debug, Clone)]
pub enum Statement {
    Template(ObjectTemplate),
    Variable(VariableDefinition),
}

impl Statement {
    /// The template inside this statement, if it is one.
    pub fn as_template(&self) -> Option<&ObjectTemplate> {
        match self {
            Statement::Template(template) => Some(template),
            Statement::Variable(_) => None,
        }
    }
}

/// A factory that generates rows for one table.
#[derive(Debug, Clone)]
pub struct ObjectTemplate {
    pub tablename: String,
    pub nickname: Option<String>,
    /// Counts can be dynamic so they are expressions. `None` means one row.
    pub count_expr: Option<FieldExpr>,
    pub for_each: Option<ForEachVariableDefinition>,
    /// Generated on the first pass of a fresh run only.
    pub just_once: bool,
    pub fields: Vec<FieldFactory>,
    /// Statements executed once per generated row, sharing its scope.
    pub friends: Vec<Statement>,
    pub location: SourceLocation,
}

impl ObjectTemplate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tablename: impl Into<String>,
        nickname: Option<String>,
        count_expr: Option<FieldExpr>,
        for_each: Option<ForEachVariableDefinition>,
        just_once: bool,
        fields: Vec<FieldFactory>,
        friends: Vec<Statement>,
        location: SourceLocation,
    ) -> Result<Self, ModelError> {
        let tablename = tablename.into();
        if count_expr.is_some() && for_each.is_some() {
            return Err(ModelError::CountConflict {
                tablename,
                location,
            });
        }
        Ok(Self {
            tablename,
            nickname,
            count_expr,
            for_each,
            just_once,
            fields,
            friends,
            location,
        })
    }

    /// Display name used in error messages: `tablename (nickname)`.
    pub fn name(&self) -> String {
        match &self.nickname {
            Some(nickname) => format!("{} ({nickname})", self.tablename),
            None => self.tablename.clone(),
        }
    }

    /// Look up a declared field by name.
    pub fn field(&self, name: &str) -> Option<&FieldFactory> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// A single named field of a template.
#[derive(Debug, Clone)]
pub struct FieldFactory {
    pub name: String,
    pub definition: FieldExpr,
    pub location: SourceLocation,
}

impl FieldFactory {
    pub fn new(name: impl Into<String>, definition: FieldExpr, location: SourceLocation) -> Self {
        Self {
            name: name.into(),
            definition,
            location,
        }
    }
}

/// Binds a name to an evaluated expression, visible to subsequent statements
/// in the same scope and to their descendants.
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub varname: String,
    pub expression: FieldExpr,
    pub location: SourceLocation,
}

impl VariableDefinition {
    pub fn new(
        varname: impl Into<String>,
        expression: FieldExpr,
        location: SourceLocation,
    ) -> Self {
        Self {
            varname: varname.into(),
            expression,
            location,
        }
    }
}

/// A `for_each` loop binding: one row per element of the iterated value.
#[derive(Debug, Clone)]
pub struct ForEachVariableDefinition {
    pub varname: String,
    pub expression: FieldExpr,
    pub location: SourceLocation,
}

impl ForEachVariableDefinition {
    pub fn new(
        varname: impl Into<String>,
        expression: FieldExpr,
        location: SourceLocation,
    ) -> Self {
        Self {
            varname: varname.into(),
            expression,
            location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{ScalarLiteral, SimpleValue};

    fn loc() -> SourceLocation {
        SourceLocation::new("recipe.yml", 3)
    }

    fn simple(value: ScalarLiteral) -> FieldExpr {
        FieldExpr::Simple(SimpleValue::new(value, loc()))
    }

    #[test]
    fn count_and_for_each_conflict() {
        let result = ObjectTemplate::new(
            "Account",
            None,
            Some(simple(ScalarLiteral::Int(2))),
            Some(ForEachVariableDefinition::new(
                "item",
                simple(ScalarLiteral::Text("${{range(3)}}".to_string())),
                loc(),
            )),
            false,
            Vec::new(),
            Vec::new(),
            loc(),
        );
        assert!(matches!(result, Err(ModelError::CountConflict { .. })));
    }

    #[test]
    fn name_includes_nickname() {
        let template = ObjectTemplate::new(
            "Account",
            Some("acme".to_string()),
            None,
            None,
            false,
            Vec::new(),
            Vec::new(),
            loc(),
        )
        .unwrap();
        assert_eq!(template.name(), "Account (acme)");
    }
}
