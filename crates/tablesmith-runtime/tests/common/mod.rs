//! Builders for assembling recipe trees in tests, standing in for the
//! external parser.
#![allow(dead_code)]

use tablesmith_model::{
    FieldExpr, FieldFactory, ForEachVariableDefinition, ObjectTemplate, ScalarLiteral, SimpleValue,
    SourceLocation, Statement, StructuredValue, VariableDefinition,
};

pub fn loc(line: u32) -> SourceLocation {
    SourceLocation::new("recipe.yml", line)
}

pub fn text(value: &str) -> FieldExpr {
    FieldExpr::Simple(SimpleValue::new(ScalarLiteral::Text(value.to_string()), loc(0)))
}

pub fn int(value: i64) -> FieldExpr {
    FieldExpr::Simple(SimpleValue::new(ScalarLiteral::Int(value), loc(0)))
}

pub fn boolean(value: bool) -> FieldExpr {
    FieldExpr::Simple(SimpleValue::new(ScalarLiteral::Bool(value), loc(0)))
}

pub fn func(name: &str, args: Vec<FieldExpr>, kwargs: Vec<(&str, FieldExpr)>) -> FieldExpr {
    FieldExpr::Structured(
        StructuredValue::new(
            name,
            args,
            kwargs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
            loc(0),
        )
        .expect("valid function name"),
    )
}

pub fn var(name: &str, expression: FieldExpr) -> Statement {
    Statement::Variable(VariableDefinition::new(name, expression, loc(0)))
}

/// Fluent template builder; `build` panics on shape errors, which tests
/// should not produce unless they mean to.
pub struct Tmpl {
    tablename: String,
    nickname: Option<String>,
    count: Option<FieldExpr>,
    for_each: Option<ForEachVariableDefinition>,
    just_once: bool,
    fields: Vec<FieldFactory>,
    friends: Vec<Statement>,
}

impl Tmpl {
    pub fn new(tablename: &str) -> Self {
        Self {
            tablename: tablename.to_string(),
            nickname: None,
            count: None,
            for_each: None,
            just_once: false,
            fields: Vec::new(),
            friends: Vec::new(),
        }
    }

    pub fn nickname(mut self, nickname: &str) -> Self {
        self.nickname = Some(nickname.to_string());
        self
    }

    pub fn count(mut self, count: i64) -> Self {
        self.count = Some(int(count));
        self
    }

    pub fn count_expr(mut self, expression: FieldExpr) -> Self {
        self.count = Some(expression);
        self
    }

    pub fn for_each(mut self, varname: &str, expression: FieldExpr) -> Self {
        self.for_each = Some(ForEachVariableDefinition::new(varname, expression, loc(0)));
        self
    }

    pub fn just_once(mut self) -> Self {
        self.just_once = true;
        self
    }

    pub fn field(mut self, name: &str, expression: FieldExpr) -> Self {
        self.fields.push(FieldFactory::new(name, expression, loc(0)));
        self
    }

    pub fn friend(mut self, friend: Tmpl) -> Self {
        self.friends.push(friend.statement());
        self
    }

    pub fn build(self) -> ObjectTemplate {
        ObjectTemplate::new(
            self.tablename,
            self.nickname,
            self.count,
            self.for_each,
            self.just_once,
            self.fields,
            self.friends,
            loc(0),
        )
        .expect("well-formed template")
    }

    pub fn statement(self) -> Statement {
        Statement::Template(self.build())
    }

    pub fn nested(self) -> FieldExpr {
        FieldExpr::Nested(Box::new(self.build()))
    }
}
