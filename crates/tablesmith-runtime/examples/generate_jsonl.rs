use std::io::{self, Write};

use tracing_subscriber::EnvFilter;

use tablesmith_model::{
    FieldExpr, FieldFactory, ObjectTemplate, ScalarLiteral, SimpleValue, SourceLocation, Statement,
    StructuredValue,
};
use tablesmith_runtime::{ExecuteOptions, Interpreter, JsonLinesSink, StoppingCriteria};

fn simple(text: &str, line: u32) -> FieldExpr {
    FieldExpr::Simple(SimpleValue::new(
        ScalarLiteral::Text(text.to_string()),
        SourceLocation::new("example.recipe", line),
    ))
}

fn reference(name: &str, line: u32) -> Result<FieldExpr, Box<dyn std::error::Error>> {
    Ok(FieldExpr::Structured(StructuredValue::new(
        "reference",
        vec![simple(name, line)],
        Vec::new(),
        SourceLocation::new("example.recipe", line),
    )?))
}

/// Build a small two-table recipe by hand (a parser would normally do
/// this) and stream the generated rows as JSON lines to stdout.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let statements = vec![
        Statement::Template(ObjectTemplate::new(
            "Account",
            Some("acme".to_string()),
            None,
            None,
            false,
            vec![FieldFactory::new(
                "name",
                simple("Account ${{id}}", 2),
                SourceLocation::new("example.recipe", 2),
            )],
            Vec::new(),
            SourceLocation::new("example.recipe", 1),
        )?),
        Statement::Template(ObjectTemplate::new(
            "Contact",
            None,
            Some(simple("2", 4)),
            None,
            false,
            vec![FieldFactory::new(
                "account",
                reference("acme", 5)?,
                SourceLocation::new("example.recipe", 5),
            )],
            Vec::new(),
            SourceLocation::new("example.recipe", 3),
        )?),
    ];

    let options = ExecuteOptions {
        stopping_criteria: Some(StoppingCriteria::new("Contact", 6)),
        seed: Some(7),
        ..ExecuteOptions::default()
    };
    let mut interp = Interpreter::new(&statements, options)?;
    let mut sink = JsonLinesSink::new(io::stdout().lock());
    let report = interp.execute(&mut sink)?;

    let snapshot = interp.snapshot().to_json()?;
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "passes={} tables={}", report.passes, report.rows_written.len())?;
    writeln!(stderr, "{snapshot}")?;
    Ok(())
}
