//! End-to-end: run a recipe through the interpreter, then order its tables
//! from the dependencies it recorded.

use tablesmith_mapping::build_load_plan;
use tablesmith_model::{
    FieldExpr, FieldFactory, ObjectTemplate, ScalarLiteral, SimpleValue, SourceLocation, Statement,
    StructuredValue,
};
use tablesmith_runtime::{CollectingSink, ExecuteOptions, Interpreter};

fn loc() -> SourceLocation {
    SourceLocation::new("recipe.yml", 1)
}

fn reference_to(name: &str) -> FieldExpr {
    FieldExpr::Structured(
        StructuredValue::new(
            "reference",
            vec![FieldExpr::Simple(SimpleValue::new(
                ScalarLiteral::Text(name.to_string()),
                loc(),
            ))],
            Vec::new(),
            loc(),
        )
        .expect("valid function name"),
    )
}

fn template(tablename: &str, fields: Vec<FieldFactory>) -> Statement {
    Statement::Template(
        ObjectTemplate::new(tablename, None, None, None, false, fields, Vec::new(), loc())
            .expect("well-formed template"),
    )
}

#[test]
fn recorded_dependencies_drive_the_load_order() {
    // Contact references Account, so Account must load first even though
    // Contact is declared first
    let statements = vec![
        template(
            "Contact",
            vec![FieldFactory::new("account", reference_to("Account"), loc())],
        ),
        template(
            "Account",
            vec![FieldFactory::new(
                "name",
                FieldExpr::Simple(SimpleValue::new(
                    ScalarLiteral::Text("Acme".to_string()),
                    loc(),
                )),
                loc(),
            )],
        ),
    ];

    let mut sink = CollectingSink::new();
    let mut interp =
        Interpreter::new(&statements, ExecuteOptions::default()).expect("interpreter builds");
    interp.execute(&mut sink).expect("generation succeeds");

    let plan = build_load_plan(interp.summary(), interp.globals().dependencies());
    assert!(plan.warnings.is_empty());
    assert_eq!(plan.table_order(), vec!["Account", "Contact"]);

    let contact = plan.step("Contact").expect("Contact step");
    assert_eq!(contact.lookups["account"].table, "Account");
    let account = plan.step("Account").expect("Account step");
    assert_eq!(account.fields, vec!["name"]);
}

#[test]
fn mutual_references_still_produce_a_plan() {
    // A references B and B references A by forward reference
    let statements = vec![
        template("A", vec![FieldFactory::new("partner", reference_to("B"), loc())]),
        template("B", vec![FieldFactory::new("partner", reference_to("A"), loc())]),
    ];

    let mut sink = CollectingSink::new();
    let mut interp =
        Interpreter::new(&statements, ExecuteOptions::default()).expect("interpreter builds");
    interp.execute(&mut sink).expect("generation succeeds");

    let plan = build_load_plan(interp.summary(), interp.globals().dependencies());
    assert_eq!(plan.steps.len(), 2);
    assert!(!plan.warnings.is_empty(), "cycle surfaces as a warning");
}
