mod common;

use common::{boolean, func, text, Tmpl};

use tablesmith_model::Statement;
use tablesmith_runtime::{
    CollectingSink, ExecuteOptions, GenerateError, Interpreter, Value,
};

fn run_seeded(statements: &[Statement], seed: u64) -> CollectingSink {
    let mut sink = CollectingSink::new();
    let options = ExecuteOptions {
        seed: Some(seed),
        ..ExecuteOptions::default()
    };
    let mut interp = Interpreter::new(statements, options).expect("interpreter builds");
    interp.execute(&mut sink).expect("generation succeeds");
    sink
}

#[test]
fn forward_references_resolve_once_the_target_exists() {
    // Contact points at a nickname declared later in the same pass
    let statements = vec![
        Tmpl::new("Contact")
            .field("best_friend", func("reference", vec![text("bobby")], vec![]))
            .statement(),
        Tmpl::new("Contact").nickname("bobby").statement(),
    ];
    let sink = run_seeded(&statements, 1);
    assert_eq!(sink.row_count("Contact"), 2);

    let Some(Value::Reference(promised)) = sink.field("Contact", 0, "best_friend") else {
        panic!("expected a forward reference");
    };
    // the nicknamed row materialized with the promised id
    assert_eq!(promised.tablename, "Contact");
    assert_eq!(
        sink.field("Contact", 1, "id"),
        Some(&Value::Int(promised.id as i64))
    );
}

#[test]
fn unfulfilled_forward_references_are_reported_together() {
    let statements = vec![
        Tmpl::new("Contact")
            .field("a", func("reference", vec![text("ghost_one")], vec![]))
            .field("b", func("reference", vec![text("ghost_two")], vec![]))
            .statement(),
        // both nicknames are declared but never fire
        Tmpl::new("Account").nickname("ghost_one").count(0).statement(),
        Tmpl::new("Account").nickname("ghost_two").count(0).statement(),
    ];
    let mut sink = CollectingSink::new();
    let mut interp =
        Interpreter::new(&statements, ExecuteOptions::default()).expect("interpreter builds");
    let err = interp.execute(&mut sink).expect_err("unresolved references");
    let GenerateError::UnresolvedReferences { names } = err else {
        panic!("expected UnresolvedReferences, got {err}");
    };
    assert_eq!(names, vec!["ghost_one".to_string(), "ghost_two".to_string()]);
}

#[test]
fn nicknames_rebind_to_the_newest_row() {
    let statements = vec![
        Tmpl::new("Account").nickname("current").statement(),
        Tmpl::new("Order")
            .field("account", func("reference", vec![text("current")], vec![]))
            .statement(),
        Tmpl::new("Account").nickname("current").statement(),
        Tmpl::new("Order")
            .field("account", func("reference", vec![text("current")], vec![]))
            .statement(),
    ];
    let sink = run_seeded(&statements, 1);

    let Some(Value::Reference(first)) = sink.field("Order", 0, "account") else {
        panic!("expected a reference");
    };
    let Some(Value::Reference(second)) = sink.field("Order", 1, "account") else {
        panic!("expected a reference");
    };
    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2, "later references resolve to the newest row");
}

#[test]
fn unique_random_references_never_repeat_within_a_call_site() {
    let statements = vec![
        Tmpl::new("Account").count(3).statement(),
        Tmpl::new("Contact")
            .count(3)
            .field(
                "account",
                func(
                    "random_reference",
                    vec![text("Account")],
                    vec![("unique", boolean(true))],
                ),
            )
            .statement(),
    ];
    let sink = run_seeded(&statements, 42);

    let mut seen = std::collections::BTreeSet::new();
    for row in 0..3 {
        let Some(Value::Reference(reference)) = sink.field("Contact", row, "account") else {
            panic!("expected a reference in row {row}");
        };
        assert!(seen.insert(reference.id), "row {row} repeated {reference:?}");
    }
}

#[test]
fn unique_random_references_fail_once_exhausted() {
    let statements = vec![
        Tmpl::new("Account").count(2).statement(),
        Tmpl::new("Contact")
            .count(3)
            .field(
                "account",
                func(
                    "random_reference",
                    vec![text("Account")],
                    vec![("unique", boolean(true))],
                ),
            )
            .statement(),
    ];
    let mut sink = CollectingSink::new();
    let options = ExecuteOptions {
        seed: Some(7),
        ..ExecuteOptions::default()
    };
    let mut interp = Interpreter::new(&statements, options).expect("interpreter builds");
    let err = interp.execute(&mut sink).expect_err("pool is exhausted");
    assert!(matches!(err, GenerateError::Value { .. }), "{err}");
    assert!(err.to_string().contains("no unused"), "{err}");
}

#[test]
fn scoped_random_references_stay_inside_the_ancestor_instance() {
    let statements = vec![
        Tmpl::new("Account")
            .count(2)
            .friend(Tmpl::new("Contact").count(2))
            .friend(
                Tmpl::new("Order").count(2).field(
                    "contact",
                    func(
                        "random_reference",
                        vec![text("Contact")],
                        vec![("scope", text("Account"))],
                    ),
                ),
            )
            .statement(),
    ];
    let sink = run_seeded(&statements, 11);
    assert_eq!(sink.row_count("Order"), 4);

    // contacts 1..=2 belong to account 1, contacts 3..=4 to account 2
    for row in 0..4 {
        let Some(Value::Reference(reference)) = sink.field("Order", row, "contact") else {
            panic!("expected a reference in row {row}");
        };
        let allowed: [u64; 2] = if row < 2 { [1, 2] } else { [3, 4] };
        assert!(
            allowed.contains(&reference.id),
            "order row {row} escaped its account: {reference:?}"
        );
    }
}

#[test]
fn references_to_unknown_names_fail() {
    let statements = vec![
        Tmpl::new("Contact")
            .field("friend", func("reference", vec![text("nobody")], vec![]))
            .statement(),
    ];
    let mut sink = CollectingSink::new();
    let mut interp =
        Interpreter::new(&statements, ExecuteOptions::default()).expect("interpreter builds");
    let err = interp.execute(&mut sink).expect_err("unknown name");
    assert!(matches!(err, GenerateError::Name { .. }), "{err}");
    assert!(err.to_string().contains("nobody"), "{err}");
}
