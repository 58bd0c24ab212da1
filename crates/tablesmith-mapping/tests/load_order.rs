use std::collections::BTreeSet;

use tablesmith_mapping::build_load_plan;
use tablesmith_model::{Dependency, RecipeSummary, TableInfo};

fn summary(tables: &[(&str, &[&str])]) -> RecipeSummary {
    let mut summary = RecipeSummary::default();
    for (name, fields) in tables {
        summary.tables.insert(
            name.to_string(),
            TableInfo {
                name: name.to_string(),
                fields: fields.iter().map(|field| field.to_string()).collect(),
                friends: Vec::new(),
            },
        );
    }
    summary
}

fn dependency(from: &str, to: &str, field: &str) -> Dependency {
    Dependency {
        table_name_from: from.to_string(),
        table_name_to: to.to_string(),
        field_name: field.to_string(),
    }
}

#[test]
fn dependencies_order_before_dependents() {
    let summary = summary(&[
        ("Account", &["name", "owner"]),
        ("User", &["alias"]),
        ("Contact", &["account", "email"]),
    ]);
    let mut deps = BTreeSet::new();
    deps.insert(dependency("Contact", "Account", "account"));
    deps.insert(dependency("Account", "User", "owner"));

    let plan = build_load_plan(&summary, &deps);
    assert!(plan.warnings.is_empty());

    let order = plan.table_order();
    let user = order.iter().position(|t| *t == "User").unwrap();
    let account = order.iter().position(|t| *t == "Account").unwrap();
    let contact = order.iter().position(|t| *t == "Contact").unwrap();
    assert!(user < account);
    assert!(account < contact);
}

#[test]
fn lookups_are_split_from_plain_fields() {
    let summary = summary(&[("Account", &["name"]), ("Contact", &["account", "email"])]);
    let mut deps = BTreeSet::new();
    deps.insert(dependency("Contact", "Account", "account"));

    let plan = build_load_plan(&summary, &deps);
    let contact = plan.step("Contact").expect("Contact step");
    assert_eq!(contact.fields, vec!["email"]);
    let lookup = &contact.lookups["account"];
    assert_eq!(lookup.table, "Account");
    assert_eq!(lookup.key_field, "account");

    let account = plan.step("Account").expect("Account step");
    assert_eq!(account.fields, vec!["name"]);
    assert!(account.lookups.is_empty());
}

#[test]
fn mutual_cycle_succeeds_with_a_warning() {
    let summary = summary(&[("A", &["partner"]), ("B", &["partner"])]);
    let mut deps = BTreeSet::new();
    deps.insert(dependency("A", "B", "partner"));
    deps.insert(dependency("B", "A", "partner"));

    let plan = build_load_plan(&summary, &deps);
    assert_eq!(plan.steps.len(), 2);
    assert!(!plan.warnings.is_empty());
    assert!(plan.warnings[0].contains("circular references"));
}

#[test]
fn self_reference_is_a_warning_not_an_error() {
    let summary = summary(&[("Employee", &["manager", "name"]), ("Team", &["name"])]);
    let mut deps = BTreeSet::new();
    deps.insert(dependency("Employee", "Employee", "manager"));

    let plan = build_load_plan(&summary, &deps);
    assert_eq!(plan.steps.len(), 2);
    assert!(!plan.warnings.is_empty());
    // Team has no dependencies, so it still goes first
    assert_eq!(plan.table_order(), vec!["Team", "Employee"]);
    let employee = plan.step("Employee").expect("Employee step");
    assert_eq!(employee.lookups["manager"].table, "Employee");
}

#[test]
fn references_to_scratch_tables_stay_plain_fields() {
    let summary = summary(&[("Account", &["helper", "name"])]);
    let mut deps = BTreeSet::new();
    deps.insert(dependency("Account", "__helper", "helper"));

    let plan = build_load_plan(&summary, &deps);
    assert!(plan.warnings.is_empty());
    let account = plan.step("Account").expect("Account step");
    assert!(account.lookups.is_empty());
    assert_eq!(account.fields, vec!["helper", "name"]);
}

#[test]
fn plan_serializes_to_json() {
    let summary = summary(&[("Account", &["name"])]);
    let plan = build_load_plan(&summary, &BTreeSet::new());
    let raw = serde_json::to_string(&plan).expect("serializes");
    assert!(raw.contains("\"table\":\"Account\""));
}
