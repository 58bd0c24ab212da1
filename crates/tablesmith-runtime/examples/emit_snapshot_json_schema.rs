use schemars::schema_for;
use tablesmith_runtime::ContinuationState;

fn main() {
    let schema = schema_for!(ContinuationState);
    let json = serde_json::to_string_pretty(&schema).expect("serialize json schema");
    println!("{json}");
}
