use schemars::schema_for;
use tablesmith_mapping::LoadPlan;

fn main() {
    let schema = schema_for!(LoadPlan);
    let json = serde_json::to_string_pretty(&schema).expect("serialize json schema");
    println!("{json}");
}
