//! Request construction: system instructions, reply schema, user message.

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::fields::EmailRecord;

/// Built-in instructions. `--prompt-file` replaces them.
pub const DEFAULT_INSTRUCTIONS: &str = include_str!("../prompts/freight_extraction.txt");

/// Shape of the JSON object the model is asked for. Only used to render the
/// schema into the prompt; replies are read leniently.
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ShipmentReply {
    /// "pl_sea_import_lcl" or "pl_sea_export_lcl"
    product_line: Option<String>,
    origin_port_code: Option<String>,
    origin_port_name: Option<String>,
    destination_port_code: Option<String>,
    destination_port_name: Option<String>,
    /// Shipping term as stated; omit when none is named
    incoterm: Option<String>,
    cargo_weight: Option<f64>,
    /// kg, lbs or MT
    cargo_weight_unit: Option<String>,
    cargo_cbm: Option<f64>,
    /// Free-form quantity such as "3 RT"
    cargo: Option<String>,
    is_dangerous: bool,
    /// Several legs as "A->B; C->D"
    routes: Option<String>,
    final_destination_port_name: Option<String>,
    transshipment_port: Option<String>,
    cargo_items: Option<Vec<CargoItemReply>>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct CargoItemReply {
    cargo_weight: Option<f64>,
    cargo_weight_unit: Option<String>,
    cargo_cbm: Option<f64>,
    is_dangerous: Option<bool>,
}

/// JSON schema of the expected reply.
pub fn reply_schema() -> Value {
    serde_json::to_value(schema_for!(ShipmentReply)).unwrap_or(Value::Null)
}

/// Instructions followed by the reply schema.
pub fn system_prompt(instructions: &str) -> String {
    let schema = serde_json::to_string_pretty(&reply_schema()).unwrap_or_default();
    format!("{}\n\n### Reply JSON Schema\n{}", instructions.trim_end(), schema)
}

pub fn user_prompt(email: &EmailRecord) -> String {
    format!("Subject: {}\nBody: {}", email.subject, email.body)
}
