// crates/sonar-mcp/src/schema.rs
// ============================================================================
// Module: Tool Schema Builder
// Description: Explicit JSON Schema builder for tool inputs and outputs.
// Purpose: Declare each field's type and description without reflection.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Tools declare their argument shape with [`ObjectSchema`]. Each field is
//! added with its JSON type and description; the builder renders a closed
//! object schema (`additionalProperties: false`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Object Schema
// ============================================================================

/// Builder for a closed JSON object schema.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    /// Field schemas keyed by field name.
    properties: Map<String, Value>,
    /// Required field names in declaration order.
    required: Vec<String>,
}

impl ObjectSchema {
    /// Starts an empty object schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required string field.
    #[must_use]
    pub fn required_string(self, name: &str, description: &str) -> Self {
        self.field(name, string_field(description, None), true)
    }

    /// Adds an optional string field.
    #[must_use]
    pub fn optional_string(self, name: &str, description: &str) -> Self {
        self.field(name, string_field(description, None), false)
    }

    /// Adds a required string field restricted to a fixed set of values.
    #[must_use]
    pub fn required_enum(self, name: &str, description: &str, values: &[&str]) -> Self {
        self.field(name, string_field(description, Some(values)), true)
    }

    /// Adds an optional integer field with an inclusive lower bound.
    #[must_use]
    pub fn optional_integer(self, name: &str, description: &str, minimum: u64) -> Self {
        let schema = json!({
            "type": "integer",
            "minimum": minimum,
            "description": description,
        });
        self.field(name, schema, false)
    }

    /// Adds an arbitrary field schema.
    #[must_use]
    pub fn field(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required && !self.required.iter().any(|existing| existing == name) {
            self.required.push(name.to_string());
        }
        self
    }

    /// Renders the JSON schema value.
    #[must_use]
    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "required": self.required,
            "additionalProperties": false,
        })
    }
}

/// Returns a permissive object schema for free-form structured output.
#[must_use]
pub fn open_object(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
    })
}

/// Returns a string field schema.
fn string_field(description: &str, values: Option<&[&str]>) -> Value {
    let mut schema = json!({
        "type": "string",
        "description": description,
    });
    if let (Some(values), Value::Object(map)) = (values, &mut schema) {
        map.insert("enum".to_string(), json!(values));
    }
    schema
}
