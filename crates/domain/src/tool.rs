//! Tool definitions, calls and the argument schema tree (§3, §4.2 of the
//! orchestration spec).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Where a tool's data comes from: a bulk-synced read-only cache, or a
/// mutating remote action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Cache,
    Action,
}

/// One node of the nested parameter-schema tree. Deliberately small: just
/// enough to validate arguments and to render a JSON-Schema-compatible
/// function definition for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Non-standard authoring flag: marks a property optional even when its
    /// parent lists it nowhere. Stripped by `strip_non_standard` before the
    /// schema reaches the LLM (§4.2: "strips non-standard flags").
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, ParameterSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
}

impl ParameterSchema {
    pub fn object(required: Vec<&str>, properties: HashMap<String, ParameterSchema>) -> Self {
        Self {
            type_: "object".into(),
            description: None,
            required: required.into_iter().map(String::from).collect(),
            enum_values: None,
            optional: false,
            properties,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self {
            type_: "string".into(),
            description: None,
            required: vec![],
            enum_values: None,
            optional: false,
            properties: HashMap::new(),
            items: None,
        }
    }

    pub fn integer() -> Self {
        Self {
            type_: "integer".into(),
            ..Self::string_like("integer")
        }
    }

    fn string_like(ty: &str) -> Self {
        Self {
            type_: ty.into(),
            description: None,
            required: vec![],
            enum_values: None,
            optional: false,
            properties: HashMap::new(),
            items: None,
        }
    }

    pub fn with_description(mut self, d: impl Into<String>) -> Self {
        self.description = Some(d.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Strict JSON-Schema-compatible rendering: drops the `optional` flag
    /// (§4.2's "formatForLLM").
    pub fn to_llm_schema(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("type".into(), Value::String(self.type_.clone()));
        if let Some(desc) = &self.description {
            obj.insert("description".into(), Value::String(desc.clone()));
        }
        if !self.required.is_empty() {
            obj.insert(
                "required".into(),
                Value::Array(self.required.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(values) = &self.enum_values {
            obj.insert("enum".into(), Value::Array(values.clone()));
        }
        if !self.properties.is_empty() {
            let props: serde_json::Map<String, Value> = self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_llm_schema()))
                .collect();
            obj.insert("properties".into(), Value::Object(props));
        }
        if let Some(items) = &self.items {
            obj.insert("items".into(), items.to_llm_schema());
        }
        Value::Object(obj)
    }

    /// Validate a `serde_json::Value` against this node, collecting the
    /// dotted paths of every missing or mistyped field instead of failing on
    /// the first one (§4.2: "enumerating missing/invalid fields").
    pub fn validate(&self, value: &Value, path: &str, missing: &mut Vec<String>) {
        if self.type_ == "object" {
            let Value::Object(map) = value else {
                missing.push(path.to_string());
                return;
            };
            for name in &self.required {
                if !map.contains_key(name) {
                    missing.push(join_path(path, name));
                }
            }
            for (name, schema) in &self.properties {
                if let Some(child) = map.get(name) {
                    schema.validate(child, &join_path(path, name), missing);
                }
            }
        }
    }
}

fn join_path(base: &str, field: &str) -> String {
    if base.is_empty() {
        field.to_string()
    } else {
        format!("{base}.{field}")
    }
}

/// Immutable tool definition loaded from declarative configuration (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub category: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_key: Option<String>,
    pub source: ToolSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_model: Option<String>,
    pub parameter_schema: ParameterSchema,
    #[serde(default)]
    pub description: String,
}

impl ToolDefinition {
    /// Strict JSON-Schema-compatible function definition for the LLM
    /// (§4.2's `formatForLLM`).
    pub fn to_llm_function(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameter_schema.to_llm_schema(),
        })
    }

    /// Validate `args` against this tool's schema. On failure returns a
    /// `schema`-kind [`Error`] naming every missing field.
    pub fn validate(&self, args: &Value) -> Result<()> {
        let mut missing = Vec::new();
        self.parameter_schema.validate(args, "", &mut missing);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::schema(
                format!("tool '{}' has missing/invalid fields", self.name),
                missing,
            ))
        }
    }
}

/// A tool invocation requested by the LLM, with unresolved arguments
/// (placeholders not yet substituted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub session_id: String,
    pub user_id: String,
}
