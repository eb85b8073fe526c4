//! Translation between tool JSON Schemas and upstream function declarations,
//! and coercion of model-produced arguments back to what a tool expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

/// Arguments did not fit the tool's input schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema mismatch: {0}")]
pub struct SchemaMismatch(pub String);

/// Type tags of the upstream schema subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

/// Upstream parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Schema {
    pub fn new(kind: SchemaType) -> Self {
        Self {
            kind,
            description: None,
            nullable: false,
            enum_values: Vec::new(),
            items: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// A function the upstream model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

/// Translate a tool's JSON Schema into a function declaration.
///
/// `oneOf`/`anyOf`/`allOf`/`$ref` and schemas without a usable `type`
/// degrade to `OBJECT` when they carry properties, otherwise to `STRING`.
/// Unknown keywords are dropped. The top level is always an `OBJECT`.
pub fn to_declaration(name: &str, description: &str, json_schema: &Value) -> FunctionDeclaration {
    let mut parameters = translate(json_schema);
    if parameters.kind != SchemaType::Object {
        parameters = Schema::new(SchemaType::Object);
    }
    FunctionDeclaration {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

fn translate(json: &Value) -> Schema {
    let Some(obj) = json.as_object() else {
        return Schema::new(SchemaType::String);
    };

    let properties: BTreeMap<String, Schema> = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.iter().map(|(k, v)| (k.clone(), translate(v))).collect())
        .unwrap_or_default();
    let fallback = if properties.is_empty() {
        SchemaType::String
    } else {
        SchemaType::Object
    };

    let composite = ["oneOf", "anyOf", "allOf", "$ref"]
        .iter()
        .any(|key| obj.contains_key(*key));
    let (kind, nullable) = match obj.get("type") {
        _ if composite => (fallback, false),
        Some(Value::String(name)) => (SchemaType::parse(name).unwrap_or(fallback), false),
        Some(Value::Array(names)) => {
            let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
            let kind = names
                .iter()
                .filter(|n| **n != "null")
                .find_map(|n| SchemaType::parse(n))
                .unwrap_or(fallback);
            (kind, names.contains(&"null"))
        }
        _ => (fallback, false),
    };

    let mut schema = Schema::new(kind);
    schema.nullable = nullable;
    schema.description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    schema.enum_values = obj
        .get("enum")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    match kind {
        SchemaType::Array => {
            let items = obj
                .get("items")
                .map(translate)
                .unwrap_or_else(|| Schema::new(SchemaType::String));
            schema.items = Some(Box::new(items));
        }
        SchemaType::Object => {
            schema.required = obj
                .get("required")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|n| properties.contains_key(*n))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            schema.properties = properties;
        }
        _ => {}
    }

    schema
}

/// Arguments after coercion; never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolCallArgs(Map<String, Value>);

impl ToolCallArgs {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Coerce model-produced arguments to a tool's JSON Schema.
///
/// Strings are converted to the declared `integer`, `number`, `boolean`,
/// `array` or `object` type; conversions that do not parse fail. Top-level
/// properties the schema does not declare are dropped unless the schema
/// declares none at all. `null` becomes `{}`. String values are trimmed.
pub fn coerce(args: Value, schema: &Value) -> Result<ToolCallArgs, SchemaMismatch> {
    let args = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(SchemaMismatch(format!(
                "arguments must be an object, got {}",
                type_name(&other)
            )));
        }
    };

    let declared = schema
        .get("properties")
        .and_then(Value::as_object)
        .filter(|props| !props.is_empty());

    let mut out = Map::new();
    for (key, value) in args {
        match declared.map(|props| props.get(&key)) {
            Some(None) => {
                warn!(argument = %key, "dropping argument not declared by the tool");
            }
            Some(Some(prop)) => {
                let value = coerce_value(value, prop)
                    .map_err(|e| SchemaMismatch(format!("{key}: {e}")))?;
                out.insert(key, value);
            }
            None => {
                out.insert(key, value);
            }
        }
    }

    // Execution sees the same canonical values the cache key is built from.
    let out: Map<String, Value> = out
        .into_iter()
        .map(|(key, value)| (key, cache::canonicalize(&value)))
        .collect();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !out.contains_key(name) {
                return Err(SchemaMismatch(format!("missing required argument '{name}'")));
            }
        }
    }

    Ok(ToolCallArgs(out))
}

fn coerce_value(value: Value, schema: &Value) -> Result<Value, String> {
    let Some(kind) = declared_type(schema) else {
        return Ok(value);
    };

    match (kind, value) {
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected integer, got {s:?}")),
        ("number", Value::String(s)) => {
            parse_number(s.trim()).ok_or_else(|| format!("expected number, got {s:?}"))
        }
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("expected boolean, got {s:?}")),
        },
        ("array", Value::String(s)) => {
            let items = split_list(&s)?;
            coerce_items(items, schema)
        }
        ("array", Value::Array(items)) => coerce_items(items, schema),
        ("object", Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => coerce_nested(map, schema),
            _ => Err(format!("expected JSON object, got {s:?}")),
        },
        ("object", Value::Object(map)) => coerce_nested(map, schema),
        (_, value) => Ok(value),
    }
}

/// JSON list if it looks like one, otherwise comma separated.
fn split_list(s: &str) -> Result<Vec<Value>, String> {
    let trimmed = s.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON array: {e}"));
    }
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(trimmed
        .split(',')
        .map(|item| Value::String(item.trim().to_string()))
        .collect())
}

fn coerce_items(items: Vec<Value>, schema: &Value) -> Result<Value, String> {
    let Some(item_schema) = schema.get("items") else {
        return Ok(Value::Array(items));
    };
    items
        .into_iter()
        .map(|item| coerce_value(item, item_schema))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

/// Nested objects coerce declared properties and keep the rest.
fn coerce_nested(map: Map<String, Value>, schema: &Value) -> Result<Value, String> {
    let props = schema.get("properties").and_then(Value::as_object);
    let mut out = Map::new();
    for (key, value) in map {
        let value = match props.and_then(|p| p.get(&key)) {
            Some(prop) => coerce_value(value, prop).map_err(|e| format!("{key}: {e}"))?,
            None => value,
        };
        out.insert(key, value);
    }
    Ok(Value::Object(out))
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(Value::from(n));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

/// The declared type, taking the first non-null entry of a type array.
fn declared_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(name) => Some(name.as_str()),
        Value::Array(names) => names.iter().filter_map(Value::as_str).find(|n| *n != "null"),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
