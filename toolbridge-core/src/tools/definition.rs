//! Tool and resource catalog entries
//!
//! Definitions are sourced from a [`super::CatalogProvider`] and are read-only
//! to the executor. Input schemas use the JSON Schema subset the executor can
//! enforce: required fields plus per-field type, enum, length and range.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A named, schema-described unit of external functionality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name (unique within a catalog)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Parameter schema
    #[serde(default)]
    pub input_schema: ToolSchema,
}

impl ToolDefinition {
    /// Create a definition with an empty schema
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: ToolSchema::empty(),
        }
    }

    /// Set the input schema
    pub fn with_schema(mut self, schema: ToolSchema) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Primitive JSON type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl ParamType {
    /// Parse a JSON Schema `type` keyword
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ParamType::String),
            "number" => Some(ParamType::Number),
            "integer" => Some(ParamType::Integer),
            "boolean" => Some(ParamType::Boolean),
            "object" => Some(ParamType::Object),
            "array" => Some(ParamType::Array),
            "null" => Some(ParamType::Null),
            _ => None,
        }
    }

    /// JSON Schema keyword for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
            ParamType::Null => "null",
        }
    }

    /// Check whether a JSON value has this type.
    ///
    /// `number` accepts integers; `integer` accepts floats with no fractional part.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
                }
                _ => false,
            },
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
            ParamType::Null => value.is_null(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraints on a single parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub param_type: Option<ParamType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl PropertySchema {
    /// Create a property of the given type
    pub fn of_type(param_type: ParamType) -> Self {
        Self {
            param_type: Some(param_type),
            ..Default::default()
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restrict to an enumerated set of values
    pub fn with_enum(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed_values = Some(values.into_iter().collect());
        self
    }

    /// Set string length bounds
    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    /// Set numeric range bounds
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.minimum = min;
        self.maximum = max;
        self
    }

    fn from_json(value: &Value) -> Self {
        let get_usize = |key: &str| value.get(key).and_then(Value::as_u64).map(|n| n as usize);
        let get_f64 = |key: &str| value.get(key).and_then(Value::as_f64);

        Self {
            param_type: value
                .get("type")
                .and_then(Value::as_str)
                .and_then(ParamType::parse),
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            allowed_values: value.get("enum").and_then(Value::as_array).cloned(),
            min_length: get_usize("minLength"),
            max_length: get_usize("maxLength"),
            minimum: get_f64("minimum"),
            maximum: get_f64("maximum"),
        }
    }
}

/// Tool parameter schema
///
/// Serializes as a JSON Schema object so catalogs can be passed through
/// unchanged to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct ToolSchema {
    /// Fields that must be present
    pub required: Vec<String>,

    /// Per-field constraints
    pub properties: BTreeMap<String, PropertySchema>,
}

impl From<Value> for ToolSchema {
    fn from(value: Value) -> Self {
        Self::from_json_schema(&value)
    }
}

impl From<ToolSchema> for Value {
    fn from(schema: ToolSchema) -> Self {
        schema.to_json_schema()
    }
}

impl ToolSchema {
    /// Schema that accepts any object
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a JSON Schema object. Unknown keywords are ignored.
    pub fn from_json_schema(schema: &Value) -> Self {
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| (name.clone(), PropertySchema::from_json(prop)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            required,
            properties,
        }
    }

    /// Render back to a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for (name, prop) in &self.properties {
            let mut rendered = serde_json::to_value(prop).unwrap_or(Value::Null);
            if rendered.is_null() {
                rendered = Value::Object(Map::new());
            }
            properties.insert(name.clone(), rendered);
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    /// Add a required property
    pub fn required_property(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, property);
        self
    }

    /// Add an optional property
    pub fn optional_property(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    /// Whether a field is required
    pub fn is_required(&self, field: &str) -> bool {
        self.required.iter().any(|r| r == field)
    }
}

/// A URI-addressable piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Unique URI
    pub uri: String,

    /// Display name
    pub name: String,

    /// MIME type of the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ResourceDescriptor {
    /// Create a descriptor
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            mime_type: None,
            description: None,
        }
    }

    /// Set the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Content fetched for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    pub text: String,
}

impl ResourceContent {
    /// Create text content for a URI
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
            text: text.into(),
        }
    }

    /// Set the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}
