//! Parameter validation against a [`ToolSchema`]

use serde_json::Value;

use super::definition::{PropertySchema, ToolSchema};
use super::result::ValidationError;

pub const REQUIRED_FIELD_MISSING: &str = "REQUIRED_FIELD_MISSING";
pub const INVALID_TYPE: &str = "INVALID_TYPE";
pub const INVALID_ENUM_VALUE: &str = "INVALID_ENUM_VALUE";
pub const STRING_TOO_SHORT: &str = "STRING_TOO_SHORT";
pub const STRING_TOO_LONG: &str = "STRING_TOO_LONG";
pub const NUMBER_TOO_SMALL: &str = "NUMBER_TOO_SMALL";
pub const NUMBER_TOO_LARGE: &str = "NUMBER_TOO_LARGE";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";

/// Check `params` against `schema`, returning every violation found.
///
/// `null` params are treated as an empty object. Fields not declared in the
/// schema are accepted.
pub fn validate_params(schema: &ToolSchema, params: &Value) -> Vec<ValidationError> {
    let empty = serde_json::Map::new();
    let object = match params {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return vec![ValidationError::new(
                INVALID_PARAMS,
                "",
                format!("Parameters must be an object, got {}", json_type_name(other)),
            )];
        }
    };

    let mut errors = Vec::new();

    for field in &schema.required {
        if !object.contains_key(field) {
            errors.push(ValidationError::new(
                REQUIRED_FIELD_MISSING,
                field,
                format!("Required field '{}' is missing", field),
            ));
        }
    }

    for (field, value) in object {
        if let Some(property) = schema.properties.get(field) {
            validate_property(field, property, value, &mut errors);
        }
    }

    errors
}

fn validate_property(
    field: &str,
    property: &PropertySchema,
    value: &Value,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(expected) = property.param_type {
        if !expected.matches(value) {
            errors.push(ValidationError::new(
                INVALID_TYPE,
                field,
                format!("Expected {}, got {}", expected, json_type_name(value)),
            ));
            // Remaining constraints assume the declared type
            return;
        }
    }

    if let Some(allowed) = &property.allowed_values {
        if !allowed.contains(value) {
            errors.push(ValidationError::new(
                INVALID_ENUM_VALUE,
                field,
                format!("Value {} is not one of {}", value, Value::Array(allowed.clone())),
            ));
        }
    }

    if let Value::String(s) = value {
        let len = s.chars().count();
        if let Some(min) = property.min_length.filter(|min| len < *min) {
            errors.push(ValidationError::new(
                STRING_TOO_SHORT,
                field,
                format!("Length {} is below minimum {}", len, min),
            ));
        }
        if let Some(max) = property.max_length.filter(|max| len > *max) {
            errors.push(ValidationError::new(
                STRING_TOO_LONG,
                field,
                format!("Length {} exceeds maximum {}", len, max),
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = property.minimum.filter(|min| n < *min) {
            errors.push(ValidationError::new(
                NUMBER_TOO_SMALL,
                field,
                format!("Value {} is below minimum {}", n, min),
            ));
        }
        if let Some(max) = property.maximum.filter(|max| n > *max) {
            errors.push(ValidationError::new(
                NUMBER_TOO_LARGE,
                field,
                format!("Value {} exceeds maximum {}", n, max),
            ));
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;
    use crate::tools::{ParamType, PropertySchema};
    use serde_json::json;

    fn query_schema() -> ToolSchema {
        ToolSchema::empty()
            .required_property(
                "sql",
                PropertySchema::of_type(ParamType::String).with_length(Some(1), Some(10)),
            )
            .optional_property(
                "limit",
                PropertySchema::of_type(ParamType::Integer).with_range(Some(1.0), Some(100.0)),
            )
            .optional_property(
                "format",
                PropertySchema::of_type(ParamType::String)
                    .with_enum([json!("json"), json!("csv")]),
            )
    }

    fn codes(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.code.as_str()).collect()
    }

    #[test]
    fn test_valid_params() {
        let errors = validate_params(&query_schema(), &json!({"sql": "select 1", "limit": 5}));
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn test_missing_required_field() {
        let errors = validate_params(&query_schema(), &json!({"limit": 5}));
        assert_eq!(codes(&errors), vec![REQUIRED_FIELD_MISSING]);
        assert_eq!(errors[0].field, "sql");
    }

    #[test]
    fn test_null_params_count_as_empty_object() {
        let errors = validate_params(&query_schema(), &Value::Null);
        assert_eq!(codes(&errors), vec![REQUIRED_FIELD_MISSING]);
    }

    #[test]
    fn test_non_object_params() {
        let errors = validate_params(&query_schema(), &json!([1, 2]));
        assert_eq!(codes(&errors), vec![INVALID_PARAMS]);
    }

    #[test]
    fn test_type_mismatch_skips_other_constraints() {
        let errors = validate_params(&query_schema(), &json!({"sql": 42}));
        assert_eq!(codes(&errors), vec![INVALID_TYPE]);
    }

    #[test]
    fn test_enum_membership() {
        let errors = validate_params(&query_schema(), &json!({"sql": "x", "format": "xml"}));
        assert_eq!(codes(&errors), vec![INVALID_ENUM_VALUE]);
    }

    #[test]
    fn test_string_and_number_bounds() {
        let errors = validate_params(&query_schema(), &json!({"sql": "", "limit": 0}));
        let mut got = codes(&errors);
        got.sort();
        assert_eq!(got, vec![NUMBER_TOO_SMALL, STRING_TOO_SHORT]);

        let errors = validate_params(
            &query_schema(),
            &json!({"sql": "select * from t", "limit": 1000}),
        );
        let mut got = codes(&errors);
        got.sort();
        assert_eq!(got, vec![NUMBER_TOO_LARGE, STRING_TOO_LONG]);
    }

    #[test]
    fn test_undeclared_fields_allowed() {
        let errors = validate_params(&query_schema(), &json!({"sql": "x", "extra": true}));
        assert!(errors.is_empty());
    }
}
