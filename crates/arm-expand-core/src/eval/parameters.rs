//! Template parameters: declared types, value sources and resolution.

use serde_json::Value as JsonValue;

use crate::error::{ExpressionError, Result};
use crate::eval::compiler;
use crate::eval::context::TemplateContext;
use crate::eval::value::{json_get, Value};

/// The declared type of a template parameter or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    String,
    SecureString,
    Int,
    Bool,
    Object,
    SecureObject,
    Array,
}

impl ParameterType {
    /// Parses a `type` property. Matching is case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "string" => ParameterType::String,
            "securestring" => ParameterType::SecureString,
            "int" => ParameterType::Int,
            "bool" => ParameterType::Bool,
            "object" => ParameterType::Object,
            "secureobject" => ParameterType::SecureObject,
            "array" => ParameterType::Array,
            _ => return None,
        })
    }

    pub fn is_secure(self) -> bool {
        matches!(self, ParameterType::SecureString | ParameterType::SecureObject)
    }

    /// Returns true if `json` is an acceptable value of this type.
    pub fn accepts(self, json: &JsonValue) -> bool {
        match self {
            ParameterType::String | ParameterType::SecureString => json.is_string(),
            ParameterType::Int => json.is_i64() || json.is_u64(),
            ParameterType::Bool => json.is_boolean(),
            ParameterType::Object | ParameterType::SecureObject => json.is_object(),
            ParameterType::Array => json.is_array(),
        }
    }
}

/// A declared parameter together with the value supplied for it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSource {
    pub definition: JsonValue,
    pub supplied: Option<JsonValue>,
}

impl ParameterSource {
    pub fn new(definition: JsonValue, supplied: Option<JsonValue>) -> Self {
        Self {
            definition,
            supplied,
        }
    }

    /// The declared type. Definitions with a `$ref` or no `type` are treated
    /// as objects.
    pub fn parameter_type(&self) -> Option<ParameterType> {
        match json_get(&self.definition, "type").and_then(JsonValue::as_str) {
            Some(name) => ParameterType::parse(name),
            None if json_get(&self.definition, "$ref").is_some() => Some(ParameterType::Object),
            None => None,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.parameter_type().is_some_and(ParameterType::is_secure)
    }

    pub fn is_nullable(&self) -> bool {
        json_get(&self.definition, "nullable")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }
}

/// Returns the value assigned by a parameters file entry.
///
/// Entries are either `{"value": ...}` or a key vault reference
/// `{"reference": {"keyVault": {...}, "secretName": "..."}}`, which becomes a
/// `{{SecretReference:<secretName>}}` placeholder.
pub fn supplied_value(entry: &JsonValue) -> Option<JsonValue> {
    if let Some(value) = json_get(entry, "value") {
        return Some(value.clone());
    }
    let reference = json_get(entry, "reference")?;
    let secret_name = match reference {
        JsonValue::String(s) => s.as_str(),
        JsonValue::Object(_) => json_get(reference, "secretName")?.as_str()?,
        _ => return None,
    };
    Some(JsonValue::String(format!(
        "{{{{SecretReference:{}}}}}",
        secret_name
    )))
}

/// Resolves the value of a parameter.
///
/// A supplied value wins. Otherwise the template `defaultValue` is expanded,
/// then host defaults of a matching type are used, and finally nullable
/// parameters resolve to null.
pub fn resolve(ctx: &TemplateContext, name: &str, source: &ParameterSource) -> Result<Value> {
    let parameter_type = source.parameter_type();

    if let Some(supplied) = &source.supplied {
        return Ok(coerce(parameter_type, Value::from_json(supplied)));
    }

    if let Some(default) = json_get(&source.definition, "defaultValue") {
        let value = compiler::expand(ctx, default)?;
        return Ok(coerce(parameter_type, value));
    }

    let host_default = ctx
        .options()
        .parameter_defaults
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v);
    if let Some(default) = host_default {
        if parameter_type.map_or(true, |t| t.accepts(default)) {
            return Ok(Value::from_json(default));
        }
        tracing::warn!(parameter = name, "ignoring host default of the wrong type");
    }

    if source.is_nullable() {
        return Ok(Value::Null);
    }

    Err(ExpressionError::symbol(
        name,
        "no value was supplied and the parameter has no default",
    ))
}

/// Applies the lenient conversions a deployment performs on supplied values.
fn coerce(parameter_type: Option<ParameterType>, value: Value) -> Value {
    match (parameter_type, value) {
        (Some(ParameterType::Int), Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::String(s),
        },
        (Some(ParameterType::Bool), Value::String(s)) => {
            if s.eq_ignore_ascii_case("true") {
                Value::Bool(true)
            } else if s.eq_ignore_ascii_case("false") {
                Value::Bool(false)
            } else {
                Value::String(s)
            }
        }
        (_, value) => value,
    }
}

/// Checks a resolved value against the constraints of its definition.
///
/// Returns a description of the first violated constraint.
pub fn validate(definition: &JsonValue, value: &JsonValue) -> Option<String> {
    if let Some(JsonValue::Array(allowed)) = json_get(definition, "allowedValues") {
        let permitted = match value {
            JsonValue::Array(items) => items.iter().all(|item| allowed.contains(item)),
            other => allowed.contains(other),
        };
        if !permitted {
            return Some(format!("the value {} is not one of the allowed values", value));
        }
    }

    let length = match value {
        JsonValue::String(s) => Some(s.chars().count() as i64),
        JsonValue::Array(items) => Some(items.len() as i64),
        _ => None,
    };
    if let Some(length) = length {
        if let Some(min) = json_get(definition, "minLength").and_then(JsonValue::as_i64) {
            if length < min {
                return Some(format!("the length {} is less than the minimum of {}", length, min));
            }
        }
        if let Some(max) = json_get(definition, "maxLength").and_then(JsonValue::as_i64) {
            if length > max {
                return Some(format!("the length {} is greater than the maximum of {}", length, max));
            }
        }
    }

    if let Some(n) = value.as_i64() {
        if let Some(min) = json_get(definition, "minValue").and_then(JsonValue::as_i64) {
            if n < min {
                return Some(format!("the value {} is less than the minimum of {}", n, min));
            }
        }
        if let Some(max) = json_get(definition, "maxValue").and_then(JsonValue::as_i64) {
            if n > max {
                return Some(format!("the value {} is greater than the maximum of {}", n, max));
            }
        }
    }
    None
}
