use std::fmt;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::eval::context::Context;
use crate::eval::mock::Mock;

/// An object's entries in insertion order. Keys are matched case-insensitively.
pub type Map = Vec<(String, Value)>;

/// A compiled expression: evaluates against a context to produce a value.
pub type ExprFn = Rc<dyn Fn(&dyn Context) -> Result<Value>>;

/// Runtime value during expression evaluation.
///
/// Mirrors JSON with integers kept distinct from floats, plus the non-JSON
/// variants needed for offline evaluation: mocks for data that is unknown
/// until deployment, lazy objects computed on first access, and lambdas.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    /// A value that cannot be known offline.
    Mock(Mock),
    /// An object whose members are computed when first read.
    Lazy(Rc<dyn LazyObject>),
    /// The result of `lambda(...)`.
    Lambda(Rc<Lambda>),
}

/// An object whose members are produced on demand.
pub trait LazyObject: fmt::Debug {
    /// Returns the member `name`, or `None` if it does not exist.
    fn member(&self, ctx: &dyn Context, name: &str) -> Result<Option<Value>>;

    /// Resolves every member into a plain object.
    fn materialize(&self, ctx: &dyn Context) -> Result<Value>;
}

/// A lambda with its declared parameter names and compiled body.
pub struct Lambda {
    pub params: Vec<String>,
    pub body: ExprFn,
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(entries) => f.debug_tuple("Object").field(entries).finish(),
            Value::Mock(m) if m.secret => write!(f, "Mock([REDACTED])"),
            Value::Mock(m) => f.debug_tuple("Mock").field(&m.render()).finish(),
            Value::Lazy(l) => f.debug_tuple("Lazy").field(l).finish(),
            Value::Lambda(l) => f.debug_tuple("Lambda").field(&l.params).finish(),
        }
    }
}

impl PartialEq for Value {
    /// Deep equality. Strings compare ordinally, integers equal floats of the
    /// same value, and object members compare regardless of order.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Value::Mock(a), Value::Mock(b)) => a.key() == b.key(),
            (Value::Lazy(a), Value::Lazy(b)) => Rc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Returns the template type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) | Value::Lazy(_) => "object",
            Value::Mock(_) => "unknown",
            Value::Lambda(_) => "lambda",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Value::Mock(_))
    }

    /// Returns true for mocks flagged as secret.
    pub fn is_secret(&self) -> bool {
        matches!(self, Value::Mock(m) if m.secret)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value. Floats with no fractional part are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns the member `key` of an object, matched case-insensitively.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get_ci(key))
    }

    /// Returns true for values that convert to a string without loss.
    pub fn is_string_like(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                true
            }
            Value::Mock(m) => !m.is_container(),
            _ => false,
        }
    }

    /// Converts a scalar to the string used by `concat` and `format`.
    /// Containers are rendered as compact JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Mock(m) => m.render(),
            other => other.to_json().to_string(),
        }
    }

    /// Converts a JSON value into a runtime value.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts to JSON without a context. Lazy objects and lambdas have no
    /// JSON form and become null; use [`Value::materialize`] first.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null | Value::Lazy(_) | Value::Lambda(_) => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(n) => JsonValue::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Mock(m) => m.to_json(),
        }
    }

    /// Resolves lazy objects, recursively, so the value can be emitted.
    pub fn materialize(self, ctx: &dyn Context) -> Result<Value> {
        Ok(match self {
            Value::Lazy(lazy) => lazy.materialize(ctx)?.materialize(ctx)?,
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| v.materialize(ctx))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, v.materialize(ctx)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other,
        })
    }

    /// Returns true if this value, or anything nested in it, is a secret mock.
    pub fn contains_secret(&self) -> bool {
        match self {
            Value::Mock(m) => m.secret,
            Value::Array(items) => items.iter().any(Value::contains_secret),
            Value::Object(entries) => entries.iter().any(|(_, v)| v.contains_secret()),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Case-insensitive access to object entries.
pub trait MapExt {
    fn get_ci(&self, key: &str) -> Option<&Value>;
    fn get_ci_mut(&mut self, key: &str) -> Option<&mut Value>;
    fn contains_ci(&self, key: &str) -> bool;
    /// Replaces an existing entry in place, or appends a new one.
    fn set(&mut self, key: impl Into<String>, value: Value);
    fn remove_ci(&mut self, key: &str) -> Option<Value>;
}

impl MapExt for Map {
    fn get_ci(&self, key: &str) -> Option<&Value> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    fn get_ci_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    fn contains_ci(&self, key: &str) -> bool {
        self.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.get_ci_mut(&key) {
            Some(existing) => *existing = value,
            None => self.push((key, value)),
        }
    }

    fn remove_ci(&mut self, key: &str) -> Option<Value> {
        let index = self.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.remove(index).1)
    }
}

/// Builds an object value from string keys.
pub fn object<I, K>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
}

/// Case-insensitive lookup on a JSON object.
pub fn json_get<'a>(json: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    json.as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_integers() {
        let v = Value::from_json(&json!({"a": 1, "b": 1.5, "c": [true, null]}));
        assert_eq!(v.get("a"), Some(&Value::Int(1)));
        assert_eq!(v.get("B"), Some(&Value::Float(1.5)));
        assert_eq!(
            v.get("c"),
            Some(&Value::Array(vec![Value::Bool(true), Value::Null]))
        );
    }

    #[test]
    fn test_json_round_trip_preserves_order() {
        let source = json!({"z": 1, "a": {"y": "x", "b": [1, 2]}});
        let v = Value::from_json(&source);
        assert_eq!(v.to_json().to_string(), source.to_string());
    }

    #[test]
    fn test_deep_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::string("A"), Value::string("a"));
        let a = object([("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = object([("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_eq!(a, b);
        assert_ne!(a, object([("x", Value::Int(1))]));
    }

    #[test]
    fn test_map_ext_case_insensitive() {
        let mut map: Map = Vec::new();
        map.set("Name", Value::string("a"));
        map.set("name", Value::string("b"));
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].0, "Name");
        assert_eq!(map.get_ci("NAME"), Some(&Value::string("b")));
        assert!(map.contains_ci("nAmE"));
        assert_eq!(map.remove_ci("name"), Some(Value::string("b")));
        assert!(map.is_empty());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Bool(true).to_display_string(), "True");
        assert_eq!(Value::Int(-3).to_display_string(), "-3");
        assert_eq!(Value::Null.to_display_string(), "");
        let arr = Value::Array(vec![Value::Int(1), Value::string("a")]);
        assert_eq!(arr.to_display_string(), "[1,\"a\"]");
    }

    #[test]
    fn test_as_i64_accepts_integral_float() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::string("3").as_i64(), None);
    }
}
