//! Built-in template functions.
//!
//! Every function validates its arity and argument types before doing any
//! work and reports failures as [`ExpressionError::Argument`].

pub mod array;
pub mod cidr;
pub mod comparison;
pub mod date;
pub mod deployment;
pub mod lambda;
pub mod logical;
pub mod numeric;
pub mod resource;
pub mod scope;
pub mod string;
pub mod zones;

use crate::error::{ExpressionError, Result};
use crate::eval::context::Context;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::{Map, Value};

/// Returns every built-in function descriptor.
pub fn all() -> impl Iterator<Item = &'static FunctionDescriptor> {
    array::FUNCTIONS
        .iter()
        .chain(comparison::FUNCTIONS)
        .chain(date::FUNCTIONS)
        .chain(deployment::FUNCTIONS)
        .chain(logical::FUNCTIONS)
        .chain(numeric::FUNCTIONS)
        .chain(resource::FUNCTIONS)
        .chain(scope::FUNCTIONS)
        .chain(string::FUNCTIONS)
        .chain(lambda::FUNCTIONS)
        .chain(cidr::FUNCTIONS)
        .chain(zones::FUNCTIONS)
}

fn operand(index: usize) -> String {
    format!("argument {}", index + 1)
}

/// Checks that `args.len()` is within `min..=max`.
pub(crate) fn expect_args<T>(function: &str, args: &[T], min: usize, max: usize) -> Result<()> {
    if args.len() >= min && args.len() <= max {
        return Ok(());
    }
    let expected = if min == max {
        format!("{} argument(s), got {}", min, args.len())
    } else if max == usize::MAX {
        format!("at least {} argument(s), got {}", min, args.len())
    } else {
        format!("between {} and {} arguments, got {}", min, max, args.len())
    };
    Err(ExpressionError::arity(function, expected))
}

/// Extracts a string argument. Scalar mocks are accepted as their placeholder.
pub(crate) fn expect_string(function: &str, args: &[Value], index: usize) -> Result<String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Mock(m)) if !m.is_container() => Ok(m.render()),
        Some(other) => Err(ExpressionError::argument(
            function,
            operand(index),
            format!("a string, got {}", other.type_name()),
        )),
        None => Err(ExpressionError::argument(function, operand(index), "a string")),
    }
}

/// Extracts an integer argument.
pub(crate) fn expect_int(function: &str, args: &[Value], index: usize) -> Result<i64> {
    match args.get(index) {
        Some(value) => value.as_i64().ok_or_else(|| {
            ExpressionError::argument(
                function,
                operand(index),
                format!("an integer, got {}", value.type_name()),
            )
        }),
        None => Err(ExpressionError::argument(function, operand(index), "an integer")),
    }
}

/// Extracts an integer argument, also accepting numeric strings.
pub(crate) fn expect_convert_int(function: &str, args: &[Value], index: usize) -> Result<i64> {
    match args.get(index) {
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| {
            ExpressionError::argument(function, operand(index), "an integer or numeric string")
        }),
        _ => expect_int(function, args, index),
    }
}

pub(crate) fn expect_bool(function: &str, args: &[Value], index: usize) -> Result<bool> {
    match args.get(index) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ExpressionError::argument(
            function,
            operand(index),
            format!("a bool, got {}", other.type_name()),
        )),
        None => Err(ExpressionError::argument(function, operand(index), "a bool")),
    }
}

/// Extracts an array argument. A mock is coerced to an (empty) array and
/// its shape recorded.
pub(crate) fn expect_array(
    ctx: &dyn Context,
    function: &str,
    args: &[Value],
    index: usize,
) -> Result<Vec<Value>> {
    match args.get(index) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Mock(m)) => Ok(m.coerce_array(ctx.root().mocks())),
        Some(other) => Err(ExpressionError::argument(
            function,
            operand(index),
            format!("an array, got {}", other.type_name()),
        )),
        None => Err(ExpressionError::argument(function, operand(index), "an array")),
    }
}

/// Extracts an object argument, materializing lazy objects.
pub(crate) fn expect_object(
    ctx: &dyn Context,
    function: &str,
    args: &[Value],
    index: usize,
) -> Result<Map> {
    match args.get(index) {
        Some(Value::Object(entries)) => Ok(entries.clone()),
        Some(Value::Lazy(lazy)) => match lazy.materialize(ctx)? {
            Value::Object(entries) => Ok(entries),
            _ => Ok(Vec::new()),
        },
        Some(Value::Mock(m)) => {
            m.coerce_object(ctx.root().mocks());
            Ok(Vec::new())
        }
        Some(other) => Err(ExpressionError::argument(
            function,
            operand(index),
            format!("an object, got {}", other.type_name()),
        )),
        None => Err(ExpressionError::argument(function, operand(index), "an object")),
    }
}

/// Returns the string form of a scalar, or `None` for containers.
pub(crate) fn string_like(value: &Value) -> Option<String> {
    if value.is_string_like() {
        Some(value.to_display_string())
    } else {
        None
    }
}
