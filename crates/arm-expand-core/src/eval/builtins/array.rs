//! Array and object functions.

use crate::error::{ExpressionError, FunctionErrorKind, Result};
use crate::eval::builtins::{
    expect_args, expect_array, expect_int, expect_object, expect_string, string_like,
};
use crate::eval::context::Context;
use crate::eval::json;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::{object, ExprFn, Map, MapExt, Value};

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("array", eval_array),
    FunctionDescriptor::delay_binding("coalesce", eval_coalesce),
    FunctionDescriptor::eager("concat", eval_concat),
    FunctionDescriptor::eager("contains", eval_contains),
    FunctionDescriptor::eager("createArray", eval_create_array),
    FunctionDescriptor::eager("createObject", eval_create_object),
    FunctionDescriptor::eager("empty", eval_empty),
    FunctionDescriptor::eager("first", eval_first),
    FunctionDescriptor::eager("flatten", eval_flatten),
    FunctionDescriptor::eager("indexFromEnd", eval_index_from_end),
    FunctionDescriptor::eager("indexOf", eval_index_of),
    FunctionDescriptor::eager("intersection", eval_intersection),
    FunctionDescriptor::eager("items", eval_items),
    FunctionDescriptor::eager("join", eval_join),
    FunctionDescriptor::eager("json", eval_json),
    FunctionDescriptor::eager("last", eval_last),
    FunctionDescriptor::eager("lastIndexOf", eval_last_index_of),
    FunctionDescriptor::eager("length", eval_length),
    FunctionDescriptor::eager("max", eval_max),
    FunctionDescriptor::eager("min", eval_min),
    FunctionDescriptor::eager("null", eval_null),
    FunctionDescriptor::eager("objectKeys", eval_object_keys),
    FunctionDescriptor::eager("range", eval_range),
    FunctionDescriptor::eager("shallowMerge", eval_shallow_merge),
    FunctionDescriptor::eager("skip", eval_skip),
    FunctionDescriptor::eager("take", eval_take),
    FunctionDescriptor::eager("tryGet", eval_try_get),
    FunctionDescriptor::eager("tryIndexFromEnd", eval_try_index_from_end),
    FunctionDescriptor::eager("union", eval_union),
];

fn eval_array(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("array", args, 1, 1)?;
    Ok(match &args[0] {
        Value::Array(items) => Value::Array(items.clone()),
        Value::Mock(m) => Value::Array(m.coerce_array(ctx.root().mocks())),
        other => Value::Array(vec![other.clone()]),
    })
}

/// Returns the first argument that is not null, evaluating no further.
fn eval_coalesce(ctx: &dyn Context, args: &[ExprFn]) -> Result<Value> {
    expect_args("coalesce", args, 1, usize::MAX)?;
    for arg in args {
        let value = arg(ctx)?;
        if !value.is_null() {
            return Ok(value);
        }
    }
    Ok(Value::Null)
}

fn eval_concat(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("concat", args, 1, usize::MAX)?;
    if let Some(parts) = args.iter().map(string_like).collect::<Option<Vec<_>>>() {
        return Ok(Value::String(parts.concat()));
    }
    if matches!(args[0], Value::Array(_)) {
        let mut result = Vec::new();
        for arg in args {
            match arg {
                Value::Array(items) => result.extend(items.iter().cloned()),
                Value::Null | Value::Mock(_) => {}
                other => {
                    return Err(ExpressionError::function(
                        "concat",
                        FunctionErrorKind::InvalidFormat,
                        format!("can not concatenate an array with {}", other.type_name()),
                    ))
                }
            }
        }
        return Ok(Value::Array(result));
    }
    Err(ExpressionError::function(
        "concat",
        FunctionErrorKind::InvalidFormat,
        "the arguments must all be strings or all be arrays",
    ))
}

fn eval_contains(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("contains", args, 2, 2)?;
    let needle = &args[1];
    let found = match &args[0] {
        Value::Array(items) => items.contains(needle),
        Value::String(s) => s.contains(needle.to_display_string().as_str()),
        Value::Object(_) | Value::Lazy(_) => {
            let entries = expect_object(ctx, "contains", args, 0)?;
            entries.contains_ci(&needle.to_display_string())
        }
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn eval_create_array(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    Ok(Value::Array(args.to_vec()))
}

fn eval_create_object(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    if args.len() % 2 != 0 {
        return Err(ExpressionError::arity(
            "createObject",
            format!("an even number of arguments, got {}", args.len()),
        ));
    }
    let mut entries: Map = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks(2) {
        let key = expect_string("createObject", pair, 0)?;
        entries.set(key, pair[1].clone());
    }
    Ok(Value::Object(entries))
}

fn eval_empty(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("empty", args, 1, 1)?;
    let empty = match &args[0] {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(entries) => entries.is_empty(),
        Value::Lazy(_) => expect_object(ctx, "empty", args, 0)?.is_empty(),
        _ => false,
    };
    Ok(Value::Bool(empty))
}

fn eval_first(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("first", args, 1, 1)?;
    Ok(match &args[0] {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        Value::String(s) => s
            .chars()
            .next()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn eval_last(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("last", args, 1, 1)?;
    Ok(match &args[0] {
        Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
        Value::String(s) => s
            .chars()
            .last()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn eval_flatten(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("flatten", args, 1, 1)?;
    let mut result = Vec::new();
    for item in expect_array(ctx, "flatten", args, 0)? {
        match item {
            Value::Array(inner) => result.extend(inner),
            Value::Null => {}
            other => {
                return Err(ExpressionError::argument(
                    "flatten",
                    "argument 1",
                    format!("an array of arrays, found {}", other.type_name()),
                ))
            }
        }
    }
    Ok(Value::Array(result))
}

/// Resolves a 1-based position counted from the end of `items`.
fn from_end(items: &[Value], position: i64) -> Option<Value> {
    let position = usize::try_from(position).ok().filter(|&p| p >= 1)?;
    items
        .len()
        .checked_sub(position)
        .and_then(|i| items.get(i))
        .cloned()
}

fn eval_index_from_end(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("indexFromEnd", args, 2, 2)?;
    let items = expect_array(ctx, "indexFromEnd", args, 0)?;
    let position = expect_int("indexFromEnd", args, 1)?;
    from_end(&items, position).ok_or_else(|| {
        ExpressionError::function(
            "indexFromEnd",
            FunctionErrorKind::OutOfRange,
            format!(
                "position {} is out of range for an array of {}",
                position,
                items.len()
            ),
        )
    })
}

fn eval_try_index_from_end(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("tryIndexFromEnd", args, 2, 2)?;
    let items = expect_array(ctx, "tryIndexFromEnd", args, 0)?;
    let position = expect_int("tryIndexFromEnd", args, 1)?;
    Ok(from_end(&items, position).unwrap_or(Value::Null))
}

/// Finds `needle` in a string (case-insensitive, by character position) or
/// an array (deep equality).
fn find(function: &str, args: &[Value], last: bool) -> Result<Value> {
    expect_args(function, args, 2, 2)?;
    let position = match &args[0] {
        Value::Array(items) => {
            let mut matches = items
                .iter()
                .enumerate()
                .filter(|(_, v)| *v == &args[1])
                .map(|(i, _)| i);
            if last {
                matches.last()
            } else {
                matches.next()
            }
        }
        Value::String(haystack) => {
            let needle = expect_string(function, args, 1)?.to_lowercase();
            let haystack = haystack.to_lowercase();
            let byte = if last {
                haystack.rfind(&needle)
            } else {
                haystack.find(&needle)
            };
            byte.map(|b| haystack[..b].chars().count())
        }
        other => {
            return Err(ExpressionError::argument(
                function,
                "argument 1",
                format!("a string or array, got {}", other.type_name()),
            ))
        }
    };
    Ok(Value::Int(position.map_or(-1, |p| p as i64)))
}

fn eval_index_of(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    find("indexOf", args, false)
}

fn eval_last_index_of(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    find("lastIndexOf", args, true)
}

fn eval_intersection(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("intersection", args, 2, usize::MAX)?;
    match &args[0] {
        Value::Array(first) => {
            let mut result: Vec<Value> = Vec::new();
            for item in first {
                if !result.contains(item) {
                    result.push(item.clone());
                }
            }
            for i in 1..args.len() {
                let other = expect_array(ctx, "intersection", args, i)?;
                result.retain(|item| other.contains(item));
            }
            Ok(Value::Array(result))
        }
        _ => {
            let mut result = expect_object(ctx, "intersection", args, 0)?;
            for i in 1..args.len() {
                let other = expect_object(ctx, "intersection", args, i)?;
                result.retain(|(key, value)| other.get_ci(key) == Some(value));
            }
            Ok(Value::Object(result))
        }
    }
}

fn eval_items(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("items", args, 1, 1)?;
    let mut entries = expect_object(ctx, "items", args, 0)?;
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(Value::Array(
        entries
            .into_iter()
            .map(|(key, value)| object([("key", Value::String(key)), ("value", value)]))
            .collect(),
    ))
}

fn eval_join(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("join", args, 2, 2)?;
    let items = expect_array(ctx, "join", args, 0)?;
    let delimiter = expect_string("join", args, 1)?;
    let parts = items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Mock(m) if !m.is_container() => Ok(m.render()),
            other => Err(ExpressionError::argument(
                "join",
                "argument 1",
                format!("an array of strings, found {}", other.type_name()),
            )),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::String(parts.join(&delimiter)))
}

fn eval_json(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("json", args, 1, 1)?;
    if args[0].is_null() {
        return Ok(Value::Null);
    }
    let source = expect_string("json", args, 0)?;
    let parsed = json::parse_lenient(&source).map_err(|err| {
        ExpressionError::function("json", FunctionErrorKind::InvalidFormat, err.to_string())
    })?;
    Ok(Value::from_json(&parsed))
}

fn eval_length(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("length", args, 1, 1)?;
    let length = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(entries) => entries.len(),
        Value::Lazy(_) => expect_object(ctx, "length", args, 0)?.len(),
        Value::Mock(m) => m.coerce_array(ctx.root().mocks()).len(),
        other => {
            return Err(ExpressionError::argument(
                "length",
                "argument 1",
                format!("a string, array or object, got {}", other.type_name()),
            ))
        }
    };
    Ok(Value::Int(length as i64))
}

/// Collects integers from the arguments, flattening array arguments.
fn integers(function: &str, args: &[Value]) -> Result<Vec<i64>> {
    expect_args(function, args, 1, usize::MAX)?;
    let mut values = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => {
                for item in items {
                    values.push(item.as_i64().ok_or_else(|| {
                        ExpressionError::argument(function, "array item", "an integer")
                    })?);
                }
            }
            other => values.push(other.as_i64().ok_or_else(|| {
                ExpressionError::argument(
                    function,
                    "arguments",
                    format!("integers or arrays of integers, got {}", other.type_name()),
                )
            })?),
        }
    }
    Ok(values)
}

fn eval_max(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    Ok(integers("max", args)?
        .into_iter()
        .max()
        .map_or(Value::Null, Value::Int))
}

fn eval_min(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    Ok(integers("min", args)?
        .into_iter()
        .min()
        .map_or(Value::Null, Value::Int))
}

fn eval_null(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("null", args, 0, 0)?;
    Ok(Value::Null)
}

fn eval_object_keys(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("objectKeys", args, 1, 1)?;
    let mut keys: Vec<String> = expect_object(ctx, "objectKeys", args, 0)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    keys.sort();
    Ok(Value::Array(keys.into_iter().map(Value::String).collect()))
}

fn eval_range(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("range", args, 2, 2)?;
    let start = expect_int("range", args, 0)?;
    let count = expect_int("range", args, 1)?;
    if !(0..=10_000).contains(&count) {
        return Err(ExpressionError::function(
            "range",
            FunctionErrorKind::OutOfRange,
            format!("count {} must be between 0 and 10000", count),
        ));
    }
    let end = start.checked_add(count).ok_or_else(|| {
        ExpressionError::function(
            "range",
            FunctionErrorKind::OutOfRange,
            format!("start {} plus count {} overflows", start, count),
        )
    })?;
    Ok(Value::Array((start..end).map(Value::Int).collect()))
}

fn eval_shallow_merge(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("shallowMerge", args, 1, 1)?;
    let mut result: Map = Vec::new();
    for (i, item) in expect_array(ctx, "shallowMerge", args, 0)?.into_iter().enumerate() {
        match item {
            Value::Null => {}
            Value::Object(entries) => {
                for (key, value) in entries {
                    result.set(key, value);
                }
            }
            other => {
                return Err(ExpressionError::argument(
                    "shallowMerge",
                    format!("item {}", i),
                    format!("an object, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(Value::Object(result))
}

fn eval_skip(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("skip", args, 2, 2)?;
    let n = usize::try_from(expect_int("skip", args, 1)?).unwrap_or(0);
    match &args[0] {
        Value::String(s) => Ok(Value::String(s.chars().skip(n).collect())),
        _ => Ok(Value::Array(
            expect_array(ctx, "skip", args, 0)?.into_iter().skip(n).collect(),
        )),
    }
}

fn eval_take(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("take", args, 2, 2)?;
    let n = usize::try_from(expect_int("take", args, 1)?).unwrap_or(0);
    match &args[0] {
        Value::String(s) => Ok(Value::String(s.chars().take(n).collect())),
        _ => Ok(Value::Array(
            expect_array(ctx, "take", args, 0)?.into_iter().take(n).collect(),
        )),
    }
}

/// Walks object keys or array indexes, returning null on the first miss.
fn eval_try_get(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("tryGet", args, 2, usize::MAX)?;
    let mut current = args[0].clone();
    for key in &args[1..] {
        current = match (current, key) {
            (Value::Object(entries), Value::String(k)) => {
                entries.get_ci(k).cloned().unwrap_or(Value::Null)
            }
            (Value::Lazy(lazy), Value::String(k)) => lazy.member(ctx, k)?.unwrap_or(Value::Null),
            (Value::Array(items), index) => index
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            (Value::Mock(m), index) => m.index(ctx.root().mocks(), index),
            _ => Value::Null,
        };
        if current.is_null() {
            break;
        }
    }
    Ok(current)
}

fn eval_union(ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("union", args, 2, usize::MAX)?;
    let first = args.iter().find(|a| !a.is_null() && !a.is_mock());
    match first {
        Some(Value::Array(_)) => {
            let mut result: Vec<Value> = Vec::new();
            for (i, arg) in args.iter().enumerate() {
                if arg.is_null() || arg.is_mock() {
                    continue;
                }
                for item in expect_array(ctx, "union", args, i)? {
                    if !result.contains(&item) {
                        result.push(item);
                    }
                }
            }
            Ok(Value::Array(result))
        }
        Some(_) => {
            let mut result: Map = Vec::new();
            for (i, arg) in args.iter().enumerate() {
                if arg.is_null() || arg.is_mock() {
                    continue;
                }
                merge_deep(&mut result, expect_object(ctx, "union", args, i)?);
            }
            Ok(Value::Object(result))
        }
        None => Ok(Value::Null),
    }
}

/// Merges `other` into `target`; nested objects merge recursively and
/// anything else is overwritten.
fn merge_deep(target: &mut Map, other: Map) {
    for (key, value) in other {
        if let Some(existing) = target.get_ci_mut(&key) {
            match (existing, value) {
                (Value::Object(existing), Value::Object(incoming)) => {
                    merge_deep(existing, incoming)
                }
                (existing, value) => *existing = value,
            }
        } else {
            target.push((key, value));
        }
    }
}
