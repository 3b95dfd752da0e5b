use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::diag;
use crate::error::{DeploymentError, ExpressionError, FunctionErrorKind, Result};
use crate::eval::context::Context;
use crate::eval::copy::CopyIndexState;
use crate::eval::deployment;
use crate::eval::registry::{Invoke, Registry};
use crate::eval::value::{ExprFn, MapExt, Value};
use crate::expr::{self, TokenKind, TokenStream};

/// Compiles a token stream into a closure tree.
///
/// The stream is consumed from the start; every token must belong to a
/// single top-level element and its suffixes.
pub fn compile(tokens: &mut TokenStream, expression: &str) -> Result<ExprFn> {
    tokens.move_to(0);
    let registry = Registry::standard();
    let f = element(tokens, expression, registry)?;
    if let Some(token) = tokens.current() {
        return Err(parse_error(
            expression,
            format!("unexpected token '{}' after the expression", token),
        ));
    }
    Ok(f)
}

/// Evaluates a single expression string such as `[parameters('name')]`.
pub fn evaluate(ctx: &dyn Context, expression: &str) -> Result<Value> {
    let f = ctx.root().compile(expression)?;
    f(ctx)
}

fn element(tokens: &mut TokenStream, expression: &str, registry: &Registry) -> Result<ExprFn> {
    let token = tokens
        .pop()
        .ok_or_else(|| parse_error(expression, "expected a function, string or number"))?;

    let mut f: ExprFn = match token.kind {
        TokenKind::String => constant(Value::String(token.text().to_string())),
        TokenKind::Numeric => constant(Value::Int(token.value.unwrap_or_default())),
        TokenKind::Element => {
            let name = token.text().to_string();
            if !tokens.skip(TokenKind::GroupStart) {
                return Err(parse_error(
                    expression,
                    format!("expected '(' after '{}'", name),
                ));
            }
            let mut args = Vec::new();
            while !tokens.skip(TokenKind::GroupEnd) {
                if tokens.current().is_none() {
                    return Err(parse_error(expression, format!("unterminated call to '{}'", name)));
                }
                args.push(element(tokens, expression, registry)?);
            }
            function(name, args, registry)?
        }
        _ => {
            return Err(parse_error(
                expression,
                format!("unexpected token '{}'", token),
            ))
        }
    };

    loop {
        if tokens.skip(TokenKind::IndexStart) {
            let index = element(tokens, expression, registry)?;
            if !tokens.skip(TokenKind::IndexEnd) {
                return Err(parse_error(expression, "expected ']' after index"));
            }
            let source = f;
            f = Rc::new(move |ctx: &dyn Context| {
                let value = source(ctx)?;
                let index = index(ctx)?;
                index_value(ctx, value, &index)
            });
        } else if let Some(token) = tokens.try_kind(TokenKind::Property) {
            let name = token.text().to_string();
            let source = f;
            f = Rc::new(move |ctx: &dyn Context| {
                let value = source(ctx)?;
                property_value(ctx, value, &name)
            });
        } else {
            break;
        }
    }
    Ok(f)
}

fn constant(value: Value) -> ExprFn {
    Rc::new(move |_: &dyn Context| Ok(value.clone()))
}

fn function(name: String, args: Vec<ExprFn>, registry: &Registry) -> Result<ExprFn> {
    if name.contains('.') {
        let f: ExprFn = Rc::new(move |ctx: &dyn Context| {
            let values = evaluate_args(ctx, &args)?;
            deployment::invoke_user_function(ctx, &name, values)
        });
        return Ok(f);
    }

    let descriptor = registry.get(&name).ok_or_else(|| ExpressionError::NotImplemented {
        suggestion: diag::suggest(&registry.names(), &name),
        function: name.clone(),
    })?;

    let f: ExprFn = match descriptor.invoke {
        Invoke::Eager(f) => Rc::new(move |ctx: &dyn Context| {
            let values = evaluate_args(ctx, &args)?;
            f(ctx, &values)
        }),
        Invoke::DelayBinding(f) => Rc::new(move |ctx: &dyn Context| f(ctx, &args)),
    };
    Ok(f)
}

fn evaluate_args(ctx: &dyn Context, args: &[ExprFn]) -> Result<Vec<Value>> {
    args.iter().map(|arg| arg(ctx)).collect()
}

/// Applies `source[index]`.
pub fn index_value(ctx: &dyn Context, source: Value, index: &Value) -> Result<Value> {
    match source {
        Value::Array(items) => {
            let i = index
                .as_i64()
                .ok_or_else(|| ExpressionError::argument("[]", "index", "an integer"))?;
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| {
                    ExpressionError::function(
                        "[]",
                        FunctionErrorKind::OutOfRange,
                        format!("index {} is out of range for an array of {}", i, items.len()),
                    )
                })
        }
        Value::Object(entries) => {
            let key = index
                .as_str()
                .ok_or_else(|| ExpressionError::argument("[]", "index", "a string"))?;
            match entries.get_ci(key) {
                Some(value) => Ok(value.clone()),
                None => missing_property(ctx, key),
            }
        }
        Value::Mock(mock) => Ok(mock.index(ctx.root().mocks(), index)),
        Value::Lazy(lazy) => {
            let key = index
                .as_str()
                .ok_or_else(|| ExpressionError::argument("[]", "index", "a string"))?;
            match lazy.member(ctx, key)? {
                Some(value) => Ok(value),
                None => missing_property(ctx, key),
            }
        }
        Value::Null => missing_property(ctx, &index.to_display_string()),
        other => Err(ExpressionError::argument(
            "[]",
            "source",
            format!("an array or object, got {}", other.type_name()),
        )),
    }
}

/// Applies `source.name`.
pub fn property_value(ctx: &dyn Context, source: Value, name: &str) -> Result<Value> {
    match source {
        Value::Object(entries) => match entries.get_ci(name) {
            Some(value) => Ok(value.clone()),
            None => missing_property(ctx, name),
        },
        Value::Mock(mock) => Ok(mock.member(ctx.root().mocks(), name)),
        Value::Lazy(lazy) => match lazy.member(ctx, name)? {
            Some(value) => Ok(value),
            None => missing_property(ctx, name),
        },
        _ => missing_property(ctx, name),
    }
}

fn missing_property(ctx: &dyn Context, name: &str) -> Result<Value> {
    if ctx.should_throw_missing_property() {
        Err(ExpressionError::reference(name))
    } else {
        Ok(Value::Null)
    }
}

/// Expands a JSON template value, evaluating every expression string and
/// property-level `copy` loop in it.
pub fn expand(ctx: &dyn Context, json: &JsonValue) -> Result<Value> {
    let mut secrets = Vec::new();
    expand_path(ctx, json, "", &mut secrets).map_err(|err| match err {
        DeploymentError::Expression { source, .. } => source,
        other => ExpressionError::symbol("template", other.to_string()),
    })
}

/// Expands a JSON template value located at `path`.
///
/// Paths of values derived from secrets (secure parameters or secret
/// mocks) are appended to `secrets`.
pub fn expand_path(
    ctx: &dyn Context,
    json: &JsonValue,
    path: &str,
    secrets: &mut Vec<String>,
) -> std::result::Result<Value, DeploymentError> {
    match json {
        JsonValue::String(s) if expr::is_expression(s) => {
            let root = ctx.root();
            let outer = root.take_secret_touched();
            let result = evaluate(ctx, s);
            let touched = root.take_secret_touched();
            if outer || touched {
                root.mark_secret();
            }
            let value = result.map_err(|source| DeploymentError::Expression {
                path: path.to_string(),
                expression: s.clone(),
                source,
            })?;
            if touched || value.contains_secret() {
                secrets.push(path.to_string());
            }
            Ok(value)
        }
        JsonValue::String(s) => Ok(Value::String(expr::literal_text(s).to_string())),
        JsonValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                values.push(expand_path(ctx, item, &format!("{}[{}]", path, i), secrets)?);
            }
            Ok(Value::Array(values))
        }
        JsonValue::Object(map) => {
            let mut entries = Vec::with_capacity(map.len());
            let mut copies = None;
            for (key, value) in map {
                if key.eq_ignore_ascii_case("copy") && is_property_copy(value) {
                    copies = Some(value);
                    continue;
                }
                let child = join_path(path, key);
                entries.push((key.clone(), expand_path(ctx, value, &child, secrets)?));
            }
            if let Some(JsonValue::Array(copies)) = copies {
                for copy in copies {
                    let (name, items) = expand_copy(ctx, copy, path, secrets)?;
                    entries.set(name, Value::Array(items));
                }
            }
            Ok(Value::Object(entries))
        }
        other => Ok(Value::from_json(other)),
    }
}

/// Returns true for `copy: [{name, count, input}]`.
fn is_property_copy(value: &JsonValue) -> bool {
    value.as_array().is_some_and(|items| {
        !items.is_empty()
            && items.iter().all(|item| {
                item.get("name").is_some_and(JsonValue::is_string) && item.get("input").is_some()
            })
    })
}

/// Expands one `{name, count, input}` loop into its items.
pub fn expand_copy(
    ctx: &dyn Context,
    copy: &JsonValue,
    path: &str,
    secrets: &mut Vec<String>,
) -> std::result::Result<(String, Vec<Value>), DeploymentError> {
    let name = copy
        .get("name")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let copy_path = join_path(path, &name);
    let count = copy_count(ctx, copy.get("count"), &copy_path, secrets)?;
    let input = copy.get("input").cloned().unwrap_or(JsonValue::Null);

    let root = ctx.root();
    let mut items = Vec::new();
    let mut failure = None;
    let state = CopyIndexState::named(name.clone(), count).with_input(input.clone());
    let result = root.for_each_copy(state, false, || {
        let item_path = format!("{}[{}]", copy_path, items.len());
        match expand_path(ctx, &input, &item_path, secrets) {
            Ok(value) => {
                items.push(value);
                Ok(())
            }
            Err(err) => {
                failure = Some(err);
                Err(ExpressionError::symbol(name.clone(), "copy input failed"))
            }
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    result.map_err(|source| DeploymentError::Expression {
        path: copy_path.clone(),
        expression: String::new(),
        source,
    })?;
    Ok((name, items))
}

/// Evaluates the `count` of a copy loop.
pub fn copy_count(
    ctx: &dyn Context,
    count: Option<&JsonValue>,
    path: &str,
    secrets: &mut Vec<String>,
) -> std::result::Result<i64, DeploymentError> {
    let count_path = join_path(path, "count");
    let Some(count) = count else {
        return Ok(1);
    };
    let value = expand_path(ctx, count, &count_path, secrets)?;
    match value {
        Value::Mock(_) => Ok(0),
        other => other.as_i64().ok_or_else(|| DeploymentError::Expression {
            path: count_path,
            expression: count.to_string(),
            source: ExpressionError::argument("copy", "count", "an integer"),
        }),
    }
}

/// Joins a JSON path and a property name.
pub fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn parse_error(expression: &str, reason: impl Into<String>) -> ExpressionError {
    ExpressionError::Parse {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}
