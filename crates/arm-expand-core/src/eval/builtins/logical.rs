//! Logical functions. `and`, `or` and `if` short-circuit.

use crate::error::{ExpressionError, Result};
use crate::eval::builtins::{expect_args, expect_bool};
use crate::eval::context::Context;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::{ExprFn, Value};

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::delay_binding("and", eval_and),
    FunctionDescriptor::delay_binding("or", eval_or),
    FunctionDescriptor::eager("not", eval_not),
    FunctionDescriptor::delay_binding("if", eval_if),
    FunctionDescriptor::eager("bool", eval_bool),
    FunctionDescriptor::eager("true", eval_true),
    FunctionDescriptor::eager("false", eval_false),
];

fn condition(function: &str, ctx: &dyn Context, arg: &ExprFn, index: usize) -> Result<bool> {
    let value = arg(ctx)?;
    expect_bool(function, std::slice::from_ref(&value), 0).map_err(|_| {
        ExpressionError::argument(
            function,
            format!("argument {}", index + 1),
            format!("a bool, got {}", value.type_name()),
        )
    })
}

fn eval_and(ctx: &dyn Context, args: &[ExprFn]) -> Result<Value> {
    expect_args("and", args, 2, usize::MAX)?;
    for (i, arg) in args.iter().enumerate() {
        if !condition("and", ctx, arg, i)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn eval_or(ctx: &dyn Context, args: &[ExprFn]) -> Result<Value> {
    expect_args("or", args, 2, usize::MAX)?;
    for (i, arg) in args.iter().enumerate() {
        if condition("or", ctx, arg, i)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn eval_not(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("not", args, 1, 1)?;
    Ok(Value::Bool(!expect_bool("not", args, 0)?))
}

fn eval_if(ctx: &dyn Context, args: &[ExprFn]) -> Result<Value> {
    expect_args("if", args, 3, 3)?;
    if condition("if", ctx, &args[0], 0)? {
        args[1](ctx)
    } else {
        args[2](ctx)
    }
}

fn eval_bool(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("bool", args, 1, 1)?;
    match &args[0] {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        other => match other.as_i64() {
            Some(n) => Ok(Value::Bool(n != 0)),
            None => Err(ExpressionError::argument(
                "bool",
                "argument 1",
                "'true', 'false', a bool or an integer",
            )),
        },
    }
}

fn eval_true(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("true", args, 0, 0)?;
    Ok(Value::Bool(true))
}

fn eval_false(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("false", args, 0, 0)?;
    Ok(Value::Bool(false))
}
